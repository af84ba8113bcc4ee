//! PID ledger shared between `start`, `stop` and `status` invocations.
//!
//! The ledger is an append-only file with one record per launch. Records are JSON objects that
//! name their service, so attribution does not depend on registry order. Bare PID lines written
//! by older tooling are still understood and attributed by position.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::config::ServiceSpec;
use crate::error::LedgerError;

/// One launch, as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRecord {
    /// Service the process was launched for.
    pub service: String,
    /// OS process identifier returned at spawn time.
    pub pid: u32,
    /// Port the service was expected to bind at launch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Launch timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl LaunchRecord {
    /// Creates a record stamped with the current time.
    pub fn new(service: &str, pid: u32, port: u16) -> Self {
        Self {
            service: service.to_string(),
            pid,
            port: Some(port),
            started_at: Some(Utc::now()),
        }
    }
}

/// A line read back from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    /// Structured record naming its service.
    Named(LaunchRecord),
    /// Legacy line holding only a PID; its service is implied by its position.
    Bare(u32),
}

impl LedgerEntry {
    /// The recorded process identifier.
    pub fn pid(&self) -> u32 {
        match self {
            LedgerEntry::Named(record) => record.pid,
            LedgerEntry::Bare(pid) => *pid,
        }
    }

    /// The recorded service name, if the entry carries one.
    pub fn service(&self) -> Option<&str> {
        match self {
            LedgerEntry::Named(record) => Some(record.service.as_str()),
            LedgerEntry::Bare(_) => None,
        }
    }

    /// The recorded launch time, if known.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            LedgerEntry::Named(record) => record.started_at,
            LedgerEntry::Bare(_) => None,
        }
    }
}

/// Handle on the ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Creates a handle for the ledger at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a ledger currently exists, i.e. a start happened that was not fully stopped.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Appends one record, preserving launch order.
    pub fn append(&self, record: &LaunchRecord) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;

        debug!(
            "Recorded PID {} for '{}' in {}",
            record.pid,
            record.service,
            self.path.display()
        );
        Ok(())
    }

    /// Reads every entry in ledger order. A missing ledger reads as empty.
    pub fn read_all(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        for (index, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            match parse_line(line) {
                Some(entry) => entries.push(entry),
                None => warn!(
                    "Ignoring malformed line {} in {}: {}",
                    index + 1,
                    self.path.display(),
                    line
                ),
            }
        }

        Ok(entries)
    }

    /// Removes the ledger. Absent ledgers are not an error.
    pub fn clear(&self) -> Result<(), LedgerError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed PID ledger {}", self.path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn parse_line(line: &str) -> Option<LedgerEntry> {
    if let Ok(pid) = line.parse::<u32>() {
        return (pid > 0).then_some(LedgerEntry::Bare(pid));
    }

    serde_json::from_str::<LaunchRecord>(line)
        .ok()
        .filter(|record| record.pid > 0)
        .map(LedgerEntry::Named)
}

/// Result of matching ledger entries to registry entries.
#[derive(Debug)]
pub struct Attribution<'a> {
    /// Every registry entry, in registry order, with the entry attributed to it (if any).
    pub assigned: Vec<(&'a ServiceSpec, Option<LedgerEntry>)>,
    /// Entries that could not be matched to a registry entry.
    pub unattributed: Vec<LedgerEntry>,
}

/// Matches ledger entries to services.
///
/// Named entries are matched by service name, the newest record winning. Bare entries are
/// matched positionally: the k-th bare entry belongs to the k-th registry entry.
pub fn attribute<'a>(services: &'a [ServiceSpec], entries: &[LedgerEntry]) -> Attribution<'a> {
    let mut newest_named: HashMap<&str, usize> = HashMap::new();
    let mut bare_positions: Vec<usize> = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        match entry.service() {
            Some(name) => {
                newest_named.insert(name, index);
            }
            None => bare_positions.push(index),
        }
    }

    let mut used = vec![false; entries.len()];
    let mut assigned = Vec::with_capacity(services.len());

    for (ordinal, service) in services.iter().enumerate() {
        let index = newest_named
            .get(service.name.as_str())
            .copied()
            .or_else(|| bare_positions.get(ordinal).copied().filter(|i| !used[*i]));

        let entry = index.map(|i| {
            used[i] = true;
            entries[i].clone()
        });
        assigned.push((service, entry));
    }

    let unattributed = entries
        .iter()
        .zip(used)
        .filter(|(_, used)| !used)
        .map(|(entry, _)| entry.clone())
        .collect();

    Attribution {
        assigned,
        unattributed,
    }
}
