//! Health classification and status rendering.
//!
//! Two independent signals are reported per service: the liveness of the PID recorded in the
//! ledger and whether the declared port is listening. They normally agree; when they do not, the
//! disagreement is reported as-is instead of being folded into one verdict.
use chrono::Utc;
use serde::Serialize;
use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};
use strum_macros::Display;
use tracing::{debug, warn};

use crate::config::ServiceSpec;
use crate::constants::MAX_STATUS_LOG_LINES;
use crate::health::{EndpointProbe, EndpointVerdict};
use crate::ledger::{Ledger, LedgerEntry, attribute};
use crate::logs::tail_lines;
use crate::probe;
use crate::process::{ProcessState, process_command, process_name, process_state};

const GREEN_BOLD: &str = "\x1b[1;32m"; // Bright Green
const RED_BOLD: &str = "\x1b[1;31m"; // Bright Red
const YELLOW_BOLD: &str = "\x1b[1;33m"; // Yellow/Gold
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m"; // Reset color

/// Verdict for the PID recorded for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Display)]
#[serde(tag = "state", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProcessVerdict {
    /// The recorded PID is alive.
    Running {
        /// OS process name, when visible.
        name: Option<String>,
    },
    /// A PID is recorded but the process is gone.
    Stale,
    /// Nothing is recorded for this service.
    Stopped,
    /// Liveness of the recorded PID could not be determined.
    Checking,
}

/// Verdict for a service's declared port, from the port prober only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PortVerdict {
    /// Something is listening on the port.
    Listening,
    /// Nothing is listening on the port.
    NotListening,
}

/// Disagreement between the process and port signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Mismatch {
    /// No live tracked process, yet the port is listening: an orphan or an out-of-band start.
    UntrackedListener,
    /// The tracked process is alive but the port is not listening: still booting or bound elsewhere.
    NotBound,
}

impl Mismatch {
    fn describe(self, port: u16) -> String {
        match self {
            Mismatch::UntrackedListener => format!(
                "port {port} is listening without a live tracked process (orphaned child or manual start?)"
            ),
            Mismatch::NotBound => {
                format!("process is alive but port {port} is not listening (still starting?)")
            }
        }
    }
}

/// Status of one registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Service name.
    pub name: String,
    /// Declared port.
    pub port: u16,
    /// PID recorded for the service, if any.
    pub pid: Option<u32>,
    /// Process signal.
    pub process: ProcessVerdict,
    /// Port signal.
    pub port_status: PortVerdict,
    /// Disagreement between the two signals, if any.
    pub mismatch: Option<Mismatch>,
    /// Human-readable time since launch for running services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    /// Full command line of the running process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Endpoint probe result, when requested and the port is listening.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointVerdict>,
    /// Log file of the service.
    pub log: PathBuf,
}

/// Ledger entry that belongs to no registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct UnattributedEntry {
    /// Recorded PID.
    pub pid: u32,
    /// Service name recorded with the PID, if any.
    pub recorded_as: Option<String>,
    /// Whether the PID is still alive.
    pub alive: bool,
}

/// Point-in-time status of the whole registry.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Whether a ledger exists.
    pub tracked: bool,
    /// Ledger location.
    pub ledger: PathBuf,
    /// One entry per registry entry, in registry order.
    pub services: Vec<ServiceStatus>,
    /// Ledger entries not attributed to any registry entry.
    pub unattributed: Vec<UnattributedEntry>,
}

/// Output switches for [`StatusReport::render`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Emit ANSI colours.
    pub color: bool,
    /// Include log tails for stale services.
    pub verbose: bool,
}

/// Builds status reports without modifying anything.
pub struct HealthClassifier<'a> {
    services: &'a [ServiceSpec],
    ledger: &'a Ledger,
    project_root: &'a Path,
    endpoint: Option<EndpointProbe>,
}

impl<'a> HealthClassifier<'a> {
    /// Creates a classifier over `services` and `ledger`.
    pub fn new(services: &'a [ServiceSpec], ledger: &'a Ledger, project_root: &'a Path) -> Self {
        Self {
            services,
            ledger,
            project_root,
            endpoint: None,
        }
    }

    /// Also probes each listening service's HTTP health path.
    pub fn with_endpoint_probe(mut self, probe: EndpointProbe) -> Self {
        self.endpoint = Some(probe);
        self
    }

    /// Classifies every registry entry.
    pub fn classify(&self) -> StatusReport {
        let tracked = self.ledger.exists();
        let entries = match self.ledger.read_all() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    "Unable to read PID ledger {}: {err}",
                    self.ledger.path().display()
                );
                Vec::new()
            }
        };

        let attribution = attribute(self.services, &entries);
        let services = attribution
            .assigned
            .iter()
            .map(|(spec, entry)| self.classify_service(spec, entry.as_ref()))
            .collect();

        let unattributed = attribution
            .unattributed
            .iter()
            .map(|entry| UnattributedEntry {
                pid: entry.pid(),
                recorded_as: entry.service().map(str::to_string),
                alive: process_state(entry.pid()).is_alive(),
            })
            .collect();

        StatusReport {
            tracked,
            ledger: self.ledger.path().to_path_buf(),
            services,
            unattributed,
        }
    }

    fn classify_service(&self, spec: &ServiceSpec, entry: Option<&LedgerEntry>) -> ServiceStatus {
        let pid = entry.map(LedgerEntry::pid);
        let process = match pid.map(process_state) {
            None => ProcessVerdict::Stopped,
            Some(ProcessState::Running) => ProcessVerdict::Running {
                name: pid.and_then(process_name),
            },
            Some(ProcessState::Zombie | ProcessState::Missing) => ProcessVerdict::Stale,
            Some(ProcessState::Unknown) => ProcessVerdict::Checking,
        };

        let port_status = if probe::is_listening(spec.port) {
            PortVerdict::Listening
        } else {
            PortVerdict::NotListening
        };

        let mismatch = match (&process, port_status) {
            (ProcessVerdict::Stale | ProcessVerdict::Stopped, PortVerdict::Listening) => {
                Some(Mismatch::UntrackedListener)
            }
            (ProcessVerdict::Running { .. }, PortVerdict::NotListening) => Some(Mismatch::NotBound),
            _ => None,
        };

        let uptime = match (&process, entry.and_then(LedgerEntry::started_at)) {
            (ProcessVerdict::Running { .. }, Some(started_at)) => Utc::now()
                .signed_duration_since(started_at)
                .to_std()
                .ok()
                .map(|elapsed| format_elapsed(elapsed.as_secs())),
            _ => None,
        };

        let command = match &process {
            ProcessVerdict::Running { .. } => pid.and_then(process_command),
            _ => None,
        };

        let endpoint = match (&self.endpoint, port_status) {
            (Some(probe), PortVerdict::Listening) => Some(probe.check(spec)),
            _ => None,
        };

        debug!(
            "Classified '{}': process={process}, port={port_status}",
            spec.name
        );

        ServiceStatus {
            name: spec.name.clone(),
            port: spec.port,
            pid,
            process,
            port_status,
            mismatch,
            uptime,
            command,
            endpoint,
            log: spec.log_path(self.project_root),
        }
    }
}

/// Formats a duration as "N secs/mins/hours/days/weeks ago".
pub fn format_elapsed(total_seconds: u64) -> String {
    match total_seconds {
        0..=59 => format!("{} secs ago", total_seconds),
        60..=3_599 => format!("{} mins ago", total_seconds / 60),
        3_600..=86_399 => format!("{} hours ago", total_seconds / 3_600),
        86_400..=604_799 => format!("{} days ago", total_seconds / 86_400),
        _ => format!("{} weeks ago", total_seconds / 604_800),
    }
}

struct Painter {
    enabled: bool,
}

impl Painter {
    fn paint(&self, color: &str, text: &str) -> String {
        if self.enabled {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}

impl ServiceStatus {
    fn marker_color(&self) -> &'static str {
        let endpoint_ok = !matches!(
            self.endpoint,
            Some(EndpointVerdict::Unhealthy { .. } | EndpointVerdict::Unreachable { .. })
        );

        match (&self.process, self.mismatch) {
            (_, Some(_)) | (ProcessVerdict::Checking, _) => YELLOW_BOLD,
            (ProcessVerdict::Running { .. }, None) if endpoint_ok => GREEN_BOLD,
            (ProcessVerdict::Running { .. }, None) => YELLOW_BOLD,
            _ => RED_BOLD,
        }
    }

    fn process_line(&self) -> String {
        let mut line = match (&self.process, self.pid) {
            (ProcessVerdict::Running { name: Some(name) }, Some(pid)) => {
                format!("running, PID {pid} ({name})")
            }
            (ProcessVerdict::Running { name: None }, Some(pid)) => format!("running, PID {pid}"),
            (ProcessVerdict::Stale, Some(pid)) => format!("stale, PID {pid} is not alive"),
            (ProcessVerdict::Checking, Some(pid)) => {
                format!("checking, liveness of PID {pid} unknown")
            }
            (verdict, _) => verdict.to_string(),
        };

        if let Some(uptime) = &self.uptime {
            let _ = write!(line, ", started {uptime}");
        }
        line
    }
}

impl StatusReport {
    /// Whether every service is running with its port listening.
    pub fn all_running(&self) -> bool {
        self.services.iter().all(|service| {
            matches!(service.process, ProcessVerdict::Running { .. })
                && service.port_status == PortVerdict::Listening
        })
    }

    /// Looks up a service's status by name.
    pub fn service(&self, name: &str) -> Option<&ServiceStatus> {
        self.services.iter().find(|service| service.name == name)
    }

    /// Pretty-printed JSON form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable form.
    pub fn render(&self, options: RenderOptions) -> String {
        let painter = Painter {
            enabled: options.color,
        };
        let mut out = String::new();

        if self.tracked {
            let _ = writeln!(out, "Tracked processes (ledger {}):", self.ledger.display());
        } else {
            let _ = writeln!(
                out,
                "No processes tracked (no ledger at {}).",
                self.ledger.display()
            );
        }

        for service in &self.services {
            let _ = writeln!(
                out,
                "{} {} (port {})",
                painter.paint(service.marker_color(), "●"),
                service.name,
                service.port
            );
            let _ = writeln!(out, "    Process:  {}", service.process_line());
            let _ = writeln!(out, "    Port:     {}", service.port_status);

            if options.verbose
                && let Some(command) = &service.command
            {
                let _ = writeln!(out, "    Command:  {command}");
            }

            if let Some(endpoint) = &service.endpoint {
                let _ = writeln!(out, "    Endpoint: {endpoint}");
            }

            if let Some(mismatch) = service.mismatch {
                let _ = writeln!(
                    out,
                    "    {}",
                    painter.paint(
                        YELLOW_BOLD,
                        &format!("Warning: {}", mismatch.describe(service.port))
                    )
                );
            }

            if options.verbose && service.process == ProcessVerdict::Stale {
                match tail_lines(&service.log, MAX_STATUS_LOG_LINES) {
                    Ok(lines) if !lines.is_empty() => {
                        let _ = writeln!(out, "    Last output ({}):", service.log.display());
                        for line in lines {
                            let _ = writeln!(out, "      {}", painter.paint(DIM, &line));
                        }
                    }
                    Ok(_) => {
                        let _ = writeln!(out, "    No output in {}", service.log.display());
                    }
                    Err(err) => {
                        let _ = writeln!(
                            out,
                            "    Unable to read {}: {err}",
                            service.log.display()
                        );
                    }
                }
            }
        }

        if !self.unattributed.is_empty() {
            let _ = writeln!(out, "Unattributed ledger entries:");
            for entry in &self.unattributed {
                let (color, state) = if entry.alive {
                    (YELLOW_BOLD, "alive")
                } else {
                    (RED_BOLD, "not alive")
                };
                let recorded = entry
                    .recorded_as
                    .as_deref()
                    .map(|name| format!(" (recorded for '{name}')"))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "{} PID {}{recorded}: {state}",
                    painter.paint(color, "●"),
                    entry.pid
                );
            }
        }

        out
    }
}
