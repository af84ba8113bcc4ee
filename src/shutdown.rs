//! Shutdown sequencing: graceful termination, escalation, ledger cleanup and the port sweep.
//!
//! Every tracked process runs its own small state machine with its own deadline, so a process
//! that exits quickly is resolved at the next poll instead of waiting out a slower sibling.
use nix::sys::signal::Signal;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    thread,
    time::{Duration, Instant},
};
use strum_macros::Display;
use tracing::{debug, info, warn};

use crate::config::ServiceSpec;
use crate::constants::{
    DEFAULT_GRACE_PERIOD, FORCED_EXIT_TIMEOUT, PORT_RELEASE_DELAY, PROCESS_CHECK_INTERVAL,
};
use crate::ledger::{Ledger, attribute};
use crate::probe;
use crate::process::{is_alive, signal_tree};

/// Final state of one tracked process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StopOutcome {
    /// The PID was already dead before any signal was sent.
    AlreadyGone,
    /// The process exited within its grace period.
    Exited,
    /// The process exited after the forced signal.
    Killed,
    /// The process survived the forced signal, or could not be signalled at all.
    Unkillable,
}

/// Outcome for one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    /// Service the PID was attributed to, if any.
    pub service: Option<String>,
    /// Process identifier.
    pub pid: u32,
    /// How the process ended.
    pub outcome: StopOutcome,
}

/// Outcome of force-freeing one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSweep {
    /// Service that declares the port.
    pub service: String,
    /// The port that was found listening.
    pub port: u16,
    /// Listener PIDs that were sent SIGKILL.
    pub killed: Vec<u32>,
    /// Whether the port was free when re-probed.
    pub freed: bool,
}

/// Everything `stop` did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StopReport {
    /// Per-process outcomes, in ledger order.
    pub targets: Vec<TargetReport>,
    /// Whether the ledger was removed.
    pub ledger_cleared: bool,
    /// Ports that were still listening after the tracked processes were handled.
    pub sweeps: Vec<PortSweep>,
}

impl StopReport {
    /// Tracked processes that could not be terminated.
    pub fn unkillable(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets
            .iter()
            .filter(|target| target.outcome == StopOutcome::Unkillable)
    }

    /// Ports that stayed busy after the sweep.
    pub fn busy_ports(&self) -> impl Iterator<Item = &PortSweep> {
        self.sweeps.iter().filter(|sweep| !sweep.freed)
    }

    /// Whether nothing was tracked and nothing needed sweeping.
    pub fn is_noop(&self) -> bool {
        self.targets.is_empty() && self.sweeps.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Pending,
    Graceful { deadline: Instant },
    Forced { deadline: Instant },
    Done(StopOutcome),
}

#[derive(Debug)]
struct Target {
    service: Option<String>,
    pid: u32,
    phase: Phase,
}

impl Target {
    fn label(&self) -> String {
        match &self.service {
            Some(name) => format!("'{name}' (PID {})", self.pid),
            None => format!("PID {}", self.pid),
        }
    }
}

/// Drives shutdown of tracked processes.
#[derive(Debug, Clone)]
pub struct ShutdownSequencer {
    grace_period: Duration,
    forced_timeout: Duration,
    poll_interval: Duration,
}

impl Default for ShutdownSequencer {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl ShutdownSequencer {
    /// Creates a sequencer that escalates to SIGKILL after `grace_period`.
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            forced_timeout: FORCED_EXIT_TIMEOUT,
            poll_interval: PROCESS_CHECK_INTERVAL,
        }
    }

    /// Stops everything in `ledger`, clears it, then frees any registry port still listening.
    ///
    /// Safe to call repeatedly; with no ledger and no listening ports it does nothing.
    pub fn stop_all(&self, services: &[ServiceSpec], ledger: &Ledger) -> StopReport {
        let entries = match ledger.read_all() {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Unable to read PID ledger {}: {err}", ledger.path().display());
                Vec::new()
            }
        };

        let mut names: HashMap<u32, String> = HashMap::new();
        for (spec, entry) in attribute(services, &entries).assigned {
            if let Some(entry) = entry {
                names.insert(entry.pid(), spec.name.clone());
            }
        }

        let mut seen = HashSet::new();
        let targets: Vec<(Option<String>, u32)> = entries
            .iter()
            .map(|entry| entry.pid())
            .filter(|pid| seen.insert(*pid))
            .map(|pid| (names.get(&pid).cloned(), pid))
            .collect();

        if !targets.is_empty() {
            info!("Stopping {} tracked process(es)", targets.len());
        }
        let targets = self.terminate(targets);

        let ledger_cleared = match ledger.clear() {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to remove PID ledger {}: {err}", ledger.path().display());
                false
            }
        };

        let sweeps = services
            .iter()
            .filter_map(sweep_port)
            .collect();

        StopReport {
            targets,
            ledger_cleared,
            sweeps,
        }
    }

    /// Runs the per-process state machines until every target is resolved.
    pub fn terminate(&self, targets: Vec<(Option<String>, u32)>) -> Vec<TargetReport> {
        let mut targets: Vec<Target> = targets
            .into_iter()
            .map(|(service, pid)| {
                let mut target = Target {
                    service,
                    pid,
                    phase: Phase::Pending,
                };
                target.phase = self.begin(&target);
                target
            })
            .collect();

        while targets
            .iter()
            .any(|target| !matches!(target.phase, Phase::Done(_)))
        {
            thread::sleep(self.poll_interval);
            let now = Instant::now();
            for target in &mut targets {
                target.phase = self.advance(target, now);
            }
        }

        targets
            .into_iter()
            .map(|target| {
                let outcome = match target.phase {
                    Phase::Done(outcome) => outcome,
                    Phase::Pending | Phase::Graceful { .. } | Phase::Forced { .. } => {
                        StopOutcome::Unkillable
                    }
                };
                TargetReport {
                    service: target.service,
                    pid: target.pid,
                    outcome,
                }
            })
            .collect()
    }

    fn begin(&self, target: &Target) -> Phase {
        if !is_alive(target.pid) {
            debug!("{} is already gone", target.label());
            return Phase::Done(StopOutcome::AlreadyGone);
        }

        match signal_tree(target.pid, Signal::SIGTERM) {
            Ok(true) => {
                debug!("Sent SIGTERM to {}", target.label());
                Phase::Graceful {
                    deadline: Instant::now() + self.grace_period,
                }
            }
            Ok(false) => Phase::Done(StopOutcome::AlreadyGone),
            Err(err) => {
                warn!("Failed to send SIGTERM to {}: {err}", target.label());
                self.force(target)
            }
        }
    }

    fn force(&self, target: &Target) -> Phase {
        match signal_tree(target.pid, Signal::SIGKILL) {
            Ok(true) => {
                debug!("Sent SIGKILL to {}", target.label());
                Phase::Forced {
                    deadline: Instant::now() + self.forced_timeout,
                }
            }
            Ok(false) => Phase::Done(StopOutcome::Killed),
            Err(err) => {
                warn!("Failed to send SIGKILL to {}: {err}", target.label());
                Phase::Done(StopOutcome::Unkillable)
            }
        }
    }

    fn advance(&self, target: &Target, now: Instant) -> Phase {
        match target.phase {
            Phase::Graceful { deadline } => {
                if !is_alive(target.pid) {
                    info!("Stopped {}", target.label());
                    Phase::Done(StopOutcome::Exited)
                } else if now >= deadline {
                    warn!(
                        "{} did not exit within {:?}; escalating to SIGKILL",
                        target.label(),
                        self.grace_period
                    );
                    self.force(target)
                } else {
                    target.phase
                }
            }
            Phase::Forced { deadline } => {
                if !is_alive(target.pid) {
                    info!("Killed {}", target.label());
                    Phase::Done(StopOutcome::Killed)
                } else if now >= deadline {
                    warn!("{} survived SIGKILL", target.label());
                    Phase::Done(StopOutcome::Unkillable)
                } else {
                    target.phase
                }
            }
            Phase::Pending => self.begin(target),
            Phase::Done(_) => target.phase,
        }
    }
}

/// Force-frees `spec.port` if something is listening on it. Returns `None` if the port was free.
///
/// The calling process itself is never signalled, even if it holds the port.
pub fn sweep_port(spec: &ServiceSpec) -> Option<PortSweep> {
    if !probe::is_listening(spec.port) {
        return None;
    }

    let own_pid = std::process::id();
    let holders: Vec<u32> = probe::listeners(spec.port)
        .into_iter()
        .filter(|pid| *pid != own_pid)
        .collect();

    if holders.is_empty() {
        warn!(
            "Port {} ('{}') is listening but no signalable owner was found",
            spec.port, spec.name
        );
    }

    let mut killed = Vec::new();
    for pid in holders {
        match signal_tree(pid, Signal::SIGKILL) {
            Ok(true) => {
                info!(
                    "Force-freeing port {} ('{}'): killed PID {pid}",
                    spec.port, spec.name
                );
                killed.push(pid);
            }
            Ok(false) => {}
            Err(err) => warn!(
                "Failed to kill PID {pid} holding port {} ('{}'): {err}",
                spec.port, spec.name
            ),
        }
    }

    let freed = !killed.is_empty() && wait_for_release(spec.port);
    if !freed {
        warn!("Port {} ('{}') is still listening", spec.port, spec.name);
    }

    Some(PortSweep {
        service: spec.name.clone(),
        port: spec.port,
        killed,
        freed,
    })
}

fn wait_for_release(port: u16) -> bool {
    let deadline = Instant::now() + PORT_RELEASE_DELAY + FORCED_EXIT_TIMEOUT;
    loop {
        if !probe::is_listening(port) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(PROCESS_CHECK_INTERVAL);
    }
}
