//! Orchestration of the four lifecycle operations: start, stop, restart and status.
use std::{thread, time::Duration};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::LifecycleError;
use crate::health::EndpointProbe;
use crate::launcher::Launcher;
use crate::ledger::{LaunchRecord, Ledger};
use crate::shutdown::{PortSweep, ShutdownSequencer, StopReport, sweep_port};
use crate::status::{HealthClassifier, StatusReport};

/// Options for [`Lifecycle::status`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusOptions {
    /// Probe each listening service's HTTP health path.
    pub health: bool,
}

/// What a start did.
#[derive(Debug, Default)]
pub struct StartReport {
    /// Teardown performed before launching.
    pub stop: StopReport,
    /// Ports that were occupied right before their service launched and had to be freed.
    pub conflicts: Vec<PortSweep>,
    /// Successful launches, in launch order.
    pub launched: Vec<LaunchRecord>,
    /// Services that could not be launched, with the error text.
    pub failed: Vec<(String, String)>,
}

impl StartReport {
    /// Converts launch failures into [`LifecycleError::ServicesFailed`].
    pub fn into_result(self) -> Result<Self, LifecycleError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(LifecycleError::ServicesFailed {
                services: self.failed.into_iter().map(|(name, _)| name).collect(),
            })
        }
    }
}

/// Drives a registry of services through their lifecycle.
pub struct Lifecycle {
    config: Config,
    ledger: Ledger,
    launcher: Launcher,
    sequencer: ShutdownSequencer,
    settle_delay: Duration,
}

impl Lifecycle {
    /// Builds a lifecycle for a loaded and validated configuration.
    pub fn new(config: Config) -> Result<Self, LifecycleError> {
        let settle_delay = config.settle_delay()?;
        let grace_period = config.grace_period()?;
        let ledger = Ledger::new(config.ledger_path());
        let launcher = Launcher::new(config.project_root(), config.env_prefix());

        Ok(Self {
            config,
            ledger,
            launcher,
            sequencer: ShutdownSequencer::new(grace_period),
            settle_delay,
        })
    }

    /// The PID ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Tears down anything tracked or listening, then launches every service in registry order.
    ///
    /// A service that fails to launch does not prevent the others from starting; failures are
    /// collected in the report.
    pub fn start_all(&self) -> StartReport {
        let stop = self.stop_all();
        let mut report = StartReport {
            stop,
            ..StartReport::default()
        };

        let total = self.config.services.len();
        for (index, spec) in self.config.services.iter().enumerate() {
            if let Some(sweep) = sweep_port(spec) {
                warn!(
                    "Port {} was occupied before launching '{}'; freed: {}",
                    spec.port, spec.name, sweep.freed
                );
                report.conflicts.push(sweep);
            }

            match self.launcher.launch(spec, &self.ledger) {
                Ok(record) => {
                    report.launched.push(record);
                    if index + 1 < total && !self.settle_delay.is_zero() {
                        thread::sleep(self.settle_delay);
                    }
                }
                Err(err) => {
                    error!("{err}");
                    report.failed.push((spec.name.clone(), err.to_string()));
                }
            }
        }

        if report.failed.is_empty() {
            info!("Started {} service(s)", report.launched.len());
        } else {
            warn!(
                "Started {} of {total} service(s); failed: {}",
                report.launched.len(),
                report
                    .failed
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        report
    }

    /// Runs the shutdown sequence over the ledger and the registry's ports.
    pub fn stop_all(&self) -> StopReport {
        let report = self.sequencer.stop_all(&self.config.services, &self.ledger);

        for target in report.unkillable() {
            warn!(
                "PID {} ({}) could not be terminated",
                target.pid,
                target.service.as_deref().unwrap_or("unattributed")
            );
        }
        for sweep in report.busy_ports() {
            warn!("Port {} ('{}') is still in use", sweep.port, sweep.service);
        }

        if report.is_noop() {
            info!("Nothing to stop");
        } else {
            info!(
                "Stopped {} tracked process(es); swept {} port(s)",
                report.targets.len(),
                report.sweeps.len()
            );
        }

        report
    }

    /// Full stop followed by a full start.
    pub fn restart(&self) -> StartReport {
        info!("Restarting all services");
        self.start_all()
    }

    /// Read-only snapshot of every service.
    pub fn status(&self, options: StatusOptions) -> StatusReport {
        let root = self.config.project_root();
        let classifier = HealthClassifier::new(&self.config.services, &self.ledger, &root);
        let classifier = if options.health {
            classifier.with_endpoint_probe(EndpointProbe::new())
        } else {
            classifier
        };
        classifier.classify()
    }
}
