//! Launches services as detached background processes.
use nix::sys::signal::Signal;
use std::{
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Command, Stdio},
};
use tracing::{debug, error, info};

use crate::config::{CommandSpec, ServiceSpec};
use crate::constants::{DEFAULT_SHELL, SHELL_COMMAND_FLAG};
use crate::error::LifecycleError;
use crate::ledger::{LaunchRecord, Ledger};
use crate::logs::prepare_log_file;
use crate::process::signal_tree;

/// Spawns services relative to a project directory.
#[derive(Debug, Clone)]
pub struct Launcher {
    /// Working directory of every launched service.
    project_root: PathBuf,
    /// Prefix for the `<PREFIX>_<NAME>_PORT` / `_HOST` variables exported to the child.
    env_prefix: String,
}

impl Launcher {
    /// Creates a launcher rooted at `project_root`.
    pub fn new(project_root: PathBuf, env_prefix: impl Into<String>) -> Self {
        Self {
            project_root,
            env_prefix: env_prefix.into(),
        }
    }

    /// Builds the command for `spec` without spawning it.
    fn command_for(&self, spec: &ServiceSpec) -> std::io::Result<Command> {
        let mut cmd = match &spec.command {
            CommandSpec::Argv(argv) => {
                let Some((program, args)) = argv.split_first() else {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "empty command",
                    ));
                };
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            CommandSpec::Shell(script) => {
                let mut cmd = Command::new(DEFAULT_SHELL);
                cmd.arg(SHELL_COMMAND_FLAG).arg(script);
                cmd
            }
        };

        cmd.current_dir(&self.project_root);

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let port = spec.port.to_string();
        cmd.env("PORT", &port);
        cmd.env("HOST", &spec.host);
        cmd.env(spec.env_key(&self.env_prefix, "PORT"), &port);
        cmd.env(spec.env_key(&self.env_prefix, "HOST"), &spec.host);

        Ok(cmd)
    }

    /// Spawns `spec` in its own session with output redirected to its log file, then records the
    /// PID in `ledger`. Returns as soon as the process is spawned.
    pub fn launch(
        &self,
        spec: &ServiceSpec,
        ledger: &Ledger,
    ) -> Result<LaunchRecord, LifecycleError> {
        let start_error = |source: std::io::Error| LifecycleError::ServiceStartError {
            service: spec.name.clone(),
            source,
        };

        let mut cmd = self.command_for(spec).map_err(start_error)?;
        let log_path = spec.log_path(&self.project_root);
        let stdout = prepare_log_file(&log_path).map_err(start_error)?;
        let stderr = stdout.try_clone().map_err(start_error)?;

        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        debug!("Launching '{}': `{}`", spec.name, spec.command);

        unsafe {
            cmd.pre_exec(|| {
                // New session: survives our exit and owns a process group we can signal later.
                if libc::setsid() < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|err| {
            error!("Failed to start service '{}': {err}", spec.name);
            start_error(err)
        })?;

        let pid = child.id();
        let record = LaunchRecord::new(&spec.name, pid, spec.port);

        if let Err(err) = ledger.append(&record) {
            error!(
                "Failed to record PID {pid} for '{}'; terminating it to avoid an untracked process",
                spec.name
            );
            let _ = signal_tree(pid, Signal::SIGKILL);
            return Err(err.into());
        }

        info!(
            "Started '{}' (PID {pid}, port {}, log {})",
            spec.name,
            spec.port,
            log_path.display()
        );
        Ok(record)
    }
}
