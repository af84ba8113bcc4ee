//! Command-line surfaces for `lifecycle-start` and `lifecycle-stop`.
use std::{
    io::{IsTerminal, stdout},
    str::FromStr,
};

use clap::{Args, Parser};
use strum_macros::{Display, EnumString};
use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use crate::shutdown::StopReport;
use crate::status::{RenderOptions, StatusReport};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Options shared by both entry points.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to a YAML service registry (defaults to `lifecycle.yaml`, then the built-in registry).
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<String>,

    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Emit machine-readable JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// Also probe each listening service's HTTP health endpoint (status only).
    #[arg(long)]
    pub health: bool,

    /// Disable ANSI colors in output.
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Show command lines of running services and log tails of stale ones.
    #[arg(short, long)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// Rendering switches for human-readable status output.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            color: !self.no_color
                && std::env::var_os("NO_COLOR").is_none()
                && stdout().is_terminal(),
            verbose: self.verbose,
        }
    }
}

/// Verbs accepted by `lifecycle-start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StartVerb {
    /// Launch every service, tearing down whatever is tracked or listening first.
    Start,
    /// Stop everything, then start everything.
    Restart,
    /// Print per-service status.
    Status,
    /// Print usage.
    Help,
}

/// Verbs accepted by `lifecycle-stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StopVerb {
    /// Run the shutdown sequence.
    Stop,
    /// Print per-service status.
    Status,
    /// Print usage.
    Help,
}

/// Parses `raw`, falling back to `default` (with a warning) for anything unrecognised.
fn lenient<V: FromStr + Copy + std::fmt::Display>(raw: Option<&str>, default: V) -> V {
    match raw {
        None => default,
        Some(token) => token.trim().parse().unwrap_or_else(|_| {
            warn!("Unrecognised command '{token}'; running '{default}'");
            default
        }),
    }
}

/// Launches, restarts and inspects the service set.
#[derive(Parser, Debug)]
#[command(name = "lifecycle-start", version)]
#[command(about = "Start, restart or inspect the managed services", long_about = None)]
pub struct StartCli {
    /// start (default), restart, status or help.
    #[arg(value_name = "COMMAND")]
    pub command: Option<String>,

    #[command(flatten)]
    pub global: GlobalArgs,
}

impl StartCli {
    /// The requested verb; unknown tokens run `start`.
    pub fn verb(&self) -> StartVerb {
        lenient(self.command.as_deref(), StartVerb::Start)
    }
}

/// Stops and inspects the service set.
#[derive(Parser, Debug)]
#[command(name = "lifecycle-stop", version)]
#[command(about = "Stop or inspect the managed services", long_about = None)]
pub struct StopCli {
    /// stop (default), status or help.
    #[arg(value_name = "COMMAND")]
    pub command: Option<String>,

    #[command(flatten)]
    pub global: GlobalArgs,
}

impl StopCli {
    /// The requested verb; unknown tokens run `stop`.
    pub fn verb(&self) -> StopVerb {
        lenient(self.command.as_deref(), StopVerb::Stop)
    }
}

/// Initialises the tracing subscriber on stderr, so stdout carries only command output.
pub fn init_logging(log_level: Option<LogLevelArg>) {
    let filter = if let Some(level) = log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Text printed for `status`.
pub fn format_status(report: &StatusReport, args: &GlobalArgs) -> serde_json::Result<String> {
    if args.json {
        report.to_json()
    } else {
        Ok(report.render(args.render_options()))
    }
}

/// Text printed after `stop`.
pub fn format_stop(report: &StopReport, args: &GlobalArgs) -> serde_json::Result<String> {
    if args.json {
        return serde_json::to_string_pretty(report);
    }

    if report.is_noop() {
        return Ok("Nothing to stop.".to_string());
    }

    let mut lines = Vec::new();
    for target in &report.targets {
        let name = target.service.as_deref().unwrap_or("unattributed");
        lines.push(format!("● {name} (PID {}): {}", target.pid, target.outcome));
    }
    for sweep in &report.sweeps {
        let state = if sweep.freed { "freed" } else { "still in use" };
        lines.push(format!(
            "● port {} ({}): {state}",
            sweep.port, sweep.service
        ));
    }
    Ok(lines.join("\n"))
}
