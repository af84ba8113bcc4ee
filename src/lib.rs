//! Lifecycle is a small supervisor for a fixed set of long-running services. It launches each
//! service as a detached process, records what it launched in a PID ledger, reports process and
//! port health side by side, and shuts everything down gracefully before forcing it.

/// CLI interface.
pub mod cli;

/// Service registry and configuration loading.
pub mod config;

/// Constants and defaults.
pub mod constants;

/// Error handling.
pub mod error;

/// HTTP endpoint probe.
pub mod health;

/// Process launcher.
pub mod launcher;

/// PID ledger.
pub mod ledger;

/// Per-service log files.
pub mod logs;

/// Port prober.
pub mod probe;

/// Process inspection and signalling.
pub mod process;

/// Shutdown sequencer.
pub mod shutdown;

/// Health classification and status rendering.
pub mod status;

/// Start, stop, restart and status orchestration.
pub mod supervisor;

#[doc(hidden)]
pub mod test_utils;
