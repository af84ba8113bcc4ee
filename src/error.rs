//! Error handling for lifecycle.
use thiserror::Error;

/// Defines all possible errors raised while managing the service set.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// Configuration is well-formed but semantically invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two services share a name.
    #[error("Service name '{name}' is declared more than once")]
    DuplicateServiceName {
        /// The repeated service name.
        name: String,
    },

    /// Two services share a port.
    #[error("Port {port} is declared by both '{first}' and '{second}'")]
    DuplicatePort {
        /// The contested port.
        port: u16,
        /// The service that declared the port first.
        first: String,
        /// The service that declared it again.
        second: String,
    },

    /// Error spawning a service process.
    #[error("Failed to start service '{service}': {source}")]
    ServiceStartError {
        /// The service name that failed to start.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error signalling a service process.
    #[error("Failed to stop service '{service}': {source}")]
    ServiceStopError {
        /// The service name that failed to stop.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error for the PID ledger.
    #[error("PID ledger error: {0}")]
    LedgerError(#[from] LedgerError),

    /// Raw errno surfaced by a system call.
    #[error("System call failed: {0}")]
    ErrNo(#[from] nix::errno::Errno),

    /// One or more services could not be launched during `start`.
    #[error("Service(s) failed to start: {services:?}")]
    ServicesFailed {
        /// Names of the services whose launch failed.
        services: Vec<String>,
    },
}

/// Error type for PID ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Error reading or writing the ledger file.
    #[error("Failed to access PID ledger: {0}")]
    Io(#[from] std::io::Error),

    /// Error encoding a ledger record.
    #[error("Failed to encode PID ledger record: {0}")]
    Encode(#[from] serde_json::Error),
}
