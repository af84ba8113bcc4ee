//! Constants and default values shared by both entry points.
//!
//! Timing values here are defaults only; `settle_delay` and `grace_period` can be
//! overridden from the configuration file.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Name of the PID ledger stored in the state directory.
/// Contains one launch record per line, in launch order.
pub const LEDGER_FILE_NAME: &str = ".lifecycle.pids";

/// Configuration file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "lifecycle.yaml";

/// Directory (relative to the project dir) that holds per-service logs by default.
pub const DEFAULT_LOG_DIR: &str = "logs";

// ============================================================================
// Shell Execution Constants
// ============================================================================

/// Default shell used for string-form service commands.
pub const DEFAULT_SHELL: &str = "sh";

/// Shell argument flag for executing command strings.
pub const SHELL_COMMAND_FLAG: &str = "-c";

// ============================================================================
// Service Defaults
// ============================================================================

/// Prefix used for per-service `<PREFIX>_<NAME>_PORT` / `_HOST` overrides.
pub const DEFAULT_ENV_PREFIX: &str = "VECTRAS";

/// Host a service binds when none is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// HTTP path probed by the endpoint check.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

// ============================================================================
// Process Management Timing
// ============================================================================

/// Pause after each launch before the next service is started.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Time a process is given to exit after SIGTERM before SIGKILL is sent.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Time a process is given to disappear after SIGKILL before it is reported unkillable.
pub const FORCED_EXIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between liveness polls while waiting for processes to exit.
pub const PROCESS_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Pause after force-freeing a port before it is probed again.
pub const PORT_RELEASE_DELAY: Duration = Duration::from_millis(200);

/// Request timeout for the HTTP endpoint probe.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Output Constants
// ============================================================================

/// Number of log lines shown under a stale service in verbose status output.
pub const MAX_STATUS_LOG_LINES: usize = 10;
