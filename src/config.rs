//! Configuration management for lifecycle.
//!
//! The registry is an ordered list of [`ServiceSpec`]s. It comes from a YAML file when one is
//! given (or `lifecycle.yaml` exists in the working directory) and from the built-in service
//! table otherwise. Per-service `<PREFIX>_<NAME>_PORT` / `<PREFIX>_<NAME>_HOST` environment
//! variables are applied on top, then the whole registry is validated before anything runs.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

use crate::constants::{
    DEFAULT_CONFIG_FILE, DEFAULT_ENV_PREFIX, DEFAULT_GRACE_PERIOD, DEFAULT_HEALTH_PATH,
    DEFAULT_HOST, DEFAULT_LOG_DIR, DEFAULT_SETTLE_DELAY, LEDGER_FILE_NAME,
};
use crate::error::LifecycleError;

/// Services launched when no configuration file is present: name, ASGI app, default port.
/// The frontend goes last so every backend it talks to is already up.
const BUILTIN_SERVICES: &[(&str, &str, u16)] = &[
    ("api", "src.vectras.apis.api:app", 8121),
    ("mcp", "src.vectras.mcp.server:app", 8122),
    ("supervisor", "src.vectras.agents.supervisor:app", 8123),
    ("logging-monitor", "src.vectras.agents.logging_monitor:app", 8124),
    ("coding", "src.vectras.agents.coding:app", 8125),
    ("testing", "src.vectras.agents.testing:app", 8126),
    ("linting", "src.vectras.agents.linting:app", 8127),
    ("github", "src.vectras.agents.github:app", 8128),
    ("ui", "src.vectras.frontend.app:app", 8120),
];

/// Represents the structure of the configuration file.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Prefix for environment overrides (defaults to `VECTRAS`).
    #[serde(default)]
    pub env_prefix: Option<String>,
    /// Directory holding the PID ledger, relative to the project directory.
    #[serde(default)]
    pub state_dir: Option<String>,
    /// Pause after each launch (e.g. "500ms", "2s").
    #[serde(default)]
    pub settle_delay: Option<String>,
    /// Time granted after SIGTERM before SIGKILL (e.g. "1s").
    #[serde(default)]
    pub grace_period: Option<String>,
    /// Declared services, in launch order.
    pub services: Vec<ServiceSpec>,
    /// Root directory from which relative paths are resolved.
    #[serde(skip)]
    pub project_dir: Option<PathBuf>,
}

/// Configuration for an individual service.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Unique short identifier.
    pub name: String,
    /// Command used to start the service.
    pub command: CommandSpec,
    /// TCP port the service is expected to bind.
    pub port: u16,
    /// Host the service binds.
    #[serde(default = "default_host")]
    pub host: String,
    /// Combined stdout/stderr log, relative to the project directory.
    #[serde(default)]
    pub log: Option<String>,
    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Path probed by `status --health`.
    #[serde(default)]
    pub health_path: Option<String>,
}

/// A service command, either an argv list run directly or a string run through `sh -c`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandSpec {
    /// Program followed by its arguments.
    Argv(Vec<String>),
    /// Shell snippet; may reference `$PORT` and `$HOST`.
    Shell(String),
}

impl CommandSpec {
    /// Whether the command has nothing to execute.
    pub fn is_empty(&self) -> bool {
        match self {
            CommandSpec::Argv(argv) => argv.first().is_none_or(|p| p.trim().is_empty()),
            CommandSpec::Shell(script) => script.trim().is_empty(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSpec::Argv(argv) => write!(f, "{}", argv.join(" ")),
            CommandSpec::Shell(script) => write!(f, "{script}"),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

impl ServiceSpec {
    /// Resolves the log file path against the project root.
    pub fn log_path(&self, project_root: &Path) -> PathBuf {
        let relative = match &self.log {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_LOG_DIR).join(format!("{}.log", self.name)),
        };

        if relative.is_absolute() {
            relative
        } else {
            project_root.join(relative)
        }
    }

    /// HTTP path used by the endpoint probe.
    pub fn health_path(&self) -> &str {
        self.health_path.as_deref().unwrap_or(DEFAULT_HEALTH_PATH)
    }

    /// Host to connect to when probing; wildcard binds are reached over loopback.
    pub fn probe_host(&self) -> &str {
        match self.host.trim() {
            "" | "0.0.0.0" | "::" | "[::]" => DEFAULT_HOST,
            host => host,
        }
    }

    /// Environment variable name for this service, e.g. `VECTRAS_LOGGING_MONITOR_PORT`.
    pub fn env_key(&self, prefix: &str, suffix: &str) -> String {
        let name = self.name.to_ascii_uppercase().replace(['-', '.'], "_");
        format!("{prefix}_{name}_{suffix}")
    }
}

impl Config {
    /// Builds the built-in registry rooted at `project_dir`.
    pub fn builtin(project_dir: PathBuf) -> Self {
        let services = BUILTIN_SERVICES
            .iter()
            .map(|(name, app, port)| ServiceSpec {
                name: name.to_string(),
                command: CommandSpec::Shell(format!(
                    "\"${{VECTRAS_PYTHON:-python3}}\" -m uvicorn {app} --host \"$HOST\" --port \"$PORT\""
                )),
                port: *port,
                host: default_host(),
                log: None,
                env: BTreeMap::new(),
                health_path: None,
            })
            .collect();

        Self {
            env_prefix: None,
            state_dir: None,
            settle_delay: None,
            grace_period: None,
            services,
            project_dir: Some(project_dir),
        }
    }

    /// Root directory for relative paths.
    pub fn project_root(&self) -> PathBuf {
        self.project_dir
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Directory holding the ledger.
    pub fn state_dir(&self) -> PathBuf {
        let root = self.project_root();
        match self.state_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => {
                let dir = PathBuf::from(dir);
                if dir.is_absolute() { dir } else { root.join(dir) }
            }
            _ => root,
        }
    }

    /// Location of the PID ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir().join(LEDGER_FILE_NAME)
    }

    /// Prefix for per-service environment overrides.
    pub fn env_prefix(&self) -> &str {
        self.env_prefix
            .as_deref()
            .map(str::trim)
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or(DEFAULT_ENV_PREFIX)
    }

    /// Delay after each launch.
    pub fn settle_delay(&self) -> Result<Duration, LifecycleError> {
        match self.settle_delay.as_deref() {
            Some(raw) => parse_duration(raw),
            None => Ok(DEFAULT_SETTLE_DELAY),
        }
    }

    /// Grace period between SIGTERM and SIGKILL.
    pub fn grace_period(&self) -> Result<Duration, LifecycleError> {
        match self.grace_period.as_deref() {
            Some(raw) => parse_duration(raw),
            None => Ok(DEFAULT_GRACE_PERIOD),
        }
    }

    /// Looks up a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|service| service.name == name)
    }

    /// Applies `<PREFIX>_<NAME>_PORT` and `<PREFIX>_<NAME>_HOST` overrides from the process
    /// environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), LifecycleError> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Applies overrides using an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), LifecycleError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = self.env_prefix().to_string();

        for service in &mut self.services {
            let port_key = service.env_key(&prefix, "PORT");
            if let Some(raw) = lookup(&port_key) {
                let port = raw.trim().parse::<u16>().ok().filter(|port| *port != 0);
                match port {
                    Some(port) => {
                        debug!("Overriding port of '{}' with {port} from {port_key}", service.name);
                        service.port = port;
                    }
                    None => {
                        return Err(LifecycleError::InvalidConfig(format!(
                            "{port_key}='{raw}' is not a valid port"
                        )));
                    }
                }
            }

            let host_key = service.env_key(&prefix, "HOST");
            if let Some(host) = lookup(&host_key).filter(|host| !host.trim().is_empty()) {
                debug!("Overriding host of '{}' with {host} from {host_key}", service.name);
                service.host = host.trim().to_string();
            }
        }

        Ok(())
    }

    /// Rejects registries that cannot be run safely. Must pass before anything is spawned.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.services.is_empty() {
            return Err(LifecycleError::InvalidConfig("no services declared".into()));
        }

        let mut names: HashSet<&str> = HashSet::new();
        let mut ports: HashMap<u16, &str> = HashMap::new();

        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(LifecycleError::InvalidConfig(
                    "service with an empty name".into(),
                ));
            }

            if !names.insert(service.name.as_str()) {
                return Err(LifecycleError::DuplicateServiceName {
                    name: service.name.clone(),
                });
            }

            if let Some(first) = ports.insert(service.port, service.name.as_str()) {
                return Err(LifecycleError::DuplicatePort {
                    port: service.port,
                    first: first.to_string(),
                    second: service.name.clone(),
                });
            }

            if service.port == 0 {
                return Err(LifecycleError::InvalidConfig(format!(
                    "service '{}' declares port 0",
                    service.name
                )));
            }

            if service.command.is_empty() {
                return Err(LifecycleError::InvalidConfig(format!(
                    "service '{}' has an empty command",
                    service.name
                )));
            }
        }

        self.settle_delay()?;
        self.grace_period()?;
        Ok(())
    }
}

/// Expands `${VAR}` and `${VAR:-default}` references from the process environment.
///
/// Whole-line YAML comments are copied untouched. References in trailing comments are still
/// expanded.
fn expand_env_vars(input: &str) -> Result<String, LifecycleError> {
    expand_with(input, |name| env::var(name).ok())
}

fn expand_with<F>(input: &str, lookup: F) -> Result<String, LifecycleError>
where
    F: Fn(&str) -> Option<String>,
{
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .map_err(|err| LifecycleError::InvalidConfig(err.to_string()))?;

    let mut expanded = String::with_capacity(input.len());

    for line in input.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            expanded.push_str(line);
            continue;
        }

        let mut last = 0;
        for caps in re.captures_iter(line) {
            let Some(whole) = caps.get(0) else { continue };
            let name = &caps[1];
            let value = match (lookup(name), caps.get(2)) {
                (Some(value), _) => value,
                (None, Some(default)) => default.as_str().to_string(),
                (None, None) => {
                    return Err(LifecycleError::InvalidConfig(format!(
                        "missing environment variable: {name}"
                    )));
                }
            };

            expanded.push_str(&line[last..whole.start()]);
            expanded.push_str(&value);
            last = whole.end();
        }
        expanded.push_str(&line[last..]);
    }

    Ok(expanded)
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
pub fn parse_duration(raw: &str) -> Result<Duration, LifecycleError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(LifecycleError::InvalidConfig(
            "Duration value cannot be empty".into(),
        ));
    }

    let invalid = || LifecycleError::InvalidConfig(format!("Invalid duration value: '{raw}'"));

    if let Some(stripped) = value.strip_suffix("ms") {
        let amount: u64 = stripped.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_millis(amount));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str.parse().map_err(|_| invalid())?;
    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Loads the registry, applies environment overrides and validates it.
///
/// With no explicit path, `lifecycle.yaml` in the working directory is used when present and
/// the built-in registry otherwise.
pub fn load_config(config_path: Option<&str>) -> Result<Config, LifecycleError> {
    let path = match config_path {
        Some(path) => Some(PathBuf::from(path)),
        None => {
            let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
            candidate.exists().then_some(candidate)
        }
    };

    let mut config = match path {
        Some(path) => parse_config_file(&path)?,
        None => {
            debug!("No configuration file found; using built-in service registry");
            Config::builtin(env::current_dir()?)
        }
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn parse_config_file(config_path: &Path) -> Result<Config, LifecycleError> {
    let content = fs::read_to_string(config_path).map_err(|e| {
        LifecycleError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content)?;
    let mut config: Config = serde_yaml::from_str(&expanded)?;

    let base_path = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    config.project_dir = Some(base_path);

    debug!(
        "Loaded {} service(s) from {}",
        config.services.len(),
        config_path.display()
    );
    Ok(config)
}
