//! Optional HTTP endpoint probe used by `status --health`.
use reqwest::blocking::Client;
use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::config::ServiceSpec;
use crate::constants::HEALTH_CHECK_TIMEOUT;

/// Outcome of a single `GET` against a service's health path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum EndpointVerdict {
    /// The endpoint answered with a success status.
    Healthy {
        /// HTTP status code.
        code: u16,
    },
    /// The endpoint answered with a non-success status.
    Unhealthy {
        /// HTTP status code.
        code: u16,
    },
    /// No HTTP answer within the timeout.
    Unreachable {
        /// Transport error text.
        reason: String,
    },
}

impl fmt::Display for EndpointVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointVerdict::Healthy { .. } => write!(f, "healthy"),
            EndpointVerdict::Unhealthy { code } => write!(f, "unhealthy (HTTP {code})"),
            EndpointVerdict::Unreachable { .. } => write!(f, "unreachable"),
        }
    }
}

/// Issues endpoint probes with a shared client.
pub struct EndpointProbe {
    client: Option<Client>,
}

impl EndpointProbe {
    /// Creates a probe using the default request timeout.
    pub fn new() -> Self {
        let client = match Client::builder()
            .timeout(HEALTH_CHECK_TIMEOUT)
            .no_proxy()
            .build()
        {
            Ok(client) => Some(client),
            Err(err) => {
                debug!("Unable to build HTTP client for endpoint probes: {err}");
                None
            }
        };
        Self { client }
    }

    /// URL probed for `spec`.
    pub fn url_for(spec: &ServiceSpec) -> String {
        let path = spec.health_path();
        let separator = if path.starts_with('/') { "" } else { "/" };
        let host = spec.probe_host();
        // IPv6 literals need brackets to be told apart from the port.
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        format!("http://{host}:{}{separator}{path}", spec.port)
    }

    /// Probes `spec` once.
    pub fn check(&self, spec: &ServiceSpec) -> EndpointVerdict {
        let Some(client) = &self.client else {
            return EndpointVerdict::Unreachable {
                reason: "HTTP client unavailable".to_string(),
            };
        };

        let url = Self::url_for(spec);
        match client.get(&url).send() {
            Ok(response) => {
                let code = response.status().as_u16();
                debug!("Endpoint {url} answered HTTP {code}");
                if response.status().is_success() {
                    EndpointVerdict::Healthy { code }
                } else {
                    EndpointVerdict::Unhealthy { code }
                }
            }
            Err(err) => {
                debug!("Endpoint {url} unreachable: {err}");
                EndpointVerdict::Unreachable {
                    reason: err.to_string(),
                }
            }
        }
    }
}

impl Default for EndpointProbe {
    fn default() -> Self {
        Self::new()
    }
}
