use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigError;

/// Connection settings for the ChirpStack application server.
///
/// The service talks to the REST gateway that ChirpStack exposes next to its
/// gRPC API. A fresh connection is opened for every registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Address in `host:port` format, e.g. `chirpstack:8080`.
    pub address: String,

    /// Use HTTPS instead of plain HTTP.
    #[serde(default)]
    pub tls: bool,

    /// Upper bound on establishing the TCP/TLS connection, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Deadline applied to every individual backend call, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Number of organizations fetched per page while searching by name.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Header carrying the bearer credential.
    /// The ChirpStack v3 REST gateway forwards `Grpc-Metadata-*` headers as gRPC metadata.
    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    /// How the bearer credential is obtained.
    pub auth: BackendAuthConfig,
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

fn default_auth_header() -> String {
    "Grpc-Metadata-Authorization".to_string()
}

/// Credential acquisition strategy.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum BackendAuthConfig {
    /// A pre-issued API key, attached to every call as-is.
    ApiKey { key: String },

    /// Log in with username and password when the connection is opened.
    /// The returned token lives only as long as that connection.
    Login { username: String, password: String },
}

impl std::fmt::Debug for BackendAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendAuthConfig::ApiKey { .. } => {
                f.debug_struct("ApiKey").field("key", &"****").finish()
            }
            BackendAuthConfig::Login { username, .. } => f
                .debug_struct("Login")
                .field("username", username)
                .field("password", &"****")
                .finish(),
        }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;

        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "backend.connect_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "backend.request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Validation(
                "backend.page_size must be greater than 0".into(),
            ));
        }
        if http::HeaderName::from_bytes(self.auth_header.as_bytes()).is_err() {
            return Err(ConfigError::Validation(format!(
                "backend.auth_header '{}' is not a valid header name",
                self.auth_header
            )));
        }

        match &self.auth {
            BackendAuthConfig::ApiKey { key } if key.trim().is_empty() => Err(
                ConfigError::Validation("backend.auth.key cannot be empty".into()),
            ),
            BackendAuthConfig::Login { username, password }
                if username.trim().is_empty() || password.is_empty() =>
            {
                Err(ConfigError::Validation(
                    "backend.auth.username and backend.auth.password are required for login"
                        .into(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Base URL derived from `address` and `tls`.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let address = self.address.trim();
        let has_port = address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !has_port || address.contains('/') {
            return Err(ConfigError::Validation(format!(
                "backend.address must be in host:port format, got '{}'",
                self.address
            )));
        }

        let scheme = if self.tls { "https" } else { "http" };
        Url::parse(&format!("{scheme}://{address}")).map_err(|e| {
            ConfigError::Validation(format!("backend.address '{}' is invalid: {e}", self.address))
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
