use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request body size limit in bytes.
    /// Claims payloads are small; anything larger is rejected before decoding.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    64 * 1024 // 64 KB
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.body_limit_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.body_limit_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Socket address the HTTP listener binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Override host and port from a listen address.
    ///
    /// Accepts `host:port` as well as the bare `:port` form, which binds all interfaces.
    pub fn apply_listen_override(&mut self, listen: &str) -> Result<(), ConfigError> {
        let addr = parse_listen_addr(listen)?;
        self.host = addr.ip();
        self.port = addr.port();
        Ok(())
    }
}

/// Parse a listen address such as `:8080`, `127.0.0.1:8080` or `[::1]:8080`.
pub fn parse_listen_addr(listen: &str) -> Result<SocketAddr, ConfigError> {
    let listen = listen.trim();
    let candidate = match listen.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => listen.to_string(),
    };

    candidate.parse::<SocketAddr>().map_err(|e| {
        ConfigError::Validation(format!("invalid listen address '{listen}': {e}"))
    })
}
