use std::net::SocketAddr;

use thiserror::Error;

pub const ADDR_VAR: &str = "RUSTYACTIVITY_ADDR";
pub const MAX_UPLOAD_VAR: &str = "RUSTYACTIVITY_MAX_UPLOAD_BYTES";

const DEFAULT_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} is not a socket address: {value}")]
    InvalidAddr { var: &'static str, value: String },
    #[error("{var} must be a positive byte count, got {value}")]
    InvalidUploadLimit { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from any variable source; unset or blank
    /// variables fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let addr_value = read(ADDR_VAR).unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr_value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddr {
                var: ADDR_VAR,
                value: addr_value.clone(),
            })?;

        let max_upload_bytes = match read(MAX_UPLOAD_VAR) {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|bytes| *bytes > 0)
                .ok_or(ConfigError::InvalidUploadLimit {
                    var: MAX_UPLOAD_VAR,
                    value,
                })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(ServerConfig {
            addr,
            max_upload_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn reads_both_variables() {
        let config = ServerConfig::from_lookup(lookup(&[
            (ADDR_VAR, "127.0.0.1:8080"),
            (MAX_UPLOAD_VAR, "1024"),
        ]))
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.max_upload_bytes, 1024);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[(ADDR_VAR, "localhost")])),
            Err(ConfigError::InvalidAddr { .. })
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[(MAX_UPLOAD_VAR, "0")])),
            Err(ConfigError::InvalidUploadLimit { .. })
        ));
    }
}
