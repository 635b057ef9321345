use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use pawmarket_gateway::connection::GatewayConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub gateway: GatewayConfig,
}

impl ServerConfig {
    /// Read `PAWMARKET_*` variables. Call after `.env` has been loaded.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = var("PAWMARKET_JWT_SECRET", "dev-secret-change-me");
        let db_path = PathBuf::from(var("PAWMARKET_DB_PATH", "pawmarket.db"));
        let host = var("PAWMARKET_HOST", "0.0.0.0");
        let port: u16 = var("PAWMARKET_PORT", "8000")
            .parse()
            .context("PAWMARKET_PORT must be a port number")?;
        let auth_timeout: u64 = var("PAWMARKET_AUTH_TIMEOUT_SECS", "10")
            .parse()
            .context("PAWMARKET_AUTH_TIMEOUT_SECS must be a whole number of seconds")?;
        let heartbeat: u64 = var("PAWMARKET_HEARTBEAT_SECS", "15")
            .parse()
            .context("PAWMARKET_HEARTBEAT_SECS must be a whole number of seconds")?;

        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", host, port))?;

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            gateway: GatewayConfig {
                auth_timeout: Duration::from_secs(auth_timeout),
                heartbeat_interval: Duration::from_secs(heartbeat.max(1)),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.db_path, PathBuf::from("pawmarket.db"));
        assert_eq!(config.gateway.auth_timeout, Duration::from_secs(10));
        assert_eq!(config.gateway.heartbeat_interval, Duration::from_secs(15));
    }

    #[test]
    fn overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PAWMARKET_HOST", "127.0.0.1"),
            ("PAWMARKET_PORT", "9100"),
            ("PAWMARKET_AUTH_TIMEOUT_SECS", "3"),
            ("PAWMARKET_JWT_SECRET", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.gateway.auth_timeout, Duration::from_secs(3));
        assert_eq!(config.jwt_secret, "s3cret");
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(ServerConfig::from_lookup(lookup(&[("PAWMARKET_PORT", "eighty")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("PAWMARKET_HEARTBEAT_SECS", "-1")])).is_err());
    }
}
