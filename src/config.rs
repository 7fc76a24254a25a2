//! Node connection configuration.

use crate::error::{LavalinkError, Result};
use std::env;

/// Default Lavalink hostname.
pub const DEFAULT_HOSTNAME: &str = "localhost";

/// Default Lavalink websocket port.
pub const DEFAULT_PORT: u16 = 2333;

/// Default Lavalink password, as shipped in the server's sample config.
pub const DEFAULT_PASSWORD: &str = "youshallnotpass";

/// Value sent in the `Client-Name` handshake header.
pub const DEFAULT_CLIENT_NAME: &str = concat!("lavalink-session/", env!("CARGO_PKG_VERSION"));

/// Settings used to open a node connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub hostname: String,
    pub port: u16,
    pub password: String,
    /// Use `wss://` instead of `ws://`
    pub secure: bool,
    /// Id of the bot user the players belong to
    pub user_id: u64,
    pub shard_count: u32,
    pub client_name: String,
}

impl NodeConfig {
    /// Create a configuration for the given node and bot user
    pub fn new(hostname: impl Into<String>, port: u16, user_id: u64) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            password: DEFAULT_PASSWORD.to_string(),
            secure: false,
            user_id,
            shard_count: 1,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
        }
    }

    /// Load configuration from `LAVALINK_*` environment variables
    ///
    /// `LAVALINK_USER_ID` is required; every other variable falls back to its default.
    pub fn from_env() -> Result<Self> {
        let user_id = env::var("LAVALINK_USER_ID")
            .map_err(|_| LavalinkError::Config("LAVALINK_USER_ID is not set".to_string()))?
            .parse()
            .map_err(|e| LavalinkError::Config(format!("LAVALINK_USER_ID: {}", e)))?;

        let hostname = env::var("LAVALINK_HOST").unwrap_or_else(|_| DEFAULT_HOSTNAME.to_string());

        let port = env::var("LAVALINK_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let mut config = Self::new(hostname, port, user_id);

        if let Ok(password) = env::var("LAVALINK_PASSWORD") {
            config.password = password;
        }
        if let Some(secure) = env::var("LAVALINK_SECURE").ok().and_then(|v| v.parse().ok()) {
            config.secure = secure;
        }
        if let Some(shards) = env::var("LAVALINK_SHARD_COUNT").ok().and_then(|v| v.parse().ok()) {
            config.shard_count = shards;
        }

        Ok(config)
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    /// WebSocket URL of the node
    pub fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.hostname, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const VARS: [&str; 6] = [
        "LAVALINK_HOST",
        "LAVALINK_PORT",
        "LAVALINK_PASSWORD",
        "LAVALINK_SECURE",
        "LAVALINK_USER_ID",
        "LAVALINK_SHARD_COUNT",
    ];

    // The process environment is shared between test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Run `f` with exactly the given `LAVALINK_*` variables set
    fn with_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for name in VARS {
            env::remove_var(name);
        }
        for (name, value) in vars {
            env::set_var(name, value);
        }
        let result = f();
        for name in VARS {
            env::remove_var(name);
        }
        result
    }

    #[test]
    fn from_env_requires_user_id() {
        let err = with_env(&[("LAVALINK_HOST", "lava.local")], NodeConfig::from_env).unwrap_err();
        assert!(matches!(err, LavalinkError::Config(_)));

        let err = with_env(&[("LAVALINK_USER_ID", "not-a-number")], NodeConfig::from_env).unwrap_err();
        assert!(matches!(err, LavalinkError::Config(_)));
    }

    #[test]
    fn from_env_applies_defaults() {
        let config = with_env(&[("LAVALINK_USER_ID", "1234")], NodeConfig::from_env).unwrap();
        assert_eq!(config, NodeConfig::new(DEFAULT_HOSTNAME, DEFAULT_PORT, 1234));
        assert_eq!(config.password, DEFAULT_PASSWORD);
        assert_eq!(config.websocket_url(), "ws://localhost:2333");
    }

    #[test]
    fn from_env_reads_overrides() {
        let config = with_env(
            &[
                ("LAVALINK_USER_ID", "99"),
                ("LAVALINK_HOST", "lava.local"),
                ("LAVALINK_PORT", "443"),
                ("LAVALINK_PASSWORD", "hunter2"),
                ("LAVALINK_SECURE", "true"),
                ("LAVALINK_SHARD_COUNT", "4"),
            ],
            NodeConfig::from_env,
        )
        .unwrap();

        assert_eq!(config.user_id, 99);
        assert_eq!(config.password, "hunter2");
        assert_eq!(config.shard_count, 4);
        assert_eq!(config.websocket_url(), "wss://lava.local:443");
    }

    #[test]
    fn builds_plain_and_secure_urls() {
        let config = NodeConfig::new("lava.local", 2333, 1);
        assert_eq!(config.websocket_url(), "ws://lava.local:2333");
        assert_eq!(config.with_secure(true).websocket_url(), "wss://lava.local:2333");
    }

    #[test]
    fn defaults_match_stock_server() {
        let config = NodeConfig::new(DEFAULT_HOSTNAME, DEFAULT_PORT, 7);
        assert_eq!(config.password, "youshallnotpass");
        assert_eq!(config.shard_count, 1);
        assert!(!config.secure);
        assert!(config.client_name.starts_with("lavalink-session/"));
    }
}
