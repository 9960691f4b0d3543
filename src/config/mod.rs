/// Configuration management for the UDA client

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::hosts::HostEntry;

/// Default UDA server port
pub const DEFAULT_PORT: u16 = 56565;
/// Send/receive buffer size applied to every connected socket
pub const DEFAULT_WINDOW_SIZE: usize = 32768;

pub const ENV_MAX_SOCKET_DELAY: &str = "UDA_MAX_SOCKET_DELAY";
pub const ENV_MAX_SOCKET_ATTEMPTS: &str = "UDA_MAX_SOCKET_ATTEMPTS";
pub const ENV_HOST: &str = "UDA_HOST";
pub const ENV_PORT: &str = "UDA_PORT";
pub const ENV_HOST2: &str = "UDA_HOST2";
pub const ENV_PORT2: &str = "UDA_PORT2";

lazy_static! {
    /// Retry limits from the environment, read once per process
    static ref SOCKET_ENV: SocketEnv = SocketEnv::read();
}

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Primary and secondary server
    pub server: ServerConfig,
    /// Connect retry behaviour
    pub retry: RetryConfig,
    /// Options applied to connected sockets
    pub socket: SocketConfig,
    /// Read/write polling behaviour
    pub transport: TransportConfig,
    /// Server session timer
    pub session: SessionConfig,
    /// Host directory entries
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Primary host name or alias
    pub host: String,
    /// Primary port
    pub port: u16,
    /// Secondary host name or alias (empty disables failover)
    #[serde(default)]
    pub host2: String,
    /// Secondary port
    #[serde(default)]
    pub port2: u16,
}

/// Connect retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Upper bound, in delay units, of the jittered delay between attempts
    pub max_delay: u64,
    /// Maximum connect attempts per host, the first one included
    pub max_attempts: u32,
    /// Length of one delay unit in milliseconds
    pub delay_unit_ms: u64,
    /// Overall deadline for a single connect() call
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

/// Socket option configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// SO_SNDBUF / SO_RCVBUF size
    pub window_size: usize,
    /// Enable SO_KEEPALIVE
    pub keepalive: bool,
    /// Enable TCP_NODELAY
    pub nodelay: bool,
}

/// Transport polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Readiness poll timeout in microseconds
    pub poll_interval_us: u64,
    /// Maximum non-ready polls before a read is attempted anyway
    pub max_read_polls: u32,
    /// Overall bound on waiting for readiness
    #[serde(default)]
    pub io_timeout_ms: Option<u64>,
}

/// Server session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle lifetime of a server session in seconds
    pub user_timeout_sec: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "localhost".to_string(),
                port: DEFAULT_PORT,
                host2: String::new(),
                port2: DEFAULT_PORT,
            },
            retry: RetryConfig::default(),
            socket: SocketConfig::default(),
            transport: TransportConfig::default(),
            session: SessionConfig {
                user_timeout_sec: 600,
            },
            hosts: Vec::new(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_delay: 10,
            max_attempts: 3,
            delay_unit_ms: 1000,
            connect_timeout_ms: None,
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            keepalive: true,
            nodelay: true,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: 500,
            max_read_polls: 10000,
            io_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn delay_unit(&self) -> Duration {
        Duration::from_millis(self.delay_unit_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl TransportConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}

impl SessionConfig {
    pub fn user_timeout(&self) -> Duration {
        Duration::from_secs(self.user_timeout_sec)
    }
}

/// Retry limits taken from `UDA_MAX_SOCKET_DELAY` / `UDA_MAX_SOCKET_ATTEMPTS`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketEnv {
    pub max_delay: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl SocketEnv {
    /// Read the environment now, bypassing the process-wide cache
    pub fn read() -> Self {
        Self {
            max_delay: env_value(ENV_MAX_SOCKET_DELAY),
            max_attempts: env_value(ENV_MAX_SOCKET_ATTEMPTS),
        }
    }

    /// The values cached on first access
    pub fn cached() -> Self {
        *SOCKET_ENV
    }

    pub fn apply(&self, retry: &mut RetryConfig) {
        if let Some(delay) = self.max_delay {
            retry.max_delay = delay;
        }
        if let Some(attempts) = self.max_attempts {
            retry.max_attempts = attempts;
        }
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", name, raw);
            None
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Defaults with the environment applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `UDA_HOST`, `UDA_PORT`, `UDA_HOST2`, `UDA_PORT2` and the cached retry limits
    pub fn apply_env_overrides(&mut self) {
        self.apply_socket_env(SocketEnv::cached());

        if let Some(host) = env_value::<String>(ENV_HOST) {
            self.server.host = host;
        }
        if let Some(port) = env_value(ENV_PORT) {
            self.server.port = port;
        }
        if let Some(host2) = env_value::<String>(ENV_HOST2) {
            self.server.host2 = host2;
        }
        if let Some(port2) = env_value(ENV_PORT2) {
            self.server.port2 = port2;
        }
    }

    pub fn apply_socket_env(&mut self, env: SocketEnv) {
        env.apply(&mut self.retry);
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server config
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server host cannot be empty".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be greater than 0".to_string(),
            ));
        }

        if !self.server.host2.trim().is_empty() && self.server.port2 == 0 {
            return Err(ConfigError::ValidationError(
                "server port2 must be greater than 0 when host2 is set".to_string(),
            ));
        }

        // Validate retry config
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.retry.connect_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "retry connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        // Validate socket and transport config
        if self.socket.window_size == 0 {
            return Err(ConfigError::ValidationError(
                "socket window_size must be greater than 0".to_string(),
            ));
        }

        if self.transport.poll_interval_us == 0 {
            return Err(ConfigError::ValidationError(
                "transport poll_interval_us must be greater than 0".to_string(),
            ));
        }

        if self.transport.max_read_polls == 0 {
            return Err(ConfigError::ValidationError(
                "transport max_read_polls must be greater than 0".to_string(),
            ));
        }

        if self.session.user_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "session user_timeout_sec must be greater than 0".to_string(),
            ));
        }

        for entry in &self.hosts {
            if entry.alias.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "host entry for '{}' has an empty alias",
                    entry.host_name
                )));
            }
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(
        path: P,
        profile: &str,
    ) -> Result<(), ConfigError> {
        let config = match profile {
            "single" => Config {
                server: ServerConfig {
                    host: "uda.example.org".to_string(),
                    port: DEFAULT_PORT,
                    host2: String::new(),
                    port2: 0,
                },
                ..Default::default()
            },
            "failover" => Config {
                server: ServerConfig {
                    host: "uda1".to_string(),
                    port: DEFAULT_PORT,
                    host2: "uda2".to_string(),
                    port2: DEFAULT_PORT,
                },
                hosts: vec![
                    HostEntry::new("uda1", "uda1.example.org", Some(DEFAULT_PORT)),
                    HostEntry::new("uda2", "SSL://uda2.example.org", Some(56566)),
                ],
                ..Default::default()
            },
            _ => return Err(ConfigError::ValidationError(
                "Profile must be 'single' or 'failover'".to_string(),
            )),
        };

        config.save_to_file(path)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
