use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Engine-wide settings for launching and talking to a kernel process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interface the kernel binds its sockets on
    pub ip: String,
    /// ZeroMQ transport, `tcp` unless the kernel is local-only
    pub transport: String,
    /// Signature scheme written into the connection file
    pub signature_scheme: String,
    /// Directory for connection files; falls back to the Jupyter runtime dir
    pub runtime_dir: Option<PathBuf>,
    /// Username stamped into every outbound header
    pub username: String,
    /// Upper bound for the kernel-info readiness round trip
    pub startup_timeout_ms: u64,
    /// A process that exits within this window is reported as a launch failure
    pub startup_grace_ms: u64,
    /// Resend interval for the readiness kernel-info request
    pub kernel_info_retry_ms: u64,
    /// How long a cancellation waits for `interrupt_reply`
    pub interrupt_timeout_ms: u64,
    /// How long an execution waits for `execute_reply` after the kernel went idle
    pub execute_reply_grace_ms: u64,
    /// How long shutdown waits for the process before killing it
    pub shutdown_timeout_ms: u64,
    /// Heartbeat ping interval, 0 disables the monitor
    pub heartbeat_interval_ms: u64,
    /// Capacity of the inbound broadcast hub
    pub channel_capacity: usize,
    /// Verify HMAC signatures on received messages
    pub verify_signatures: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            transport: "tcp".to_string(),
            signature_scheme: "hmac-sha256".to_string(),
            runtime_dir: None,
            username: "jupyter-bridge".to_string(),
            startup_timeout_ms: 30_000,
            startup_grace_ms: 250,
            kernel_info_retry_ms: 500,
            interrupt_timeout_ms: 5_000,
            execute_reply_grace_ms: 2_000,
            shutdown_timeout_ms: 5_000,
            heartbeat_interval_ms: 5_000,
            channel_capacity: 1024,
            verify_signatures: true,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Recognized variables (all optional):
    /// - `{PREFIX}_IP`, `{PREFIX}_TRANSPORT`, `{PREFIX}_SIGNATURE_SCHEME`
    /// - `{PREFIX}_RUNTIME_DIR`, `{PREFIX}_USERNAME`
    /// - `{PREFIX}_STARTUP_TIMEOUT_MS`, `{PREFIX}_STARTUP_GRACE_MS`,
    ///   `{PREFIX}_KERNEL_INFO_RETRY_MS`, `{PREFIX}_INTERRUPT_TIMEOUT_MS`,
    ///   `{PREFIX}_EXECUTE_REPLY_GRACE_MS`,
    ///   `{PREFIX}_SHUTDOWN_TIMEOUT_MS`, `{PREFIX}_HEARTBEAT_INTERVAL_MS`
    /// - `{PREFIX}_CHANNEL_CAPACITY`, `{PREFIX}_VERIFY_SIGNATURES`
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let var = |name: &str| env::var(format!("{}_{}", prefix, name)).ok();
        let mut config = Self::default();

        if let Some(ip) = var("IP") {
            config.ip = ip;
        }
        if let Some(transport) = var("TRANSPORT") {
            config.transport = transport;
        }
        if let Some(scheme) = var("SIGNATURE_SCHEME") {
            config.signature_scheme = scheme;
        }
        if let Some(dir) = var("RUNTIME_DIR") {
            config.runtime_dir = Some(PathBuf::from(dir));
        }
        if let Some(username) = var("USERNAME") {
            config.username = username;
        }

        let millis = |name: &str, current: u64| -> Result<u64, ConfigError> {
            var(name).map_or(Ok(current), |raw| {
                raw.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidConfiguration(format!(
                        "{}_{} must be a number of milliseconds: {}",
                        prefix, name, e
                    ))
                })
            })
        };
        config.startup_timeout_ms = millis("STARTUP_TIMEOUT_MS", config.startup_timeout_ms)?;
        config.startup_grace_ms = millis("STARTUP_GRACE_MS", config.startup_grace_ms)?;
        config.kernel_info_retry_ms =
            millis("KERNEL_INFO_RETRY_MS", config.kernel_info_retry_ms)?;
        config.interrupt_timeout_ms =
            millis("INTERRUPT_TIMEOUT_MS", config.interrupt_timeout_ms)?;
        config.execute_reply_grace_ms =
            millis("EXECUTE_REPLY_GRACE_MS", config.execute_reply_grace_ms)?;
        config.shutdown_timeout_ms = millis("SHUTDOWN_TIMEOUT_MS", config.shutdown_timeout_ms)?;
        config.heartbeat_interval_ms =
            millis("HEARTBEAT_INTERVAL_MS", config.heartbeat_interval_ms)?;

        if let Some(raw) = var("CHANNEL_CAPACITY") {
            config.channel_capacity = raw.parse::<usize>().map_err(|e| {
                ConfigError::InvalidConfiguration(format!(
                    "{}_CHANNEL_CAPACITY must be a positive integer: {}",
                    prefix, e
                ))
            })?;
        }

        if let Some(raw) = var("VERIFY_SIGNATURES") {
            config.verify_signatures = raw.parse::<bool>().map_err(|e| {
                ConfigError::InvalidConfiguration(format!(
                    "{}_VERIFY_SIGNATURES must be true or false: {}",
                    prefix, e
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from .env file and environment variables
    ///
    /// A missing .env file is not an error; the process environment is used.
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ip.is_empty() {
            return Err(ConfigError::InvalidConfiguration(
                "ip cannot be empty".to_string(),
            ));
        }
        if self.transport != "tcp" && self.transport != "ipc" {
            return Err(ConfigError::InvalidConfiguration(format!(
                "unsupported transport '{}'",
                self.transport
            )));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "channel_capacity must be positive".to_string(),
            ));
        }
        if self.kernel_info_retry_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "kernel_info_retry_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the interface the kernel binds on
    #[must_use]
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Set the directory where connection files are written
    #[must_use]
    pub fn runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(dir.into());
        self
    }

    /// Set the signature scheme advertised in the connection file
    #[must_use]
    pub fn signature_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.signature_scheme = scheme.into();
        self
    }

    /// Enable or disable signature verification on receive
    #[must_use]
    pub const fn verify_signatures(mut self, verify: bool) -> Self {
        self.verify_signatures = verify;
        self
    }

    /// Set the readiness timeout
    #[must_use]
    pub const fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the interrupt reply timeout
    #[must_use]
    pub const fn interrupt_timeout(mut self, timeout: Duration) -> Self {
        self.interrupt_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set how long `execute_reply` may trail the idle status
    #[must_use]
    pub const fn execute_reply_grace(mut self, grace: Duration) -> Self {
        self.execute_reply_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Set the heartbeat interval; zero disables the monitor
    #[must_use]
    pub const fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub const fn startup_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub const fn startup_grace_duration(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub const fn kernel_info_retry_duration(&self) -> Duration {
        Duration::from_millis(self.kernel_info_retry_ms)
    }

    pub const fn interrupt_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.interrupt_timeout_ms)
    }

    pub const fn execute_reply_grace_duration(&self) -> Duration {
        Duration::from_millis(self.execute_reply_grace_ms)
    }

    pub const fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub const fn heartbeat_interval_duration(&self) -> Option<Duration> {
        if self.heartbeat_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.heartbeat_interval_ms))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
