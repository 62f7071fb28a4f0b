use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the hub
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Gateway server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Session pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Backend server configuration
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Port the gateway listens on (default: 4444)
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    /// First port handed out to backend servers (inclusive)
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    /// Last port handed out to backend servers (inclusive)
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,

    /// Maximum number of concurrently live sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Idle timeout in seconds; a session untouched for this long is reaped
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Absolute session lifetime in seconds; 0 disables the limit
    #[serde(default)]
    pub max_lifetime_secs: u64,

    /// Interval between reaper passes in seconds
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    /// Directory for per-session backend log files
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_idle_timeout(),
            max_lifetime_secs: 0,
            reap_interval_secs: default_reap_interval(),
            log_dir: default_log_dir(),
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Absolute lifetime limit, if one is configured
    pub fn max_lifetime(&self) -> Option<Duration> {
        if self.max_lifetime_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.max_lifetime_secs))
        }
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

/// How backend server processes are launched and talked to.
///
/// # Security Warning
///
/// The `command` and `args` fields allow arbitrary command execution.
/// Configuration files must be protected with appropriate file permissions
/// (e.g., readable only by the service user).
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Command to execute to start a backend server
    ///
    /// **Security:** This command is executed directly. Ensure config files
    /// are protected and commands come from trusted sources only.
    #[serde(default = "default_backend_command")]
    pub command: String,

    /// Arguments to pass to the command. `{port}` and `{log}` are replaced
    /// with the allocated port and per-session log file path.
    #[serde(default = "default_backend_args")]
    pub args: Vec<String>,

    /// Path polled to decide readiness (default: /status, Appium's own)
    #[serde(default = "default_status_path")]
    pub status_path: String,

    /// Startup timeout in seconds before a launch is abandoned
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Interval between readiness polls in milliseconds
    #[serde(default = "default_readiness_poll_interval")]
    pub readiness_poll_interval_ms: u64,

    /// Timeout in seconds for the nested session-creation call
    #[serde(default = "default_session_create_timeout")]
    pub session_create_timeout_secs: u64,

    /// Timeout in seconds for a single proxied request
    #[serde(default = "default_proxy_timeout")]
    pub proxy_timeout_secs: u64,

    /// Grace period in seconds between SIGTERM and SIGKILL
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: default_backend_command(),
            args: default_backend_args(),
            status_path: default_status_path(),
            startup_timeout_secs: default_startup_timeout(),
            readiness_poll_interval_ms: default_readiness_poll_interval(),
            session_create_timeout_secs: default_session_create_timeout(),
            proxy_timeout_secs: default_proxy_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl BackendConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }

    pub fn session_create_timeout(&self) -> Duration {
        Duration::from_secs(self.session_create_timeout_secs)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Resolve the argument list for a concrete port and log file
    pub fn args_for(&self, port: u16, log_path: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{port}", &port.to_string()).replace("{log}", log_path))
            .collect()
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    4444
}

fn default_port_range_start() -> u16 {
    4723
}

fn default_port_range_end() -> u16 {
    4773
}

fn default_max_sessions() -> usize {
    10
}

fn default_idle_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_reap_interval() -> u64 {
    60
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_backend_command() -> String {
    "appium".to_string()
}

fn default_backend_args() -> Vec<String> {
    [
        "--address",
        "127.0.0.1",
        "--port",
        "{port}",
        "--log",
        "{log}",
        "--session-override",
        "--log-timestamp",
        "--log-no-colors",
        "--relaxed-security",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_status_path() -> String {
    "/status".to_string()
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_readiness_poll_interval() -> u64 {
    500
}

fn default_session_create_timeout() -> u64 {
    60
}

fn default_proxy_timeout() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.pool.port_range_start > self.pool.port_range_end {
            errors.push(format!(
                "pool: port range start {} is greater than end {}",
                self.pool.port_range_start, self.pool.port_range_end
            ));
        }
        if self.pool.max_sessions == 0 {
            errors.push("pool: 'max_sessions' must be greater than 0".to_string());
        }
        if self.pool.reap_interval_secs == 0 {
            errors.push("pool: 'reap_interval_secs' must be greater than 0".to_string());
        }
        if self.backend.command.is_empty() {
            errors.push("backend: 'command' must not be empty".to_string());
        }
        if self.server.port >= self.pool.port_range_start
            && self.server.port <= self.pool.port_range_end
        {
            errors.push(format!(
                "server: gateway port {} lies inside the backend port range {}-{}",
                self.server.port, self.pool.port_range_start, self.pool.port_range_end
            ));
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
