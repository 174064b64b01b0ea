//! Configuration structures.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `TOOLBRIDGE_`-prefixed environment variables (`__` separates nesting,
//! e.g. `TOOLBRIDGE_DISPATCH__MAX_IN_FLIGHT=8`).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::types::{Error, Result};

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Dispatcher knobs.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Framed transport configuration.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Backend adapter settings.
    #[serde(default)]
    pub backends: BackendsConfig,
}

impl Config {
    /// Load defaults, then `path` (if given), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("TOOLBRIDGE_").split("__"));

        let config: Config = figment
            .extract()
            .map_err(|e| Error::config(format!("failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the dispatcher and transports cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.max_in_flight == 0 {
            return Err(Error::config("dispatch.max_in_flight must be positive"));
        }
        if self.dispatch.max_in_flight > Semaphore::MAX_PERMITS {
            return Err(Error::config(format!(
                "dispatch.max_in_flight must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.dispatch.default_timeout.is_zero() {
            return Err(Error::config("dispatch.default_timeout must be positive"));
        }
        if let Some((tool, _)) = self
            .dispatch
            .timeout_overrides_ms
            .iter()
            .find(|(_, ms)| **ms == 0)
        {
            return Err(Error::config(format!(
                "dispatch.timeout_overrides_ms.{} must be positive",
                tool
            )));
        }
        if self.ipc.max_frame_bytes == 0 {
            return Err(Error::config("ipc.max_frame_bytes must be positive"));
        }
        if self.ipc.max_connections == 0 {
            return Err(Error::config("ipc.max_connections must be positive"));
        }
        if self.ipc.max_connections > Semaphore::MAX_PERMITS {
            return Err(Error::config(format!(
                "ipc.max_connections must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.ipc.read_timeout_secs == 0 {
            return Err(Error::config("ipc.read_timeout_secs must be positive"));
        }
        if self.ipc.write_timeout_secs == 0 {
            return Err(Error::config("ipc.write_timeout_secs must be positive"));
        }
        if self.ipc.response_queue_capacity == 0 {
            return Err(Error::config("ipc.response_queue_capacity must be positive"));
        }
        Ok(())
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP bind address for the length-delimited transport.
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50061".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// What the validator does with argument keys no parameter declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownArgumentPolicy {
    /// Reject the request as a client fault.
    #[default]
    Strict,
    /// Drop unknown keys and continue.
    Lenient,
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Execution budget applied when a tool has no override.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Maximum concurrently executing invocations. Further requests wait.
    pub max_in_flight: usize,

    /// Unknown-argument policy.
    pub unknown_arguments: UnknownArgumentPolicy,

    /// Per-tool execution budgets in milliseconds.
    #[serde(default)]
    pub timeout_overrides_ms: HashMap<String, u64>,
}

impl DispatchConfig {
    /// Execution budget for `tool`.
    pub fn timeout_for(&self, tool: &str) -> Duration {
        self.timeout_overrides_ms
            .get(tool)
            .map(|ms| Duration::from_millis(*ms))
            .unwrap_or(self.default_timeout)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_in_flight: 64,
            unknown_arguments: UnknownArgumentPolicy::Strict,
            timeout_overrides_ms: HashMap::new(),
        }
    }
}

/// Framed transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Maximum frame payload (or line) size in bytes.
    pub max_frame_bytes: u32,

    /// Maximum concurrent TCP connections. Connections beyond this limit
    /// are rejected.
    pub max_connections: usize,

    /// Idle read timeout in seconds per frame. Connections idle beyond this
    /// duration are dropped once no call is pending.
    pub read_timeout_secs: u64,

    /// Write timeout in seconds per frame. Slow consumers that cannot
    /// accept a response within this window are dropped.
    pub write_timeout_secs: u64,

    /// Bounded capacity of the per-connection response queue.
    pub response_queue_capacity: usize,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 5 * 1024 * 1024,
            max_connections: 256,
            read_timeout_secs: 300,
            write_timeout_secs: 10,
            response_queue_capacity: 64,
        }
    }
}

/// Backend adapter settings. The core never reads these.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendsConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub medical: MedicalConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
}

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL.
    pub sqlite_url: String,

    /// MySQL connection URL. MySQL tools fail until this is set.
    pub mysql_url: Option<String>,

    /// Pool size for MySQL. SQLite always uses a single connection.
    pub mysql_max_connections: u32,

    /// How long to wait for a pooled connection.
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_url: "sqlite://databases/sample.db?mode=rwc".to_string(),
            mysql_url: None,
            mysql_max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,

    /// Transport-level timeout, independent of the dispatch deadline.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Non-JSON bodies longer than this are truncated.
    pub max_body_chars: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("toolbridge/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_secs(30),
            max_body_chars: 2000,
        }
    }
}

/// Upstream endpoints for the medical data gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalConfig {
    pub icd11_base_url: String,
    pub fda_base_url: String,
    pub infermedica_base_url: String,
    pub nutritionix_base_url: String,
    pub npi_base_url: String,
    pub cms_base_url: String,
    pub disease_base_url: String,
    pub nhs_scotland_base_url: String,
}

impl Default for MedicalConfig {
    fn default() -> Self {
        Self {
            icd11_base_url: "https://icd11restapi-developer-test.azurewebsites.net".to_string(),
            fda_base_url: "https://api.fda.gov".to_string(),
            infermedica_base_url: "https://api.infermedica.com".to_string(),
            nutritionix_base_url: "https://trackapi.nutritionix.com".to_string(),
            npi_base_url: "https://npiregistry.cms.hhs.gov".to_string(),
            cms_base_url: "https://marketplace.api.healthcare.gov".to_string(),
            disease_base_url: "https://disease.sh".to_string(),
            nhs_scotland_base_url: "https://www.opendata.nhs.scot".to_string(),
        }
    }
}

/// Process executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Working directory for commands. Created on first use.
    pub workspace: PathBuf,

    /// Shell used as `<shell> -c <command>`.
    pub shell: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        let workspace = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join("mcp").join("workspace"))
            .unwrap_or_else(|| PathBuf::from("workspace"));
        Self {
            workspace,
            shell: "sh".to_string(),
        }
    }
}
