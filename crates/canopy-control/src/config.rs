//! Configuration for canopy-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{CanopyError, CanopyResult};

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CanopyConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Canister RPC configuration.
    #[serde(default)]
    pub canister: CanisterConfig,

    /// Cycles monitor configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Domain registration authority configuration.
    #[serde(default)]
    pub registration: RegistrationConfig,

    /// Alerting configuration.
    #[serde(default)]
    pub alert: AlertConfig,

    /// Background sweep configuration.
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl CanopyConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `canopy.toml` in the current directory (if present)
    /// 3. Environment variables with `CANOPY_` prefix
    pub fn load() -> CanopyResult<Self> {
        Figment::new()
            .merge(Toml::file("canopy.toml"))
            .merge(Env::prefixed("CANOPY_").split("__"))
            .extract()
            .map_err(|e| CanopyError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> CanopyResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CANOPY_").split("__"))
            .extract()
            .map_err(|e| CanopyError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8084)
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/canopy".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Canister RPC configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CanisterConfig {
    /// Replica or gateway URL.
    #[serde(default = "default_ic_url")]
    pub url: String,

    /// Fetch the root key on startup. Only for local replicas, never mainnet.
    #[serde(default)]
    pub fetch_root_key: bool,

    /// Path to the secp256k1 identity PEM file.
    #[serde(default = "default_identity_pem_path")]
    pub identity_pem_path: PathBuf,

    /// Path to the frontend (asset canister) wasm module.
    #[serde(default = "default_frontend_wasm_path")]
    pub frontend_wasm_path: PathBuf,

    /// Principal of the cycles ledger canister funding creations and top-ups.
    #[serde(default = "default_ledger_canister_id")]
    pub ledger_canister_id: String,

    /// Cycles to fund a newly created canister with.
    #[serde(default = "default_initial_cycles")]
    pub initial_cycles: u64,
}

fn default_ic_url() -> String {
    "https://ic0.app".to_owned()
}

fn default_identity_pem_path() -> PathBuf {
    PathBuf::from("/etc/canopy/identity.pem")
}

fn default_frontend_wasm_path() -> PathBuf {
    PathBuf::from("/opt/canopy/frontend.wasm.gz")
}

fn default_ledger_canister_id() -> String {
    "um5iw-rqaaa-aaaaq-qaaba-cai".to_owned()
}

const fn default_initial_cycles() -> u64 {
    800_000_000_000
}

impl Default for CanisterConfig {
    fn default() -> Self {
        Self {
            url: default_ic_url(),
            fetch_root_key: false,
            identity_pem_path: default_identity_pem_path(),
            frontend_wasm_path: default_frontend_wasm_path(),
            ledger_canister_id: default_ledger_canister_id(),
            initial_cycles: default_initial_cycles(),
        }
    }
}

/// Cycles monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Re-check a deployment's balance after this many days.
    #[serde(default = "default_check_interval_days")]
    pub check_interval_days: i64,

    /// Top up when the balance drops below this many cycles.
    #[serde(default = "default_min_cycles_threshold")]
    pub min_cycles_threshold: u64,

    /// Cycles transferred per top-up.
    #[serde(default = "default_top_up_amount")]
    pub top_up_amount: u64,

    /// Maximum 1-second polls while waiting for a top-up to settle.
    #[serde(default = "default_confirm_max_attempts")]
    pub confirm_max_attempts: u32,
}

const fn default_check_interval_days() -> i64 {
    3
}

const fn default_min_cycles_threshold() -> u64 {
    300_000_000_000
}

const fn default_top_up_amount() -> u64 {
    500_000_000_000
}

const fn default_confirm_max_attempts() -> u32 {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_days: default_check_interval_days(),
            min_cycles_threshold: default_min_cycles_threshold(),
            top_up_amount: default_top_up_amount(),
            confirm_max_attempts: default_confirm_max_attempts(),
        }
    }
}

/// Domain registration authority configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    /// Base URL for the registration API.
    #[serde(default = "default_registration_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_registration_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_registration_url() -> String {
    "https://icp0.io".to_owned()
}

const fn default_registration_timeout_secs() -> u64 {
    30
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            base_url: default_registration_url(),
            timeout_secs: default_registration_timeout_secs(),
        }
    }
}

/// Alerting configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AlertConfig {
    /// Webhook URL for operational alerts. Alerts are disabled when unset.
    pub webhook_url: Option<String>,
}

/// Background sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Run the background sweeps at all.
    #[serde(default = "default_sweeps_enabled")]
    pub enabled: bool,

    /// Interval between cycles-check sweeps in seconds.
    #[serde(default = "default_cycles_interval_secs")]
    pub cycles_interval_secs: u64,

    /// Delay before retrying after a failed cycles sweep tick.
    #[serde(default = "default_cycles_error_backoff_secs")]
    pub cycles_error_backoff_secs: u64,

    /// Interval between domain reconciliation sweeps in seconds.
    #[serde(default = "default_domain_interval_secs")]
    pub domain_interval_secs: u64,

    /// Delay before retrying after a failed domain sweep tick.
    #[serde(default = "default_domain_error_backoff_secs")]
    pub domain_error_backoff_secs: u64,
}

const fn default_sweeps_enabled() -> bool {
    true
}

const fn default_cycles_interval_secs() -> u64 {
    3600
}

const fn default_cycles_error_backoff_secs() -> u64 {
    600
}

const fn default_domain_interval_secs() -> u64 {
    60
}

const fn default_domain_error_backoff_secs() -> u64 {
    10
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeps_enabled(),
            cycles_interval_secs: default_cycles_interval_secs(),
            cycles_error_backoff_secs: default_cycles_error_backoff_secs(),
            domain_interval_secs: default_domain_interval_secs(),
            domain_error_backoff_secs: default_domain_error_backoff_secs(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CanopyConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8084);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.registration.base_url, "https://icp0.io");
        assert_eq!(config.monitor.check_interval_days, 3);
        assert!(config.sweep.enabled);
        assert!(config.alert.webhook_url.is_none());
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [server]
            listen_addr = "127.0.0.1:9000"

            [database]
            url = "postgres://user:pass@db:5432/mydb"
            max_connections = 20

            [canister]
            url = "http://localhost:8080"
            fetch_root_key = true
            initial_cycles = 1000000000000

            [monitor]
            min_cycles_threshold = 42

            [sweep]
            enabled = false
        "#;

        let config: CanopyConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.database.url, "postgres://user:pass@db:5432/mydb");
        assert_eq!(config.database.max_connections, 20);
        assert!(config.canister.fetch_root_key);
        assert_eq!(config.canister.initial_cycles, 1_000_000_000_000);
        assert_eq!(config.monitor.min_cycles_threshold, 42);
        assert!(!config.sweep.enabled);
    }
}
