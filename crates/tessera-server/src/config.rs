//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use tessera_crypto::{CryptoError, FileKeyProvider, InlineKeyProvider, KeyMaterialProvider};
use tessera_db::DbRuntimeSettings;
use thiserror::Error;

use crate::hub::HubAuth;
use crate::middleware::DEFAULT_CLIENT_ID_CLAIM;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub oidc: OidcConfig,

    /// Forward proxy for traffic to the hub and the identity provider.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// PEM bundle trusted in addition to the built-in roots for outbound TLS.
    #[serde(default)]
    pub extra_ca_certs: Option<PathBuf>,

    /// Source of this node's ECDH private key.
    #[serde(default)]
    pub crypto: Option<CryptoConfig>,

    /// The only client allowed to delete a project's local results.
    #[serde(default = "default_admin_client_id")]
    pub admin_client_id: String,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL under which this service is reachable; used to build the
    /// links returned to clients.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// How long a request waits for a pooled connection before failing.
    #[serde(default = "default_checkout_timeout_ms")]
    pub checkout_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
            checkout_timeout_ms: self.checkout_timeout_ms,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tessera_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Local object store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

/// Hub endpoints and credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_core_base_url")]
    pub core_base_url: String,

    #[serde(default = "default_storage_base_url")]
    pub storage_base_url: String,

    #[serde(default = "default_auth_base_url")]
    pub auth_base_url: String,

    #[serde(default)]
    pub auth: Option<HubAuth>,
}

/// Identity provider settings for bearer tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    /// URL of the provider's JSON Web Key Set.
    #[serde(default)]
    pub certs_url: Option<String>,

    #[serde(default = "default_client_id_claim_name")]
    pub client_id_claim_name: String,

    /// Accept tokens without verifying them. Development only.
    #[serde(default)]
    pub skip_jwt_validation: bool,
}

/// Outbound proxy URLs. When only one is set it is used for both schemes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub http_url: Option<String>,

    #[serde(default)]
    pub https_url: Option<String>,
}

/// Where the node's private key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum CryptoConfig {
    /// PEM file on disk.
    File { ecdh_private_key_path: PathBuf },
    /// PEM text inline; `\n` escapes are accepted.
    Raw { ecdh_private_key: String },
}

impl CryptoConfig {
    /// Loads the configured key once, for the lifetime of the process.
    pub fn load_provider(&self) -> Result<Arc<dyn KeyMaterialProvider>, CryptoError> {
        let provider: Arc<dyn KeyMaterialProvider> = match self {
            CryptoConfig::File {
                ecdh_private_key_path,
            } => Arc::new(FileKeyProvider::load(ecdh_private_key_path)?),
            CryptoConfig::Raw { ecdh_private_key } => {
                Arc::new(InlineKeyProvider::from_pem_bytes(ecdh_private_key.as_bytes())?)
            }
        };
        Ok(provider)
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_db_path() -> String {
    "tessera.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_checkout_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/objects")
}

fn default_core_base_url() -> String {
    "https://core.privateaim.dev".to_string()
}

fn default_storage_base_url() -> String {
    "https://storage.privateaim.dev".to_string()
}

fn default_auth_base_url() -> String {
    "https://auth.privateaim.dev".to_string()
}

fn default_client_id_claim_name() -> String {
    DEFAULT_CLIENT_ID_CLAIM.to_string()
}

fn default_admin_client_id() -> String {
    "hub-adapter".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            hub: HubConfig::default(),
            oidc: OidcConfig::default(),
            proxy: ProxyConfig::default(),
            extra_ca_certs: None,
            crypto: None,
            admin_client_id: default_admin_client_id(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            checkout_timeout_ms: default_checkout_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            core_base_url: default_core_base_url(),
            storage_base_url: default_storage_base_url(),
            auth_base_url: default_auth_base_url(),
            auth: None,
        }
    }
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            certs_url: None,
            client_id_claim_name: default_client_id_claim_name(),
            skip_jwt_validation: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting required at startup is absent.
    #[error("missing configuration: {0}")]
    Missing(&'static str),
}

/// Parses configuration from TOML text without applying overrides.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(contents)?)
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TESSERA_HOST` overrides `server.host`
/// - `TESSERA_PORT` overrides `server.port`
/// - `TESSERA_PUBLIC_URL` overrides `server.public_url`
/// - `TESSERA_DB_PATH` overrides `database.path`
/// - `TESSERA_LOG_LEVEL` overrides `logging.level`
/// - `TESSERA_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `TESSERA_STORAGE_ROOT` overrides `storage.root`
/// - `TESSERA_ADMIN_CLIENT_ID` overrides `admin_client_id`
/// - `TESSERA_HTTP_PROXY` overrides `proxy.http_url`
/// - `TESSERA_HTTPS_PROXY` overrides `proxy.https_url`
/// - `TESSERA_EXTRA_CA_CERTS` overrides `extra_ca_certs`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => parse_config(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("TESSERA_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("TESSERA_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(public_url) = var("TESSERA_PUBLIC_URL") {
        config.server.public_url = public_url;
    }
    if let Some(db_path) = var("TESSERA_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("TESSERA_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("TESSERA_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(root) = var("TESSERA_STORAGE_ROOT") {
        config.storage.root = PathBuf::from(root);
    }
    if let Some(admin) = var("TESSERA_ADMIN_CLIENT_ID") {
        config.admin_client_id = admin;
    }
    if let Some(url) = var("TESSERA_HTTP_PROXY").filter(|v| !v.is_empty()) {
        config.proxy.http_url = Some(url);
    }
    if let Some(url) = var("TESSERA_HTTPS_PROXY").filter(|v| !v.is_empty()) {
        config.proxy.https_url = Some(url);
    }
    if let Some(path) = var("TESSERA_EXTRA_CA_CERTS").filter(|v| !v.is_empty()) {
        config.extra_ca_certs = Some(PathBuf::from(path));
    }
}
