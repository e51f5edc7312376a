use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "fakebooks", about = "fakebooks - stateful test double for an accounting SaaS API")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "fakebooks.toml")]
    pub config: String,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Directory holding the database file and receipt uploads (overrides config file)
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Database file; `:memory:` keeps everything in process.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_upload_root")]
    pub upload_root: PathBuf,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Token lifetimes and the fixed identity the simulated login accepts.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_access_token_ttl_secs")]
    pub access_token_ttl_secs: u64,

    #[serde(default = "default_refresh_token_ttl_secs")]
    pub refresh_token_ttl_secs: u64,

    #[serde(default = "default_authorization_code_ttl_secs")]
    pub authorization_code_ttl_secs: u64,

    #[serde(default = "default_company_id")]
    pub company_id: i64,

    #[serde(default = "default_company_name")]
    pub company_name: String,

    #[serde(default = "default_email")]
    pub email: String,

    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default = "default_otp_code")]
    pub otp_code: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/fakebooks.db")
}

fn default_upload_root() -> PathBuf {
    PathBuf::from("data/receipts")
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_access_token_ttl_secs() -> u64 {
    60 * 60
}

fn default_refresh_token_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_authorization_code_ttl_secs() -> u64 {
    10 * 60
}

fn default_company_id() -> i64 {
    1
}

fn default_company_name() -> String {
    "Test Company".to_string()
}

fn default_email() -> String {
    "test@example.com".to_string()
}

fn default_password() -> String {
    "password".to_string()
}

fn default_otp_code() -> String {
    "123456".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: default_db_path(),
            upload_root: default_upload_root(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            access_token_ttl_secs: default_access_token_ttl_secs(),
            refresh_token_ttl_secs: default_refresh_token_ttl_secs(),
            authorization_code_ttl_secs: default_authorization_code_ttl_secs(),
            company_id: default_company_id(),
            company_name: default_company_name(),
            email: default_email(),
            password: default_password(),
            otp_code: default_otp_code(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig { enabled: true }
    }
}

impl Config {
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        // CLI overrides
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref dir) = cli.data_dir {
            config.storage.path = dir.join("fakebooks.db");
            config.storage.upload_root = dir.join("receipts");
        }

        config
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// A private, throwaway configuration: in-memory store, uploads under
    /// `upload_root`.
    pub fn ephemeral(upload_root: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.storage.path = PathBuf::from(":memory:");
        config.storage.upload_root = upload_root.into();
        config.metrics.enabled = false;
        config
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::parse(
            "
            [server]
            port = 9000

            [auth]
            otp_code = '654321'
            ",
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.auth.otp_code, "654321");
        assert_eq!(config.auth.email, "test@example.com");
        assert_eq!(config.auth.access_token_ttl_secs, 3600);
        assert_eq!(config.storage.path, PathBuf::from("data/fakebooks.db"));
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = CliArgs {
            config: "does-not-exist.toml".to_string(),
            port: Some(4000),
            log_level: Some("debug".to_string()),
            data_dir: Some(PathBuf::from("/tmp/fb")),
        };
        let config = Config::load(&cli);

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.storage.path, PathBuf::from("/tmp/fb/fakebooks.db"));
        assert_eq!(config.storage.upload_root, PathBuf::from("/tmp/fb/receipts"));
        assert_eq!(config.listen_addr().unwrap().port(), 4000);
    }
}
