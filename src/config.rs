//! Application configuration loaded from a TOML file or defaults.
//!
//! Follows the teacher's shape: a `Deserialize` struct with
//! `#[serde(default = "fn")]` per optional field, an explicit `Default`
//! impl, and `from_file` reading the whole file into `toml::de::from_str`.

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_netflow")]
    pub netflow: ProtocolConfig,

    #[serde(default = "default_sflow")]
    pub sflow: ProtocolConfig,

    /// Capacity of the bounded queue between receivers and the writer.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,

    #[serde(default = "default_os_receive_buffer_bytes")]
    pub os_receive_buffer_bytes: usize,

    #[serde(default = "default_stats_interval_seconds")]
    pub stats_interval_seconds: u64,

    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    pub listen: String,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    pub database: String,
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_workers() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

fn default_netflow() -> ProtocolConfig {
    ProtocolConfig {
        listen: "0.0.0.0:2055".to_string(),
        workers: default_workers(),
        enabled: default_enabled(),
    }
}

fn default_sflow() -> ProtocolConfig {
    ProtocolConfig {
        listen: "0.0.0.0:6343".to_string(),
        workers: default_workers(),
        enabled: default_enabled(),
    }
}

fn default_buffer_size() -> usize {
    10_000
}

fn default_flush_interval_seconds() -> u64 {
    5
}

fn default_os_receive_buffer_bytes() -> usize {
    26_214_400
}

fn default_stats_interval_seconds() -> u64 {
    30
}

fn default_db_port() -> u16 {
    5432
}

fn default_pool_size() -> u32 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            netflow: default_netflow(),
            sflow: default_sflow(),
            buffer_size: default_buffer_size(),
            flush_interval_seconds: default_flush_interval_seconds(),
            os_receive_buffer_bytes: default_os_receive_buffer_bytes(),
            stats_interval_seconds: default_stats_interval_seconds(),
            database: DatabaseConfig {
                host: "localhost".to_string(),
                port: default_db_port(),
                database: "flowdock".to_string(),
                user: "flowdock".to_string(),
                password: String::new(),
                pool_size: default_pool_size(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::de::from_str(&contents)?;
        Ok(config)
    }
}
