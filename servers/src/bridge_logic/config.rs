use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "CPD bridge: WebSocket topic subscriptions over the CPD gRPC service", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "CPD_BRIDGE_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "CPD_BRIDGE_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "CPD_BRIDGE_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "CPD_BRIDGE_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "CPD_ADDRESS", help = "CPD gRPC service address (host:port). Empty defers initialization.")]
    pub cpd_address: Option<String>,

    #[clap(long, env = "CPD_USE_TLS", help = "Use TLS towards the CPD service (true/false).")]
    pub cpd_use_tls: Option<bool>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file for client connections.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file for client connections.")]
    pub tls_key_path: Option<PathBuf>,
}

/// Fully resolved settings used by the running server.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub cpd_address: String,
    pub cpd_use_tls: bool,
    /// Certificate and key; plain WebSocket when absent.
    pub tls: Option<(PathBuf, PathBuf)>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            cpd_address: other.cpd_address.or(self.cpd_address),
            cpd_use_tls: other.cpd_use_tls.or(self.cpd_use_tls),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(9010),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            cpd_address: Some(String::new()),
            cpd_use_tls: Some(false),
            ..Default::default()
        }
    }

    fn into_settings(self) -> BridgeSettings {
        let tls = match (self.tls_cert_path, self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            _ => {
                log::warn!("Both TLS_CERT_PATH and TLS_KEY_PATH are needed for TLS; serving plain WebSocket.");
                None
            }
        };

        BridgeSettings {
            port: self.port.unwrap_or(9010),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            cpd_address: self.cpd_address.unwrap_or_default(),
            cpd_use_tls: self.cpd_use_tls.unwrap_or(false),
            tls,
        }
    }
}

pub fn load_config() -> BridgeSettings {
    resolve(Config::parse())
}

/// Defaults, then the JSON file, then CLI/env values.
pub fn resolve(cli_args: Config) -> BridgeSettings {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_cpd_bridge.conf"));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<Config>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                log::warn!("Failed to parse config file: {}. Falling back to other sources.", config_file_path.display());
            }
        } else {
            log::warn!("Failed to read config file: {}. Falling back to other sources.", config_file_path.display());
        }
    } else {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", config_file_path.display());
    }

    current_config.merge(cli_args).into_settings()
}
