use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Timeline notebook server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "timeline-server", version, about = "Timeline notebook server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "TIMELINE_PORT", default_value = "5000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "TIMELINE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./timeline.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "TIMELINE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, session key)
    #[arg(long, env = "TIMELINE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Directory for uploaded media (default: <data_dir>/uploads)
    #[arg(long, env = "TIMELINE_UPLOAD_DIR")]
    pub upload_dir: Option<String>,

    /// Directory for JSON backups (default: <data_dir>/backups)
    #[arg(long, env = "TIMELINE_BACKUP_DIR")]
    pub backup_dir: Option<String>,

    /// Maximum request body size in megabytes (uploads)
    #[arg(long, env = "TIMELINE_MAX_UPLOAD_SIZE_MB", default_value = "100")]
    pub max_upload_size_mb: u32,

    /// Session lifetime in hours
    #[arg(long, env = "TIMELINE_SESSION_TTL_HOURS", default_value = "168")]
    pub session_ttl_hours: i64,

    /// Mark the session cookie `Secure` (serve behind HTTPS)
    #[arg(long, env = "TIMELINE_SECURE_COOKIES")]
    pub secure_cookies: bool,

    /// Burst size of the per-IP rate limit on login/register
    #[arg(long, env = "TIMELINE_AUTH_BURST", default_value = "10")]
    pub auth_burst: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            config: "./timeline.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            upload_dir: None,
            backup_dir: None,
            max_upload_size_mb: 100,
            session_ttl_hours: 168,
            secure_cookies: false,
            auth_burst: 10,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (TIMELINE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("TIMELINE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn upload_path(&self) -> PathBuf {
        match &self.upload_dir {
            Some(dir) => PathBuf::from(dir),
            None => Path::new(&self.data_dir).join("uploads"),
        }
    }

    pub fn backup_path(&self) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => PathBuf::from(dir),
            None => Path::new(&self.data_dir).join("backups"),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_size_mb as usize * 1024 * 1024
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Timeline Notebook Server Configuration
# Place this file at ./timeline.toml or specify with --config <path>
# All settings can be overridden via environment variables (TIMELINE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and session signing key
# data_dir = "./data"

# Uploaded media and JSON backups (default: inside data_dir)
# upload_dir = "./data/uploads"
# backup_dir = "./data/backups"

# Maximum request body size in megabytes (default: 100)
# max_upload_size_mb = 100

# Session lifetime in hours (default: 168 = 7 days)
# session_ttl_hours = 168

# Set the Secure flag on the session cookie (enable behind HTTPS)
# secure_cookies = false

# Burst size of the per-IP rate limit on /api/login and /api/register
# auth_burst = 10
"#
    .to_string()
}
