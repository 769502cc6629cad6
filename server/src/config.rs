use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// duet presence and message relay server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "duet-server", version, about = "duet presence and message relay server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "DUET_PORT", default_value = "4000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "DUET_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./duet.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "DUET_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (signing key)
    #[arg(long, env = "DUET_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Base URL of the durable message store
    #[arg(long, env = "DUET_STORE_BASE_URL", default_value = "http://127.0.0.1:3000")]
    pub store_base_url: String,

    /// Seconds to wait for a store write before delivering unpersisted
    #[arg(long, env = "DUET_STORE_TIMEOUT_SECS", default_value = "5")]
    pub store_timeout_secs: u64,

    /// Token-info endpoint of the federated identity issuer
    #[arg(
        long,
        env = "DUET_FEDERATED_TOKENINFO_URL",
        default_value = "https://oauth2.googleapis.com/tokeninfo"
    )]
    pub federated_tokeninfo_url: String,

    /// Expected audience for federated tokens. Leave unset to accept only
    /// locally issued tokens.
    #[arg(long, env = "DUET_FEDERATED_AUDIENCE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federated_audience: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            bind_address: "0.0.0.0".to_string(),
            config: "./duet.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            store_base_url: "http://127.0.0.1:3000".to_string(),
            store_timeout_secs: 5,
            federated_tokeninfo_url: "https://oauth2.googleapis.com/tokeninfo".to_string(),
            federated_audience: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (DUET_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("DUET_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# duet relay server configuration
# Place this file at ./duet.toml or specify with --config <path>
# All settings can be overridden via environment variables (DUET_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4000)
# port = 4000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the HS256 signing key
# data_dir = "./data"

# ---- Durable message store ----

# Base URL of the store service; messages are forwarded best-effort to
# POST {store_base_url}/api/messages
# store_base_url = "http://127.0.0.1:3000"

# Seconds to wait for a store write before delivering unpersisted
# store_timeout_secs = 5

# ---- Federated identity ----

# Token-info endpoint used to verify federated bearer tokens
# federated_tokeninfo_url = "https://oauth2.googleapis.com/tokeninfo"

# Expected audience claim for federated tokens. When unset, only locally
# issued tokens authenticate.
# federated_audience = ""
"#
    .to_string()
}
