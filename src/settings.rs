/// This module loads node configuration from an optional `Settings.toml` plus
/// `SOLGRID_`-prefixed environment variables (the latter winning), with
/// `.env` files honored via dotenv in `main`. Retry and pricing constants
/// live here rather than in code; the observed defaults are 5 attempts with
/// a fixed 1 second delay.
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// HTTP bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// RocksDB directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Ordered, redundant Solana RPC endpoints. The first is initially active.
    #[serde(default = "default_rpc_endpoints")]
    pub rpc_endpoints: Vec<String>,

    /// Treasury wallet address receiving purchase payments.
    pub treasury: String,

    /// Path to the payer keypair file.
    pub keypair_path: String,

    /// Price of one pixel in SOL. One grid cell is 100 pixels.
    #[serde(default = "default_price_per_pixel_sol")]
    pub price_per_pixel_sol: f64,

    /// Payment attempt budget across all endpoints.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between payment attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-RPC-call timeout, in seconds.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    /// Sleep between confirmation-status polls, in milliseconds.
    #[serde(default = "default_confirm_poll_ms")]
    pub confirm_poll_ms: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_db_path() -> String {
    "./solgrid-db".to_string()
}

fn default_rpc_endpoints() -> Vec<String> {
    vec![
        "https://api.devnet.solana.com".to_string(),
        "https://devnet.genesysgo.net".to_string(),
    ]
}

fn default_price_per_pixel_sol() -> f64 {
    0.01
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_confirm_poll_ms() -> u64 {
    500
}

impl Settings {
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("Settings").required(false))
            .add_source(
                config::Environment::with_prefix("SOLGRID")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("rpc_endpoints"),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_retry_behavior() {
        let settings: Settings = serde_json::from_str(
            r#"{"treasury": "11111111111111111111111111111111", "keypair_path": "payer.json"}"#,
        )
        .unwrap();
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.retry_delay_ms, 1_000);
        assert!(!settings.rpc_endpoints.is_empty());
        assert_eq!(settings.price_per_pixel_sol, 0.01);
    }
}
