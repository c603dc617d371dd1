use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Minimum seconds between live refresh attempts.
    #[serde(default = "default_cache_ttl_sec")]
    pub cache_ttl_sec: u64,
    #[serde(default = "default_http_timeout_sec")]
    pub http_timeout_sec: u64,

    /// Daemon loop interval.
    #[serde(default = "default_poll_sec")]
    pub poll_sec: u64,
    /// Background persistence interval, independent of refreshes.
    #[serde(default = "default_persist_sec")]
    pub persist_sec: u64,

    #[serde(default = "default_state_path")]
    pub state_path: String,

    // Provider hosts, overridable for staging or local stubs
    #[serde(default = "default_coingecko_host")]
    pub coingecko_host: String,
    #[serde(default = "default_binance_host")]
    pub binance_host: String,
    #[serde(default = "default_cryptocompare_host")]
    pub cryptocompare_host: String,
}

fn default_cache_ttl_sec() -> u64 {
    300
}

fn default_http_timeout_sec() -> u64 {
    10
}

fn default_poll_sec() -> u64 {
    60
}

fn default_persist_sec() -> u64 {
    300
}

fn default_state_path() -> String {
    "astrokit_state.json".to_string()
}

fn default_coingecko_host() -> String {
    "https://api.coingecko.com".to_string()
}

fn default_binance_host() -> String {
    "https://api.binance.com".to_string()
}

fn default_cryptocompare_host() -> String {
    "https://min-api.cryptocompare.com".to_string()
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let c = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        Ok(c.try_deserialize()?)
    }
}
