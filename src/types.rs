use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fixed set of tracked assets. One slot per asset is created at startup and
/// never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Btc,
    Eth,
    Ton,
}

pub const TRACKED_ASSETS: [Asset; 3] = [Asset::Btc, Asset::Eth, Asset::Ton];

impl Asset {
    pub fn ticker(self) -> &'static str {
        match self {
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
            Asset::Ton => "TON",
        }
    }

    /// CoinGecko asset id used by the /simple/price batch endpoint.
    pub fn coingecko_id(self) -> &'static str {
        match self {
            Asset::Btc => "bitcoin",
            Asset::Eth => "ethereum",
            Asset::Ton => "the-open-network",
        }
    }

    /// USDT trading pair used by the per-symbol ticker endpoint.
    pub fn binance_pair(self) -> &'static str {
        match self {
            Asset::Btc => "BTCUSDT",
            Asset::Eth => "ETHUSDT",
            Asset::Ton => "TONUSDT",
        }
    }

    /// Map a raw exchange ticker back to a tracked asset.
    pub fn from_ticker(s: &str) -> Option<Asset> {
        match s.to_ascii_uppercase().as_str() {
            "BTC" => Some(Asset::Btc),
            "ETH" => Some(Asset::Eth),
            "TON" => Some(Asset::Ton),
            _ => None,
        }
    }
}

/// Tag identifying which provider (or the static fallback) produced a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    CoinGecko,
    Binance,
    CryptoCompare,
    Fallback,
}

impl ProviderId {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::CoinGecko => "coingecko",
            ProviderId::Binance => "binance",
            ProviderId::CryptoCompare => "cryptocompare",
            ProviderId::Fallback => "fallback",
        }
    }
}

/// One provider's parsed output for a single asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub price: f64,
    pub change_24h: f64,
}

/// One asset's current market state. A slot holds `Option<Quote>`, so price,
/// change and source are always populated together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub change_24h: f64,
    pub last_updated: DateTime<Utc>,
    pub source: ProviderId,
}

/// Process-wide aggregator state: the quote map plus rotation bookkeeping.
/// This is exactly the shape that gets persisted between restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorState {
    pub quotes: HashMap<Asset, Option<Quote>>,
    pub last_refresh_time: Option<DateTime<Utc>>,
    pub provider_cursor: usize,
}

impl AggregatorState {
    pub fn empty() -> Self {
        let mut quotes = HashMap::with_capacity(TRACKED_ASSETS.len());
        for asset in TRACKED_ASSETS {
            quotes.insert(asset, None);
        }
        Self {
            quotes,
            last_refresh_time: None,
            provider_cursor: 0,
        }
    }

    /// Seed slots for any tracked asset missing from a persisted snapshot, so
    /// the map is always fully keyed regardless of what was loaded.
    pub fn ensure_tracked(&mut self) {
        for asset in TRACKED_ASSETS {
            self.quotes.entry(asset).or_insert(None);
        }
    }
}

/// Static last-resort values substituted when every live provider fails.
pub fn fallback_point(asset: Asset) -> PricePoint {
    match asset {
        Asset::Btc => PricePoint { price: 65_000.0, change_24h: 0.0 },
        Asset::Eth => PricePoint { price: 3_000.0, change_24h: 0.0 },
        Asset::Ton => PricePoint { price: 5.5, change_24h: 0.0 },
    }
}
