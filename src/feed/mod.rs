pub mod binance;
pub mod coingecko;
pub mod cryptocompare;

use crate::types::{Asset, PricePoint, ProviderId};
use async_trait::async_trait;
use std::collections::HashMap;

/// Abstraction over one upstream price source (CoinGecko, Binance, CryptoCompare).
#[async_trait]
pub trait PriceFeed: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Attempt one fetch for the tracked assets. A partial map is a valid
    /// success for batch providers; an error sends the rotation on to the
    /// next provider.
    async fn fetch(&self, assets: &[Asset]) -> anyhow::Result<HashMap<Asset, PricePoint>>;
}

pub use binance::BinanceFeed;
pub use coingecko::CoinGeckoFeed;
pub use cryptocompare::CryptoCompareFeed;
