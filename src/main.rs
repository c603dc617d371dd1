mod aggregator;
mod config;
mod feed;
mod store;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::aggregator::PriceAggregator;
use crate::config::Settings;
use crate::feed::{BinanceFeed, CoinGeckoFeed, CryptoCompareFeed, PriceFeed};
use crate::store::StateStore;
use crate::types::TRACKED_ASSETS;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let s = Settings::from_env()?;

    // One shared client; a hung upstream is cut off by the request timeout
    // and counts as a provider failure.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(s.http_timeout_sec))
        .build()?;

    // Fixed rotation order; the persisted cursor decides where it resumes.
    let providers: Vec<Box<dyn PriceFeed>> = vec![
        Box::new(CoinGeckoFeed::new(s.coingecko_host.clone(), http.clone())),
        Box::new(BinanceFeed::new(s.binance_host.clone(), http.clone())),
        Box::new(CryptoCompareFeed::new(s.cryptocompare_host.clone(), http.clone())),
    ];

    let store = StateStore::new(s.state_path.clone());
    let agg = Arc::new(PriceAggregator::new(providers, s.cache_ttl_sec, store).await);

    // Periodic snapshot independent of refreshes, best effort.
    let persister = agg.clone();
    let persist_every = Duration::from_secs(s.persist_sec);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(persist_every);
        tick.tick().await;
        loop {
            tick.tick().await;
            persister.persist_now().await;
        }
    });

    tracing::info!(
        ttl_sec = s.cache_ttl_sec,
        poll_sec = s.poll_sec,
        "price aggregator started"
    );

    loop {
        agg.ensure_fresh().await;

        let quotes = agg.quotes().await;
        for asset in TRACKED_ASSETS {
            match quotes.get(&asset).and_then(|q| q.as_ref()) {
                Some(q) => tracing::info!(
                    asset = asset.ticker(),
                    price = q.price,
                    change_24h = q.change_24h,
                    source = q.source.as_str(),
                    "quote"
                ),
                None => tracing::info!(asset = asset.ticker(), "quote not yet available"),
            }
        }

        tokio::time::sleep(Duration::from_secs(s.poll_sec)).await;
    }
}
