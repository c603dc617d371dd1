use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::feed::PriceFeed;
use crate::types::{Asset, PricePoint, ProviderId};

/// Per-symbol ticker provider: one GET /ticker/24hr per tracked asset.
/// A rate-limit response on any symbol aborts the whole call and discards
/// quotes already fetched this round (all-or-nothing).
pub struct BinanceFeed {
    host: String,
    http: reqwest::Client,
}

impl BinanceFeed {
    pub fn new(host: String, http: reqwest::Client) -> Self {
        Self { host, http }
    }
}

#[async_trait]
impl PriceFeed for BinanceFeed {
    fn id(&self) -> ProviderId {
        ProviderId::Binance
    }

    async fn fetch(&self, assets: &[Asset]) -> Result<HashMap<Asset, PricePoint>> {
        let url = format!("{}/api/v3/ticker/24hr", self.host.trim_end_matches('/'));
        let mut out = HashMap::with_capacity(assets.len());

        for &asset in assets {
            let resp = self
                .http
                .get(&url)
                .query(&[("symbol", asset.binance_pair())])
                .send()
                .await
                .with_context(|| format!("GET /ticker/24hr for {} failed", asset.ticker()))?;

            if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                bail!("binance: rate limited (429) on {}", asset.ticker());
            }

            let ticker: Ticker24h = resp
                .error_for_status()
                .with_context(|| format!("GET /ticker/24hr for {} non-200", asset.ticker()))?
                .json()
                .await
                .with_context(|| format!("decode ticker json for {} failed", asset.ticker()))?;

            out.insert(
                asset,
                parse_ticker(&ticker)
                    .with_context(|| format!("parse ticker fields for {} failed", asset.ticker()))?,
            );
        }

        if out.is_empty() {
            bail!("binance: no tracked assets fetched");
        }
        Ok(out)
    }
}

// Binance serializes numeric fields as JSON strings.
fn parse_ticker(t: &Ticker24h) -> Result<PricePoint> {
    Ok(PricePoint {
        price: t.last_price.parse()?,
        change_24h: t.price_change_percent.parse()?,
    })
}

#[derive(Debug, Clone, Deserialize)]
struct Ticker24h {
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: String,
}
