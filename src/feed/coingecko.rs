use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::feed::PriceFeed;
use crate::types::{Asset, PricePoint, ProviderId};

/// Batch provider: one GET /simple/price for all tracked assets. An asset
/// missing from the body is simply not updated this round; zero parsed
/// assets counts as a failure.
pub struct CoinGeckoFeed {
    host: String,
    http: reqwest::Client,
}

impl CoinGeckoFeed {
    pub fn new(host: String, http: reqwest::Client) -> Self {
        Self { host, http }
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoFeed {
    fn id(&self) -> ProviderId {
        ProviderId::CoinGecko
    }

    async fn fetch(&self, assets: &[Asset]) -> Result<HashMap<Asset, PricePoint>> {
        let ids: Vec<&str> = assets.iter().map(|a| a.coingecko_id()).collect();
        let url = format!("{}/api/v3/simple/price", self.host.trim_end_matches('/'));

        let resp = self
            .http
            .get(url)
            .query(&[
                ("ids", ids.join(",").as_str()),
                ("vs_currencies", "usd"),
                ("include_24hr_change", "true"),
            ])
            .send()
            .await
            .context("GET /simple/price failed")?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            bail!("coingecko: rate limited (429)");
        }

        let body: HashMap<String, CgEntry> = resp
            .error_for_status()
            .context("GET /simple/price non-200")?
            .json()
            .await
            .context("decode /simple/price json failed")?;

        let out = map_entries(assets, &body);
        if out.is_empty() {
            bail!("coingecko: no tracked assets in response");
        }
        Ok(out)
    }
}

fn map_entries(assets: &[Asset], body: &HashMap<String, CgEntry>) -> HashMap<Asset, PricePoint> {
    let mut out = HashMap::new();
    for &asset in assets {
        if let Some(entry) = body.get(asset.coingecko_id()) {
            // Price and change must arrive together for the quote to count.
            if let (Some(price), Some(change_24h)) = (entry.usd, entry.usd_24h_change) {
                out.insert(asset, PricePoint { price, change_24h });
            }
        }
    }
    out
}

#[derive(Debug, Clone, Deserialize)]
struct CgEntry {
    usd: Option<f64>,
    usd_24h_change: Option<f64>,
}
