use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::feed::PriceFeed;
use crate::types::{Asset, PricePoint, ProviderId};

/// Full-market snapshot provider: one GET /data/pricemultifull. The response
/// is nested under RAW and keyed by raw exchange ticker, so tickers are
/// remapped onto tracked assets before merging.
pub struct CryptoCompareFeed {
    host: String,
    http: reqwest::Client,
}

impl CryptoCompareFeed {
    pub fn new(host: String, http: reqwest::Client) -> Self {
        Self { host, http }
    }
}

#[async_trait]
impl PriceFeed for CryptoCompareFeed {
    fn id(&self) -> ProviderId {
        ProviderId::CryptoCompare
    }

    async fn fetch(&self, assets: &[Asset]) -> Result<HashMap<Asset, PricePoint>> {
        let fsyms: Vec<&str> = assets.iter().map(|a| a.ticker()).collect();
        let url = format!("{}/data/pricemultifull", self.host.trim_end_matches('/'));

        let resp = self
            .http
            .get(url)
            .query(&[("fsyms", fsyms.join(",").as_str()), ("tsyms", "USD")])
            .send()
            .await
            .context("GET /data/pricemultifull failed")?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            bail!("cryptocompare: rate limited (429)");
        }

        let snapshot: FullSnapshot = resp
            .error_for_status()
            .context("GET /data/pricemultifull non-200")?
            .json()
            .await
            .context("decode pricemultifull json failed")?;

        let out = remap_raw(assets, &snapshot);
        if out.is_empty() {
            bail!("cryptocompare: no tracked assets in response");
        }
        Ok(out)
    }
}

fn remap_raw(assets: &[Asset], snapshot: &FullSnapshot) -> HashMap<Asset, PricePoint> {
    let mut out = HashMap::new();
    for (ticker, by_currency) in &snapshot.raw {
        let asset = match Asset::from_ticker(ticker) {
            Some(a) if assets.contains(&a) => a,
            _ => continue,
        };
        if let Some(tick) = by_currency.get("USD") {
            out.insert(
                asset,
                PricePoint {
                    price: tick.price,
                    change_24h: tick.change_pct_24h,
                },
            );
        }
    }
    out
}

#[derive(Debug, Clone, Deserialize)]
struct FullSnapshot {
    #[serde(rename = "RAW", default)]
    raw: HashMap<String, HashMap<String, RawTick>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTick {
    #[serde(rename = "PRICE")]
    price: f64,
    #[serde(rename = "CHANGEPCT24HOUR")]
    change_pct_24h: f64,
}
