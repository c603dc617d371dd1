use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::feed::PriceFeed;
use crate::store::StateStore;
use crate::types::{
    fallback_point, AggregatorState, Asset, PricePoint, ProviderId, Quote, TRACKED_ASSETS,
};

/// Owns the tracked quote set. Rotates through providers in fixed order,
/// gates refreshes on a minimum TTL, degrades to the static fallback table
/// when every provider fails, and persists state so a restart does not blank
/// the cache.
pub struct PriceAggregator {
    state: Mutex<AggregatorState>,
    providers: Vec<Box<dyn PriceFeed>>,
    cache_ttl: Duration,
    store: StateStore,
}

impl PriceAggregator {
    /// Hydrates from the last persisted snapshot when one exists.
    pub async fn new(
        providers: Vec<Box<dyn PriceFeed>>,
        cache_ttl_sec: u64,
        store: StateStore,
    ) -> Self {
        let state = match store.load().await {
            Some(s) => {
                info!(cursor = s.provider_cursor, "hydrated aggregator state from disk");
                s
            }
            None => AggregatorState::empty(),
        };
        Self {
            state: Mutex::new(state),
            providers,
            cache_ttl: Duration::seconds(cache_ttl_sec as i64),
            store,
        }
    }

    /// Refresh the cache if it is stale. Never fails: a provider error
    /// rotates to the next provider, and total exhaustion applies the
    /// fallback table. Callers always see a normal return.
    ///
    /// The whole pass runs under the state lock, so concurrent callers queue
    /// behind an in-flight refresh and then take the cache-hit path instead
    /// of launching redundant provider calls.
    pub async fn ensure_fresh(&self) {
        let mut state = self.state.lock().await;

        if let Some(last) = state.last_refresh_time {
            if Utc::now() - last < self.cache_ttl {
                debug!("cache fresh, skipping refresh");
                return;
            }
        }

        let now = Utc::now();

        // Advance the cursor before each attempt so repeated failures do not
        // hammer the same provider, and at most one attempt per provider.
        for _ in 0..self.providers.len() {
            state.provider_cursor = (state.provider_cursor + 1) % self.providers.len();
            let provider = &self.providers[state.provider_cursor];
            let id = provider.id();

            match provider.fetch(&TRACKED_ASSETS).await {
                Ok(points) if !points.is_empty() => {
                    let assets = points.len();
                    apply_points(&mut state, points, now, id);
                    state.last_refresh_time = Some(now);
                    info!(provider = id.as_str(), assets, "quotes refreshed");
                    self.persist(&state).await;
                    return;
                }
                Ok(_) => {
                    warn!(provider = id.as_str(), "provider returned no tracked assets, rotating")
                }
                Err(e) => warn!(provider = id.as_str(), error = %e, "provider fetch failed, rotating"),
            }
        }

        // Every provider failed this pass. Overwrite all slots so the
        // degraded state is uniform rather than a patchwork of stale and
        // fallback values. last_refresh_time records successful provider
        // calls only, so the next call retries the live providers.
        for asset in TRACKED_ASSETS {
            let p = fallback_point(asset);
            state.quotes.insert(
                asset,
                Some(Quote {
                    price: p.price,
                    change_24h: p.change_24h,
                    last_updated: now,
                    source: ProviderId::Fallback,
                }),
            );
        }
        warn!("all providers failed, serving fallback quotes");
        self.persist(&state).await;
    }

    /// Snapshot of the current quote map for the UI layer. Possibly stale,
    /// possibly fallback, possibly unset before the first refresh.
    pub async fn quotes(&self) -> HashMap<Asset, Option<Quote>> {
        self.state.lock().await.quotes.clone()
    }

    /// Persist the current state, used by the periodic background timer.
    /// The snapshot is cloned under the lock and written after the guard is
    /// released, so a slow disk cannot block readers or a pending refresh.
    pub async fn persist_now(&self) {
        let snapshot = self.state.lock().await.clone();
        self.persist(&snapshot).await;
    }

    // Persistence is best effort; a failed write never fails the refresh.
    async fn persist(&self, state: &AggregatorState) {
        if let Err(e) = self.store.save(state).await {
            warn!(error = %e, "state persist failed");
        }
    }
}

fn apply_points(
    state: &mut AggregatorState,
    points: HashMap<Asset, PricePoint>,
    now: DateTime<Utc>,
    source: ProviderId,
) {
    for (asset, p) in points {
        state.quotes.insert(
            asset,
            Some(Quote {
                price: p.price,
                change_24h: p.change_24h,
                last_updated: now,
                source,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Plays back a fixed per-call script; `None` steps fail, the last step
    /// repeats once the script runs out.
    struct ScriptedFeed {
        id: ProviderId,
        calls: Arc<AtomicUsize>,
        script: Vec<Option<HashMap<Asset, PricePoint>>>,
    }

    #[async_trait]
    impl PriceFeed for ScriptedFeed {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn fetch(&self, _assets: &[Asset]) -> anyhow::Result<HashMap<Asset, PricePoint>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .get(n)
                .or_else(|| self.script.last())
                .cloned()
                .flatten()
                .ok_or_else(|| anyhow::anyhow!("scripted failure"))
        }
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn full_map(price: f64) -> HashMap<Asset, PricePoint> {
        TRACKED_ASSETS
            .iter()
            .map(|&a| (a, PricePoint { price, change_24h: 1.0 }))
            .collect()
    }

    fn ok_feed(id: ProviderId, calls: Arc<AtomicUsize>) -> Box<dyn PriceFeed> {
        Box::new(ScriptedFeed { id, calls, script: vec![Some(full_map(100.0))] })
    }

    fn err_feed(id: ProviderId, calls: Arc<AtomicUsize>) -> Box<dyn PriceFeed> {
        Box::new(ScriptedFeed { id, calls, script: vec![None] })
    }

    fn store_in(dir: &tempfile::TempDir) -> StateStore {
        StateStore::new(dir.path().join("state.json"))
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let calls = counter();
        let agg = PriceAggregator::new(
            vec![ok_feed(ProviderId::CoinGecko, calls.clone())],
            300,
            store_in(&dir),
        )
        .await;

        agg.ensure_fresh().await;
        agg.ensure_fresh().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rotation_stops_at_first_success() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = (counter(), counter(), counter());
        // Cursor starts at 0 and advances before each attempt, so the first
        // attempt hits the second provider in the list.
        let agg = PriceAggregator::new(
            vec![
                ok_feed(ProviderId::CoinGecko, a.clone()),
                err_feed(ProviderId::Binance, b.clone()),
                ok_feed(ProviderId::CryptoCompare, c.clone()),
            ],
            300,
            store_in(&dir),
        )
        .await;

        agg.ensure_fresh().await;

        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(c.load(Ordering::SeqCst), 1);
        assert_eq!(a.load(Ordering::SeqCst), 0);

        let quotes = agg.quotes().await;
        for asset in TRACKED_ASSETS {
            assert_eq!(
                quotes[&asset].as_ref().unwrap().source,
                ProviderId::CryptoCompare
            );
        }
    }

    #[tokio::test]
    async fn total_failure_applies_fallback_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = (counter(), counter(), counter());
        let agg = PriceAggregator::new(
            vec![
                err_feed(ProviderId::CoinGecko, a.clone()),
                err_feed(ProviderId::Binance, b.clone()),
                err_feed(ProviderId::CryptoCompare, c.clone()),
            ],
            300,
            store_in(&dir),
        )
        .await;

        agg.ensure_fresh().await;

        // At most one attempt per provider per call.
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(c.load(Ordering::SeqCst), 1);

        let quotes = agg.quotes().await;
        for asset in TRACKED_ASSETS {
            let q = quotes[&asset].as_ref().unwrap();
            let expected = fallback_point(asset);
            assert_eq!(q.source, ProviderId::Fallback);
            assert_eq!(q.price, expected.price);
            assert_eq!(q.change_24h, expected.change_24h);
        }
    }

    #[tokio::test]
    async fn degraded_state_retries_live_providers_next_call() {
        let dir = tempfile::tempdir().unwrap();
        let calls = counter();
        let agg = PriceAggregator::new(
            vec![err_feed(ProviderId::CoinGecko, calls.clone())],
            300,
            store_in(&dir),
        )
        .await;

        agg.ensure_fresh().await;
        agg.ensure_fresh().await;

        // Fallback does not count as a successful refresh, so the TTL gate
        // does not suppress the second attempt.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let quotes = agg.quotes().await;
        assert_eq!(
            quotes[&Asset::Btc].as_ref().unwrap().source,
            ProviderId::Fallback
        );
    }

    #[tokio::test]
    async fn partial_update_retains_previous_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let calls = counter();
        let mut partial = HashMap::new();
        partial.insert(Asset::Btc, PricePoint { price: 200.0, change_24h: 2.0 });
        partial.insert(Asset::Ton, PricePoint { price: 7.0, change_24h: -1.0 });

        let feed = Box::new(ScriptedFeed {
            id: ProviderId::CoinGecko,
            calls: calls.clone(),
            script: vec![Some(full_map(100.0)), Some(partial)],
        });
        // Zero TTL so both calls refresh.
        let agg = PriceAggregator::new(vec![feed], 0, store_in(&dir)).await;

        agg.ensure_fresh().await;
        let first = agg.quotes().await;
        let eth_before = first[&Asset::Eth].clone().unwrap();

        agg.ensure_fresh().await;
        let quotes = agg.quotes().await;

        assert_eq!(quotes[&Asset::Btc].as_ref().unwrap().price, 200.0);
        assert_eq!(quotes[&Asset::Ton].as_ref().unwrap().price, 7.0);
        // ETH was omitted from the second response and keeps its old quote.
        let eth = quotes[&Asset::Eth].as_ref().unwrap();
        assert_eq!(eth.price, eth_before.price);
        assert_eq!(eth.last_updated, eth_before.last_updated);
    }

    #[tokio::test]
    async fn successful_refresh_persists_state() {
        let dir = tempfile::tempdir().unwrap();
        let agg = PriceAggregator::new(
            vec![ok_feed(ProviderId::Binance, counter())],
            300,
            store_in(&dir),
        )
        .await;

        agg.ensure_fresh().await;

        let loaded = store_in(&dir).load().await.unwrap();
        assert!(loaded.last_refresh_time.is_some());
        assert_eq!(
            loaded.quotes[&Asset::Btc].as_ref().unwrap().source,
            ProviderId::Binance
        );
    }

    #[tokio::test]
    async fn hydrated_fresh_state_serves_quotes_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();

        let mut persisted = AggregatorState::empty();
        persisted.quotes.insert(
            Asset::Btc,
            Some(Quote {
                price: 61_500.0,
                change_24h: 0.7,
                last_updated: now,
                source: ProviderId::CoinGecko,
            }),
        );
        persisted.last_refresh_time = Some(now);
        store_in(&dir).save(&persisted).await.unwrap();

        let calls = counter();
        let agg = PriceAggregator::new(
            vec![ok_feed(ProviderId::Binance, calls.clone())],
            300,
            store_in(&dir),
        )
        .await;

        agg.ensure_fresh().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let quotes = agg.quotes().await;
        assert_eq!(quotes[&Asset::Btc].as_ref().unwrap().price, 61_500.0);
        assert!(quotes[&Asset::Eth].is_none());
    }

    #[tokio::test]
    async fn persist_now_writes_current_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let agg = PriceAggregator::new(
            vec![ok_feed(ProviderId::CoinGecko, counter())],
            300,
            store_in(&dir),
        )
        .await;
        agg.ensure_fresh().await;
        tokio::fs::remove_file(dir.path().join("state.json"))
            .await
            .unwrap();

        agg.persist_now().await;

        let loaded = store_in(&dir).load().await.unwrap();
        assert!(loaded.last_refresh_time.is_some());
        assert_eq!(
            loaded.quotes[&Asset::Btc].as_ref().unwrap().source,
            ProviderId::CoinGecko
        );
    }

    #[tokio::test]
    async fn no_providers_configured_degrades_to_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let agg = PriceAggregator::new(vec![], 300, store_in(&dir)).await;

        agg.ensure_fresh().await;

        let quotes = agg.quotes().await;
        for asset in TRACKED_ASSETS {
            assert_eq!(
                quotes[&asset].as_ref().unwrap().source,
                ProviderId::Fallback
            );
        }
    }
}
