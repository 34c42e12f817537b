// src/cache.rs
use crate::quotes::{latest_close, PriceSeries, QuoteSource};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct CacheState {
    series: HashMap<String, Arc<PriceSeries>>,
    last_refresh: Option<DateTime<Utc>>,
}

/// Per-symbol daily closes behind one shared staleness clock.
pub struct PriceCache {
    source: Arc<dyn QuoteSource>,
    ttl: Duration,
    fetch_timeout: std::time::Duration,
    state: RwLock<CacheState>,
    refresh: Mutex<()>,
}

impl PriceCache {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        ttl: Duration,
        fetch_timeout: std::time::Duration,
    ) -> Self {
        PriceCache {
            source,
            ttl,
            fetch_timeout,
            state: RwLock::new(CacheState::default()),
            refresh: Mutex::new(()),
        }
    }

    pub async fn ensure_fresh(&self, symbols: &[String]) {
        self.ensure_fresh_at(symbols, Utc::now()).await
    }

    /// Refetches every requested symbol when the cache is stale, otherwise
    /// only the absent ones. A failed fetch keeps whatever was cached before,
    /// or an empty series.
    pub async fn ensure_fresh_at(&self, symbols: &[String], now: DateTime<Utc>) {
        let _guard = self.refresh.lock().await;

        let to_fetch: Vec<String> = {
            let state = self.state.read().await;
            let stale = match state.last_refresh {
                Some(at) => now - at >= self.ttl,
                None => true,
            };
            let mut wanted: Vec<String> = symbols
                .iter()
                .filter(|s| stale || !state.series.contains_key(*s))
                .cloned()
                .collect();
            wanted.sort();
            wanted.dedup();
            wanted
        };

        if !to_fetch.is_empty() {
            debug!("Refreshing price series for {:?}", to_fetch);
        }

        let fetches = to_fetch.iter().map(|symbol| async move {
            let result =
                tokio::time::timeout(self.fetch_timeout, self.source.fetch_daily_series(symbol))
                    .await;
            let series = match result {
                Ok(Ok(series)) => Some(series),
                Ok(Err(e)) => {
                    warn!("Failed to fetch prices for {}: {}", symbol, e);
                    None
                }
                Err(_) => {
                    warn!("Timed out fetching prices for {}", symbol);
                    None
                }
            };
            (symbol, series)
        });
        let fetched = join_all(fetches).await;

        let mut state = self.state.write().await;
        for (symbol, series) in fetched {
            match series {
                Some(series) if !series.is_empty() => {
                    state.series.insert(symbol.clone(), Arc::new(series));
                }
                // A failed refetch keeps serving the old closes, and the stamp
                // below marks them fresh for another TTL.
                _ => {
                    state
                        .series
                        .entry(symbol.clone())
                        .or_insert_with(|| Arc::new(PriceSeries::new()));
                }
            }
        }
        state.last_refresh = Some(now);
        if !to_fetch.is_empty() {
            info!("Price cache refreshed {} symbols.", to_fetch.len());
        }
    }

    /// Cached series for `symbol`, fetching it first if absent.
    pub async fn series(&self, symbol: &str) -> Arc<PriceSeries> {
        if let Some(series) = self.cached(symbol).await {
            return series;
        }
        self.ensure_fresh(&[symbol.to_string()]).await;
        self.cached(symbol).await.unwrap_or_default()
    }

    /// Latest close, or 0 when nothing is known about the symbol.
    pub async fn current_price(&self, symbol: &str) -> f64 {
        let series = self.series(symbol).await;
        latest_close(&series).unwrap_or(0.0)
    }

    async fn cached(&self, symbol: &str) -> Option<Arc<PriceSeries>> {
        self.state.read().await.series.get(symbol).cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::MarketDataError;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned series; symbols without one fail like a dead upstream.
    pub(crate) struct FakeSource {
        pub series: HashMap<String, PriceSeries>,
        pub calls: AtomicUsize,
    }

    impl FakeSource {
        pub(crate) fn new(series: Vec<(&str, PriceSeries)>) -> Self {
            FakeSource {
                series: series.into_iter().map(|(s, p)| (s.to_string(), p)).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QuoteSource for FakeSource {
        async fn fetch_daily_series(&self, symbol: &str) -> Result<PriceSeries, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.series
                .get(symbol)
                .cloned()
                .ok_or_else(|| MarketDataError::Provider(format!("no route to {}", symbol)))
        }
    }

    pub(crate) fn series(points: &[(&str, f64)]) -> PriceSeries {
        points
            .iter()
            .map(|(d, p)| (NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap(), *p))
            .collect()
    }

    fn cache(source: Arc<FakeSource>) -> PriceCache {
        PriceCache::new(source, Duration::hours(1), std::time::Duration::from_secs(5))
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn fresh_cache_only_fetches_absent_symbols() {
        let source = Arc::new(FakeSource::new(vec![
            ("AAPL", series(&[("2024-05-31", 190.0)])),
            ("MSFT", series(&[("2024-05-31", 410.0)])),
        ]));
        let cache = cache(source.clone());

        cache.ensure_fresh_at(&["AAPL".into()], at(9, 0)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        cache
            .ensure_fresh_at(&["AAPL".into(), "MSFT".into()], at(9, 30))
            .await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_cache_refetches_everything() {
        let source = Arc::new(FakeSource::new(vec![
            ("AAPL", series(&[("2024-05-31", 190.0)])),
            ("MSFT", series(&[("2024-05-31", 410.0)])),
        ]));
        let cache = cache(source.clone());
        let both = vec!["AAPL".to_string(), "MSFT".to_string()];

        cache.ensure_fresh_at(&both, at(9, 0)).await;
        cache.ensure_fresh_at(&both, at(10, 0)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failed_symbol_does_not_block_others() {
        let source = Arc::new(FakeSource::new(vec![(
            "AAPL",
            series(&[("2024-05-30", 189.0), ("2024-05-31", 190.0)]),
        )]));
        let cache = cache(source.clone());

        cache
            .ensure_fresh_at(&["AAPL".into(), "NOPE".into()], at(9, 0))
            .await;
        assert_eq!(cache.current_price("AAPL").await, 190.0);
        assert_eq!(cache.current_price("NOPE").await, 0.0);
        assert!(cache.series("NOPE").await.is_empty());
        // the empty entry counts as present until the cache goes stale
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn current_price_fetches_on_miss() {
        let source = Arc::new(FakeSource::new(vec![(
            "AAPL",
            series(&[("2024-05-31", 190.0), ("2023-12-29", 192.5)]),
        )]));
        let cache = cache(source.clone());

        assert_eq!(cache.current_price("AAPL").await, 190.0);
        assert_eq!(cache.current_price("AAPL").await, 190.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
