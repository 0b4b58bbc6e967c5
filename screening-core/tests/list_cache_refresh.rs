//! Consolidated list cache refresh behaviour

mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use screening_core::evidence::InMemoryObjectStore;
    use screening_core::list_cache::{
        ConsolidatedListCache, LIST_SNAPSHOT_KEY, LIST_SNAPSHOT_META_KEY,
    };
    use screening_core::normalizer::normalize;
    use screening_core::{Error, ManualClock, SearchType};
    use std::sync::Arc;
    use std::time::Duration;

    fn cache(
        fetcher: Arc<CountingFetcher>,
        clock: Arc<ManualClock>,
        store: Option<Arc<InMemoryObjectStore>>,
    ) -> Arc<ConsolidatedListCache> {
        let cache = ConsolidatedListCache::new(fetcher, clock, chrono::Duration::hours(24), 5);
        Arc::new(match store {
            Some(store) => cache.with_backing_store(store),
            None => cache,
        })
    }

    async fn concurrent_lookups(cache: &Arc<ConsolidatedListCache>, n: usize) {
        let name = normalize("Sidorov", SearchType::Person).unwrap();
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let cache = cache.clone();
                let name = name.clone();
                tokio::spawn(async move { cache.lookup(&name).await })
            })
            .collect();

        for handle in handles {
            let lookup = handle.await.unwrap().unwrap();
            assert!(lookup.matches.found);
            assert!(!lookup.stale);
        }
    }

    #[tokio::test]
    async fn test_single_flight_refresh() {
        let clock = start_clock();
        let fetcher = CountingFetcher::with_delay(SAMPLE_LIST, Duration::from_millis(100));
        let cache = cache(fetcher.clone(), clock.clone(), None);

        concurrent_lookups(&cache, 10).await;
        assert_eq!(fetcher.calls(), 1);

        clock.advance(chrono::Duration::hours(24) - chrono::Duration::seconds(1));
        concurrent_lookups(&cache, 10).await;
        assert_eq!(fetcher.calls(), 1);

        clock.advance(chrono::Duration::seconds(1));
        concurrent_lookups(&cache, 10).await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_snapshot_served_when_refresh_fails() {
        let clock = start_clock();
        let fetcher = CountingFetcher::new(SAMPLE_LIST);
        let cache = cache(fetcher.clone(), clock.clone(), None);
        let name = normalize("Sidorov", SearchType::Person).unwrap();

        let fresh = cache.lookup(&name).await.unwrap();
        assert!(!fresh.stale);

        fetcher.set_failing(true);
        clock.advance(chrono::Duration::hours(25));

        let stale = cache.lookup(&name).await.unwrap();
        assert!(stale.stale);
        assert!(stale.matches.found);
        assert_eq!(stale.snapshot.sha256, fresh.snapshot.sha256);
        assert_eq!(stale.snapshot.fetched_at, fresh.snapshot.fetched_at);
        assert_eq!(fetcher.calls(), 2);

        // Failed refreshes are not retried on every request
        cache.lookup(&name).await.unwrap();
        assert_eq!(fetcher.calls(), 2);

        clock.advance(chrono::Duration::seconds(61));
        fetcher.set_failing(false);
        let recovered = cache.lookup(&name).await.unwrap();
        assert!(!recovered.stale);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_no_snapshot_and_failing_source() {
        let cache = cache(CountingFetcher::failing(), start_clock(), None);
        let name = normalize("Sidorov", SearchType::Person).unwrap();

        assert!(matches!(
            cache.lookup(&name).await,
            Err(Error::SourceUnavailable { .. })
        ));
        assert!(!cache.is_ready().await);
    }

    #[tokio::test]
    async fn test_unparseable_download_rejected() {
        let cache = cache(
            CountingFetcher::new("<html><body>maintenance</body></html>"),
            start_clock(),
            None,
        );

        assert!(cache.warm_start().await.is_err());
        assert!(cache.snapshot_info().await.is_none());
    }

    #[tokio::test]
    async fn test_warm_start_from_backing_copy() {
        let clock = start_clock();
        let store = Arc::new(InMemoryObjectStore::new("sanctions-audit", clock.clone()));

        let first = cache(CountingFetcher::new(SAMPLE_LIST), clock.clone(), Some(store.clone()));
        let snapshot = first.warm_start().await.unwrap();
        assert_eq!(snapshot.entries, 3);
        assert!(store.contains(LIST_SNAPSHOT_KEY));
        assert!(store.contains(LIST_SNAPSHOT_META_KEY));

        // Restart within the refresh window: no download needed
        let offline = CountingFetcher::failing();
        let restarted = cache(offline.clone(), clock.clone(), Some(store.clone()));
        let warmed = restarted.warm_start().await.unwrap();
        assert_eq!(warmed.sha256, snapshot.sha256);
        assert_eq!(warmed.fetched_at, snapshot.fetched_at);
        assert_eq!(offline.calls(), 0);

        // Restart after the window with the source down: stale copy still answers
        clock.advance(chrono::Duration::hours(30));
        let offline = CountingFetcher::failing();
        let late = cache(offline.clone(), clock.clone(), Some(store));
        let lookup = late
            .lookup(&normalize("Hassan", SearchType::Person).unwrap())
            .await
            .unwrap();
        assert!(lookup.stale);
        assert!(lookup.matches.found);
        assert_eq!(offline.calls(), 1);
    }

    #[tokio::test]
    async fn test_backing_write_failure_is_not_fatal() {
        let clock = start_clock();
        let store = FlakyStore::new(&["consolidated.xml", "consolidated.meta.json"]);
        let cache = Arc::new(
            ConsolidatedListCache::new(
                CountingFetcher::new(SAMPLE_LIST),
                clock,
                chrono::Duration::hours(24),
                5,
            )
            .with_backing_store(store),
        );

        let lookup = cache
            .lookup(&normalize("Ocean Maritime", SearchType::Entity).unwrap())
            .await
            .unwrap();
        assert!(lookup.matches.found);
    }
}
