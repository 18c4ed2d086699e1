//! Multi-site batches sharing a cached price feed.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use common::*;
use energy_arbitrage::api::BATCH_SUCCESS;
use energy_arbitrage::controller::{BatchRunner, SiteController};
use energy_arbitrage::domain::Price;
use energy_arbitrage::hardware::{SimulatedStorage, SimulatedStorageConfig};
use energy_arbitrage::prices::{CachedPriceProvider, Clock, ManualClock, PriceCache, PriceProvider};
use energy_arbitrage::repo::Repositories;
use energy_arbitrage::{ControlError, ControlResult};

/// Upstream feed that is slow enough for callers to overlap.
#[derive(Default)]
struct CountingFeed {
    current_calls: AtomicUsize,
    future_calls: AtomicUsize,
}

#[async_trait]
impl PriceProvider for CountingFeed {
    async fn current_price(&self) -> ControlResult<Price> {
        self.current_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        Ok(Price::hourly(now(), 0.12))
    }

    async fn future_prices(&self) -> ControlResult<Vec<Price>> {
        self.future_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        Ok(prices(&[0.12, 0.18, 0.25]))
    }

    async fn confirmed_prices(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> ControlResult<Vec<Price>> {
        Ok(vec![])
    }
}

struct Fleet {
    runner: BatchRunner,
    storages: Vec<Arc<SimulatedStorage>>,
    feed: Arc<CountingFeed>,
    clock: Arc<ManualClock>,
    repos: Repositories,
}

fn fleet(size: usize) -> Fleet {
    let clock = Arc::new(ManualClock::new(now()));
    let shared_clock: Arc<dyn Clock> = clock.clone();
    let cache = Arc::new(PriceCache::new(shared_clock.clone()));
    let feed = Arc::new(CountingFeed::default());
    let repos = Repositories::in_memory();

    let mut sites = Vec::new();
    let mut storages = Vec::new();
    for i in 0..size {
        let storage = Arc::new(SimulatedStorage::new(SimulatedStorageConfig::default(), now()));
        let prices = Arc::new(CachedPriceProvider::new("utility-a", feed.clone(), cache.clone()));
        let controller = SiteController::new(
            site(&format!("site-{i:02}")),
            storage.clone(),
            prices,
            repos.clone(),
            shared_clock.clone(),
        );
        sites.push(Arc::new(controller));
        storages.push(storage);
    }
    Fleet {
        runner: BatchRunner::new(sites),
        storages,
        feed,
        clock,
        repos,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_provider_is_fetched_once_per_ttl() {
    let fleet = fleet(5);

    let report = fleet.runner.run_all().await;
    assert_eq!(report.succeeded(), 5);
    assert_eq!(fleet.feed.current_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fleet.feed.future_calls.load(Ordering::SeqCst), 1);

    // Current price expires after five minutes, future prices after fifteen.
    fleet.clock.advance(Duration::seconds(301));
    fleet.runner.run_all().await;
    assert_eq!(fleet.feed.current_calls.load(Ordering::SeqCst), 2);
    assert_eq!(fleet.feed.future_calls.load(Ordering::SeqCst), 1);

    fleet.clock.advance(Duration::seconds(600));
    fleet.runner.run_all().await;
    assert_eq!(fleet.feed.current_calls.load(Ordering::SeqCst), 3);
    assert_eq!(fleet.feed.future_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_offline_site_is_reported_without_aborting_batch() {
    let fleet = fleet(4);
    fleet.storages[2].set_offline(true).await;

    let report = fleet.runner.run_all().await;
    let response = report.to_response();

    assert_eq!(response.0.len(), 4);
    assert_eq!(response.succeeded(), 3);
    assert_eq!(response.failed(), 1);
    assert_ne!(response.0["site-02"], BATCH_SUCCESS);
    assert!(matches!(
        report.results["site-02"],
        Err(ControlError::TransientUpstream { .. })
    ));
    for (i, storage) in fleet.storages.iter().enumerate() {
        if i != 2 {
            assert_eq!(storage.set_modes_calls(), 1, "site-{i:02}");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_site_records_one_action_per_cycle() {
    let fleet = fleet(50);

    let report = fleet.runner.run_all().await;
    assert_eq!(report.succeeded(), 50);

    for i in 0..50 {
        let actions = fleet
            .repos
            .actions
            .range(&format!("site-{i:02}"), now() - Duration::hours(1), now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(actions.len(), 1);
    }
    assert_eq!(fleet.feed.current_calls.load(Ordering::SeqCst), 1);
}
