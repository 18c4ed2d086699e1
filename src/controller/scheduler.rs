use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use super::SiteController;
use crate::api::{BatchResponse, UpdateStatus};
use crate::error::{ControlError, ControlResult};

/// Per-site outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub results: BTreeMap<String, ControlResult<UpdateStatus>>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn to_response(&self) -> BatchResponse {
        let mut response = BatchResponse::default();
        for (site_id, result) in &self.results {
            response.record(site_id.clone(), result.clone().map(|_| ()));
        }
        response
    }
}

/// Runs one cycle per site concurrently; a failing site never affects others.
#[derive(Clone)]
pub struct BatchRunner {
    sites: Vec<Arc<SiteController>>,
}

impl BatchRunner {
    pub fn new(sites: Vec<Arc<SiteController>>) -> Self {
        Self { sites }
    }

    pub async fn run_all(&self) -> BatchReport {
        let mut set = JoinSet::new();
        for site in &self.sites {
            let site = site.clone();
            set.spawn(async move {
                let site_id = site.site_id().to_string();
                let result = AssertUnwindSafe(site.run_cycle())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(ControlError::Storage("cycle task panicked".into())));
                (site_id, result.map(|response| response.status))
            });
        }

        let mut report = BatchReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((site_id, result)) => {
                    report.results.insert(site_id, result);
                }
                Err(e) => error!(error = %e, "cycle task aborted"),
            }
        }
        info!(
            sites = self.sites.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch complete"
        );
        report
    }

    /// Run a batch every `every` until `shutdown` resolves. `before_each`
    /// runs ahead of each batch.
    pub async fn run_until<S, B, BFut>(&self, every: std::time::Duration, shutdown: S, before_each: B)
    where
        S: Future<Output = ()>,
        B: Fn() -> BFut,
        BFut: Future<Output = ()>,
    {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    before_each().await;
                    self.run_all().await;
                }
            }
        }
        info!("batch loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BATCH_SUCCESS;
    use crate::controller::Site;
    use crate::domain::{BatteryMode, EnergyStats, Price, Settings, SolarMode, SystemStatus};
    use crate::hardware::{EnergyStorageSystem, SimulatedStorage, SimulatedStorageConfig};
    use crate::prices::{ManualClock, StaticPriceProvider};
    use crate::repo::Repositories;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    /// Driver with a bug that panics on every status read.
    struct PanickingStorage;

    #[async_trait]
    impl EnergyStorageSystem for PanickingStorage {
        async fn get_status(&self) -> ControlResult<SystemStatus> {
            panic!("driver bug");
        }

        async fn set_modes(&self, _battery_mode: BatteryMode, _solar_mode: SolarMode) -> ControlResult<()> {
            Ok(())
        }

        async fn apply_settings(&self, _settings: &Settings) -> ControlResult<()> {
            Ok(())
        }

        async fn get_energy_history(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> ControlResult<Vec<EnergyStats>> {
            Ok(vec![])
        }
    }

    fn site(id: &str, repos: &Repositories) -> (Arc<SiteController>, Arc<SimulatedStorage>) {
        let storage = Arc::new(SimulatedStorage::new(SimulatedStorageConfig::default(), now()));
        (controller_for(id, storage.clone(), repos), storage)
    }

    fn controller_for(id: &str, storage: Arc<dyn EnergyStorageSystem>, repos: &Repositories) -> Arc<SiteController> {
        let prices = Arc::new(StaticPriceProvider {
            current: Price::hourly(now(), 0.12),
            future: vec![],
            history: vec![],
        });
        let controller = SiteController::new(
            Site {
                id: id.to_string(),
                tz: chrono_tz::UTC,
                price_provider: "utility-a".into(),
            },
            storage,
            prices,
            repos.clone(),
            Arc::new(ManualClock::new(now())),
        );
        Arc::new(controller)
    }

    #[tokio::test]
    async fn test_one_failing_site_does_not_affect_others() {
        let repos = Repositories::in_memory();
        let (a, _) = site("site-a", &repos);
        let (b, b_storage) = site("site-b", &repos);
        let (c, _) = site("site-c", &repos);
        b_storage.set_offline(true).await;

        let report = BatchRunner::new(vec![a, b, c]).run_all().await;
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.succeeded(), 2);
        assert!(matches!(
            report.results["site-b"],
            Err(ControlError::TransientUpstream { .. })
        ));

        let response = report.to_response();
        assert_eq!(response.0["site-a"], BATCH_SUCCESS);
        assert_eq!(response.0["site-c"], BATCH_SUCCESS);
        assert!(response.0["site-b"].contains("simulated storage"));
    }

    #[tokio::test]
    async fn test_panicking_site_is_reported_as_failure() {
        let repos = Repositories::in_memory();
        let (a, a_storage) = site("site-a", &repos);
        let b = controller_for("site-b", Arc::new(PanickingStorage), &repos);

        let report = BatchRunner::new(vec![a, b]).run_all().await;
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.succeeded(), 1);
        assert!(matches!(report.results["site-b"], Err(ControlError::Storage(_))));
        assert_eq!(a_storage.set_modes_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = BatchRunner::new(vec![]).run_all().await;
        assert!(report.results.is_empty());
        assert!(report.to_response().0.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stops_on_shutdown() {
        let repos = Repositories::in_memory();
        let (a, _) = site("site-a", &repos);
        let runner = BatchRunner::new(vec![a]);
        let ticks = std::sync::atomic::AtomicUsize::new(0);

        runner
            .run_until(
                std::time::Duration::from_secs(60),
                tokio::time::sleep(std::time::Duration::from_secs(150)),
                || {
                    ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    async {}
                },
            )
            .await;

        // Ticks at 0s, 60s and 120s.
        assert_eq!(ticks.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
