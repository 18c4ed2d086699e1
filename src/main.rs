use anyhow::Result;
use chrono::Utc;
use energy_arbitrage::config::Config;
use energy_arbitrage::controller::AppState;
use energy_arbitrage::telemetry::{self, init_tracing};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = Config::load()?;
    if cfg.sites.is_empty() {
        warn!("no sites configured; nothing to control");
    }

    let state = AppState::new(cfg.clone())?;
    info!(
        sites = state.sites.len(),
        interval_minutes = cfg.controller.cycle_interval_minutes,
        "starting energy arbitrage controller"
    );

    state
        .batch()
        .run_until(cfg.controller.cycle_interval(), telemetry::shutdown_signal(), || {
            state.advance_simulations(Utc::now())
        })
        .await;

    warn!("shutdown complete");
    Ok(())
}
