use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use heatpump_monitor::config::Config;
use heatpump_monitor::db;
use heatpump_monitor::driver::SerialRtuBus;
use heatpump_monitor::poller::{BusPoller, HeatMeterPoller};
use heatpump_monitor::recorder::Recorder;
use heatpump_monitor::store::LiveStore;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path = std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    let tz = cfg.site.tz()?;
    info!(db = %cfg.database.path, timezone = %cfg.site.timezone, "configuration loaded");

    let pool = db::connect(&cfg.database).await?;
    db::init_schema(&pool).await?;
    info!("database ready");

    let heat_bus = SerialRtuBus::open(&cfg.heat_meter.serial)?;
    let energy_bus = SerialRtuBus::open(&cfg.energy_bus.serial)?;

    let store = Arc::new(LiveStore::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heat_poller = HeatMeterPoller::new(heat_bus, cfg.heat_meter.clone(), store.clone());
    let bus_poller = BusPoller::new(energy_bus, cfg.energy_bus.clone(), store.clone());
    let recorder = Recorder::new(
        pool,
        store,
        cfg.classifier.clone(),
        cfg.recorder.clone(),
        tz,
    );

    let workers = [
        ("heat-meter poller", tokio::spawn(heat_poller.run(shutdown_rx.clone()))),
        ("energy bus poller", tokio::spawn(bus_poller.run(shutdown_rx.clone()))),
        ("recorder", tokio::spawn(recorder.run(shutdown_rx))),
    ];

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    for (name, handle) in workers {
        if tokio::time::timeout(Duration::from_secs(6), handle).await.is_err() {
            warn!("{name} did not stop in time, abandoning it");
        }
    }

    Ok(())
}
