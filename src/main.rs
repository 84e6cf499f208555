use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rental_catalog::config::AppConfig;
use rental_catalog::error::CatalogError;
use rental_catalog::rental_catalog::RentalCatalog;
use rental_catalog::resilience::connectivity::{
    AlertPriority, ConnectivityAlert, ConnectivityMonitor,
};

fn log_alert(alert: &ConnectivityAlert) {
    match alert.priority() {
        AlertPriority::High => error!("Connectivity alert: {:?}", alert),
        AlertPriority::Normal => warn!("Connectivity alert: {:?}", alert),
        AlertPriority::Info => info!("Connectivity: {:?}", alert),
    }
}

/// Logs a failed sync, with remediation when credentials are the cause.
fn log_sync_error(err: &anyhow::Error, config: &AppConfig) {
    let remediation = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<CatalogError>())
        .and_then(|cause| cause.remediation(&config.catalog.base_url));

    match remediation {
        Some(fix) => error!("Sync failed: {:#}. {} See {}", err, fix.message, fix.settings_url),
        None => error!("Sync failed: {:#}", err),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting rental catalog sync");

    let config = AppConfig::from_env()?;
    let catalog = RentalCatalog::new(&config).await?;

    // Run once immediately
    match catalog.manual_sync("startup").await {
        Ok(result) => info!(
            "Initial sync: {} inserted, {} updated, {} in mirror",
            result.inserted, result.updated, result.total_in_database
        ),
        Err(e) => log_sync_error(&e, &config),
    }

    let mut sched = JobScheduler::new().await?;

    let job_catalog = catalog.clone();
    let job_config = Arc::new(config.clone());
    sched
        .add(Job::new_async(config.sync_cron.as_str(), move |_uuid, _l| {
            let catalog = job_catalog.clone();
            let config = Arc::clone(&job_config);
            Box::pin(async move {
                if let Err(e) = catalog.manual_sync("scheduler").await {
                    log_sync_error(&e, &config);
                }
            })
        })?)
        .await?;

    info!("Scheduler started with schedule '{}'", config.sync_cron);
    sched.start().await?;

    let (alerts_tx, mut alerts_rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let connectivity = ConnectivityMonitor::new(
        Arc::clone(catalog.monitor()),
        Arc::clone(catalog.reconciler().mirror()),
        config.connectivity_interval,
        config.alert_cooldown,
    )
    .spawn(alerts_tx, cancel.clone());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
            Some(alert) = alerts_rx.recv() => log_alert(&alert),
        }
    }

    info!("Shutting down");
    connectivity.shutdown().await;
    sched.shutdown().await?;

    Ok(())
}
