// Device monitor binary entry point

use anyhow::Context;
use common::bootstrap::{init_monitor_runtime, init_observability, initial_registrations};
use common::config::Settings;
use common::monitoring::Scheduler;
use common::telemetry;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    init_observability(&settings)?;

    info!(
        quiet_period_ms = settings.monitoring.quiet_period_ms,
        idle_poll_interval_ms = settings.monitoring.idle_poll_interval_ms,
        devices = settings.devices.len(),
        "Starting device monitor"
    );

    let runtime = init_monitor_runtime(&settings)?;
    let scheduler = runtime.scheduler.clone();

    for item in initial_registrations(&settings) {
        scheduler.submit_registration(item);
    }
    info!(
        pending = scheduler.pending_registrations(),
        "Initial registrations submitted"
    );

    // Handle SIGINT for graceful shutdown
    let scheduler_for_shutdown = scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        if let Err(e) = scheduler_for_shutdown.stop().await {
            error!(error = %e, "Error during monitor shutdown");
        }
    });

    let result = scheduler.start().await;

    let snapshot = scheduler.interval_snapshot().await;
    match serde_json::to_string(&snapshot) {
        Ok(groups) => info!(
            groups = %groups,
            endpoint_updates = runtime.updater.update_count(),
            "Device monitor stopped"
        ),
        Err(e) => error!(error = %e, "Failed to serialize interval snapshot"),
    }

    telemetry::shutdown_telemetry();
    result.context("Monitoring scheduler failed")
}
