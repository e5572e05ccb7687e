// Startup tests for the device monitor binary configuration

use common::bootstrap::{init_monitor_runtime, initial_registrations};
use common::config::Settings;
use common::monitoring::Scheduler;
use proptest::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../config")
}

#[test]
fn test_shipped_config_is_valid() {
    let settings = Settings::load_from_path(shipped_config_dir()).unwrap();
    assert!(settings.validate().is_ok());
    assert_eq!(settings.monitoring.quiet_period_ms, 1000);
    assert_eq!(settings.devices.len(), 3);
}

#[test]
fn test_shipped_config_registrations() {
    let settings = Settings::load_from_path(shipped_config_dir()).unwrap();
    let keys: Vec<String> = initial_registrations(&settings)
        .into_iter()
        .map(|item| item.key)
        .collect();
    assert_eq!(keys, vec!["ahu-1", "floor-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_shipped_config_schedules_listening_devices() {
    let settings = Settings::load_from_path(shipped_config_dir()).unwrap();
    let runtime = init_monitor_runtime(&settings).unwrap();
    let scheduler = runtime.scheduler.clone();

    for item in initial_registrations(&settings) {
        scheduler.submit_registration(item);
    }

    let running = Arc::clone(&scheduler);
    let handle = tokio::spawn(async move { running.start().await });

    // One quiet period to batch, then a full 5s interval to fire
    tokio::time::sleep(Duration::from_millis(1000 + 5000 + 200)).await;
    scheduler.stop().await.unwrap();
    handle.await.unwrap().unwrap();

    assert!(scheduler.is_monitoring("ahu-1").await);
    assert!(scheduler.is_monitoring("vav-101").await);
    // vav-102 is declared but not listening
    assert!(!scheduler.is_monitoring("vav-102").await);
    assert_eq!(runtime.updater.update_count(), 2);
}

proptest! {
    /// Any positive timing pair is accepted and carried into the scheduler config
    #[test]
    fn prop_positive_timings_validate(quiet in 1u64..60_000, idle in 1u64..10_000) {
        let mut settings = Settings::default();
        settings.monitoring.quiet_period_ms = quiet;
        settings.monitoring.idle_poll_interval_ms = idle;
        prop_assert!(settings.validate().is_ok());

        let config = settings.monitoring.to_monitoring_config();
        prop_assert_eq!(config.quiet_period, Duration::from_millis(quiet));
        prop_assert_eq!(config.idle_poll_interval, Duration::from_millis(idle));
    }
}
