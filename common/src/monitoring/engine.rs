// Monitoring scheduler: rebuild pipeline and interval-keyed polling loop

use super::batcher::IngestionBatcher;
use super::binding::BindingBuilder;
use super::collaborators::{DeviceModel, DeviceResolver, EndpointUpdater};
use super::guard::InitializationGuard;
use super::schedule::{DueGroup, IntervalSnapshot, PollSchedule};
use crate::errors::MonitoringError;
use crate::models::{DeviceId, MonitoredDevice, RegistrationItem};
use crate::telemetry;
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the monitoring scheduler
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Idle time after the last registration before a batch is processed
    pub quiet_period: Duration,
    /// How often the loop re-checks an empty due queue
    pub idle_poll_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(1000),
            idle_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Scheduler lifecycle operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the rebuild pipeline and the polling loop until stopped
    async fn start(&self) -> Result<(), MonitoringError>;

    /// Signal both loops to stop at their next suspension point
    async fn stop(&self) -> Result<(), MonitoringError>;

    /// Fire every interval group due now; returns how many groups ran
    async fn process_due_intervals(&self) -> Result<usize, MonitoringError>;
}

/// Polls a dynamic set of devices, one execution pass per distinct interval
pub struct MonitoringScheduler {
    config: MonitoringConfig,
    resolver: Arc<dyn DeviceResolver>,
    batcher: Arc<IngestionBatcher>,
    binder: BindingBuilder,
    schedule: Mutex<PollSchedule>,
    schedule_changed: Notify,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl MonitoringScheduler {
    pub fn new(
        config: MonitoringConfig,
        resolver: Arc<dyn DeviceResolver>,
        model: Arc<dyn DeviceModel>,
        updater: Arc<dyn EndpointUpdater>,
    ) -> Self {
        let batcher = Arc::new(IngestionBatcher::new(config.quiet_period));
        let guard = Arc::new(InitializationGuard::new());
        let binder = BindingBuilder::new(model, updater, guard, batcher.clone());
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        Self {
            config,
            resolver,
            batcher,
            binder,
            schedule: Mutex::new(PollSchedule::new()),
            schedule_changed: Notify::new(),
            started: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Queue a device or listener registration for the next rebuild
    pub fn submit_registration(&self, item: RegistrationItem) {
        self.batcher.submit(item);
    }

    /// Registrations waiting for the current quiet period to elapse
    pub fn pending_registrations(&self) -> usize {
        self.batcher.pending_len()
    }

    /// Resolve a batch of registrations and merge the resulting bindings.
    ///
    /// Returns the number of devices planned.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn rebuild(&self, items: Vec<RegistrationItem>) -> usize {
        let mut seen = HashSet::new();
        let unique: Vec<RegistrationItem> = items
            .into_iter()
            .filter(|item| seen.insert(item.key.clone()))
            .collect();
        telemetry::record_registrations_batched(unique.len());

        let resolved = self.resolve_all(&unique).await;
        let coverage: Vec<(RegistrationItem, HashSet<DeviceId>)> = resolved
            .iter()
            .map(|(item, devices)| {
                (item.clone(), devices.iter().map(|d| d.id.clone()).collect())
            })
            .collect();
        let devices: Vec<MonitoredDevice> = resolved
            .into_iter()
            .flat_map(|(_, devices)| devices)
            .collect();

        // Plan first so devices that moved to another registration are not released
        let plans = self.binder.plan(devices);
        let planned = plans.len();
        let released: Vec<DeviceId> = coverage
            .iter()
            .flat_map(|(item, ids)| self.binder.release_unresolved(item, ids))
            .collect();

        {
            let now = Instant::now();
            let mut schedule = self.schedule.lock().await;
            for plan in plans {
                schedule.apply(plan, now);
            }
            for device_id in &released {
                schedule.remove_device(device_id);
            }
            telemetry::update_schedule_gauges(schedule.queue_len(), schedule.group_count());
        }
        self.schedule_changed.notify_one();

        info!(
            registrations = unique.len(),
            devices = planned,
            released = released.len(),
            "Monitoring bindings rebuilt"
        );
        planned
    }

    /// Resolve every item concurrently, keeping the successful ones
    async fn resolve_all(
        &self,
        items: &[RegistrationItem],
    ) -> Vec<(RegistrationItem, Vec<MonitoredDevice>)> {
        let results = join_all(items.iter().map(|item| self.resolver.resolve(item))).await;

        let mut resolved = Vec::new();
        for (item, result) in items.iter().zip(results) {
            match result {
                Ok(devices) => {
                    if devices.is_empty() {
                        debug!(registration = %item, "Registration resolved to no devices");
                    }
                    resolved.push((item.clone(), devices));
                }
                Err(e) => {
                    telemetry::record_resolution_failure();
                    warn!(
                        registration = %item,
                        error = %e,
                        "Failed to resolve registration, dropping it"
                    );
                }
            }
        }
        resolved
    }

    /// Purge a device from every group and release its listening subscription
    pub async fn deregister_device(&self, device_id: &str) -> bool {
        let removed = self.schedule.lock().await.remove_device(device_id);
        let unsubscribed = self.binder.unsubscribe(device_id);
        if removed > 0 || unsubscribed {
            info!(device_id, bindings = removed, "Device deregistered");
        }
        removed > 0 || unsubscribed
    }

    /// Current interval groups, ascending by interval
    pub async fn interval_snapshot(&self) -> Vec<IntervalSnapshot> {
        self.schedule.lock().await.snapshot(Instant::now())
    }

    pub async fn is_monitoring(&self, device_id: &str) -> bool {
        self.schedule.lock().await.contains_device(device_id)
    }

    /// Run every binding of a due group in order, then queue the group again
    /// relative to the moment it fired.
    #[instrument(skip_all, fields(interval_ms = group.entry.interval, bindings = group.bindings.len()))]
    async fn fire_group(&self, group: DueGroup) {
        let interval = group.entry.interval;
        let fired_at = Instant::now();
        let mut failures = 0usize;

        for binding in &group.bindings {
            let outcome = AssertUnwindSafe(binding.poll())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(MonitoringError::CallbackPanicked(
                        binding.device_id().to_string(),
                    ))
                });

            match outcome {
                Ok(()) => telemetry::record_poll_success(interval),
                Err(e) => {
                    failures += 1;
                    telemetry::record_poll_failure(interval, e.kind());
                    error!(
                        device_id = binding.device_id(),
                        interval_ms = interval,
                        error = %e,
                        "Poll callback failed"
                    );
                }
            }
        }

        let mut schedule = self.schedule.lock().await;
        schedule.reschedule(interval, fired_at + Duration::from_millis(interval));
        telemetry::update_schedule_gauges(schedule.queue_len(), schedule.group_count());
        drop(schedule);

        telemetry::record_fire_duration(interval, fired_at.elapsed().as_secs_f64());
        debug!(
            interval_ms = interval,
            failures,
            "Interval group fired"
        );
    }

    async fn run_ingestion(&self, shutdown: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = self.batcher.ready() => {
                    let items = self.batcher.drain();
                    debug!(items = items.len(), "Registration batch ready");
                    self.rebuild(items).await;
                }
                _ = shutdown.changed() => {}
            }
        }
        debug!("Ingestion pipeline stopped");
    }

    async fn run_polling_loop(&self, shutdown: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = self.schedule.lock().await.next_due();
            match next {
                None => {
                    tokio::select! {
                        _ = sleep(self.config.idle_poll_interval) => {}
                        _ = self.schedule_changed.notified() => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Some(entry) if entry.due_at > Instant::now() => {
                    // Woken early by a schedule change, the loop re-peeks
                    // in case an earlier interval was queued meanwhile.
                    tokio::select! {
                        _ = sleep_until(entry.due_at) => {}
                        _ = self.schedule_changed.notified() => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Some(_) => {
                    if let Err(e) = self.process_due_intervals().await {
                        error!(error = %e, "Error processing due intervals");
                    }
                }
            }
        }
        debug!("Polling loop stopped");
    }
}

#[async_trait]
impl Scheduler for MonitoringScheduler {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), MonitoringError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MonitoringError::AlreadyStarted);
        }

        info!(
            quiet_period_ms = self.config.quiet_period.as_millis() as u64,
            idle_poll_interval_ms = self.config.idle_poll_interval.as_millis() as u64,
            "Starting monitoring scheduler"
        );

        let mut ingestion_shutdown = self.shutdown_receiver();
        let mut polling_shutdown = self.shutdown_receiver();
        tokio::join!(
            self.run_ingestion(&mut ingestion_shutdown),
            self.run_polling_loop(&mut polling_shutdown),
        );

        info!("Monitoring scheduler stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), MonitoringError> {
        info!("Stopping monitoring scheduler");
        self.shutdown_tx.send_replace(true);
        Ok(())
    }

    async fn process_due_intervals(&self) -> Result<usize, MonitoringError> {
        let now = Instant::now();
        let mut fired = 0;

        loop {
            let group = self.schedule.lock().await.take_due(now);
            let Some(group) = group else {
                break;
            };
            self.fire_group(group).await;
            fired += 1;
        }

        Ok(fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MonitorDefinition, NetworkContext, PointRef};
    use crate::monitoring::collaborators::{
        MockDeviceModel, MockDeviceResolver, MockEndpointUpdater, Subscription,
    };
    use std::sync::atomic::AtomicUsize;

    fn device(id: &str, defs: Vec<(i64, &str)>) -> MonitoredDevice {
        MonitoredDevice {
            id: id.to_string(),
            name: id.to_string(),
            listening: true,
            monitor_definitions: defs
                .into_iter()
                .map(|(interval, point)| MonitorDefinition::new(interval, vec![PointRef::new(point)]))
                .collect(),
            network: NetworkContext::new("net"),
            registration: RegistrationItem::new(id),
        }
    }

    fn listening_model() -> MockDeviceModel {
        let mut model = MockDeviceModel::new();
        model.expect_is_listening().returning(|_| true);
        model
            .expect_on_listening_changed()
            .returning(|_, _| Subscription::detached());
        model
    }

    fn scheduler_with(
        resolver: MockDeviceResolver,
        updater: MockEndpointUpdater,
    ) -> MonitoringScheduler {
        MonitoringScheduler::new(
            MonitoringConfig::default(),
            Arc::new(resolver),
            Arc::new(listening_model()),
            Arc::new(updater),
        )
    }

    #[test]
    fn test_monitoring_config_default() {
        let config = MonitoringConfig::default();
        assert_eq!(config.quiet_period, Duration::from_millis(1000));
        assert_eq!(config.idle_poll_interval, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_dedups_registrations() {
        let mut resolver = MockDeviceResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|item| Ok(vec![device(&item.key, vec![(1000, "p1")])]));
        let scheduler = scheduler_with(resolver, MockEndpointUpdater::new());

        let planned = scheduler
            .rebuild(vec![RegistrationItem::new("d1"), RegistrationItem::new("d1")])
            .await;

        assert_eq!(planned, 1);
        let snapshot = scheduler.interval_snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].bindings, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_failure_drops_item_only() {
        let mut resolver = MockDeviceResolver::new();
        resolver.expect_resolve().returning(|item| {
            if item.key == "broken" {
                Err(MonitoringError::ResolutionFailed {
                    key: item.key.clone(),
                    reason: "unreachable".to_string(),
                })
            } else {
                Ok(vec![device(&item.key, vec![(2000, "p1")])])
            }
        });
        let scheduler = scheduler_with(resolver, MockEndpointUpdater::new());

        let planned = scheduler
            .rebuild(vec![RegistrationItem::new("broken"), RegistrationItem::new("d2")])
            .await;

        assert_eq!(planned, 1);
        assert!(scheduler.is_monitoring("d2").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_group_fires_all_bindings_despite_failure() {
        let mut resolver = MockDeviceResolver::new();
        resolver.expect_resolve().returning(|item| {
            Ok(vec![
                device(&format!("{}-a", item.key), vec![(5000, "p1")]),
                device(&format!("{}-b", item.key), vec![(5000, "p2")]),
            ])
        });

        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        let mut updater = MockEndpointUpdater::new();
        updater
            .expect_ensure_resources_exist()
            .returning(|_, _| Ok(()));
        updater.expect_update_endpoints().returning(move |device, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            if device.id.ends_with("-a") {
                Err(MonitoringError::EndpointUpdateFailed {
                    device_id: device.id.clone(),
                    reason: "no response".to_string(),
                })
            } else {
                Ok(())
            }
        });

        let scheduler = scheduler_with(resolver, updater);
        scheduler.rebuild(vec![RegistrationItem::new("listener")]).await;

        assert_eq!(scheduler.process_due_intervals().await.unwrap(), 0);
        tokio::time::advance(Duration::from_millis(5000)).await;
        assert_eq!(scheduler.process_due_intervals().await.unwrap(), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 2);

        // Failure did not stop the group from being queued again
        let snapshot = scheduler.interval_snapshot().await;
        assert!(snapshot[0].queued);
        assert_eq!(snapshot[0].next_due_in, Some(Duration::from_millis(5000)));
    }

    fn explode() -> Result<(), MonitoringError> {
        panic!("driver bug")
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_is_contained() {
        let scheduler = scheduler_with(MockDeviceResolver::new(), MockEndpointUpdater::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();

        {
            let now = Instant::now();
            let mut schedule = scheduler.schedule.lock().await;
            schedule.add_binding(
                crate::monitoring::PollBinding::from_fn("boom", 100, || async { explode() }),
                now,
            );
            schedule.add_binding(
                crate::monitoring::PollBinding::from_fn("ok", 100, move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
                now,
            );
        }

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(scheduler.process_due_intervals().await.unwrap(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let scheduler = Arc::new(scheduler_with(
            MockDeviceResolver::new(),
            MockEndpointUpdater::new(),
        ));
        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.start().await });

        tokio::task::yield_now().await;
        assert!(matches!(
            scheduler.start().await,
            Err(MonitoringError::AlreadyStarted)
        ));

        scheduler.stop().await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_returns_immediately() {
        let scheduler = scheduler_with(MockDeviceResolver::new(), MockEndpointUpdater::new());
        scheduler.stop().await.unwrap();
        assert!(scheduler.start().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregister_releases_device() {
        let mut resolver = MockDeviceResolver::new();
        resolver
            .expect_resolve()
            .returning(|item| Ok(vec![device(&item.key, vec![(1000, "p1")])]));
        let scheduler = scheduler_with(resolver, MockEndpointUpdater::new());
        scheduler.rebuild(vec![RegistrationItem::new("d1")]).await;

        assert!(scheduler.deregister_device("d1").await);
        assert!(!scheduler.is_monitoring("d1").await);
        assert!(!scheduler.deregister_device("d1").await);
    }
}
