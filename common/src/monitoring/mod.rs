// Monitoring module: registration batching and interval-keyed poll scheduling

pub mod batcher;
pub mod binding;
pub mod collaborators;
pub mod engine;
pub mod guard;
pub mod queue;
pub mod schedule;
pub mod table;

pub use batcher::IngestionBatcher;
pub use binding::{BindingBuilder, DevicePlan, PollAction, PollBinding};
pub use collaborators::{
    DeviceModel, DeviceResolver, EndpointUpdater, ListeningCallback, Subscription,
};
pub use engine::{MonitoringConfig, MonitoringScheduler, Scheduler};
pub use guard::InitializationGuard;
pub use queue::{DueEntry, DueQueue};
pub use schedule::{DueGroup, IntervalSnapshot, PollSchedule};
pub use table::IntervalTable;
