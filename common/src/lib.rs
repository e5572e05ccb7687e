// Shared library for the device monitoring scheduler and its binaries

pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod models;
pub mod monitoring;
pub mod registry;
pub mod telemetry;
