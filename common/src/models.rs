// Data models for monitored devices and their polling definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a monitored device
pub type DeviceId = String;

/// Opaque handle to a device or listener model submitted for (re)registration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationItem {
    /// Key the resolver uses to find the devices behind this registration
    pub key: String,
}

impl RegistrationItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl fmt::Display for RegistrationItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Reference to a single point (endpoint) read during a poll
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointRef(pub String);

impl PointRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Network the device is reached through, handed back to the endpoint updater
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkContext {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl NetworkContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// A device-declared polling period and the points read at that period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorDefinition {
    /// Polling period in milliseconds
    pub interval: i64,
    #[serde(default)]
    pub children: Vec<PointRef>,
}

impl MonitorDefinition {
    pub fn new(interval: i64, children: Vec<PointRef>) -> Self {
        Self { interval, children }
    }

    /// A definition is usable only with a positive interval and at least one point
    pub fn is_valid(&self) -> bool {
        self.interval > 0 && !self.children.is_empty()
    }

    /// Interval in milliseconds, if the definition is valid
    pub fn interval_ms(&self) -> Option<u64> {
        if self.is_valid() {
            u64::try_from(self.interval).ok()
        } else {
            None
        }
    }
}

/// A resolved device record, read fresh on every rebuild
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredDevice {
    pub id: DeviceId,
    #[serde(default)]
    pub name: String,
    pub listening: bool,
    #[serde(default)]
    pub monitor_definitions: Vec<MonitorDefinition>,
    #[serde(default)]
    pub network: NetworkContext,
    /// Registration that produced this device; re-submitted when listening flips
    pub registration: RegistrationItem,
}

impl MonitoredDevice {
    /// Valid definitions in declaration order
    pub fn valid_definitions(&self) -> impl Iterator<Item = &MonitorDefinition> {
        self.monitor_definitions.iter().filter(|def| def.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_is_invalid() {
        let def = MonitorDefinition::new(0, vec![PointRef::new("p1")]);
        assert!(!def.is_valid());
        assert_eq!(def.interval_ms(), None);
    }

    #[test]
    fn test_negative_interval_is_invalid() {
        let def = MonitorDefinition::new(-500, vec![PointRef::new("p1")]);
        assert!(!def.is_valid());
    }

    #[test]
    fn test_empty_children_is_invalid() {
        let def = MonitorDefinition::new(1000, vec![]);
        assert!(!def.is_valid());
    }

    #[test]
    fn test_valid_definitions_filters_in_order() {
        let device = MonitoredDevice {
            id: "dev-1".to_string(),
            name: "AHU 1".to_string(),
            listening: true,
            monitor_definitions: vec![
                MonitorDefinition::new(1000, vec![PointRef::new("p1")]),
                MonitorDefinition::new(0, vec![PointRef::new("p2")]),
                MonitorDefinition::new(5000, vec![PointRef::new("p3")]),
            ],
            network: NetworkContext::new("net-1"),
            registration: RegistrationItem::new("dev-1"),
        };

        let intervals: Vec<u64> = device
            .valid_definitions()
            .filter_map(MonitorDefinition::interval_ms)
            .collect();
        assert_eq!(intervals, vec![1000, 5000]);
    }

    #[test]
    fn test_monitor_definition_deserializes_children() {
        let def: MonitorDefinition =
            serde_json::from_value(serde_json::json!({"interval": 2000, "children": ["a", "b"]}))
                .unwrap();
        assert_eq!(def.children, vec![PointRef::new("a"), PointRef::new("b")]);
        assert!(def.is_valid());
    }
}
