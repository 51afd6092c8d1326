//! Service lifecycle events delivered by the orchestrator.
use serde_derive::{Deserialize, Serialize};

/// The orchestrator's canonical service stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleStage {
    Prepared,
    Running,
    Stopped,
    Deleted,
}

/// A lifecycle transition that has been requested but not yet committed.
///
/// The orchestrator leaves the service in `current` if the transition is vetoed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub service: String,
    #[serde(default)]
    pub groups: Vec<String>,
    pub current: LifecycleStage,
    pub target: LifecycleStage,
    /// Players currently connected to the service. Required: an event without it must not
    /// be read as an empty proxy.
    pub occupancy: u32,
}

impl LifecycleEvent {
    pub fn new(service: &str, current: LifecycleStage, target: LifecycleStage) -> Self {
        Self {
            service: service.to_owned(),
            groups: Vec::new(),
            current,
            target,
            occupancy: 0,
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.push(group.to_owned());
        self
    }

    pub fn with_occupancy(mut self, occupancy: u32) -> Self {
        self.occupancy = occupancy;
        self
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    pub fn is_start(&self) -> bool {
        self.current == LifecycleStage::Prepared && self.target == LifecycleStage::Running
    }

    /// A running service asked to leave the running stage, in any direction.
    pub fn is_stop_request(&self) -> bool {
        self.current == LifecycleStage::Running
            && matches!(
                self.target,
                LifecycleStage::Stopped | LifecycleStage::Prepared | LifecycleStage::Deleted
            )
    }
}

/// A routine update of a service's published properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUpdate {
    pub service: String,
    pub occupancy: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<u32>,
}

impl ServiceUpdate {
    pub fn new(service: &str, occupancy: u32) -> Self {
        Self {
            service: service.to_owned(),
            occupancy,
            max_players: None,
        }
    }
}
