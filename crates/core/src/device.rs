//! Device control trait: the boundary to the physical actuators.
//!
//! The device layer is an unreliable peer: commands may fail, hang or be
//! lost. Commands are idempotent ("power=on" twice leaves the light on), so
//! the orchestrator can retry them freely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::ids::ActionId;

/// A command sent to the device layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub action_id: ActionId,
    /// Canonical device id (aliases already resolved)
    pub device: String,
    pub capability: String,
    pub state: String,
}

/// The device layer's acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAck {
    pub device: String,
    pub capability: String,
    /// The state the device reports after applying the command
    pub state: String,
}

/// Last known state of one device capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device: String,
    pub capability: String,
    pub state: String,
    pub updated_at: DateTime<Utc>,
}

/// The core DeviceController trait.
///
/// Implementations: the simulated home (tests and demo); real bridges
/// (serial, MQTT, vendor hubs) plug in here.
#[async_trait]
pub trait DeviceController: Send + Sync {
    /// Controller name (e.g., "simulated").
    fn name(&self) -> &str;

    /// Apply a command. Must be idempotent.
    async fn apply(&self, command: DeviceCommand) -> std::result::Result<DeviceAck, DeviceError>;
}
