//! Cache of the last acknowledged state of every device capability.

use hearth_core::device::DeviceState;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Written by the orchestrator on acknowledgement, read by context assembly.
#[derive(Debug, Default)]
pub struct KnownStates {
    states: RwLock<BTreeMap<(String, String), DeviceState>>,
}

impl KnownStates {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<(String, String), DeviceState>> {
        self.states.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<(String, String), DeviceState>> {
        self.states.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a state unless a newer one is already known.
    pub fn update(&self, state: DeviceState) {
        let key = (state.device.clone(), state.capability.clone());
        let mut states = self.write();
        match states.get(&key) {
            Some(known) if known.updated_at > state.updated_at => {}
            _ => {
                states.insert(key, state);
            }
        }
    }

    pub fn get(&self, device: &str, capability: &str) -> Option<DeviceState> {
        self.read()
            .get(&(device.to_string(), capability.to_string()))
            .cloned()
    }

    /// All known states ordered by device, then capability.
    pub fn snapshot(&self) -> Vec<DeviceState> {
        self.read().values().cloned().collect()
    }
}
