//! Simulated home: an in-memory device layer with scriptable faults.

use async_trait::async_trait;
use chrono::Utc;
use hearth_core::device::{DeviceAck, DeviceCommand, DeviceController, DeviceState};
use hearth_core::error::DeviceError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::registry::DeviceRegistry;

/// What the next command to a device does instead of succeeding.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Report the device unreachable
    Unreachable,
    /// Refuse with a reason
    Refuse(String),
    /// Never answer
    Hang,
}

#[derive(Default)]
struct HomeState {
    states: BTreeMap<(String, String), DeviceState>,
    faults: HashMap<String, VecDeque<Fault>>,
    received: Vec<DeviceCommand>,
}

pub struct SimulatedHome {
    registry: DeviceRegistry,
    state: Mutex<HomeState>,
    latency: Duration,
}

impl SimulatedHome {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self {
            registry,
            state: Mutex::new(HomeState::default()),
            latency: Duration::ZERO,
        }
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HomeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `times` faults for the next commands sent to `device`.
    pub fn fail_next(&self, device: &str, times: usize, fault: Fault) {
        let mut state = self.lock();
        let queue = state.faults.entry(device.to_string()).or_default();
        queue.extend(std::iter::repeat_n(fault, times));
    }

    /// Every command received so far, including failed ones.
    pub fn received(&self) -> Vec<DeviceCommand> {
        self.lock().received.clone()
    }

    pub fn state_of(&self, device: &str, capability: &str) -> Option<String> {
        self.lock()
            .states
            .get(&(device.to_string(), capability.to_string()))
            .map(|s| s.state.clone())
    }

    /// Current device states, ordered by device then capability.
    pub fn snapshot(&self) -> Vec<DeviceState> {
        self.lock().states.values().cloned().collect()
    }
}

#[async_trait]
impl DeviceController for SimulatedHome {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn apply(&self, command: DeviceCommand) -> Result<DeviceAck, DeviceError> {
        let fault = {
            let mut state = self.lock();
            state.received.push(command.clone());
            state
                .faults
                .get_mut(&command.device)
                .and_then(|queue| queue.pop_front())
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match fault {
            Some(Fault::Unreachable) => {
                debug!(device = %command.device, "Simulated device unreachable");
                return Err(DeviceError::Unreachable(command.device));
            }
            Some(Fault::Refuse(reason)) => {
                return Err(DeviceError::Refused {
                    device: command.device,
                    reason,
                });
            }
            Some(Fault::Hang) => {
                debug!(device = %command.device, "Simulated device hanging");
                std::future::pending::<()>().await;
            }
            None => {}
        }

        let target = self
            .registry
            .validate(&command.device, &command.capability, &command.state)
            .map_err(|reason| match self.registry.resolve(&command.device) {
                None => DeviceError::UnknownDevice(command.device.clone()),
                Some(_) => DeviceError::Refused {
                    device: command.device.clone(),
                    reason,
                },
            })?;

        info!(device = %target.device, capability = %target.capability, state = %target.state, "Simulated device applied command");
        self.lock().states.insert(
            (target.device.clone(), target.capability.clone()),
            DeviceState {
                device: target.device.clone(),
                capability: target.capability.clone(),
                state: target.state.clone(),
                updated_at: Utc::now(),
            },
        );

        Ok(DeviceAck {
            device: target.device,
            capability: target.capability,
            state: target.state,
        })
    }
}
