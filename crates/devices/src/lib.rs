//! Devices known to Hearth.
//!
//! The [`DeviceRegistry`] answers "does this device exist, and may it be put
//! in that state?". The [`SimulatedHome`] is a [`DeviceController`] that keeps
//! device state in memory and can be scripted to fail, refuse or hang.
//!
//! [`DeviceController`]: hearth_core::device::DeviceController

pub mod registry;
pub mod simulated;

pub use registry::{Capability, DeviceRegistry, DeviceSpec, ResolvedTarget};
pub use simulated::{Fault, SimulatedHome};
