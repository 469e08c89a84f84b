//! Device registry: ids, aliases, capabilities and allowed states.

use hearth_config::DeviceConfig;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub name: String,
    /// Empty means any state is accepted
    pub states: Vec<String>,
}

impl Capability {
    fn allows(&self, state: &str) -> bool {
        self.states.is_empty() || self.states.iter().any(|s| s == state)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSpec {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub capabilities: Vec<Capability>,
}

impl DeviceSpec {
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }
}

/// A validated command target with the device id in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub device: String,
    pub capability: String,
    pub state: String,
}

/// Kinds whose "off" is noticed by whoever is in the room.
const PRESENCE_SENSITIVE_KINDS: &[&str] = &["light"];

#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, DeviceSpec>,
    aliases: HashMap<String, String>,
}

fn normalize(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(devices: &[DeviceConfig]) -> Self {
        let mut registry = Self::new();
        for device in devices {
            registry.register(device);
        }
        registry
    }

    pub fn register(&mut self, config: &DeviceConfig) {
        let spec = DeviceSpec {
            id: config.id.clone(),
            name: if config.name.is_empty() {
                config.id.clone()
            } else {
                config.name.clone()
            },
            kind: config.kind.to_lowercase(),
            capabilities: config
                .capabilities
                .iter()
                .map(|c| Capability {
                    name: c.name.to_lowercase(),
                    states: c.states.iter().map(|s| s.to_lowercase()).collect(),
                })
                .collect(),
        };

        self.aliases.insert(normalize(&spec.id), spec.id.clone());
        self.aliases.insert(normalize(&spec.name), spec.id.clone());
        for alias in &config.aliases {
            self.aliases
                .entry(normalize(alias))
                .or_insert_with(|| spec.id.clone());
        }
        self.devices.insert(spec.id.clone(), spec);
    }

    /// Look a device up by id, display name or alias.
    pub fn resolve(&self, name: &str) -> Option<&DeviceSpec> {
        if let Some(spec) = self.devices.get(name) {
            return Some(spec);
        }
        let id = self.aliases.get(&normalize(name))?;
        self.devices.get(id)
    }

    /// Check that the device exists, supports the capability and allows the
    /// state. The error is a human-readable reason.
    pub fn validate(
        &self,
        device: &str,
        capability: &str,
        state: &str,
    ) -> Result<ResolvedTarget, String> {
        let spec = self
            .resolve(device)
            .ok_or_else(|| format!("unknown device '{device}'"))?;
        let capability = capability.trim().to_lowercase();
        let state = state.trim().to_lowercase();

        let cap = spec
            .capability(&capability)
            .ok_or_else(|| format!("{} has no '{capability}' capability", spec.id))?;
        if !cap.allows(&state) {
            return Err(format!(
                "'{state}' is not a valid {capability} state for {} (expected one of: {})",
                spec.id,
                cap.states.join(", ")
            ));
        }

        Ok(ResolvedTarget {
            device: spec.id.clone(),
            capability,
            state,
        })
    }

    pub fn is_presence_sensitive(&self, device: &str) -> bool {
        self.resolve(device)
            .is_some_and(|spec| PRESENCE_SENSITIVE_KINDS.contains(&spec.kind.as_str()))
    }

    /// Devices ordered by id.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceSpec> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// One line per device, used to tell the reasoning engine what it may control.
    pub fn describe(&self) -> String {
        self.devices
            .values()
            .map(|spec| {
                let caps: Vec<String> = spec
                    .capabilities
                    .iter()
                    .map(|c| {
                        if c.states.is_empty() {
                            c.name.clone()
                        } else {
                            format!("{} ({})", c.name, c.states.join("|"))
                        }
                    })
                    .collect();
                format!("- {} [{}]: {}", spec.id, spec.kind, caps.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
