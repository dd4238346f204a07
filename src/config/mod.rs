//! Runtime configuration: kernel workgroup size, queue pool width, memory
//! placement preference and adapter selection.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Values are checked by [`ComputeConfig::validate`] before
//! a device is created from them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ComputeError, Result};

/// Where a storage buffer lives and how the host reaches it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPlacement {
    /// Device-local memory the host maps directly. Requires mappable
    /// primary buffers; typical of integrated and unified-memory devices.
    DeviceLocalHostVisible,
    /// Device storage reached through a host-mapped staging buffer and a
    /// recorded copy.
    HostVisible,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterPreference {
    #[default]
    HighPerformance,
    LowPower,
}

pub const MAX_WORKGROUP_SIZE: u32 = 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputeConfig {
    /// Invocations per workgroup, fixed into every kernel's entry point.
    pub workgroup_size: u32,
    /// Number of submission slots in the device queue pool.
    pub queue_slots: usize,
    /// Placement preference, most preferred first. The first placement the
    /// device supports is used for every buffer.
    pub memory_preference: Vec<MemoryPlacement>,
    pub adapter: AdapterPreference,
    /// Debug label attached to the device and its objects.
    pub label: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            workgroup_size: 256,
            queue_slots: 1,
            memory_preference: vec![
                MemoryPlacement::DeviceLocalHostVisible,
                MemoryPlacement::HostVisible,
            ],
            adapter: AdapterPreference::HighPerformance,
            label: "compute-query".to_string(),
        }
    }
}

impl ComputeConfig {
    /// Load and validate a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ComputeError::Config(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| ComputeError::Config(format!("{}: {}", path.display(), strip(e))))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ComputeError::Config(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workgroup_size == 0 || self.workgroup_size > MAX_WORKGROUP_SIZE {
            return Err(ComputeError::Config(format!(
                "workgroup_size must be in 1..={}, got {}",
                MAX_WORKGROUP_SIZE, self.workgroup_size
            )));
        }
        if self.queue_slots == 0 {
            return Err(ComputeError::Config(
                "queue_slots must be at least 1".to_string(),
            ));
        }
        if self.memory_preference.is_empty() {
            return Err(ComputeError::Config(
                "memory_preference must name at least one placement".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_workgroup_size(mut self, size: u32) -> Self {
        self.workgroup_size = size;
        self
    }

    pub fn with_queue_slots(mut self, slots: usize) -> Self {
        self.queue_slots = slots;
        self
    }

    pub fn with_memory_preference(mut self, preference: Vec<MemoryPlacement>) -> Self {
        self.memory_preference = preference;
        self
    }
}

fn strip(e: ComputeError) -> String {
    match e {
        ComputeError::Config(msg) => msg,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests;
