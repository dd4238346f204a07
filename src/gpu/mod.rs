//! Device side of query execution.
//!
//! Uses wgpu for cross-platform GPU compute (Vulkan, Metal, DX12). A
//! [`DeviceHandle`] owns the logical device, the submission queue pool and
//! the memory placements the device supports; everything else in this
//! module borrows it.

pub mod buffer;
pub mod engine;
pub mod layout;
pub mod profile;
pub mod queue;
pub mod shader;

use crate::config::{AdapterPreference, ComputeConfig, MemoryPlacement};
use crate::error::{DeviceResourceError, Result};

pub use buffer::{BufferDescriptor, TransferDirection};
pub use engine::{EngineState, ExecutionContext, ExecutionEngine};
pub use profile::ComputeProfile;
pub use queue::{QueueLease, QueuePool};
pub use shader::{Kernel, NagaCompiler, ShaderCompiler};

/// A logical device plus the state every query executed on it shares.
pub struct DeviceHandle {
    device: wgpu::Device,
    queues: QueuePool,
    placements: Vec<MemoryPlacement>,
    limits: wgpu::Limits,
    config: ComputeConfig,
}

impl DeviceHandle {
    /// Pick an adapter and open a logical device on it.
    ///
    /// Mappable primary buffers are requested when the adapter offers them
    /// and the configuration prefers device-local host-visible memory.
    pub fn new(config: ComputeConfig) -> Result<Self> {
        config.validate()?;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let power_preference = match config.adapter {
            AdapterPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            AdapterPreference::LowPower => wgpu::PowerPreference::LowPower,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(DeviceResourceError::NoSuitableDevice)?;

        let info = adapter.get_info();
        tracing::debug!(
            adapter = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected adapter"
        );

        let mut required_features = wgpu::Features::empty();
        if config
            .memory_preference
            .contains(&MemoryPlacement::DeviceLocalHostVisible)
            && adapter
                .features()
                .contains(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS)
        {
            required_features |= wgpu::Features::MAPPABLE_PRIMARY_BUFFERS;
        }

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some(&config.label),
                required_features,
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| DeviceResourceError::DeviceRequest(e.to_string()))?;

        Self::from_device(device, queue, config)
    }

    /// Wrap an already opened device and queue.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, config: ComputeConfig) -> Result<Self> {
        config.validate()?;

        let mut placements = Vec::with_capacity(2);
        if device
            .features()
            .contains(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS)
        {
            placements.push(MemoryPlacement::DeviceLocalHostVisible);
        }
        placements.push(MemoryPlacement::HostVisible);

        if let Some(first) = config.memory_preference.first() {
            if !placements.contains(first) {
                tracing::warn!(
                    preferred = ?first,
                    available = ?placements,
                    "preferred memory placement unavailable, falling back"
                );
            }
        }

        let limits = device.limits();
        let queues = QueuePool::new(queue, config.queue_slots);
        Ok(Self {
            device,
            queues,
            placements,
            limits,
            config,
        })
    }

    /// A device with the default configuration, or `None` when no adapter
    /// is available.
    pub fn try_default() -> Option<Self> {
        match Self::new(ComputeConfig::default()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::debug!(error = %e, "no compute device");
                None
            }
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queues(&self) -> &QueuePool {
        &self.queues
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    pub fn config(&self) -> &ComputeConfig {
        &self.config
    }

    /// Placements this device supports.
    pub fn placements(&self) -> &[MemoryPlacement] {
        &self.placements
    }

    /// First placement in the configured preference order that the device
    /// supports.
    pub fn select_placement(&self) -> Result<MemoryPlacement> {
        select_placement(&self.config.memory_preference, &self.placements)
    }

    /// Largest single storage buffer the device accepts, in bytes.
    pub fn max_allocation(&self) -> u64 {
        self.limits
            .max_buffer_size
            .min(u64::from(self.limits.max_storage_buffer_binding_size))
    }
}

pub(crate) fn select_placement(
    preference: &[MemoryPlacement],
    available: &[MemoryPlacement],
) -> Result<MemoryPlacement> {
    preference
        .iter()
        .copied()
        .find(|p| available.contains(p))
        .ok_or_else(|| DeviceResourceError::NoSuitableMemoryType.into())
}

/// Block until `slice` is mapped.
pub(crate) fn map_blocking(
    device: &wgpu::Device,
    slice: wgpu::BufferSlice<'_>,
    mode: wgpu::MapMode,
) -> Result<()> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    slice.map_async(mode, move |result| {
        let _ = tx.send(result);
    });
    let result = device.poll(wgpu::Maintain::Wait);
    tracing::trace!(queue_empty = result.is_queue_empty(), "map wait returned");
    match rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(DeviceResourceError::MapFailed(e.to_string()).into()),
        Err(_) => Err(DeviceResourceError::MapFailed("mapping callback dropped".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComputeError;

    #[test]
    fn test_placement_follows_preference() {
        let both = [
            MemoryPlacement::DeviceLocalHostVisible,
            MemoryPlacement::HostVisible,
        ];
        assert_eq!(
            select_placement(&both, &both).unwrap(),
            MemoryPlacement::DeviceLocalHostVisible
        );
        assert_eq!(
            select_placement(&both, &[MemoryPlacement::HostVisible]).unwrap(),
            MemoryPlacement::HostVisible
        );
        assert_eq!(
            select_placement(&[MemoryPlacement::HostVisible], &both).unwrap(),
            MemoryPlacement::HostVisible
        );
    }

    #[test]
    fn test_no_placement_is_an_error() {
        let err = select_placement(
            &[MemoryPlacement::DeviceLocalHostVisible],
            &[MemoryPlacement::HostVisible],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ComputeError::DeviceResource(DeviceResourceError::NoSuitableMemoryType)
        ));
    }

    #[test]
    fn test_device_creation() {
        let Some(handle) = DeviceHandle::try_default() else {
            eprintln!("No GPU available, skipping test");
            return;
        };
        assert!(handle.placements().contains(&MemoryPlacement::HostVisible));
        assert_eq!(handle.queues().slots(), 1);
        assert!(handle.max_allocation() > 0);
        assert!(handle.select_placement().is_ok());
    }
}
