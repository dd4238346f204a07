//! Buffer descriptors: one per kernel binding, pairing host data with the
//! device storage (and staging) buffers that carry it.

use std::num::NonZeroU64;

use crate::config::MemoryPlacement;
use crate::element::HostArray;
use crate::error::{ComputeError, DeviceResourceError, Result};
use crate::expr::ElementType;
use crate::gpu::layout::{self, ElementLayout};
use crate::gpu::{map_blocking, DeviceHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
}

struct DeviceBuffers {
    storage: wgpu::Buffer,
    staging: Option<wgpu::Buffer>,
    placement: MemoryPlacement,
}

pub struct BufferDescriptor {
    /// Binding slot in the kernel's single bind group.
    pub slot: u32,
    pub element: ElementType,
    pub count: usize,
    pub direction: TransferDirection,
    pub layout: ElementLayout,
    /// Input data, or output data once read back.
    host: Option<HostArray>,
    resources: Option<DeviceBuffers>,
}

impl BufferDescriptor {
    pub fn input(slot: u32, array: HostArray) -> Self {
        let element = array.element_type().clone();
        Self {
            slot,
            layout: ElementLayout::of(&element),
            count: array.len(),
            element,
            direction: TransferDirection::HostToDevice,
            host: Some(array),
            resources: None,
        }
    }

    pub fn output(slot: u32, element: ElementType, count: usize) -> Self {
        Self {
            slot,
            layout: ElementLayout::of(&element),
            element,
            count,
            direction: TransferDirection::DeviceToHost,
            host: None,
            resources: None,
        }
    }

    /// The host array behind an input, or the result behind an output
    /// after [`read`](Self::read).
    pub fn host(&self) -> Option<&HostArray> {
        self.host.as_ref()
    }

    pub fn take_host(&mut self) -> Option<HostArray> {
        self.host.take()
    }

    pub fn host_stride(&self) -> usize {
        self.layout.host_stride
    }

    pub fn device_stride(&self) -> usize {
        self.layout.device_stride
    }

    /// Bytes of element data in the device image.
    pub fn device_size(&self) -> u64 {
        self.layout.device_size(self.count) as u64
    }

    /// Allocation size: the device image rounded up to the mapping
    /// alignment, never zero.
    pub fn aligned_size(&self) -> u64 {
        let alignment = wgpu::COPY_BUFFER_ALIGNMENT.max(wgpu::MAP_ALIGNMENT);
        layout::align_up_u64(self.device_size().max(layout::DEVICE_WORD as u64), alignment)
    }

    /// Trailing bytes between the device image and the allocation end.
    pub fn padding(&self) -> u64 {
        self.aligned_size() - self.device_size()
    }

    pub fn placement(&self) -> Option<MemoryPlacement> {
        self.resources.as_ref().map(|r| r.placement)
    }

    pub fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    /// Allocate the storage buffer, plus a staging buffer when the
    /// placement is not directly mappable.
    pub fn initialize(&mut self, handle: &DeviceHandle) -> Result<()> {
        let size = self.aligned_size();
        let limit = handle.max_allocation();
        if size > limit {
            return Err(DeviceResourceError::AllocationTooLarge {
                requested: size,
                limit,
            }
            .into());
        }

        let placement = handle.select_placement()?;
        let (storage_usage, staging_usage) = match (placement, self.direction) {
            (MemoryPlacement::DeviceLocalHostVisible, TransferDirection::HostToDevice) => {
                (wgpu::BufferUsages::MAP_WRITE, None)
            }
            (MemoryPlacement::DeviceLocalHostVisible, TransferDirection::DeviceToHost) => {
                (wgpu::BufferUsages::MAP_READ, None)
            }
            (MemoryPlacement::HostVisible, TransferDirection::HostToDevice) => (
                wgpu::BufferUsages::COPY_DST,
                Some(wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC),
            ),
            (MemoryPlacement::HostVisible, TransferDirection::DeviceToHost) => (
                wgpu::BufferUsages::COPY_SRC,
                Some(wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST),
            ),
        };

        let device = handle.device();
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let storage = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("buffer{}", self.slot)),
            size,
            usage: wgpu::BufferUsages::STORAGE | storage_usage,
            mapped_at_creation: false,
        });
        let staging = staging_usage.map(|usage| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("staging{}", self.slot)),
                size,
                usage,
                mapped_at_creation: false,
            })
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            storage.destroy();
            if let Some(staging) = &staging {
                staging.destroy();
            }
            return Err(DeviceResourceError::OutOfDeviceMemory(error.to_string()).into());
        }

        tracing::debug!(
            slot = self.slot,
            element = %self.element,
            count = self.count,
            host_stride = self.host_stride(),
            device_stride = self.device_stride(),
            size,
            ?placement,
            "buffer allocated"
        );

        self.resources = Some(DeviceBuffers {
            storage,
            staging,
            placement,
        });
        Ok(())
    }

    /// Write host data into the mappable buffer, converting host stride to
    /// device stride.
    pub fn write(&self, handle: &DeviceHandle) -> Result<()> {
        let resources = self.resources()?;
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| ComputeError::usage(format!("buffer {} has no host data", self.slot)))?;
        let target = resources.staging.as_ref().unwrap_or(&resources.storage);

        let slice = target.slice(..);
        map_blocking(handle.device(), slice, wgpu::MapMode::Write)?;
        {
            let mut view = slice.get_mapped_range_mut();
            self.layout
                .host_to_device(self.count, host.host_bytes(), &mut view[..]);
        }
        target.unmap();
        Ok(())
    }

    /// Read the device image back into a host array.
    pub fn read(&mut self, handle: &DeviceHandle) -> Result<()> {
        let resources = self.resources()?;
        let source = resources.staging.as_ref().unwrap_or(&resources.storage);

        let slice = source.slice(..);
        map_blocking(handle.device(), slice, wgpu::MapMode::Read)?;
        let mut bytes = vec![0u8; self.layout.host_size(self.count)];
        {
            let view = slice.get_mapped_range();
            self.layout.device_to_host(self.count, &view, &mut bytes);
        }
        source.unmap();

        self.host = Some(HostArray::from_bytes(self.element.clone(), bytes)?);
        Ok(())
    }

    /// Record the staging copy for this buffer's direction, if it has one.
    pub fn record_transfer(&self, encoder: &mut wgpu::CommandEncoder) -> Result<()> {
        let resources = self.resources()?;
        if let Some(staging) = &resources.staging {
            let size = self.aligned_size();
            match self.direction {
                TransferDirection::HostToDevice => {
                    encoder.copy_buffer_to_buffer(staging, 0, &resources.storage, 0, size)
                }
                TransferDirection::DeviceToHost => {
                    encoder.copy_buffer_to_buffer(&resources.storage, 0, staging, 0, size)
                }
            }
        }
        Ok(())
    }

    /// Bind exactly the element data, so the kernel sees `count` elements.
    pub fn binding(&self) -> Result<wgpu::BindingResource<'_>> {
        let resources = self.resources()?;
        Ok(wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &resources.storage,
            offset: 0,
            size: NonZeroU64::new(self.device_size()),
        }))
    }

    /// Free device memory. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(resources) = self.resources.take() {
            if let Some(staging) = resources.staging {
                staging.destroy();
            }
            resources.storage.destroy();
        }
    }

    fn resources(&self) -> Result<&DeviceBuffers> {
        self.resources.as_ref().ok_or_else(|| {
            ComputeError::usage(format!("buffer {} used before initialization", self.slot))
        })
    }
}

impl std::fmt::Debug for BufferDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferDescriptor")
            .field("slot", &self.slot)
            .field("element", &self.element)
            .field("count", &self.count)
            .field("direction", &self.direction)
            .field("device_stride", &self.layout.device_stride)
            .field("placement", &self.placement())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::Vector3;

    #[test]
    fn test_input_descriptor_sizes() {
        let array = HostArray::from_vec(vec![Vector3::new(1.0, 2.0, 3.0); 3]);
        let desc = BufferDescriptor::input(0, array);
        assert_eq!(desc.count, 3);
        assert_eq!(desc.host_stride(), 12);
        assert_eq!(desc.device_stride(), 16);
        assert_eq!(desc.device_size(), 48);
        assert_eq!(desc.aligned_size(), 48);
        assert_eq!(desc.padding(), 0);
        assert_eq!(desc.direction, TransferDirection::HostToDevice);
        assert!(!desc.is_initialized());
    }

    #[test]
    fn test_aligned_size_pads_to_map_alignment() {
        let desc = BufferDescriptor::output(1, ElementType::I32, 3);
        assert_eq!(desc.device_size(), 12);
        assert_eq!(desc.aligned_size(), 16);
        assert_eq!(desc.padding(), 4);
        assert!(desc.host().is_none());
    }

    #[test]
    fn test_use_before_initialize_is_usage_error() {
        let desc = BufferDescriptor::output(2, ElementType::F32, 1);
        assert!(matches!(desc.binding(), Err(ComputeError::Usage(_))));
    }

    #[test]
    fn test_gpu_initialize_write_release() {
        let Some(handle) = DeviceHandle::try_default() else {
            eprintln!("No GPU available, skipping test");
            return;
        };
        let values = vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(-4.0, 5.5, 6.0)];
        let mut input = BufferDescriptor::input(0, HostArray::from_slice(&values));
        input.initialize(&handle).unwrap();
        assert_eq!(input.placement(), Some(handle.select_placement().unwrap()));
        input.write(&handle).unwrap();
        assert!(input.binding().is_ok());
        input.release();
        input.release();
        assert!(!input.is_initialized());
    }

    #[test]
    fn test_gpu_allocation_over_limit() {
        let Some(handle) = DeviceHandle::try_default() else {
            eprintln!("No GPU available, skipping test");
            return;
        };
        let count = (handle.max_allocation() / 4 + 1) as usize;
        let mut output = BufferDescriptor::output(0, ElementType::F32, count);
        assert!(matches!(
            output.initialize(&handle),
            Err(ComputeError::DeviceResource(
                DeviceResourceError::AllocationTooLarge { .. }
            ))
        ));
    }
}
