//! Execution engine: drives one compiled query through the device
//! lifecycle.
//!
//! ```text
//! Created --gpu_setup--> Configured --gpu_transfer_input--> InputReady
//!   --gpu_execute--> Executed --gpu_transfer_output--> Complete
//! any state --dispose--> Disposed
//! ```
//!
//! Each step requires the state the previous one leaves behind. Dispose
//! is idempotent, runs on drop, and releases objects in reverse order of
//! allocation whatever state the engine reached.

use std::borrow::Cow;

use crate::element::HostArray;
use crate::error::{ComputeError, DeviceResourceError, Result};
use crate::gpu::buffer::BufferDescriptor;
use crate::gpu::shader::Kernel;
use crate::gpu::DeviceHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Configured,
    InputReady,
    Executed,
    Complete,
    Disposed,
}

/// Everything the engine needs: the buffer manifest and the kernel.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Input descriptors, in binding-slot order.
    pub inputs: Vec<BufferDescriptor>,
    pub output: BufferDescriptor,
    pub kernel: Kernel,
    pub workgroup_size: u32,
}

impl ExecutionContext {
    /// Workgroups dispatched along x: `ceil(count / workgroup_size)`.
    pub fn workgroups(&self) -> u64 {
        let size = u64::from(self.workgroup_size.max(1));
        (self.output.count as u64).div_ceil(size)
    }

    pub fn binding_count(&self) -> u32 {
        self.inputs.len() as u32 + 1
    }
}

/// Submission fence: completes when the device finishes the submission.
struct Fence {
    index: wgpu::SubmissionIndex,
}

impl Fence {
    /// Block until the submission completes. Other submissions on the
    /// shared queue may still be in flight afterwards.
    fn wait(&self, device: &wgpu::Device) {
        let result = device.poll(wgpu::Maintain::WaitForSubmissionIndex(self.index.clone()));
        tracing::trace!(queue_empty = result.is_queue_empty(), "fence signalled");
    }
}

pub struct ExecutionEngine<'d> {
    handle: &'d DeviceHandle,
    context: ExecutionContext,
    state: EngineState,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: Option<wgpu::PipelineLayout>,
    shader: Option<wgpu::ShaderModule>,
    pipeline: Option<wgpu::ComputePipeline>,
    bind_group: Option<wgpu::BindGroup>,
    commands: Option<wgpu::CommandBuffer>,
    fence: Option<Fence>,
}

impl<'d> ExecutionEngine<'d> {
    pub fn new(handle: &'d DeviceHandle, context: ExecutionContext) -> Self {
        Self {
            handle,
            context,
            state: EngineState::Created,
            bind_group_layout: None,
            pipeline_layout: None,
            shader: None,
            pipeline: None,
            bind_group: None,
            commands: None,
            fence: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Allocate buffers, build the pipeline and record the command buffer:
    /// uploads, one dispatch, readback.
    pub fn gpu_setup(&mut self) -> Result<()> {
        self.expect_state(EngineState::Created, "gpu_setup")?;
        let _span = tracing::debug_span!("gpu_setup").entered();
        let handle = self.handle;
        let device = handle.device();
        let limits = handle.limits();
        let label = handle.config().label.as_str();

        let bindings = self.context.binding_count();
        if bindings > limits.max_storage_buffers_per_shader_stage {
            return Err(DeviceResourceError::TooManyBindings {
                requested: bindings,
                limit: limits.max_storage_buffers_per_shader_stage,
            }
            .into());
        }
        let workgroups = self.context.workgroups();
        if workgroups > u64::from(limits.max_compute_workgroups_per_dimension) {
            return Err(DeviceResourceError::DispatchTooLarge {
                workgroups,
                limit: limits.max_compute_workgroups_per_dimension,
            }
            .into());
        }

        for input in &mut self.context.inputs {
            input.initialize(handle)?;
        }
        self.context.output.initialize(handle)?;

        let entries: Vec<wgpu::BindGroupLayoutEntry> = self
            .context
            .inputs
            .iter()
            .map(|b| (b.slot, true))
            .chain(std::iter::once((self.context.output.slot, false)))
            .map(|(binding, read_only)| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Naga(Cow::Owned(self.context.kernel.module.clone())),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(&self.context.kernel.entry_point),
            compilation_options: Default::default(),
            cache: None,
        });
        let pipeline_error = pollster::block_on(device.pop_error_scope());
        self.bind_group_layout = Some(bind_group_layout);
        self.pipeline_layout = Some(pipeline_layout);
        self.shader = Some(shader);
        self.pipeline = Some(pipeline);
        if let Some(error) = pipeline_error {
            return Err(ComputeError::ShaderCompile {
                message: "pipeline creation rejected the kernel".to_string(),
                diagnostic: error.to_string(),
            });
        }

        let bind_group = {
            let mut entries = Vec::with_capacity(bindings as usize);
            for buffer in self.context.inputs.iter().chain(std::iter::once(&self.context.output)) {
                entries.push(wgpu::BindGroupEntry {
                    binding: buffer.slot,
                    resource: buffer.binding()?,
                });
            }
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: self.layout()?,
                entries: &entries,
            })
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        for input in &self.context.inputs {
            input.record_transfer(&mut encoder)?;
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(self.pipeline()?);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups as u32, 1, 1);
        }
        self.context.output.record_transfer(&mut encoder)?;
        self.bind_group = Some(bind_group);
        self.commands = Some(encoder.finish());

        tracing::debug!(
            inputs = self.context.inputs.len(),
            workgroups,
            workgroup_size = self.context.workgroup_size,
            "pipeline configured"
        );
        self.state = EngineState::Configured;
        Ok(())
    }

    pub fn gpu_transfer_input(&mut self) -> Result<()> {
        self.expect_state(EngineState::Configured, "gpu_transfer_input")?;
        let _span = tracing::debug_span!("gpu_transfer_input").entered();
        for input in &self.context.inputs {
            input.write(self.handle)?;
        }
        self.state = EngineState::InputReady;
        Ok(())
    }

    /// Submit the recorded commands on a pooled queue and wait for them.
    /// The queue slot goes back to the pool once the fence signals.
    pub fn gpu_execute(&mut self) -> Result<()> {
        self.expect_state(EngineState::InputReady, "gpu_execute")?;
        let _span = tracing::debug_span!("gpu_execute").entered();
        let commands = self
            .commands
            .take()
            .ok_or_else(|| ComputeError::usage("command buffer already submitted"))?;

        let lease = self.handle.queues().acquire()?;
        let fence = Fence {
            index: lease.submit(std::iter::once(commands)),
        };
        fence.wait(self.handle.device());
        drop(lease);

        self.fence = Some(fence);
        self.state = EngineState::Executed;
        Ok(())
    }

    pub fn gpu_transfer_output(&mut self) -> Result<()> {
        self.expect_state(EngineState::Executed, "gpu_transfer_output")?;
        let _span = tracing::debug_span!("gpu_transfer_output").entered();
        self.context.output.read(self.handle)?;
        self.state = EngineState::Complete;
        Ok(())
    }

    /// Run every remaining step in order.
    pub fn run(&mut self) -> Result<()> {
        if self.state == EngineState::Created {
            self.gpu_setup()?;
        }
        if self.state == EngineState::Configured {
            self.gpu_transfer_input()?;
        }
        if self.state == EngineState::InputReady {
            self.gpu_execute()?;
        }
        if self.state == EngineState::Executed {
            self.gpu_transfer_output()?;
        }
        self.expect_state(EngineState::Complete, "run")
    }

    /// The result array, once the engine is complete.
    pub fn take_output(&mut self) -> Result<HostArray> {
        self.expect_state(EngineState::Complete, "take_output")?;
        self.context
            .output
            .take_host()
            .ok_or_else(|| ComputeError::usage("output already taken"))
    }

    pub fn dispose(&mut self) {
        if self.state == EngineState::Disposed {
            return;
        }
        self.commands = None;
        self.bind_group = None;
        self.pipeline = None;
        self.shader = None;
        self.pipeline_layout = None;
        self.bind_group_layout = None;
        self.fence = None;
        self.context.output.release();
        for input in self.context.inputs.iter_mut().rev() {
            input.release();
        }
        tracing::trace!(from = ?self.state, "engine disposed");
        self.state = EngineState::Disposed;
    }

    fn expect_state(&self, expected: EngineState, step: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ComputeError::usage(format!(
                "{step} requires state {expected:?}, engine is {:?}",
                self.state
            )))
        }
    }

    fn layout(&self) -> Result<&wgpu::BindGroupLayout> {
        self.bind_group_layout
            .as_ref()
            .ok_or_else(|| ComputeError::usage("bind group layout missing"))
    }

    fn pipeline(&self) -> Result<&wgpu::ComputePipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| ComputeError::usage("pipeline missing"))
    }
}

impl Drop for ExecutionEngine<'_> {
    fn drop(&mut self) {
        self.dispose();
    }
}
