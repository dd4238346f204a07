//! Entry points: compile a query tree, prepare it for a device, execute it.

use crate::codegen::{self, CompiledQuery};
use crate::config::ComputeConfig;
use crate::element::{Element, HostArray};
use crate::error::{ComputeError, Result};
use crate::expr::Node;
use crate::gpu::profile::timed;
use crate::gpu::{ComputeProfile, DeviceHandle, ExecutionContext, ExecutionEngine, NagaCompiler, ShaderCompiler};

#[cfg(test)]
mod tests;

/// Generate kernel source and the buffer manifest for `root`. No device
/// is involved.
pub fn compile(root: &Node, config: &ComputeConfig) -> Result<CompiledQuery> {
    codegen::compile(root, config)
}

/// Compile `root` all the way to a validated kernel for `device`.
pub fn prepare(root: &Node, device: &DeviceHandle) -> Result<ExecutionContext> {
    prepare_with(root, device, &NagaCompiler::default())
}

pub fn prepare_with(
    root: &Node,
    device: &DeviceHandle,
    compiler: &dyn ShaderCompiler,
) -> Result<ExecutionContext> {
    let compiled = compile(root, device.config())?;
    let kernel = compiler.compile(&compiled.source)?;
    Ok(ExecutionContext {
        inputs: compiled.inputs,
        output: compiled.output,
        kernel,
        workgroup_size: compiled.workgroup_size,
    })
}

/// Execute `root` and return the raw result array.
pub fn execute_node(root: &Node, device: &DeviceHandle) -> Result<HostArray> {
    run(root, device, &mut ComputeProfile::default())
}

/// Execute `root`, decoding the result as `T`.
pub fn execute<T: Element>(root: &Node, device: &DeviceHandle) -> Result<Vec<T>> {
    check_result_type::<T>(root)?;
    execute_node(root, device)?.to_vec()
}

/// Like [`execute`], also reporting how long each step took.
pub fn execute_profiled<T: Element>(
    root: &Node,
    device: &DeviceHandle,
) -> Result<(Vec<T>, ComputeProfile)> {
    check_result_type::<T>(root)?;
    let mut profile = ComputeProfile::default();
    let array = run(root, device, &mut profile)?;
    tracing::debug!(
        total_ms = profile.total().as_secs_f64() * 1e3,
        "query profiled"
    );
    Ok((array.to_vec()?, profile))
}

fn check_result_type<T: Element>(root: &Node) -> Result<()> {
    let expected = T::element_type();
    let actual = root.ty();
    if expected != actual {
        return Err(ComputeError::usage(format!(
            "query produces {actual} elements, requested {expected}"
        )));
    }
    Ok(())
}

fn run(root: &Node, device: &DeviceHandle, profile: &mut ComputeProfile) -> Result<HostArray> {
    let _span = tracing::debug_span!("execute", root = root.kind()).entered();
    let context = timed(&mut profile.compile, || prepare(root, device))?;

    if context.output.count == 0 {
        tracing::debug!("empty input, device not used");
        return HostArray::from_bytes(context.output.element.clone(), Vec::new());
    }

    let mut engine = ExecutionEngine::new(device, context);
    timed(&mut profile.setup, || engine.gpu_setup())?;
    timed(&mut profile.transfer_write, || engine.gpu_transfer_input())?;
    timed(&mut profile.execution, || engine.gpu_execute())?;
    timed(&mut profile.transfer_read, || engine.gpu_transfer_output())?;
    let output = engine.take_output();
    engine.dispose();
    output
}
