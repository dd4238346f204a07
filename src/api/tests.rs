use super::*;
use crate::error::DeviceResourceError;
use crate::expr::ElementType;
use crate::gpu::{BufferDescriptor, EngineState, Kernel};
use crate::numerics::Vector2;
use crate::query::Query;

fn device() -> Option<DeviceHandle> {
    let handle = DeviceHandle::try_default();
    if handle.is_none() {
        eprintln!("No GPU available, skipping test");
    }
    handle
}

struct RejectAll;

impl ShaderCompiler for RejectAll {
    fn compile(&self, _source: &str) -> Result<Kernel> {
        Err(ComputeError::ShaderCompile {
            message: "rejected".to_string(),
            diagnostic: String::new(),
        })
    }
}

#[test]
fn test_compile_needs_no_device() {
    let q: Query<f32> = Query::new(&[1.0f32, 2.0]).select(|x| &x * &x);
    let compiled = compile(q.node(), &ComputeConfig::default()).unwrap();
    assert!(compiled.source.contains("fn main("));
    assert_eq!(compiled.output_count(), 2);
}

#[test]
fn test_result_type_must_match() {
    let q: Query<i32> = Query::new(&[1i32]).select(|x| x + 1);
    assert!(check_result_type::<i32>(q.node()).is_ok());
    match check_result_type::<f32>(q.node()) {
        Err(ComputeError::Usage(msg)) => assert!(msg.contains("i32"), "{msg}"),
        other => panic!("expected usage error, got {other:?}"),
    }
}

#[test]
fn test_execute_select() {
    let Some(device) = device() else { return };
    let q: Query<i32> = Query::new(&[1i32, 2, 3, 4]).select(|x| x * 10 + 1);
    assert_eq!(execute::<i32>(q.node(), &device).unwrap(), [11, 21, 31, 41]);
}

#[test]
fn test_execute_rejects_bad_root_before_device_work() {
    let Some(device) = device() else { return };
    let q = Query::new(&[1i32]);
    assert!(matches!(
        execute_node(q.node(), &device),
        Err(ComputeError::Usage(_))
    ));
}

#[test]
fn test_execute_empty_input() {
    let Some(device) = device() else { return };
    let q: Query<Vector2> = Query::new(&[] as &[Vector2]).select(|v| v * 2.0);
    assert!(execute::<Vector2>(q.node(), &device).unwrap().is_empty());
}

#[test]
fn test_profiled_execution() {
    let Some(device) = device() else { return };
    let values: Vec<f32> = (0..1000).map(|i| i as f32).collect();
    let q: Query<f32> = Query::new(&values).select(|x| x / 2.0);
    let (out, profile) = execute_profiled::<f32>(q.node(), &device).unwrap();
    assert_eq!(out.len(), 1000);
    assert_eq!(out[999], 499.5);
    assert!(profile.total() >= profile.execution);
}

#[test]
fn test_custom_shader_compiler() {
    let Some(device) = device() else { return };
    let q: Query<u32> = Query::new(&[1u32]).select(|x| x + 1);
    assert!(matches!(
        prepare_with(q.node(), &device, &RejectAll),
        Err(ComputeError::ShaderCompile { .. })
    ));
    let context = prepare(q.node(), &device).unwrap();
    assert_eq!(context.binding_count(), 2);
    assert_eq!(context.workgroups(), 1);
}

#[test]
fn test_engine_steps_in_order() {
    let Some(device) = device() else { return };
    let q: Query<u32> = Query::new(&[5u32, 6]).select(|x| x * 3);
    let context = prepare(q.node(), &device).unwrap();
    let mut engine = ExecutionEngine::new(&device, context);

    assert!(matches!(engine.gpu_execute(), Err(ComputeError::Usage(_))));
    assert_eq!(engine.state(), EngineState::Created);

    engine.gpu_setup().unwrap();
    assert_eq!(engine.state(), EngineState::Configured);
    engine.gpu_transfer_input().unwrap();
    engine.gpu_execute().unwrap();
    engine.gpu_transfer_output().unwrap();
    assert_eq!(engine.state(), EngineState::Complete);
    assert_eq!(engine.take_output().unwrap().to_vec::<u32>().unwrap(), [15, 18]);

    engine.dispose();
    engine.dispose();
    assert_eq!(engine.state(), EngineState::Disposed);
}

#[test]
fn test_dispose_releases_partial_setup() {
    let Some(device) = device() else { return };
    let q: Query<u32> = Query::new(&[1u32, 2, 3]).select(|x| x + 1);
    let mut context = prepare(q.node(), &device).unwrap();

    // An output one element past the allocation limit: the inputs are
    // allocated before the output is refused.
    let count = usize::try_from(device.max_allocation() / 64 + 1).unwrap_or(usize::MAX);
    context.output = BufferDescriptor::output(context.output.slot, ElementType::Matrix4x4, count);
    if context.workgroups() > u64::from(device.limits().max_compute_workgroups_per_dimension) {
        eprintln!("Allocation limit too large to exceed within one dispatch, skipping");
        return;
    }

    let mut engine = ExecutionEngine::new(&device, context);
    assert!(matches!(
        engine.gpu_setup(),
        Err(ComputeError::DeviceResource(
            DeviceResourceError::AllocationTooLarge { .. }
        ))
    ));
    assert!(engine.context().inputs.iter().all(|b| b.is_initialized()));
    assert!(!engine.context().output.is_initialized());

    engine.dispose();
    assert_eq!(engine.state(), EngineState::Disposed);
    assert!(engine.context().inputs.iter().all(|b| !b.is_initialized()));
    assert!(!engine.context().output.is_initialized());
    assert!(matches!(engine.gpu_transfer_input(), Err(ComputeError::Usage(_))));
}

#[test]
fn test_allocation_limit_surfaces_as_device_error() {
    let Some(device) = device() else { return };
    let limit = device.max_allocation();
    let count = usize::try_from(limit / 4 + 1).unwrap_or(usize::MAX);
    if count > (1 << 28) {
        eprintln!("Allocation limit too large to exceed in a test, skipping");
        return;
    }
    let values = vec![0u32; count];
    let q: Query<u32> = Query::new(&values).select(|x| x + 1);
    assert!(matches!(
        execute_node(q.node(), &device),
        Err(ComputeError::DeviceResource(
            DeviceResourceError::AllocationTooLarge { .. } | DeviceResourceError::DispatchTooLarge { .. }
        ))
    ));
}
