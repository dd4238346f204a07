pub mod api;
pub mod codegen;
pub mod config;
pub mod diagnostic;
pub mod element;
pub mod error;
pub mod expr;
pub mod gpu;
pub mod numerics;
pub mod query;

// Re-exports: the surface most callers need
pub use api::{compile, execute, execute_node, execute_profiled, prepare, prepare_with};
pub use codegen::CompiledQuery;
pub use config::{AdapterPreference, ComputeConfig, MemoryPlacement};
pub use element::{Element, HostArray};
pub use error::{ComputeError, DeviceResourceError, Result};
pub use expr::{ElementType, RecordType};
pub use gpu::{ComputeProfile, DeviceHandle};
pub use numerics::{Matrix3x2, Matrix4x4, Vector2, Vector3, Vector4};
pub use query::{Ex, Query};
