//! Error taxonomy for query compilation and device execution.
//!
//! None of these are recovered internally. Every failure carries enough
//! context (the offending node or the raw compiler diagnostic) to be
//! diagnosed without re-running the query.

use thiserror::Error;

/// The single externally visible failure signal of the crate.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// The tree contains a node shape, member, call or type the kernel
    /// compiler does not translate. The operator set must be extended.
    #[error("unsupported expression: {message} (at {node})")]
    UnsupportedExpression { message: String, node: String },

    /// The shader compiler rejected generated kernel source.
    #[error("shader compilation failed: {message}\n{diagnostic}")]
    ShaderCompile { message: String, diagnostic: String },

    #[error(transparent)]
    DeviceResource(#[from] DeviceResourceError),

    /// The caller built a query the core cannot execute.
    #[error("usage error: {0}")]
    Usage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Failures acquiring or using device-side resources.
#[derive(Debug, Error)]
pub enum DeviceResourceError {
    #[error("no suitable physical device found")]
    NoSuitableDevice,

    #[error("logical device request failed: {0}")]
    DeviceRequest(String),

    #[error("no suitable memory type found for storage buffer")]
    NoSuitableMemoryType,

    /// Single allocations beyond the device limit are surfaced, not chunked.
    #[error("allocation of {requested} bytes exceeds the device limit of {limit} bytes")]
    AllocationTooLarge { requested: u64, limit: u64 },

    #[error("out of device memory: {0}")]
    OutOfDeviceMemory(String),

    #[error("kernel binds {requested} storage buffers, the device allows {limit}")]
    TooManyBindings { requested: u32, limit: u32 },

    #[error("dispatch of {workgroups} workgroups exceeds the device limit of {limit}")]
    DispatchTooLarge { workgroups: u64, limit: u32 },

    #[error("buffer mapping failed: {0}")]
    MapFailed(String),

    #[error("device queue pool is closed")]
    QueuePoolClosed,
}

pub type Result<T> = std::result::Result<T, ComputeError>;

impl ComputeError {
    pub(crate) fn unsupported(message: impl Into<String>, node: impl std::fmt::Debug) -> Self {
        let mut rendered = format!("{:?}", node);
        if rendered.len() > 160 {
            let mut cut = 160;
            while !rendered.is_char_boundary(cut) {
                cut -= 1;
            }
            rendered.truncate(cut);
            rendered.push_str("...");
        }
        Self::UnsupportedExpression {
            message: message.into(),
            node: rendered,
        }
    }

    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_truncates_long_nodes() {
        let long = "x".repeat(400);
        let err = ComputeError::unsupported("too long", &long);
        match err {
            ComputeError::UnsupportedExpression { node, message } => {
                assert_eq!(message, "too long");
                assert!(node.ends_with("..."));
                assert!(node.len() <= 164);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_device_error_converts() {
        let err: ComputeError = DeviceResourceError::NoSuitableMemoryType.into();
        assert!(matches!(
            err,
            ComputeError::DeviceResource(DeviceResourceError::NoSuitableMemoryType)
        ));
        assert_eq!(
            err.to_string(),
            "no suitable memory type found for storage buffer"
        );
    }
}
