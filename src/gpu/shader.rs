//! Shader compilation: kernel source text to a validated module.
//!
//! The compiler is a trait so the engine does not care which front end
//! produced its module. The default implementation runs naga's WGSL
//! front end and validator in process; any error is fatal and carries the
//! full rendered diagnostic.

use crate::diagnostic::{first_error_line, Diagnostic};
use crate::error::{ComputeError, Result};

pub const ENTRY_POINT: &str = "main";

/// A compiled kernel ready for pipeline creation.
#[derive(Clone, Debug)]
pub struct Kernel {
    pub module: naga::Module,
    pub source: String,
    pub entry_point: String,
}

pub trait ShaderCompiler {
    fn compile(&self, source: &str) -> Result<Kernel>;
}

#[derive(Clone, Copy, Debug)]
pub struct NagaCompiler {
    flags: naga::valid::ValidationFlags,
}

impl Default for NagaCompiler {
    fn default() -> Self {
        Self {
            flags: naga::valid::ValidationFlags::all(),
        }
    }
}

const SOURCE_NAME: &str = "kernel.wgsl";

impl ShaderCompiler for NagaCompiler {
    fn compile(&self, source: &str) -> Result<Kernel> {
        let _span = tracing::debug_span!("shader_compile", bytes = source.len()).entered();

        let module = naga::front::wgsl::parse_str(source).map_err(|e| {
            let mut diagnostic = Diagnostic::error(e.message().to_string());
            for (span, label) in e.labels() {
                if let Some(range) = span.to_range() {
                    diagnostic = diagnostic.with_label(range, label.to_string());
                }
            }
            shader_error(diagnostic, source)
        })?;

        let mut validator =
            naga::valid::Validator::new(self.flags, naga::valid::Capabilities::empty());
        validator.validate(&module).map_err(|e| {
            let mut diagnostic = Diagnostic::error(e.as_inner().to_string());
            for (span, label) in e.spans() {
                if let Some(range) = span.to_range() {
                    diagnostic = diagnostic.with_label(range, label.clone());
                }
            }
            let mut cause = std::error::Error::source(e.as_inner());
            while let Some(inner) = cause {
                diagnostic = diagnostic.with_note(inner.to_string());
                cause = inner.source();
            }
            shader_error(diagnostic, source)
        })?;

        tracing::debug!(
            functions = module.functions.len(),
            entry_points = module.entry_points.len(),
            "kernel validated"
        );

        Ok(Kernel {
            module,
            source: source.to_string(),
            entry_point: ENTRY_POINT.to_string(),
        })
    }
}

fn shader_error(diagnostic: Diagnostic, source: &str) -> ComputeError {
    let rendered = diagnostic.render(SOURCE_NAME, source);
    let message = first_error_line(&rendered)
        .map(str::to_string)
        .unwrap_or_else(|| diagnostic.headline());
    ComputeError::ShaderCompile {
        message,
        diagnostic: rendered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOUBLE: &str = "\
@group(0) @binding(0) var<storage, read> buf0: array<i32>;
@group(0) @binding(1) var<storage, read_write> buf1: array<i32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= arrayLength(&buf1)) {
        return;
    }
    buf1[gid.x] = (buf0[gid.x] * 2i);
}
";

    #[test]
    fn test_valid_kernel_compiles() {
        let kernel = NagaCompiler::default().compile(DOUBLE).unwrap();
        assert_eq!(kernel.entry_point, "main");
        assert_eq!(kernel.module.entry_points.len(), 1);
        assert_eq!(kernel.module.entry_points[0].workgroup_size, [64, 1, 1]);
        assert_eq!(kernel.source, DOUBLE);
    }

    #[test]
    fn test_syntax_error_is_fatal_with_diagnostic() {
        let broken = DOUBLE.replace("(buf0[gid.x] * 2i);", "(buf0[gid.x] * 2i)");
        match NagaCompiler::default().compile(&broken) {
            Err(ComputeError::ShaderCompile {
                message,
                diagnostic,
            }) => {
                assert!(message.to_lowercase().contains("error"), "{message}");
                assert!(diagnostic.contains("kernel.wgsl"), "{diagnostic}");
            }
            other => panic!("expected shader compile error, got {other:?}"),
        }
    }

    #[test]
    fn test_type_error_is_fatal() {
        let mistyped = DOUBLE.replace("2i", "2.0f");
        assert!(matches!(
            NagaCompiler::default().compile(&mistyped),
            Err(ComputeError::ShaderCompile { .. })
        ));
    }
}
