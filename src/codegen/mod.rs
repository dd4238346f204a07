//! Kernel compiler: operator-chain tree to compute kernel source plus the
//! buffer manifest that binds host data to it.
//!
//! The chain is compiled source-first. Every `select`/`zip` step becomes
//! one kernel variable holding that step's per-invocation value; the root
//! step's variable is stored into the output buffer. Host arrays in source
//! position are read at the invocation index, arrays inside a lambda body
//! are bound whole and indexed by the body's own expression.

pub mod source;
pub mod wgsl;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ComputeConfig;
use crate::element::HostArray;
use crate::error::{ComputeError, Result};
use crate::expr::{BinaryOp, ElementType, Expr, Lambda, MathFn, Node, RecordType};
use crate::gpu::buffer::BufferDescriptor;

use self::source::KernelSource;
use self::wgsl::RecordNames;

/// Index expression of the current invocation.
const INVOCATION: &str = "gid.x";

/// A named value in the kernel: a local (`vN`) or a bound buffer (`bufN`).
#[derive(Clone, Debug)]
pub struct KernelVariable {
    pub name: String,
    pub ty: ElementType,
    /// Binding slot, for buffers.
    pub binding: Option<u32>,
}

impl KernelVariable {
    /// Expression reading this variable's value for the current invocation.
    fn element(&self) -> String {
        match self.binding {
            Some(_) => element_access(&self.name, &self.ty, INVOCATION),
            None => self.name.clone(),
        }
    }
}

fn element_access(buffer: &str, ty: &ElementType, index: &str) -> String {
    match ty {
        ElementType::Bool => format!("({buffer}[{index}] != 0u)"),
        _ => format!("{buffer}[{index}]"),
    }
}

/// Kernel source plus the buffer manifest, before device compilation.
#[derive(Debug)]
pub struct CompiledQuery {
    pub source: String,
    /// Input descriptors in binding-slot order.
    pub inputs: Vec<BufferDescriptor>,
    pub output: BufferDescriptor,
    pub workgroup_size: u32,
}

impl CompiledQuery {
    pub fn output_type(&self) -> &ElementType {
        &self.output.element
    }

    pub fn output_count(&self) -> usize {
        self.output.count
    }
}

/// Single-use translator from one tree to one kernel.
pub struct KernelCompiler {
    source: KernelSource,
    workgroup_size: u32,
    /// Counter behind `vN` names.
    next_variable: u32,
    /// Buffer descriptors in slot order.
    inputs: Vec<BufferDescriptor>,
    /// Host array identity → its buffer variable.
    buffers: HashMap<usize, KernelVariable>,
    /// Query node identity → the variable holding its value.
    steps: HashMap<usize, KernelVariable>,
    /// Record types already declared, with their kernel names.
    records: RecordNames,
    /// Lambda parameters in scope for the body being translated.
    scope: HashMap<String, KernelVariable>,
    /// Conversion node identity → type to convert to instead of its own.
    conversions: HashMap<usize, ElementType>,
    /// Element count shared by every source-position array.
    source_count: Option<usize>,
}

fn identity(node: &Expr) -> usize {
    node as *const Expr as usize
}

impl KernelCompiler {
    pub fn new(config: &ComputeConfig) -> Self {
        Self {
            source: KernelSource::new(config.workgroup_size),
            workgroup_size: config.workgroup_size,
            next_variable: 0,
            inputs: Vec::new(),
            buffers: HashMap::new(),
            steps: HashMap::new(),
            records: RecordNames::default(),
            scope: HashMap::new(),
            conversions: HashMap::new(),
            source_count: None,
        }
    }

    /// Translate `root`, which must be a `select` or `zip`.
    pub fn compile(mut self, root: &Node) -> Result<CompiledQuery> {
        if !root.is_query() {
            return Err(ComputeError::usage(format!(
                "compute queries must end in select or zip, found {}",
                root.kind()
            )));
        }
        let _span = tracing::debug_span!("kernel_compile").entered();

        let result = self.compile_step(root)?;

        let count = self.inputs.first().map(|b| b.count).unwrap_or(0);
        let output_type = root.ty();
        let storage = self.storage_type_name(&output_type, root)?;
        let slot = self.inputs.len() as u32;
        let name = format!("buf{slot}");
        self.source.declare_buffer(slot, &name, &storage, false);
        self.source.guard_with(&name);

        let value = match output_type {
            ElementType::Bool => format!("u32({})", result.element()),
            _ => result.element(),
        };
        self.source
            .body()
            .append_line(&format!("{name}[{INVOCATION}] = {value};"));

        tracing::debug!(
            inputs = self.inputs.len(),
            steps = self.steps.len(),
            output = %output_type,
            count,
            "kernel generated"
        );

        Ok(CompiledQuery {
            source: self.source.finish(),
            inputs: self.inputs,
            output: BufferDescriptor::output(slot, output_type, count),
            workgroup_size: self.workgroup_size,
        })
    }

    /// Compile one link of the chain and return the variable holding its
    /// value. A node reached twice is compiled once.
    fn compile_step(&mut self, node: &Node) -> Result<KernelVariable> {
        if let Some(var) = self.steps.get(&identity(node)) {
            return Ok(var.clone());
        }
        let var = match &**node {
            Expr::Array(array) => return self.bind_source(array, node),
            Expr::Select { source, selector } => {
                let input = self.compile_step(source)?;
                self.emit_step(node, selector, &[input])?
            }
            Expr::Zip {
                first,
                second,
                selector,
            } => {
                let a = self.compile_step(first)?;
                let b = self.compile_step(second)?;
                self.emit_step(node, selector, &[a, b])?
            }
            other => {
                return Err(ComputeError::unsupported(
                    format!("a {} node cannot feed a query operator", other.kind()),
                    other,
                ))
            }
        };
        self.steps.insert(identity(node), var.clone());
        Ok(var)
    }

    /// `let vN: T = <lambda body>;` with the lambda parameters bound to
    /// the given inputs.
    fn emit_step(
        &mut self,
        node: &Expr,
        selector: &Lambda,
        inputs: &[KernelVariable],
    ) -> Result<KernelVariable> {
        if selector.parameters.len() != inputs.len() {
            return Err(ComputeError::usage(format!(
                "{} selector takes {} parameters, expected {}",
                node.kind(),
                selector.parameters.len(),
                inputs.len()
            )));
        }

        self.scope = selector
            .parameters
            .iter()
            .zip(inputs)
            .map(|(p, v)| (p.name.clone(), v.clone()))
            .collect();

        let ty = selector.body.ty();
        let type_name = self.type_name(&ty, node)?;
        self.next_variable += 1;
        let var = KernelVariable {
            name: format!("v{}", self.next_variable),
            ty: ty.clone(),
            binding: None,
        };

        self.source
            .body()
            .append(&format!("let {}: {} = ", var.name, type_name));
        self.translate(&selector.body)?;
        self.source.body().end_line(";");

        self.scope.clear();
        Ok(var)
    }

    /// Bind a host array read at the invocation index.
    fn bind_source(&mut self, array: &HostArray, node: &Expr) -> Result<KernelVariable> {
        match self.source_count {
            None => self.source_count = Some(array.len()),
            Some(count) if count != array.len() => {
                return Err(ComputeError::usage(format!(
                    "source arrays differ in length: {} and {}",
                    count,
                    array.len()
                )))
            }
            Some(_) => {}
        }
        self.bind_array(array, node)
    }

    fn bind_array(&mut self, array: &HostArray, node: &Expr) -> Result<KernelVariable> {
        if let Some(var) = self.buffers.get(&array.id()) {
            return Ok(var.clone());
        }
        let ty = array.element_type().clone();
        let storage = self.storage_type_name(&ty, node)?;
        let slot = self.inputs.len() as u32;
        let var = KernelVariable {
            name: format!("buf{slot}"),
            ty,
            binding: Some(slot),
        };
        self.source.declare_buffer(slot, &var.name, &storage, true);
        self.inputs.push(BufferDescriptor::input(slot, array.clone()));
        self.buffers.insert(array.id(), var.clone());
        Ok(var)
    }

    /// Declare `ty` (and the records inside it) if it is a record type.
    fn declare_type(&mut self, ty: &ElementType, node: &Expr) -> Result<()> {
        if let ElementType::Record(record) = ty {
            self.declare_record(record, node)?;
        }
        Ok(())
    }

    /// Declare `record` on first use and return its kernel name.
    fn declare_record(&mut self, record: &Arc<RecordType>, node: &Expr) -> Result<String> {
        if let Some(name) = self.records.get(record) {
            return Ok(name.to_string());
        }
        let mut fields = Vec::with_capacity(record.fields.len());
        for field in &record.fields {
            if field.ty == ElementType::Bool {
                return Err(ComputeError::unsupported(
                    format!(
                        "boolean field '{}' of '{}' has no storage layout",
                        field.name, record.name
                    ),
                    node,
                ));
            }
            fields.push((wgsl::identifier(&field.name), self.type_name(&field.ty, node)?));
        }
        let name = self.records.assign(record);
        self.source.declare_struct(&name, &fields);
        Ok(name)
    }

    fn type_name(&mut self, ty: &ElementType, node: &Expr) -> Result<String> {
        self.declare_type(ty, node)?;
        wgsl::type_name(ty, &self.records)
    }

    fn storage_type_name(&mut self, ty: &ElementType, node: &Expr) -> Result<String> {
        self.declare_type(ty, node)?;
        wgsl::storage_type_name(ty, &self.records)
    }

    fn emit(&mut self, text: &str) {
        self.source.body().append(text);
    }

    /// Append the kernel expression for a lambda-body node.
    fn translate(&mut self, node: &Expr) -> Result<()> {
        match node {
            Expr::Constant(value) => {
                self.declare_type(&value.ty(), node)?;
                let text = wgsl::literal(value, &self.records)?;
                self.emit(&text);
            }
            Expr::Parameter(p) => {
                let var = self.scope.get(&p.name).ok_or_else(|| {
                    ComputeError::unsupported(format!("parameter '{}' is not in scope", p.name), node)
                })?;
                let text = var.element();
                self.emit(&text);
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                check_binary(*op, &lhs.ty(), &rhs.ty(), node)?;
                // Operands of a product are written in swapped order:
                // host row-vector/matrix products become the same product
                // on the transposed device matrices.
                let (first, second) = match op {
                    BinaryOp::Mul => (rhs, lhs),
                    _ => (lhs, rhs),
                };
                self.emit("(");
                self.translate(first)?;
                self.emit(&format!(" {} ", op.symbol()));
                self.translate(second)?;
                self.emit(")");
            }
            Expr::Negate { operand, .. } => {
                let ty = operand.ty();
                let prefix = match ty {
                    ElementType::I32 | ElementType::F32 => "(-",
                    _ if ty.is_vector() => "(-",
                    // No unary minus on matrices.
                    _ if ty.is_matrix() => "(-1.0f * ",
                    _ => {
                        return Err(ComputeError::unsupported(
                            format!("{ty} values cannot be negated"),
                            node,
                        ))
                    }
                };
                self.emit(prefix);
                self.translate(operand)?;
                self.emit(")");
            }
            Expr::Convert { operand, ty } => self.translate_convert(node, operand, ty)?,
            Expr::Member { .. } => self.translate_member(node)?,
            Expr::Index { array, index, ty } => {
                let Expr::Array(host) = &**array else {
                    return Err(ComputeError::unsupported(
                        "only captured host arrays can be indexed",
                        node,
                    ));
                };
                let var = self.bind_array(host, array)?;
                let bool_word = *ty == ElementType::Bool;
                if bool_word {
                    self.emit("(");
                }
                self.emit(&format!("{}[", var.name));
                self.translate(index)?;
                self.emit("]");
                if bool_word {
                    self.emit(" != 0u)");
                }
            }
            Expr::New { record, args } => {
                if args.len() != record.fields.len() {
                    return Err(ComputeError::unsupported(
                        format!(
                            "'{}' has {} fields, constructed with {} values",
                            record.name,
                            record.fields.len(),
                            args.len()
                        ),
                        node,
                    ));
                }
                let name = self.declare_record(record, node)?;
                self.emit(&format!("{name}("));
                self.translate_args(args)?;
                self.emit(")");
            }
            Expr::Call { function, args, .. } => {
                if args.len() != function.arity() {
                    return Err(ComputeError::unsupported(
                        format!(
                            "{} takes {} arguments, called with {}",
                            function.kernel_name(),
                            function.arity(),
                            args.len()
                        ),
                        node,
                    ));
                }
                self.override_arguments(*function, args);
                self.emit(&format!("{}(", function.kernel_name()));
                self.translate_args(args)?;
                self.emit(")");
            }
            Expr::Select { .. } | Expr::Zip { .. } => {
                return Err(ComputeError::unsupported(
                    "query operators cannot be nested inside a lambda body",
                    node,
                ))
            }
            Expr::Array(_) => {
                return Err(ComputeError::unsupported(
                    "a whole array cannot be used as a value",
                    node,
                ))
            }
        }
        Ok(())
    }

    fn translate_args(&mut self, args: &[Node]) -> Result<()> {
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.emit(", ");
            }
            self.translate(arg)?;
        }
        Ok(())
    }

    /// A conversion is spelled with its target type, unless it wraps a
    /// math primitive with a declared signature (or is an argument of
    /// one): then the declared type wins over a differing host type.
    fn translate_convert(&mut self, node: &Expr, operand: &Node, ty: &ElementType) -> Result<()> {
        if let Expr::Call { function, args, .. } = &**operand {
            if let Some((returns, _)) = function.declared_signature() {
                if *ty == ElementType::F64 && returns != *ty {
                    self.conversions.insert(identity(node), returns);
                }
                self.override_arguments(*function, args);
            }
        }

        let target = self
            .conversions
            .get(&identity(node))
            .cloned()
            .unwrap_or_else(|| ty.clone());
        if !target.is_scalar() {
            return Err(ComputeError::unsupported(
                format!("conversion to {target} is not a numeric conversion"),
                node,
            ));
        }
        let name = wgsl::type_name(&target, &self.records)?;
        self.emit(&format!("{name}("));
        self.translate(operand)?;
        self.emit(")");
        Ok(())
    }

    /// Argument conversions to a type other than the declared parameter
    /// type are spelled with the parameter type.
    fn override_arguments(&mut self, function: MathFn, args: &[Node]) {
        let Some((_, params)) = function.declared_signature() else {
            return;
        };
        for (arg, param) in args.iter().zip(&params) {
            if let Expr::Convert { ty, .. } = &**arg {
                if ty != param {
                    self.conversions.insert(identity(arg), param.clone());
                }
            }
        }
    }

    /// Member chains on a parameter read the bound element directly;
    /// on any other expression the target is parenthesized first.
    fn translate_member(&mut self, node: &Expr) -> Result<()> {
        let mut path = Vec::new();
        let mut target = node;
        while let Expr::Member {
            target: inner,
            member,
            ..
        } = target
        {
            path.push(member.as_str());
            target = &**inner;
        }
        path.reverse();

        let mut container = target.ty();
        let mut suffix = String::new();
        for member in path {
            let missing = || {
                ComputeError::unsupported(format!("{container} has no member '{member}'"), node)
            };
            suffix.push_str(&wgsl::member_suffix(&container, member).ok_or_else(missing)?);
            let next = container.member_type(member).ok_or_else(missing)?;
            container = next;
            self.declare_type(&container, node)?;
        }

        match target {
            Expr::Parameter(_) => self.translate(target)?,
            _ => {
                self.emit("(");
                self.translate(target)?;
                self.emit(")");
            }
        }
        self.emit(&suffix);
        Ok(())
    }
}

/// Reject operand pairs with no kernel operator, or whose kernel operator
/// would not match the host one.
fn check_binary(op: BinaryOp, lhs: &ElementType, rhs: &ElementType, node: &Expr) -> Result<()> {
    let numeric =
        |t: &ElementType| matches!(t, ElementType::I32 | ElementType::U32 | ElementType::F32);
    let same = lhs == rhs;
    let scaled = |a: &ElementType, b: &ElementType| {
        (a.is_vector() || a.is_matrix()) && *b == ElementType::F32
    };
    let defined = match op {
        _ if same && numeric(lhs) => true,
        BinaryOp::Add | BinaryOp::Sub => same && (lhs.is_vector() || lhs.is_matrix()),
        BinaryOp::Mul => {
            (same && lhs.is_vector())
                || scaled(lhs, rhs)
                || scaled(rhs, lhs)
                || matches!(
                    (lhs, rhs),
                    (ElementType::Matrix4x4, ElementType::Matrix4x4)
                        | (ElementType::Vector4, ElementType::Matrix4x4)
                )
        }
        BinaryOp::Div => lhs.is_vector() && (same || *rhs == ElementType::F32),
        BinaryOp::Rem => false,
    };
    if defined {
        Ok(())
    } else {
        Err(ComputeError::unsupported(
            format!("no kernel operator for {lhs} {} {rhs}", op.symbol()),
            node,
        ))
    }
}

/// Compile `root` with the given configuration.
pub fn compile(root: &Node, config: &ComputeConfig) -> Result<CompiledQuery> {
    KernelCompiler::new(config).compile(root)
}
