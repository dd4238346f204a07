//! Operator-chain tree consumed by the kernel compiler.
//!
//! A tree is built by the query surface (or any other front end) and is
//! read-only from the compiler's point of view. Leaves are constants, host
//! arrays and lambda parameters; interior nodes are `select`, `zip`,
//! arithmetic, conversions, member access, indexing, record construction
//! and math primitive calls.
//!
//! Nodes are shared through `Arc`, and pointer identity matters: the same
//! `Node` referenced twice compiles to one kernel variable.

mod types;

use std::fmt;
use std::sync::Arc;

pub use types::{ElementType, RecordField, RecordType};

use crate::element::HostArray;
use crate::numerics::{Matrix3x2, Matrix4x4, Vector2, Vector3, Vector4};

pub type Node = Arc<Expr>;

/// A literal value, as produced by partial evaluation of captured host data.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    F64(f64),
    Vector2(Vector2),
    Vector3(Vector3),
    Vector4(Vector4),
    Matrix4x4(Matrix4x4),
    Matrix3x2(Matrix3x2),
    Record(Arc<RecordType>, Vec<Value>),
}

impl Value {
    pub fn ty(&self) -> ElementType {
        match self {
            Value::Bool(_) => ElementType::Bool,
            Value::I32(_) => ElementType::I32,
            Value::U32(_) => ElementType::U32,
            Value::F32(_) => ElementType::F32,
            Value::F64(_) => ElementType::F64,
            Value::Vector2(_) => ElementType::Vector2,
            Value::Vector3(_) => ElementType::Vector3,
            Value::Vector4(_) => ElementType::Vector4,
            Value::Matrix4x4(_) => ElementType::Matrix4x4,
            Value::Matrix3x2(_) => ElementType::Matrix3x2,
            Value::Record(r, _) => ElementType::Record(Arc::clone(r)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// Recognized math primitives. The set is closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MathFn {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Abs,
    Clamp,
    Lerp,
    Pow,
    Exp,
    Log,
    Floor,
    Ceiling,
    Round,
    Dot,
    Cross,
    Length,
    Distance,
}

impl MathFn {
    /// Kernel-side function name.
    pub fn kernel_name(self) -> &'static str {
        match self {
            MathFn::Sin => "sin",
            MathFn::Cos => "cos",
            MathFn::Tan => "tan",
            MathFn::Asin => "asin",
            MathFn::Acos => "acos",
            MathFn::Atan => "atan",
            MathFn::Abs => "abs",
            MathFn::Clamp => "clamp",
            MathFn::Lerp => "mix",
            MathFn::Pow => "pow",
            MathFn::Exp => "exp",
            MathFn::Log => "log",
            MathFn::Floor => "floor",
            MathFn::Ceiling => "ceil",
            MathFn::Round => "round",
            MathFn::Dot => "dot",
            MathFn::Cross => "cross",
            MathFn::Length => "length",
            MathFn::Distance => "distance",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            MathFn::Clamp | MathFn::Lerp => 3,
            MathFn::Pow | MathFn::Dot | MathFn::Cross | MathFn::Distance => 2,
            _ => 1,
        }
    }

    /// Declared kernel-side signature `(returns, parameters)` for the
    /// primitives whose host counterparts are double precision.
    ///
    /// A conversion wrapping such a call, or wrapping one of its
    /// arguments, is spelled with the declared type instead of the
    /// host-side one.
    pub fn declared_signature(self) -> Option<(ElementType, Vec<ElementType>)> {
        match self {
            MathFn::Sin
            | MathFn::Cos
            | MathFn::Tan
            | MathFn::Asin
            | MathFn::Acos
            | MathFn::Atan
            | MathFn::Log
            | MathFn::Floor
            | MathFn::Ceiling
            | MathFn::Round
            | MathFn::Exp => Some((ElementType::F32, vec![ElementType::F32])),
            MathFn::Pow => Some((ElementType::F32, vec![ElementType::F32, ElementType::F32])),
            _ => None,
        }
    }
}

/// A lambda parameter, resolved by name inside its lambda body.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: ElementType,
}

impl Parameter {
    pub fn new(name: &str, ty: ElementType) -> Self {
        Self {
            name: name.to_string(),
            ty,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Lambda {
    pub parameters: Vec<Parameter>,
    pub body: Node,
}

pub enum Expr {
    Constant(Value),
    /// Reference to a host array (or to the data behind a sub-query).
    Array(HostArray),
    Parameter(Parameter),
    /// Element-wise map.
    Select {
        source: Node,
        selector: Lambda,
    },
    /// Pairwise combine of two chains.
    Zip {
        first: Node,
        second: Node,
        selector: Lambda,
    },
    Binary {
        op: BinaryOp,
        lhs: Node,
        rhs: Node,
        ty: ElementType,
    },
    Negate {
        operand: Node,
        ty: ElementType,
    },
    /// Implicit or explicit numeric conversion.
    Convert {
        operand: Node,
        ty: ElementType,
    },
    Member {
        target: Node,
        member: String,
        ty: ElementType,
    },
    Index {
        array: Node,
        index: Node,
        ty: ElementType,
    },
    /// Construction of a structured (possibly anonymous) value.
    New {
        record: Arc<RecordType>,
        args: Vec<Node>,
    },
    Call {
        function: MathFn,
        args: Vec<Node>,
        ty: ElementType,
    },
}

impl Expr {
    pub fn ty(&self) -> ElementType {
        match self {
            Expr::Constant(v) => v.ty(),
            Expr::Array(a) => a.element_type().clone(),
            Expr::Parameter(p) => p.ty.clone(),
            Expr::Select { selector, .. } | Expr::Zip { selector, .. } => selector.body.ty(),
            Expr::Binary { ty, .. }
            | Expr::Negate { ty, .. }
            | Expr::Convert { ty, .. }
            | Expr::Member { ty, .. }
            | Expr::Index { ty, .. }
            | Expr::Call { ty, .. } => ty.clone(),
            Expr::New { record, .. } => ElementType::Record(Arc::clone(record)),
        }
    }

    /// Whether this node is one of the two query operators.
    pub fn is_query(&self) -> bool {
        matches!(self, Expr::Select { .. } | Expr::Zip { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Constant(_) => "constant",
            Expr::Array(_) => "array",
            Expr::Parameter(_) => "parameter",
            Expr::Select { .. } => "select",
            Expr::Zip { .. } => "zip",
            Expr::Binary { .. } => "binary",
            Expr::Negate { .. } => "negate",
            Expr::Convert { .. } => "convert",
            Expr::Member { .. } => "member",
            Expr::Index { .. } => "index",
            Expr::New { .. } => "new",
            Expr::Call { .. } => "call",
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(v) => write!(f, "{:?}", v),
            Expr::Array(a) => write!(f, "{:?}", a),
            Expr::Parameter(p) => write!(f, "{}", p.name),
            Expr::Select { source, selector } => {
                write!(f, "{:?}.select({:?})", source, LambdaDebug(selector))
            }
            Expr::Zip {
                first,
                second,
                selector,
            } => write!(
                f,
                "{:?}.zip({:?}, {:?})",
                first,
                second,
                LambdaDebug(selector)
            ),
            Expr::Binary { op, lhs, rhs, .. } => {
                write!(f, "({:?} {} {:?})", lhs, op.symbol(), rhs)
            }
            Expr::Negate { operand, .. } => write!(f, "-{:?}", operand),
            Expr::Convert { operand, ty } => write!(f, "({}){:?}", ty, operand),
            Expr::Member { target, member, .. } => write!(f, "{:?}.{}", target, member),
            Expr::Index { array, index, .. } => write!(f, "{:?}[{:?}]", array, index),
            Expr::New { record, args } => write!(f, "new {}{:?}", record.name, args),
            Expr::Call { function, args, .. } => write!(f, "{:?}{:?}", function, args),
        }
    }
}

struct LambdaDebug<'a>(&'a Lambda);

impl fmt::Debug for LambdaDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.parameters.iter().map(|p| p.name.as_str()).collect();
        write!(f, "({}) => {:?}", names.join(", "), self.0.body)
    }
}

#[cfg(test)]
mod tests;
