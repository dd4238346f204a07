//! Query surface: typed select/zip chains over host arrays, and an
//! expression builder for their lambda bodies.
//!
//! ```ignore
//! let values = Query::new(&[1, 2, 3]);
//! let doubled: Query<i32> = values.select(|x| x * 2);
//! assert_eq!(doubled.to_vec(&device)?, vec![2, 4, 6]);
//! ```
//!
//! Building a query records a tree; nothing runs until `to_vec`.

use std::marker::PhantomData;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};
use std::sync::Arc;

use crate::element::{Element, HostArray};
use crate::error::{ComputeError, Result};
use crate::expr::{BinaryOp, ElementType, Expr, Lambda, MathFn, Node, Parameter, RecordType, Value};
use crate::gpu::{ComputeProfile, DeviceHandle};
use crate::numerics::{Matrix3x2, Matrix4x4, Vector2, Vector3, Vector4};

/// A lazily built query producing elements of type `T`.
pub struct Query<T> {
    node: Node,
    _element: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            _element: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Query({:?})", self.node)
    }
}

impl<T: Element> Query<T> {
    /// A query over a copy of `values`.
    pub fn new(values: &[T]) -> Self {
        Self::wrap(HostArray::from_slice(values))
    }

    /// A query over an existing host array. Queries built from clones of
    /// one array share its device buffer.
    pub fn from_array(array: HostArray) -> Result<Self> {
        let expected = T::element_type();
        if *array.element_type() != expected {
            return Err(ComputeError::usage(format!(
                "array holds {} elements, query expects {}",
                array.element_type(),
                expected
            )));
        }
        Ok(Self::wrap(array))
    }

    fn wrap(array: HostArray) -> Self {
        Self {
            node: Arc::new(Expr::Array(array)),
            _element: PhantomData,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Element-wise map.
    pub fn select<U: Element>(&self, selector: impl FnOnce(Ex) -> Ex) -> Query<U> {
        let x = Parameter::new("x", T::element_type());
        let body = selector(Ex::parameter(&x)).conform(&U::element_type());
        Query {
            node: Arc::new(Expr::Select {
                source: Arc::clone(&self.node),
                selector: Lambda {
                    parameters: vec![x],
                    body: body.0,
                },
            }),
            _element: PhantomData,
        }
    }

    /// Pairwise combine with `other`. Both chains must have the same length.
    pub fn zip<U: Element, R: Element>(
        &self,
        other: &Query<U>,
        selector: impl FnOnce(Ex, Ex) -> Ex,
    ) -> Query<R> {
        let x = Parameter::new("x", T::element_type());
        let y = Parameter::new("y", U::element_type());
        let body = selector(Ex::parameter(&x), Ex::parameter(&y)).conform(&R::element_type());
        Query {
            node: Arc::new(Expr::Zip {
                first: Arc::clone(&self.node),
                second: Arc::clone(&other.node),
                selector: Lambda {
                    parameters: vec![x, y],
                    body: body.0,
                },
            }),
            _element: PhantomData,
        }
    }

    /// Compile and run the query, returning its elements in order.
    pub fn to_vec(&self, device: &DeviceHandle) -> Result<Vec<T>> {
        crate::api::execute(&self.node, device)
    }

    pub fn to_vec_profiled(&self, device: &DeviceHandle) -> Result<(Vec<T>, ComputeProfile)> {
        crate::api::execute_profiled(&self.node, device)
    }
}

/// An expression inside a lambda body.
#[derive(Clone, Debug)]
pub struct Ex(Node);

impl Ex {
    pub fn from_node(node: Node) -> Self {
        Self(node)
    }

    pub fn node(&self) -> &Node {
        &self.0
    }

    pub fn into_node(self) -> Node {
        self.0
    }

    pub fn ty(&self) -> ElementType {
        self.0.ty()
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Self(Arc::new(Expr::Constant(value.into())))
    }

    pub fn parameter(p: &Parameter) -> Self {
        Self(Arc::new(Expr::Parameter(p.clone())))
    }

    /// A captured host array, usable only through [`Ex::at`].
    pub fn array(array: &HostArray) -> Self {
        Self(Arc::new(Expr::Array(array.clone())))
    }

    /// Element `index` of a captured array.
    pub fn at(&self, index: impl Into<Ex>) -> Self {
        let ty = self.ty();
        let index = index.into().conform(&ElementType::U32);
        Self(Arc::new(Expr::Index {
            array: Arc::clone(&self.0),
            index: index.0,
            ty,
        }))
    }

    /// Field, vector component (`x y z w`) or matrix cell (`mRC`).
    ///
    /// An unknown member keeps the container's type; the kernel compiler
    /// rejects it.
    pub fn field(&self, member: &str) -> Self {
        let container = self.ty();
        let ty = container.member_type(member).unwrap_or(container);
        Self(Arc::new(Expr::Member {
            target: Arc::clone(&self.0),
            member: member.to_string(),
            ty,
        }))
    }

    pub fn cast(&self, ty: ElementType) -> Self {
        Self(Arc::new(Expr::Convert {
            operand: Arc::clone(&self.0),
            ty,
        }))
    }

    pub fn cast_to<T: Element>(&self) -> Self {
        self.cast(T::element_type())
    }

    /// Construct a record value from its fields, in declaration order.
    pub fn record(record: &Arc<RecordType>, fields: Vec<Ex>) -> Self {
        let args = fields
            .into_iter()
            .enumerate()
            .map(|(i, ex)| match record.fields.get(i) {
                Some(field) => ex.conform(&field.ty).0,
                None => ex.0,
            })
            .collect();
        Self(Arc::new(Expr::New {
            record: Arc::clone(record),
            args,
        }))
    }

    pub fn call(function: MathFn, args: Vec<Ex>, ty: ElementType) -> Self {
        Self(Arc::new(Expr::Call {
            function,
            args: args.into_iter().map(|a| a.0).collect(),
            ty,
        }))
    }

    fn unary_math(&self, function: MathFn) -> Self {
        Self::call(function, vec![self.clone()], self.ty())
    }

    pub fn sin(&self) -> Self {
        self.unary_math(MathFn::Sin)
    }

    pub fn cos(&self) -> Self {
        self.unary_math(MathFn::Cos)
    }

    pub fn tan(&self) -> Self {
        self.unary_math(MathFn::Tan)
    }

    pub fn asin(&self) -> Self {
        self.unary_math(MathFn::Asin)
    }

    pub fn acos(&self) -> Self {
        self.unary_math(MathFn::Acos)
    }

    pub fn atan(&self) -> Self {
        self.unary_math(MathFn::Atan)
    }

    pub fn abs(&self) -> Self {
        self.unary_math(MathFn::Abs)
    }

    pub fn exp(&self) -> Self {
        self.unary_math(MathFn::Exp)
    }

    pub fn log(&self) -> Self {
        self.unary_math(MathFn::Log)
    }

    pub fn floor(&self) -> Self {
        self.unary_math(MathFn::Floor)
    }

    pub fn ceiling(&self) -> Self {
        self.unary_math(MathFn::Ceiling)
    }

    pub fn round(&self) -> Self {
        self.unary_math(MathFn::Round)
    }

    pub fn pow(&self, exponent: impl Into<Ex>) -> Self {
        let exponent = exponent.into().conform(&self.ty());
        Self::call(MathFn::Pow, vec![self.clone(), exponent], self.ty())
    }

    pub fn clamp(&self, low: impl Into<Ex>, high: impl Into<Ex>) -> Self {
        let ty = self.ty();
        let (low, high) = (low.into().conform(&ty), high.into().conform(&ty));
        Self::call(MathFn::Clamp, vec![self.clone(), low, high], ty)
    }

    /// Linear interpolation towards `other` by `amount`.
    pub fn lerp(&self, other: impl Into<Ex>, amount: impl Into<Ex>) -> Self {
        let ty = self.ty();
        let other = other.into().conform(&ty);
        let amount = amount.into().conform(&ty);
        Self::call(MathFn::Lerp, vec![self.clone(), other, amount], ty)
    }

    pub fn dot(&self, other: impl Into<Ex>) -> Self {
        Self::call(MathFn::Dot, vec![self.clone(), other.into()], ElementType::F32)
    }

    pub fn cross(&self, other: impl Into<Ex>) -> Self {
        Self::call(MathFn::Cross, vec![self.clone(), other.into()], ElementType::Vector3)
    }

    pub fn length(&self) -> Self {
        Self::call(MathFn::Length, vec![self.clone()], ElementType::F32)
    }

    pub fn distance(&self, other: impl Into<Ex>) -> Self {
        Self::call(MathFn::Distance, vec![self.clone(), other.into()], ElementType::F32)
    }

    /// Bring `self` to `ty` the way an implicit host conversion would:
    /// scalar literals are re-typed in place, other scalars are wrapped
    /// in a conversion, anything else is left alone.
    fn conform(self, ty: &ElementType) -> Self {
        let own = self.ty();
        if own == *ty || !own.is_scalar() || !ty.is_scalar() {
            return self;
        }
        if let Expr::Constant(value) = &*self.0 {
            if let Some(converted) = convert_literal(value, ty) {
                return Self::lit(converted);
            }
        }
        self.cast(ty.clone())
    }

    fn binary(self, op: BinaryOp, rhs: Ex) -> Self {
        let (lhs, rhs) = coerce_pair(self, rhs);
        let (l, r) = (lhs.ty(), rhs.ty());
        let ty = if l.is_scalar() && !r.is_scalar() { r } else { l };
        Self(Arc::new(Expr::Binary {
            op,
            lhs: lhs.0,
            rhs: rhs.0,
            ty,
        }))
    }
}

/// Re-type a literal operand to match a scalar on the other side.
fn coerce_pair(lhs: Ex, rhs: Ex) -> (Ex, Ex) {
    let (l, r) = (lhs.ty(), rhs.ty());
    if l == r || !l.is_scalar() || !r.is_scalar() {
        // Vector/matrix scaling takes a single-precision scalar.
        if l.is_scalar() && !r.is_scalar() {
            return (lhs.conform(&ElementType::F32), rhs);
        }
        if r.is_scalar() && !l.is_scalar() {
            return (lhs, rhs.conform(&ElementType::F32));
        }
        return (lhs, rhs);
    }
    match (is_literal(&lhs), is_literal(&rhs)) {
        (false, true) => (lhs, rhs.conform(&l)),
        (true, false) => (lhs.conform(&r), rhs),
        _ => {
            let wider = wider_scalar(&l, &r);
            (lhs.conform(&wider), rhs.conform(&wider))
        }
    }
}

fn is_literal(ex: &Ex) -> bool {
    matches!(&*ex.0, Expr::Constant(_))
}

fn wider_scalar(a: &ElementType, b: &ElementType) -> ElementType {
    let rank = |t: &ElementType| match t {
        ElementType::Bool => 0,
        ElementType::U32 => 1,
        ElementType::I32 => 2,
        ElementType::F32 => 3,
        _ => 4,
    };
    if rank(a) >= rank(b) {
        a.clone()
    } else {
        b.clone()
    }
}

fn convert_literal(value: &Value, ty: &ElementType) -> Option<Value> {
    let as_f64 = match *value {
        Value::I32(v) => f64::from(v),
        Value::U32(v) => f64::from(v),
        Value::F32(v) => f64::from(v),
        Value::F64(v) => v,
        _ => return None,
    };
    Some(match ty {
        ElementType::I32 => Value::I32(as_f64 as i32),
        ElementType::U32 => Value::U32(as_f64 as u32),
        ElementType::F32 => Value::F32(as_f64 as f32),
        ElementType::F64 => Value::F64(as_f64),
        _ => return None,
    })
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl From<$ty> for Ex {
                fn from(v: $ty) -> Self {
                    Ex::lit(v)
                }
            }
        )+
    };
}

value_from! {
    bool => Bool,
    i32 => I32,
    u32 => U32,
    f32 => F32,
    f64 => F64,
    Vector2 => Vector2,
    Vector3 => Vector3,
    Vector4 => Vector4,
    Matrix4x4 => Matrix4x4,
    Matrix3x2 => Matrix3x2,
}

impl From<&Ex> for Ex {
    fn from(ex: &Ex) -> Self {
        ex.clone()
    }
}

macro_rules! binary_ops {
    ($($trait:ident :: $method:ident => $op:ident),+ $(,)?) => {
        $(
            impl<R: Into<Ex>> $trait<R> for Ex {
                type Output = Ex;
                fn $method(self, rhs: R) -> Ex {
                    self.binary(BinaryOp::$op, rhs.into())
                }
            }

            impl<R: Into<Ex>> $trait<R> for &Ex {
                type Output = Ex;
                fn $method(self, rhs: R) -> Ex {
                    self.clone().binary(BinaryOp::$op, rhs.into())
                }
            }

            binary_ops!(@scalar $trait :: $method => $op; i32, u32, f32, f64);
        )+
    };
    (@scalar $trait:ident :: $method:ident => $op:ident; $($scalar:ty),+) => {
        $(
            impl $trait<Ex> for $scalar {
                type Output = Ex;
                fn $method(self, rhs: Ex) -> Ex {
                    Ex::lit(self).binary(BinaryOp::$op, rhs)
                }
            }
        )+
    };
}

binary_ops! {
    Add::add => Add,
    Sub::sub => Sub,
    Mul::mul => Mul,
    Div::div => Div,
    Rem::rem => Rem,
}

impl Neg for Ex {
    type Output = Ex;
    fn neg(self) -> Ex {
        let ty = self.ty();
        Ex(Arc::new(Expr::Negate {
            operand: self.0,
            ty,
        }))
    }
}

impl Neg for &Ex {
    type Output = Ex;
    fn neg(self) -> Ex {
        -self.clone()
    }
}
