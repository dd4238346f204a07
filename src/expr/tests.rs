use super::*;
use crate::element::HostArray;

#[test]
fn test_vector_members() {
    assert_eq!(ElementType::Vector2.member_type("y"), Some(ElementType::F32));
    assert_eq!(ElementType::Vector2.member_type("z"), None);
    assert_eq!(ElementType::Vector4.member_type("w"), Some(ElementType::F32));
    assert_eq!(ElementType::F32.member_type("x"), None);
}

#[test]
fn test_matrix_cells() {
    assert_eq!(ElementType::Matrix4x4.matrix_cell("m11"), Some((0, 0)));
    assert_eq!(ElementType::Matrix4x4.matrix_cell("m34"), Some((2, 3)));
    assert_eq!(ElementType::Matrix3x2.matrix_cell("m32"), Some((2, 1)));
    assert_eq!(ElementType::Matrix3x2.matrix_cell("m13"), None);
    assert_eq!(ElementType::Matrix4x4.matrix_cell("m50"), None);
    assert_eq!(ElementType::Matrix4x4.matrix_cell("x"), None);
}

#[test]
fn test_record_members() {
    let pair = RecordType::new("Pair", [("a", ElementType::I32), ("b", ElementType::F32)]);
    let ty = ElementType::record(&pair);
    assert_eq!(ty.member_type("b"), Some(ElementType::F32));
    assert_eq!(ty.member_type("c"), None);
    assert_eq!(ty.host_name(), "Pair");
}

#[test]
fn test_select_type_is_body_type() {
    let source: Node = Arc::new(Expr::Array(HostArray::from_vec(vec![1i32, 2])));
    let x = Parameter::new("x", ElementType::I32);
    let body: Node = Arc::new(Expr::Convert {
        operand: Arc::new(Expr::Parameter(x.clone())),
        ty: ElementType::F32,
    });
    let select = Expr::Select {
        source,
        selector: Lambda {
            parameters: vec![x],
            body,
        },
    };
    assert_eq!(select.ty(), ElementType::F32);
    assert!(select.is_query());
    assert_eq!(select.kind(), "select");
}

#[test]
fn test_declared_signatures() {
    let (ret, params) = MathFn::Pow.declared_signature().unwrap();
    assert_eq!(ret, ElementType::F32);
    assert_eq!(params.len(), 2);
    assert!(MathFn::Dot.declared_signature().is_none());
    assert_eq!(MathFn::Lerp.kernel_name(), "mix");
    assert_eq!(MathFn::Ceiling.kernel_name(), "ceil");
    assert_eq!(MathFn::Clamp.arity(), 3);
}

#[test]
fn test_debug_rendering() {
    let x = Parameter::new("x", ElementType::I32);
    let body: Node = Arc::new(Expr::Binary {
        op: BinaryOp::Add,
        lhs: Arc::new(Expr::Parameter(x.clone())),
        rhs: Arc::new(Expr::Constant(Value::I32(1))),
        ty: ElementType::I32,
    });
    let rendered = format!("{:?}", body);
    assert_eq!(rendered, "(x + I32(1))");
}
