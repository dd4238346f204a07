use std::fmt;
use std::sync::Arc;

/// Static element type of a tree node or a host array.
///
/// Every node carries its type before compilation; the kernel compiler
/// only maps these types, it never infers them.
#[derive(Clone, Debug, PartialEq)]
pub enum ElementType {
    Bool,
    I32,
    U32,
    F32,
    /// Double precision exists only on the host side of an expression.
    /// It has no kernel spelling and survives translation only through a
    /// declared-type override or as a demoted literal.
    F64,
    Vector2,
    Vector3,
    Vector4,
    Matrix4x4,
    /// Three rows, two columns on the host; `mat3x2` column-major on the device.
    Matrix3x2,
    Record(Arc<RecordType>),
}

/// One field of a structured element type.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub ty: ElementType,
}

/// Explicit field schema for a structured host type, listed in
/// declaration order. Replaces runtime reflection over host fields.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<RecordField>,
}

impl RecordType {
    pub fn new<'a>(
        name: &str,
        fields: impl IntoIterator<Item = (&'a str, ElementType)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fields: fields
                .into_iter()
                .map(|(name, ty)| RecordField {
                    name: name.to_string(),
                    ty,
                })
                .collect(),
        })
    }

    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl ElementType {
    pub fn record(record: &Arc<RecordType>) -> Self {
        ElementType::Record(Arc::clone(record))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            ElementType::Bool
                | ElementType::I32
                | ElementType::U32
                | ElementType::F32
                | ElementType::F64
        )
    }

    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            ElementType::Vector2 | ElementType::Vector3 | ElementType::Vector4
        )
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, ElementType::Matrix4x4 | ElementType::Matrix3x2)
    }

    /// Name used as the key of the device stride table.
    pub fn host_name(&self) -> &str {
        match self {
            ElementType::Bool => "bool",
            ElementType::I32 => "i32",
            ElementType::U32 => "u32",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::Vector2 => "Vector2",
            ElementType::Vector3 => "Vector3",
            ElementType::Vector4 => "Vector4",
            ElementType::Matrix4x4 => "Matrix4x4",
            ElementType::Matrix3x2 => "Matrix3x2",
            ElementType::Record(r) => &r.name,
        }
    }

    /// Type of `member` when accessed on a value of this type.
    ///
    /// Vectors expose `x y z w`; matrices expose `mRC` with 1-based
    /// host row R and column C; records expose their schema fields.
    pub fn member_type(&self, member: &str) -> Option<ElementType> {
        match self {
            ElementType::Vector2 => matches!(member, "x" | "y").then_some(ElementType::F32),
            ElementType::Vector3 => {
                matches!(member, "x" | "y" | "z").then_some(ElementType::F32)
            }
            ElementType::Vector4 => {
                matches!(member, "x" | "y" | "z" | "w").then_some(ElementType::F32)
            }
            ElementType::Matrix4x4 | ElementType::Matrix3x2 => {
                self.matrix_cell(member).map(|_| ElementType::F32)
            }
            ElementType::Record(r) => r.field(member).map(|f| f.ty.clone()),
            _ => None,
        }
    }

    /// Zero-based (host row, host column) addressed by a matrix member name.
    pub fn matrix_cell(&self, member: &str) -> Option<(usize, usize)> {
        let (rows, cols) = match self {
            ElementType::Matrix4x4 => (4, 4),
            ElementType::Matrix3x2 => (3, 2),
            _ => return None,
        };
        let digits = member.strip_prefix('m')?.as_bytes();
        if digits.len() != 2 {
            return None;
        }
        let row = (digits[0] as char).to_digit(10)? as usize;
        let col = (digits[1] as char).to_digit(10)? as usize;
        if row == 0 || col == 0 || row > rows || col > cols {
            return None;
        }
        Some((row - 1, col - 1))
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.host_name())
    }
}
