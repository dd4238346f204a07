//! Kernel-language spellings of types, names and literal values.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{ComputeError, Result};
use crate::expr::{ElementType, RecordType, Value};

/// Words a lower-cased record or field name must not collide with.
const RESERVED: &[&str] = &[
    "array", "atomic", "bitcast", "bool", "break", "case", "const", "continue", "default",
    "discard", "else", "enable", "f16", "f32", "false", "fn", "for", "i32", "if", "let", "loop",
    "mat2x2", "mat2x3", "mat2x4", "mat3x2", "mat3x3", "mat3x4", "mat4x2", "mat4x3", "mat4x4",
    "override", "ptr", "requires", "return", "sampler", "struct", "switch", "texture", "true",
    "u32", "var", "vec2", "vec3", "vec4", "while", "main", "gid",
];

/// Lower-cased identifier, with `_` replacing anything the kernel
/// language would not accept and a trailing `_` after reserved words.
pub fn identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    // Identifiers may not start with a double underscore.
    if out.starts_with("__") {
        out.insert(0, 'r');
    }
    if RESERVED.contains(&out.as_str()) || is_generated_name(&out) {
        out.push('_');
    }
    out
}

/// Names the compiler hands out itself: `bufN` and `vN`.
fn is_generated_name(name: &str) -> bool {
    ["buf", "v"].iter().any(|prefix| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// Struct names given to the record types of one kernel.
///
/// Records are matched by schema. Two schemas whose names sanitize to the
/// same identifier get distinct names: the later one takes a `_N` suffix.
#[derive(Debug, Default)]
pub struct RecordNames {
    assigned: Vec<(Arc<RecordType>, String)>,
    taken: HashSet<String>,
}

impl RecordNames {
    pub fn get(&self, record: &RecordType) -> Option<&str> {
        self.assigned
            .iter()
            .find(|(r, _)| **r == *record)
            .map(|(_, name)| name.as_str())
    }

    /// The name of `record`, assigning a fresh one on first use.
    pub fn assign(&mut self, record: &Arc<RecordType>) -> String {
        if let Some(name) = self.get(record) {
            return name.to_string();
        }
        let base = identifier(&record.name);
        let mut name = base.clone();
        let mut n = 0;
        while self.taken.contains(&name) {
            n += 1;
            name = format!("{base}_{n}");
        }
        self.taken.insert(name.clone());
        self.assigned.push((Arc::clone(record), name.clone()));
        name
    }

    fn require(&self, record: &RecordType) -> Result<&str> {
        self.get(record).ok_or_else(|| {
            ComputeError::unsupported(
                format!("record '{}' is used before it is declared", record.name),
                record,
            )
        })
    }
}

/// Kernel spelling of a value type. Records must already have a name.
pub fn type_name(ty: &ElementType, records: &RecordNames) -> Result<String> {
    Ok(match ty {
        ElementType::Bool => "bool".to_string(),
        ElementType::I32 => "i32".to_string(),
        ElementType::U32 => "u32".to_string(),
        ElementType::F32 => "f32".to_string(),
        ElementType::F64 => {
            return Err(ComputeError::unsupported(
                "double precision values have no kernel representation",
                ty,
            ))
        }
        ElementType::Vector2 => "vec2<f32>".to_string(),
        ElementType::Vector3 => "vec3<f32>".to_string(),
        ElementType::Vector4 => "vec4<f32>".to_string(),
        ElementType::Matrix4x4 => "mat4x4<f32>".to_string(),
        ElementType::Matrix3x2 => "mat3x2<f32>".to_string(),
        ElementType::Record(r) => records.require(r)?.to_string(),
    })
}

/// Spelling of a buffer element type. Booleans are stored as `u32` words.
pub fn storage_type_name(ty: &ElementType, records: &RecordNames) -> Result<String> {
    match ty {
        ElementType::Bool => Ok("u32".to_string()),
        _ => type_name(ty, records),
    }
}

/// A float literal with an explicit `f` suffix. The shortest decimal that
/// round-trips the value is used.
pub fn float_literal(value: f32) -> Result<String> {
    if !value.is_finite() {
        return Err(ComputeError::unsupported(
            "non-finite float literals have no kernel spelling",
            value,
        ));
    }
    Ok(format!("{value:?}f"))
}

pub fn literal(value: &Value, records: &RecordNames) -> Result<String> {
    Ok(match value {
        Value::Bool(b) => b.to_string(),
        Value::I32(i32::MIN) => "i32(-2147483648)".to_string(),
        Value::I32(v) => format!("{v}i"),
        Value::U32(v) => format!("{v}u"),
        Value::F32(v) => float_literal(*v)?,
        // Demoted to single precision; there is no double on the device.
        Value::F64(v) => float_literal(*v as f32)?,
        Value::Vector2(v) => constructor("vec2<f32>", &v.to_array())?,
        Value::Vector3(v) => constructor("vec3<f32>", &v.to_array())?,
        Value::Vector4(v) => constructor("vec4<f32>", &v.to_array())?,
        // Host rows become device columns: the device matrix is the transpose.
        Value::Matrix4x4(m) => constructor("mat4x4<f32>", m.rows().as_flattened())?,
        Value::Matrix3x2(m) => constructor("mat3x2<f32>", m.rows().as_flattened())?,
        Value::Record(record, fields) => {
            if fields.len() != record.fields.len() {
                return Err(ComputeError::unsupported(
                    format!(
                        "record literal has {} values for {} fields",
                        fields.len(),
                        record.fields.len()
                    ),
                    value,
                ));
            }
            let mut parts = Vec::with_capacity(fields.len());
            for (field, v) in record.fields.iter().zip(fields) {
                if field.ty == ElementType::Bool {
                    return Err(ComputeError::unsupported(
                        format!("boolean field '{}' cannot live in a record", field.name),
                        value,
                    ));
                }
                parts.push(literal(v, records)?);
            }
            format!("{}({})", records.require(record)?, parts.join(", "))
        }
    })
}

fn constructor(ty: &str, components: &[f32]) -> Result<String> {
    let parts = components
        .iter()
        .map(|c| float_literal(*c))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("{ty}({})", parts.join(", ")))
}

/// Accessor suffix for `member` on a value of type `container`.
///
/// Matrix cells `mRC` address host row R, column C. The device holds the
/// transpose, so host row R is device column R-1 and the suffix is
/// `[R-1][C-1]`.
pub fn member_suffix(container: &ElementType, member: &str) -> Option<String> {
    if container.is_matrix() {
        return container
            .matrix_cell(member)
            .map(|(row, col)| format!("[{row}][{col}]"));
    }
    container
        .member_type(member)
        .map(|_| format!(".{}", identifier(member)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::{Matrix3x2, Matrix4x4, Vector3};

    #[test]
    fn test_type_names() {
        let mut records = RecordNames::default();
        assert_eq!(type_name(&ElementType::I32, &records).unwrap(), "i32");
        assert_eq!(type_name(&ElementType::Vector3, &records).unwrap(), "vec3<f32>");
        assert_eq!(type_name(&ElementType::Matrix3x2, &records).unwrap(), "mat3x2<f32>");
        assert!(type_name(&ElementType::F64, &records).is_err());
        assert_eq!(storage_type_name(&ElementType::Bool, &records).unwrap(), "u32");
        let r = RecordType::new("PointPair", [("a", ElementType::F32)]);
        assert!(type_name(&ElementType::record(&r), &records).is_err());
        records.assign(&r);
        assert_eq!(type_name(&ElementType::record(&r), &records).unwrap(), "pointpair");
    }

    #[test]
    fn test_record_names_are_unique_per_schema() {
        let mut records = RecordNames::default();
        let upper = RecordType::new("Pair", [("a", ElementType::I32)]);
        let lower = RecordType::new("pair", [("c", ElementType::F32)]);
        let dashed = RecordType::new("pa-ir", [("a", ElementType::I32)]);
        let underscored = RecordType::new("pa_ir", [("b", ElementType::U32)]);
        assert_eq!(records.assign(&upper), "pair");
        assert_eq!(records.assign(&lower), "pair_1");
        assert_eq!(records.assign(&dashed), "pa_ir");
        assert_eq!(records.assign(&underscored), "pa_ir_1");

        let same_schema = RecordType::new("Pair", [("a", ElementType::I32)]);
        assert_eq!(records.assign(&same_schema), "pair");
        assert_eq!(records.get(&lower), Some("pair_1"));
    }

    #[test]
    fn test_identifiers_avoid_collisions() {
        assert_eq!(identifier("Mass"), "mass");
        assert_eq!(identifier("Vec3"), "vec3_");
        assert_eq!(identifier("v1"), "v1_");
        assert_eq!(identifier("value"), "value");
        assert_eq!(identifier("buf0"), "buf0_");
        assert_eq!(identifier("<>f__AnonymousType0"), "r__f__anonymoustype0");
        assert_eq!(identifier("2d"), "_2d");
    }

    #[test]
    fn test_scalar_literals() {
        let records = RecordNames::default();
        let lit = |v: &Value| literal(v, &records);
        assert_eq!(lit(&Value::I32(1)).unwrap(), "1i");
        assert_eq!(lit(&Value::I32(-7)).unwrap(), "-7i");
        assert_eq!(lit(&Value::I32(i32::MIN)).unwrap(), "i32(-2147483648)");
        assert_eq!(lit(&Value::U32(3)).unwrap(), "3u");
        assert_eq!(lit(&Value::F32(1.0)).unwrap(), "1.0f");
        assert_eq!(lit(&Value::F32(0.1)).unwrap(), "0.1f");
        assert_eq!(lit(&Value::F64(2.5)).unwrap(), "2.5f");
        assert_eq!(lit(&Value::Bool(true)).unwrap(), "true");
        assert!(lit(&Value::F32(f32::NAN)).is_err());
        assert!(lit(&Value::F64(f64::INFINITY)).is_err());
        assert!(lit(&Value::F64(1e300)).is_err());
    }

    #[test]
    fn test_composite_literals() {
        let mut records = RecordNames::default();
        assert_eq!(
            literal(&Value::Vector3(Vector3::new(1.0, 2.0, 3.0)), &records).unwrap(),
            "vec3<f32>(1.0f, 2.0f, 3.0f)"
        );
        assert_eq!(
            literal(&Value::Matrix3x2(Matrix3x2::IDENTITY), &records).unwrap(),
            "mat3x2<f32>(1.0f, 0.0f, 0.0f, 1.0f, 0.0f, 0.0f)"
        );
        let m = literal(&Value::Matrix4x4(Matrix4x4::translation(5.0, 6.0, 7.0)), &records).unwrap();
        assert!(m.ends_with("5.0f, 6.0f, 7.0f, 1.0f)"), "{m}");

        let r = RecordType::new("Pair", [("a", ElementType::I32), ("b", ElementType::F32)]);
        let value = Value::Record(r.clone(), vec![Value::I32(1), Value::F32(2.0)]);
        assert!(literal(&value, &records).is_err());
        records.assign(&RecordType::new("pair", [("c", ElementType::F32)]));
        records.assign(&r);
        assert_eq!(literal(&value, &records).unwrap(), "pair_1(1i, 2.0f)");
        assert!(literal(&Value::Record(r, vec![Value::I32(1)]), &records).is_err());
    }

    #[test]
    fn test_member_suffixes() {
        assert_eq!(
            member_suffix(&ElementType::Vector3, "x").as_deref(),
            Some(".x")
        );
        assert_eq!(
            member_suffix(&ElementType::Matrix4x4, "m12").as_deref(),
            Some("[0][1]")
        );
        assert_eq!(
            member_suffix(&ElementType::Matrix3x2, "m31").as_deref(),
            Some("[2][0]")
        );
        assert_eq!(member_suffix(&ElementType::Matrix3x2, "m13"), None);
        let r = RecordType::new("P", [("Mass", ElementType::F32)]);
        assert_eq!(
            member_suffix(&ElementType::record(&r), "Mass").as_deref(),
            Some(".mass")
        );
        assert_eq!(member_suffix(&ElementType::F32, "x"), None);
    }
}
