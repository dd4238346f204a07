use super::*;
use crate::element::Element;
use crate::expr::RecordType;
use crate::numerics::{Matrix3x2, Matrix4x4, Vector2, Vector3, Vector4};

fn all_builtin_types() -> Vec<ElementType> {
    vec![
        ElementType::Bool,
        ElementType::I32,
        ElementType::U32,
        ElementType::F32,
        ElementType::Vector2,
        ElementType::Vector3,
        ElementType::Vector4,
        ElementType::Matrix4x4,
        ElementType::Matrix3x2,
    ]
}

#[test]
fn test_stride_table() {
    let expect = [
        (ElementType::Bool, 1, 4),
        (ElementType::I32, 4, 4),
        (ElementType::U32, 4, 4),
        (ElementType::F32, 4, 4),
        (ElementType::Vector2, 8, 8),
        (ElementType::Vector3, 12, 16),
        (ElementType::Vector4, 16, 16),
        (ElementType::Matrix4x4, 64, 64),
        (ElementType::Matrix3x2, 24, 24),
    ];
    for (ty, host, device) in expect {
        assert_eq!(host_stride(&ty), host, "host stride of {ty}");
        assert_eq!(device_stride(&ty), device, "device stride of {ty}");
    }
}

#[test]
fn test_device_stride_never_below_host_stride() {
    let pair = RecordType::new("Pair", [("a", ElementType::I32), ("b", ElementType::F32)]);
    let mixed = RecordType::new(
        "Mixed",
        [
            ("scale", ElementType::F32),
            ("position", ElementType::Vector3),
            ("inner", ElementType::record(&pair)),
        ],
    );
    let mut types = all_builtin_types();
    types.push(ElementType::record(&pair));
    types.push(ElementType::record(&mixed));
    for ty in types {
        let layout = ElementLayout::of(&ty);
        assert!(
            layout.device_stride >= layout.host_stride,
            "{ty}: device {} < host {}",
            layout.device_stride,
            layout.host_stride
        );
        assert_eq!(layout.device_stride % DEVICE_WORD, 0);
    }
}

#[test]
fn test_word_multiples_are_contiguous() {
    for ty in [
        ElementType::I32,
        ElementType::F32,
        ElementType::Vector2,
        ElementType::Vector4,
        ElementType::Matrix4x4,
        ElementType::Matrix3x2,
    ] {
        assert!(ElementLayout::of(&ty).is_contiguous(), "{ty}");
    }
    assert!(!ElementLayout::of(&ElementType::Vector3).is_contiguous());
    assert!(!ElementLayout::of(&ElementType::Bool).is_contiguous());
}

#[test]
fn test_record_packing() {
    let particle = RecordType::new(
        "Particle",
        [("position", ElementType::Vector3), ("mass", ElementType::F32)],
    );
    let layout = ElementLayout::of(&ElementType::record(&particle));
    assert_eq!(layout.host_stride, 16);
    assert_eq!(layout.device_stride, 16);
    assert!(layout.is_contiguous());

    let offset = RecordType::new(
        "Offset",
        [("scale", ElementType::F32), ("position", ElementType::Vector3)],
    );
    let layout = ElementLayout::of(&ElementType::record(&offset));
    assert_eq!(layout.host_stride, 16);
    assert_eq!(layout.device_stride, 32);
    assert_eq!(
        layout.segments,
        vec![
            Segment {
                host_offset: 0,
                device_offset: 0,
                len: 4
            },
            Segment {
                host_offset: 4,
                device_offset: 16,
                len: 12
            },
        ]
    );
}

fn round_trip(ty: &ElementType, host: &[u8], count: usize) -> Vec<u8> {
    let layout = ElementLayout::of(ty);
    let mut device = vec![0u8; layout.device_size(count)];
    layout.host_to_device(count, host, &mut device);
    let mut back = vec![0u8; layout.host_size(count)];
    layout.device_to_host(count, &device, &mut back);
    back
}

#[test]
fn test_round_trip_through_device_image() {
    let bools = bool::encode(&[true, false, true]);
    assert_eq!(round_trip(&ElementType::Bool, &bools, 3), bools);

    let vecs = Vector3::encode(&[Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0)]);
    assert_eq!(round_trip(&ElementType::Vector3, &vecs, 2), vecs);

    let v2 = Vector2::encode(&[Vector2::new(1.0, -1.0)]);
    assert_eq!(round_trip(&ElementType::Vector2, &v2, 1), v2);

    let v4 = Vector4::encode(&[Vector4::new(1.0, 2.0, 3.0, 4.0)]);
    assert_eq!(round_trip(&ElementType::Vector4, &v4, 1), v4);

    let m = Matrix4x4::encode(&[Matrix4x4::scale(3.0)]);
    assert_eq!(round_trip(&ElementType::Matrix4x4, &m, 1), m);

    let m32 = Matrix3x2::encode(&[Matrix3x2::IDENTITY]);
    assert_eq!(round_trip(&ElementType::Matrix3x2, &m32, 1), m32);

    let ints = i32::encode(&[i32::MIN, -1, 0, i32::MAX]);
    assert_eq!(round_trip(&ElementType::I32, &ints, 4), ints);
}

#[test]
fn test_strided_write_places_elements() {
    let bools = bool::encode(&[true, true]);
    let layout = ElementLayout::of(&ElementType::Bool);
    let mut device = vec![0u8; layout.device_size(2)];
    layout.host_to_device(2, &bools, &mut device);
    assert_eq!(device, vec![1, 0, 0, 0, 1, 0, 0, 0]);
}

#[test]
fn test_align_helpers() {
    assert_eq!(align_up(0, 4), 0);
    assert_eq!(align_up(5, 4), 8);
    assert_eq!(align_up(8, 4), 8);
    assert_eq!(align_up(3, 0), 3);
    assert_eq!(align_up_u64(17, 8), 24);
}
