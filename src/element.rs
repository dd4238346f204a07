//! Host element types and type-erased host arrays.

use std::fmt;
use std::sync::Arc;

use crate::error::{ComputeError, Result};
use crate::expr::ElementType;
use crate::gpu::layout;
use crate::numerics::{Matrix3x2, Matrix4x4, Vector2, Vector3, Vector4};

/// A value type that can live in a host array bound to a kernel.
///
/// `encode`/`decode` convert to and from the host memory layout: the
/// `#[repr(C)]` bytes of the value, `size_of` bytes per element (one byte
/// per `bool`).
pub trait Element: Copy + Send + Sync + 'static {
    fn element_type() -> ElementType;
    fn encode(values: &[Self]) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Vec<Self>;
}

pub fn encode_pod<T: bytemuck::Pod>(values: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

pub fn decode_pod<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// Implements [`Element`] for a `bytemuck::Pod` type.
///
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// struct Sample { id: i32, weight: f32 }
///
/// pod_element!(Sample, ElementType::record(&sample_schema()));
/// ```
#[macro_export]
macro_rules! pod_element {
    ($ty:ty, $element:expr) => {
        impl $crate::element::Element for $ty {
            fn element_type() -> $crate::expr::ElementType {
                $element
            }
            fn encode(values: &[Self]) -> Vec<u8> {
                $crate::element::encode_pod(values)
            }
            fn decode(bytes: &[u8]) -> Vec<Self> {
                $crate::element::decode_pod(bytes)
            }
        }
    };
}

pod_element!(i32, ElementType::I32);
pod_element!(u32, ElementType::U32);
pod_element!(f32, ElementType::F32);
pod_element!(Vector2, ElementType::Vector2);
pod_element!(Vector3, ElementType::Vector3);
pod_element!(Vector4, ElementType::Vector4);
pod_element!(Matrix4x4, ElementType::Matrix4x4);
pod_element!(Matrix3x2, ElementType::Matrix3x2);

impl Element for bool {
    fn element_type() -> ElementType {
        ElementType::Bool
    }

    fn encode(values: &[Self]) -> Vec<u8> {
        values.iter().map(|&b| b as u8).collect()
    }

    fn decode(bytes: &[u8]) -> Vec<Self> {
        bytes.iter().map(|&b| b != 0).collect()
    }
}

struct ArrayData {
    element: ElementType,
    count: usize,
    bytes: Vec<u8>,
}

/// A host array in host memory layout.
///
/// Cloning shares the data. Two clones are the *same* array for the kernel
/// compiler: they bind one buffer, not two.
#[derive(Clone)]
pub struct HostArray {
    inner: Arc<ArrayData>,
}

impl HostArray {
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        let element = T::element_type();
        let bytes = T::encode(values);
        debug_assert_eq!(bytes.len(), values.len() * layout::host_stride(&element));
        Self {
            inner: Arc::new(ArrayData {
                element,
                count: values.len(),
                bytes,
            }),
        }
    }

    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        Self::from_slice(&values)
    }

    /// Wraps raw host-layout bytes. The length must be a whole number of
    /// host strides of `element`.
    pub fn from_bytes(element: ElementType, bytes: Vec<u8>) -> Result<Self> {
        let stride = layout::host_stride(&element);
        if stride == 0 || bytes.len() % stride != 0 {
            return Err(ComputeError::usage(format!(
                "{} bytes is not a whole number of {} elements ({} bytes each)",
                bytes.len(),
                element,
                stride
            )));
        }
        Ok(Self {
            inner: Arc::new(ArrayData {
                count: bytes.len() / stride,
                element,
                bytes,
            }),
        })
    }

    pub fn element_type(&self) -> &ElementType {
        &self.inner.element
    }

    pub fn len(&self) -> usize {
        self.inner.count
    }

    pub fn is_empty(&self) -> bool {
        self.inner.count == 0
    }

    pub fn host_bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    /// Identity key: equal for clones of the same array only.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub fn same_as(&self, other: &HostArray) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        let expected = T::element_type();
        if expected != self.inner.element {
            return Err(ComputeError::usage(format!(
                "array holds {} elements, requested {}",
                self.inner.element, expected
            )));
        }
        Ok(T::decode(&self.inner.bytes))
    }
}

impl fmt::Debug for HostArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}; {}]", self.inner.element, self.inner.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_encoding() {
        let bytes = bool::encode(&[true, false, true]);
        assert_eq!(bytes, vec![1, 0, 1]);
        assert_eq!(bool::decode(&[0, 1, 7]), vec![false, true, true]);
    }

    #[test]
    fn test_identity_follows_clones() {
        let a = HostArray::from_vec(vec![1i32, 2, 3]);
        let b = a.clone();
        let c = HostArray::from_vec(vec![1i32, 2, 3]);
        assert!(a.same_as(&b));
        assert_eq!(a.id(), b.id());
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_typed_round_trip() {
        let a = HostArray::from_slice(&[Vector3::new(1.0, 2.0, 3.0)]);
        assert_eq!(a.len(), 1);
        assert_eq!(a.host_bytes().len(), 12);
        assert_eq!(a.to_vec::<Vector3>().unwrap(), vec![Vector3::new(1.0, 2.0, 3.0)]);
        assert!(a.to_vec::<Vector4>().is_err());
    }

    #[test]
    fn test_from_bytes_rejects_partial_elements() {
        assert!(HostArray::from_bytes(ElementType::F32, vec![0; 6]).is_err());
        let a = HostArray::from_bytes(ElementType::F32, vec![0; 8]).unwrap();
        assert_eq!(a.len(), 2);
    }
}
