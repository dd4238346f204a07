//! Host and device memory layouts of element types, and strided copies
//! between them.
//!
//! Host layout is `#[repr(C)]`. Device layout is the storage-buffer layout
//! of the kernel language: scalars, vectors and matrices follow a fixed
//! stride table, records follow the storage-buffer struct packing rule
//! (each member aligned to its own alignment, size rounded up to the
//! largest member alignment).

use crate::expr::ElementType;

/// Device storage granularity in bytes.
pub const DEVICE_WORD: usize = 4;

pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    match value % alignment {
        0 => value,
        rem => value + (alignment - rem),
    }
}

pub fn align_up_u64(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    match value % alignment {
        0 => value,
        rem => value + (alignment - rem),
    }
}

/// Size of one element in host memory.
pub fn host_stride(ty: &ElementType) -> usize {
    host_size_align(ty).0
}

fn host_size_align(ty: &ElementType) -> (usize, usize) {
    match ty {
        ElementType::Bool => (1, 1),
        ElementType::I32 | ElementType::U32 | ElementType::F32 => (4, 4),
        ElementType::F64 => (8, 8),
        ElementType::Vector2 => (8, 4),
        ElementType::Vector3 => (12, 4),
        ElementType::Vector4 => (16, 4),
        ElementType::Matrix4x4 => (64, 4),
        ElementType::Matrix3x2 => (24, 4),
        ElementType::Record(r) => {
            let mut offset = 0;
            let mut align = 1;
            for field in &r.fields {
                let (size, a) = host_size_align(&field.ty);
                offset = align_up(offset, a) + size;
                align = align.max(a);
            }
            (align_up(offset, align), align)
        }
    }
}

/// Stride of one element in a device storage buffer.
///
/// Scalars, vectors and matrices: the host size rounded up to the next
/// power of two while below 16 bytes, then aligned to the device word.
/// Records: the storage-buffer struct size.
pub fn device_stride(ty: &ElementType) -> usize {
    match ty {
        ElementType::Record(_) => device_size_align(ty).0,
        _ => {
            let host = host_stride(ty);
            let rounded = if host < 16 {
                host.next_power_of_two()
            } else {
                host
            };
            align_up(rounded, DEVICE_WORD)
        }
    }
}

/// (size, alignment) of a value as a member of a storage-buffer struct.
fn device_size_align(ty: &ElementType) -> (usize, usize) {
    match ty {
        // Booleans are stored as 32-bit words.
        ElementType::Bool => (4, 4),
        ElementType::I32 | ElementType::U32 | ElementType::F32 => (4, 4),
        ElementType::F64 => (8, 8),
        ElementType::Vector2 => (8, 8),
        ElementType::Vector3 => (12, 16),
        ElementType::Vector4 => (16, 16),
        ElementType::Matrix4x4 => (64, 16),
        ElementType::Matrix3x2 => (24, 8),
        ElementType::Record(r) => {
            let mut offset = 0;
            let mut align = 1;
            for field in &r.fields {
                let (size, a) = device_size_align(&field.ty);
                offset = align_up(offset, a) + size;
                align = align.max(a);
            }
            (align_up(offset, align), align)
        }
    }
}

/// One contiguous run of bytes inside an element: `len` host bytes at
/// `host_offset` live at `device_offset` on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub host_offset: usize,
    pub device_offset: usize,
    pub len: usize,
}

/// Host/device layout of one element type plus its copy plan.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementLayout {
    pub host_stride: usize,
    pub device_stride: usize,
    pub segments: Vec<Segment>,
}

impl ElementLayout {
    pub fn of(ty: &ElementType) -> Self {
        let mut segments = Vec::new();
        collect_segments(ty, 0, 0, &mut segments);
        Self {
            host_stride: host_stride(ty),
            device_stride: device_stride(ty),
            segments: merge(segments),
        }
    }

    /// Whether a whole array can move as one contiguous block.
    pub fn is_contiguous(&self) -> bool {
        self.host_stride == self.device_stride
            && self.segments.len() == 1
            && self.segments[0]
                == (Segment {
                    host_offset: 0,
                    device_offset: 0,
                    len: self.host_stride,
                })
    }

    pub fn device_size(&self, count: usize) -> usize {
        count * self.device_stride
    }

    pub fn host_size(&self, count: usize) -> usize {
        count * self.host_stride
    }

    /// Copies `count` elements from host layout into a zeroed device image.
    pub fn host_to_device(&self, count: usize, host: &[u8], device: &mut [u8]) {
        if self.is_contiguous() {
            let n = self.host_size(count);
            device[..n].copy_from_slice(&host[..n]);
            return;
        }
        let mut src = 0;
        let mut dst = 0;
        for _ in 0..count {
            for s in &self.segments {
                let from = src + s.host_offset;
                let to = dst + s.device_offset;
                device[to..to + s.len].copy_from_slice(&host[from..from + s.len]);
            }
            src += self.host_stride;
            dst += self.device_stride;
        }
    }

    /// Copies `count` elements from a device image back into host layout.
    pub fn device_to_host(&self, count: usize, device: &[u8], host: &mut [u8]) {
        if self.is_contiguous() {
            let n = self.host_size(count);
            host[..n].copy_from_slice(&device[..n]);
            return;
        }
        let mut src = 0;
        let mut dst = 0;
        for _ in 0..count {
            for s in &self.segments {
                let from = src + s.device_offset;
                let to = dst + s.host_offset;
                host[to..to + s.len].copy_from_slice(&device[from..from + s.len]);
            }
            src += self.device_stride;
            dst += self.host_stride;
        }
    }
}

fn collect_segments(ty: &ElementType, host: usize, device: usize, out: &mut Vec<Segment>) {
    match ty {
        ElementType::Record(r) => {
            let mut host_offset = 0;
            let mut device_offset = 0;
            for field in &r.fields {
                let (hs, ha) = host_size_align(&field.ty);
                let (ds, da) = device_size_align(&field.ty);
                host_offset = align_up(host_offset, ha);
                device_offset = align_up(device_offset, da);
                collect_segments(&field.ty, host + host_offset, device + device_offset, out);
                host_offset += hs;
                device_offset += ds;
            }
        }
        _ => out.push(Segment {
            host_offset: host,
            device_offset: device,
            len: host_stride(ty),
        }),
    }
}

fn merge(segments: Vec<Segment>) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for s in segments {
        if let Some(last) = merged.last_mut() {
            if last.host_offset + last.len == s.host_offset
                && last.device_offset + last.len == s.device_offset
            {
                last.len += s.len;
                continue;
            }
        }
        merged.push(s);
    }
    merged
}

#[cfg(test)]
mod tests;
