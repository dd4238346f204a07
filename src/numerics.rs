//! Host-side vector and matrix types.
//!
//! Matrices are row-major on the host: `m12` is row 1, column 2, and the
//! fields are laid out row by row. The device reads the same bytes as a
//! column-major matrix, i.e. as the transpose.

use std::ops::{Add, Div, Mul, Neg, Sub};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vector4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Matrix4x4 {
    pub m11: f32,
    pub m12: f32,
    pub m13: f32,
    pub m14: f32,
    pub m21: f32,
    pub m22: f32,
    pub m23: f32,
    pub m24: f32,
    pub m31: f32,
    pub m32: f32,
    pub m33: f32,
    pub m34: f32,
    pub m41: f32,
    pub m42: f32,
    pub m43: f32,
    pub m44: f32,
}

/// 2D affine transform: three rows of two columns.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Matrix3x2 {
    pub m11: f32,
    pub m12: f32,
    pub m21: f32,
    pub m22: f32,
    pub m31: f32,
    pub m32: f32,
}

impl Vector2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn to_array(self) -> [f32; 2] {
        [self.x, self.y]
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }
}

impl Vector4 {
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }
}

impl Matrix4x4 {
    pub const IDENTITY: Self = Self::from_rows([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    pub const fn from_rows(r: [[f32; 4]; 4]) -> Self {
        Self {
            m11: r[0][0],
            m12: r[0][1],
            m13: r[0][2],
            m14: r[0][3],
            m21: r[1][0],
            m22: r[1][1],
            m23: r[1][2],
            m24: r[1][3],
            m31: r[2][0],
            m32: r[2][1],
            m33: r[2][2],
            m34: r[2][3],
            m41: r[3][0],
            m42: r[3][1],
            m43: r[3][2],
            m44: r[3][3],
        }
    }

    pub fn rows(&self) -> [[f32; 4]; 4] {
        [
            [self.m11, self.m12, self.m13, self.m14],
            [self.m21, self.m22, self.m23, self.m24],
            [self.m31, self.m32, self.m33, self.m34],
            [self.m41, self.m42, self.m43, self.m44],
        ]
    }

    /// Uniform scale matrix.
    pub fn scale(s: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.m11 = s;
        m.m22 = s;
        m.m33 = s;
        m
    }

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.m41 = x;
        m.m42 = y;
        m.m43 = z;
        m
    }

    fn map(self, f: impl Fn(f32) -> f32) -> Self {
        let r = self.rows();
        Self::from_rows(r.map(|row| row.map(&f)))
    }

    fn zip_with(self, other: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        let (a, b) = (self.rows(), other.rows());
        let mut out = [[0.0; 4]; 4];
        for i in 0..4 {
            for j in 0..4 {
                out[i][j] = f(a[i][j], b[i][j]);
            }
        }
        Self::from_rows(out)
    }
}

impl Matrix3x2 {
    pub const IDENTITY: Self = Self::from_rows([[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]]);

    pub const fn from_rows(r: [[f32; 2]; 3]) -> Self {
        Self {
            m11: r[0][0],
            m12: r[0][1],
            m21: r[1][0],
            m22: r[1][1],
            m31: r[2][0],
            m32: r[2][1],
        }
    }

    pub fn rows(&self) -> [[f32; 2]; 3] {
        [
            [self.m11, self.m12],
            [self.m21, self.m22],
            [self.m31, self.m32],
        ]
    }

    fn map(self, f: impl Fn(f32) -> f32) -> Self {
        Self::from_rows(self.rows().map(|row| row.map(&f)))
    }

    fn zip_with(self, other: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        let (a, b) = (self.rows(), other.rows());
        let mut out = [[0.0; 2]; 3];
        for i in 0..3 {
            for j in 0..2 {
                out[i][j] = f(a[i][j], b[i][j]);
            }
        }
        Self::from_rows(out)
    }
}

macro_rules! vector_ops {
    ($ty:ident { $($f:ident),+ }) => {
        impl Add for $ty {
            type Output = Self;
            fn add(self, o: Self) -> Self {
                Self { $($f: self.$f + o.$f),+ }
            }
        }

        impl Sub for $ty {
            type Output = Self;
            fn sub(self, o: Self) -> Self {
                Self { $($f: self.$f - o.$f),+ }
            }
        }

        impl Mul for $ty {
            type Output = Self;
            fn mul(self, o: Self) -> Self {
                Self { $($f: self.$f * o.$f),+ }
            }
        }

        impl Mul<f32> for $ty {
            type Output = Self;
            fn mul(self, s: f32) -> Self {
                Self { $($f: self.$f * s),+ }
            }
        }

        impl Div<f32> for $ty {
            type Output = Self;
            fn div(self, s: f32) -> Self {
                Self { $($f: self.$f / s),+ }
            }
        }

        impl Neg for $ty {
            type Output = Self;
            fn neg(self) -> Self {
                Self { $($f: -self.$f),+ }
            }
        }
    };
}

vector_ops!(Vector2 { x, y });
vector_ops!(Vector3 { x, y, z });
vector_ops!(Vector4 { x, y, z, w });

macro_rules! matrix_elementwise_ops {
    ($ty:ident) => {
        impl Add for $ty {
            type Output = Self;
            fn add(self, o: Self) -> Self {
                self.zip_with(o, |a, b| a + b)
            }
        }

        impl Sub for $ty {
            type Output = Self;
            fn sub(self, o: Self) -> Self {
                self.zip_with(o, |a, b| a - b)
            }
        }

        impl Mul<f32> for $ty {
            type Output = Self;
            fn mul(self, s: f32) -> Self {
                self.map(|a| a * s)
            }
        }

        impl Neg for $ty {
            type Output = Self;
            fn neg(self) -> Self {
                self.map(|a| -a)
            }
        }
    };
}

matrix_elementwise_ops!(Matrix4x4);
matrix_elementwise_ops!(Matrix3x2);

/// Row-major product: `(a * b)[i][j] = sum_k a[i][k] * b[k][j]`.
impl Mul for Matrix4x4 {
    type Output = Self;
    fn mul(self, o: Self) -> Self {
        let (a, b) = (self.rows(), o.rows());
        let mut out = [[0.0; 4]; 4];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| a[i][k] * b[k][j]).sum();
            }
        }
        Self::from_rows(out)
    }
}
