//! Scalar element types and the typed column buffers that back bound fields.

use std::fmt;
use std::ops::Range;

/// Element type of a field or persisted column.
///
/// Discriminants index [`TYPE_TABLE`]; keep both in the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// 32-bit float (`F`).
    F32,
    /// 32-bit signed integer (`I`).
    I32,
    /// 32-bit unsigned integer (`i`), used by size fields.
    U32,
    /// 8-bit signed integer (`B`).
    I8,
    /// 8-bit unsigned integer (`b`).
    U8,
    /// 16-bit signed integer (`S`).
    I16,
    /// 16-bit unsigned integer (`s`).
    U16,
}

struct TypeInfo {
    byte_size: usize,
    code: char,
    name: &'static str,
}

const TYPE_TABLE: [TypeInfo; 7] = [
    TypeInfo { byte_size: 4, code: 'F', name: "float32" },
    TypeInfo { byte_size: 4, code: 'I', name: "int32" },
    TypeInfo { byte_size: 4, code: 'i', name: "uint32" },
    TypeInfo { byte_size: 1, code: 'B', name: "int8" },
    TypeInfo { byte_size: 1, code: 'b', name: "uint8" },
    TypeInfo { byte_size: 2, code: 'S', name: "int16" },
    TypeInfo { byte_size: 2, code: 's', name: "uint16" },
];

impl ScalarType {
    /// All element types, in table order.
    pub const ALL: [ScalarType; 7] = [
        ScalarType::F32,
        ScalarType::I32,
        ScalarType::U32,
        ScalarType::I8,
        ScalarType::U8,
        ScalarType::I16,
        ScalarType::U16,
    ];

    fn info(self) -> &'static TypeInfo {
        &TYPE_TABLE[self as usize]
    }

    /// Size in bytes of one element.
    pub fn byte_size(self) -> usize {
        self.info().byte_size
    }

    /// One-character code used in column signatures.
    pub fn type_code(self) -> char {
        self.info().code
    }

    /// Inverse of [`ScalarType::type_code`].
    pub fn from_type_code(code: char) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.type_code() == code)
    }

    /// Human-readable name (`float32`, `uint8`, ...).
    pub fn name(self) -> &'static str {
        self.info().name
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flat, typed storage for one field (or one column across rows).
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnBuffer {
    /// `f32` values.
    F32(Vec<f32>),
    /// `i32` values.
    I32(Vec<i32>),
    /// `u32` values.
    U32(Vec<u32>),
    /// `i8` values.
    I8(Vec<i8>),
    /// `u8` values.
    U8(Vec<u8>),
    /// `i16` values.
    I16(Vec<i16>),
    /// `u16` values.
    U16(Vec<u16>),
}

/// Apply `$body` to the inner `Vec` of any [`ColumnBuffer`] variant.
macro_rules! with_buffer {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            $crate::types::ColumnBuffer::F32($v) => $body,
            $crate::types::ColumnBuffer::I32($v) => $body,
            $crate::types::ColumnBuffer::U32($v) => $body,
            $crate::types::ColumnBuffer::I8($v) => $body,
            $crate::types::ColumnBuffer::U8($v) => $body,
            $crate::types::ColumnBuffer::I16($v) => $body,
            $crate::types::ColumnBuffer::U16($v) => $body,
        }
    };
}
pub(crate) use with_buffer;

/// Apply `$body` when both buffers hold the same variant, else yield `None`.
macro_rules! same_variant {
    ($lhs:expr, $rhs:expr, |$a:ident, $b:ident| $body:expr) => {
        match ($lhs, $rhs) {
            (ColumnBuffer::F32($a), ColumnBuffer::F32($b)) => Some($body),
            (ColumnBuffer::I32($a), ColumnBuffer::I32($b)) => Some($body),
            (ColumnBuffer::U32($a), ColumnBuffer::U32($b)) => Some($body),
            (ColumnBuffer::I8($a), ColumnBuffer::I8($b)) => Some($body),
            (ColumnBuffer::U8($a), ColumnBuffer::U8($b)) => Some($body),
            (ColumnBuffer::I16($a), ColumnBuffer::I16($b)) => Some($body),
            (ColumnBuffer::U16($a), ColumnBuffer::U16($b)) => Some($body),
            _ => None,
        }
    };
}

impl ColumnBuffer {
    /// A zero-filled buffer of `len` elements.
    pub fn zeroed(ty: ScalarType, len: usize) -> Self {
        match ty {
            ScalarType::F32 => ColumnBuffer::F32(vec![0.0; len]),
            ScalarType::I32 => ColumnBuffer::I32(vec![0; len]),
            ScalarType::U32 => ColumnBuffer::U32(vec![0; len]),
            ScalarType::I8 => ColumnBuffer::I8(vec![0; len]),
            ScalarType::U8 => ColumnBuffer::U8(vec![0; len]),
            ScalarType::I16 => ColumnBuffer::I16(vec![0; len]),
            ScalarType::U16 => ColumnBuffer::U16(vec![0; len]),
        }
    }

    /// Element type of this buffer.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ColumnBuffer::F32(_) => ScalarType::F32,
            ColumnBuffer::I32(_) => ScalarType::I32,
            ColumnBuffer::U32(_) => ScalarType::U32,
            ColumnBuffer::I8(_) => ScalarType::I8,
            ColumnBuffer::U8(_) => ScalarType::U8,
            ColumnBuffer::I16(_) => ScalarType::I16,
            ColumnBuffer::U16(_) => ScalarType::U16,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        with_buffer!(self, v => v.len())
    }

    /// `true` if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements in `range` widened to `f64`. The range is clamped to the buffer.
    pub fn to_f64(&self, range: Range<usize>) -> Vec<f64> {
        with_buffer!(self, v => {
            let end = range.end.min(v.len());
            let start = range.start.min(end);
            v[start..end].iter().map(|&x| x.to_f64()).collect()
        })
    }

    /// Append all elements of `other`. Returns `false` on a type mismatch.
    pub fn extend_from(&mut self, other: &ColumnBuffer) -> bool {
        same_variant!(self, other, |a, b| a.extend_from_slice(b)).is_some()
    }

    /// Append `n` zero elements.
    pub fn extend_zeroed(&mut self, n: usize) {
        with_buffer!(self, v => v.resize(v.len() + n, Default::default()))
    }

    /// Overwrite `out` with `self[start..start + out.len()]`.
    ///
    /// Returns `false` on a type mismatch or when the range is out of bounds.
    pub fn copy_range_into(&self, start: usize, out: &mut ColumnBuffer) -> bool {
        same_variant!(self, out, |src, dst| {
            let end = start + dst.len();
            if end > src.len() {
                return false;
            }
            dst.copy_from_slice(&src[start..end]);
        })
        .is_some()
    }

    /// Set every element to zero, keeping the length.
    pub fn fill_zero(&mut self) {
        with_buffer!(self, v => v.iter_mut().for_each(|x| *x = Default::default()))
    }
}

/// A Rust element type that can live in a [`ColumnBuffer`].
pub trait Element: Copy + Default + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Matching [`ScalarType`].
    const TYPE: ScalarType;

    /// Widen to `f64`.
    fn to_f64(self) -> f64;

    /// Borrow the buffer contents if the variant matches.
    fn slice(buf: &ColumnBuffer) -> Option<&[Self]>;

    /// Wrap owned values into the matching variant.
    fn into_buffer(values: Vec<Self>) -> ColumnBuffer;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const TYPE: ScalarType = ScalarType::$variant;

            #[inline]
            fn to_f64(self) -> f64 {
                f64::from(self)
            }

            fn slice(buf: &ColumnBuffer) -> Option<&[Self]> {
                match buf {
                    ColumnBuffer::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_buffer(values: Vec<Self>) -> ColumnBuffer {
                ColumnBuffer::$variant(values)
            }
        }
    };
}

impl_element!(f32, F32);
impl_element!(i32, I32);
impl_element!(u32, U32);
impl_element!(i8, I8);
impl_element!(u8, U8);
impl_element!(i16, I16);
impl_element!(u16, U16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_table_is_consistent() {
        for ty in ScalarType::ALL {
            assert_eq!(ScalarType::from_type_code(ty.type_code()), Some(ty));
            assert_eq!(ColumnBuffer::zeroed(ty, 3).scalar_type(), ty);
        }
        assert_eq!(ScalarType::F32.byte_size(), 4);
        assert_eq!(ScalarType::U16.byte_size(), 2);
        assert_eq!(ScalarType::I8.byte_size(), 1);
        assert_eq!(ScalarType::from_type_code('D'), None);
    }

    #[test]
    fn copy_range_checks_type_and_bounds() {
        let src = ColumnBuffer::I32(vec![1, 2, 3, 4, 5, 6]);
        let mut out = ColumnBuffer::zeroed(ScalarType::I32, 3);
        assert!(src.copy_range_into(3, &mut out));
        assert_eq!(out, ColumnBuffer::I32(vec![4, 5, 6]));
        assert!(!src.copy_range_into(4, &mut out));

        let mut wrong = ColumnBuffer::zeroed(ScalarType::F32, 3);
        assert!(!src.copy_range_into(0, &mut wrong));
    }

    #[test]
    fn extend_and_widen() {
        let mut a = ColumnBuffer::U8(vec![1, 2]);
        assert!(a.extend_from(&ColumnBuffer::U8(vec![3])));
        assert!(!a.extend_from(&ColumnBuffer::I8(vec![3])));
        a.extend_zeroed(2);
        assert_eq!(a.to_f64(0..10), vec![1.0, 2.0, 3.0, 0.0, 0.0]);
        assert_eq!(a.to_f64(1..3), vec![2.0, 3.0]);
    }
}
