//! Field codec: ragged nested values <-> fixed-capacity flat buffers.
//!
//! A field with dimensions `[d0][d1]...[dk]` is stored row-major in a buffer
//! of `prod(capacities)` elements. Only `d0` may be ragged, so the logical
//! data of a row always occupies the first `prod(extents)` elements and the
//! rest of the buffer is zero.

use std::fmt;

use crate::error::{Result, StoreError};

/// A logical value of a field: a scalar leaf or a nested list.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested<T> {
    /// A single element.
    Leaf(T),
    /// One nesting level.
    List(Vec<Nested<T>>),
}

impl<T: Copy> Nested<T> {
    /// A scalar value.
    pub fn leaf(value: T) -> Self {
        Nested::Leaf(value)
    }

    /// A one-dimensional list of scalars.
    pub fn flat(values: impl IntoIterator<Item = T>) -> Self {
        Nested::List(values.into_iter().map(Nested::Leaf).collect())
    }

    /// The scalar, if this is a leaf.
    pub fn as_leaf(&self) -> Option<T> {
        match self {
            Nested::Leaf(v) => Some(*v),
            Nested::List(_) => None,
        }
    }

    /// The items, if this is a list.
    pub fn as_list(&self) -> Option<&[Nested<T>]> {
        match self {
            Nested::Leaf(_) => None,
            Nested::List(items) => Some(items),
        }
    }

    /// All leaves in row-major order.
    pub fn flatten(&self) -> Vec<T> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<T>) {
        match self {
            Nested::Leaf(v) => out.push(*v),
            Nested::List(items) => items.iter().for_each(|item| item.flatten_into(out)),
        }
    }
}

impl<T: Copy> From<Vec<T>> for Nested<T> {
    fn from(values: Vec<T>) -> Self {
        Nested::flat(values)
    }
}

impl<T: Copy> From<Vec<Vec<T>>> for Nested<T> {
    fn from(rows: Vec<Vec<T>>) -> Self {
        Nested::List(rows.into_iter().map(Nested::flat).collect())
    }
}

impl<T: fmt::Display> fmt::Display for Nested<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Nested::Leaf(v) => write!(f, "{v}"),
            Nested::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Number of buffer elements needed for the given per-dimension capacities.
pub fn capacity_len(capacities: &[usize]) -> usize {
    capacities.iter().product()
}

/// Rebuild the logical value stored in `buffer` for the current `extents`.
///
/// Only the first `prod(extents)` elements are read; they are regrouped from
/// the innermost dimension outwards. An empty `extents` yields a leaf.
pub fn decode<T: Copy + Default>(buffer: &[T], extents: &[usize]) -> Nested<T> {
    let Some((_, inner)) = extents.split_first() else {
        return Nested::Leaf(buffer.first().copied().unwrap_or_default());
    };

    let total = capacity_len(extents).min(buffer.len());
    let mut level: Vec<Nested<T>> = buffer[..total].iter().map(|&v| Nested::Leaf(v)).collect();
    for &size in inner.iter().rev() {
        if size == 0 {
            level = Vec::new();
            continue;
        }
        let mut grouped = Vec::with_capacity(level.len() / size);
        let mut items = level.into_iter();
        loop {
            let chunk: Vec<Nested<T>> = items.by_ref().take(size).collect();
            if chunk.is_empty() {
                break;
            }
            grouped.push(Nested::List(chunk));
        }
        level = grouped;
    }
    Nested::List(level)
}

/// Encode `value` into a zero-padded buffer of `prod(capacities)` elements.
///
/// Every nesting level of `value` must have exactly the length given by the
/// matching `extents` entry. The first dimension may be shorter than its
/// capacity; all trailing dimensions must be filled to capacity.
pub fn encode<T: Copy + Default>(
    field: &str,
    value: &Nested<T>,
    extents: &[usize],
    capacities: &[usize],
) -> Result<Vec<T>> {
    check_capacity(field, extents, capacities)?;
    check_shape(field, value, extents, 0)?;

    let mut flat = Vec::with_capacity(capacity_len(capacities));
    value.flatten_into(&mut flat);
    Ok(pad_to_capacity(flat, extents, capacities))
}

/// Insert zero runs so that data laid out for `extents` is laid out for `capacities`.
///
/// Works from the innermost dimension outwards: at each level every block of
/// `extents[i] * inner` elements is followed by `(capacities[i] - extents[i]) * inner`
/// zeros, where `inner` is the already padded size of the dimensions below.
/// Requires `extents[i] <= capacities[i]` for every `i`.
pub fn pad_to_capacity<T: Copy + Default>(
    flat: Vec<T>,
    extents: &[usize],
    capacities: &[usize],
) -> Vec<T> {
    let mut data = flat;
    let mut inner = 1usize;
    for i in (0..extents.len()).rev() {
        let outer = capacity_len(&extents[..i]);
        let block = extents[i] * inner;
        let padded = capacities[i] * inner;
        if block != padded {
            let mut next = Vec::with_capacity(outer * padded);
            for b in 0..outer {
                next.extend_from_slice(&data[b * block..(b + 1) * block]);
                next.resize(next.len() + (padded - block), T::default());
            }
            data = next;
        }
        inner = padded;
    }
    data
}

fn check_capacity(field: &str, extents: &[usize], capacities: &[usize]) -> Result<()> {
    if extents.len() != capacities.len() {
        return Err(StoreError::schema(
            field,
            format!("{} extents given for {} dimensions", extents.len(), capacities.len()),
        ));
    }
    for (level, (&extent, &cap)) in extents.iter().zip(capacities).enumerate() {
        if level == 0 && extent > cap {
            return Err(StoreError::ShapeMismatch {
                field: field.to_string(),
                level,
                detail: format!("extent {extent} exceeds capacity {cap}"),
            });
        }
        if level > 0 && extent != cap {
            return Err(StoreError::ShapeMismatch {
                field: field.to_string(),
                level,
                detail: format!("fixed dimension has extent {extent}, capacity {cap}"),
            });
        }
    }
    Ok(())
}

fn check_shape<T>(field: &str, value: &Nested<T>, extents: &[usize], level: usize) -> Result<()> {
    match (value, extents.split_first()) {
        (Nested::Leaf(_), None) => Ok(()),
        (Nested::List(items), Some((&extent, rest))) => {
            if items.len() != extent {
                return Err(StoreError::ShapeMismatch {
                    field: field.to_string(),
                    level,
                    detail: format!("expected {extent} items, got {}", items.len()),
                });
            }
            items.iter().try_for_each(|item| check_shape(field, item, rest, level + 1))
        }
        (Nested::Leaf(_), Some((&extent, _))) => Err(StoreError::ShapeMismatch {
            field: field.to_string(),
            level,
            detail: format!("expected a list of {extent} items, got a scalar"),
        }),
        (Nested::List(items), None) => Err(StoreError::ShapeMismatch {
            field: field.to_string(),
            level,
            detail: format!("expected a scalar, got a list of {} items", items.len()),
        }),
    }
}
