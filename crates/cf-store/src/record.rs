//! The set of bound fields and their current-row buffers.

use std::collections::HashMap;
use std::fmt;

use crate::codec::{self, Nested};
use crate::error::{Result, StoreError};
use crate::field::{Dim, FieldDescriptor};
use crate::types::{ColumnBuffer, Element, with_buffer};

#[derive(Debug, Clone)]
struct Slot {
    desc: FieldDescriptor,
    buffer: ColumnBuffer,
}

/// Bound fields of one row, each backed by a full-capacity buffer.
///
/// Fields are kept in bind order. A size field must be bound before any field
/// whose first dimension refers to it.
#[derive(Debug, Clone, Default)]
pub struct Record {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
}

impl Record {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `desc` could be bound without binding it.
    pub fn check_bindable(&self, desc: &FieldDescriptor) -> Result<()> {
        if self.index.contains_key(desc.name()) {
            return Err(StoreError::schema(desc.name(), "field is already bound"));
        }
        if let Some(Dim::Sized { field, max }) = desc.dims().first() {
            let size = self.slot(field).map_err(|_| {
                StoreError::schema(desc.name(), format!("size field '{field}' must be bound first"))
            })?;
            match size.desc.max_size() {
                Some(bound_max) if bound_max == *max => {}
                Some(bound_max) => {
                    let reason =
                        format!("size field '{field}' has maximum {bound_max}, not {max}");
                    return Err(StoreError::schema(desc.name(), reason));
                }
                None => {
                    return Err(StoreError::schema(
                        desc.name(),
                        format!("'{field}' is bound but is not a size field"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Bind a field with a zeroed buffer.
    pub fn bind(&mut self, desc: FieldDescriptor) -> Result<()> {
        self.check_bindable(&desc)?;
        let buffer = ColumnBuffer::zeroed(desc.scalar_type(), desc.capacity_len());
        self.index.insert(desc.name().to_string(), self.slots.len());
        self.slots.push(Slot { desc, buffer });
        Ok(())
    }

    /// `true` if a field with this name is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of bound fields.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` if no field is bound.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Descriptors in bind order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.slots.iter().map(|s| &s.desc)
    }

    /// Descriptor of a bound field.
    pub fn descriptor(&self, name: &str) -> Result<&FieldDescriptor> {
        self.slot(name).map(|s| &s.desc)
    }

    /// Current extent of every dimension of `name`.
    pub fn extents(&self, name: &str) -> Result<Vec<usize>> {
        let slot = self.slot(name)?;
        self.extents_of(&slot.desc)
    }

    /// Current value of a size field.
    pub fn size(&self, name: &str) -> Result<u32> {
        let slot = self.slot(name)?;
        if !slot.desc.is_size_field() {
            return Err(StoreError::schema(name, "not a size field"));
        }
        Ok(size_value(&slot.buffer))
    }

    /// Set the value of a size field. Values above the declared maximum are rejected.
    pub fn set_size(&mut self, name: &str, value: u32) -> Result<()> {
        let i = self.position(name)?;
        let slot = &mut self.slots[i];
        let Some(max) = slot.desc.max_size() else {
            return Err(StoreError::schema(name, "not a size field"));
        };
        if value > max {
            return Err(StoreError::SizeOutOfRange {
                field: name.to_string(),
                value: u64::from(value),
                max,
            });
        }
        slot.buffer = ColumnBuffer::U32(vec![value]);
        Ok(())
    }

    /// Decode the current logical value of `name`.
    pub fn get<T: Element>(&self, name: &str) -> Result<Nested<T>> {
        let slot = self.slot(name)?;
        let values = typed::<T>(slot)?;
        Ok(codec::decode(values, &self.extents_of(&slot.desc)?))
    }

    /// Current value of a scalar field.
    pub fn get_scalar<T: Element>(&self, name: &str) -> Result<T> {
        let slot = self.slot(name)?;
        if !slot.desc.is_scalar() {
            return Err(StoreError::schema(name, "not a scalar field"));
        }
        let values = typed::<T>(slot)?;
        Ok(values[0])
    }

    /// Encode `value` into the buffer of `name` using the current extents.
    ///
    /// Size fields are set with [`Record::set_size`]; set them before the
    /// fields that depend on them.
    pub fn set<T: Element>(&mut self, name: &str, value: impl Into<Nested<T>>) -> Result<()> {
        let i = self.position(name)?;
        let desc = &self.slots[i].desc;
        if desc.is_size_field() {
            return Err(StoreError::schema(name, "size fields are set with set_size"));
        }
        if desc.scalar_type() != T::TYPE {
            return Err(StoreError::TypeMismatch {
                field: name.to_string(),
                expected: T::TYPE,
                actual: desc.scalar_type(),
            });
        }
        let extents = self.extents_of(desc)?;
        let buf = codec::encode(name, &value.into(), &extents, &desc.capacities())?;
        self.slots[i].buffer = T::into_buffer(buf);
        Ok(())
    }

    /// Set a scalar field.
    pub fn set_scalar<T: Element>(&mut self, name: &str, value: T) -> Result<()> {
        self.set(name, Nested::leaf(value))
    }

    /// Current logical values of `name`, flattened row-major and widened to `f64`.
    pub fn values_f64(&self, name: &str) -> Result<Vec<f64>> {
        let slot = self.slot(name)?;
        let n = self.extents_of(&slot.desc)?.iter().product::<usize>();
        Ok(slot.buffer.to_f64(0..n))
    }

    /// Raw full-capacity buffer of `name`.
    pub fn buffer(&self, name: &str) -> Result<&ColumnBuffer> {
        self.slot(name).map(|s| &s.buffer)
    }

    /// Buffer of `name` re-encoded from its logical value: data left-packed,
    /// everything past the current extents zero.
    pub fn encoded(&self, name: &str) -> Result<ColumnBuffer> {
        let slot = self.slot(name)?;
        let extents = self.extents_of(&slot.desc)?;
        let capacities = slot.desc.capacities();
        with_buffer!(&slot.buffer, v => {
            let value = codec::decode(v, &extents);
            codec::encode(name, &value, &extents, &capacities).map(Element::into_buffer)
        })
    }

    /// Copy the buffer of `name` from another record with an identical declaration.
    pub fn copy_field(&mut self, from: &Record, name: &str) -> Result<()> {
        let src = from.slot(name)?;
        let i = self.position(name)?;
        let dst = &mut self.slots[i];
        if src.desc.signature() != dst.desc.signature()
            || src.desc.capacity_len() != dst.desc.capacity_len()
        {
            return Err(StoreError::schema(
                name,
                format!("cannot copy '{}' into '{}'", src.desc.signature(), dst.desc.signature()),
            ));
        }
        dst.buffer = src.buffer.clone();
        Ok(())
    }

    /// Zero every buffer (including size fields).
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| s.buffer.fill_zero());
    }

    pub(crate) fn slot_mut(&mut self, i: usize) -> (&FieldDescriptor, &mut ColumnBuffer) {
        let slot = &mut self.slots[i];
        (&slot.desc, &mut slot.buffer)
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.index.get(name).copied().ok_or_else(|| StoreError::UnknownField(name.to_string()))
    }

    fn slot(&self, name: &str) -> Result<&Slot> {
        self.position(name).map(|i| &self.slots[i])
    }

    fn extents_of(&self, desc: &FieldDescriptor) -> Result<Vec<usize>> {
        desc.dims()
            .iter()
            .map(|dim| match dim {
                Dim::Fixed(n) => Ok(*n),
                Dim::Sized { field, .. } => self.size(field).map(|n| n as usize),
            })
            .collect()
    }
}

fn size_value(buffer: &ColumnBuffer) -> u32 {
    match buffer {
        ColumnBuffer::U32(v) => v.first().copied().unwrap_or(0),
        _ => 0,
    }
}

fn typed<T: Element>(slot: &Slot) -> Result<&[T]> {
    T::slice(&slot.buffer).ok_or_else(|| StoreError::TypeMismatch {
        field: slot.desc.name().to_string(),
        expected: T::TYPE,
        actual: slot.desc.scalar_type(),
    })
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for slot in &self.slots {
            let extents = self.extents_of(&slot.desc).map_err(|_| fmt::Error)?;
            with_buffer!(&slot.buffer, v => {
                writeln!(f, "{}: {}", slot.desc.name(), codec::decode(v, &extents))?
            })
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarType;

    fn tracks() -> Record {
        let nt = FieldDescriptor::size("nt", 10).unwrap();
        let mut r = Record::new();
        r.bind(FieldDescriptor::scalar("emeas", ScalarType::F32)).unwrap();
        r.bind(nt.clone()).unwrap();
        r.bind(
            FieldDescriptor::array("tptot", ScalarType::F32, vec![Dim::sized_by(&nt).unwrap()])
                .unwrap(),
        )
        .unwrap();
        r.bind(
            FieldDescriptor::array(
                "terr",
                ScalarType::I16,
                vec![Dim::sized_by(&nt).unwrap(), Dim::Fixed(2)],
            )
            .unwrap(),
        )
        .unwrap();
        r
    }

    #[test]
    fn size_field_must_be_bound_first() {
        let nt = FieldDescriptor::size("nt", 10).unwrap();
        let tptot =
            FieldDescriptor::array("tptot", ScalarType::F32, vec![Dim::sized_by(&nt).unwrap()])
                .unwrap();
        let mut r = Record::new();
        let err = r.bind(tptot).unwrap_err();
        assert!(err.to_string().contains("must be bound first"), "{err}");
    }

    #[test]
    fn duplicate_binding_rejected() {
        let mut r = tracks();
        let err = r.bind(FieldDescriptor::scalar("emeas", ScalarType::F32)).unwrap_err();
        assert!(matches!(err, StoreError::Schema { .. }));
    }

    #[test]
    fn set_and_get_ragged() {
        let mut r = tracks();
        r.set_size("nt", 3).unwrap();
        r.set::<f32>("tptot", vec![1.0, 2.0, 3.0]).unwrap();
        r.set::<i16>("terr", vec![vec![1, 2], vec![3, 4], vec![5, 6]]).unwrap();
        r.set_scalar("emeas", 510.0f32).unwrap();

        assert_eq!(r.get::<f32>("tptot").unwrap(), Nested::flat([1.0, 2.0, 3.0]));
        assert_eq!(r.extents("terr").unwrap(), vec![3, 2]);
        assert_eq!(r.values_f64("terr").unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(r.get_scalar::<f32>("emeas").unwrap(), 510.0);
        assert_eq!(r.buffer("tptot").unwrap().len(), 10);
    }

    #[test]
    fn set_checks_current_extent() {
        let mut r = tracks();
        r.set_size("nt", 2).unwrap();
        let err = r.set::<f32>("tptot", vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { level: 0, .. }));
    }

    #[test]
    fn size_above_maximum_rejected() {
        let mut r = tracks();
        let err = r.set_size("nt", 11).unwrap_err();
        assert!(matches!(err, StoreError::SizeOutOfRange { value: 11, max: 10, .. }));
        assert!(r.set_size("emeas", 1).is_err());
    }

    #[test]
    fn type_mismatch_rejected() {
        let mut r = tracks();
        r.set_size("nt", 1).unwrap();
        let err = r.set::<i32>("tptot", vec![1]).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
        assert!(r.get::<u8>("tptot").is_err());
    }

    #[test]
    fn encoded_zeroes_stale_tail() {
        let mut r = tracks();
        r.set_size("nt", 4).unwrap();
        r.set::<f32>("tptot", vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        r.set_size("nt", 2).unwrap();

        let raw = r.buffer("tptot").unwrap().to_f64(0..4);
        assert_eq!(raw, vec![1.0, 2.0, 3.0, 4.0]);
        let enc = r.encoded("tptot").unwrap();
        assert_eq!(enc.to_f64(0..10), vec![1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn display_lists_every_field() {
        let mut r = tracks();
        r.set_size("nt", 1).unwrap();
        r.set::<f32>("tptot", vec![2.5]).unwrap();
        let text = r.to_string();
        assert!(text.contains("nt: 1"));
        assert!(text.contains("tptot: [2.5]"));
    }

    #[test]
    fn copy_between_records() {
        let mut a = tracks();
        a.set_size("nt", 2).unwrap();
        a.set::<f32>("tptot", vec![4.0, 5.0]).unwrap();

        let mut b = tracks();
        b.copy_field(&a, "nt").unwrap();
        b.copy_field(&a, "tptot").unwrap();
        assert_eq!(b.get::<f32>("tptot").unwrap(), Nested::flat([4.0, 5.0]));

        let mut c = Record::new();
        c.bind(FieldDescriptor::scalar("tptot", ScalarType::F32)).unwrap();
        assert!(c.copy_field(&a, "tptot").is_err());
    }

    #[test]
    fn unknown_field() {
        let r = tracks();
        assert!(matches!(r.get::<f32>("nope"), Err(StoreError::UnknownField(_))));
    }
}
