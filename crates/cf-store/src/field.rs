//! Field descriptors and persisted column signatures.

use std::fmt;

use crate::error::{Result, StoreError};
use crate::types::ScalarType;

/// One dimension of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    /// A dimension with a constant extent.
    Fixed(usize),
    /// A ragged dimension whose current extent is held by a size field.
    Sized {
        /// Name of the size field.
        field: String,
        /// Declared maximum of the size field (the capacity of this dimension).
        max: u32,
    },
}

impl Dim {
    /// A ragged dimension driven by `size_field`.
    ///
    /// Fails unless `size_field` was declared with [`FieldDescriptor::size`].
    pub fn sized_by(size_field: &FieldDescriptor) -> Result<Dim> {
        match size_field.max_size() {
            Some(max) => Ok(Dim::Sized { field: size_field.name.clone(), max }),
            None => Err(StoreError::schema(&size_field.name, "not a size field")),
        }
    }

    /// Capacity (maximum extent) of this dimension.
    pub fn capacity(&self) -> usize {
        match self {
            Dim::Fixed(n) => *n,
            Dim::Sized { max, .. } => *max as usize,
        }
    }

    /// `true` for a size-field driven dimension.
    pub fn is_ragged(&self) -> bool {
        matches!(self, Dim::Sized { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Value,
    Size { max: u32 },
}

/// Declaration of one field: name, element type and dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    name: String,
    ty: ScalarType,
    dims: Vec<Dim>,
    kind: FieldKind,
}

impl FieldDescriptor {
    /// A scalar value field.
    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self { name: name.into(), ty, dims: Vec::new(), kind: FieldKind::Value }
    }

    /// A scalar `u32` size field whose value never exceeds `max`.
    pub fn size(name: impl Into<String>, max: u32) -> Result<Self> {
        let name = name.into();
        if max == 0 {
            return Err(StoreError::schema(name, "size field maximum must be positive"));
        }
        Ok(Self { name, ty: ScalarType::U32, dims: Vec::new(), kind: FieldKind::Size { max } })
    }

    /// An array field. Only the first dimension may be ragged.
    pub fn array(name: impl Into<String>, ty: ScalarType, dims: Vec<Dim>) -> Result<Self> {
        let name = name.into();
        if dims.is_empty() {
            return Err(StoreError::schema(name, "array field needs at least one dimension"));
        }
        for (i, dim) in dims.iter().enumerate() {
            match dim {
                Dim::Sized { .. } if i > 0 => {
                    return Err(StoreError::schema(
                        name,
                        format!("dimension {i} is ragged; only the first dimension may be"),
                    ));
                }
                Dim::Fixed(0) => {
                    return Err(StoreError::schema(name, format!("dimension {i} has extent 0")));
                }
                _ => {}
            }
        }
        Ok(Self { name, ty, dims, kind: FieldKind::Value })
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element type.
    pub fn scalar_type(&self) -> ScalarType {
        self.ty
    }

    /// Dimensions, outermost first. Empty for scalars.
    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    /// `true` if the field has no dimensions.
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// `true` for size fields.
    pub fn is_size_field(&self) -> bool {
        matches!(self.kind, FieldKind::Size { .. })
    }

    /// Declared maximum of a size field.
    pub fn max_size(&self) -> Option<u32> {
        match self.kind {
            FieldKind::Size { max } => Some(max),
            FieldKind::Value => None,
        }
    }

    /// Name of the size field driving the first dimension, if ragged.
    pub fn size_field(&self) -> Option<&str> {
        match self.dims.first() {
            Some(Dim::Sized { field, .. }) => Some(field),
            _ => None,
        }
    }

    /// Per-dimension capacities.
    pub fn capacities(&self) -> Vec<usize> {
        self.dims.iter().map(Dim::capacity).collect()
    }

    /// Number of buffer elements backing this field.
    pub fn capacity_len(&self) -> usize {
        self.dims.iter().map(Dim::capacity).product()
    }

    /// Persisted column signature, e.g. `tptot[nt]/F` or `terr[nt][3][3]/F`.
    pub fn signature(&self) -> ColumnSignature {
        ColumnSignature {
            name: self.name.clone(),
            dims: self
                .dims
                .iter()
                .map(|d| match d {
                    Dim::Fixed(n) => SigDim::Fixed(*n),
                    Dim::Sized { field, .. } => SigDim::SizeField(field.clone()),
                })
                .collect(),
            ty: self.ty,
        }
    }
}

/// A dimension as written in a column signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigDim {
    /// Constant extent.
    Fixed(usize),
    /// Extent read from the named integer column.
    SizeField(String),
}

/// Parsed form of a column signature string `name[dim]...[dim]/T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSignature {
    /// Column name.
    pub name: String,
    /// Dimensions, outermost first.
    pub dims: Vec<SigDim>,
    /// Element type (from the trailing type code).
    pub ty: ScalarType,
}

impl ColumnSignature {
    /// Parse a signature string.
    pub fn parse(text: &str) -> Result<Self> {
        let bad =
            |reason: &str| StoreError::schema(text, format!("bad column signature: {reason}"));

        let (head, code) = text.rsplit_once('/').ok_or_else(|| bad("missing '/<type>'"))?;
        let mut chars = code.chars();
        let ty = match (chars.next(), chars.next()) {
            (Some(c), None) => {
                ScalarType::from_type_code(c).ok_or_else(|| bad("unknown type code"))?
            }
            _ => return Err(bad("type code must be one character")),
        };

        let (name, mut rest) = match head.find('[') {
            Some(i) => (&head[..i], &head[i..]),
            None => (head, ""),
        };
        if name.is_empty() {
            return Err(bad("empty name"));
        }

        let mut dims = Vec::new();
        while !rest.is_empty() {
            let inner = rest.strip_prefix('[').ok_or_else(|| bad("expected '['"))?;
            let close = inner.find(']').ok_or_else(|| bad("unclosed '['"))?;
            let token = &inner[..close];
            if token.is_empty() {
                return Err(bad("empty dimension"));
            }
            dims.push(match token.parse::<usize>() {
                Ok(n) => SigDim::Fixed(n),
                Err(_) => SigDim::SizeField(token.to_string()),
            });
            rest = &inner[close + 1..];
        }

        Ok(Self { name: name.to_string(), dims, ty })
    }

    /// `true` if `desc` would be written with exactly this signature.
    pub fn matches(&self, desc: &FieldDescriptor) -> bool {
        *self == desc.signature()
    }
}

impl fmt::Display for ColumnSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for dim in &self.dims {
            match dim {
                SigDim::Fixed(n) => write!(f, "[{n}]")?,
                SigDim::SizeField(name) => write!(f, "[{name}]")?,
            }
        }
        write!(f, "/{}", self.ty.type_code())
    }
}
