//! Derived fields and the per-row view predicates and aggregators read from.
//!
//! A derived field is a named function of other fields (stored or derived)
//! that yields a flat list of values. Dependencies are declared up front so
//! cycles and dangling names are caught at construction; values are computed
//! on first access and memoized for the rest of the row.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use cf_store::{Element, Nested, Record};

use crate::error::{Result, SelectError};

/// Computation of one derived field from its declared inputs.
pub type DeriveFn = Box<dyn Fn(&DerivedInputs<'_, '_>) -> Result<Vec<f64>> + Send + Sync>;

struct DerivedField {
    name: String,
    deps: Vec<String>,
    compute: DeriveFn,
}

/// Validated set of derived fields.
#[derive(Default)]
pub struct DerivedFields {
    fields: Vec<DerivedField>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for DerivedFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.fields.iter().map(|d| (&d.name, &d.deps))).finish()
    }
}

/// Collects derived field declarations before validation.
#[derive(Default)]
pub struct DerivedFieldsBuilder {
    fields: Vec<DerivedField>,
}

impl DerivedFieldsBuilder {
    /// Declare `name` as a function of `deps`.
    pub fn field<F>(mut self, name: impl Into<String>, deps: &[&str], compute: F) -> Self
    where
        F: Fn(&DerivedInputs<'_, '_>) -> Result<Vec<f64>> + Send + Sync + 'static,
    {
        self.fields.push(DerivedField {
            name: name.into(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            compute: Box::new(compute),
        });
        self
    }

    /// Check names are unique and the dependency graph among derived fields is acyclic.
    pub fn build(self) -> Result<DerivedFields> {
        let mut index = HashMap::with_capacity(self.fields.len());
        for (i, f) in self.fields.iter().enumerate() {
            if index.insert(f.name.clone(), i).is_some() {
                return Err(SelectError::DuplicateField(f.name.clone()));
            }
        }

        // Kahn's algorithm over edges dep -> dependent, derived fields only.
        let mut indegree = vec![0usize; self.fields.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.fields.len()];
        for (i, f) in self.fields.iter().enumerate() {
            for dep in &f.deps {
                if let Some(&j) = index.get(dep) {
                    indegree[i] += 1;
                    dependents[j].push(i);
                }
            }
        }
        let mut queue: VecDeque<usize> =
            (0..indegree.len()).filter(|&i| indegree[i] == 0).collect();
        let mut resolved = 0;
        while let Some(j) = queue.pop_front() {
            resolved += 1;
            for &i in &dependents[j] {
                indegree[i] -= 1;
                if indegree[i] == 0 {
                    queue.push_back(i);
                }
            }
        }
        if resolved < self.fields.len() {
            let members = self
                .fields
                .iter()
                .zip(&indegree)
                .filter(|(_, d)| **d > 0)
                .map(|(f, _)| f.name.clone())
                .collect();
            return Err(SelectError::DependencyCycle(members));
        }

        Ok(DerivedFields { fields: self.fields, index })
    }
}

impl DerivedFields {
    /// Start declaring derived fields.
    pub fn builder() -> DerivedFieldsBuilder {
        DerivedFieldsBuilder::default()
    }

    /// No derived fields.
    pub fn empty() -> Self {
        Self::default()
    }

    /// `true` if `name` is a derived field.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Derived field names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Number of derived fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` if there are no derived fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check every dependency names a field bound in one of `records` or
    /// another derived field, and no derived field shadows a bound one.
    pub fn validate(&self, records: &[&Record]) -> Result<()> {
        let bound = |name: &str| records.iter().any(|r| r.contains(name));
        for f in &self.fields {
            if bound(f.name.as_str()) {
                return Err(SelectError::DuplicateField(f.name.clone()));
            }
            if let Some(dep) = f.deps.iter().find(|d| !bound(d.as_str()) && !self.contains(d)) {
                return Err(SelectError::UnknownField(dep.clone()));
            }
        }
        Ok(())
    }
}

/// Read access to the current row: stored fields plus lazily computed derived fields.
///
/// Stored fields are looked up in the main record first, then in the friend
/// records loaded at the same row index.
pub struct RowView<'a> {
    row: usize,
    record: &'a Record,
    friends: Vec<&'a Record>,
    derived: &'a DerivedFields,
    cache: RefCell<Vec<Option<Vec<f64>>>>,
}

impl<'a> RowView<'a> {
    /// View of `record` as loaded for input row `row`.
    pub fn new(row: usize, record: &'a Record, derived: &'a DerivedFields) -> Self {
        Self {
            row,
            record,
            friends: Vec::new(),
            derived,
            cache: RefCell::new(vec![None; derived.len()]),
        }
    }

    /// Add records read at the same row index.
    pub fn with_friends(mut self, friends: impl IntoIterator<Item = &'a Record>) -> Self {
        self.friends.extend(friends);
        self
    }

    /// Input row index.
    pub fn row(&self) -> usize {
        self.row
    }

    /// Stored fields of the main record.
    pub fn record(&self) -> &'a Record {
        self.record
    }

    /// The record, main or friend, that binds `name`.
    pub fn stored(&self, name: &str) -> Option<&'a Record> {
        std::iter::once(self.record).chain(self.friends.iter().copied()).find(|r| r.contains(name))
    }

    /// `true` if `name` is stored or derived.
    pub fn has_field(&self, name: &str) -> bool {
        self.stored(name).is_some() || self.derived.contains(name)
    }

    /// `true` if `name` is a stored scalar field.
    pub fn is_scalar(&self, name: &str) -> bool {
        self.stored(name).and_then(|r| r.descriptor(name).ok()).is_some_and(|d| d.is_scalar())
    }

    /// Logical values of a stored or derived field, flattened and widened to `f64`.
    pub fn values(&self, name: &str) -> Result<Vec<f64>> {
        if let Some(&i) = self.derived.index.get(name) {
            return self.derived_values(i);
        }
        Ok(self.stored_or_unknown(name)?.values_f64(name)?)
    }

    /// First value of a field; an error if the field is empty in this row.
    pub fn scalar(&self, name: &str) -> Result<f64> {
        self.values(name)?.first().copied().ok_or_else(|| {
            SelectError::Evaluation(format!("field '{name}' has no values in row {}", self.row))
        })
    }

    /// Current value of a size field.
    pub fn size(&self, name: &str) -> Result<usize> {
        Ok(self.stored_or_unknown(name)?.size(name)? as usize)
    }

    /// Typed logical value of a stored field.
    pub fn get<T: Element>(&self, name: &str) -> Result<Nested<T>> {
        Ok(self.stored_or_unknown(name)?.get(name)?)
    }

    fn stored_or_unknown(&self, name: &str) -> Result<&'a Record> {
        self.stored(name).ok_or_else(|| SelectError::UnknownField(name.to_string()))
    }

    fn derived_values(&self, i: usize) -> Result<Vec<f64>> {
        if let Some(v) = &self.cache.borrow()[i] {
            return Ok(v.clone());
        }
        let field = &self.derived.fields[i];
        let values = (field.compute)(&DerivedInputs { view: self, field })?;
        self.cache.borrow_mut()[i] = Some(values.clone());
        Ok(values)
    }
}

/// The inputs a derived field may read: only the ones it declared.
pub struct DerivedInputs<'v, 'a> {
    view: &'v RowView<'a>,
    field: &'v DerivedField,
}

impl DerivedInputs<'_, '_> {
    fn check(&self, dep: &str) -> Result<()> {
        if self.field.deps.iter().any(|d| d == dep) {
            Ok(())
        } else {
            Err(SelectError::UndeclaredDependency {
                field: self.field.name.clone(),
                dependency: dep.to_string(),
            })
        }
    }

    /// Row being computed.
    pub fn row(&self) -> usize {
        self.view.row
    }

    /// Values of a declared input.
    pub fn values(&self, dep: &str) -> Result<Vec<f64>> {
        self.check(dep)?;
        self.view.values(dep)
    }

    /// First value of a declared input.
    pub fn scalar(&self, dep: &str) -> Result<f64> {
        self.check(dep)?;
        self.view.scalar(dep)
    }

    /// Typed value of a declared stored input.
    pub fn get<T: Element>(&self, dep: &str) -> Result<Nested<T>> {
        self.check(dep)?;
        self.view.get(dep)
    }
}
