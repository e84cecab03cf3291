//! Predicate catalog and the staged selection engine.
//!
//! A predicate returns `true` to **reject** a row. A predicate scheduled as
//! negated rejects rows where it returns `false`. Scheduled predicates are
//! applied together by the next pass and then move to the applied set;
//! scheduling an applied or already scheduled predicate again is a no-op.

use std::collections::HashSet;

use indexmap::IndexMap;
use log::debug;

use crate::cutflow::{NO_CUT, ProvenanceLog, StageRecord};
use crate::derived::RowView;
use crate::error::{Result, SelectError};
use crate::mask::SelectionMask;

/// Row predicate; `Ok(true)` rejects the row.
pub type CutFn = Box<dyn Fn(&RowView<'_>) -> Result<bool> + Send + Sync>;

/// Named predicates declared before the pipeline runs.
#[derive(Default)]
pub struct CutCatalog {
    cuts: IndexMap<String, CutFn>,
}

impl std::fmt::Debug for CutCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.cuts.keys()).finish()
    }
}

impl CutCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a predicate. Names must be unique and must not start with `!`.
    pub fn declare<F>(&mut self, name: impl Into<String>, cut: F) -> Result<&mut Self>
    where
        F: Fn(&RowView<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        let name = name.into();
        check_name(&name)?;
        if self.cuts.contains_key(&name) {
            return Err(SelectError::DuplicatePredicate(name));
        }
        self.cuts.insert(name, Box::new(cut));
        Ok(self)
    }

    /// `true` if `name` is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.cuts.contains_key(name)
    }

    /// Declared names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cuts.keys().map(String::as_str)
    }

    /// Number of declared predicates.
    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    /// `true` if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('!') {
        return Err(SelectError::Config(format!("invalid cut name '{name}'")));
    }
    Ok(())
}

enum CutRef {
    Catalog(usize),
    Adhoc(CutFn),
}

struct Scheduled {
    name: String,
    negated: bool,
    cut: CutRef,
}

impl Scheduled {
    fn label(&self) -> String {
        if self.negated { format!("!{}", self.name) } else { self.name.clone() }
    }
}

/// Selection mask, predicate scheduling and stage provenance.
pub struct SelectionEngine {
    catalog: CutCatalog,
    scheduled: Vec<Scheduled>,
    applied: HashSet<String>,
    mask: SelectionMask,
    provenance: ProvenanceLog,
    passes: usize,
}

impl SelectionEngine {
    /// Engine over `rows` input rows, all alive.
    pub fn new(catalog: CutCatalog, rows: usize) -> Self {
        Self {
            catalog,
            scheduled: Vec::new(),
            applied: HashSet::new(),
            mask: SelectionMask::new(rows),
            provenance: ProvenanceLog::new(rows),
            passes: 0,
        }
    }

    /// The declared predicates.
    pub fn catalog(&self) -> &CutCatalog {
        &self.catalog
    }

    /// `true` if `name` is waiting for the next pass.
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.scheduled.iter().any(|s| s.name == name)
    }

    /// `true` if `name` was applied by a committed pass.
    pub fn is_applied(&self, name: &str) -> bool {
        self.applied.contains(name)
    }

    /// Schedule a catalog predicate. Returns `false` if it is already
    /// scheduled or applied.
    pub fn schedule(&mut self, name: &str, negated: bool) -> Result<bool> {
        let Some(index) = self.catalog.cuts.get_index_of(name) else {
            return Err(SelectError::UnknownPredicate(name.to_string()));
        };
        if self.already_seen(name) {
            return Ok(false);
        }
        let cut = CutRef::Catalog(index);
        self.scheduled.push(Scheduled { name: name.to_string(), negated, cut });
        Ok(true)
    }

    /// Schedule a predicate that is not in the catalog. Its name must not
    /// collide with a catalog name.
    pub fn schedule_adhoc<F>(&mut self, name: &str, cut: F, negated: bool) -> Result<bool>
    where
        F: Fn(&RowView<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        check_name(name)?;
        if self.catalog.contains(name) {
            return Err(SelectError::DuplicatePredicate(name.to_string()));
        }
        if self.already_seen(name) {
            return Ok(false);
        }
        self.scheduled.push(Scheduled {
            name: name.to_string(),
            negated,
            cut: CutRef::Adhoc(Box::new(cut)),
        });
        Ok(true)
    }

    fn already_seen(&self, name: &str) -> bool {
        if self.is_applied(name) {
            debug!("cut '{name}' was already applied, skipping");
            true
        } else if self.is_scheduled(name) {
            debug!("cut '{name}' is already scheduled, skipping");
            true
        } else {
            false
        }
    }

    /// Name of the pending stage: scheduled labels joined by `_` in
    /// scheduling order, negated ones prefixed with `!`, or `no_cut`.
    pub fn stage_name(&self) -> String {
        if self.scheduled.is_empty() {
            return NO_CUT.to_string();
        }
        self.scheduled.iter().map(Scheduled::label).collect::<Vec<_>>().join("_")
    }

    /// Default output namespace of the pending pass: `<pass>_<stage>`, or
    /// `<pass>` when nothing is scheduled.
    pub fn namespace(&self) -> String {
        if self.scheduled.is_empty() {
            self.passes.to_string()
        } else {
            format!("{}_{}", self.passes, self.stage_name())
        }
    }

    /// Number of committed passes.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Survival mask.
    pub fn mask(&self) -> &SelectionMask {
        &self.mask
    }

    /// Rows currently alive.
    pub fn survivors(&self) -> usize {
        self.mask.count_alive()
    }

    /// Committed stages.
    pub fn provenance(&self) -> &ProvenanceLog {
        &self.provenance
    }

    /// `Ok(true)` if the row passes every scheduled predicate.
    ///
    /// Predicates run in scheduling order and stop at the first rejection.
    pub fn evaluate(&self, row: &RowView<'_>) -> Result<bool> {
        for s in &self.scheduled {
            let cut = match &s.cut {
                CutRef::Catalog(i) => match self.catalog.cuts.get_index(*i) {
                    Some((_, cut)) => cut,
                    None => return Err(SelectError::UnknownPredicate(s.name.clone())),
                },
                CutRef::Adhoc(cut) => cut,
            };
            if cut(row)? != s.negated {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Apply the rows rejected by a completed pass and record the stage.
    pub(crate) fn commit(&mut self, rejected: &[usize]) -> StageRecord {
        let name = self.stage_name();
        for &row in rejected {
            self.mask.kill(row);
        }
        let survivors = self.mask.count_alive();
        self.provenance.push(name.clone(), survivors);
        self.applied.extend(self.scheduled.drain(..).map(|s| s.name));
        self.passes += 1;
        StageRecord { name, survivors }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use cf_store::{FieldDescriptor, Record, ScalarType};

    use super::*;
    use crate::derived::DerivedFields;

    fn catalog() -> CutCatalog {
        let mut c = CutCatalog::new();
        c.declare("high_e", |row| Ok(row.scalar("e")? > 5.0))
            .unwrap()
            .declare("even", |row| Ok(row.row() % 2 == 0))
            .unwrap();
        c
    }

    fn run(engine: &mut SelectionEngine, values: &[f32]) -> StageRecord {
        let mut rec = Record::new();
        rec.bind(FieldDescriptor::scalar("e", ScalarType::F32)).unwrap();
        let derived = DerivedFields::empty();
        let mut rejected = Vec::new();
        let alive: Vec<usize> = engine.mask().alive().collect();
        for row in alive {
            rec.set_scalar("e", values[row]).unwrap();
            let view = RowView::new(row, &rec, &derived);
            if !engine.evaluate(&view).unwrap() {
                rejected.push(row);
            }
        }
        engine.commit(&rejected)
    }

    #[test]
    fn duplicate_declaration_rejected() {
        let mut c = catalog();
        let dup = c.declare("even", |_| Ok(false)).map(|_| ());
        assert!(matches!(dup, Err(SelectError::DuplicatePredicate(_))));
        assert!(c.declare("!odd", |_| Ok(false)).is_err());
        assert_eq!(c.names().collect::<Vec<_>>(), vec!["high_e", "even"]);
    }

    #[test]
    fn rejection_skips_later_predicates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let mut e = SelectionEngine::new(catalog(), 6);
        e.schedule("even", false).unwrap();
        e.schedule_adhoc(
            "after_even",
            move |row| {
                log.lock().unwrap().push(row.row());
                Ok(false)
            },
            false,
        )
        .unwrap();
        let stage = run(&mut e, &[0.0; 6]);
        assert_eq!(stage.survivors, 3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 3, 5]);
    }

    #[test]
    fn stage_names_and_namespaces() {
        let mut e = SelectionEngine::new(catalog(), 4);
        assert_eq!(e.stage_name(), "no_cut");
        assert_eq!(e.namespace(), "0");

        assert!(e.schedule("even", false).unwrap());
        assert!(e.schedule("high_e", true).unwrap());
        assert!(!e.schedule("even", true).unwrap());
        assert_eq!(e.stage_name(), "even_!high_e");
        assert_eq!(e.namespace(), "0_even_!high_e");

        assert!(matches!(e.schedule("nope", false), Err(SelectError::UnknownPredicate(_))));
    }

    #[test]
    fn rejecting_and_negated_predicates() {
        let values = [1.0, 6.0, 7.0, 2.0, 9.0, 3.0];

        let mut e = SelectionEngine::new(catalog(), values.len());
        e.schedule("high_e", false).unwrap();
        let stage = run(&mut e, &values);
        assert_eq!(stage, StageRecord { name: "high_e".into(), survivors: 3 });
        assert_eq!(e.mask().alive().collect::<Vec<_>>(), vec![0, 3, 5]);

        let mut e = SelectionEngine::new(catalog(), values.len());
        e.schedule("high_e", true).unwrap();
        run(&mut e, &values);
        assert_eq!(e.mask().alive().collect::<Vec<_>>(), vec![1, 2, 4]);
    }

    #[test]
    fn applied_predicates_are_not_rescheduled() {
        let values = [1.0, 6.0, 7.0, 2.0];
        let mut e = SelectionEngine::new(catalog(), values.len());
        e.schedule("even", false).unwrap();
        run(&mut e, &values);
        assert!(e.is_applied("even"));
        assert!(!e.schedule("even", false).unwrap());

        let stage = run(&mut e, &values);
        assert_eq!(stage, StageRecord { name: "no_cut".into(), survivors: 2 });
        assert_eq!(e.passes(), 2);
        assert_eq!(e.provenance().len(), 3);
    }

    #[test]
    fn adhoc_predicates() {
        let values = [1.0, 6.0, 7.0, 2.0];
        let mut e = SelectionEngine::new(catalog(), values.len());
        assert!(matches!(
            e.schedule_adhoc("even", |_| Ok(true), false),
            Err(SelectError::DuplicatePredicate(_))
        ));
        assert!(e.schedule_adhoc("first", |row| Ok(row.row() == 0), false).unwrap());
        assert!(!e.schedule_adhoc("first", |_| Ok(true), false).unwrap());
        run(&mut e, &values);
        assert_eq!(e.survivors(), 3);
        assert!(e.is_applied("first"));
    }
}
