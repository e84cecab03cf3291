//! Stage provenance and the cutflow report derived from it.

use serde::{Deserialize, Serialize};

/// Stage name recorded before any cut is applied.
pub const NO_CUT: &str = "no_cut";

/// Survivor count after one committed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Joined names of the predicates applied in the pass.
    pub name: String,
    /// Rows alive after the pass.
    pub survivors: usize,
}

/// Append-only list of stages, seeded with the initial row count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredLog")]
pub struct ProvenanceLog {
    stages: Vec<StageRecord>,
}

#[derive(Deserialize)]
struct StoredLog {
    stages: Vec<StageRecord>,
}

impl TryFrom<StoredLog> for ProvenanceLog {
    type Error = String;

    fn try_from(log: StoredLog) -> Result<Self, Self::Error> {
        match log.stages.first() {
            Some(seed) if seed.name == NO_CUT => Ok(Self { stages: log.stages }),
            Some(seed) => Err(format!("first stage is '{}', expected '{NO_CUT}'", seed.name)),
            None => Err("provenance log has no stages".to_string()),
        }
    }
}

impl ProvenanceLog {
    /// Log seeded with `("no_cut", initial)`.
    pub fn new(initial: usize) -> Self {
        Self { stages: vec![StageRecord { name: NO_CUT.to_string(), survivors: initial }] }
    }

    /// Stages in commit order; the first is the seed.
    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    /// Number of stages, seed included.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always `false`: the seed stage is present from construction.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Row count before any cut.
    pub fn initial(&self) -> usize {
        self.stages[0].survivors
    }

    /// Most recent stage.
    pub fn last(&self) -> &StageRecord {
        &self.stages[self.stages.len() - 1]
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, survivors: usize) {
        self.stages.push(StageRecord { name: name.into(), survivors });
    }

    /// Cumulative and stage-over-stage efficiencies.
    ///
    /// A fraction whose denominator is zero is reported as `0.0`.
    pub fn report(&self) -> CutflowReport {
        let initial = self.initial();
        let mut previous = initial;
        let points = self
            .stages
            .iter()
            .map(|s| {
                let point = CutflowPoint {
                    stage: s.name.clone(),
                    survivors: s.survivors,
                    fraction_of_initial: ratio(s.survivors, initial),
                    fraction_of_previous: ratio(s.survivors, previous),
                };
                previous = s.survivors;
                point
            })
            .collect();
        CutflowReport { points }
    }
}

fn ratio(n: usize, d: usize) -> f64 {
    if d == 0 { 0.0 } else { n as f64 / d as f64 }
}

/// One point of the cutflow curves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutflowPoint {
    /// Stage name.
    pub stage: String,
    /// Rows alive after the stage.
    pub survivors: usize,
    /// `survivors / initial`.
    pub fraction_of_initial: f64,
    /// `survivors / survivors of the previous stage`; the seed is relative to itself.
    pub fraction_of_previous: f64,
}

/// Three curves over stage index: survivors, cumulative and relative efficiency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutflowReport {
    /// One point per stage.
    pub points: Vec<CutflowPoint>,
}

impl CutflowReport {
    /// Survivor counts.
    pub fn survivors(&self) -> Vec<usize> {
        self.points.iter().map(|p| p.survivors).collect()
    }

    /// Fractions of the initial count.
    pub fn fraction_of_initial(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.fraction_of_initial).collect()
    }

    /// Fractions of the previous stage.
    pub fn fraction_of_previous(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.fraction_of_previous).collect()
    }

    /// Stage names.
    pub fn stages(&self) -> Vec<&str> {
        self.points.iter().map(|p| p.stage.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(counts: &[usize]) -> ProvenanceLog {
        let mut log = ProvenanceLog::new(counts[0]);
        for (i, &c) in counts[1..].iter().enumerate() {
            log.push(format!("s{i}"), c);
        }
        log
    }

    #[test]
    fn stage_over_stage_fractions() {
        let report = log(&[100, 40, 40, 10]).report();
        assert_eq!(report.survivors(), vec![100, 40, 40, 10]);
        assert_eq!(report.fraction_of_previous(), vec![1.0, 0.4, 1.0, 0.25]);
        assert_eq!(report.fraction_of_initial(), vec![1.0, 0.4, 0.4, 0.1]);
        assert_eq!(report.stages(), vec!["no_cut", "s0", "s1", "s2"]);
    }

    #[test]
    fn zero_denominators_report_zero() {
        let report = log(&[10, 0, 0]).report();
        assert_eq!(report.fraction_of_previous(), vec![1.0, 0.0, 0.0]);

        let report = log(&[0, 0]).report();
        assert_eq!(report.fraction_of_initial(), vec![0.0, 0.0]);
        assert_eq!(report.fraction_of_previous(), vec![0.0, 0.0]);
    }

    #[test]
    fn seeded_log() {
        let log = ProvenanceLog::new(7);
        assert_eq!(log.len(), 1);
        assert_eq!(log.initial(), 7);
        assert_eq!(log.last(), &StageRecord { name: NO_CUT.into(), survivors: 7 });
    }

    #[test]
    fn stored_log_must_keep_its_seed() {
        let json = serde_json::to_string(&log(&[20, 17])).unwrap();
        let back: ProvenanceLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back.initial(), 20);
        assert_eq!(back.last().survivors, 17);

        assert!(serde_json::from_str::<ProvenanceLog>(r#"{"stages":[]}"#).is_err());
        let unseeded = r#"{"stages":[{"name":"odd","survivors":3}]}"#;
        assert!(serde_json::from_str::<ProvenanceLog>(unseeded).is_err());
    }
}
