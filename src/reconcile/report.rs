//! End-of-run report

use chrono::{DateTime, Utc};
use ecl_core::ConceptId;
use serde::{Deserialize, Serialize};

use super::threshold::ThresholdWarning;

pub const JOB_NAME: &str = "ECL Refset Job";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SetOutcome {
    /// Nothing to change
    Unchanged,
    /// Every proposed change was applied
    Applied,
    /// Applied, with item-level errors reported
    PartiallyApplied,
    /// Diffed only
    DryRun,
    /// Stopped by a threshold before applying
    Blocked,
    Failed,
    Cancelled,
}

impl SetOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SetOutcome::Failed
                | SetOutcome::Blocked
                | SetOutcome::Cancelled
                | SetOutcome::PartiallyApplied
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetReport {
    pub set_id: ConceptId,
    pub term: Option<String>,
    pub current_total: u64,
    pub add_total: u64,
    pub remove_total: u64,
    pub created: usize,
    pub reactivated: usize,
    pub deactivated: usize,
    /// Diff windows processed; more than one when the search ceiling was hit
    pub windows: usize,
    pub warnings: Vec<ThresholdWarning>,
    pub errors: Vec<String>,
    pub outcome: SetOutcome,
}

impl SetReport {
    pub fn new(set_id: impl Into<ConceptId>, term: Option<String>) -> Self {
        Self {
            set_id: set_id.into(),
            term,
            current_total: 0,
            add_total: 0,
            remove_total: 0,
            created: 0,
            reactivated: 0,
            deactivated: 0,
            windows: 0,
            warnings: Vec::new(),
            errors: Vec::new(),
            outcome: SetOutcome::Unchanged,
        }
    }

    pub fn added(&self) -> usize {
        self.created + self.reactivated
    }

    pub fn fail(mut self, outcome: SetOutcome, error: impl ToString) -> Self {
        self.errors.push(error.to_string());
        self.outcome = outcome;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub job_name: String,
    /// `yyyyMMddHHmmss` of the start time
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub resolution_passes: usize,
    /// Set when the run stopped before any set was processed
    pub error: Option<String>,
    /// Set when the process gate stopped the run cleanly
    pub skipped: Option<String>,
    pub sets: Vec<SetReport>,
}

impl RunReport {
    pub fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            job_name: JOB_NAME.to_string(),
            job_id: started_at.format("%Y%m%d%H%M%S").to_string(),
            started_at,
            finished_at: None,
            resolution_passes: 0,
            error: None,
            skipped: None,
            sets: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.sets.sort_by(|a, b| a.set_id.cmp(&b.set_id));
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.sets.iter().all(|s| !s.outcome.is_failure())
    }

    pub fn failed_sets(&self) -> impl Iterator<Item = &SetReport> {
        self.sets.iter().filter(|s| s.outcome.is_failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_job_id_format() {
        let started = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        let report = RunReport::start(started);
        assert_eq!(report.job_id, "20240307090501");
        assert_eq!(report.job_name, "ECL Refset Job");
    }

    #[test]
    fn test_succeeded_reflects_set_outcomes() {
        let mut report = RunReport::start(Utc::now());
        report.sets.push(SetReport::new("800000000000001", None));
        assert!(report.succeeded());

        report
            .sets
            .push(SetReport::new("800000000000002", None).fail(SetOutcome::Failed, "boom"));
        assert!(!report.succeeded());
        assert_eq!(report.failed_sets().count(), 1);
    }

    #[test]
    fn test_serializes_camel_case() {
        let report = RunReport::start(Utc::now());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("jobName").is_some());
        assert!(json.get("resolutionPasses").is_some());
    }
}
