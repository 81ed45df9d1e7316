//! Run orchestration
//!
//! Gate, load, catalogue and resolve everything once, then reconcile each
//! set on a bounded worker pool. Per-set failures land on that set's report;
//! only definitional failures stop the run.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use ecl_core::{ConceptId, EclParser};
use tokio::sync::Semaphore;
use tracing::{error, info, info_span, warn, Instrument};

use super::applier::ReconciliationApplier;
use super::bounded::CancelToken;
use super::catalog::build_catalog;
use super::definitions::load_definitions;
use super::differ::MembershipDiffer;
use super::poller::{BatchJobPoller, PollSettings};
use super::report::{RunReport, SetOutcome, SetReport};
use super::resolver::{DependencyResolver, Resolution, ResolvedExpression};
use super::threshold::ThresholdGuard;
use super::types::{Direction, MembershipDelta, MutationKind, SetDefinition};
use crate::config::RefsetConfig;
use crate::error::{BatchError, RunError, SetError, StoreError};
use crate::snowstorm::TerminologyStore;
use crate::ticketing::{self, GateDecision, ReportSink};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resolve and diff only
    pub dry_run: bool,
    /// Restrict the run to these sets (all when empty)
    pub only_sets: BTreeSet<ConceptId>,
}

/// Everything one set's pipeline needs, shared across workers
struct SetPipeline {
    differ: MembershipDiffer,
    applier: ReconciliationApplier,
    poller: BatchJobPoller,
    guard: ThresholdGuard,
    dry_run: bool,
}

pub struct Reconciler {
    store: Arc<dyn TerminologyStore>,
    sink: Option<Arc<dyn ReportSink>>,
    config: RefsetConfig,
    guard: Option<ThresholdGuard>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TerminologyStore>, config: RefsetConfig) -> Self {
        Self {
            store,
            sink: None,
            config,
            guard: None,
        }
    }

    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the guard built from config
    pub fn with_guard(mut self, guard: ThresholdGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Run to completion. Always returns a report; definitional failures are
    /// recorded in `RunReport::error`.
    pub async fn run(self, options: RunOptions, cancel: CancelToken) -> RunReport {
        let mut report = RunReport::start(Utc::now());
        let sink = self.sink.clone();

        if let (Some(sink), Some(process_name)) = (&sink, &self.config.process_name) {
            match ticketing::process_gate(sink.as_ref(), process_name).await {
                Ok(GateDecision::Proceed) => {}
                Ok(decision) => {
                    report.skipped = Some(format!("{:?}: {}", decision, process_name));
                    report.finish();
                    return report;
                }
                Err(e) => {
                    error!(error = %e, "Process gate check failed");
                    report.error = Some(RunError::from(e).to_string());
                    report.finish();
                    return report;
                }
            }
        }

        match self.reconcile_all(&options, &cancel, &mut report).await {
            Ok(()) => {}
            Err(e) => {
                error!(error = %e, "Run stopped before reconciliation");
                report.error = Some(e.to_string());
            }
        }
        report.finish();

        info!(
            job_id = %report.job_id,
            sets = report.sets.len(),
            failed = report.failed_sets().count(),
            "Run finished"
        );
        if let Some(sink) = &sink {
            ticketing::notify(sink.as_ref(), &report).await;
        }
        report
    }

    async fn reconcile_all(
        self,
        options: &RunOptions,
        cancel: &CancelToken,
        report: &mut RunReport,
    ) -> Result<(), RunError> {
        let definitions = load_definitions(
            self.store.as_ref(),
            &self.config.query_refset_id,
            self.config.page_size,
        )
        .await?;
        if *cancel.borrow() {
            return Err(RunError::Cancelled);
        }

        let catalog = build_catalog(self.store.as_ref(), &EclParser, &definitions).await?;
        let resolution = DependencyResolver::default().resolve(&definitions, &catalog)?;
        report.resolution_passes = resolution.passes;
        let resolution: Arc<Resolution> = Arc::new(resolution);

        let unknown: Vec<ConceptId> = {
            let known: HashSet<&str> = definitions.iter().map(|d| d.id.as_str()).collect();
            options
                .only_sets
                .iter()
                .filter(|id| !known.contains(id.as_str()))
                .cloned()
                .collect()
        };
        for id in unknown {
            warn!(set_id = %id, "Requested set is not a query reference set");
            let error = SetError::Unresolved(id.clone());
            report
                .sets
                .push(SetReport::new(id, None).fail(SetOutcome::Failed, error));
        }

        let selected: Vec<SetDefinition> = definitions
            .into_iter()
            .filter(|d| options.only_sets.is_empty() || options.only_sets.contains(&d.id))
            .collect();

        let guard = match self.guard {
            Some(guard) => guard,
            None => ThresholdGuard::from_config(&self.config),
        };
        let pipeline = Arc::new(SetPipeline {
            differ: MembershipDiffer::from_config(self.store.clone(), &self.config),
            applier: ReconciliationApplier::new(self.store.clone(), self.config.page_concurrency),
            poller: BatchJobPoller::new(self.store.clone(), PollSettings::from_config(&self.config)),
            guard,
            dry_run: options.dry_run,
        });
        let workers = Arc::new(Semaphore::new(self.config.worker_pool.max(1)));

        let mut handles = Vec::with_capacity(selected.len());
        for definition in selected {
            let pipeline = pipeline.clone();
            let resolution = resolution.clone();
            let workers = workers.clone();
            let cancel = cancel.clone();
            let set_id = definition.id.clone();
            let span = info_span!("refset", set_id = %definition.id);

            let handle = tokio::spawn(
                async move {
                    let Ok(_permit) = workers.acquire_owned().await else {
                        return SetReport::new(definition.id.clone(), definition.term.clone())
                            .fail(SetOutcome::Cancelled, SetError::Cancelled);
                    };
                    match resolution.get(&definition.id) {
                        Some(resolved) => pipeline.reconcile(&definition, resolved, &cancel).await,
                        None => SetReport::new(definition.id.clone(), definition.term.clone())
                            .fail(SetOutcome::Failed, SetError::Unresolved(definition.id.clone())),
                    }
                }
                .instrument(span),
            );
            handles.push((set_id, handle));
        }

        for (set_id, handle) in handles {
            match handle.await {
                Ok(set_report) => report.sets.push(set_report),
                Err(e) => {
                    error!(set_id = %set_id, error = %e, "Set task aborted");
                    report
                        .sets
                        .push(SetReport::new(set_id, None).fail(SetOutcome::Failed, e));
                }
            }
        }
        Ok(())
    }
}

fn outcome_for(error: &SetError) -> SetOutcome {
    match error {
        SetError::Cancelled
        | SetError::Store(StoreError::Cancelled)
        | SetError::Batch(BatchError::Cancelled)
        | SetError::Batch(BatchError::Store(StoreError::Cancelled)) => SetOutcome::Cancelled,
        SetError::ThresholdBlocked { .. } | SetError::CountThresholdExceeded { .. } => {
            SetOutcome::Blocked
        }
        _ => SetOutcome::Failed,
    }
}

impl SetPipeline {
    /// diff, guard, classify, submit and poll; repeated from offset 0 while
    /// the search ceiling truncates the diff
    async fn reconcile(
        &self,
        definition: &SetDefinition,
        resolved: &ResolvedExpression,
        cancel: &CancelToken,
    ) -> SetReport {
        let mut report = SetReport::new(definition.id.clone(), definition.term.clone());
        match self.run_windows(definition, resolved, cancel, &mut report).await {
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "Set reconciliation failed");
                let outcome = outcome_for(&e);
                return report.fail(outcome, e);
            }
        }

        settle_outcome(&mut report);
        info!(
            created = report.created,
            reactivated = report.reactivated,
            deactivated = report.deactivated,
            outcome = ?report.outcome,
            "Set reconciled"
        );
        report
    }

    async fn run_windows(
        &self,
        definition: &SetDefinition,
        resolved: &ResolvedExpression,
        cancel: &CancelToken,
        report: &mut SetReport,
    ) -> Result<(), SetError> {
        if *cancel.borrow() {
            return Err(SetError::Cancelled);
        }
        let set_id = definition.id.as_str();
        report.current_total = self.differ.current_total(set_id).await?;

        let mut refused: BTreeSet<Direction> = BTreeSet::new();
        let mut previous_remaining: Option<u64> = None;

        loop {
            let mut delta = self.differ.diff(set_id, &resolved.expression, cancel).await?;
            report.windows += 1;

            if report.windows == 1 {
                report.add_total = delta.add_total;
                report.remove_total = delta.remove_total;
                for (direction, size) in [
                    (Direction::Add, delta.add_total),
                    (Direction::Remove, delta.remove_total),
                ] {
                    if refused.contains(&direction) {
                        continue;
                    }
                    let outcome = self
                        .guard
                        .check(set_id, direction, size, report.current_total)
                        .await;
                    report.warnings.extend(outcome.warnings);
                    match outcome.refused {
                        Some(e @ SetError::ThresholdBlocked { .. }) => return Err(e),
                        Some(e) => {
                            report.errors.push(e.to_string());
                            report.outcome = SetOutcome::Blocked;
                            refused.insert(direction);
                            // Removals are held back whenever the add side is refused
                            if direction == Direction::Add && delta.remove_total > 0 {
                                report.errors.push(format!(
                                    "{} removals not carried out because the add side exceeded the count threshold",
                                    delta.remove_total
                                ));
                                refused.insert(Direction::Remove);
                            }
                        }
                        None => {}
                    }
                }
            }

            if delta.is_empty() {
                break;
            }
            let remaining = delta.add_total + delta.remove_total;
            if let Some(previous) = previous_remaining {
                if remaining >= previous {
                    let direction = if delta.add_total > 0 {
                        Direction::Add
                    } else {
                        Direction::Remove
                    };
                    return Err(SetError::NoProgress {
                        direction,
                        total: remaining,
                    });
                }
            }
            previous_remaining = Some(remaining);

            if self.dry_run {
                if report.outcome == SetOutcome::Unchanged {
                    report.outcome = SetOutcome::DryRun;
                }
                break;
            }

            strip_refused(&mut delta, &refused);
            self.apply(definition, &delta, cancel, report).await?;

            if !delta.is_truncated() || !refused.is_empty() {
                break;
            }
            info!(
                add_total = delta.add_total,
                remove_total = delta.remove_total,
                "Diff was truncated by the search ceiling, diffing again"
            );
        }
        Ok(())
    }

    async fn apply(
        &self,
        definition: &SetDefinition,
        delta: &MembershipDelta,
        cancel: &CancelToken,
        report: &mut SetReport,
    ) -> Result<(), SetError> {
        if delta.to_add.is_empty() && delta.to_remove.is_empty() {
            return Ok(());
        }
        let classified = self.applier.classify(definition, delta, cancel).await?;
        for violation in &classified.violations {
            warn!(concept_id = %violation.concept_id, "Snapshot violation");
            report.errors.push(violation.to_string());
        }

        self.poller
            .apply_with(&classified.records, cancel, |chunk, _| {
                for record in chunk {
                    match record.kind {
                        MutationKind::Create => report.created += 1,
                        MutationKind::Reactivate => report.reactivated += 1,
                        MutationKind::Deactivate => report.deactivated += 1,
                    }
                }
            })
            .await?;
        Ok(())
    }
}

/// Final outcome of a set whose windows all ran. Item-level errors never
/// leave a set looking clean.
fn settle_outcome(report: &mut SetReport) {
    let applied = report.added() + report.deactivated > 0;
    report.outcome = match (report.outcome, applied, report.errors.is_empty()) {
        (SetOutcome::Unchanged, true, true) => SetOutcome::Applied,
        (SetOutcome::Unchanged, true, false) => SetOutcome::PartiallyApplied,
        (SetOutcome::Unchanged, false, false) => SetOutcome::Failed,
        (outcome, _, _) => outcome,
    };
}

fn strip_refused(delta: &mut MembershipDelta, refused: &BTreeSet<Direction>) {
    if refused.contains(&Direction::Add) {
        delta.to_add.clear();
        delta.add_total = 0;
    }
    if refused.contains(&Direction::Remove) {
        delta.to_remove.clear();
        delta.remove_total = 0;
    }
}
