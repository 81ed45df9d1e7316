//! Reconciliation engine
//!
//! Flow per run:
//! 1. `definitions` - read the query reference set
//! 2. `catalog` + `resolver` - classify referenced collections, substitute
//!    query-set references until every expression is self-contained
//! 3. per set, on the worker pool: `differ` -> `threshold` -> `applier`
//!    -> `poller`
//! 4. `report` - aggregate and hand off to the ticketing sink

pub mod applier;
pub mod bounded;
pub mod catalog;
pub mod definitions;
pub mod differ;
pub mod pipeline;
pub mod poller;
pub mod report;
pub mod resolver;
pub mod threshold;
pub mod types;

pub use applier::{ClassifiedMutations, ReconciliationApplier, SnapshotViolation};
pub use bounded::CancelToken;
pub use catalog::{build_catalog, CollectionCatalog, CollectionKind};
pub use definitions::load_definitions;
pub use differ::MembershipDiffer;
pub use pipeline::{Reconciler, RunOptions};
pub use poller::{BatchJobPoller, PollSettings};
pub use report::{RunReport, SetOutcome, SetReport, JOB_NAME};
pub use resolver::{DependencyResolver, Resolution, ResolvedExpression};
pub use threshold::{ThresholdGuard, ThresholdLog, ThresholdWarning};
pub use types::{
    DeltaItem, Direction, MembershipDelta, MutationKind, MutationRecord, SetDefinition,
};
