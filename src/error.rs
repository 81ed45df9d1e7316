//! Error types for the reconciliation engine
//!
//! One enum per layer, using thiserror. Definitional errors (`ResolutionError`)
//! stop a run before anything is mutated; everything scoped to a single
//! reference set ends up as a `SetError` on that set's report.

use std::collections::BTreeSet;

use ecl_core::{ConceptId, ParseError};
use thiserror::Error;

use crate::reconcile::Direction;

/// Failures talking to the terminology server
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Definitional errors found while expanding nested reference sets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Reference set {set_id} has an invalid expression: {source}")]
    InvalidSyntax {
        set_id: ConceptId,
        #[source]
        source: ParseError,
    },

    #[error("Reference set {set_id} refers to unknown collection {collection_id}")]
    UnknownCollection {
        set_id: ConceptId,
        collection_id: ConceptId,
    },

    #[error("Reference set {set_id} has more than one active definition")]
    DuplicateDefinition { set_id: ConceptId },

    #[error("Cyclic or non-convergent definitions: {}", ids.join(", "))]
    CyclicOrNonConvergentDefinition { ids: Vec<ConceptId> },

    #[error("Substituted expression for {set_id} no longer parses: {source}")]
    InvalidSubstitution {
        set_id: ConceptId,
        #[source]
        source: ParseError,
    },
}

/// Terminal failures of a bulk member job
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Batch submission failed: {reason}")]
    SubmissionFailed { reason: String },

    #[error(
        "Batch verification failed: submitted {} ids, job returned {}",
        submitted.len(),
        returned.len()
    )]
    VerificationFailed {
        submitted: BTreeSet<String>,
        returned: BTreeSet<String>,
    },

    #[error("Batch job failed: {message}")]
    Failed { message: String },

    #[error("Unexpected batch status: {status}")]
    UnexpectedStatus { status: String },

    #[error("Batch job timed out after {attempts} polls (last message: {})", last_message.as_deref().unwrap_or("none"))]
    TimedOut {
        attempts: u32,
        last_message: Option<String>,
    },

    #[error("Batch polling cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Per-set failure, isolated from every other set in the run
#[derive(Error, Debug)]
pub enum SetError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Percent threshold exceeded for {direction}: {ratio:.4} >= {configured}")]
    ThresholdBlocked {
        direction: Direction,
        ratio: f64,
        configured: f64,
    },

    #[error("{count} has exceeded the count threshold of {threshold} while attempting to {direction} concepts")]
    CountThresholdExceeded {
        direction: Direction,
        count: u64,
        threshold: u64,
    },

    #[error("Concepts both to add and to remove: {}", overlap.join(", "))]
    PartitionViolated { overlap: Vec<ConceptId> },

    #[error("Re-diff of {direction} made no progress ({total} remaining)")]
    NoProgress { direction: Direction, total: u64 },

    #[error("No resolved expression for reference set {0}")]
    Unresolved(ConceptId),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Failures talking to the ticketing service
#[derive(Error, Debug)]
pub enum TicketingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Errors that stop a whole run
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Ticketing error: {0}")]
    Ticketing(#[from] TicketingError),

    #[error("Run cancelled")]
    Cancelled,
}
