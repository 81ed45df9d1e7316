//! Terminology server access
//!
//! `TerminologyStore` is the only boundary between the reconciler and the
//! remote server. `SnowstormClient` implements it over HTTP; tests use an
//! in-memory implementation.

pub mod client;
#[cfg(test)]
pub(crate) mod memory;
pub mod types;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::reconcile::MutationRecord;

pub use client::SnowstormClient;
pub use types::{BulkJobStatus, BulkMember, ConceptMini, MemberQuery, Page, ReferenceSetMember};

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait TerminologyStore: Send + Sync {
    /// Evaluate an ECL expression. `active_filter = None` returns concepts
    /// regardless of status.
    async fn search(
        &self,
        ecl: &str,
        active_filter: Option<bool>,
        offset: u64,
        limit: u64,
    ) -> Result<Page<ConceptMini>>;

    async fn find_members(&self, query: &MemberQuery) -> Result<Page<ReferenceSetMember>>;

    async fn concept_exists(&self, concept_id: &str) -> Result<bool>;

    /// Submit a bulk member job. Returns the job location, or `None` when the
    /// server accepted the request without saying where to poll.
    async fn bulk_mutate_members(&self, records: &[MutationRecord]) -> Result<Option<String>>;

    async fn job_status(&self, location: &str) -> Result<BulkJobStatus>;
}
