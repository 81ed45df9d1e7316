//! Reconciliation applier - turns a delta into member writes
//!
//! Additions reuse an existing inactive member when there is one; removals
//! must find the active member they deactivate.

use std::sync::Arc;

use ecl_core::ConceptId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::bounded::{bounded_map, CancelToken};
use super::types::{MembershipDelta, MutationKind, MutationRecord, SetDefinition};
use crate::error::StoreError;
use crate::snowstorm::{MemberQuery, TerminologyStore};

/// A removal whose concept has no active member to deactivate
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("No active member of reference set {set_id} for concept {concept_id}")]
pub struct SnapshotViolation {
    pub set_id: ConceptId,
    pub concept_id: ConceptId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedMutations {
    pub records: Vec<MutationRecord>,
    pub violations: Vec<SnapshotViolation>,
}

impl ClassifiedMutations {
    pub fn count(&self, kind: MutationKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }
}

pub struct ReconciliationApplier {
    store: Arc<dyn TerminologyStore>,
    lookup_concurrency: usize,
}

impl ReconciliationApplier {
    pub fn new(store: Arc<dyn TerminologyStore>, lookup_concurrency: usize) -> Self {
        Self {
            store,
            lookup_concurrency,
        }
    }

    /// One existing member of `set_id` for `concept_id` with the given status
    async fn find_member(
        &self,
        set_id: &str,
        concept_id: &str,
        active: bool,
    ) -> Result<Option<String>, StoreError> {
        let query = MemberQuery::for_set(set_id)
            .component(concept_id)
            .active(active)
            .page(0, 1);
        let page = self.store.find_members(&query).await?;
        Ok(page.items.into_iter().next().map(|m| m.member_id))
    }

    pub async fn classify(
        &self,
        set: &SetDefinition,
        delta: &MembershipDelta,
        cancel: &CancelToken,
    ) -> Result<ClassifiedMutations, StoreError> {
        let record = |kind, concept_id: &str, member_id: String| MutationRecord {
            kind,
            concept_id: concept_id.to_string(),
            set_id: set.id.clone(),
            module_id: set.module_id.clone(),
            member_id,
        };

        let inactive = bounded_map(
            delta.to_add.iter().collect(),
            self.lookup_concurrency,
            cancel,
            |item| self.find_member(&set.id, &item.concept_id, false),
        )
        .await?;

        let active = bounded_map(
            delta.to_remove.iter().collect(),
            self.lookup_concurrency,
            cancel,
            |item| self.find_member(&set.id, &item.concept_id, true),
        )
        .await?;

        let mut classified = ClassifiedMutations::default();

        for (item, existing) in delta.to_add.iter().zip(inactive) {
            classified.records.push(match existing {
                Some(member_id) => record(MutationKind::Reactivate, &item.concept_id, member_id),
                None => record(
                    MutationKind::Create,
                    &item.concept_id,
                    Uuid::new_v4().to_string(),
                ),
            });
        }

        for (item, existing) in delta.to_remove.iter().zip(active) {
            match existing {
                Some(member_id) => classified.records.push(record(
                    MutationKind::Deactivate,
                    &item.concept_id,
                    member_id,
                )),
                None => classified.violations.push(SnapshotViolation {
                    set_id: set.id.clone(),
                    concept_id: item.concept_id.clone(),
                }),
            }
        }

        info!(
            set_id = %set.id,
            create = classified.count(MutationKind::Create),
            reactivate = classified.count(MutationKind::Reactivate),
            deactivate = classified.count(MutationKind::Deactivate),
            violations = classified.violations.len(),
            "Classified membership changes"
        );
        Ok(classified)
    }
}
