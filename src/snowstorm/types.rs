//! Snowstorm REST payloads
//!
//! Only the fields the reconciler reads are mapped; everything else in the
//! server's responses is ignored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::reconcile::MutationRecord;

/// Paged search response (`items`, `total`, `offset`, `limit`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermLangPojo {
    pub term: String,
    #[serde(default)]
    pub lang: Option<String>,
}

/// Concept summary as returned by `/concepts` and nested in members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMini {
    #[serde(alias = "id")]
    pub concept_id: String,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub module_id: Option<String>,
    #[serde(default)]
    pub fsn: Option<TermLangPojo>,
    #[serde(default)]
    pub pt: Option<TermLangPojo>,
}

impl ConceptMini {
    pub fn new(concept_id: impl Into<String>) -> Self {
        Self {
            concept_id: concept_id.into(),
            active: None,
            module_id: None,
            fsn: None,
            pt: None,
        }
    }

    /// Best display term: preferred term, then FSN
    pub fn title(&self) -> Option<String> {
        self.pt
            .as_ref()
            .or(self.fsn.as_ref())
            .map(|t| t.term.clone())
    }
}

/// Reference set member as returned by `/members`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSetMember {
    pub member_id: String,
    pub active: bool,
    #[serde(default)]
    pub module_id: String,
    pub refset_id: String,
    pub referenced_component_id: String,
    #[serde(default)]
    pub referenced_component: Option<ConceptMini>,
    #[serde(default)]
    pub additional_fields: HashMap<String, String>,
}

/// Filters for `/members`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberQuery {
    pub reference_set: String,
    pub referenced_component_id: Option<String>,
    pub active: Option<bool>,
    pub offset: u64,
    pub limit: u64,
}

impl MemberQuery {
    pub fn for_set(reference_set: impl Into<String>) -> Self {
        Self {
            reference_set: reference_set.into(),
            referenced_component_id: None,
            active: None,
            offset: 0,
            limit: 1,
        }
    }

    pub fn component(mut self, concept_id: impl Into<String>) -> Self {
        self.referenced_component_id = Some(concept_id.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Body element of `POST /members/bulk`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkMember {
    pub member_id: String,
    pub active: bool,
    pub referenced_component_id: String,
    pub refset_id: String,
    pub module_id: String,
}

impl From<&MutationRecord> for BulkMember {
    fn from(record: &MutationRecord) -> Self {
        Self {
            member_id: record.member_id.clone(),
            active: record.active(),
            referenced_component_id: record.concept_id.clone(),
            refset_id: record.set_id.clone(),
            module_id: record.module_id.clone(),
        }
    }
}

/// `GET /members/bulk/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJobStatus {
    pub status: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub seconds_duration: Option<f64>,
}
