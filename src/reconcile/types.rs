//! Domain types flowing through a reconciliation run

use std::fmt;

use ecl_core::ConceptId;
use serde::{Deserialize, Serialize};

/// One query reference set: a member of the query specification refset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDefinition {
    pub id: ConceptId,
    pub module_id: String,
    pub expression: String,
    pub term: Option<String>,
}

/// Which side of the diff a piece of work belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Add,
    Remove,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Add => f.write_str("add"),
            Direction::Remove => f.write_str("remove"),
        }
    }
}

/// A concept returned by an expression search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaItem {
    pub concept_id: ConceptId,
    /// Display term when the server supplied one
    pub title: Option<String>,
}

/// Proposed change for one set, from a single read of remote state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MembershipDelta {
    pub set_id: ConceptId,
    pub to_add: Vec<DeltaItem>,
    pub to_remove: Vec<DeltaItem>,
    /// Remote totals, larger than the lists when the search ceiling cut them short
    pub add_total: u64,
    pub remove_total: u64,
}

impl MembershipDelta {
    pub fn is_empty(&self) -> bool {
        self.add_total == 0 && self.remove_total == 0
    }

    /// True when either side holds fewer items than the server reported
    pub fn is_truncated(&self) -> bool {
        (self.to_add.len() as u64) < self.add_total
            || (self.to_remove.len() as u64) < self.remove_total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    Create,
    Reactivate,
    Deactivate,
}

/// One member write. `member_id` is the existing member for reactivate and
/// deactivate, and a client-assigned UUID for create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub concept_id: ConceptId,
    pub set_id: ConceptId,
    pub module_id: String,
    pub member_id: String,
}

impl MutationRecord {
    /// Resulting `active` flag of the member
    pub fn active(&self) -> bool {
        !matches!(self.kind, MutationKind::Deactivate)
    }
}
