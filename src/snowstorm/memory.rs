//! In-memory terminology store for unit tests
//!
//! Evaluates the ECL subset the reconciler generates (hierarchy operators,
//! member-of, AND/OR/MINUS, nesting and `C active` filters) over a small
//! concept hierarchy. Bulk jobs are applied immediately; their reported
//! statuses can be scripted.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use ecl_core::{parse_expression, ConstraintOperator, Expression, Focus, SubExpression};

use super::types::*;
use super::{Result, TerminologyStore};
use crate::config::MAX_OFFSET_PLUS_PAGE_SIZE;
use crate::error::StoreError;
use crate::reconcile::{MutationKind, MutationRecord};

#[derive(Debug, Clone)]
struct Concept {
    active: bool,
    parents: BTreeSet<String>,
    term: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    concepts: BTreeMap<String, Concept>,
    members: Vec<ReferenceSetMember>,
    jobs: BTreeMap<String, Vec<String>>,
    scripted_statuses: VecDeque<BulkJobStatus>,
    omit_location: bool,
    defer_bulk: bool,
    failing_jobs: BTreeMap<String, String>,
    search_calls: Vec<(String, Option<bool>, u64, u64)>,
    submitted: Vec<Vec<MutationRecord>>,
}

#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<State>,
    ceiling: u64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            ceiling: MAX_OFFSET_PLUS_PAGE_SIZE,
        }
    }

    /// Reject searches whose `offset + limit` exceeds `ceiling`
    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn add_concept(&self, id: &str, parents: &[&str]) -> &Self {
        self.state.lock().unwrap().concepts.insert(
            id.to_string(),
            Concept {
                active: true,
                parents: parents.iter().map(|p| p.to_string()).collect(),
                term: Some(format!("Concept {}", id)),
            },
        );
        self
    }

    pub fn inactivate_concept(&self, id: &str) {
        if let Some(concept) = self.state.lock().unwrap().concepts.get_mut(id) {
            concept.active = false;
        }
    }

    /// Add a member row directly; returns its member id
    pub fn add_member(&self, refset_id: &str, concept_id: &str, active: bool) -> String {
        let mut state = self.state.lock().unwrap();
        let member_id = format!("member-{}", state.members.len() + 1);
        state.members.push(ReferenceSetMember {
            member_id: member_id.clone(),
            active,
            module_id: "32506021000036107".to_string(),
            refset_id: refset_id.to_string(),
            referenced_component_id: concept_id.to_string(),
            referenced_component: Some(ConceptMini::new(concept_id)),
            additional_fields: Default::default(),
        });
        member_id
    }

    /// Register a query reference set definition
    pub fn add_definition(&self, query_refset: &str, set_id: &str, ecl: &str) {
        let mut state = self.state.lock().unwrap();
        state.concepts.entry(set_id.to_string()).or_insert(Concept {
            active: true,
            parents: BTreeSet::new(),
            term: Some(format!("Refset {}", set_id)),
        });
        let member_id = format!("definition-{}", state.members.len() + 1);
        state.members.push(ReferenceSetMember {
            member_id,
            active: true,
            module_id: "32506021000036107".to_string(),
            refset_id: query_refset.to_string(),
            referenced_component_id: set_id.to_string(),
            referenced_component: Some(ConceptMini::new(set_id)),
            additional_fields: [("query".to_string(), ecl.to_string())].into_iter().collect(),
        });
    }

    /// Queue statuses returned by the next `job_status` calls
    pub fn script_statuses(&self, statuses: impl IntoIterator<Item = BulkJobStatus>) {
        self.state
            .lock()
            .unwrap()
            .scripted_statuses
            .extend(statuses);
    }

    pub fn omit_location(&self) {
        self.state.lock().unwrap().omit_location = true;
    }

    /// Accept bulk jobs and report them completed without changing any member
    pub fn defer_bulk(&self) {
        self.state.lock().unwrap().defer_bulk = true;
    }

    /// The `job`th bulk job (1-based) reports FAILED with `message`
    pub fn fail_job(&self, job: usize, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_jobs
            .insert(job_location(job), message.to_string());
    }

    pub fn active_members(&self, refset_id: &str) -> BTreeSet<String> {
        let state = self.state.lock().unwrap();
        state
            .members
            .iter()
            .filter(|m| m.refset_id == refset_id && m.active)
            .map(|m| m.referenced_component_id.clone())
            .collect()
    }

    pub fn member(&self, member_id: &str) -> Option<ReferenceSetMember> {
        let state = self.state.lock().unwrap();
        state
            .members
            .iter()
            .find(|m| m.member_id == member_id)
            .cloned()
    }

    pub fn search_calls(&self) -> Vec<(String, Option<bool>, u64, u64)> {
        self.state.lock().unwrap().search_calls.clone()
    }

    pub fn submitted(&self) -> Vec<Vec<MutationRecord>> {
        self.state.lock().unwrap().submitted.clone()
    }
}

// ============================================================================
// Evaluation
// ============================================================================

fn bad_request(message: impl Into<String>) -> StoreError {
    StoreError::Status {
        status: 400,
        url: "memory://concepts".to_string(),
        body: message.into(),
    }
}

impl State {
    fn children_of(&self, id: &str) -> BTreeSet<String> {
        self.concepts
            .iter()
            .filter(|(_, c)| c.parents.contains(id))
            .map(|(child, _)| child.clone())
            .collect()
    }

    fn descendants_of(&self, id: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut queue: Vec<String> = self.children_of(id).into_iter().collect();
        while let Some(next) = queue.pop() {
            if found.insert(next.clone()) {
                queue.extend(self.children_of(&next));
            }
        }
        found
    }

    fn parents_of(&self, id: &str) -> BTreeSet<String> {
        self.concepts
            .get(id)
            .map(|c| c.parents.clone())
            .unwrap_or_default()
    }

    fn ancestors_of(&self, id: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut queue: Vec<String> = self.parents_of(id).into_iter().collect();
        while let Some(next) = queue.pop() {
            if found.insert(next.clone()) {
                queue.extend(self.parents_of(&next));
            }
        }
        found
    }

    fn evaluate(&self, expr: &Expression) -> Result<BTreeSet<String>> {
        match expr {
            Expression::Sub(sub) => self.evaluate_sub(sub),
            Expression::Conjunction(items) => {
                let mut sets = items.iter().map(|i| self.evaluate_sub(i));
                let mut acc = sets.next().unwrap_or_else(|| Ok(BTreeSet::new()))?;
                for set in sets {
                    let set = set?;
                    acc.retain(|id| set.contains(id));
                }
                Ok(acc)
            }
            Expression::Disjunction(items) => {
                let mut acc = BTreeSet::new();
                for item in items {
                    acc.extend(self.evaluate_sub(item)?);
                }
                Ok(acc)
            }
            Expression::Exclusion { include, exclude } => {
                let include = self.evaluate_sub(include)?;
                let exclude = self.evaluate_sub(exclude)?;
                Ok(include.difference(&exclude).cloned().collect())
            }
            Expression::Refined { .. } | Expression::Dotted { .. } => {
                Err(bad_request("refinements are not supported in memory"))
            }
        }
    }

    fn evaluate_sub(&self, sub: &SubExpression) -> Result<BTreeSet<String>> {
        let focus: BTreeSet<String> = match &sub.focus {
            Focus::Concept(concept) if sub.member_of => self
                .members
                .iter()
                .filter(|m| m.refset_id == concept.id && m.active)
                .map(|m| m.referenced_component_id.clone())
                .collect(),
            Focus::Concept(concept) => [concept.id.clone()].into_iter().collect(),
            Focus::Wildcard => self.concepts.keys().cloned().collect(),
            Focus::Nested(inner) => self.evaluate(inner)?,
        };

        let mut result = BTreeSet::new();
        for id in &focus {
            match sub.operator {
                None => {
                    result.insert(id.clone());
                }
                Some(op) => {
                    let (related, include_self) = match op {
                        ConstraintOperator::DescendantOf => (self.descendants_of(id), false),
                        ConstraintOperator::DescendantOrSelfOf => (self.descendants_of(id), true),
                        ConstraintOperator::ChildOf => (self.children_of(id), false),
                        ConstraintOperator::ChildOrSelfOf => (self.children_of(id), true),
                        ConstraintOperator::AncestorOf => (self.ancestors_of(id), false),
                        ConstraintOperator::AncestorOrSelfOf => (self.ancestors_of(id), true),
                        ConstraintOperator::ParentOf => (self.parents_of(id), false),
                        ConstraintOperator::ParentOrSelfOf => (self.parents_of(id), true),
                    };
                    result.extend(related);
                    if include_self {
                        result.insert(id.clone());
                    }
                }
            }
        }

        for filter in &sub.filters {
            let wanted = match filter.replace(' ', "").as_str() {
                "Cactive=0" | "Cactive=false" => false,
                "Cactive=1" | "Cactive=true" => true,
                other => return Err(bad_request(format!("unsupported filter {}", other))),
            };
            result.retain(|id| self.concepts.get(id).map(|c| c.active) == Some(wanted));
        }
        Ok(result)
    }
}

fn job_location(job: usize) -> String {
    format!("memory://members/bulk/{}", job)
}

fn page<T: Clone>(items: &[T], offset: u64, limit: u64) -> Page<T> {
    let start = (offset as usize).min(items.len());
    let end = (start + limit as usize).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        total: items.len() as u64,
        offset,
        limit,
    }
}

#[async_trait]
impl TerminologyStore for InMemoryStore {
    async fn search(
        &self,
        ecl: &str,
        active_filter: Option<bool>,
        offset: u64,
        limit: u64,
    ) -> Result<Page<ConceptMini>> {
        let mut state = self.state.lock().unwrap();
        state
            .search_calls
            .push((ecl.to_string(), active_filter, offset, limit));
        if offset + limit > self.ceiling {
            return Err(bad_request("offset + limit exceeds the search ceiling"));
        }

        let expr = parse_expression(ecl).map_err(|e| bad_request(e.to_string()))?;
        let ids = state.evaluate(&expr)?;
        let concepts: Vec<ConceptMini> = ids
            .into_iter()
            .filter_map(|id| {
                let concept = state.concepts.get(&id)?;
                if active_filter.is_some_and(|active| concept.active != active) {
                    return None;
                }
                Some(ConceptMini {
                    active: Some(concept.active),
                    pt: concept.term.clone().map(|term| TermLangPojo { term, lang: None }),
                    ..ConceptMini::new(id)
                })
            })
            .collect();
        Ok(page(&concepts, offset, limit))
    }

    async fn find_members(&self, query: &MemberQuery) -> Result<Page<ReferenceSetMember>> {
        let state = self.state.lock().unwrap();
        let members: Vec<ReferenceSetMember> = state
            .members
            .iter()
            .filter(|m| m.refset_id == query.reference_set)
            .filter(|m| {
                query
                    .referenced_component_id
                    .as_ref()
                    .map_or(true, |c| &m.referenced_component_id == c)
            })
            .filter(|m| query.active.map_or(true, |a| m.active == a))
            .cloned()
            .collect();
        Ok(page(&members, query.offset, query.limit))
    }

    async fn concept_exists(&self, concept_id: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().concepts.contains_key(concept_id))
    }

    async fn bulk_mutate_members(&self, records: &[MutationRecord]) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push(records.to_vec());

        let applied: &[MutationRecord] = if state.defer_bulk { &[] } else { records };
        for record in applied {
            match record.kind {
                MutationKind::Create => state.members.push(ReferenceSetMember {
                    member_id: record.member_id.clone(),
                    active: true,
                    module_id: record.module_id.clone(),
                    refset_id: record.set_id.clone(),
                    referenced_component_id: record.concept_id.clone(),
                    referenced_component: Some(ConceptMini::new(record.concept_id.clone())),
                    additional_fields: Default::default(),
                }),
                MutationKind::Reactivate | MutationKind::Deactivate => {
                    if let Some(member) = state
                        .members
                        .iter_mut()
                        .find(|m| m.member_id == record.member_id)
                    {
                        member.active = record.active();
                    }
                }
            }
        }

        let location = job_location(state.jobs.len() + 1);
        let ids = records.iter().map(|r| r.member_id.clone()).collect();
        state.jobs.insert(location.clone(), ids);
        if state.omit_location {
            return Ok(None);
        }
        Ok(Some(location))
    }

    async fn job_status(&self, location: &str) -> Result<BulkJobStatus> {
        let mut state = self.state.lock().unwrap();
        if let Some(scripted) = state.scripted_statuses.pop_front() {
            return Ok(scripted);
        }
        if let Some(message) = state.failing_jobs.get(location) {
            return Ok(BulkJobStatus {
                status: "FAILED".to_string(),
                member_ids: Vec::new(),
                message: Some(message.clone()),
                seconds_duration: None,
            });
        }
        let member_ids = state.jobs.get(location).cloned().ok_or_else(|| StoreError::Status {
            status: 404,
            url: location.to_string(),
            body: "no such job".to_string(),
        })?;
        Ok(BulkJobStatus {
            status: "COMPLETED".to_string(),
            member_ids,
            message: None,
            seconds_duration: Some(0.1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.add_concept("100000001", &[]);
        store.add_concept("100000002", &["100000001"]);
        store.add_concept("100000003", &["100000002"]);
        store
    }

    async fn ids(store: &InMemoryStore, ecl: &str) -> Vec<String> {
        store
            .search(ecl, Some(true), 0, 100)
            .await
            .unwrap()
            .items
            .into_iter()
            .map(|c| c.concept_id)
            .collect()
    }

    #[tokio::test]
    async fn test_hierarchy_operators() {
        let store = store();
        assert_eq!(ids(&store, "< 100000001").await, vec!["100000002", "100000003"]);
        assert_eq!(ids(&store, "<! 100000001").await, vec!["100000002"]);
        assert_eq!(ids(&store, ">> 100000002").await, vec!["100000001", "100000002"]);
    }

    #[tokio::test]
    async fn test_member_of_minus() {
        let store = store();
        store.add_member("900000000000001", "100000002", true);
        assert_eq!(
            ids(&store, "(<< 100000001) MINUS (^ 900000000000001)").await,
            vec!["100000001", "100000003"]
        );
    }

    #[tokio::test]
    async fn test_ceiling_enforced() {
        let store = store().with_ceiling(10);
        assert!(store.search("< 100000001", None, 5, 6).await.is_err());
        assert!(store.search("< 100000001", None, 5, 5).await.is_ok());
    }
}
