//! Membership differ
//!
//! For a set `C` with resolved expression `E`:
//! - add    = `(E) MINUS (^ C)`
//! - remove = `(^ C) MINUS (E)`, plus members whose concept went inactive
//!
//! Searches are paged under the server's `offset + limit` ceiling. The first
//! page gives the total, the remaining windows are fetched concurrently.

use std::collections::BTreeSet;
use std::sync::Arc;

use ecl_core::Expression;
use tracing::debug;

use super::bounded::{bounded_map, cancelled, CancelToken};
use super::types::{DeltaItem, MembershipDelta};
use crate::config::{RefsetConfig, MAX_OFFSET_PLUS_PAGE_SIZE};
use crate::error::{SetError, StoreError};
use crate::snowstorm::{MemberQuery, TerminologyStore};

const INACTIVE_CONCEPT_FILTER: &str = "C active = 0";

/// One evaluated expression, possibly cut short by the ceiling
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub items: Vec<DeltaItem>,
    pub total: u64,
}

/// The three expressions diffed for one set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffExpressions {
    pub add: String,
    pub remove: String,
    pub stale: String,
}

impl DiffExpressions {
    pub fn new(set_id: &str, resolved: &Expression) -> Self {
        Self {
            add: resolved
                .clone()
                .minus(Expression::member_of(set_id))
                .to_string(),
            remove: Expression::member_of(set_id)
                .minus(resolved.clone())
                .to_string(),
            stale: Expression::member_of(set_id)
                .with_filter(INACTIVE_CONCEPT_FILTER)
                .to_string(),
        }
    }
}

pub struct MembershipDiffer {
    store: Arc<dyn TerminologyStore>,
    page_size: u64,
    page_concurrency: usize,
    ceiling: u64,
}

impl MembershipDiffer {
    pub fn new(store: Arc<dyn TerminologyStore>, page_size: u64, page_concurrency: usize) -> Self {
        Self {
            store,
            page_size: page_size.clamp(1, MAX_OFFSET_PLUS_PAGE_SIZE),
            page_concurrency,
            ceiling: MAX_OFFSET_PLUS_PAGE_SIZE,
        }
    }

    pub fn from_config(store: Arc<dyn TerminologyStore>, config: &RefsetConfig) -> Self {
        Self::new(store, config.page_size, config.page_concurrency)
    }

    /// Lower the search ceiling (servers configured below the default)
    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = ceiling.max(1);
        self.page_size = self.page_size.min(self.ceiling);
        self
    }

    /// Evaluate `ecl`, fetching every window below the ceiling
    pub async fn evaluate(
        &self,
        ecl: &str,
        active_filter: Option<bool>,
        cancel: &CancelToken,
    ) -> Result<SearchResult, StoreError> {
        if *cancel.borrow() {
            return Err(StoreError::Cancelled);
        }
        let mut cancel_rx = cancel.clone();
        let first = tokio::select! {
            result = self.store.search(ecl, active_filter, 0, self.page_size) => result?,
            _ = cancelled(&mut cancel_rx) => return Err(StoreError::Cancelled),
        };
        let total = first.total;
        let reachable = total.min(self.ceiling);

        let windows: Vec<(u64, u64)> = (1..)
            .map(|i| i * self.page_size)
            .take_while(|offset| *offset < reachable)
            .map(|offset| (offset, self.page_size.min(self.ceiling - offset)))
            .collect();

        debug!(total, windows = windows.len() + 1, "Evaluating expression");

        let store = &self.store;
        let pages = bounded_map(windows, self.page_concurrency, cancel, |(offset, limit)| {
            store.search(ecl, active_filter, offset, limit)
        })
        .await?;

        let mut seen = BTreeSet::new();
        let items = std::iter::once(first)
            .chain(pages)
            .flat_map(|page| page.items)
            .filter(|concept| seen.insert(concept.concept_id.clone()))
            .map(|concept| DeltaItem {
                title: concept.title(),
                concept_id: concept.concept_id,
            })
            .collect();

        Ok(SearchResult { items, total })
    }

    /// Compute the add and remove sides for one set from a single read
    pub async fn diff(
        &self,
        set_id: &str,
        resolved: &Expression,
        cancel: &CancelToken,
    ) -> Result<MembershipDelta, SetError> {
        let expressions = DiffExpressions::new(set_id, resolved);
        debug!(set_id, add = %expressions.add, remove = %expressions.remove, "Diffing");

        let add = self.evaluate(&expressions.add, Some(true), cancel).await?;
        let remove = self
            .evaluate(&expressions.remove, Some(true), cancel)
            .await?;
        let stale = self.evaluate(&expressions.stale, None, cancel).await?;

        let mut to_remove = remove.items;
        let mut removing: BTreeSet<String> =
            to_remove.iter().map(|i| i.concept_id.clone()).collect();
        for item in stale.items {
            if removing.insert(item.concept_id.clone()) {
                to_remove.push(item);
            }
        }

        let overlap: Vec<String> = add
            .items
            .iter()
            .filter(|i| removing.contains(&i.concept_id))
            .map(|i| i.concept_id.clone())
            .collect();
        if !overlap.is_empty() {
            return Err(SetError::PartitionViolated { overlap });
        }

        Ok(MembershipDelta {
            set_id: set_id.to_string(),
            to_add: add.items,
            to_remove,
            add_total: add.total,
            remove_total: remove.total + stale.total,
        })
    }

    /// Active member count of the set
    pub async fn current_total(&self, set_id: &str) -> Result<u64, StoreError> {
        let query = MemberQuery::for_set(set_id).active(true).page(0, 1);
        Ok(self.store.find_members(&query).await?.total)
    }
}
