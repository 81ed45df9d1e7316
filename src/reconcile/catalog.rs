//! Collection catalog - explicit classification of every collection a
//! definition refers to.

use std::collections::{BTreeMap, BTreeSet};

use ecl_core::{referenced_collections, ConceptId, ExpressionParser};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::types::SetDefinition;
use crate::error::{ResolutionError, RunError};
use crate::snowstorm::TerminologyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Declared by a query definition; expanded during resolution
    Query,
    /// Enumerated reference set; left as a member-of term
    PickList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionCatalog {
    kinds: BTreeMap<ConceptId, CollectionKind>,
}

impl CollectionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every definition registered as a query set
    pub fn from_definitions(definitions: &[SetDefinition]) -> Self {
        let mut catalog = Self::new();
        for definition in definitions {
            catalog.insert(definition.id.clone(), CollectionKind::Query);
        }
        catalog
    }

    pub fn insert(&mut self, id: impl Into<ConceptId>, kind: CollectionKind) {
        self.kinds.insert(id.into(), kind);
    }

    pub fn kind(&self, id: &str) -> Option<CollectionKind> {
        self.kinds.get(id).copied()
    }

    pub fn is_query(&self, id: &str) -> bool {
        self.kind(id) == Some(CollectionKind::Query)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Classify every referenced collection. Targets that are not query sets are
/// accepted as pick-lists only once the store confirms the concept exists;
/// anything else stays uncatalogued and fails resolution.
pub async fn build_catalog(
    store: &dyn TerminologyStore,
    parser: &dyn ExpressionParser,
    definitions: &[SetDefinition],
) -> Result<CollectionCatalog, RunError> {
    let mut catalog = CollectionCatalog::from_definitions(definitions);

    let mut candidates = BTreeSet::new();
    for definition in definitions {
        let tree = parser
            .parse(&definition.expression)
            .map_err(|source| ResolutionError::InvalidSyntax {
                set_id: definition.id.clone(),
                source,
            })?;
        candidates.extend(
            referenced_collections(&tree)
                .into_iter()
                .filter(|id| !catalog.is_query(id)),
        );
    }

    for id in candidates {
        if store.concept_exists(&id).await? {
            info!(collection_id = %id, "Catalogued as pick-list");
            catalog.insert(id, CollectionKind::PickList);
        } else {
            warn!(collection_id = %id, "Referenced collection does not exist");
        }
    }

    Ok(catalog)
}
