//! Dependency resolver - expands nested query reference sets
//!
//! Each definition may refer to other query sets with `^ id`. The resolver
//! replaces every such term with a parenthesised copy of the referenced set's
//! resolved tree, pass by pass, until every definition is expressed without
//! query-set references. A set's reference to itself means "current members"
//! and is never expanded; pick-list references are left untouched.

use std::collections::{BTreeMap, BTreeSet};

use ecl_core::visitor::walk_sub_expression_mut;
use ecl_core::{
    referenced_collections, ConceptId, EclParser, Expression, ExpressionParser,
    ExpressionVisitorMut, Focus, SubExpression,
};
use tracing::{debug, info};

use super::catalog::{CollectionCatalog, CollectionKind};
use super::types::SetDefinition;
use crate::error::ResolutionError;

/// Hard cap on substitution passes
pub const MAX_PASSES: usize = 100;

/// A definition with every query-set reference substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExpression {
    pub set_id: ConceptId,
    pub expression: Expression,
    /// Text sent to the server
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub expressions: BTreeMap<ConceptId, ResolvedExpression>,
    /// Substitution passes taken; sets with no dependencies cost none
    pub passes: usize,
}

impl Resolution {
    pub fn get(&self, set_id: &str) -> Option<&ResolvedExpression> {
        self.expressions.get(set_id)
    }
}

pub struct DependencyResolver<P: ExpressionParser = EclParser> {
    parser: P,
}

impl Default for DependencyResolver<EclParser> {
    fn default() -> Self {
        Self::new(EclParser)
    }
}

impl<P: ExpressionParser> DependencyResolver<P> {
    pub fn new(parser: P) -> Self {
        Self { parser }
    }

    pub fn resolve(
        &self,
        definitions: &[SetDefinition],
        catalog: &CollectionCatalog,
    ) -> Result<Resolution, ResolutionError> {
        let mut trees: BTreeMap<ConceptId, (Expression, &str)> = BTreeMap::new();
        for definition in definitions {
            let tree = self.parser.parse(&definition.expression).map_err(|source| {
                ResolutionError::InvalidSyntax {
                    set_id: definition.id.clone(),
                    source,
                }
            })?;
            if trees
                .insert(definition.id.clone(), (tree, definition.expression.as_str()))
                .is_some()
            {
                return Err(ResolutionError::DuplicateDefinition {
                    set_id: definition.id.clone(),
                });
            }
        }

        let mut dependencies: BTreeMap<ConceptId, BTreeSet<ConceptId>> = BTreeMap::new();
        for (id, (tree, _)) in &trees {
            let mut deps = BTreeSet::new();
            for target in referenced_collections(tree) {
                if &target == id {
                    continue;
                }
                match catalog.kind(&target) {
                    Some(CollectionKind::Query) if trees.contains_key(&target) => {
                        deps.insert(target);
                    }
                    Some(CollectionKind::PickList) => {}
                    _ => {
                        return Err(ResolutionError::UnknownCollection {
                            set_id: id.clone(),
                            collection_id: target,
                        })
                    }
                }
            }
            dependencies.insert(id.clone(), deps);
        }

        let mut resolved: BTreeMap<ConceptId, ResolvedExpression> = BTreeMap::new();
        for (id, (tree, text)) in &trees {
            if dependencies.get(id).map_or(true, |d| d.is_empty()) {
                resolved.insert(
                    id.clone(),
                    ResolvedExpression {
                        set_id: id.clone(),
                        expression: tree.clone(),
                        text: text.trim().to_string(),
                    },
                );
            }
        }

        let mut passes = 0;
        while resolved.len() < trees.len() {
            let ready: Vec<ConceptId> = trees
                .keys()
                .filter(|id| !resolved.contains_key(*id))
                .filter(|id| {
                    dependencies
                        .get(*id)
                        .is_some_and(|deps| deps.iter().all(|d| resolved.contains_key(d)))
                })
                .cloned()
                .collect();

            if ready.is_empty() || passes == MAX_PASSES {
                let ids = trees
                    .keys()
                    .filter(|id| !resolved.contains_key(*id))
                    .cloned()
                    .collect();
                return Err(ResolutionError::CyclicOrNonConvergentDefinition { ids });
            }
            passes += 1;

            let mut newly_resolved = Vec::with_capacity(ready.len());
            for id in ready {
                let Some((tree, _)) = trees.get(&id) else {
                    continue;
                };
                let mut expanded = tree.clone();
                Substitute {
                    self_id: &id,
                    resolved: &resolved,
                }
                .visit_expression_mut(&mut expanded);

                let text = expanded.to_string();
                let expression = self.parser.parse(&text).map_err(|source| {
                    ResolutionError::InvalidSubstitution {
                        set_id: id.clone(),
                        source,
                    }
                })?;
                debug!(set_id = %id, pass = passes, ecl = %text, "Expanded definition");
                newly_resolved.push(ResolvedExpression {
                    set_id: id,
                    expression,
                    text,
                });
            }

            for expression in newly_resolved {
                resolved.insert(expression.set_id.clone(), expression);
            }
        }

        info!(sets = resolved.len(), passes, "Resolved query reference sets");
        Ok(Resolution {
            expressions: resolved,
            passes,
        })
    }
}

/// Replaces `^ id` terms of resolved query sets with their nested trees,
/// keeping the term's constraint operator and filters.
struct Substitute<'a> {
    self_id: &'a str,
    resolved: &'a BTreeMap<ConceptId, ResolvedExpression>,
}

impl ExpressionVisitorMut for Substitute<'_> {
    fn visit_sub_expression_mut(&mut self, sub: &mut SubExpression) {
        let replacement = sub
            .member_of_target()
            .filter(|target| target.id != self.self_id)
            .and_then(|target| self.resolved.get(&target.id));

        match replacement {
            Some(resolved) => {
                sub.member_of = false;
                sub.focus = Focus::Nested(Box::new(resolved.expression.clone()));
            }
            None => walk_sub_expression_mut(self, sub),
        }
    }
}
