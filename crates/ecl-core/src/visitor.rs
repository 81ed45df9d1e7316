//! Tree walkers for the ECL AST
//!
//! `ExpressionVisitor` walks a borrowed tree; `ExpressionVisitorMut` walks a
//! mutable one so a pass can rewrite nodes in place. Default methods descend
//! into every child through the `walk_*` functions; an override that still
//! wants the children visited calls the matching `walk_*` itself.

use std::collections::BTreeSet;

use crate::ast::*;

// =============================================================================
// READ-ONLY VISITOR
// =============================================================================

pub trait ExpressionVisitor {
    fn visit_expression(&mut self, expr: &Expression) {
        walk_expression(self, expr);
    }

    fn visit_sub_expression(&mut self, sub: &SubExpression) {
        walk_sub_expression(self, sub);
    }

    fn visit_refinement(&mut self, refinement: &Refinement) {
        walk_refinement(self, refinement);
    }

    fn visit_attribute(&mut self, attribute: &Attribute) {
        walk_attribute(self, attribute);
    }

    /// A `^ id` term - override to collect collection references
    fn visit_member_of(&mut self, _target: &ConceptReference) {}
}

pub fn walk_expression<V: ExpressionVisitor + ?Sized>(visitor: &mut V, expr: &Expression) {
    match expr {
        Expression::Sub(sub) => visitor.visit_sub_expression(sub),
        Expression::Refined { focus, refinement } => {
            visitor.visit_sub_expression(focus);
            visitor.visit_refinement(refinement);
        }
        Expression::Dotted { focus, attributes } => {
            visitor.visit_sub_expression(focus);
            for attribute in attributes {
                visitor.visit_sub_expression(attribute);
            }
        }
        Expression::Conjunction(items) | Expression::Disjunction(items) => {
            for item in items {
                visitor.visit_sub_expression(item);
            }
        }
        Expression::Exclusion { include, exclude } => {
            visitor.visit_sub_expression(include);
            visitor.visit_sub_expression(exclude);
        }
    }
}

pub fn walk_sub_expression<V: ExpressionVisitor + ?Sized>(visitor: &mut V, sub: &SubExpression) {
    match &sub.focus {
        Focus::Concept(concept) if sub.member_of => visitor.visit_member_of(concept),
        Focus::Concept(_) | Focus::Wildcard => {}
        Focus::Nested(inner) => visitor.visit_expression(inner),
    }
}

pub fn walk_refinement<V: ExpressionVisitor + ?Sized>(visitor: &mut V, refinement: &Refinement) {
    match refinement {
        Refinement::Attribute(attribute) => visitor.visit_attribute(attribute),
        Refinement::Group { body, .. } => visitor.visit_refinement(body),
        Refinement::Conjunction(items) | Refinement::Disjunction(items) => {
            for item in items {
                visitor.visit_refinement(item);
            }
        }
        Refinement::Nested(inner) => visitor.visit_refinement(inner),
    }
}

pub fn walk_attribute<V: ExpressionVisitor + ?Sized>(visitor: &mut V, attribute: &Attribute) {
    visitor.visit_sub_expression(&attribute.name);
    if let AttributeValue::Expression(value) = &attribute.value {
        visitor.visit_sub_expression(value);
    }
}

// =============================================================================
// MUTABLE VISITOR
// =============================================================================

pub trait ExpressionVisitorMut {
    fn visit_expression_mut(&mut self, expr: &mut Expression) {
        walk_expression_mut(self, expr);
    }

    fn visit_sub_expression_mut(&mut self, sub: &mut SubExpression) {
        walk_sub_expression_mut(self, sub);
    }

    fn visit_refinement_mut(&mut self, refinement: &mut Refinement) {
        walk_refinement_mut(self, refinement);
    }

    fn visit_attribute_mut(&mut self, attribute: &mut Attribute) {
        walk_attribute_mut(self, attribute);
    }
}

pub fn walk_expression_mut<V: ExpressionVisitorMut + ?Sized>(visitor: &mut V, expr: &mut Expression) {
    match expr {
        Expression::Sub(sub) => visitor.visit_sub_expression_mut(sub),
        Expression::Refined { focus, refinement } => {
            visitor.visit_sub_expression_mut(focus);
            visitor.visit_refinement_mut(refinement);
        }
        Expression::Dotted { focus, attributes } => {
            visitor.visit_sub_expression_mut(focus);
            for attribute in attributes {
                visitor.visit_sub_expression_mut(attribute);
            }
        }
        Expression::Conjunction(items) | Expression::Disjunction(items) => {
            for item in items {
                visitor.visit_sub_expression_mut(item);
            }
        }
        Expression::Exclusion { include, exclude } => {
            visitor.visit_sub_expression_mut(include);
            visitor.visit_sub_expression_mut(exclude);
        }
    }
}

pub fn walk_sub_expression_mut<V: ExpressionVisitorMut + ?Sized>(
    visitor: &mut V,
    sub: &mut SubExpression,
) {
    if let Focus::Nested(inner) = &mut sub.focus {
        visitor.visit_expression_mut(inner);
    }
}

pub fn walk_refinement_mut<V: ExpressionVisitorMut + ?Sized>(
    visitor: &mut V,
    refinement: &mut Refinement,
) {
    match refinement {
        Refinement::Attribute(attribute) => visitor.visit_attribute_mut(attribute),
        Refinement::Group { body, .. } => visitor.visit_refinement_mut(body),
        Refinement::Conjunction(items) | Refinement::Disjunction(items) => {
            for item in items {
                visitor.visit_refinement_mut(item);
            }
        }
        Refinement::Nested(inner) => visitor.visit_refinement_mut(inner),
    }
}

pub fn walk_attribute_mut<V: ExpressionVisitorMut + ?Sized>(
    visitor: &mut V,
    attribute: &mut Attribute,
) {
    visitor.visit_sub_expression_mut(&mut attribute.name);
    if let AttributeValue::Expression(value) = &mut attribute.value {
        visitor.visit_sub_expression_mut(value);
    }
}

// =============================================================================
// COLLECTORS
// =============================================================================

/// All member-of terms in document order, duplicates included
pub fn member_of_references(expr: &Expression) -> Vec<ConceptReference> {
    struct Collector {
        refs: Vec<ConceptReference>,
    }

    impl ExpressionVisitor for Collector {
        fn visit_member_of(&mut self, target: &ConceptReference) {
            self.refs.push(target.clone());
        }
    }

    let mut collector = Collector { refs: Vec::new() };
    collector.visit_expression(expr);
    collector.refs
}

/// Distinct collection ids referenced through member-of terms
pub fn referenced_collections(expr: &Expression) -> BTreeSet<ConceptId> {
    member_of_references(expr)
        .into_iter()
        .map(|concept| concept.id)
        .collect()
}
