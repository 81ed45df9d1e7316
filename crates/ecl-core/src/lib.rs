//! ecl-core: ECL parser, AST and tree walkers for query reference sets
//!
//! This crate holds the pure expression logic with NO network dependencies:
//! - AST types (Expression, SubExpression, Refinement, etc.) with canonical rendering
//! - Nom-based expression constraint parser
//! - Read-only and mutable visitors, plus member-of reference collectors
//!
//! Resolution, diffing and everything that talks to a terminology server
//! lives in the `ecl-refset` crate.

pub mod ast;
pub mod error;
pub mod parser;
pub mod visitor;

// Re-export commonly used types
pub use ast::{
    Attribute, AttributeValue, Cardinality, Comparison, ConceptId, ConceptReference,
    ConstraintOperator, Expression, Focus, Refinement, SubExpression,
};
pub use error::ParseError;
pub use parser::parse_expression;
pub use visitor::{
    member_of_references, referenced_collections, ExpressionVisitor, ExpressionVisitorMut,
};

/// Parsing seam used by the resolver, so callers can swap in a different
/// front end (or a counting wrapper in tests).
pub trait ExpressionParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Expression, ParseError>;
}

/// The nom parser in this crate
#[derive(Debug, Clone, Copy, Default)]
pub struct EclParser;

impl ExpressionParser for EclParser {
    fn parse(&self, text: &str) -> Result<Expression, ParseError> {
        parse_expression(text)
    }
}
