//! ECL AST - expression tree for query reference set definitions
//!
//! The tree covers the part of the Expression Constraint Language that
//! reference set definitions use:
//! - **SubExpression**: optional constraint operator, optional member-of flag,
//!   a focus (concept, wildcard or nested expression) and raw filters
//! - **Compound**: conjunction, disjunction and exclusion of sub-expressions
//! - **Refined / Dotted**: attribute refinements and dotted attribute paths
//!
//! Every node renders back to canonical ECL through `Display`, so a tree can
//! be edited in place and serialized once. `parse(tree.to_string())` yields an
//! equal tree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SNOMED CT identifier. Kept as text: ids are up to 18 digits and are only
/// ever compared and rendered, never used arithmetically.
pub type ConceptId = String;

// =============================================================================
// EXPRESSIONS
// =============================================================================

/// A complete expression constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    /// `<< 404684003`
    Sub(SubExpression),
    /// `<< 404684003 : 363698007 = << 39057004`
    Refined {
        focus: SubExpression,
        refinement: Refinement,
    },
    /// `<< 404684003 . 363698007`
    Dotted {
        focus: SubExpression,
        attributes: Vec<SubExpression>,
    },
    /// `A AND B AND C` (also written `A, B`)
    Conjunction(Vec<SubExpression>),
    /// `A OR B OR C`
    Disjunction(Vec<SubExpression>),
    /// `A MINUS B`
    Exclusion {
        include: SubExpression,
        exclude: SubExpression,
    },
}

impl Expression {
    /// `^ id` - members of a collection
    pub fn member_of(id: impl Into<ConceptId>) -> Self {
        Expression::Sub(SubExpression::member_of(id))
    }

    /// `(self) MINUS (other)`, parenthesising both sides
    pub fn minus(self, other: Expression) -> Self {
        Expression::Exclusion {
            include: SubExpression::nested(self),
            exclude: SubExpression::nested(other),
        }
    }

    /// Attach a filter to the expression, wrapping it in parentheses unless it
    /// is already a bare sub-expression.
    pub fn with_filter(self, filter: impl Into<String>) -> Self {
        let mut sub = match self {
            Expression::Sub(sub) => sub,
            other => SubExpression::nested(other),
        };
        sub.filters.push(filter.into());
        Expression::Sub(sub)
    }
}

/// A single constraint: `[operator] [^] focus {{ filter }}*`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubExpression {
    pub operator: Option<ConstraintOperator>,
    pub member_of: bool,
    pub focus: Focus,
    /// Filter bodies without the surrounding `{{ }}`
    pub filters: Vec<String>,
}

impl SubExpression {
    /// Bare concept reference
    pub fn concept(id: impl Into<ConceptId>) -> Self {
        Self {
            operator: None,
            member_of: false,
            focus: Focus::Concept(ConceptReference::new(id)),
            filters: Vec::new(),
        }
    }

    /// `^ id`
    pub fn member_of(id: impl Into<ConceptId>) -> Self {
        Self {
            member_of: true,
            ..Self::concept(id)
        }
    }

    /// `( expression )`
    pub fn nested(expression: Expression) -> Self {
        Self {
            operator: None,
            member_of: false,
            focus: Focus::Nested(Box::new(expression)),
            filters: Vec::new(),
        }
    }

    /// The collection this term is a member-of reference to, if any
    pub fn member_of_target(&self) -> Option<&ConceptReference> {
        match (&self.focus, self.member_of) {
            (Focus::Concept(concept), true) => Some(concept),
            _ => None,
        }
    }
}

/// What a sub-expression is anchored on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Focus {
    Concept(ConceptReference),
    /// `*`
    Wildcard,
    Nested(Box<Expression>),
}

/// `404684003 |Clinical finding|`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConceptReference {
    pub id: ConceptId,
    pub term: Option<String>,
}

impl ConceptReference {
    pub fn new(id: impl Into<ConceptId>) -> Self {
        Self {
            id: id.into(),
            term: None,
        }
    }
}

/// Hierarchy operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintOperator {
    DescendantOf,
    DescendantOrSelfOf,
    ChildOf,
    ChildOrSelfOf,
    AncestorOf,
    AncestorOrSelfOf,
    ParentOf,
    ParentOrSelfOf,
}

impl ConstraintOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ConstraintOperator::DescendantOf => "<",
            ConstraintOperator::DescendantOrSelfOf => "<<",
            ConstraintOperator::ChildOf => "<!",
            ConstraintOperator::ChildOrSelfOf => "<<!",
            ConstraintOperator::AncestorOf => ">",
            ConstraintOperator::AncestorOrSelfOf => ">>",
            ConstraintOperator::ParentOf => ">!",
            ConstraintOperator::ParentOrSelfOf => ">>!",
        }
    }
}

// =============================================================================
// REFINEMENTS
// =============================================================================

/// Refinement after `:`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Refinement {
    Attribute(Attribute),
    /// `[1..1] { ... }`
    Group {
        cardinality: Option<Cardinality>,
        body: Box<Refinement>,
    },
    Conjunction(Vec<Refinement>),
    Disjunction(Vec<Refinement>),
    /// `( ... )`
    Nested(Box<Refinement>),
}

/// `[card] [R] name comparison value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub cardinality: Option<Cardinality>,
    pub reverse: bool,
    pub name: SubExpression,
    pub comparison: Comparison,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Equal => "=",
            Comparison::NotEqual => "!=",
            Comparison::Less => "<",
            Comparison::LessOrEqual => "<=",
            Comparison::Greater => ">",
            Comparison::GreaterOrEqual => ">=",
        }
    }

    /// Ordering comparisons only apply to concrete numeric values
    pub fn is_ordering(&self) -> bool {
        !matches!(self, Comparison::Equal | Comparison::NotEqual)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    Expression(SubExpression),
    /// `#500`, kept verbatim
    Numeric(String),
    /// `"text"`
    Text(String),
    Boolean(bool),
}

/// `[min..max]`, `max = None` for `*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cardinality {
    pub min: u32,
    pub max: Option<u32>,
}

// =============================================================================
// RENDERING
// =============================================================================

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Sub(sub) => write!(f, "{}", sub),
            Expression::Refined { focus, refinement } => write!(f, "{} : {}", focus, refinement),
            Expression::Dotted { focus, attributes } => {
                write!(f, "{}", focus)?;
                for attribute in attributes {
                    write!(f, " . {}", attribute)?;
                }
                Ok(())
            }
            Expression::Conjunction(items) => join(f, items, " AND "),
            Expression::Disjunction(items) => join(f, items, " OR "),
            Expression::Exclusion { include, exclude } => {
                write!(f, "{} MINUS {}", include, exclude)
            }
        }
    }
}

impl fmt::Display for SubExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(op) = self.operator {
            write!(f, "{} ", op.symbol())?;
        }
        if self.member_of {
            f.write_str("^ ")?;
        }
        write!(f, "{}", self.focus)?;
        for filter in &self.filters {
            write!(f, " {{{{ {} }}}}", filter)?;
        }
        Ok(())
    }
}

impl fmt::Display for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Focus::Concept(concept) => write!(f, "{}", concept),
            Focus::Wildcard => f.write_str("*"),
            Focus::Nested(expr) => write!(f, "({})", expr),
        }
    }
}

impl fmt::Display for ConceptReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.term {
            Some(term) => write!(f, "{} |{}|", self.id, term),
            None => f.write_str(&self.id),
        }
    }
}

impl fmt::Display for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refinement::Attribute(attribute) => write!(f, "{}", attribute),
            Refinement::Group { cardinality, body } => {
                if let Some(card) = cardinality {
                    write!(f, "{} ", card)?;
                }
                write!(f, "{{ {} }}", body)
            }
            Refinement::Conjunction(items) => join(f, items, ", "),
            Refinement::Disjunction(items) => join(f, items, " OR "),
            Refinement::Nested(inner) => write!(f, "({})", inner),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(card) = self.cardinality {
            write!(f, "{} ", card)?;
        }
        if self.reverse {
            f.write_str("R ")?;
        }
        write!(f, "{} {} {}", self.name, self.comparison.symbol(), self.value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Expression(sub) => write!(f, "{}", sub),
            AttributeValue::Numeric(n) => write!(f, "#{}", n),
            AttributeValue::Text(t) => write!(f, "\"{}\"", t),
            AttributeValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}..{}]", self.min, max),
            None => write!(f, "[{}..*]", self.min),
        }
    }
}
