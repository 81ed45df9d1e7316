//! ECL parser - nom combinators producing `ast` types
//!
//! ```text
//! expression   = sub [ ":" refinement | 1*("." sub) | 1*(AND sub) | 1*(OR sub) | MINUS sub ]
//! sub          = [operator] ["^"] focus *filter
//! focus        = conceptId ["|" term "|"] / "*" / "(" expression ")"
//! refinement   = item *(("," / AND) item) / item *(OR item)
//! item         = [card] "{" refinement "}" / "(" refinement ")" / attribute
//! attribute    = [card] ["R"] sub comparison value
//! ```
//!
//! Mixing AND/OR/MINUS at one level is a syntax error; parentheses are
//! required, as in ECL itself.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_till, take_until},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map, map_res, opt, peek, recognize, value, verify},
    error::{context, VerboseError},
    multi::{many0, many1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::ast::*;
use crate::error::ParseError;
use crate::visitor::ExpressionVisitor;

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

// ============================================================================
// Public API
// ============================================================================

/// Parse a complete expression constraint
pub fn parse_expression(input: &str) -> Result<Expression, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let expr = match all_consuming(delimited(multispace0, expression, multispace0))(input) {
        Ok((_, expr)) => expr,
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let position = e
                .errors
                .first()
                .map(|(rest, _)| input.len() - rest.len())
                .unwrap_or(0);
            return Err(ParseError::Syntax {
                position,
                message: nom::error::convert_error(input, e),
            });
        }
        Err(nom::Err::Incomplete(_)) => return Err(ParseError::Incomplete),
    };

    check_comparisons(&expr)?;
    Ok(expr)
}

/// Ordering comparisons (`<`, `<=`, `>`, `>=`) only take `#number` values.
fn check_comparisons(expr: &Expression) -> Result<(), ParseError> {
    struct Checker {
        error: Option<ParseError>,
    }

    impl ExpressionVisitor for Checker {
        fn visit_attribute(&mut self, attribute: &Attribute) {
            if self.error.is_none()
                && attribute.comparison.is_ordering()
                && !matches!(attribute.value, AttributeValue::Numeric(_))
            {
                self.error = Some(ParseError::NonNumericOrdering {
                    comparison: attribute.comparison.symbol().to_string(),
                    value: attribute.value.to_string(),
                });
            }
            crate::visitor::walk_attribute(self, attribute);
        }
    }

    let mut checker = Checker { error: None };
    checker.visit_expression(expr);
    match checker.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ============================================================================
// Expressions
// ============================================================================

enum Tail {
    Refinement(Refinement),
    Dotted(Vec<SubExpression>),
    Conjunction(Vec<SubExpression>),
    Disjunction(Vec<SubExpression>),
    Exclusion(SubExpression),
}

fn expression(input: &str) -> PResult<'_, Expression> {
    let (input, first) = sub_expression(input)?;
    let (input, tail) = opt(expression_tail)(input)?;

    let expr = match tail {
        None => Expression::Sub(first),
        Some(Tail::Refinement(refinement)) => Expression::Refined {
            focus: first,
            refinement,
        },
        Some(Tail::Dotted(attributes)) => Expression::Dotted {
            focus: first,
            attributes,
        },
        Some(Tail::Conjunction(rest)) => {
            let mut items = vec![first];
            items.extend(rest);
            Expression::Conjunction(items)
        }
        Some(Tail::Disjunction(rest)) => {
            let mut items = vec![first];
            items.extend(rest);
            Expression::Disjunction(items)
        }
        Some(Tail::Exclusion(exclude)) => Expression::Exclusion {
            include: first,
            exclude,
        },
    };
    Ok((input, expr))
}

fn expression_tail(input: &str) -> PResult<'_, Tail> {
    alt((
        map(
            preceded(delimited(multispace0, char(':'), multispace0), refinement),
            Tail::Refinement,
        ),
        map(
            many1(preceded(
                delimited(multispace0, char('.'), multispace0),
                sub_expression,
            )),
            Tail::Dotted,
        ),
        map(many1(preceded(conjunction, sub_expression)), Tail::Conjunction),
        map(
            many1(preceded(keyword("OR"), sub_expression)),
            Tail::Disjunction,
        ),
        map(preceded(keyword("MINUS"), sub_expression), Tail::Exclusion),
    ))(input)
}

/// Case-insensitive keyword, which must be followed by whitespace or `(`
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, ()> {
    move |input: &'a str| {
        let (input, _) = multispace0(input)?;
        let (input, _) = tag_no_case(word)(input)?;
        let (input, _) = peek(alt((multispace1, tag("("))))(input)?;
        let (input, _) = multispace0(input)?;
        Ok((input, ()))
    }
}

fn conjunction(input: &str) -> PResult<'_, ()> {
    alt((
        keyword("AND"),
        value((), delimited(multispace0, char(','), multispace0)),
    ))(input)
}

// ============================================================================
// Sub-expressions
// ============================================================================

fn sub_expression(input: &str) -> PResult<'_, SubExpression> {
    let (input, operator) = opt(terminated(constraint_operator, multispace0))(input)?;
    let (input, member_of) = opt(terminated(char('^'), multispace0))(input)?;
    let (input, focus) = context("concept reference", focus)(input)?;
    let (input, filters) = many0(preceded(multispace0, filter))(input)?;

    Ok((
        input,
        SubExpression {
            operator,
            member_of: member_of.is_some(),
            focus,
            filters,
        },
    ))
}

fn constraint_operator(input: &str) -> PResult<'_, ConstraintOperator> {
    alt((
        value(ConstraintOperator::ChildOrSelfOf, tag("<<!")),
        value(ConstraintOperator::DescendantOrSelfOf, tag("<<")),
        value(ConstraintOperator::ChildOf, tag("<!")),
        value(ConstraintOperator::DescendantOf, tag("<")),
        value(ConstraintOperator::ParentOrSelfOf, tag(">>!")),
        value(ConstraintOperator::AncestorOrSelfOf, tag(">>")),
        value(ConstraintOperator::ParentOf, tag(">!")),
        value(ConstraintOperator::AncestorOf, tag(">")),
    ))(input)
}

fn focus(input: &str) -> PResult<'_, Focus> {
    alt((
        map(concept_reference, Focus::Concept),
        value(Focus::Wildcard, char('*')),
        map(nested_expression, |e| Focus::Nested(Box::new(e))),
    ))(input)
}

fn nested_expression(input: &str) -> PResult<'_, Expression> {
    delimited(
        char('('),
        delimited(multispace0, expression, multispace0),
        context("closing parenthesis", char(')')),
    )(input)
}

fn concept_reference(input: &str) -> PResult<'_, ConceptReference> {
    let (input, id) = concept_id(input)?;
    let (input, term) = opt(preceded(multispace0, term))(input)?;
    Ok((
        input,
        ConceptReference {
            id: id.to_string(),
            term,
        },
    ))
}

/// SCTIDs are 6 to 18 digits
fn concept_id(input: &str) -> PResult<'_, &str> {
    context(
        "concept id",
        verify(digit1, |d: &str| (6..=18).contains(&d.len())),
    )(input)
}

fn term(input: &str) -> PResult<'_, String> {
    map(
        delimited(char('|'), take_till(|c: char| c == '|'), char('|')),
        |t: &str| t.trim().to_string(),
    )(input)
}

fn filter(input: &str) -> PResult<'_, String> {
    map(
        delimited(tag("{{"), take_until("}}"), tag("}}")),
        |f: &str| f.trim().to_string(),
    )(input)
}

// ============================================================================
// Refinements
// ============================================================================

enum RefinementTail {
    Conjunction(Vec<Refinement>),
    Disjunction(Vec<Refinement>),
}

fn refinement(input: &str) -> PResult<'_, Refinement> {
    let (input, first) = refinement_item(input)?;
    let (input, tail) = opt(alt((
        map(
            many1(preceded(conjunction, refinement_item)),
            RefinementTail::Conjunction,
        ),
        map(
            many1(preceded(keyword("OR"), refinement_item)),
            RefinementTail::Disjunction,
        ),
    )))(input)?;

    let refinement = match tail {
        None => first,
        Some(RefinementTail::Conjunction(rest)) => {
            let mut items = vec![first];
            items.extend(rest);
            Refinement::Conjunction(items)
        }
        Some(RefinementTail::Disjunction(rest)) => {
            let mut items = vec![first];
            items.extend(rest);
            Refinement::Disjunction(items)
        }
    };
    Ok((input, refinement))
}

fn refinement_item(input: &str) -> PResult<'_, Refinement> {
    alt((
        attribute_group,
        map(
            delimited(
                terminated(char('('), multispace0),
                refinement,
                preceded(multispace0, char(')')),
            ),
            |r| Refinement::Nested(Box::new(r)),
        ),
        map(attribute, Refinement::Attribute),
    ))(input)
}

fn attribute_group(input: &str) -> PResult<'_, Refinement> {
    let (input, cardinality) = opt(terminated(cardinality, multispace0))(input)?;
    let (input, _) = char('{')(input)?;
    let (input, body) = delimited(multispace0, refinement, multispace0)(input)?;
    let (input, _) = context("closing brace", char('}'))(input)?;
    Ok((
        input,
        Refinement::Group {
            cardinality,
            body: Box::new(body),
        },
    ))
}

fn attribute(input: &str) -> PResult<'_, Attribute> {
    let (input, cardinality) = opt(terminated(cardinality, multispace0))(input)?;
    let (input, reverse) = opt(terminated(char('R'), multispace0))(input)?;
    let (input, name) = context("attribute name", sub_expression)(input)?;
    let (input, comparison) = preceded(multispace0, comparison)(input)?;
    let (input, value) = preceded(multispace0, attribute_value)(input)?;

    Ok((
        input,
        Attribute {
            cardinality,
            reverse: reverse.is_some(),
            name,
            comparison,
            value,
        },
    ))
}

fn comparison(input: &str) -> PResult<'_, Comparison> {
    context(
        "comparison operator",
        alt((
            value(Comparison::NotEqual, tag("!=")),
            value(Comparison::LessOrEqual, tag("<=")),
            value(Comparison::GreaterOrEqual, tag(">=")),
            value(Comparison::Equal, tag("=")),
            value(Comparison::Less, tag("<")),
            value(Comparison::Greater, tag(">")),
        )),
    )(input)
}

fn attribute_value(input: &str) -> PResult<'_, AttributeValue> {
    alt((
        map(preceded(char('#'), numeric), |n: &str| {
            AttributeValue::Numeric(n.to_string())
        }),
        map(
            delimited(char('"'), take_till(|c: char| c == '"'), char('"')),
            |t: &str| AttributeValue::Text(t.to_string()),
        ),
        value(AttributeValue::Boolean(true), tag_no_case("true")),
        value(AttributeValue::Boolean(false), tag_no_case("false")),
        map(sub_expression, AttributeValue::Expression),
    ))(input)
}

fn numeric(input: &str) -> PResult<'_, &str> {
    recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)
}

fn cardinality(input: &str) -> PResult<'_, Cardinality> {
    let (input, _) = char('[')(input)?;
    let (input, min) = map_res(digit1, |d: &str| d.parse::<u32>())(input)?;
    let (input, _) = tag("..")(input)?;
    let (input, max) = alt((
        value(None, char('*')),
        map(map_res(digit1, |d: &str| d.parse::<u32>()), Some),
    ))(input)?;
    let (input, _) = char(']')(input)?;
    Ok((input, Cardinality { min, max }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn roundtrip(input: &str) -> Expression {
        let parsed = parse_expression(input).unwrap();
        let rendered = parsed.to_string();
        assert_eq!(parse_expression(&rendered).unwrap(), parsed, "{}", rendered);
        parsed
    }

    #[test]
    fn test_simple_concept_with_term() {
        let expr = roundtrip("<< 404684003 |Clinical finding|");
        assert_eq!(
            expr,
            Expression::Sub(SubExpression {
                operator: Some(ConstraintOperator::DescendantOrSelfOf),
                member_of: false,
                focus: Focus::Concept(ConceptReference {
                    id: "404684003".into(),
                    term: Some("Clinical finding".into()),
                }),
                filters: vec![],
            })
        );
        assert_eq!(expr.to_string(), "<< 404684003 |Clinical finding|");
    }

    #[test]
    fn test_member_of_without_space() {
        let expr = roundtrip("^929360061000036106");
        let Expression::Sub(sub) = expr else {
            panic!("Expected Sub");
        };
        assert!(sub.member_of);
        assert_eq!(
            sub.member_of_target().map(|c| c.id.as_str()),
            Some("929360061000036106")
        );
    }

    #[test]
    fn test_disjunction_of_member_of() {
        let expr = roundtrip("(^ 1111111000036100) OR (^ 2222221000036107 |Some list|)");
        let Expression::Disjunction(items) = expr else {
            panic!("Expected Disjunction");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_comma_is_conjunction() {
        let a = parse_expression("< 111111111, < 222222222").unwrap();
        let b = parse_expression("< 111111111 and < 222222222").unwrap();
        assert_eq!(a, b);
        assert!(matches!(a, Expression::Conjunction(ref items) if items.len() == 2));
    }

    #[test]
    fn test_exclusion() {
        let expr = roundtrip("<< 111111111 MINUS << 222222222");
        assert!(matches!(expr, Expression::Exclusion { .. }));
    }

    #[test]
    fn test_mixed_operators_rejected() {
        let err = parse_expression("< 111111111 AND < 222222222 OR < 333333333").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_keyword_needs_boundary() {
        // "ORX" is not the OR keyword
        assert!(parse_expression("< 111111111 ORX 222222222").is_err());
    }

    #[test]
    fn test_refinement_with_group_and_cardinality() {
        let expr = roundtrip(
            "< 763158003 |Medicinal product| : [1..*] { 762949000 |Has precise active ingredient| = << 387517004, 1142135004 |Has presentation strength numerator value| = #500 }",
        );
        let Expression::Refined { refinement, .. } = expr else {
            panic!("Expected Refined");
        };
        let Refinement::Group { cardinality, body } = refinement else {
            panic!("Expected Group");
        };
        assert_eq!(cardinality, Some(Cardinality { min: 1, max: None }));
        assert!(matches!(*body, Refinement::Conjunction(ref items) if items.len() == 2));
    }

    #[test]
    fn test_refinement_value_member_of() {
        let expr = roundtrip("< 373873005 : 127489000 = (^ 929360021000036102)");
        let Expression::Refined { refinement, .. } = expr else {
            panic!("Expected Refined");
        };
        let Refinement::Attribute(attribute) = refinement else {
            panic!("Expected Attribute");
        };
        assert_eq!(attribute.comparison, Comparison::Equal);
    }

    #[test]
    fn test_reverse_attribute_and_text_value() {
        roundtrip("< 111111111 : R 222222222 = *");
        roundtrip("< 111111111 : 333333333 = \"oral\"");
        roundtrip("< 111111111 : 333333333 = true");
    }

    #[test]
    fn test_dotted_attributes() {
        let expr = roundtrip("< 111111111 . 222222222 . 333333333");
        let Expression::Dotted { attributes, .. } = expr else {
            panic!("Expected Dotted");
        };
        assert_eq!(attributes.len(), 2);
    }

    #[test]
    fn test_filters_preserved() {
        let expr = roundtrip("^ 32570071000036102 {{ C active = 0 }}");
        let Expression::Sub(sub) = expr else {
            panic!("Expected Sub");
        };
        assert_eq!(sub.filters, vec!["C active = 0".to_string()]);
    }

    #[test]
    fn test_nested_parentheses() {
        roundtrip("((<< 111111111 OR << 222222222) MINUS (^ 333333333))");
    }

    #[test]
    fn test_ordering_comparison_requires_number() {
        let err = parse_expression("< 111111111 : 222222222 < << 333333333").unwrap_err();
        assert!(matches!(err, ParseError::NonNumericOrdering { .. }));
        assert!(parse_expression("< 111111111 : 222222222 >= #10").is_ok());
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(parse_expression("   ").unwrap_err(), ParseError::Empty);
        assert!(parse_expression("<< 12345").is_err()); // too short for an SCTID
        assert!(parse_expression("(<< 111111111").is_err());
        assert!(parse_expression("<< 111111111 |unterminated").is_err());
    }
}
