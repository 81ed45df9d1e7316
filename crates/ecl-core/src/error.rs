use thiserror::Error;

/// Errors from the nom-based ECL parser
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Empty expression")]
    Empty,

    #[error("Incomplete input: expected more content")]
    Incomplete,

    #[error("Ordering comparison '{comparison}' requires a numeric value, found '{value}'")]
    NonNumericOrdering { comparison: String, value: String },
}
