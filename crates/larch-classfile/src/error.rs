use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors raised while decoding descriptor strings.
///
/// A malformed descriptor is fatal to the operation that triggered the
/// decode; there is no retry since the input is deterministic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("method descriptor has no closing parenthesis: {0}")]
    UnterminatedParameters(String),
    #[error("method descriptor declares no return type: {0}")]
    MissingReturnType(String),
    #[error("unexpected character {ch:?} at offset {at} in descriptor {desc:?}")]
    UnexpectedChar { ch: char, at: usize, desc: String },
    #[error("descriptor cursor is exhausted: {0}")]
    Exhausted(String),
}
