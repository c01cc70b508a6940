//! Security error types.

use thiserror::Error;

/// Failure of a shell grammar parser capability.
///
/// Validators turn every variant into a `parse_error` denial; none of them
/// escapes the public validation surface.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("failed to load the {0} grammar")]
    Grammar(&'static str),

    #[error("parser produced no syntax tree")]
    NoTree,

    #[error("syntax error at byte {offset} near `{snippet}`")]
    Syntax { offset: usize, snippet: String },

    #[error("PowerShell parser is unavailable on this host")]
    Unavailable,

    #[error("parser failed: {0}")]
    Failed(String),
}

impl ParseError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}
