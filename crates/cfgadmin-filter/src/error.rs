//! Filter parse errors

/// Error raised while parsing a filter expression.
///
/// Offsets count characters from the start of the expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// Input ended inside a filter
    #[error("unexpected end of filter")]
    UnexpectedEnd,

    /// A specific character was required
    #[error("expected '{expected}' at offset {offset}, found '{found}'")]
    Expected {
        expected: char,
        found: char,
        offset: usize,
    },

    /// Item without an attribute name, e.g. `(=x)`
    #[error("missing attribute name at offset {offset}")]
    MissingAttribute { offset: usize },

    /// Attribute not followed by `=`, `~=`, `>=` or `<=`
    #[error("invalid operator at offset {offset}")]
    InvalidOperator { offset: usize },

    /// `(&)` or `(|)` without operands
    #[error("empty filter list at offset {offset}")]
    EmptyList { offset: usize },

    /// `(` inside a value must be escaped
    #[error("unescaped '(' in value at offset {offset}")]
    UnescapedParen { offset: usize },

    /// Characters left after the closing parenthesis
    #[error("trailing input at offset {offset}")]
    TrailingInput { offset: usize },
}

impl FilterError {
    /// Offset the error was detected at, if known
    #[must_use]
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::UnexpectedEnd => None,
            Self::Expected { offset, .. }
            | Self::MissingAttribute { offset }
            | Self::InvalidOperator { offset }
            | Self::EmptyList { offset }
            | Self::UnescapedParen { offset }
            | Self::TrailingInput { offset } => Some(*offset),
        }
    }
}
