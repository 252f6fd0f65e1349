use std::fmt;

use crate::Span;

/// Parser-internal error carrying the input position it fired at.
#[derive(Debug)]
pub struct Error<'a> {
    context: Span<'a>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    ExpectedKeyword(&'static str),
    ExpectedIdent,
    ExpectedValue,
    ExpectedStatement,
    MissingClosingDelimiter(char),
    Nom(nom::error::ErrorKind),
}

impl<'a> Error<'a> {
    pub fn new_from_kind(context: Span<'a>, kind: ErrorKind) -> Self {
        Self { context, kind }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

/// Map only the recoverable variant of a nom error, leaving `Failure`
/// (errors behind a `cut`) untouched.
pub(crate) trait NomErrorExt<E> {
    fn map_err<O: FnOnce(E) -> E>(self, op: O) -> nom::Err<E>;
}

impl<E> NomErrorExt<E> for nom::Err<E> {
    fn map_err<O: FnOnce(E) -> E>(self, op: O) -> nom::Err<E> {
        match self {
            nom::Err::Incomplete(n) => nom::Err::Incomplete(n),
            nom::Err::Error(e) => nom::Err::Error(op(e)),
            nom::Err::Failure(e) => nom::Err::Failure(e),
        }
    }
}

impl<'a> nom::error::ParseError<Span<'a>> for Error<'a> {
    fn from_error_kind(input: Span<'a>, kind: nom::error::ErrorKind) -> Self {
        Self::new_from_kind(input, ErrorKind::Nom(kind))
    }

    fn append(_input: Span<'a>, _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> fmt::Display for Error<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::ExpectedKeyword(kw) => write!(f, "expected `{kw}`")?,
            ErrorKind::ExpectedIdent => write!(f, "expected an identifier")?,
            ErrorKind::ExpectedValue => write!(f, "expected a literal value")?,
            ErrorKind::ExpectedStatement => write!(f, "expected a statement")?,
            ErrorKind::MissingClosingDelimiter(c) => write!(f, "missing closing `{c}`")?,
            ErrorKind::Nom(_) => write!(f, "unexpected input")?,
        }
        let fragment = self.context.fragment();
        let excerpt: String = fragment.chars().take(24).collect();
        if excerpt.is_empty() {
            write!(f, " at the end of the statement")
        } else {
            write!(
                f,
                " at line {}, column {}, near `{excerpt}`",
                self.context.location_line(),
                self.context.get_utf8_column()
            )
        }
    }
}

/// The compiler's public error surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SqlError {
    #[error("invalid syntax: {0}")]
    InvalidSyntax(String),
    #[error("syntax not supported: {0}")]
    SyntaxNotSupported(String),
    #[error("update operation's condition must be pattern 'id=<literal>'")]
    InvalidUpdateCondition,
    #[error("insert rows must provide an `id` value")]
    MissingIdentifier,
    #[error("left side of `{0}` must be a column")]
    LeftMustBeColumn(&'static str),
    #[error("right side of `{0}` must be a literal")]
    RightMustBeValue(&'static str),
    #[error("operands of `{0}` must be sub-queries")]
    OperandMustBeQuery(&'static str),
    #[error("not {0} statement")]
    ActionMismatch(&'static str),
}

impl<'a> From<Error<'a>> for SqlError {
    fn from(err: Error<'a>) -> Self {
        SqlError::InvalidSyntax(err.to_string())
    }
}
