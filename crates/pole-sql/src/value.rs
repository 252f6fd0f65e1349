use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_while, take_while1};
use nom::character::complete::{char, digit1, multispace0};
use nom::combinator::{opt, recognize};
use nom::sequence::{delimited, pair, tuple};

use pole_types::Value;

use crate::error::{Error, ErrorKind};
use crate::{IResult, Span};

/// remove OPTIONAL whitespaces before AND after the provided parser.
pub(crate) fn ws<'a, O>(
    inner: impl FnMut(Span<'a>) -> IResult<'a, O>,
) -> impl FnMut(Span<'a>) -> IResult<'a, O> {
    delimited(multispace0, inner, multispace0)
}

/// Case-insensitive keyword with a word boundary behind it, so `ORDER`
/// does not match the prefix of an `orders` column.
pub(crate) fn keyword<'a>(kw: &'static str) -> impl FnMut(Span<'a>) -> IResult<'a, Span<'a>> {
    move |input: Span<'a>| {
        let (rest, matched) = tag_no_case(kw)(input).map_err(|err: nom::Err<Error<'a>>| {
            err.map(|_| Error::new_from_kind(input, ErrorKind::ExpectedKeyword(kw)))
        })?;
        let boundary_broken = rest
            .fragment()
            .chars()
            .next()
            .map_or(false, |c| c.is_alphanumeric() || c == '_');
        if boundary_broken {
            return Err(nom::Err::Error(Error::new_from_kind(
                input,
                ErrorKind::ExpectedKeyword(kw),
            )));
        }
        Ok((rest, matched))
    }
}

/// word = (alphanumeric | _)+ , optionally backtick-quoted
pub(crate) fn ident(input: Span) -> IResult<String> {
    let bare = take_while1(|c: char| c.is_alphanumeric() || c == '_');
    let quoted = delimited(char('`'), take_while1(|c: char| c != '`'), char('`'));
    alt((quoted, bare))(input)
        .map(|(rest, span)| (rest, span.fragment().to_string()))
        .map_err(|err: nom::Err<Error>| {
            err.map(|_| Error::new_from_kind(input, ErrorKind::ExpectedIdent))
        })
}

/// literal = number | singleQuoted | doubleQuoted
pub(crate) fn literal(input: Span) -> IResult<Value> {
    alt((quoted('\''), quoted('"'), number))(input).map_err(|err: nom::Err<Error>| {
        err.map(|_| Error::new_from_kind(input, ErrorKind::ExpectedValue))
    })
}

fn quoted<'a>(quote: char) -> impl FnMut(Span<'a>) -> IResult<'a, Value> {
    move |input: Span<'a>| {
        let (rest, content) =
            delimited(char(quote), take_while(|c: char| c != quote), char(quote))(input)?;
        Ok((rest, Value::Text(content.fragment().to_string())))
    }
}

fn number(input: Span) -> IResult<Value> {
    let (rest, matched) =
        recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1)))))(input)?;
    let text = matched.fragment();
    let value = if text.contains('.') {
        Value::Float(text.parse().unwrap_or(0.0))
    } else {
        match text.parse::<i64>() {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::Float(text.parse().unwrap_or(0.0)),
        }
    };
    Ok((rest, value))
}

/// A non-negative integer, for LIMIT/OFFSET counts.
pub(crate) fn unsigned(input: Span) -> IResult<usize> {
    let (rest, digits) = digit1(input)?;
    let parsed = digits.fragment().parse().map_err(|_| {
        nom::Err::Error(Error::new_from_kind(input, ErrorKind::ExpectedValue))
    })?;
    Ok((rest, parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_literal(input: &str) -> Value {
        let (_, value) = literal(Span::new(input)).unwrap();
        value
    }

    #[test]
    fn literal_kinds() {
        assert_eq!(parse_literal("1"), Value::Integer(1));
        assert_eq!(parse_literal("-3"), Value::Integer(-3));
        assert_eq!(parse_literal("42.5"), Value::Float(42.5));
        assert_eq!(parse_literal("'hello'"), Value::Text("hello".into()));
        assert_eq!(parse_literal("\"hi\""), Value::Text("hi".into()));
    }

    #[test]
    fn keywords_respect_word_boundaries() {
        assert!(keyword("ORDER")(Span::new("ORDER BY")).is_ok());
        assert!(keyword("ORDER")(Span::new("orders")).is_err());
        assert!(keyword("not")(Span::new("NOT NULL")).is_ok());
    }

    #[test]
    fn idents_allow_backticks() {
        let (_, name) = ident(Span::new("`weird name`")).unwrap();
        assert_eq!(name, "weird name");
        let (_, name) = ident(Span::new("plain_1 rest")).unwrap();
        assert_eq!(name, "plain_1");
    }
}
