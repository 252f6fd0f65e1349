use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::char;
use nom::combinator::{cut, map, opt};
use nom::multi::{many0, separated_list1};
use nom::sequence::{delimited, preceded};

use pole_types::Value;

use crate::error::{Error, ErrorKind};
use crate::value::{ident, keyword, literal, ws};
use crate::{IResult, Span};

/// Comparison operators the grammar accepts. Only `=` translates to a
/// query; the others surface `SyntaxNotSupported` during lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::NotEq => "!=",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
        }
    }
}

/// The WHERE expression tree. Parentheses are transparent: they only shape
/// the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereExpr {
    Cmp { column: String, op: CmpOp, value: Value },
    Like { column: String, pattern: Value },
    In { column: String, values: Vec<Value>, negated: bool },
    And(Box<WhereExpr>, Box<WhereExpr>),
    Or(Box<WhereExpr>, Box<WhereExpr>),
}

/// expression = or
pub(crate) fn expression(input: Span) -> IResult<WhereExpr> {
    or_expr(input)
}

/// or = and ("OR" and)*
fn or_expr(input: Span) -> IResult<WhereExpr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(keyword("OR")), cut(and_expr)))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |acc, next| WhereExpr::Or(Box::new(acc), Box::new(next)));
    Ok((input, expr))
}

/// and = primary ("AND" primary)*
fn and_expr(input: Span) -> IResult<WhereExpr> {
    let (input, first) = primary(input)?;
    let (input, rest) = many0(preceded(ws(keyword("AND")), cut(primary)))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |acc, next| WhereExpr::And(Box::new(acc), Box::new(next)));
    Ok((input, expr))
}

/// primary = "(" expression ")" | comparison
fn primary(input: Span) -> IResult<WhereExpr> {
    alt((
        delimited(
            ws(char('(')),
            cut(expression),
            cut(|inner| {
                ws(char(')'))(inner).map_err(|err: nom::Err<Error>| {
                    err.map(|_| {
                        Error::new_from_kind(input, ErrorKind::MissingClosingDelimiter(')'))
                    })
                })
            }),
        ),
        comparison,
    ))(input)
}

/// comparison = column (cmpOp literal | "LIKE" literal | ["NOT"] "IN" "(" literal ("," literal)* ")")
fn comparison(input: Span) -> IResult<WhereExpr> {
    let (input, column) = ws(ident)(input)?;

    if let Ok((rest, _)) = ws(keyword("LIKE"))(input) {
        let (rest, pattern) = cut(ws(literal))(rest)?;
        return Ok((rest, WhereExpr::Like { column, pattern }));
    }

    let (input, negated) = opt(ws(keyword("NOT")))(input)
        .map(|(rest, not)| (rest, not.is_some()))?;
    if let Ok((rest, _)) = ws(keyword("IN"))(input) {
        let (rest, values) = cut(delimited(
            ws(char('(')),
            separated_list1(ws(char(',')), ws(literal)),
            ws(char(')')),
        ))(rest)?;
        return Ok((rest, WhereExpr::In { column, values, negated }));
    }
    if negated {
        // a bare NOT only combines with IN
        return Err(nom::Err::Error(Error::new_from_kind(
            input,
            ErrorKind::ExpectedKeyword("IN"),
        )));
    }

    let (input, op) = ws(cmp_op)(input)?;
    let (input, value) = cut(ws(literal))(input)?;
    Ok((input, WhereExpr::Cmp { column, op, value }))
}

fn cmp_op(input: Span) -> IResult<CmpOp> {
    alt((
        map(tag("!="), |_| CmpOp::NotEq),
        map(tag("<>"), |_| CmpOp::NotEq),
        map(tag(">="), |_| CmpOp::Gte),
        map(tag("<="), |_| CmpOp::Lte),
        map(tag("="), |_| CmpOp::Eq),
        map(tag(">"), |_| CmpOp::Gt),
        map(tag("<"), |_| CmpOp::Lt),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> WhereExpr {
        let (rest, expr) = expression(Span::new(input)).unwrap();
        assert!(rest.fragment().is_empty(), "unparsed input: `{}`", rest.fragment());
        expr
    }

    #[test]
    fn simple_equality() {
        assert_eq!(
            parse("id = 5"),
            WhereExpr::Cmp { column: "id".into(), op: CmpOp::Eq, value: Value::Integer(5) }
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse("a=1 OR b=2 AND c=3");
        match expr {
            WhereExpr::Or(left, right) => {
                assert!(matches!(*left, WhereExpr::Cmp { .. }));
                assert!(matches!(*right, WhereExpr::And(_, _)));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn parentheses_shape_the_tree() {
        let expr = parse("name='hello' and (id=1 or name=3)");
        match expr {
            WhereExpr::And(_, right) => assert!(matches!(*right, WhereExpr::Or(_, _))),
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn like_and_in() {
        assert_eq!(
            parse("name like 'h%'"),
            WhereExpr::Like { column: "name".into(), pattern: Value::Text("h%".into()) }
        );
        assert_eq!(
            parse("id in (1, 2, 3)"),
            WhereExpr::In {
                column: "id".into(),
                values: vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)],
                negated: false,
            }
        );
        assert_eq!(
            parse("id not in (4)"),
            WhereExpr::In { column: "id".into(), values: vec![Value::Integer(4)], negated: true }
        );
    }

    #[test]
    fn unsupported_operators_still_parse() {
        assert_eq!(
            parse("age > 30"),
            WhereExpr::Cmp { column: "age".into(), op: CmpOp::Gt, value: Value::Integer(30) }
        );
    }
}
