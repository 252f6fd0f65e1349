//! Lowering of a WHERE tree into an index query.
//!
//! The tree is flattened in reverse-Polish order, then folded over a
//! tagged working stack whose slots hold either a raw operand (column,
//! literal, literal list) or an already-built query. Popping an operator
//! folds it with the two most recent slots; one query remains at the end.

use pole_index::Query;
use pole_types::{FieldType, Mapping, Value, IDENTIFIER_FIELD, ID_COLUMN};

use crate::condition::{CmpOp, WhereExpr};
use crate::error::SqlError;

enum RpnNode<'a> {
    Column(&'a str),
    Value(&'a Value),
    Values(&'a [Value]),
    Operator(Op<'a>),
}

enum Op<'a> {
    Cmp(&'a CmpOp),
    Like,
    In { negated: bool },
    And,
    Or,
}

/// A slot of the working stack: a raw operand or a built query.
enum StackEntry<'a> {
    Column(&'a str),
    Value(&'a Value),
    Values(&'a [Value]),
    Query(Query),
}

pub(crate) fn build_query(expr: &WhereExpr, mapping: &Mapping) -> Result<Query, SqlError> {
    let mut nodes = Vec::new();
    flatten(expr, &mut nodes);

    let mut stack: Vec<StackEntry> = Vec::new();
    for node in nodes {
        match node {
            RpnNode::Column(column) => stack.push(StackEntry::Column(column)),
            RpnNode::Value(value) => stack.push(StackEntry::Value(value)),
            RpnNode::Values(values) => stack.push(StackEntry::Values(values)),
            RpnNode::Operator(op) => {
                let right = stack.pop().ok_or_else(malformed)?;
                let left = stack.pop().ok_or_else(malformed)?;
                stack.push(StackEntry::Query(fold(op, left, right, mapping)?));
            }
        }
    }

    let top = stack.pop();
    match top {
        Some(StackEntry::Query(query)) if stack.is_empty() => Ok(query),
        _ => Err(malformed()),
    }
}

fn malformed() -> SqlError {
    SqlError::SyntaxNotSupported("malformed where clause".to_string())
}

fn flatten<'a>(expr: &'a WhereExpr, out: &mut Vec<RpnNode<'a>>) {
    match expr {
        WhereExpr::Cmp { column, op, value } => {
            out.push(RpnNode::Column(column));
            out.push(RpnNode::Value(value));
            out.push(RpnNode::Operator(Op::Cmp(op)));
        }
        WhereExpr::Like { column, pattern } => {
            out.push(RpnNode::Column(column));
            out.push(RpnNode::Value(pattern));
            out.push(RpnNode::Operator(Op::Like));
        }
        WhereExpr::In { column, values, negated } => {
            out.push(RpnNode::Column(column));
            out.push(RpnNode::Values(values));
            out.push(RpnNode::Operator(Op::In { negated: *negated }));
        }
        WhereExpr::And(left, right) => {
            flatten(left, out);
            flatten(right, out);
            out.push(RpnNode::Operator(Op::And));
        }
        WhereExpr::Or(left, right) => {
            flatten(left, out);
            flatten(right, out);
            out.push(RpnNode::Operator(Op::Or));
        }
    }
}

fn fold(
    op: Op<'_>,
    left: StackEntry<'_>,
    right: StackEntry<'_>,
    mapping: &Mapping,
) -> Result<Query, SqlError> {
    match op {
        Op::Cmp(CmpOp::Eq) => {
            let column = as_column(left, "=")?;
            let value = as_value(right, "=")?;
            Ok(eq_query(column, value, mapping))
        }
        Op::Cmp(other) => {
            Err(SqlError::SyntaxNotSupported(format!("operator `{}`", other.symbol())))
        }
        Op::Like => {
            let column = as_column(left, "like")?;
            let pattern = as_value(right, "like")?;
            Ok(Query::Wildcard {
                field: field_name(column),
                pattern: pattern.to_string().replace('%', "*"),
            })
        }
        Op::In { negated } => {
            let column = as_column(left, "in")?;
            let values = match right {
                StackEntry::Values(values) => values,
                _ => return Err(SqlError::RightMustBeValue("in")),
            };
            let queries: Vec<Query> =
                values.iter().map(|value| eq_query(column, value, mapping)).collect();
            if negated {
                Ok(Query::must_not(queries))
            } else {
                Ok(Query::should(queries))
            }
        }
        Op::And => {
            let (left, right) = both_queries(left, right, "and")?;
            Ok(Query::must(vec![left, right]))
        }
        Op::Or => {
            let (left, right) = both_queries(left, right, "or")?;
            Ok(Query::should(vec![left, right]))
        }
    }
}

/// The equality rewrite: identifiers become exact term matches, numeric
/// fields a one-point inclusive range, everything else (text or unmapped)
/// an analyzed match.
fn eq_query(column: &str, value: &Value, mapping: &Mapping) -> Query {
    if column == ID_COLUMN {
        return Query::Term { field: IDENTIFIER_FIELD.to_string(), term: value.to_string() };
    }
    match mapping.field_type(column) {
        Some(FieldType::Numeric) => {
            let point = value.as_f64();
            Query::Range { field: column.to_string(), min: point, max: point }
        }
        _ => Query::Match { field: column.to_string(), text: value.to_string() },
    }
}

fn field_name(column: &str) -> String {
    if column == ID_COLUMN {
        IDENTIFIER_FIELD.to_string()
    } else {
        column.to_string()
    }
}

fn as_column<'a>(entry: StackEntry<'a>, op: &'static str) -> Result<&'a str, SqlError> {
    match entry {
        StackEntry::Column(column) => Ok(column),
        _ => Err(SqlError::LeftMustBeColumn(op)),
    }
}

fn as_value<'a>(entry: StackEntry<'a>, op: &'static str) -> Result<&'a Value, SqlError> {
    match entry {
        StackEntry::Value(value) => Ok(value),
        _ => Err(SqlError::RightMustBeValue(op)),
    }
}

fn both_queries(
    left: StackEntry<'_>,
    right: StackEntry<'_>,
    op: &'static str,
) -> Result<(Query, Query), SqlError> {
    match (left, right) {
        (StackEntry::Query(left), StackEntry::Query(right)) => Ok((left, right)),
        _ => Err(SqlError::OperandMustBeQuery(op)),
    }
}

#[cfg(test)]
mod tests {
    use pole_types::FieldEntry;

    use super::*;

    fn mapping() -> Mapping {
        let mut mapping = Mapping::default();
        mapping.properties.insert("name".into(), FieldEntry::new(FieldType::Text));
        mapping.properties.insert("age".into(), FieldEntry::new(FieldType::Numeric));
        mapping
    }

    fn lower(input: &str) -> Result<Query, SqlError> {
        let (_, expr) = crate::condition::expression(crate::Span::new(input)).unwrap();
        build_query(&expr, &mapping())
    }

    #[test]
    fn identifier_equality_is_a_term_match() {
        assert_eq!(
            lower("id = 5").unwrap(),
            Query::Term { field: "_id".into(), term: "5".into() }
        );
    }

    #[test]
    fn numeric_equality_is_a_point_range() {
        assert_eq!(
            lower("age = 30").unwrap(),
            Query::Range { field: "age".into(), min: 30.0, max: 30.0 }
        );
    }

    #[test]
    fn text_and_unmapped_equality_fall_back_to_match() {
        assert_eq!(
            lower("name = 'hello'").unwrap(),
            Query::Match { field: "name".into(), text: "hello".into() }
        );
        assert_eq!(
            lower("nickname = 'x'").unwrap(),
            Query::Match { field: "nickname".into(), text: "x".into() }
        );
    }

    #[test]
    fn like_becomes_a_wildcard() {
        assert_eq!(
            lower("name like 'a%'").unwrap(),
            Query::Wildcard { field: "name".into(), pattern: "a*".into() }
        );
    }

    #[test]
    fn in_lists_expand_to_boolean_queries() {
        assert_eq!(
            lower("id in (1, 2)").unwrap(),
            Query::should(vec![
                Query::Term { field: "_id".into(), term: "1".into() },
                Query::Term { field: "_id".into(), term: "2".into() },
            ])
        );
        assert_eq!(
            lower("age not in (30)").unwrap(),
            Query::must_not(vec![Query::Range { field: "age".into(), min: 30.0, max: 30.0 }])
        );
    }

    #[test]
    fn conjunctions_and_disjunctions() {
        assert_eq!(
            lower("name='hello' and age=30").unwrap(),
            Query::must(vec![
                Query::Match { field: "name".into(), text: "hello".into() },
                Query::Range { field: "age".into(), min: 30.0, max: 30.0 },
            ])
        );
        let nested = lower("name='hello' and (id=1 or name='x')").unwrap();
        assert_eq!(
            nested,
            Query::must(vec![
                Query::Match { field: "name".into(), text: "hello".into() },
                Query::should(vec![
                    Query::Term { field: "_id".into(), term: "1".into() },
                    Query::Match { field: "name".into(), text: "x".into() },
                ]),
            ])
        );
    }

    #[test]
    fn unsupported_operators_are_rejected_at_lowering() {
        assert_eq!(
            lower("age > 30").unwrap_err(),
            SqlError::SyntaxNotSupported("operator `>`".to_string())
        );
    }
}
