//! BNF grammar:
//!
//! ```text
//! statement    = WS* stmt WS* ";"? WS* EOF
//! stmt         = create | drop | insert | update | delete | select
//! create       = "CREATE" "TABLE" ident "(" columnDef ("," columnDef)* ")"
//! columnDef    = ident typeName ["(" int ("," int)* ")"] ["UNSIGNED"] [["NOT"] "NULL"]
//! drop         = "DROP" "TABLE" ident
//! insert       = "INSERT" "INTO" ident (insertValues | insertSet)
//! insertValues = "(" ident ("," ident)* ")" "VALUES" tuple ("," tuple)*
//! insertSet    = "SET" assignment ("," assignment)*
//! update       = "UPDATE" ident "SET" assignment ("," assignment)* ["WHERE" expression]
//! delete       = "DELETE" "FROM" ident ["WHERE" expression]
//! select       = "SELECT" ("*" | ident ("," ident)*) "FROM" ident ["WHERE" expression]
//!                ["GROUP" "BY" ident ("," ident)*]
//!                ["ORDER" "BY" orderItem ("," orderItem)*]
//!                ["LIMIT" int ("," int)? | "LIMIT" int "OFFSET" int]
//! tuple        = "(" literal ("," literal)* ")"
//! assignment   = ident "=" literal
//! orderItem    = ident ["ASC" | "DESC"]
//! expression   = or ; or = and ("OR" and)* ; and = primary ("AND" primary)*
//! primary      = "(" expression ")" | comparison
//! comparison   = ident (cmpOp literal | "LIKE" literal | ["NOT"] "IN" "(" literal ("," literal)* ")")
//! cmpOp        = "=" | "!=" | "<>" | ">" | ">=" | "<" | "<="
//! literal      = number | singleQuoted | doubleQuoted
//! ident        = (alphanumeric | _)+ | "`" .* "`"
//! ```
//!
//! `GROUP BY` is accepted and ignored. The statement grammar is the MySQL
//! subset the engine executes; everything it cannot express fails at parse
//! time with `InvalidSyntax`, while recognized-but-untranslatable shapes
//! (`>`, `!=`, …) fail during lowering with `SyntaxNotSupported`.

mod condition;
mod error;
mod plan;
mod value;
mod where_visitor;

use nom::branch::alt;
use nom::character::complete::{char, multispace0, multispace1};
use nom::combinator::{cut, eof, map, opt};
use nom::multi::separated_list1;
use nom::sequence::{delimited, preceded, tuple};
use nom::Finish;
use nom_locate::LocatedSpan;

pub use condition::{CmpOp, WhereExpr};
use error::NomErrorExt;
pub use error::{Error, ErrorKind, SqlError};
pub use plan::{Action, Col, SqlPlan};

use pole_types::{FieldType, Value, IDENTIFIER_FIELD, ID_COLUMN};
use value::{ident, keyword, literal, unsigned, ws};

pub type Span<'a> = LocatedSpan<&'a str>;

type IResult<'a, Ret> = nom::IResult<Span<'a>, Ret, Error<'a>>;

/// Parse one SQL statement into its typed plan.
pub fn parse(sql: &str) -> Result<SqlPlan, SqlError> {
    let span = Span::new(sql);
    match parse_statement(span).finish() {
        Ok((_, plan)) => Ok(plan),
        Err(err) => Err(err.into()),
    }
}

fn parse_statement(input: Span) -> IResult<SqlPlan> {
    let (input, _) = multispace0(input)?;
    let (input, plan) = alt((
        parse_create,
        parse_drop,
        parse_insert,
        parse_update,
        parse_delete,
        parse_select,
    ))(input)
    .map_err(|err: nom::Err<Error>| {
        err.map_err(|_| Error::new_from_kind(input, ErrorKind::ExpectedStatement))
    })?;
    let (input, _) = multispace0(input)?;
    let (input, _) = opt(char(';'))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = eof(input)?;
    Ok((input, plan))
}

/// create = "CREATE" "TABLE" ident "(" columnDef ("," columnDef)* ")"
fn parse_create(input: Span) -> IResult<SqlPlan> {
    let (input, _) = tuple((keyword("CREATE"), multispace1, keyword("TABLE")))(input)?;
    let (input, table) = cut(ws(ident))(input)?;
    let (input, cols) = cut(delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), column_def),
        ws(char(')')),
    ))(input)?;

    let mut plan = SqlPlan::new(Action::Create, table);
    plan.cols = cols;
    Ok((input, plan))
}

/// columnDef = ident typeName ["(" int ("," int)* ")"] ["UNSIGNED"] [["NOT"] "NULL"]
fn column_def(input: Span) -> IResult<Col> {
    let (input, name) = ws(ident)(input)?;
    let (input, type_name) = ws(ident)(input)?;
    let (input, _) = opt(delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), ws(unsigned)),
        ws(char(')')),
    ))(input)?;
    let (input, _) = opt(ws(keyword("UNSIGNED")))(input)?;
    let (input, _) = opt(alt((
        map(tuple((ws(keyword("NOT")), keyword("NULL"))), |_| ()),
        map(ws(keyword("NULL")), |_| ()),
    )))(input)?;
    Ok((input, Col { name, kind: field_type_of(&type_name) }))
}

/// Reduce a SQL column type to the engine's field types: string kinds to
/// text, integer and float kinds to numeric, anything else to unknown.
fn field_type_of(type_name: &str) -> FieldType {
    match type_name.to_ascii_lowercase().as_str() {
        "varchar" | "char" | "text" | "tinytext" | "mediumtext" | "longtext" | "string"
        | "enum" | "set" => FieldType::Text,
        "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" | "float"
        | "double" | "decimal" | "numeric" | "real" | "bool" | "boolean" => FieldType::Numeric,
        _ => FieldType::Unknown,
    }
}

/// drop = "DROP" "TABLE" ident
fn parse_drop(input: Span) -> IResult<SqlPlan> {
    let (input, _) = tuple((keyword("DROP"), multispace1, keyword("TABLE")))(input)?;
    let (input, table) = cut(ws(ident))(input)?;
    Ok((input, SqlPlan::new(Action::Drop, table)))
}

/// insert = "INSERT" "INTO" ident (insertValues | insertSet)
fn parse_insert(input: Span) -> IResult<SqlPlan> {
    let (input, _) = tuple((keyword("INSERT"), multispace1, keyword("INTO")))(input)?;
    let (input, table) = cut(ws(ident))(input)?;
    let mut plan = SqlPlan::new(Action::Insert, table);

    if let Ok((rest, _)) = ws(keyword("SET"))(input) {
        let (rest, assignments) =
            cut(separated_list1(ws(char(',')), assignment))(rest)?;
        for (name, value) in assignments {
            plan.cols.push(Col { name, kind: FieldType::Unknown });
            plan.rows.push(value);
        }
        return Ok((rest, plan));
    }

    let (input, cols) = cut(delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), ws(ident)),
        ws(char(')')),
    ))(input)?;
    let (input, _) = cut(ws(keyword("VALUES")))(input)?;
    let (input, rows) = cut(separated_list1(ws(char(',')), row_tuple))(input)?;

    plan.cols = cols.into_iter().map(|name| Col { name, kind: FieldType::Unknown }).collect();
    plan.rows = rows.into_iter().flatten().collect();
    Ok((input, plan))
}

/// tuple = "(" literal ("," literal)* ")"
fn row_tuple(input: Span) -> IResult<Vec<Value>> {
    delimited(ws(char('(')), separated_list1(ws(char(',')), ws(literal)), ws(char(')')))(input)
}

/// assignment = ident "=" literal
fn assignment(input: Span) -> IResult<(String, Value)> {
    let (input, name) = ws(ident)(input)?;
    let (input, _) = ws(char('='))(input)?;
    let (input, value) = cut(ws(literal))(input)?;
    Ok((input, (name, value)))
}

/// update = "UPDATE" ident "SET" assignment ("," assignment)* ["WHERE" expression]
fn parse_update(input: Span) -> IResult<SqlPlan> {
    let (input, _) = keyword("UPDATE")(input)?;
    let (input, table) = cut(ws(ident))(input)?;
    let (input, _) = cut(ws(keyword("SET")))(input)?;
    let (input, assignments) = cut(separated_list1(ws(char(',')), assignment))(input)?;
    let (input, where_expr) =
        opt(preceded(ws(keyword("WHERE")), cut(condition::expression)))(input)?;

    let mut plan = SqlPlan::new(Action::Update, table);
    for (name, value) in assignments {
        plan.cols.push(Col { name, kind: FieldType::Unknown });
        plan.rows.push(value);
    }
    plan.where_expr = where_expr;
    Ok((input, plan))
}

/// delete = "DELETE" "FROM" ident ["WHERE" expression]
fn parse_delete(input: Span) -> IResult<SqlPlan> {
    let (input, _) = tuple((keyword("DELETE"), multispace1, keyword("FROM")))(input)?;
    let (input, table) = cut(ws(ident))(input)?;
    let (input, where_expr) =
        opt(preceded(ws(keyword("WHERE")), cut(condition::expression)))(input)?;

    let mut plan = SqlPlan::new(Action::Delete, table);
    plan.where_expr = where_expr;
    Ok((input, plan))
}

/// select = "SELECT" ("*" | identList) "FROM" ident [clauses...]
fn parse_select(input: Span) -> IResult<SqlPlan> {
    let (input, _) = keyword("SELECT")(input)?;
    let (input, projection) = cut(alt((
        map(ws(char('*')), |_| None),
        map(separated_list1(ws(char(',')), ws(ident)), Some),
    )))(input)?;
    let (input, _) = cut(ws(keyword("FROM")))(input)?;
    let (input, table) = cut(ws(ident))(input)?;
    let (input, where_expr) =
        opt(preceded(ws(keyword("WHERE")), cut(condition::expression)))(input)?;
    // GROUP BY is parsed for compatibility and dropped
    let (input, _) = opt(tuple((
        ws(keyword("GROUP")),
        keyword("BY"),
        cut(separated_list1(ws(char(',')), ws(ident))),
    )))(input)?;
    let (input, order_by) = opt(preceded(
        tuple((ws(keyword("ORDER")), keyword("BY"))),
        cut(separated_list1(ws(char(',')), order_item)),
    ))(input)?;
    let (input, page) = opt(limit_clause)(input)?;

    let mut plan = SqlPlan::new(Action::Select, table);
    match projection {
        None => plan.select_all = true,
        Some(cols) => {
            plan.cols =
                cols.into_iter().map(|name| Col { name, kind: FieldType::Unknown }).collect();
        }
    }
    plan.where_expr = where_expr;
    plan.order_by = order_by.unwrap_or_default();
    if let Some((offset, limit)) = page {
        plan.offset = offset;
        plan.limit = limit;
    }
    Ok((input, plan))
}

/// orderItem = ident ["ASC" | "DESC"]; `id` resolves to the engine
/// identifier field, descending order is marked with a leading `-`.
fn order_item(input: Span) -> IResult<String> {
    let (input, name) = ws(ident)(input)?;
    let (input, direction) = opt(alt((ws(keyword("DESC")), ws(keyword("ASC")))))(input)?;

    let column = if name == ID_COLUMN { IDENTIFIER_FIELD.to_string() } else { name };
    let descending =
        direction.map_or(false, |dir| dir.fragment().eq_ignore_ascii_case("desc"));
    Ok((input, if descending { format!("-{column}") } else { column }))
}

/// "LIMIT" n | "LIMIT" offset "," n | "LIMIT" n "OFFSET" offset
fn limit_clause(input: Span) -> IResult<(usize, usize)> {
    let (input, _) = ws(keyword("LIMIT"))(input)?;
    let (input, first) = cut(ws(unsigned))(input)?;

    if let Ok((rest, _)) = ws(char(','))(input) {
        let (rest, count) = cut(ws(unsigned))(rest)?;
        return Ok((rest, (first, count)));
    }
    if let Ok((rest, _)) = ws(keyword("OFFSET"))(input) {
        let (rest, offset) = cut(ws(unsigned))(rest)?;
        return Ok((rest, (offset, first)));
    }
    Ok((input, (0, first)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_extracts_table_and_typed_columns() {
        let plan = parse("create table test (id int(10) not null, name varchar(255) not null)")
            .unwrap();
        assert_eq!(plan.action, Action::Create);
        assert_eq!(plan.table, "test");
        assert_eq!(plan.cols.len(), 2);
        assert_eq!(plan.cols[0].name, "id");
        assert_eq!(plan.cols[0].kind, FieldType::Numeric);
        assert_eq!(plan.cols[1].name, "name");
        assert_eq!(plan.cols[1].kind, FieldType::Text);
    }

    #[test]
    fn insert_lays_rows_out_row_major() {
        let plan = parse("insert into test (id, name) values (1, 'hello'), (2, 'world')").unwrap();
        assert_eq!(plan.action, Action::Insert);
        assert_eq!(plan.table, "test");
        assert_eq!(plan.cols.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), ["id", "name"]);
        assert_eq!(
            plan.rows,
            vec![
                Value::Integer(1),
                Value::Text("hello".into()),
                Value::Integer(2),
                Value::Text("world".into()),
            ]
        );
    }

    #[test]
    fn insert_set_form() {
        let plan = parse("insert into test set id=3, name='help'").unwrap();
        assert_eq!(plan.action, Action::Insert);
        assert_eq!(plan.cols.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), ["id", "name"]);
        assert_eq!(plan.rows, vec![Value::Integer(3), Value::Text("help".into())]);
    }

    #[test]
    fn update_with_id_condition() {
        let plan = parse("update test set name='haha' where id=1").unwrap();
        assert_eq!(plan.action, Action::Update);
        assert_eq!(plan.where_id().unwrap(), "1");
    }

    #[test]
    fn delete_requires_exact_id_shape() {
        let plan = parse("delete from test where id=1").unwrap();
        assert_eq!(plan.where_id().unwrap(), "1");

        let plan = parse("delete from test where id=1 and name='x'").unwrap();
        assert_eq!(plan.where_id().unwrap_err(), SqlError::InvalidUpdateCondition);

        let plan = parse("delete from test").unwrap();
        assert_eq!(plan.where_id().unwrap_err(), SqlError::InvalidUpdateCondition);
    }

    #[test]
    fn select_with_every_clause() {
        let plan = parse(
            "select * from test where name='hello' group by name order by id desc, age limit 20, 5",
        )
        .unwrap();
        assert_eq!(plan.action, Action::Select);
        assert!(plan.select_all);
        assert!(plan.where_expr.is_some());
        assert_eq!(plan.order_by, vec!["-_id".to_string(), "age".to_string()]);
        assert_eq!(plan.page_info(), (20, 5));
    }

    #[test]
    fn select_column_projection() {
        let plan = parse("select name, sex from test where name='hello' and (id=1 or name=3)")
            .unwrap();
        assert!(!plan.select_all);
        assert_eq!(
            plan.cols.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            ["name", "sex"]
        );
    }

    #[test]
    fn limit_offset_spelling() {
        let plan = parse("select * from t limit 5 offset 15").unwrap();
        assert_eq!(plan.page_info(), (15, 5));
        let plan = parse("select * from t limit 7").unwrap();
        assert_eq!(plan.page_info(), (0, 7));
        let plan = parse("select * from t").unwrap();
        assert_eq!(plan.page_info(), (0, 10));
    }

    #[test]
    fn trailing_semicolon_and_case_are_tolerated() {
        assert!(parse("SELECT * FROM test;").is_ok());
        assert!(parse("DROP TABLE test").is_ok());
        assert!(parse("  drop   table   test  ;  ").is_ok());
    }

    #[test]
    fn garbage_is_invalid_syntax() {
        assert!(matches!(parse("explain select 1"), Err(SqlError::InvalidSyntax(_))));
        assert!(matches!(parse("select * from"), Err(SqlError::InvalidSyntax(_))));
        assert!(matches!(parse(""), Err(SqlError::InvalidSyntax(_))));
        assert!(matches!(
            parse("insert into t (id) values (1) garbage"),
            Err(SqlError::InvalidSyntax(_))
        ));
    }
}
