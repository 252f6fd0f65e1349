use pole_index::{make_field, Batch, Document, SearchRequest};
use pole_types::{FieldEntry, FieldType, Mapping, Value, ID_COLUMN};

use crate::condition::{CmpOp, WhereExpr};
use crate::error::SqlError;
use crate::where_visitor::build_query;
use pole_index::Query;

pub(crate) const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Drop,
    Insert,
    Update,
    Delete,
    Select,
}

/// A column reference with the type it reduces to. Only CREATE carries a
/// meaningful type; everywhere else it stays `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub struct Col {
    pub name: String,
    pub kind: FieldType,
}

/// The typed outcome of parsing one statement.
///
/// `rows` is a flat list of literals laid out row-major: the value of
/// column `j` in row `i` sits at `i * cols.len() + j`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlPlan {
    pub action: Action,
    pub table: String,
    pub cols: Vec<Col>,
    pub rows: Vec<Value>,
    pub where_expr: Option<WhereExpr>,
    pub select_all: bool,
    /// Field names in SQL order; a leading `-` marks descending.
    pub order_by: Vec<String>,
    pub offset: usize,
    pub limit: usize,
}

impl SqlPlan {
    pub(crate) fn new(action: Action, table: String) -> SqlPlan {
        SqlPlan {
            action,
            table,
            cols: Vec::new(),
            rows: Vec::new(),
            where_expr: None,
            select_all: false,
            order_by: Vec::new(),
            offset: 0,
            limit: 0,
        }
    }

    /// Effective pagination: offset 0 and limit 10 unless the statement
    /// says otherwise.
    pub fn page_info(&self) -> (usize, usize) {
        let limit = if self.limit == 0 { DEFAULT_LIMIT } else { self.limit };
        (self.offset, limit)
    }

    /// Build the index mapping a CREATE declares. The reserved `id`
    /// column never becomes a field.
    pub fn mapping_from_columns(&self) -> Mapping {
        let mut mapping = Mapping::default();
        for col in &self.cols {
            if col.name == ID_COLUMN {
                continue;
            }
            mapping.properties.insert(col.name.clone(), FieldEntry::new(col.kind));
        }
        mapping
    }

    /// The identifier a single-row WHERE pins down. Anything but
    /// `id = <literal>` is rejected.
    pub fn where_id(&self) -> Result<String, SqlError> {
        match &self.where_expr {
            Some(WhereExpr::Cmp { column, op: CmpOp::Eq, value }) if column == ID_COLUMN => {
                Ok(value.to_string())
            }
            _ => Err(SqlError::InvalidUpdateCondition),
        }
    }

    /// Compose one document per row. Columns absent from the mapping are
    /// skipped; the `id` column becomes the document identifier. Rows
    /// without an identifier are rejected.
    fn docs(&self, mapping: &Mapping) -> Result<Vec<Document>, SqlError> {
        let column_count = self.cols.len();
        if column_count == 0 {
            return Ok(Vec::new());
        }
        let mut docs = Vec::with_capacity(self.rows.len() / column_count);
        for row in self.rows.chunks_exact(column_count) {
            let mut id: Option<String> = None;
            let mut doc = Document::default();
            for (col, value) in self.cols.iter().zip(row) {
                if col.name == ID_COLUMN {
                    id = Some(value.to_string());
                    continue;
                }
                if let Some(field) = make_field(mapping, &col.name, value) {
                    doc.add_field(field);
                }
            }
            if self.action == Action::Update {
                id = Some(self.where_id()?);
            }
            doc.id = id.ok_or(SqlError::MissingIdentifier)?;
            docs.push(doc);
        }
        Ok(docs)
    }

    pub fn build_insert_batch(&self, mapping: &Mapping) -> Result<Batch, SqlError> {
        if self.action != Action::Insert {
            return Err(SqlError::ActionMismatch("an insert"));
        }
        let mut batch = Batch::new();
        for doc in self.docs(mapping)? {
            batch.update(doc.id.clone(), doc);
        }
        Ok(batch)
    }

    pub fn build_update_batch(&self, mapping: &Mapping) -> Result<Batch, SqlError> {
        if self.action != Action::Update {
            return Err(SqlError::ActionMismatch("an update"));
        }
        let mut batch = Batch::new();
        for doc in self.docs(mapping)? {
            batch.update(doc.id.clone(), doc);
        }
        Ok(batch)
    }

    pub fn build_delete_batch(&self, _mapping: &Mapping) -> Result<Batch, SqlError> {
        if self.action != Action::Delete {
            return Err(SqlError::ActionMismatch("a delete"));
        }
        let mut batch = Batch::new();
        batch.delete(self.where_id()?);
        Ok(batch)
    }

    /// Compile the SELECT into a search request.
    pub fn build_request(&self, mapping: &Mapping) -> Result<SearchRequest, SqlError> {
        let query = match &self.where_expr {
            None => Query::MatchAll,
            Some(expr) => build_query(expr, mapping)?,
        };
        let (offset, limit) = self.page_info();
        Ok(SearchRequest::top_n(limit, query)
            .with_standard_aggregations()
            .include_locations()
            .set_from(offset)
            .sort_by(self.order_by.clone())
            .explain_scores())
    }
}

#[cfg(test)]
mod tests {
    use pole_index::BatchOp;

    use super::*;
    use crate::parse;

    fn mapping() -> Mapping {
        let mut mapping = Mapping::default();
        mapping.properties.insert("name".into(), FieldEntry::new(FieldType::Text));
        mapping.properties.insert("age".into(), FieldEntry::new(FieldType::Numeric));
        mapping
    }

    #[test]
    fn created_mappings_never_contain_the_id_column() {
        let plan = parse("create table t (id int not null, name varchar(255))").unwrap();
        let mapping = plan.mapping_from_columns();
        assert!(!mapping.contains("id"));
        assert!(mapping.contains("name"));
    }

    #[test]
    fn insert_batches_upsert_by_the_id_literal() {
        let plan = parse("insert into t (id,name,age) values (1,'ann',42),(2,'bob',30)").unwrap();
        let batch = plan.build_insert_batch(&mapping()).unwrap();
        assert_eq!(batch.len(), 2);
        match &batch.ops()[0] {
            BatchOp::Update { id, doc } => {
                assert_eq!(id, "1");
                assert_eq!(doc.id, "1");
                // the id column is the identifier, never a stored field
                assert!(doc.field("id").is_none());
                assert_eq!(doc.field("name").unwrap().as_text(), Some("ann"));
                assert_eq!(doc.field("age").unwrap().as_numeric(), Some(42.0));
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn unmapped_columns_are_silently_dropped() {
        let plan = parse("insert into t (id,name,ghost) values (1,'ann','boo')").unwrap();
        let batch = plan.build_insert_batch(&mapping()).unwrap();
        match &batch.ops()[0] {
            BatchOp::Update { doc, .. } => {
                assert!(doc.field("ghost").is_none());
                assert!(doc.field("name").is_some());
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn inserts_without_an_id_are_rejected() {
        let plan = parse("insert into t (name) values ('orphan')").unwrap();
        assert_eq!(plan.build_insert_batch(&mapping()).unwrap_err(), SqlError::MissingIdentifier);
    }

    #[test]
    fn update_batches_take_their_id_from_the_condition() {
        let plan = parse("update t set name='x' where id=9").unwrap();
        let batch = plan.build_update_batch(&mapping()).unwrap();
        match &batch.ops()[0] {
            BatchOp::Update { id, doc } => {
                assert_eq!(id, "9");
                assert_eq!(doc.field("name").unwrap().as_text(), Some("x"));
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn delete_batches_carry_one_tombstone() {
        let plan = parse("delete from t where id=3").unwrap();
        let batch = plan.build_delete_batch(&mapping()).unwrap();
        assert_eq!(batch.ops(), &[BatchOp::Delete { id: "3".to_string() }]);
    }

    #[test]
    fn builders_check_the_statement_kind() {
        let plan = parse("select * from t").unwrap();
        assert_eq!(
            plan.build_insert_batch(&mapping()).unwrap_err(),
            SqlError::ActionMismatch("an insert")
        );
        let request = plan.build_request(&mapping()).unwrap();
        assert_eq!(request.limit, 10);
        assert!(request.aggregations);
        assert!(request.include_locations);
        assert!(request.explain_scores);
    }
}
