use crate::document::Document;

/// One mutation of a batch. `Update` is an upsert keyed by the document
/// identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Update { id: String, doc: Document },
    Delete { id: String },
}

/// An ordered set of mutations applied atomically: the whole batch becomes
/// one segment, or nothing is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Batch {
        Batch::default()
    }

    pub fn update(&mut self, id: impl Into<String>, doc: Document) {
        self.ops.push(BatchOp::Update { id: id.into(), doc });
    }

    pub fn delete(&mut self, id: impl Into<String>) {
        self.ops.push(BatchOp::Delete { id: id.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}
