use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::batch::{Batch, BatchOp};
use crate::directory::{CancelToken, WriteTo};
use crate::document::Document;
use crate::error::{Error, Result};

/// Extension of segment files inside a directory.
pub const SEGMENT_KIND: &str = ".seg";

const STREAM_CHUNK: usize = 64 * 1024;

/// The immutable unit of persistence: the upserts and deletes of exactly
/// one batch. Readers fold segments in epoch order, later segments
/// overshadowing earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Segment {
    pub updates: Vec<Document>,
    pub deletes: Vec<String>,
}

impl Segment {
    pub fn from_batch(batch: &Batch) -> Segment {
        let mut segment = Segment::default();
        for op in batch.ops() {
            match op {
                BatchOp::Update { id, doc } => {
                    let mut doc = doc.clone();
                    doc.id = id.clone();
                    segment.updates.push(doc);
                }
                BatchOp::Delete { id } => segment.deletes.push(id.clone()),
            }
        }
        segment
    }

    pub fn decode(bytes: &[u8]) -> Result<Segment> {
        bincode::deserialize(bytes).map_err(Error::storage)
    }
}

impl WriteTo for Segment {
    fn write_to(&self, wtr: &mut dyn Write, cancel: &CancelToken) -> io::Result<u64> {
        let payload = bincode::serialize(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        for chunk in payload.chunks(STREAM_CHUNK) {
            if cancel.is_cancelled() {
                return Ok(0);
            }
            wtr.write_all(chunk)?;
        }
        Ok(payload.len() as u64)
    }
}
