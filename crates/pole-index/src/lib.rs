//! The full-text index engine behind the SQL front door.
//!
//! Everything the rest of the workspace touches goes through a small,
//! named surface: a [`Directory`] capability for segment storage (file or
//! object-store backed, selected by URI scheme), [`Writer`] / [`Reader`]
//! handles per index, [`Batch`] mutations, a [`Query`] tree, and the
//! [`Registry`] that caches handles with single-flight construction and
//! explicit invalidation.

mod batch;
pub mod directory;
mod document;
mod error;
mod lru;
mod query;
mod reader;
mod registry;
mod search;
mod segment;
mod writer;

pub use batch::{Batch, BatchOp};
pub use directory::{
    CancelToken, Directory, DirectoryStats, LockProvider, WriteTo,
};
pub use document::{
    make_field, Document, Field, FieldFlags, FieldKind, DEFAULT_NUMERIC_OPTIONS,
    DEFAULT_TEXT_OPTIONS,
};
pub use error::{Error, Result};
pub use query::Query;
pub use reader::Reader;
pub use registry::Registry;
pub use search::{Hit, SearchRequest, SearchResults};
pub use segment::SEGMENT_KIND;
pub use writer::Writer;
