//! Types shared by every crate of the workspace: field mappings, the
//! replicated catalog and its commands, and the scalar values carried by
//! SQL literals and documents.

pub mod catalog;
pub mod mapping;
pub mod value;

pub use catalog::{Catalog, CatalogError, Command};
pub use mapping::{FieldEntry, FieldOption, FieldType, Mapping};
pub use value::Value;

/// Name of the engine-internal identifier field. The reserved SQL column
/// `id` resolves to this field everywhere a field name is needed.
pub const IDENTIFIER_FIELD: &str = "_id";

/// The reserved SQL column whose value becomes the document identifier.
/// It never appears in a [`Mapping`] and is never stored on a document.
pub const ID_COLUMN: &str = "id";
