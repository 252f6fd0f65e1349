use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The type a mapped column reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Numeric,
    Text,
    Unknown,
}

/// Per-field indexing switches. When every switch is off the engine
/// substitutes the type-specific defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    #[serde(default)]
    pub index: bool,
    #[serde(default)]
    pub store: bool,
    #[serde(default)]
    pub term_positions: bool,
    #[serde(default)]
    pub highlight: bool,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub aggregatable: bool,
}

impl FieldOption {
    pub fn is_unset(&self) -> bool {
        *self == FieldOption::default()
    }
}

/// Type and options of one mapped column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(default)]
    pub option: FieldOption,
}

impl FieldEntry {
    pub fn new(kind: FieldType) -> Self {
        Self { kind, option: FieldOption::default() }
    }
}

/// The schema of one index: an ordered column name → entry mapping.
///
/// The reserved column `id` is never part of the properties; its value is
/// the document identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub properties: BTreeMap<String, FieldEntry>,
}

impl Mapping {
    pub fn get(&self, field: &str) -> Option<&FieldEntry> {
        self.properties.get(field)
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.properties.get(field).map(|entry| entry.kind)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.properties.contains_key(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_round_trip_keeps_type_tag() {
        let mut mapping = Mapping::default();
        mapping.properties.insert("age".into(), FieldEntry::new(FieldType::Numeric));
        let json = serde_json::to_string(&mapping).unwrap();
        assert!(json.contains(r#""type":"numeric""#));
        let back: Mapping = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mapping);
    }
}
