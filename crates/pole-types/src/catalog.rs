use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::mapping::Mapping;

/// Errors produced by applying a catalog command. They travel back through
/// the consensus apply path to the submitting node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum CatalogError {
    #[error("lock `{0}` is already held")]
    AlreadyLocked(String),
    #[error("lock `{0}` is not held")]
    AlreadyUnlocked(String),
}

/// A command carried by the consensus log. Encoded as JSON so replicas of
/// different builds agree on the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    AddMapping { index: String, mapping: Mapping },
    DeleteMapping { index: String },
    LeaderChange { rpc_addr: String },
    Lock { token: String },
    Unlock { token: String },
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("catalog commands always serialize")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// The entire replicated state: index mappings, the current leader's RPC
/// address, and the set of held lock tokens.
///
/// Ordered containers keep the JSON snapshot byte-identical across
/// replicas for the same applied prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub mappings: BTreeMap<String, Mapping>,
    pub leader_rpc_addr: String,
    pub locks: BTreeSet<String>,
}

impl Catalog {
    /// Apply one command. Deterministic: no clocks, no I/O, no randomness.
    pub fn apply(&mut self, command: Command) -> Result<(), CatalogError> {
        match command {
            Command::AddMapping { index, mapping } => {
                self.mappings.insert(index, mapping);
                Ok(())
            }
            Command::DeleteMapping { index } => {
                self.mappings.remove(&index);
                Ok(())
            }
            Command::LeaderChange { rpc_addr } => {
                self.leader_rpc_addr = rpc_addr;
                Ok(())
            }
            Command::Lock { token } => {
                if !self.locks.insert(token.clone()) {
                    return Err(CatalogError::AlreadyLocked(token));
                }
                Ok(())
            }
            Command::Unlock { token } => {
                if !self.locks.remove(&token) {
                    return Err(CatalogError::AlreadyUnlocked(token));
                }
                Ok(())
            }
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("catalog state always serializes")
    }

    pub fn restore(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FieldEntry, FieldType};

    fn mapping(fields: &[(&str, FieldType)]) -> Mapping {
        let mut mapping = Mapping::default();
        for (name, kind) in fields {
            mapping.properties.insert(name.to_string(), FieldEntry::new(*kind));
        }
        mapping
    }

    #[test]
    fn add_and_delete_mapping() {
        let mut catalog = Catalog::default();
        let m = mapping(&[("name", FieldType::Text)]);
        catalog
            .apply(Command::AddMapping { index: "t".into(), mapping: m.clone() })
            .unwrap();
        assert_eq!(catalog.mappings.get("t"), Some(&m));

        catalog.apply(Command::DeleteMapping { index: "t".into() }).unwrap();
        assert!(catalog.mappings.is_empty());
    }

    #[test]
    fn lock_is_mutually_exclusive_per_token() {
        let mut catalog = Catalog::default();
        catalog.apply(Command::Lock { token: "A".into() }).unwrap();
        assert_eq!(
            catalog.apply(Command::Lock { token: "A".into() }),
            Err(CatalogError::AlreadyLocked("A".into()))
        );
        catalog.apply(Command::Unlock { token: "A".into() }).unwrap();
        assert_eq!(
            catalog.apply(Command::Unlock { token: "A".into() }),
            Err(CatalogError::AlreadyUnlocked("A".into()))
        );
    }

    #[test]
    fn replay_yields_identical_snapshots_at_every_offset() {
        let commands = vec![
            Command::AddMapping {
                index: "posts".into(),
                mapping: mapping(&[("title", FieldType::Text), ("age", FieldType::Numeric)]),
            },
            Command::Lock { token: "posts.lock".into() },
            Command::LeaderChange { rpc_addr: "127.0.0.1:5001".into() },
            Command::AddMapping {
                index: "users".into(),
                mapping: mapping(&[("name", FieldType::Text)]),
            },
            Command::Unlock { token: "posts.lock".into() },
            Command::DeleteMapping { index: "posts".into() },
        ];

        let mut left = Catalog::default();
        let mut right = Catalog::default();
        for command in &commands {
            let _ = left.apply(command.clone());
            let _ = right.apply(command.clone());
            assert_eq!(left.snapshot(), right.snapshot());
        }

        let restored = Catalog::restore(&left.snapshot()).unwrap();
        assert_eq!(restored, left);
    }

    #[test]
    fn failed_apply_leaves_state_unchanged() {
        let mut catalog = Catalog::default();
        catalog.apply(Command::Lock { token: "A".into() }).unwrap();
        let before = catalog.snapshot();
        let _ = catalog.apply(Command::Lock { token: "A".into() });
        assert_eq!(catalog.snapshot(), before);
    }

    #[test]
    fn command_wire_shape_is_tagged() {
        let cmd = Command::Lock { token: "A".into() };
        let json = String::from_utf8(cmd.encode()).unwrap();
        assert!(json.contains(r#""op":"lock""#));
        assert_eq!(Command::decode(json.as_bytes()).unwrap(), cmd);
    }
}
