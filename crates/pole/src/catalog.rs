use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use pole_raft::StateMachine;
use pole_types::{Catalog, CatalogError, Command};

/// What a catalog command application resolved to, carried back through
/// the consensus apply path to the submitting node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandOutcome {
    Ok,
    Catalog(CatalogError),
    Malformed(String),
}

impl CommandOutcome {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("command outcomes always serialize")
    }

    pub fn decode(bytes: &[u8]) -> Result<CommandOutcome, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// The replicated catalog behind the consensus log.
///
/// Apply takes the write lock and never blocks on I/O while holding it;
/// reads (query planning, leader lookup, snapshots) take the read lock.
pub struct CatalogStateMachine {
    catalog: Arc<RwLock<Catalog>>,
}

impl CatalogStateMachine {
    pub fn new(catalog: Arc<RwLock<Catalog>>) -> CatalogStateMachine {
        CatalogStateMachine { catalog }
    }
}

impl StateMachine for CatalogStateMachine {
    fn apply(&self, command: &[u8]) -> Vec<u8> {
        let outcome = match Command::decode(command) {
            Ok(command) => match self.catalog.write().unwrap().apply(command) {
                Ok(()) => CommandOutcome::Ok,
                Err(err) => CommandOutcome::Catalog(err),
            },
            Err(err) => CommandOutcome::Malformed(err.to_string()),
        };
        outcome.encode()
    }

    fn snapshot(&self) -> Vec<u8> {
        self.catalog.read().unwrap().snapshot()
    }

    fn restore(&self, snapshot: &[u8]) -> Result<(), pole_raft::Error> {
        let restored =
            Catalog::restore(snapshot).map_err(|err| pole_raft::Error::StateMachine(err.to_string()))?;
        *self.catalog.write().unwrap() = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pole_types::Mapping;

    use super::*;

    #[test]
    fn apply_reports_catalog_errors_through_the_outcome() {
        let catalog = Arc::new(RwLock::new(Catalog::default()));
        let fsm = CatalogStateMachine::new(catalog.clone());

        let lock = Command::Lock { token: "A".into() }.encode();
        assert_eq!(CommandOutcome::decode(&fsm.apply(&lock)).unwrap(), CommandOutcome::Ok);
        assert_eq!(
            CommandOutcome::decode(&fsm.apply(&lock)).unwrap(),
            CommandOutcome::Catalog(CatalogError::AlreadyLocked("A".into()))
        );
        assert!(catalog.read().unwrap().locks.contains("A"));
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let catalog = Arc::new(RwLock::new(Catalog::default()));
        let fsm = CatalogStateMachine::new(catalog.clone());
        let add = Command::AddMapping { index: "t".into(), mapping: Mapping::default() }.encode();
        fsm.apply(&add);

        let snapshot = fsm.snapshot();
        let other = Arc::new(RwLock::new(Catalog::default()));
        let other_fsm = CatalogStateMachine::new(other.clone());
        other_fsm.restore(&snapshot).unwrap();

        assert_eq!(*other.read().unwrap(), *catalog.read().unwrap());
        assert_eq!(other_fsm.snapshot(), snapshot);
    }

    #[test]
    fn malformed_commands_do_not_poison_the_state() {
        let catalog = Arc::new(RwLock::new(Catalog::default()));
        let fsm = CatalogStateMachine::new(catalog.clone());
        let outcome = CommandOutcome::decode(&fsm.apply(b"not json")).unwrap();
        assert!(matches!(outcome, CommandOutcome::Malformed(_)));
        assert_eq!(*catalog.read().unwrap(), Catalog::default());
    }
}
