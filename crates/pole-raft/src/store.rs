use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::message::{Entry, LogIndex, NodeId, Snapshot, Term};

/// Durable term and vote, rewritten atomically on every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct HardState {
    pub term: Term,
    pub voted_for: Option<NodeId>,
}

pub(crate) struct StableStore {
    path: PathBuf,
}

impl StableStore {
    pub fn new(dir: &PathBuf) -> StableStore {
        StableStore { path: dir.join("stable.dat") }
    }

    pub fn load(&self) -> Result<HardState, Error> {
        if !self.path.exists() {
            return Ok(HardState::default());
        }
        let data = fs::read(&self.path).map_err(Error::storage)?;
        serde_json::from_slice(&data).map_err(Error::storage)
    }

    pub fn save(&self, state: &HardState) -> Result<(), Error> {
        let staging = self.path.with_extension("tmp");
        let data = serde_json::to_vec(state).map_err(Error::storage)?;
        write_atomically(&staging, &self.path, &data)
    }
}

/// Snapshot persistence: one `snapshot.dat` holding the latest snapshot.
pub(crate) struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: &PathBuf) -> SnapshotStore {
        SnapshotStore { path: dir.join("snapshot.dat") }
    }

    pub fn load(&self) -> Result<Option<Snapshot>, Error> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path).map_err(Error::storage)?;
        bincode::deserialize(&data).map(Some).map_err(Error::storage)
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<(), Error> {
        let staging = self.path.with_extension("tmp");
        let data = bincode::serialize(snapshot).map_err(Error::storage)?;
        write_atomically(&staging, &self.path, &data)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

fn write_atomically(staging: &PathBuf, target: &PathBuf, data: &[u8]) -> Result<(), Error> {
    let mut file = File::create(staging).map_err(Error::storage)?;
    file.write_all(data).map_err(Error::storage)?;
    file.sync_all().map_err(Error::storage)?;
    fs::rename(staging, target).map_err(Error::storage)
}

/// The durable entry log: `logs.dat` holds length-framed bincode entries.
///
/// Invariants (mirrored from the log contract of the consensus
/// literature): indexes are contiguous, terms never decrease, appended
/// entries are flushed before they are acknowledged, committed entries
/// are only removed by compaction.
pub(crate) struct LogStore {
    path: PathBuf,
    entries: Vec<Entry>,
    /// Index preceding `entries[0]`; equals the snapshot's last index
    /// after a compaction.
    offset: LogIndex,
}

impl LogStore {
    pub fn open(dir: &PathBuf, offset: LogIndex) -> Result<LogStore, Error> {
        let path = dir.join("logs.dat");
        let mut entries: Vec<Entry> = Vec::new();
        if path.exists() {
            let data = fs::read(&path).map_err(Error::storage)?;
            let mut cursor = &data[..];
            while cursor.len() >= 4 {
                let len = u32::from_le_bytes([cursor[0], cursor[1], cursor[2], cursor[3]]) as usize;
                if cursor.len() < 4 + len {
                    // torn tail write from a crash: drop it
                    break;
                }
                match bincode::deserialize(&cursor[4..4 + len]) {
                    Ok(entry) => entries.push(entry),
                    Err(err) => return Err(Error::storage(err)),
                }
                cursor = &cursor[4 + len..];
            }
        }

        // entries already folded into a snapshot are gone
        entries.retain(|entry| entry.index > offset);
        // keep only the contiguous prefix
        let mut expected = offset + 1;
        let mut keep = 0;
        for entry in &entries {
            if entry.index != expected {
                break;
            }
            expected += 1;
            keep += 1;
        }
        entries.truncate(keep);

        let mut store = LogStore { path, entries, offset };
        store.rewrite()?;
        Ok(store)
    }

    pub fn last_index(&self) -> LogIndex {
        self.entries.last().map(|entry| entry.index).unwrap_or(self.offset)
    }

    /// Index of the earliest entry still in the log.
    pub fn first_index(&self) -> LogIndex {
        self.offset + 1
    }

    pub fn get(&self, index: LogIndex) -> Option<&Entry> {
        if index <= self.offset {
            return None;
        }
        self.entries.get((index - self.offset - 1) as usize)
    }

    pub fn term_of(&self, index: LogIndex) -> Option<Term> {
        self.get(index).map(|entry| entry.term)
    }

    pub fn entries_from(&self, index: LogIndex, max: usize) -> Vec<Entry> {
        if index <= self.offset {
            return Vec::new();
        }
        let start = (index - self.offset - 1) as usize;
        self.entries.iter().skip(start).take(max).cloned().collect()
    }

    /// Durably append entries at the tail.
    pub fn append(&mut self, new: &[Entry]) -> Result<(), Error> {
        if new.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(Error::storage)?;
        for entry in new {
            file.write_all(&frame(entry)?).map_err(Error::storage)?;
        }
        file.sync_data().map_err(Error::storage)?;
        self.entries.extend_from_slice(new);
        Ok(())
    }

    /// Remove every entry at or above `index` (conflict resolution).
    pub fn truncate_from(&mut self, index: LogIndex) -> Result<(), Error> {
        if index <= self.offset {
            self.entries.clear();
        } else {
            self.entries.truncate((index - self.offset - 1) as usize);
        }
        self.rewrite()
    }

    /// Forget everything up to and including `index` after it was folded
    /// into a snapshot.
    pub fn compact_to(&mut self, index: LogIndex) -> Result<(), Error> {
        self.entries.retain(|entry| entry.index > index);
        self.offset = index;
        self.rewrite()
    }

    fn rewrite(&mut self) -> Result<(), Error> {
        let staging = self.path.with_extension("tmp");
        let mut data = Vec::new();
        for entry in &self.entries {
            data.extend_from_slice(&frame(entry)?);
        }
        write_atomically(&staging, &self.path, &data)
    }
}

fn frame(entry: &Entry) -> Result<Vec<u8>, Error> {
    let payload = bincode::serialize(entry).map_err(Error::storage)?;
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(&payload);
    Ok(framed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::EntryPayload;

    fn entry(index: LogIndex, term: Term) -> Entry {
        Entry { index, term, payload: EntryPayload::Command(vec![index as u8]) }
    }

    #[test]
    fn append_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();

        let mut log = LogStore::open(&dir, 0).unwrap();
        log.append(&[entry(1, 1), entry(2, 1), entry(3, 2)]).unwrap();
        assert_eq!(log.last_index(), 3);
        drop(log);

        let log = LogStore::open(&dir, 0).unwrap();
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.term_of(3), Some(2));
        assert_eq!(log.entries_from(2, 10).len(), 2);
    }

    #[test]
    fn truncate_and_compact() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();

        let mut log = LogStore::open(&dir, 0).unwrap();
        log.append(&[entry(1, 1), entry(2, 1), entry(3, 1), entry(4, 2)]).unwrap();

        log.truncate_from(3).unwrap();
        assert_eq!(log.last_index(), 2);

        log.append(&[entry(3, 3)]).unwrap();
        log.compact_to(2).unwrap();
        assert_eq!(log.first_index(), 3);
        assert_eq!(log.last_index(), 3);
        assert!(log.get(2).is_none());
        drop(log);

        let log = LogStore::open(&dir, 2).unwrap();
        assert_eq!(log.first_index(), 3);
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.term_of(3), Some(3));
    }

    #[test]
    fn hard_state_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let stable = StableStore::new(&dir);
        assert_eq!(stable.load().unwrap(), HardState::default());

        let state = HardState { term: 4, voted_for: Some("n2".into()) };
        stable.save(&state).unwrap();
        assert_eq!(stable.load().unwrap(), state);
    }

    #[test]
    fn snapshot_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let snapshots = SnapshotStore::new(&dir);
        assert!(snapshots.load().unwrap().is_none());

        let snapshot = Snapshot {
            last_index: 9,
            last_term: 2,
            voters: [("n1".to_string(), "127.0.0.1:7001".to_string())].into_iter().collect(),
            data: b"{}".to_vec(),
        };
        snapshots.save(&snapshot).unwrap();
        assert_eq!(snapshots.load().unwrap(), Some(snapshot));
    }
}
