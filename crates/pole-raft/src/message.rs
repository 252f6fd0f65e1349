use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type NodeId = String;
pub type Term = u64;
/// A log position. Starts at 1; 0 means "nothing".
pub type LogIndex = u64;

/// What a log entry carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// Appended by a fresh leader to commit the preceding term's tail.
    Noop,
    /// An opaque state machine command.
    Command(Vec<u8>),
    /// The full voter set after a membership change. Effective as soon as
    /// the entry is appended.
    Membership(BTreeMap<NodeId, String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub index: LogIndex,
    pub term: Term,
    pub payload: EntryPayload,
}

/// A state machine snapshot plus everything needed to restart from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub last_index: LogIndex,
    pub last_term: Term,
    pub voters: BTreeMap<NodeId, String>,
    pub data: Vec<u8>,
}

/// The peer-to-peer protocol. Every request gets exactly one response over
/// the same connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    RequestVote {
        term: Term,
        candidate: NodeId,
        last_log_index: LogIndex,
        last_log_term: Term,
    },
    RequestVoteResponse {
        term: Term,
        voter: NodeId,
        granted: bool,
    },
    AppendEntries {
        term: Term,
        leader: NodeId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<Entry>,
        leader_commit: LogIndex,
    },
    AppendEntriesResponse {
        term: Term,
        follower: NodeId,
        success: bool,
        match_index: LogIndex,
    },
    InstallSnapshot {
        term: Term,
        leader: NodeId,
        snapshot: Snapshot,
    },
    InstallSnapshotResponse {
        term: Term,
        follower: NodeId,
        last_index: LogIndex,
    },
}
