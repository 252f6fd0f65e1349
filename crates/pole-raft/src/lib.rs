//! A compact Raft-style consensus core.
//!
//! A [`RaftNode`] hosts a deterministic [`StateMachine`] behind a
//! replicated log: randomized leader election, heartbeat-driven log
//! replication with majority commit, single-server membership changes,
//! and snapshot-based log compaction with follower snapshot install.
//!
//! Durable state lives under `<data_dir>/<node_id>/`: `logs.dat` (framed
//! log entries), `stable.dat` (current term and vote), `snapshot.dat`
//! (the latest state machine snapshot). Peers talk over typed binary
//! channels on the node's raft address.

mod error;
mod message;
mod node;
mod state_machine;
mod store;
mod transport;

pub use error::Error;
pub use message::{Entry, EntryPayload, LogIndex, NodeId, Snapshot, Term};
pub use node::{Config, LeaderEvent, RaftNode, Role};
pub use state_machine::StateMachine;
