use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use rand::Rng;

use crate::error::Error;
use crate::message::{Entry, EntryPayload, LogIndex, Message, NodeId, Snapshot, Term};
use crate::state_machine::StateMachine;
use crate::store::{HardState, LogStore, SnapshotStore, StableStore};
use crate::transport::{self, ServerHandle};

const TICK_INTERVAL: Duration = Duration::from_millis(50);
const RPC_TIMEOUT: Duration = Duration::from_secs(2);
const IN_FLIGHT_STALE: Duration = Duration::from_millis(2500);
const MAX_APPEND_BATCH: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    pub id: NodeId,
    /// TCP address the raft transport binds to.
    pub addr: String,
    /// Durable state lands under `<data_dir>/<id>/`.
    pub data_dir: PathBuf,
    pub heartbeat_interval: Duration,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    /// Take a snapshot and compact the log after this many applied
    /// entries.
    pub snapshot_threshold: u64,
}

impl Config {
    pub fn new(id: impl Into<NodeId>, addr: impl Into<String>, data_dir: impl Into<PathBuf>) -> Config {
        Config {
            id: id.into(),
            addr: addr.into(),
            data_dir: data_dir.into(),
            heartbeat_interval: Duration::from_millis(100),
            election_timeout_min: Duration::from_millis(500),
            election_timeout_max: Duration::from_millis(1000),
            snapshot_threshold: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl Role {
    fn as_u8(self) -> u8 {
        match self {
            Role::Follower => 0,
            Role::Candidate => 1,
            Role::Leader => 2,
        }
    }

    fn from_u8(raw: u8) -> Role {
        match raw {
            2 => Role::Leader,
            1 => Role::Candidate,
            _ => Role::Follower,
        }
    }
}

/// Emitted on every observed leadership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderEvent {
    pub term: Term,
    pub leader: Option<NodeId>,
    /// True when this node just won the election.
    pub is_self: bool,
}

pub(crate) enum Event {
    Tick,
    Message(Message, Sender<Message>),
    PeerReply(Message),
    Apply { command: Vec<u8>, reply: Sender<Result<Vec<u8>, Error>> },
    AddVoter { id: NodeId, addr: String, reply: Sender<Result<(), Error>> },
    RemoveVoter { id: NodeId, reply: Sender<Result<(), Error>> },
    Bootstrap { servers: Vec<(NodeId, String)>, reply: Sender<Result<(), Error>> },
    Shutdown,
}

enum PendingReply {
    Apply(Sender<Result<Vec<u8>, Error>>),
    Confirm(Sender<Result<(), Error>>),
}

impl PendingReply {
    fn ok(self, response: Vec<u8>) {
        match self {
            PendingReply::Apply(tx) => {
                let _ = tx.send(Ok(response));
            }
            PendingReply::Confirm(tx) => {
                let _ = tx.send(Ok(()));
            }
        }
    }

    fn fail(self, err: Error) {
        match self {
            PendingReply::Apply(tx) => {
                let _ = tx.send(Err(err));
            }
            PendingReply::Confirm(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// Handle to a running consensus node. Cheap to clone; the node itself
/// lives on its own thread until [`RaftNode::shutdown`].
#[derive(Clone)]
pub struct RaftNode {
    events: Sender<Event>,
    role_flag: Arc<AtomicU8>,
    leader_rx: Receiver<LeaderEvent>,
    server: Arc<ServerHandle>,
    stopping: Arc<AtomicBool>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RaftNode {
    pub fn start(config: Config, fsm: Arc<dyn StateMachine>) -> Result<RaftNode, Error> {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (leader_tx, leader_rx) = crossbeam_channel::unbounded();
        let role_flag = Arc::new(AtomicU8::new(Role::Follower.as_u8()));
        let stopping = Arc::new(AtomicBool::new(false));

        let server = transport::serve(&config.addr, events_tx.clone())?;

        let mut node = Node::recover(config, fsm, events_tx.clone(), leader_tx, role_flag.clone())?;
        let worker = thread::Builder::new()
            .name("raft-node".to_string())
            .spawn(move || node.run(events_rx))
            .map_err(Error::storage)?;

        let ticker_events = events_tx.clone();
        let ticker_flag = stopping.clone();
        thread::Builder::new()
            .name("raft-ticker".to_string())
            .spawn(move || loop {
                thread::sleep(TICK_INTERVAL);
                if ticker_flag.load(Ordering::SeqCst) {
                    break;
                }
                if ticker_events.send(Event::Tick).is_err() {
                    break;
                }
            })
            .map_err(Error::storage)?;

        Ok(RaftNode {
            events: events_tx,
            role_flag,
            leader_rx,
            server: Arc::new(server),
            stopping,
            worker: Arc::new(Mutex::new(Some(worker))),
        })
    }

    /// Seed a brand-new cluster with its initial voter set. Fails once any
    /// durable state exists.
    pub fn bootstrap(&self, servers: Vec<(NodeId, String)>) -> Result<(), Error> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.events
            .send(Event::Bootstrap { servers, reply: reply_tx })
            .map_err(|_| Error::Shutdown)?;
        reply_rx.recv().map_err(|_| Error::Shutdown)?
    }

    /// Submit a command. Resolves once the command is committed and
    /// applied, with the state machine's response. On timeout the command
    /// may still commit later; submitted commands must be idempotent.
    pub fn apply(&self, command: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, Error> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.events
            .send(Event::Apply { command, reply: reply_tx })
            .map_err(|_| Error::Shutdown)?;
        reply_rx.recv_timeout(timeout).map_err(|_| Error::Timeout)?
    }

    pub fn add_voter(&self, id: impl Into<NodeId>, addr: impl Into<String>) -> Result<(), Error> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.events
            .send(Event::AddVoter { id: id.into(), addr: addr.into(), reply: reply_tx })
            .map_err(|_| Error::Shutdown)?;
        reply_rx.recv_timeout(Duration::from_secs(5)).map_err(|_| Error::Timeout)?
    }

    pub fn remove_voter(&self, id: &str) -> Result<(), Error> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.events
            .send(Event::RemoveVoter { id: id.to_string(), reply: reply_tx })
            .map_err(|_| Error::Shutdown)?;
        reply_rx.recv_timeout(Duration::from_secs(5)).map_err(|_| Error::Timeout)?
    }

    pub fn state(&self) -> Role {
        Role::from_u8(self.role_flag.load(Ordering::SeqCst))
    }

    pub fn is_leader(&self) -> bool {
        self.state() == Role::Leader
    }

    /// Stream of leadership changes. Intended for a single watcher.
    pub fn leader_events(&self) -> Receiver<LeaderEvent> {
        self.leader_rx.clone()
    }

    /// Ordered stop: no new ticks, drain the loop, close the transport.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.events.send(Event::Shutdown);
        self.server.shutdown();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

struct Node {
    config: Config,
    fsm: Arc<dyn StateMachine>,
    log: LogStore,
    stable: StableStore,
    snapshots: SnapshotStore,
    hard: HardState,
    snapshot: Option<Snapshot>,
    /// (last_index, last_term) covered by the current snapshot.
    snapshot_meta: (LogIndex, Term),
    voters: BTreeMap<NodeId, String>,
    role: Role,
    leader: Option<NodeId>,
    votes: HashSet<NodeId>,
    commit_index: LogIndex,
    applied_index: LogIndex,
    election_deadline: Instant,
    last_heartbeat: Instant,
    next_index: HashMap<NodeId, LogIndex>,
    match_index: HashMap<NodeId, LogIndex>,
    in_flight: HashMap<NodeId, Instant>,
    pending: BTreeMap<LogIndex, PendingReply>,
    events: Sender<Event>,
    leader_tx: Sender<LeaderEvent>,
    role_flag: Arc<AtomicU8>,
}

impl Node {
    fn recover(
        config: Config,
        fsm: Arc<dyn StateMachine>,
        events: Sender<Event>,
        leader_tx: Sender<LeaderEvent>,
        role_flag: Arc<AtomicU8>,
    ) -> Result<Node, Error> {
        let dir = config.data_dir.join(&config.id);
        std::fs::create_dir_all(&dir).map_err(Error::storage)?;

        let stable = StableStore::new(&dir);
        let snapshots = SnapshotStore::new(&dir);
        let hard = stable.load()?;

        let snapshot = snapshots.load()?;
        let (snapshot_meta, voters) = match &snapshot {
            Some(snapshot) => {
                fsm.restore(&snapshot.data)?;
                ((snapshot.last_index, snapshot.last_term), snapshot.voters.clone())
            }
            None => ((0, 0), BTreeMap::new()),
        };

        let log = LogStore::open(&dir, snapshot_meta.0)?;
        // membership entries in the unsnapshotted tail are effective
        let mut voters = voters;
        for index in log.first_index()..=log.last_index() {
            if let Some(Entry { payload: EntryPayload::Membership(set), .. }) = log.get(index) {
                voters = set.clone();
            }
        }

        let mut node = Node {
            config,
            fsm,
            log,
            stable,
            snapshots,
            hard,
            snapshot,
            snapshot_meta,
            voters,
            role: Role::Follower,
            leader: None,
            votes: HashSet::new(),
            commit_index: snapshot_meta.0,
            applied_index: snapshot_meta.0,
            election_deadline: Instant::now(),
            last_heartbeat: Instant::now(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            in_flight: HashMap::new(),
            pending: BTreeMap::new(),
            events,
            leader_tx,
            role_flag,
        };
        node.reset_election_deadline();
        Ok(node)
    }

    fn run(&mut self, events: Receiver<Event>) {
        tracing::info!(id = %self.config.id, addr = %self.config.addr, "raft node started");
        while let Ok(event) = events.recv() {
            match event {
                Event::Tick => self.tick(),
                Event::Message(message, reply) => {
                    let response = self.handle_message(message);
                    let _ = reply.send(response);
                }
                Event::PeerReply(message) => self.handle_peer_reply(message),
                Event::Apply { command, reply } => self.handle_apply(command, reply),
                Event::AddVoter { id, addr, reply } => self.handle_add_voter(id, addr, reply),
                Event::RemoveVoter { id, reply } => self.handle_remove_voter(id, reply),
                Event::Bootstrap { servers, reply } => {
                    let _ = reply.send(self.handle_bootstrap(servers));
                }
                Event::Shutdown => break,
            }
        }
        self.fail_pending(Error::Shutdown);
        tracing::info!(id = %self.config.id, "raft node stopped");
    }

    fn quorum(&self) -> usize {
        self.voters.len() / 2 + 1
    }

    fn last_log_term(&self) -> Term {
        self.log.term_of(self.log.last_index()).unwrap_or(self.snapshot_meta.1)
    }

    fn term_at(&self, index: LogIndex) -> Term {
        if index == 0 {
            return 0;
        }
        if index == self.snapshot_meta.0 {
            return self.snapshot_meta.1;
        }
        self.log.term_of(index).unwrap_or(0)
    }

    fn reset_election_deadline(&mut self) {
        let min = self.config.election_timeout_min.as_millis() as u64;
        let max = self.config.election_timeout_max.as_millis() as u64;
        let timeout = rand::thread_rng().gen_range(min..=max.max(min + 1));
        self.election_deadline = Instant::now() + Duration::from_millis(timeout);
    }

    fn set_role(&mut self, role: Role) {
        if self.role == Role::Leader && role != Role::Leader {
            self.fail_pending(Error::NotLeader);
        }
        self.role = role;
        self.role_flag.store(role.as_u8(), Ordering::SeqCst);
    }

    fn fail_pending(&mut self, err: Error) {
        for (_, pending) in std::mem::take(&mut self.pending) {
            pending.fail(err.clone());
        }
    }

    fn persist_hard_state(&mut self) -> Result<(), Error> {
        self.stable.save(&self.hard)
    }

    fn emit_leader_event(&self, is_self: bool) {
        let _ = self.leader_tx.send(LeaderEvent {
            term: self.hard.term,
            leader: self.leader.clone(),
            is_self,
        });
    }

    // ---- timers --------------------------------------------------------

    fn tick(&mut self) {
        let now = Instant::now();
        self.in_flight.retain(|_, started| now.duration_since(*started) < IN_FLIGHT_STALE);

        match self.role {
            Role::Leader => {
                if now.duration_since(self.last_heartbeat) >= self.config.heartbeat_interval {
                    self.broadcast_append();
                }
            }
            Role::Follower | Role::Candidate => {
                if now >= self.election_deadline
                    && !self.voters.is_empty()
                    && self.voters.contains_key(&self.config.id)
                {
                    self.start_election();
                }
            }
        }
    }

    fn start_election(&mut self) {
        self.hard.term += 1;
        self.hard.voted_for = Some(self.config.id.clone());
        if let Err(err) = self.persist_hard_state() {
            tracing::error!(%err, "failed to persist vote");
            return;
        }
        self.set_role(Role::Candidate);
        self.leader = None;
        self.votes = HashSet::from([self.config.id.clone()]);
        self.reset_election_deadline();
        tracing::debug!(id = %self.config.id, term = self.hard.term, "starting election");

        if self.votes.len() >= self.quorum() {
            self.become_leader();
            return;
        }

        let request = Message::RequestVote {
            term: self.hard.term,
            candidate: self.config.id.clone(),
            last_log_index: self.log.last_index(),
            last_log_term: self.last_log_term(),
        };
        for (peer, addr) in self.voters.clone() {
            if peer == self.config.id {
                continue;
            }
            self.send_to_peer(&addr, request.clone());
        }
    }

    fn become_leader(&mut self) {
        self.set_role(Role::Leader);
        self.leader = Some(self.config.id.clone());
        self.votes.clear();
        self.next_index.clear();
        self.match_index.clear();
        let next = self.log.last_index() + 1;
        for peer in self.voters.keys() {
            if peer != &self.config.id {
                self.next_index.insert(peer.clone(), next);
                self.match_index.insert(peer.clone(), 0);
            }
        }
        tracing::info!(id = %self.config.id, term = self.hard.term, "became leader");

        // committing a no-op of the new term commits the previous tail
        let entry = Entry {
            index: self.log.last_index() + 1,
            term: self.hard.term,
            payload: EntryPayload::Noop,
        };
        if let Err(err) = self.log.append(&[entry]) {
            tracing::error!(%err, "failed to append no-op entry");
        }
        self.emit_leader_event(true);
        self.broadcast_append();
        self.advance_commit();
    }

    fn become_follower(&mut self, term: Term, leader: Option<NodeId>) {
        let leader_changed = leader.is_some() && self.leader != leader;
        if term > self.hard.term {
            self.hard.term = term;
            self.hard.voted_for = None;
            if let Err(err) = self.persist_hard_state() {
                tracing::error!(%err, "failed to persist term");
            }
        }
        self.set_role(Role::Follower);
        if leader.is_some() {
            self.leader = leader;
        }
        if leader_changed {
            self.emit_leader_event(false);
        }
    }

    // ---- replication ---------------------------------------------------

    fn broadcast_append(&mut self) {
        self.last_heartbeat = Instant::now();
        for peer in self.voters.keys().cloned().collect::<Vec<_>>() {
            if peer != self.config.id {
                self.send_append_to(&peer);
            }
        }
    }

    fn send_append_to(&mut self, peer: &NodeId) {
        let Some(addr) = self.voters.get(peer).cloned() else { return };
        if self.in_flight.contains_key(peer) {
            return;
        }

        let next = *self.next_index.entry(peer.clone()).or_insert(self.log.last_index() + 1);
        let message = if next < self.log.first_index() {
            match &self.snapshot {
                Some(snapshot) => Message::InstallSnapshot {
                    term: self.hard.term,
                    leader: self.config.id.clone(),
                    snapshot: snapshot.clone(),
                },
                None => return,
            }
        } else {
            let prev = next - 1;
            Message::AppendEntries {
                term: self.hard.term,
                leader: self.config.id.clone(),
                prev_log_index: prev,
                prev_log_term: self.term_at(prev),
                entries: self.log.entries_from(next, MAX_APPEND_BATCH),
                leader_commit: self.commit_index,
            }
        };
        self.in_flight.insert(peer.clone(), Instant::now());
        self.send_to_peer(&addr, message);
    }

    fn send_to_peer(&self, addr: &str, message: Message) {
        let events = self.events.clone();
        let addr = addr.to_string();
        thread::spawn(move || {
            if let Ok(reply) = transport::call(&addr, message, RPC_TIMEOUT) {
                let _ = events.send(Event::PeerReply(reply));
            }
        });
    }

    fn advance_commit(&mut self) {
        if self.role != Role::Leader {
            return;
        }
        let mut indices: Vec<LogIndex> = self
            .voters
            .keys()
            .map(|peer| {
                if peer == &self.config.id {
                    self.log.last_index()
                } else {
                    self.match_index.get(peer).copied().unwrap_or(0)
                }
            })
            .collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));
        let quorum_index = indices[self.quorum() - 1];

        // only entries of the current term are committed by counting
        if quorum_index > self.commit_index && self.term_at(quorum_index) == self.hard.term {
            self.commit_index = quorum_index;
            self.apply_committed();
        }
    }

    fn apply_committed(&mut self) {
        while self.applied_index < self.commit_index {
            let index = self.applied_index + 1;
            let Some(entry) = self.log.get(index).cloned() else { break };
            let response = match &entry.payload {
                EntryPayload::Noop => Vec::new(),
                EntryPayload::Command(command) => self.fsm.apply(command),
                EntryPayload::Membership(set) => {
                    self.voters = set.clone();
                    if !self.voters.contains_key(&self.config.id) && self.role == Role::Leader {
                        tracing::info!(id = %self.config.id, "removed from cluster, stepping down");
                        self.set_role(Role::Follower);
                    }
                    Vec::new()
                }
            };
            self.applied_index = index;
            if let Some(pending) = self.pending.remove(&index) {
                pending.ok(response);
            }
        }
        self.maybe_snapshot();
    }

    fn maybe_snapshot(&mut self) {
        if self.applied_index < self.snapshot_meta.0 + self.config.snapshot_threshold {
            return;
        }
        let snapshot = Snapshot {
            last_index: self.applied_index,
            last_term: self.term_at(self.applied_index),
            voters: self.voters.clone(),
            data: self.fsm.snapshot(),
        };
        if let Err(err) = self.snapshots.save(&snapshot) {
            tracing::error!(%err, "failed to persist snapshot");
            return;
        }
        if let Err(err) = self.log.compact_to(snapshot.last_index) {
            tracing::error!(%err, "failed to compact log");
            return;
        }
        self.snapshot_meta = (snapshot.last_index, snapshot.last_term);
        self.snapshot = Some(snapshot);
        tracing::info!(index = self.snapshot_meta.0, "took snapshot and compacted log");
    }

    // ---- client operations ---------------------------------------------

    fn handle_apply(&mut self, command: Vec<u8>, reply: Sender<Result<Vec<u8>, Error>>) {
        if self.role != Role::Leader {
            let _ = reply.send(Err(Error::NotLeader));
            return;
        }
        let entry = Entry {
            index: self.log.last_index() + 1,
            term: self.hard.term,
            payload: EntryPayload::Command(command),
        };
        if let Err(err) = self.log.append(std::slice::from_ref(&entry)) {
            let _ = reply.send(Err(err));
            return;
        }
        self.pending.insert(entry.index, PendingReply::Apply(reply));
        self.broadcast_append();
        self.advance_commit();
    }

    fn handle_add_voter(&mut self, id: NodeId, addr: String, reply: Sender<Result<(), Error>>) {
        if self.role != Role::Leader {
            let _ = reply.send(Err(Error::NotLeader));
            return;
        }
        if self.voters.get(&id) == Some(&addr) {
            let _ = reply.send(Ok(()));
            return;
        }
        let mut voters = self.voters.clone();
        voters.insert(id.clone(), addr);
        self.append_membership(voters, reply);
        self.next_index.insert(id.clone(), 1);
        self.match_index.insert(id, 0);
    }

    fn handle_remove_voter(&mut self, id: NodeId, reply: Sender<Result<(), Error>>) {
        if self.role != Role::Leader {
            let _ = reply.send(Err(Error::NotLeader));
            return;
        }
        if !self.voters.contains_key(&id) {
            let _ = reply.send(Ok(()));
            return;
        }
        let mut voters = self.voters.clone();
        voters.remove(&id);
        self.append_membership(voters, reply);
        self.next_index.remove(&id);
        self.match_index.remove(&id);
    }

    fn append_membership(
        &mut self,
        voters: BTreeMap<NodeId, String>,
        reply: Sender<Result<(), Error>>,
    ) {
        let entry = Entry {
            index: self.log.last_index() + 1,
            term: self.hard.term,
            payload: EntryPayload::Membership(voters.clone()),
        };
        if let Err(err) = self.log.append(std::slice::from_ref(&entry)) {
            let _ = reply.send(Err(err));
            return;
        }
        // membership is effective as soon as it is appended
        self.voters = voters;
        self.pending.insert(entry.index, PendingReply::Confirm(reply));
        self.broadcast_append();
        self.advance_commit();
    }

    fn handle_bootstrap(&mut self, servers: Vec<(NodeId, String)>) -> Result<(), Error> {
        if self.log.last_index() > 0 || self.snapshots.exists() {
            return Err(Error::AlreadyBootstrapped);
        }
        let voters: BTreeMap<NodeId, String> = servers.into_iter().collect();
        let entry = Entry {
            index: 1,
            term: self.hard.term,
            payload: EntryPayload::Membership(voters.clone()),
        };
        self.log.append(std::slice::from_ref(&entry))?;
        self.voters = voters;
        self.reset_election_deadline();
        tracing::info!(id = %self.config.id, voters = self.voters.len(), "bootstrapped cluster");
        Ok(())
    }

    // ---- peer messages -------------------------------------------------

    fn handle_message(&mut self, message: Message) -> Message {
        match message {
            Message::RequestVote { term, candidate, last_log_index, last_log_term } => {
                self.handle_request_vote(term, candidate, last_log_index, last_log_term)
            }
            Message::AppendEntries {
                term,
                leader,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => self.handle_append_entries(
                term,
                leader,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            ),
            Message::InstallSnapshot { term, leader, snapshot } => {
                self.handle_install_snapshot(term, leader, snapshot)
            }
            // responses arriving on the server path are routed like replies
            other => {
                self.handle_peer_reply(other);
                Message::AppendEntriesResponse {
                    term: self.hard.term,
                    follower: self.config.id.clone(),
                    success: false,
                    match_index: 0,
                }
            }
        }
    }

    fn handle_request_vote(
        &mut self,
        term: Term,
        candidate: NodeId,
        last_log_index: LogIndex,
        last_log_term: Term,
    ) -> Message {
        if term > self.hard.term {
            self.become_follower(term, None);
        }

        let mut granted = false;
        if term == self.hard.term {
            let up_to_date = (last_log_term, last_log_index)
                >= (self.last_log_term(), self.log.last_index());
            let free_to_vote = match &self.hard.voted_for {
                None => true,
                Some(voted) => voted == &candidate,
            };
            if up_to_date && free_to_vote {
                granted = true;
                self.hard.voted_for = Some(candidate.clone());
                if let Err(err) = self.persist_hard_state() {
                    tracing::error!(%err, "failed to persist vote");
                    granted = false;
                }
                self.reset_election_deadline();
            }
        }
        tracing::debug!(id = %self.config.id, %candidate, term, granted, "vote requested");
        Message::RequestVoteResponse {
            term: self.hard.term,
            voter: self.config.id.clone(),
            granted,
        }
    }

    fn handle_append_entries(
        &mut self,
        term: Term,
        leader: NodeId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<Entry>,
        leader_commit: LogIndex,
    ) -> Message {
        let failure = |node: &Node| Message::AppendEntriesResponse {
            term: node.hard.term,
            follower: node.config.id.clone(),
            success: false,
            match_index: 0,
        };

        if term < self.hard.term {
            return failure(self);
        }
        self.become_follower(term, Some(leader));
        self.reset_election_deadline();

        let consistent = if prev_log_index == 0 {
            true
        } else if prev_log_index == self.snapshot_meta.0 {
            prev_log_term == self.snapshot_meta.1
        } else {
            self.log.term_of(prev_log_index) == Some(prev_log_term)
        };
        if !consistent {
            return failure(self);
        }

        let match_index = prev_log_index + entries.len() as u64;
        let mut to_append = Vec::new();
        for entry in entries {
            match self.log.term_of(entry.index) {
                Some(existing) if existing == entry.term => continue,
                Some(_) => {
                    // conflicting suffix from a deposed leader
                    if let Err(err) = self.log.truncate_from(entry.index) {
                        tracing::error!(%err, "failed to truncate conflicting entries");
                        return failure(self);
                    }
                    to_append.push(entry);
                }
                None => {
                    if entry.index <= self.snapshot_meta.0 {
                        continue;
                    }
                    to_append.push(entry);
                }
            }
        }
        for entry in &to_append {
            if let EntryPayload::Membership(set) = &entry.payload {
                self.voters = set.clone();
            }
        }
        if let Err(err) = self.log.append(&to_append) {
            tracing::error!(%err, "failed to append entries");
            return failure(self);
        }

        if leader_commit > self.commit_index {
            self.commit_index = leader_commit.min(self.log.last_index());
            self.apply_committed();
        }

        Message::AppendEntriesResponse {
            term: self.hard.term,
            follower: self.config.id.clone(),
            success: true,
            match_index,
        }
    }

    fn handle_install_snapshot(&mut self, term: Term, leader: NodeId, snapshot: Snapshot) -> Message {
        if term < self.hard.term {
            return Message::InstallSnapshotResponse {
                term: self.hard.term,
                follower: self.config.id.clone(),
                last_index: 0,
            };
        }
        self.become_follower(term, Some(leader));
        self.reset_election_deadline();

        if let Err(err) = self.fsm.restore(&snapshot.data) {
            tracing::error!(%err, "failed to restore snapshot");
            return Message::InstallSnapshotResponse {
                term: self.hard.term,
                follower: self.config.id.clone(),
                last_index: 0,
            };
        }
        if let Err(err) = self.snapshots.save(&snapshot) {
            tracing::error!(%err, "failed to persist installed snapshot");
        }
        let _ = self.log.truncate_from(snapshot.last_index + 1);
        let _ = self.log.compact_to(snapshot.last_index);
        self.voters = snapshot.voters.clone();
        self.snapshot_meta = (snapshot.last_index, snapshot.last_term);
        self.commit_index = snapshot.last_index;
        self.applied_index = snapshot.last_index;
        let last_index = snapshot.last_index;
        self.snapshot = Some(snapshot);
        tracing::info!(last_index, "installed snapshot from leader");

        Message::InstallSnapshotResponse {
            term: self.hard.term,
            follower: self.config.id.clone(),
            last_index,
        }
    }

    fn handle_peer_reply(&mut self, message: Message) {
        match message {
            Message::RequestVoteResponse { term, voter, granted } => {
                if term > self.hard.term {
                    self.become_follower(term, None);
                    return;
                }
                if self.role == Role::Candidate
                    && term == self.hard.term
                    && granted
                    && self.voters.contains_key(&voter)
                {
                    self.votes.insert(voter);
                    if self.votes.len() >= self.quorum() {
                        self.become_leader();
                    }
                }
            }
            Message::AppendEntriesResponse { term, follower, success, match_index } => {
                if term > self.hard.term {
                    self.become_follower(term, None);
                    return;
                }
                if self.role != Role::Leader {
                    return;
                }
                self.in_flight.remove(&follower);
                if success {
                    let matched = self.match_index.entry(follower.clone()).or_insert(0);
                    *matched = (*matched).max(match_index);
                    self.next_index.insert(follower.clone(), *matched + 1);
                    self.advance_commit();
                    // keep the pipe full when the follower is behind
                    if self.next_index.get(&follower).copied().unwrap_or(0)
                        <= self.log.last_index()
                    {
                        self.send_append_to(&follower);
                    }
                } else {
                    let next = self.next_index.entry(follower.clone()).or_insert(1);
                    *next = next.saturating_sub(1).max(1);
                    self.send_append_to(&follower);
                }
            }
            Message::InstallSnapshotResponse { term, follower, last_index } => {
                if term > self.hard.term {
                    self.become_follower(term, None);
                    return;
                }
                if self.role != Role::Leader || last_index == 0 {
                    self.in_flight.remove(&follower);
                    return;
                }
                self.in_flight.remove(&follower);
                self.match_index.insert(follower.clone(), last_index);
                self.next_index.insert(follower, last_index + 1);
                self.advance_commit();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::Mutex;

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Default, Serialize, Deserialize)]
    struct AppendOnly {
        commands: Vec<Vec<u8>>,
    }

    #[derive(Default)]
    struct AppendOnlyFsm {
        state: Mutex<AppendOnly>,
    }

    impl AppendOnlyFsm {
        fn commands(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().commands.clone()
        }
    }

    impl StateMachine for AppendOnlyFsm {
        fn apply(&self, command: &[u8]) -> Vec<u8> {
            let mut state = self.state.lock().unwrap();
            state.commands.push(command.to_vec());
            command.to_vec()
        }

        fn snapshot(&self) -> Vec<u8> {
            serde_json::to_vec(&*self.state.lock().unwrap()).unwrap()
        }

        fn restore(&self, snapshot: &[u8]) -> Result<(), Error> {
            let restored: AppendOnly =
                serde_json::from_slice(snapshot).map_err(Error::storage)?;
            *self.state.lock().unwrap() = restored;
            Ok(())
        }
    }

    fn free_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        format!("127.0.0.1:{}", addr.port())
    }

    fn fast_config(id: &str, addr: &str, dir: &std::path::Path) -> Config {
        let mut config = Config::new(id, addr, dir);
        config.heartbeat_interval = Duration::from_millis(50);
        config.election_timeout_min = Duration::from_millis(150);
        config.election_timeout_max = Duration::from_millis(300);
        config
    }

    fn wait_for<F: Fn() -> bool>(what: &str, timeout: Duration, check: F) {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn single_node_elects_itself_and_applies() {
        let tmp = tempfile::tempdir().unwrap();
        let addr = free_addr();
        let fsm = Arc::new(AppendOnlyFsm::default());
        let node =
            RaftNode::start(fast_config("n1", &addr, tmp.path()), fsm.clone()).unwrap();
        let leader_events = node.leader_events();

        node.bootstrap(vec![("n1".to_string(), addr.clone())]).unwrap();
        wait_for("self election", Duration::from_secs(5), || node.is_leader());

        let response = node.apply(b"hello".to_vec(), Duration::from_secs(1)).unwrap();
        assert_eq!(response, b"hello");
        assert_eq!(fsm.commands(), vec![b"hello".to_vec()]);

        let event = leader_events.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(event.is_self);
        assert_eq!(event.leader.as_deref(), Some("n1"));

        // double bootstrap is rejected
        assert_eq!(
            node.bootstrap(vec![("n1".to_string(), addr)]).unwrap_err(),
            Error::AlreadyBootstrapped
        );
        node.shutdown();
    }

    #[test]
    fn log_replays_into_the_state_machine_after_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let addr = free_addr();

        let fsm = Arc::new(AppendOnlyFsm::default());
        let node = RaftNode::start(fast_config("n1", &addr, tmp.path()), fsm.clone()).unwrap();
        node.bootstrap(vec![("n1".to_string(), addr.clone())]).unwrap();
        wait_for("election", Duration::from_secs(5), || node.is_leader());
        node.apply(b"one".to_vec(), Duration::from_secs(1)).unwrap();
        node.apply(b"two".to_vec(), Duration::from_secs(1)).unwrap();
        node.shutdown();

        // a single node never dials peers, so a fresh port is fine
        let addr = free_addr();
        let fsm = Arc::new(AppendOnlyFsm::default());
        let node = RaftNode::start(fast_config("n1", &addr, tmp.path()), fsm.clone()).unwrap();
        wait_for("re-election", Duration::from_secs(5), || node.is_leader());
        wait_for("replay", Duration::from_secs(5), || fsm.commands().len() == 2);
        assert_eq!(fsm.commands(), vec![b"one".to_vec(), b"two".to_vec()]);
        node.shutdown();
    }

    #[test]
    fn three_nodes_replicate_and_reject_non_leader_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let addrs: Vec<String> = (0..3).map(|_| free_addr()).collect();
        let servers: Vec<(NodeId, String)> = (0..3)
            .map(|i| (format!("n{}", i + 1), addrs[i].clone()))
            .collect();

        let fsms: Vec<Arc<AppendOnlyFsm>> =
            (0..3).map(|_| Arc::new(AppendOnlyFsm::default())).collect();
        let nodes: Vec<RaftNode> = (0..3)
            .map(|i| {
                let config = fast_config(&servers[i].0, &addrs[i], tmp.path());
                RaftNode::start(config, fsms[i].clone()).unwrap()
            })
            .collect();
        for node in &nodes {
            node.bootstrap(servers.clone()).unwrap();
        }

        wait_for("leader election", Duration::from_secs(10), || {
            nodes.iter().filter(|node| node.is_leader()).count() == 1
        });
        let leader = nodes.iter().position(|node| node.is_leader()).unwrap();
        let follower = (leader + 1) % 3;

        assert_eq!(
            nodes[follower]
                .apply(b"nope".to_vec(), Duration::from_secs(1))
                .unwrap_err(),
            Error::NotLeader
        );

        nodes[leader].apply(b"a".to_vec(), Duration::from_secs(2)).unwrap();
        nodes[leader].apply(b"b".to_vec(), Duration::from_secs(2)).unwrap();

        wait_for("replication to all nodes", Duration::from_secs(10), || {
            fsms.iter().all(|fsm| fsm.commands() == vec![b"a".to_vec(), b"b".to_vec()])
        });

        for node in nodes {
            node.shutdown();
        }
    }

    #[test]
    fn snapshot_threshold_compacts_the_log() {
        let tmp = tempfile::tempdir().unwrap();
        let addr = free_addr();
        let fsm = Arc::new(AppendOnlyFsm::default());
        let mut config = fast_config("n1", &addr, tmp.path());
        config.snapshot_threshold = 8;
        let node = RaftNode::start(config, fsm.clone()).unwrap();
        node.bootstrap(vec![("n1".to_string(), addr.clone())]).unwrap();
        wait_for("election", Duration::from_secs(5), || node.is_leader());

        for i in 0..16u8 {
            node.apply(vec![i], Duration::from_secs(1)).unwrap();
        }
        node.shutdown();

        // restart recovers from the snapshot plus the remaining tail
        let addr = free_addr();
        let fsm = Arc::new(AppendOnlyFsm::default());
        let node = RaftNode::start(fast_config("n1", &addr, tmp.path()), fsm.clone()).unwrap();
        wait_for("re-election", Duration::from_secs(5), || node.is_leader());
        wait_for("recovery", Duration::from_secs(5), || fsm.commands().len() == 16);
        node.shutdown();
    }

    #[test]
    fn a_joined_voter_catches_up() {
        let tmp = tempfile::tempdir().unwrap();
        let addr1 = free_addr();
        let addr2 = free_addr();

        let fsm1 = Arc::new(AppendOnlyFsm::default());
        let node1 = RaftNode::start(fast_config("n1", &addr1, tmp.path()), fsm1.clone()).unwrap();
        node1.bootstrap(vec![("n1".to_string(), addr1.clone())]).unwrap();
        wait_for("election", Duration::from_secs(5), || node1.is_leader());
        node1.apply(b"before".to_vec(), Duration::from_secs(1)).unwrap();

        let fsm2 = Arc::new(AppendOnlyFsm::default());
        let node2 = RaftNode::start(fast_config("n2", &addr2, tmp.path()), fsm2.clone()).unwrap();
        node1.add_voter("n2", &addr2).unwrap();

        node1.apply(b"after".to_vec(), Duration::from_secs(2)).unwrap();
        wait_for("catch-up", Duration::from_secs(10), || {
            fsm2.commands() == vec![b"before".to_vec(), b"after".to_vec()]
        });

        node1.shutdown();
        node2.shutdown();
    }
}
