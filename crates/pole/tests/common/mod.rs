#![allow(dead_code)]

use std::net::TcpListener;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use pole::catalog::CatalogStateMachine;
use pole::engine::{ExecOutcome, SelectResponse};
use pole::{rpc, spawn_leader_watcher, Engine};
use pole_raft::{Config, RaftNode, StateMachine};
use pole_types::Catalog;

pub struct TestNode {
    pub id: String,
    pub engine: Engine,
    pub raft: RaftNode,
    pub rpc_server: rpc::RpcServer,
    pub rpc_addr: String,
    pub raft_addr: String,
}

pub fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    format!("127.0.0.1:{port}")
}

/// Assemble one node the way `setup_pole` does, with test-friendly
/// timeouts and freshly picked ports.
pub fn start_node(
    id: &str,
    index_uri: &str,
    raft_data_dir: &Path,
    bootstrap: bool,
    join: Option<&str>,
) -> TestNode {
    let raft_addr = free_addr();
    let rpc_addr = free_addr();

    let catalog = Arc::new(RwLock::new(Catalog::default()));
    let fsm: Arc<dyn StateMachine> = Arc::new(CatalogStateMachine::new(catalog.clone()));

    let mut config = Config::new(id, raft_addr.clone(), raft_data_dir);
    config.heartbeat_interval = Duration::from_millis(50);
    config.election_timeout_min = Duration::from_millis(150);
    config.election_timeout_max = Duration::from_millis(300);
    let raft = RaftNode::start(config, fsm).unwrap();

    if bootstrap {
        match raft.bootstrap(vec![(id.to_string(), raft_addr.clone())]) {
            Ok(()) | Err(pole_raft::Error::AlreadyBootstrapped) => {}
            Err(err) => panic!("bootstrap failed: {err}"),
        }
    }

    let engine = Engine::new(index_uri, catalog, raft.clone());
    let rpc_server = rpc::serve(&rpc_addr, engine.clone(), raft.clone()).unwrap();
    spawn_leader_watcher(raft.clone(), rpc_addr.clone());

    if let Some(peer) = join {
        rpc::client::join(peer, id, &raft_addr).unwrap();
    }

    TestNode { id: id.to_string(), engine, raft, rpc_server, rpc_addr, raft_addr }
}

impl TestNode {
    /// Wait until this node is the leader and has advertised its RPC
    /// address through the catalog.
    pub fn wait_for_leadership(&self) {
        wait_until("leadership", Duration::from_secs(10), || {
            self.raft.is_leader() && !self.engine.mapping().leader_rpc_addr.is_empty()
        });
    }

    /// Ordered stop, mirroring the daemon's shutdown path.
    pub fn shutdown(&self) {
        self.rpc_server.shutdown();
        self.engine.close();
        self.raft.shutdown();
    }
}

pub fn wait_until<F: Fn() -> bool>(what: &str, timeout: Duration, check: F) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for {what}");
}

pub fn select(engine: &Engine, sql: &str) -> SelectResponse {
    match engine.exec(sql).unwrap() {
        ExecOutcome::Select(response) => response,
        other => panic!("expected a select response, got {other:?}"),
    }
}

pub fn hit_ids(response: &SelectResponse) -> Vec<String> {
    response.hits.hits.iter().map(|hit| hit.id.clone()).collect()
}
