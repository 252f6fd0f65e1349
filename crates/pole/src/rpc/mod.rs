//! The binary RPC surface between nodes: statement forwarding, the
//! cluster-wide lock operations, and cluster membership. Typed messages
//! over TCP channels, one response per request.

pub mod client;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use ductile::{connect_channel, ChannelServer};
use serde::{Deserialize, Serialize};

use pole_raft::RaftNode;

use crate::engine::Engine;
use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    Exec { sql: String },
    Lock { uri: String },
    Unlock { uri: String },
    Join { id: String, raft_addr: String },
    Leave { id: String },
}

/// `(code, message)`: zero means success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub code: u32,
    pub message: String,
}

impl RpcResponse {
    fn ok() -> RpcResponse {
        RpcResponse { code: 0, message: "success".to_string() }
    }

    fn error(err: impl std::fmt::Display) -> RpcResponse {
        RpcResponse { code: 1, message: err.to_string() }
    }

    pub fn into_result(self) -> Result<(), Error> {
        if self.code == 0 {
            Ok(())
        } else {
            Err(Error::Rpc(self.message))
        }
    }
}

pub struct RpcServer {
    addr: String,
    stopping: Arc<AtomicBool>,
}

/// `ChannelServer` carries a `PhantomData<*const T>` marker that makes it
/// `!Send` even though the only data it actually owns (a `TcpListener`) is
/// safe to move across threads. This wrapper restores `Send` so the accept
/// loop can run on a background thread.
struct SendServer(ChannelServer<RpcResponse, RpcRequest>);
unsafe impl Send for SendServer {}
impl SendServer {
    fn into_inner(self) -> ChannelServer<RpcResponse, RpcRequest> {
        self.0
    }
}

/// Serve the node RPC on `addr`. Every connection gets its own handler
/// thread; requests dispatch into the engine or the consensus node.
pub fn serve(addr: &str, engine: Engine, raft: RaftNode) -> Result<RpcServer, Error> {
    let server: ChannelServer<RpcResponse, RpcRequest> =
        ChannelServer::bind(addr).map_err(|err| Error::Rpc(err.to_string()))?;
    let server = SendServer(server);
    let stopping = Arc::new(AtomicBool::new(false));

    let accept_flag = stopping.clone();
    let bound = addr.to_string();
    thread::spawn(move || {
        let server = server.into_inner();
        for (sender, receiver, peer) in server {
            if accept_flag.load(Ordering::SeqCst) {
                break;
            }
            tracing::debug!(?peer, "rpc connection accepted");
            let engine = engine.clone();
            let raft = raft.clone();
            thread::spawn(move || {
                while let Ok(request) = receiver.recv() {
                    let response = dispatch(&engine, &raft, request);
                    if sender.send(response).is_err() {
                        break;
                    }
                }
            });
        }
        tracing::debug!(addr = %bound, "rpc server stopped");
    });

    Ok(RpcServer { addr: addr.to_string(), stopping })
}

fn dispatch(engine: &Engine, raft: &RaftNode, request: RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::Exec { sql } => match engine.exec(&sql) {
            Ok(_) => RpcResponse::ok(),
            Err(err) => RpcResponse::error(err),
        },
        RpcRequest::Lock { uri } => match engine.lock(&uri) {
            Ok(()) => RpcResponse::ok(),
            Err(err) => RpcResponse::error(err),
        },
        RpcRequest::Unlock { uri } => match engine.unlock(&uri) {
            Ok(()) => RpcResponse::ok(),
            Err(err) => RpcResponse::error(err),
        },
        RpcRequest::Join { id, raft_addr } => match raft.add_voter(id, raft_addr) {
            Ok(()) => RpcResponse::ok(),
            Err(err) => RpcResponse::error(err),
        },
        RpcRequest::Leave { id } => match raft.remove_voter(&id) {
            Ok(()) => RpcResponse::ok(),
            Err(err) => RpcResponse::error(err),
        },
    }
}

impl RpcServer {
    /// Stop accepting new connections and release the port.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = connect_channel::<_, RpcRequest, RpcResponse>(&self.addr);
    }
}
