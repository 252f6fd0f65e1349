use std::thread;
use std::time::Duration;

use ductile::connect_channel;

use super::{RpcRequest, RpcResponse};
use crate::error::Error;

/// Forwarded statements may carry a whole batch; give them room.
const EXEC_TIMEOUT: Duration = Duration::from_secs(5);
/// Lock traffic is a single consensus round.
const LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const MEMBERSHIP_TIMEOUT: Duration = Duration::from_secs(10);

pub fn exec(addr: &str, sql: &str) -> Result<(), Error> {
    call(addr, RpcRequest::Exec { sql: sql.to_string() }, EXEC_TIMEOUT)?.into_result()
}

pub fn lock(addr: &str, uri: &str) -> Result<(), Error> {
    call(addr, RpcRequest::Lock { uri: uri.to_string() }, LOCK_TIMEOUT)?.into_result()
}

pub fn unlock(addr: &str, uri: &str) -> Result<(), Error> {
    call(addr, RpcRequest::Unlock { uri: uri.to_string() }, LOCK_TIMEOUT)?.into_result()
}

pub fn join(addr: &str, id: &str, raft_addr: &str) -> Result<(), Error> {
    call(
        addr,
        RpcRequest::Join { id: id.to_string(), raft_addr: raft_addr.to_string() },
        MEMBERSHIP_TIMEOUT,
    )?
    .into_result()
}

pub fn leave(addr: &str, id: &str) -> Result<(), Error> {
    call(addr, RpcRequest::Leave { id: id.to_string() }, MEMBERSHIP_TIMEOUT)?.into_result()
}

/// One request/response exchange, bounded by `timeout` end to end.
fn call(addr: &str, request: RpcRequest, timeout: Duration) -> Result<RpcResponse, Error> {
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let target = addr.to_string();
    thread::spawn(move || {
        let outcome = exchange(&target, request);
        let _ = done_tx.send(outcome);
    });
    done_rx
        .recv_timeout(timeout)
        .map_err(|_| Error::Rpc(format!("request to {addr} timed out")))?
}

fn exchange(addr: &str, request: RpcRequest) -> Result<RpcResponse, Error> {
    let (sender, receiver) =
        connect_channel::<_, RpcRequest, RpcResponse>(addr).map_err(|err| Error::Rpc(err.to_string()))?;
    sender.send(request).map_err(|err| Error::Rpc(err.to_string()))?;
    receiver.recv().map_err(|err| Error::Rpc(err.to_string()))
}
