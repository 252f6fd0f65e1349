use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use ductile::{connect_channel, ChannelServer};

use crate::error::Error;
use crate::message::Message;
use crate::node::Event;

const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// `ChannelServer` carries a `PhantomData<*const T>` marker that makes it
/// `!Send` even though the only data it actually owns (a `TcpListener`) is
/// safe to move across threads. This wrapper restores `Send` so the accept
/// loop can run on a background thread.
struct SendServer(ChannelServer<Message, Message>);
unsafe impl Send for SendServer {}
impl SendServer {
    fn into_inner(self) -> ChannelServer<Message, Message> {
        self.0
    }
}

/// Accept loop on the node's raft address. Each inbound message is routed
/// into the node's event loop with a one-shot reply channel.
pub(crate) struct ServerHandle {
    addr: String,
    stopping: Arc<AtomicBool>,
}

pub(crate) fn serve(addr: &str, events: Sender<Event>) -> Result<ServerHandle, Error> {
    let server: ChannelServer<Message, Message> =
        ChannelServer::bind(addr).map_err(Error::transport)?;
    let server = SendServer(server);
    let stopping = Arc::new(AtomicBool::new(false));

    let accept_flag = stopping.clone();
    let bound = addr.to_string();
    thread::spawn(move || {
        let server = server.into_inner();
        for (sender, receiver, _peer) in server {
            if accept_flag.load(Ordering::SeqCst) {
                break;
            }
            let events = events.clone();
            thread::spawn(move || {
                while let Ok(message) = receiver.recv() {
                    let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
                    if events.send(Event::Message(message, reply_tx)).is_err() {
                        return;
                    }
                    match reply_rx.recv_timeout(REPLY_TIMEOUT) {
                        Ok(reply) => {
                            if sender.send(reply).is_err() {
                                return;
                            }
                        }
                        Err(_) => return,
                    }
                }
            });
        }
        tracing::debug!(addr = %bound, "raft transport stopped");
    });

    Ok(ServerHandle { addr: addr.to_string(), stopping })
}

impl ServerHandle {
    /// Stop accepting. A throwaway connection unblocks the accept loop so
    /// it can observe the flag and release the port.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = connect_channel::<_, Message, Message>(&self.addr);
    }
}

/// One request/response exchange with a peer, bounded by `timeout`.
pub(crate) fn call(addr: &str, message: Message, timeout: Duration) -> Result<Message, Error> {
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let addr = addr.to_string();
    thread::spawn(move || {
        let outcome = exchange(&addr, message);
        let _ = done_tx.send(outcome);
    });
    done_rx.recv_timeout(timeout).map_err(|_| Error::Timeout)?
}

fn exchange(addr: &str, message: Message) -> Result<Message, Error> {
    let (sender, receiver) = connect_channel::<_, Message, Message>(addr).map_err(Error::transport)?;
    sender.send(message).map_err(Error::transport)?;
    receiver.recv().map_err(Error::transport)
}
