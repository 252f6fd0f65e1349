//! The pole daemon: a SQL front door over a replicated full-text index.
//!
//! Wiring lives here; the moving parts are [`Engine`] (statement
//! routing), the catalog state machine replicated by `pole-raft`, the
//! binary RPC in [`rpc`], and the actix-web application in [`routes`].

pub mod catalog;
pub mod engine;
pub mod error;
pub mod option;
pub mod routes;
pub mod rpc;

use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use actix_files::Files;
use actix_web::body::MessageBody;
use actix_web::dev::{Server, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::web::Data;
use actix_web::{middleware, App, HttpServer};

use pole_raft::{RaftNode, StateMachine};
use pole_types::{Catalog, Command};

pub use crate::engine::{Engine, ExecOutcome, SelectResponse};
pub use crate::error::Error;
pub use crate::option::Opt;

use crate::catalog::CatalogStateMachine;

/// Assemble the node: replicated catalog, consensus, engine, and the
/// leader-change watcher that advertises this node's RPC address.
pub fn setup_pole(opt: &Opt) -> anyhow::Result<(Engine, RaftNode)> {
    let catalog = Arc::new(RwLock::new(Catalog::default()));
    let fsm: Arc<dyn StateMachine> = Arc::new(CatalogStateMachine::new(catalog.clone()));

    let config = pole_raft::Config::new(
        opt.raft.id.clone(),
        opt.raft.address.clone(),
        opt.raft.data_dir.clone(),
    );
    let raft = RaftNode::start(config, fsm)?;

    if opt.raft.bootstrap {
        match raft.bootstrap(vec![(opt.raft.id.clone(), opt.raft.address.clone())]) {
            Ok(()) => tracing::info!("bootstrapped a new cluster"),
            Err(pole_raft::Error::AlreadyBootstrapped) => {
                tracing::info!("cluster state already exists, skipping bootstrap")
            }
            Err(err) => return Err(err.into()),
        }
    }

    let engine = Engine::new(&opt.index_uri, catalog, raft.clone());
    spawn_leader_watcher(raft.clone(), opt.grpc_addr.clone());

    if let Some(peer) = &opt.join {
        rpc::client::join(peer, &opt.raft.id, &opt.raft.address)
            .map_err(|err| anyhow::anyhow!("joining via {peer} failed: {err}"))?;
        tracing::info!(%peer, "joined the cluster");
    }

    Ok((engine, raft))
}

/// On every election this node wins, advertise its RPC address through
/// the catalog so followers know where to forward writes.
pub fn spawn_leader_watcher(raft: RaftNode, rpc_addr: String) -> thread::JoinHandle<()> {
    let events = raft.leader_events();
    thread::Builder::new()
        .name("leader-watcher".to_string())
        .spawn(move || {
            for event in events.iter() {
                if !event.is_self {
                    continue;
                }
                let command = Command::LeaderChange { rpc_addr: rpc_addr.clone() };
                match raft.apply(command.encode(), Duration::from_secs(1)) {
                    Ok(_) => tracing::info!(term = event.term, %rpc_addr, "advertised leadership"),
                    Err(err) => tracing::error!(%err, "failed to advertise leadership"),
                }
            }
        })
        .expect("spawning the leader watcher never fails")
}

pub fn create_app(
    engine: Data<Engine>,
    opt: Opt,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(engine)
        .configure(routes::configure)
        .service(Files::new("/assets", opt.web_path.join("assets")))
        .service(Files::new("/icons", opt.web_path.join("icons")))
        .service(Files::new("/admin", opt.web_path.clone()).index_file("index.html"))
        .wrap(actix_web::middleware::Compress::default())
        .wrap(middleware::NormalizePath::new(middleware::TrailingSlash::Trim))
}

/// Bind the HTTP front door and hand back the running server.
///
/// Signal handling is disabled on purpose: the daemon owns the shutdown
/// sequence, and HTTP is only stopped once the RPC listener is closed and
/// the node has left the cluster.
pub fn build_http_server(engine: Engine, opt: Opt) -> anyhow::Result<Server> {
    let engine = Data::new(engine);
    let http_addr = opt.http_addr.clone();
    let server = HttpServer::new(move || create_app(engine.clone(), opt.clone()))
        .disable_signals()
        .bind(&http_addr)?
        .run();
    Ok(server)
}
