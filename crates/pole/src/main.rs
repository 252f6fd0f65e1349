use std::path::PathBuf;
use std::str::FromStr;

use pole::{build_http_server, rpc, setup_pole, Opt};
use tracing::level_filters::LevelFilter;

#[cfg(not(windows))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    try_main().await.inspect_err(|error| {
        tracing::error!(%error);
        let mut current = error.source();
        let mut depth = 0;
        while let Some(source) = current {
            tracing::info!(%source, depth, "Error caused by");
            current = source.source();
            depth += 1;
        }
    })
}

async fn try_main() -> anyhow::Result<()> {
    let (opt, config_read_from) = Opt::try_build()?;
    setup_logging(&opt);

    let (engine, raft) = setup_pole(&opt)?;
    let rpc_server = rpc::serve(&opt.grpc_addr, engine.clone(), raft.clone())?;

    let server = build_http_server(engine.clone(), opt.clone())?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    print_launch_resume(&opt, config_read_from);

    wait_for_shutdown_signal().await;

    // ordered stop: no new RPC, leave the cluster (non-leader), stop
    // HTTP, close writers, stop the consensus worker
    tracing::info!("shutting down");
    rpc_server.shutdown();
    if !raft.is_leader() {
        let leader = engine.mapping().leader_rpc_addr;
        if !leader.is_empty() {
            if let Err(err) = rpc::client::leave(&leader, &opt.raft.id) {
                tracing::warn!(%err, "failed to leave the cluster cleanly");
            }
        }
    }
    server_handle.stop(true).await;
    let _ = server_task.await;
    engine.close();
    raft.shutdown();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("installing the SIGTERM handler never fails");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn setup_logging(opt: &Opt) {
    let level = LevelFilter::from_str(&opt.log_level).unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn print_launch_resume(opt: &Opt, config_read_from: Option<PathBuf>) {
    tracing::info!(
        config = %config_read_from
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "none".to_string()),
        http = %opt.http_addr,
        rpc = %opt.grpc_addr,
        raft = %opt.raft.address,
        node = %opt.raft.id,
        index_uri = %opt.index_uri,
        "pole is ready"
    );
}
