mod builder;
mod pserver;
mod server;
mod session;

use std::io;

use comms::specs::{Assignment, ProcessKind, Registration, ShutdownReason};
use log::{debug, error, info, warn};
use scheduler::{Report, SchedulerClient};
use tokio::{
    net::{
        TcpListener,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

pub use builder::ServerBuilder;
pub use pserver::ParameterServer;
pub use server::Server;

use crate::{Result, ServerConfig, ServerErr};

/// Accepts worker connections and hands them to `server` until `cancel` fires.
///
/// # Arguments
/// * `server` - The built parameter server.
/// * `listener` - The bound listener the workers connect to.
/// * `cancel` - Stops accepting and tears the open sessions down.
///
/// # Returns
/// An io error if accepting failed.
pub async fn serve(
    mut server: Box<dyn Server<OwnedReadHalf, OwnedWriteHalf>>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> io::Result<()> {
    let res = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => break Err(e),
                };

                debug!(peer:% = peer; "worker connected");
                let (rx, tx) = stream.into_split();
                let (rx, tx) = comms::channel(rx, tx);
                server.spawn(rx, tx);
            }
            Some(res) = server.join_next() => {
                if let Err(e) = res {
                    warn!("worker session ended with an error: {e}");
                }
            }
        }
    };

    server.shutdown().await;
    res
}

/// Runs a parameter server process from registration to the cluster's shutdown.
///
/// # Arguments
/// * `config` - The settings of this server.
///
/// # Returns
/// Why the cluster shut down, or a `ServerErr` if this server never joined it.
pub async fn run(config: ServerConfig) -> Result<ShutdownReason> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let advertised = format!("{}:{}", config.host, listener.local_addr()?.port());

    let registration = Registration {
        kind: ProcessKind::Server,
        host: config.host.clone(),
        addr: Some(advertised.clone()),
    };

    let client =
        SchedulerClient::register(&config.scheduler_addr, registration, config.retry).await?;
    let &Assignment::Server {
        shard_id,
        num_shards,
        num_workers,
    } = client.assignment()
    else {
        return Err(ServerErr::UnexpectedAssignment(
            client.assignment().member(),
        ));
    };

    info!(
        shard_id = shard_id,
        num_shards = num_shards,
        num_workers = num_workers,
        addr:% = advertised;
        "serving shard"
    );

    let cancel = CancellationToken::new();
    let mut link = client.into_link(config.heartbeat_interval, cancel.clone());

    let (dead_tx, mut dead_rx) = mpsc::unbounded_channel();
    let reporter = link.reporter();
    let forwarder = tokio::spawn(async move {
        while let Some(rank) = dead_rx.recv().await {
            reporter.report(Report::Dead(rank));
        }
    });

    let spec = config.spec(shard_id, num_shards, num_workers);
    let server = ServerBuilder::new().build(spec, dead_tx);

    if let Err(e) = serve(server, listener, cancel.clone()).await {
        error!("parameter server failed: {e}");
        link.report(Report::Failed(e.to_string()));
    }

    let reason = link.wait_shutdown().await;
    info!(reason:% = reason; "cluster shut down");

    forwarder.abort();
    link.close().await;
    Ok(reason)
}
