mod config;
mod connection;
mod error;
mod protocol;
mod pubsub;
mod replication;
mod server;
mod shutdown;
mod store;
mod transaction;
mod waiter;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use config::Config;
use replication::{run_replica_link, ReplicationRole, ReplicationState};
use server::Server;
use shutdown::ShutdownSignal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Arc::new(Config::from_args(&args).context("parsing command-line configuration")?);

    let role = match config.replicaof() {
        Some(binding) => ReplicationRole::Replica(binding),
        None => ReplicationRole::Master,
    };
    let replicaof = match &role {
        ReplicationRole::Replica(b) => Some(b.clone()),
        ReplicationRole::Master => None,
    };
    let replication = Arc::new(ReplicationState::new(role));

    let server = Arc::new(Server::new(config.clone(), replication.clone()));

    let shutdown = ShutdownSignal::new();
    shutdown.install_os_signal_handlers();

    if let Some(master) = replicaof {
        let executor: Arc<dyn transaction::CommandExecutor> = server.clone();
        let replication = replication.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_replica_link(master, config, executor, replication, shutdown).await;
        });
    }

    let listener = TcpListener::bind(("127.0.0.1", config.port()))
        .await
        .with_context(|| format!("binding to port {}", config.port()))?;
    tracing::info!("listening on 127.0.0.1:{}", config.port());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, addr) = accepted.context("accepting connection")?;
                tracing::debug!("accepted connection from {addr}");
                let server = server.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    connection::handle_client(socket, server, shutdown).await;
                });
            }
            _ = shutdown.triggered() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
