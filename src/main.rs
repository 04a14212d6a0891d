use std::sync::Arc;

use anyhow::Context;
use quarry_db::{server::Server, Config, OpContext, StorageEngine};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    let engine = StorageEngine::open(config.clone())
        .with_context(|| format!("failed to open data directory {}", config.data_dir.display()))?;

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = Arc::new(Server::new(Arc::clone(engine.executor()), config.op_timeout));
    let serving = tokio::spawn(server.serve(listener, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("received ctrl-c");
    shutdown_tx.send(()).ok();

    match serving.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "server stopped with an error"),
        Err(err) => error!(error = %err, "server task failed"),
    }

    engine
        .checkpoint(&OpContext::background())
        .context("final checkpoint failed")?;
    Ok(())
}
