//! Newline-delimited text protocol over TCP.
//!
//! Every connection is a session. The server greets with `WELCOME quarry_db`
//! and answers each command with one line: `OK`, `OK NO_TX`, a bare value,
//! `k=v,...` for ranges, `NULL` for a miss, or `ERR <message>`. `QUIT` or
//! `EXIT` answers `BYE` and closes. A session's open transaction is aborted
//! when its connection goes away.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::broadcast,
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{
    context::OpContext,
    error::Result,
    executor::{Executor, SessionId},
    parser,
};

pub const GREETING: &str = "WELCOME quarry_db";

pub struct Server {
    executor: Arc<Executor>,
    op_timeout: Duration,
    next_session: AtomicU64,
}

impl Server {
    pub fn new(executor: Arc<Executor>, op_timeout: Duration) -> Self {
        Self {
            executor,
            op_timeout,
            next_session: AtomicU64::new(1),
        }
    }

    /// Accepts connections until `shutdown` fires, then waits for open
    /// connections to finish.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!(addr = %listener.local_addr()?, "listening");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let session = self.next_session.fetch_add(1, Ordering::Relaxed);
                    let server = Arc::clone(&self);
                    let shutdown = shutdown.resubscribe();
                    connections.spawn(async move {
                        server.handle_connection(stream, peer, session, shutdown).await;
                    });
                }
                _ = shutdown.recv() => {
                    info!("shutting down listener");
                    break;
                }
            }
        }

        while connections.join_next().await.is_some() {}
        Ok(())
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        session: SessionId,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        debug!(%peer, session, "connection opened");
        if let Err(err) = self.run_session(stream, session, &mut shutdown).await {
            debug!(%peer, session, error = %err, "connection error");
        }

        let executor = Arc::clone(&self.executor);
        if let Err(err) =
            tokio::task::spawn_blocking(move || executor.close_session(session)).await
        {
            warn!(session, error = %err, "failed to close session");
        }
        debug!(%peer, session, "connection closed");
    }

    async fn run_session(
        &self,
        stream: TcpStream,
        session: SessionId,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(format!("{GREETING}\n").as_bytes()).await?;

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = shutdown.recv() => return Ok(()),
            };
            let Some(line) = line else {
                return Ok(());
            };

            let Some(response) = self.respond(session, &line).await else {
                writer.write_all(b"BYE\n").await?;
                return Ok(());
            };
            if response.is_empty() {
                continue;
            }
            writer.write_all(format!("{response}\n").as_bytes()).await?;
        }
    }

    /// The reply line for one command, `None` when the client asked to quit.
    /// Blank input yields an empty reply that is not sent.
    pub async fn respond(&self, session: SessionId, line: &str) -> Option<String> {
        let command = normalize(line);
        if command.is_empty() {
            return Some(String::new());
        }
        if command.eq_ignore_ascii_case("QUIT") || command.eq_ignore_ascii_case("EXIT") {
            return None;
        }

        let Ok(stmt) = parser::parse(command) else {
            return Some("ERR invalid sql".to_string());
        };

        let executor = Arc::clone(&self.executor);
        let ctx = OpContext::with_timeout(self.op_timeout);
        let outcome =
            tokio::task::spawn_blocking(move || executor.execute(&ctx, session, stmt)).await;

        Some(match outcome {
            Ok(Ok(result)) => result.to_string(),
            Ok(Err(err)) => format!("ERR {err}"),
            Err(err) => format!("ERR {err}"),
        })
    }
}

fn normalize(line: &str) -> &str {
    let line = line.trim();
    line.strip_suffix(';').unwrap_or(line).trim()
}
