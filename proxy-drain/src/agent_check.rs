//! Answers HAProxy `agent-check` polls with the registry's view of each proxy.
//!
//! HAProxy connects, sends its configured `agent-send` payload (the proxy's service name)
//! and reads back a single line:
//!   - `maxconn:<max players> <STATE>\r\n` for a known proxy,
//!   - `down\r\n` for a name the registry has never seen.
//!
//! Polls are served one connection at a time. HAProxy polls every few seconds per server,
//! so a single accept loop keeps up easily.
use std::net::SocketAddr;
use std::time;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AgentCheckError;
use crate::metrics::{AGENT_CHECKS, AGENT_CHECK_ERRORS};
use crate::registry::{ProxyHealth, ProxyRegistry};

pub const DEFAULT_AGENT_CHECK_PORT: u16 = 7331;

/// Only the first read of a connection is used as the proxy name.
const READ_BUFFER_SIZE: usize = 1024;

/// Pause after a failed accept, so a persistent failure (e.g. out of file descriptors)
/// does not spin the loop.
const ACCEPT_ERROR_BACKOFF: time::Duration = time::Duration::from_millis(100);

/// Render the agent-check reply for a registry lookup.
pub fn agent_reply(health: Option<ProxyHealth>) -> String {
    match health {
        Some(health) => format!("maxconn:{} {}\r\n", health.max_players, health.state),
        None => "down\r\n".to_owned(),
    }
}

pub struct AgentCheckServer {
    listener: TcpListener,
    registry: ProxyRegistry,
    io_timeout: time::Duration,
}

impl AgentCheckServer {
    pub async fn bind(
        address: &str,
        registry: ProxyRegistry,
        io_timeout: time::Duration,
    ) -> Result<Self, AgentCheckError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|error| AgentCheckError::BindError {
                address: address.to_owned(),
                error,
            })?;

        Ok(Self {
            listener,
            registry,
            io_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AgentCheckError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve polls until `cancel` fires. The socket is closed when this returns.
    pub async fn serve(self, cancel: CancellationToken) {
        match self.listener.local_addr() {
            Ok(address) => info!(%address, "running HAProxy agent-check"),
            Err(err) => warn!(error = %err, "running HAProxy agent-check on unknown address"),
        }

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(connection) => connection,
                Err(err) => {
                    warn!(error = %err, "could not accept agent-check connection");
                    metrics::counter!(AGENT_CHECK_ERRORS).increment(1);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            if let Err(err) = self.handle_connection(stream).await {
                warn!(%peer, error = %err, "agent-check connection failed");
                metrics::counter!(AGENT_CHECK_ERRORS).increment(1);
            }
        }

        info!("agent-check server stopped");
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), AgentCheckError> {
        tokio::time::timeout(self.io_timeout, self.respond(&mut stream))
            .await
            .map_err(|_| AgentCheckError::TimeoutError(self.io_timeout))?
    }

    async fn respond<S>(&self, stream: &mut S) -> Result<(), AgentCheckError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        let read = stream.read(&mut buffer).await?;
        let proxy = String::from_utf8_lossy(&buffer[..read]);

        let health = self.registry.get(&proxy);
        match health {
            Some(health) => {
                debug!(
                    proxy = %proxy,
                    state = %health.state,
                    max_players = health.max_players,
                    "agent-check"
                );
                metrics::counter!(AGENT_CHECKS, "state" => health.state.as_str()).increment(1);
            }
            None => {
                warn!(proxy = %proxy, "agent-check for unknown proxy");
                metrics::counter!(AGENT_CHECKS, "state" => "unknown").increment(1);
            }
        }

        stream.write_all(agent_reply(health).as_bytes()).await?;
        stream.flush().await?;

        // The reply is out; HAProxy often hangs up before we do.
        if let Err(err) = stream.shutdown().await {
            debug!(proxy = %proxy, error = %err, "agent-check peer closed first");
        }
        Ok(())
    }
}

/// Bind and serve the agent-check listener on its own task.
///
/// A bind failure is logged and ends the task without serving; the rest of the process is
/// not affected.
pub fn spawn(
    address: String,
    registry: ProxyRegistry,
    io_timeout: time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match AgentCheckServer::bind(&address, registry, io_timeout).await {
            Ok(server) => server.serve(cancel).await,
            Err(err) => error!(error = %err, "cannot serve HAProxy agent-check, exiting task"),
        }
    })
}
