use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use buzzline_common::protocol::ServerMessage;

use crate::arbitrator::Arbitrator;
use crate::connection;
use crate::hub::HubHandle;
use crate::store::{MemoryRoomStore, MemorySessionStore, QuestionStore, RoomStore, SessionStore};

/// Time given to writer tasks to flush the shutdown notice.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_connections: usize,
    /// Bound on each connection's outbound queue; a full queue gets the client evicted.
    pub outbound_capacity: usize,
}

pub struct ServerState {
    pub hub: HubHandle,
    pub arbitrator: Arbitrator,
    pub rooms: Arc<dyn RoomStore>,
    pub questions: Arc<dyn QuestionStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub limits: Limits,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    /// In-memory room and session stores over the given question bank.
    /// Spawns the hub, so this must run inside a tokio runtime.
    pub fn new(questions: Arc<dyn QuestionStore>, limits: Limits) -> Self {
        Self {
            hub: HubHandle::spawn(),
            arbitrator: Arbitrator::new(),
            rooms: Arc::new(MemoryRoomStore::new()),
            questions,
            sessions: Arc::new(MemorySessionStore::new()),
            limits,
        }
    }
}

pub async fn run(addr: SocketAddr, state: SharedState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;

                // Enforce max connections
                let conn_count = state.hub.connection_count().await;
                if conn_count >= state.limits.max_connections {
                    tracing::warn!(
                        "Rejecting connection from {} (max {} reached)",
                        peer_addr,
                        state.limits.max_connections
                    );
                    drop(stream);
                    continue;
                }

                tracing::info!(
                    "New connection from {} ({}/{})",
                    peer_addr,
                    conn_count + 1,
                    state.limits.max_connections
                );

                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = connection::handle_connection(stream, state).await {
                        tracing::warn!("Connection error from {}: {}", peer_addr, e);
                    }
                });
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    tracing::info!("Shutting down");
    state.hub.broadcast_all(&ServerMessage::Notice {
        message: "Server shutting down".into(),
    });
    // Barrier: the notice has been queued to every connection once this returns.
    let remaining = state.hub.connection_count().await;
    tracing::debug!("Notified {} connection(s)", remaining);
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    Ok(())
}
