use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use buzzline_common::model::ConnectionId;
use buzzline_common::protocol::{framed_transport, ServerMessage};

use crate::handler::{self, ConnectionContext};
use crate::hub::Connection;
use crate::server::SharedState;

pub async fn handle_connection(stream: TcpStream, state: SharedState) -> anyhow::Result<()> {
    let transport = framed_transport(stream);
    let (mut sink, mut stream) = transport.split();

    // The hub keeps the only sender; dropping it there is what ends the writer.
    let (tx, mut rx) = mpsc::channel::<Bytes>(state.limits.outbound_capacity);
    let mut ctx = ConnectionContext::new(ConnectionId::new());
    let conn_id = ctx.connection_id;
    state.hub.register(Connection::new(conn_id, tx));
    state.hub.send_to(
        conn_id,
        &ServerMessage::Welcome {
            connection_id: conn_id,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );

    // Writer task: drains rx and writes to sink
    let mut write_task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if sink.send(bytes).await.is_err() {
                break;
            }
        }
    });

    // Reader loop. Also stops when the writer does, e.g. after an eviction.
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(frame)) => handler::handle_frame(&mut ctx, &frame, &state).await,
                Some(Err(e)) => {
                    tracing::warn!("Read error from {}: {}", conn_id, e);
                    break;
                }
                None => {
                    tracing::info!("Connection {} closed", conn_id);
                    break;
                }
            },
            _ = &mut write_task => {
                tracing::info!("Outbound queue for {} closed", conn_id);
                break;
            }
        }
    }

    // Cleanup
    handler::handle_disconnect(&ctx, &state).await;
    write_task.abort();
    Ok(())
}
