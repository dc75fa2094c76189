//! The server connection, owned by a single task that both writes what the
//! user sends and reads what the server pushes.

use anyhow::Context;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use buzzline_common::protocol::{
    framed_transport, recv_message, send_message, ClientMessage, ServerMessage, Transport,
};

/// What the connection task reports to the UI.
#[derive(Debug)]
pub enum NetEvent {
    Message(ServerMessage),
    /// A frame that could not be read or a message that could not be sent.
    Problem(String),
    /// The server went away. Always the last event.
    Closed,
}

/// Connect to the server. Dropping the returned sender closes the connection.
pub async fn connect(
    addr: &str,
) -> anyhow::Result<(mpsc::Sender<ClientMessage>, mpsc::Receiver<NetEvent>)> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("could not reach {}", addr))?;
    let (client_tx, client_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);
    tokio::spawn(pump(framed_transport(stream), client_rx, event_tx));
    Ok((client_tx, event_rx))
}

async fn pump(
    mut transport: Transport,
    mut outgoing: mpsc::Receiver<ClientMessage>,
    events: mpsc::Sender<NetEvent>,
) {
    loop {
        tokio::select! {
            msg = outgoing.recv() => {
                let Some(msg) = msg else {
                    return;
                };
                if let Err(e) = send_message(&mut transport, &msg).await {
                    tracing::warn!("Failed to send {}: {}", msg.event_name(), e);
                    let _ = events.send(NetEvent::Problem(e.to_string())).await;
                    break;
                }
            }
            received = recv_message::<ServerMessage>(&mut transport) => match received {
                Ok(Some(msg)) => {
                    if events.send(NetEvent::Message(msg)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                // A bad frame is skipped; a broken stream ends on the next read.
                Err(e) => {
                    tracing::warn!("Unreadable frame from server: {}", e);
                    if events.send(NetEvent::Problem(e.to_string())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
    let _ = events.send(NetEvent::Closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::SinkExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reports_messages_bad_frames_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut transport = framed_transport(stream);
            let msg: Option<ClientMessage> = recv_message(&mut transport).await.unwrap();
            assert!(matches!(msg, Some(ClientMessage::Ping)));
            send_message(&mut transport, &ServerMessage::Pong).await.unwrap();
            transport.send(Bytes::from_static(b"not json")).await.unwrap();
        });

        let (tx, mut rx) = connect(&addr).await.unwrap();
        tx.send(ClientMessage::Ping).await.unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(NetEvent::Message(ServerMessage::Pong))
        ));
        assert!(matches!(rx.recv().await, Some(NetEvent::Problem(_))));
        server.await.unwrap();
        assert!(matches!(rx.recv().await, Some(NetEvent::Closed)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = connect(&addr).await.unwrap_err();
        assert!(err.to_string().contains(&addr));
    }
}
