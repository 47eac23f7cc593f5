//! Connection and message handling
//!
//! This module handles individual client connections and message processing.

use super::{CLIENT_QUEUE, ServerInner, ServerResult};
use crate::transport::{Connection, TransportError};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

pub(super) async fn handle_connection(stream: TcpStream, inner: Arc<ServerInner>) -> ServerResult<()> {
    let mut conn = Connection::new(stream);

    // Every client receives status updates
    let id = Uuid::new_v4();
    let (event_tx, mut event_rx) = mpsc::channel(CLIENT_QUEUE);
    inner.subscribe(id, event_tx);
    log::debug!("Client {} subscribed ({} connected)", id, inner.subscriber_count());

    let result = loop {
        tokio::select! {
            // Read from client
            message = conn.read_control_message() => {
                match message {
                    Ok(None) => break Ok(()), // Connection closed
                    Ok(Some(message)) => {
                        log::debug!("Received control message: {:?}", message);
                        inner.controller.apply(message).await;
                    }
                    Err(TransportError::Serialization(e)) => {
                        log::warn!("Ignoring malformed control message: {}", e);
                    }
                    Err(e) => break Err(e),
                }
            }

            // Send status to client
            event = event_rx.recv() => {
                let Some(bytes) = event else {
                    // Dropped by the broadcaster for falling behind
                    log::warn!("Disconnecting slow client {}", id);
                    break Ok(());
                };
                if let Err(e) = conn.write_bytes(&bytes).await {
                    break Err(e);
                }
            }
        }
    };

    inner.unsubscribe(id);
    log::debug!("Client {} unsubscribed", id);
    result
}
