//! Control server
//!
//! Listens for TCP clients speaking newline-delimited JSON. Lines from a
//! client are control messages; every status record from the sender is
//! broadcast to all connected clients.

mod handler;

use crate::control::Controller;
use crate::protocol::Status;
use crate::transport::{TransportError, encode_status};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use uuid::Uuid;

use handler::handle_connection;

// Server result type using TransportError for structured error handling
type ServerResult<T> = std::result::Result<T, TransportError>;

/// Status lines buffered per client before it counts as too slow
const CLIENT_QUEUE: usize = 64;

pub struct ControlServer {
    inner: Arc<ServerInner>,
    listener: TcpListener,
}

impl ControlServer {
    pub async fn bind<A: ToSocketAddrs>(addr: A, controller: Controller) -> ServerResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TransportError::Connection(format!("Control address already in use: {}", e))
            } else {
                TransportError::Connection(format!("Failed to bind control server: {}", e))
            }
        })?;

        let inner = Arc::new(ServerInner {
            controller,
            subscribers: Mutex::new(Vec::new()),
        });

        Ok(Self { inner, listener })
    }

    pub fn local_addr(&self) -> ServerResult<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients and broadcast every status from `statuses` to them
    pub async fn run(&self, mut statuses: mpsc::Receiver<Status>) -> ServerResult<()> {
        log::info!("Control server listening on {}", self.local_addr()?);

        let inner = Arc::clone(&self.inner);
        let broadcaster = tokio::spawn(async move {
            while let Some(status) = statuses.recv().await {
                inner.broadcast_status(&status);
            }
        });

        let result = self.accept_loop().await;
        broadcaster.abort();
        result
    }

    async fn accept_loop(&self) -> ServerResult<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    log::info!("Control client connected from {}", peer);
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, inner).await {
                            log::warn!("Error handling connection from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

struct SubscriberHandle {
    id: Uuid,
    tx: mpsc::Sender<Vec<u8>>,
}

/// Inner server state shared with connection handlers
struct ServerInner {
    controller: Controller,
    subscribers: Mutex<Vec<SubscriberHandle>>,
}

impl ServerInner {
    /// Lock the subscriber list.
    ///
    /// Every update is a single push or retain, so a list poisoned by a
    /// panicking holder is still consistent and stays in use.
    fn subscribers(&self) -> MutexGuard<'_, Vec<SubscriberHandle>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| {
            log::warn!("Subscriber list lock was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn subscribe(&self, id: Uuid, tx: mpsc::Sender<Vec<u8>>) {
        self.subscribers().push(SubscriberHandle { id, tx });
    }

    fn unsubscribe(&self, id: Uuid) {
        self.subscribers().retain(|s| s.id != id);
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Send a status line to every subscriber.
    ///
    /// Clients that are gone or too slow to keep up are dropped; their
    /// handler notices the closed queue and disconnects them.
    fn broadcast_status(&self, status: &Status) {
        let bytes = match encode_status(status) {
            Ok(line) => line.into_bytes(),
            Err(e) => {
                log::error!("Failed to encode status: {}", e);
                return;
            }
        };

        self.subscribers()
            .retain(|sub| sub.tx.try_send(bytes.clone()).is_ok());
    }
}
