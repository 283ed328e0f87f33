//! Connection manager: owns the registry of live connections and spawns one
//! strand task per connection — spec.md §5's "serial execution context over
//! a thread pool" translated to a single-consumer `tokio::task` reading
//! from both the socket and an `mpsc` command queue, the idiomatic async
//! analogue of `net_plugin.cpp`'s per-connection strand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use crate::connection::{ConnectionStatus, RoleMask};
use crate::dedup::ConnectionId;
use crate::error::{NetError, Result};
use crate::wire::{self, Message};

pub enum ConnectionCommand {
    Send(Message),
    Close,
}

/// Inbound messages are handed off through this trait so the manager stays
/// ignorant of dispatch/sync semantics, the same non-goal boundary that
/// keeps `glint-blocklog` ignorant of block semantics.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, conn: ConnectionId, msg: Message);
    async fn on_closed(&self, conn: ConnectionId);
}

struct ConnectionHandle {
    status: ConnectionStatus,
    role: RoleMask,
    command_tx: mpsc::Sender<ConnectionCommand>,
}

pub struct ConnectionManager {
    next_id: AtomicU32,
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        ConnectionManager { next_id: AtomicU32::new(0), connections: Mutex::new(HashMap::new()) }
    }

    pub fn allocate_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Takes ownership of `stream` and spawns its strand task. Inbound
    /// frames are delivered to `handler`; outbound frames go through the
    /// returned command channel's `send`/`close`.
    pub async fn spawn(
        &self,
        id: ConnectionId,
        stream: TcpStream,
        role: RoleMask,
        handler: Arc<dyn MessageHandler>,
    ) {
        let (tx, mut rx) = mpsc::channel::<ConnectionCommand>(256);
        let (mut read_half, mut write_half) = stream.into_split();

        {
            let mut conns = self.connections.lock().await;
            conns.insert(id, ConnectionHandle { status: ConnectionStatus::Connected, role, command_tx: tx });
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = wire::read_frame(&mut read_half) => {
                        match frame {
                            Ok(msg) => handler.on_message(id, msg).await,
                            Err(_) => break,
                        }
                    }
                    cmd = rx.recv() => {
                        match cmd {
                            Some(ConnectionCommand::Send(msg)) => {
                                if wire::write_frame(&mut write_half, &msg).await.is_err() {
                                    break;
                                }
                            }
                            Some(ConnectionCommand::Close) | None => break,
                        }
                    }
                }
            }
            handler.on_closed(id).await;
        });
    }

    pub async fn send(&self, id: ConnectionId, msg: Message) -> Result<()> {
        let tx = {
            let conns = self.connections.lock().await;
            conns.get(&id).ok_or(NetError::ConnectionClosed)?.command_tx.clone()
        };
        tx.send(ConnectionCommand::Send(msg)).await.map_err(|_| NetError::ConnectionClosed)
    }

    /// Sends `msg` to every target concurrently, the way `bcast_block`'s
    /// fan-out is meant to run — one slow peer's socket write never delays
    /// delivery to the others.
    pub async fn broadcast(&self, targets: &[ConnectionId], msg: Message) -> Vec<Result<()>> {
        let sends = targets.iter().map(|&id| self.send(id, msg.clone()));
        futures::future::join_all(sends).await
    }

    pub async fn close(&self, id: ConnectionId) {
        let tx = {
            let mut conns = self.connections.lock().await;
            conns.remove(&id).map(|h| h.command_tx)
        };
        if let Some(tx) = tx {
            let _ = tx.send(ConnectionCommand::Close).await;
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn roles(&self) -> HashMap<ConnectionId, RoleMask> {
        self.connections.lock().await.iter().map(|(id, h)| (*id, h.role)).collect()
    }
}
