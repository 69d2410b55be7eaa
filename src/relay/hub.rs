//! Broadcast hub
//!
//! A single task owns the set of open connections and processes register,
//! unregister and broadcast commands strictly in arrival order. There is no
//! buffering policy and no backpressure: each connection gets an unbounded
//! outbound queue and a send to a departed connection is silently dropped.

use crate::relay::error::{RelayError, RelayResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type ConnectionId = u64;

#[derive(Debug)]
pub enum HubCommand {
    Register {
        id: ConnectionId,
        outbound: mpsc::UnboundedSender<String>,
    },
    Unregister {
        id: ConnectionId,
    },
    Broadcast {
        from: ConnectionId,
        text: String,
    },
    Snapshot {
        reply: oneshot::Sender<HubSnapshot>,
    },
}

/// Counters returned when the hub stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub registered: u64,
    pub messages: u64,
    pub deliveries: u64,
}

/// Point-in-time view of the hub, ordered after every earlier command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSnapshot {
    pub open: usize,
    pub stats: HubStats,
}

/// Cloneable handle used by connection tasks to talk to the hub
#[derive(Debug, Clone)]
pub struct RelayHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
    next_id: Arc<AtomicU64>,
}

impl RelayHandle {
    /// Start the hub task. It stops once every handle has been dropped.
    pub fn spawn() -> (Self, JoinHandle<HubStats>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let hub = tokio::spawn(run_hub(rx));
        (
            Self {
                commands,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            hub,
        )
    }

    /// Add a connection; messages for it arrive on the returned receiver
    pub fn register(&self) -> RelayResult<(ConnectionId, mpsc::UnboundedReceiver<String>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, inbox) = mpsc::unbounded_channel();
        self.send(HubCommand::Register { id, outbound })?;
        Ok((id, inbox))
    }

    pub fn unregister(&self, id: ConnectionId) -> RelayResult<()> {
        self.send(HubCommand::Unregister { id })
    }

    /// Forward `text` to every registered connection except `from`
    pub fn broadcast(&self, from: ConnectionId, text: String) -> RelayResult<()> {
        self.send(HubCommand::Broadcast { from, text })
    }

    pub async fn snapshot(&self) -> RelayResult<HubSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::Snapshot { reply })?;
        response.await.map_err(|_| RelayError::HubStopped)
    }

    fn send(&self, command: HubCommand) -> RelayResult<()> {
        self.commands
            .send(command)
            .map_err(|_| RelayError::HubStopped)
    }
}

pub async fn run_hub(mut commands: mpsc::UnboundedReceiver<HubCommand>) -> HubStats {
    let mut connections: HashMap<ConnectionId, mpsc::UnboundedSender<String>> = HashMap::new();
    let mut stats = HubStats::default();

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { id, outbound } => {
                connections.insert(id, outbound);
                stats.registered += 1;
                tracing::debug!(connection = id, open = connections.len(), "Relay registered");
            }
            HubCommand::Unregister { id } => {
                connections.remove(&id);
                tracing::debug!(connection = id, open = connections.len(), "Relay unregistered");
            }
            HubCommand::Broadcast { from, text } => {
                stats.messages += 1;
                for (id, outbound) in &connections {
                    if *id != from && outbound.send(text.clone()).is_ok() {
                        stats.deliveries += 1;
                    }
                }
            }
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(HubSnapshot {
                    open: connections.len(),
                    stats,
                });
            }
        }
    }

    stats
}
