//! Fan-out of chat messages to every connected client, plus the AI follow-up.

use psy_chat_shared::{ChatMessage, ServerEvent, AI_ERROR_TEXT};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::llm::CompletionProvider;

pub type ConnectionId = u64;

/// Live connections, keyed by id, each with a handle to its outbound queue.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    peers: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

/// Keeps a connection registered; dropping it removes the entry.
pub struct Registration {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut peers) = self.registry.peers.lock() {
            peers.remove(&self.id);
        }
    }
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(self: &Arc<Self>) -> (Registration, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(id, tx);
        }
        let registration = Registration {
            id,
            registry: Arc::clone(self),
        };
        (registration, rx)
    }

    /// Queues `event` for every live connection. The lock is held for the
    /// whole pass, so two broadcasts never interleave.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let Ok(peers) = self.peers.lock() else {
            return 0;
        };
        peers
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().map(|p| p.len()).unwrap_or(0)
    }
}

pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    provider: Arc<dyn CompletionProvider>,
}

impl Relay {
    pub fn new(registry: Arc<ConnectionRegistry>, provider: Arc<dyn CompletionProvider>) -> Arc<Self> {
        Arc::new(Self { registry, provider })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Echoes `raw_text` to everyone as "You", then asks the provider in a
    /// separate task and broadcasts its answer (or the fixed error text) as "AI".
    pub fn on_chat_message(self: &Arc<Self>, sender: ConnectionId, raw_text: String) -> JoinHandle<()> {
        info!(connection = sender, "message: {}", raw_text);
        let delivered = self
            .registry
            .broadcast(&ServerEvent::chat(ChatMessage::you(raw_text.clone())));
        info!(connection = sender, delivered, "relayed user message");

        let relay = Arc::clone(self);
        tokio::spawn(async move {
            let reply = match relay.provider.complete(&raw_text).await {
                Ok(text) => text,
                Err(e) => {
                    error!(connection = sender, error = %e, "Error getting response from completion provider");
                    AI_ERROR_TEXT.to_string()
                }
            };
            relay.registry.broadcast(&ServerEvent::chat(ChatMessage::ai(reply)));
        })
    }
}
