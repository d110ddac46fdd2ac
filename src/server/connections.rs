//! Connection state management

use crate::event::Event;
use crate::server::messages::{Filter, ServerMessage};
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Open subscriptions allowed per connection
pub const MAX_SUBSCRIPTIONS: usize = 64;

/// Generate a fresh 32-byte hex challenge
pub fn new_challenge() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// A connected client as seen by the fan-out path
///
/// Holds no authentication state; the session's token lives with the task
/// that owns the socket.
pub struct ClientConnection {
    /// Unique connection ID
    pub id: Uuid,
    /// Challenge issued to this connection
    pub challenge: String,
    /// Active subscriptions by client-chosen ID
    subscriptions: RwLock<HashMap<String, Vec<Filter>>>,
    /// Outbound JSON text frames
    tx: mpsc::Sender<String>,
}

impl ClientConnection {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self::with_challenge(new_challenge(), tx)
    }

    pub fn with_challenge(challenge: String, tx: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            challenge,
            subscriptions: RwLock::new(HashMap::new()),
            tx,
        }
    }

    /// Add or replace a subscription
    ///
    /// Returns false, leaving the subscriptions untouched, when a new ID
    /// would exceed [`MAX_SUBSCRIPTIONS`]. Replacing an existing ID always
    /// succeeds.
    pub fn subscribe(&self, subscription_id: String, filters: Vec<Filter>) -> bool {
        let mut subscriptions = self.subscriptions.write();
        if subscriptions.len() >= MAX_SUBSCRIPTIONS && !subscriptions.contains_key(&subscription_id)
        {
            return false;
        }
        subscriptions.insert(subscription_id, filters);
        true
    }

    /// Remove a subscription, returning whether it existed
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.subscriptions.write().remove(subscription_id).is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// IDs of subscriptions with at least one filter matching `event`
    pub fn matching_subscriptions(&self, event: &Event) -> Vec<String> {
        self.subscriptions
            .read()
            .iter()
            .filter(|(_, filters)| filters.iter().any(|f| f.matches(event)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Queue a message for this client without waiting
    pub fn send(&self, msg: &ServerMessage) -> Result<(), mpsc::error::TrySendError<String>> {
        self.tx.try_send(msg.to_json())
    }
}

/// Manages all active connections
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<DashMap<Uuid, Arc<ClientConnection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection
    pub fn add(&self, conn: Arc<ClientConnection>) {
        self.connections.insert(conn.id, conn);
    }

    /// Remove a connection
    pub fn remove(&self, id: Uuid) {
        self.connections.remove(&id);
    }

    /// Get a connection by ID
    pub fn get(&self, id: Uuid) -> Option<Arc<ClientConnection>> {
        self.connections.get(&id).map(|r| r.clone())
    }

    /// Every connection with a subscription matching `event`, with the matching IDs
    pub fn find_subscribers(&self, event: &Event) -> Vec<(Arc<ClientConnection>, Vec<String>)> {
        self.connections
            .iter()
            .filter_map(|entry| {
                let ids = entry.value().matching_subscriptions(event);
                (!ids.is_empty()).then(|| (entry.value().clone(), ids))
            })
            .collect()
    }

    /// Get total connection count
    pub fn count(&self) -> usize {
        self.connections.len()
    }
}
