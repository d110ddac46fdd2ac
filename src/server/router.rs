//! Event fan-out to live subscriptions

use crate::event::Event;
use crate::server::connections::ConnectionManager;
use crate::server::messages::ServerMessage;
use std::sync::Arc;
use tracing::debug;

/// Routes accepted events to subscribed clients
#[derive(Clone)]
pub struct EventRouter {
    connections: Arc<ConnectionManager>,
}

impl EventRouter {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Deliver `event` to every matching subscription; returns deliveries queued
    pub fn route(&self, event: &Event) -> usize {
        let subscribers = self.connections.find_subscribers(event);

        if subscribers.is_empty() {
            debug!(event = %event, "No subscribers for event");
            return 0;
        }

        let mut delivered = 0;
        for (conn, subscription_ids) in subscribers {
            for subscription_id in subscription_ids {
                let msg = ServerMessage::Event {
                    subscription_id,
                    event: Box::new(event.clone()),
                };
                match conn.send(&msg) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        // Expected during rapid disconnect or for slow readers
                        debug!(
                            conn_id = %conn.id,
                            error = %e,
                            "Failed to queue event for subscriber"
                        );
                    }
                }
            }
        }

        debug!(event = %event, delivered, "Routed event");
        delivered
    }

    /// Get the number of active connections
    pub fn connection_count(&self) -> usize {
        self.connections.count()
    }
}
