//! Relay wire messages
//!
//! Every message is a JSON array whose first element names its type.

use crate::event::Event;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    Json(String),

    #[error("message must be a JSON array starting with a type string")]
    NotArray,

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("{0} message is missing its {1}")]
    Missing(&'static str, &'static str),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Messages from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["AUTH", <event>]`; left raw so the authenticator does the structural check
    Auth(Value),
    /// `["EVENT", <event>]`
    Event(Box<Event>),
    /// `["REQ", <subscription id>, <filter>...]`
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    /// `["CLOSE", <subscription id>]`
    Close { subscription_id: String },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Json(e.to_string()))?;
        let mut items = match value {
            Value::Array(items) => items.into_iter(),
            _ => return Err(ProtocolError::NotArray),
        };

        let kind = match items.next() {
            Some(Value::String(kind)) => kind,
            _ => return Err(ProtocolError::NotArray),
        };

        match kind.as_str() {
            "AUTH" => {
                let event = items.next().ok_or(ProtocolError::Missing("AUTH", "event"))?;
                Ok(ClientMessage::Auth(event))
            }
            "EVENT" => {
                let event = items.next().ok_or(ProtocolError::Missing("EVENT", "event"))?;
                let event: Event = serde_json::from_value(event)
                    .map_err(|e| ProtocolError::InvalidEvent(e.to_string()))?;
                Ok(ClientMessage::Event(Box::new(event)))
            }
            "REQ" => {
                let subscription_id = subscription_id(items.next(), "REQ")?;
                let filters = items
                    .map(|f| {
                        serde_json::from_value(f)
                            .map_err(|e| ProtocolError::InvalidFilter(e.to_string()))
                    })
                    .collect::<Result<Vec<Filter>, _>>()?;
                Ok(ClientMessage::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => Ok(ClientMessage::Close {
                subscription_id: subscription_id(items.next(), "CLOSE")?,
            }),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

fn subscription_id(value: Option<Value>, message: &'static str) -> Result<String, ProtocolError> {
    match value {
        Some(Value::String(id)) if !id.is_empty() => Ok(id),
        _ => Err(ProtocolError::Missing(message, "subscription id")),
    }
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Per-connection challenge
    Auth { challenge: String },
    /// Outcome of an EVENT or AUTH
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// Event matching a subscription
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    /// End of stored events for a subscription
    Eose { subscription_id: String },
    /// Subscription refused or ended by the server
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice { message: String },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        let value = match self {
            ServerMessage::Auth { challenge } => json!(["AUTH", challenge]),
            ServerMessage::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
            ServerMessage::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, event]),
            ServerMessage::Eose { subscription_id } => json!(["EOSE", subscription_id]),
            ServerMessage::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
            ServerMessage::Notice { message } => json!(["NOTICE", message]),
        };
        value.to_string()
    }
}

/// Subscription filter; every present condition must hold
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    #[serde(default)]
    pub kinds: Option<Vec<i64>>,
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub until: Option<i64>,
}

impl Filter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| id.eq_ignore_ascii_case(&event.id)) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| a.eq_ignore_ascii_case(&event.pubkey)) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }
        true
    }
}
