//! Challenge-response authentication and per-action permission checks
//!
//! A client proves control of a key by signing a kind-22242 event that names
//! this relay and echoes the connection's challenge. A successful proof turns
//! into a [`Token`] carrying the roles currently stored for that key.

use crate::auth::policy::{Action, Policy, PolicyError, RoleSet};
use crate::config::AuthConfig;
use crate::event::{Event, AUTH_EVENT_KIND};
use crate::storage::{RoleStore, StorageError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Allowed clock skew for `created_at`, in seconds, in both directions
pub const FRESHNESS_WINDOW_SECS: i64 = 600;

/// Reasons an authentication event is rejected
///
/// The display strings are sent back to clients verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    #[error("invalid: malformed authentication event")]
    Malformed,

    #[error("invalid: Wrong kind. Must be 22242.")]
    WrongKind,

    #[error("invalid: Missing required tags")]
    MissingTags,

    #[error("invalid: Wrong domain: {0}")]
    WrongDomain(String),

    #[error("invalid: Wrong challenge")]
    WrongChallenge,

    #[error("invalid: Too old")]
    TooOld,

    #[error("invalid: Too new")]
    TooNew,

    #[error("invalid: Bad signature")]
    BadSignature,

    #[error("error: role lookup failed: {0}")]
    RoleLookup(#[from] StorageError),
}

/// Proof of authentication for one session
///
/// Only produced by [`Authenticator::authenticate`]; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub pubkey: String,
    pub roles: RoleSet,
}

/// Event-scoped override consulted when the plain role check fails
pub trait EventRule: Send + Sync {
    fn allows(&self, token: &Token, action: Action, event: &Event) -> bool;
}

/// Lets an author act on their own events regardless of role
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorRule;

impl EventRule for AuthorRule {
    fn allows(&self, token: &Token, _action: Action, event: &Event) -> bool {
        token.pubkey.eq_ignore_ascii_case(&event.pubkey)
    }
}

pub struct Authenticator {
    enabled: bool,
    relay_url: String,
    policy: Policy,
    role_store: Arc<dyn RoleStore>,
    event_rule: Option<Arc<dyn EventRule>>,
}

impl Authenticator {
    /// Build the authenticator; a bad action table fails here, not per request
    pub fn new(
        config: &AuthConfig,
        relay_url: impl Into<String>,
        role_store: Arc<dyn RoleStore>,
    ) -> Result<Self, PolicyError> {
        let policy = Policy::from_config(&config.actions)?;

        Ok(Self {
            enabled: config.enabled,
            relay_url: relay_url.into(),
            policy,
            role_store,
            event_rule: None,
        })
    }

    /// Install an event-scoped override for [`Authenticator::can_do`]
    pub fn with_event_rule(mut self, rule: impl EventRule + 'static) -> Self {
        self.event_rule = Some(Arc::new(rule));
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Validate an authentication event against `challenge` at the current time
    pub async fn authenticate(
        &self,
        event: &serde_json::Value,
        challenge: &str,
    ) -> Result<Token, AuthenticationError> {
        self.authenticate_at(event, challenge, chrono::Utc::now().timestamp())
            .await
    }

    /// Same as [`Authenticator::authenticate`] with an explicit clock
    pub async fn authenticate_at(
        &self,
        event: &serde_json::Value,
        challenge: &str,
        now: i64,
    ) -> Result<Token, AuthenticationError> {
        let event: Event = serde_json::from_value(event.clone()).map_err(|e| {
            debug!(error = %e, "Malformed authentication event");
            AuthenticationError::Malformed
        })?;

        if let Err(e) = self.validate(&event, challenge, now) {
            debug!(pubkey = %event.pubkey, reason = %e, "Authentication rejected");
            return Err(e);
        }

        let roles = self.role_store.get_roles(&event.pubkey).await?;
        info!(pubkey = %event.pubkey, roles = %roles, "Authenticated");

        Ok(Token {
            pubkey: event.pubkey,
            roles,
        })
    }

    /// Checks run in a fixed order; the first failure is the one reported
    fn validate(&self, event: &Event, challenge: &str, now: i64) -> Result<(), AuthenticationError> {
        if event.kind != AUTH_EVENT_KIND {
            return Err(AuthenticationError::WrongKind);
        }

        let (relay, echoed) = match (event.tag_value("relay"), event.tag_value("challenge")) {
            (Some(relay), Some(echoed)) => (relay, echoed),
            _ => return Err(AuthenticationError::MissingTags),
        };

        if relay != self.relay_url {
            return Err(AuthenticationError::WrongDomain(relay.to_string()));
        }

        if echoed != challenge {
            return Err(AuthenticationError::WrongChallenge);
        }

        if event.created_at < now.saturating_sub(FRESHNESS_WINDOW_SECS) {
            return Err(AuthenticationError::TooOld);
        }
        if event.created_at > now.saturating_add(FRESHNESS_WINDOW_SECS) {
            return Err(AuthenticationError::TooNew);
        }

        event
            .verify()
            .map_err(|_| AuthenticationError::BadSignature)
    }

    /// May the holder of `token` perform `action`?
    ///
    /// `token` is `None` for a session that never authenticated. `event` is
    /// the event the action targets, if any; it only matters when an
    /// [`EventRule`] is installed and the role check has already failed.
    pub fn can_do(&self, token: Option<&Token>, action: Action, event: Option<&Event>) -> bool {
        if !self.enabled {
            return true;
        }

        let required = self.policy.required(action);
        if required.is_anonymous() {
            return true;
        }

        let Some(token) = token else {
            return false;
        };

        if token.roles.intersects(&required) {
            return true;
        }

        match (&self.event_rule, event) {
            (Some(rule), Some(event)) => rule.allows(token, action, event),
            _ => false,
        }
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("enabled", &self.enabled)
            .field("relay_url", &self.relay_url)
            .field("policy", &self.policy)
            .field("event_rule", &self.event_rule.is_some())
            .finish()
    }
}
