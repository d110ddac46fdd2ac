//! Turnstile - challenge-response authentication and role-based access
//! control for real-time event relays
//!
//! Clients connect anonymously, receive a challenge, and may sign an
//! authentication event to bind a public key to their session. Every
//! relay action is then checked against a configurable action → role policy.

pub mod auth;
pub mod config;
pub mod event;
pub mod server;
pub mod storage;

pub use auth::{Action, AuthenticationError, Authenticator, Policy, Role, RoleSet, Token};
pub use config::{AuthConfig, Settings};
pub use event::{Event, Keys, UnsignedEvent};
pub use storage::{MemoryRoleStore, PostgresStore, RoleStore};
