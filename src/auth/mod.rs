//! Authentication and authorization
//!
//! Role codes:
//! - `a`: anonymous; in a requirement it means "open to everyone"
//! - `r`: reader
//! - `w`: writer
//! - `s`: trusted service
//!
//! Actions (`save`, `query`) map to the roles allowed to perform them.
//! A caller with at least one of the required roles is allowed.

mod authenticator;
mod policy;

pub use authenticator::{
    AuthenticationError, Authenticator, AuthorRule, EventRule, Token, FRESHNESS_WINDOW_SECS,
};
pub use policy::{Action, Policy, PolicyError, Role, RoleParseError, RoleSet};
