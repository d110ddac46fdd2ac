//! Relay server
//!
//! Issues per-connection challenges, authenticates sessions and gates
//! EVENT/REQ on the authenticator before fanning events out.

mod connections;
pub mod messages;
mod router;
pub mod websocket;

pub use connections::{new_challenge, ClientConnection, ConnectionManager, MAX_SUBSCRIPTIONS};
pub use messages::{ClientMessage, Filter, ProtocolError, ServerMessage};
pub use router::EventRouter;
pub use websocket::{create_router, run_websocket_server, WsState};
