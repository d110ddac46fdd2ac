//! WebSocket relay endpoint
//!
//! Each connection gets a challenge on connect. The session's token, if
//! any, is owned by the task driving that socket and handed to the
//! authenticator on every gated operation.

use crate::auth::{Action, Authenticator, Token};
use crate::event::{Event, AUTH_EVENT_KIND};
use crate::server::connections::{ClientConnection, ConnectionManager, MAX_SUBSCRIPTIONS};
use crate::server::messages::{ClientMessage, ServerMessage};
use crate::server::router::EventRouter;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound frames buffered per connection before new ones are dropped
const OUTBOUND_BUFFER: usize = 256;

/// Shared state for WebSocket handlers
#[derive(Clone)]
pub struct WsState {
    pub connections: Arc<ConnectionManager>,
    pub router: Arc<EventRouter>,
    pub authenticator: Arc<Authenticator>,
}

impl WsState {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        let connections = Arc::new(ConnectionManager::new());
        let router = Arc::new(EventRouter::new(connections.clone()));
        Self {
            connections,
            router,
            authenticator,
        }
    }
}

/// Per-connection state owned by the socket task
struct Session {
    conn: Arc<ClientConnection>,
    token: Option<Token>,
}

impl Session {
    fn reply(&self, msg: ServerMessage) {
        if let Err(e) = self.conn.send(&msg) {
            debug!(conn_id = %self.conn.id, error = %e, "Dropped reply");
        }
    }

    /// Prefixed reason for a refused action
    fn denial(&self, action: Action) -> String {
        match self.token {
            None => format!("auth-required: authentication required to {}", action),
            Some(_) => format!("restricted: not allowed to {}", action),
        }
    }
}

/// Create the WebSocket router
pub fn create_router(state: WsState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let conn = Arc::new(ClientConnection::new(tx));
    let conn_id = conn.id;
    state.connections.add(conn.clone());

    let mut session = Session { conn, token: None };
    session.reply(ServerMessage::Auth {
        challenge: session.conn.challenge.clone(),
    });

    debug!(conn_id = %conn_id, "WebSocket client connected");

    // Forward queued frames to the socket
    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg_result) = receiver.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    session.reply(ServerMessage::Notice {
                        message: "binary frames must be UTF-8 JSON".to_string(),
                    });
                    continue;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Handled automatically by axum
                continue;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        };

        match ClientMessage::parse(&text) {
            Ok(msg) => handle_client_message(msg, &mut session, &state).await,
            Err(e) => session.reply(ServerMessage::Notice {
                message: e.to_string(),
            }),
        }
    }

    // Cleanup; the token goes away with the session
    debug!(conn_id = %conn_id, "WebSocket client disconnected");
    state.connections.remove(conn_id);
    send_task.abort();
}

async fn handle_client_message(msg: ClientMessage, session: &mut Session, state: &WsState) {
    match msg {
        ClientMessage::Auth(raw) => {
            let event_id = raw
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string();

            match state
                .authenticator
                .authenticate(&raw, &session.conn.challenge)
                .await
            {
                Ok(token) => {
                    info!(conn_id = %session.conn.id, pubkey = %token.pubkey, "Session authenticated");
                    session.token = Some(token);
                    session.reply(ServerMessage::Ok {
                        event_id,
                        accepted: true,
                        message: String::new(),
                    });
                }
                Err(e) => {
                    warn!(conn_id = %session.conn.id, error = %e, "Authentication failed");
                    session.reply(ServerMessage::Ok {
                        event_id,
                        accepted: false,
                        message: e.to_string(),
                    });
                }
            }
        }
        ClientMessage::Event(event) => handle_event(*event, session, state),
        ClientMessage::Req {
            subscription_id,
            filters,
        } => {
            if !state
                .authenticator
                .can_do(session.token.as_ref(), Action::Query, None)
            {
                session.reply(ServerMessage::Closed {
                    message: session.denial(Action::Query),
                    subscription_id,
                });
                return;
            }

            if !session.conn.subscribe(subscription_id.clone(), filters) {
                debug!(conn_id = %session.conn.id, "Subscription limit reached");
                session.reply(ServerMessage::Closed {
                    subscription_id,
                    message: format!("error: too many subscriptions (max {})", MAX_SUBSCRIPTIONS),
                });
                return;
            }
            // No stored history to replay
            session.reply(ServerMessage::Eose { subscription_id });
        }
        ClientMessage::Close { subscription_id } => {
            session.conn.unsubscribe(&subscription_id);
        }
    }
}

fn handle_event(event: Event, session: &Session, state: &WsState) {
    let reject = |message: String| {
        session.reply(ServerMessage::Ok {
            event_id: event.id.clone(),
            accepted: false,
            message,
        })
    };

    if event.kind == AUTH_EVENT_KIND {
        reject("invalid: authentication events are not relayed".to_string());
        return;
    }

    if let Err(e) = event.verify() {
        reject(format!("invalid: {}", e));
        return;
    }

    if !state
        .authenticator
        .can_do(session.token.as_ref(), Action::Save, Some(&event))
    {
        debug!(conn_id = %session.conn.id, event = %event, "Save denied");
        reject(session.denial(Action::Save));
        return;
    }

    state.router.route(&event);
    session.reply(ServerMessage::Ok {
        event_id: event.id.clone(),
        accepted: true,
        message: String::new(),
    });
}

/// Serve the relay on `listener` until `shutdown` resolves
pub async fn run_websocket_server<F>(
    listener: TcpListener,
    state: WsState,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    info!(addr = %listener.local_addr()?, "WebSocket server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
