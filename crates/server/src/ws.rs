use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use bankdesk_agent::{AgentRuntime, BusError, LoginOutcome, ReplySink, TurnReply};
use bankdesk_core::domain::session::SessionId;
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const USERNAME_PROMPT: &str = "Enter your username:";
pub const PASSWORD_PROMPT: &str = "Enter your password:";
pub const NAME_PROMPT: &str = "May I know your name?";
pub const QUERY_PROMPT: &str = "Please describe your banking issue or question:";

/// Frame pushed to the browser for every finished turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AgentResponse { agent: String, text: String },
}

impl From<TurnReply> for ServerFrame {
    fn from(reply: TurnReply) -> Self {
        Self::AgentResponse { agent: reply.agent, text: reply.text }
    }
}

struct Connection {
    id: u64,
    sender: mpsc::UnboundedSender<TurnReply>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    live: HashMap<SessionId, Connection>,
    queued: HashMap<SessionId, Vec<TurnReply>>,
}

/// A socket's claim on a session. The id identifies this connection when it
/// later detaches.
#[derive(Debug)]
pub struct SocketAttachment {
    pub id: u64,
    pub replies: mpsc::UnboundedReceiver<TurnReply>,
}

/// Routes finished turns to the socket attached to their session. Replies
/// for sessions without a live socket wait in a per-session queue.
#[derive(Default)]
pub struct SocketRegistry {
    inner: Mutex<Registry>,
}

impl SocketRegistry {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Attaches a socket to the session, replacing any earlier one. Queued
    /// replies are handed to the new socket first.
    pub fn attach(&self, session: &SessionId) -> SocketAttachment {
        let (sender, replies) = mpsc::unbounded_channel();
        let mut registry = self.registry();
        for reply in registry.queued.remove(session).unwrap_or_default() {
            let _ = sender.send(reply);
        }
        registry.next_id += 1;
        let id = registry.next_id;
        registry.live.insert(session.clone(), Connection { id, sender });
        SocketAttachment { id, replies }
    }

    /// Releases the session if connection `id` still owns it. Returns false
    /// when a newer socket has taken the session over; that socket keeps its
    /// entry.
    pub fn detach(&self, session: &SessionId, id: u64) -> bool {
        let mut registry = self.registry();
        match registry.live.get(session) {
            Some(connection) if connection.id == id => {
                registry.live.remove(session);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Takes the replies that arrived while no socket was attached.
    pub fn drain(&self, session: &SessionId) -> Vec<TurnReply> {
        self.registry().queued.remove(session).unwrap_or_default()
    }

    pub fn is_attached(&self, session: &SessionId) -> bool {
        self.registry().live.contains_key(session)
    }
}

impl ReplySink for SocketRegistry {
    fn deliver(&self, reply: TurnReply) {
        let mut registry = self.registry();
        let reply = match registry.live.get(&reply.session) {
            Some(connection) => match connection.sender.send(reply) {
                Ok(()) => return,
                Err(mpsc::error::SendError(reply)) => {
                    registry.live.remove(&reply.session);
                    reply
                }
            },
            None => reply,
        };
        debug!(
            event_name = "ws.reply_queued",
            session_id = %reply.session,
            "no live socket for session; reply queued"
        );
        registry.queued.entry(reply.session.clone()).or_default().push(reply);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Stage {
    Username,
    Password { username: String },
    Name { session: SessionId },
    Query { session: SessionId },
    Conversation { session: SessionId },
}

/// Login dialog in front of the conversation: username, password, name, and
/// then free text that goes straight to the runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dialog {
    stage: Stage,
}

/// What the socket should do after one inbound line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DialogStep {
    pub prompts: Vec<String>,
    /// Session the socket attaches to once the customer is signed in.
    pub attach: Option<SessionId>,
}

impl Default for Dialog {
    fn default() -> Self {
        Self { stage: Stage::Username }
    }
}

impl Dialog {
    pub fn opening_prompt() -> &'static str {
        USERNAME_PROMPT
    }

    pub fn session(&self) -> Option<&SessionId> {
        match &self.stage {
            Stage::Username | Stage::Password { .. } => None,
            Stage::Name { session } | Stage::Query { session } | Stage::Conversation { session } => {
                Some(session)
            }
        }
    }

    pub async fn advance(
        &mut self,
        text: &str,
        runtime: &AgentRuntime,
    ) -> Result<DialogStep, BusError> {
        let text = text.trim();
        let stage = std::mem::replace(&mut self.stage, Stage::Username);
        let (next, step) = match stage {
            Stage::Username if text.is_empty() => {
                (Stage::Username, DialogStep { prompts: vec![USERNAME_PROMPT.to_string()], attach: None })
            }
            Stage::Username => (
                Stage::Password { username: text.to_string() },
                DialogStep { prompts: vec![PASSWORD_PROMPT.to_string()], attach: None },
            ),
            Stage::Password { username } => {
                let session = SessionId::new(username.as_str());
                // The greeting arrives through the reply sink once attached.
                match runtime.login(&username, SecretString::from(text.to_string())).await? {
                    LoginOutcome::Accepted => {
                        info!(event_name = "ws.login_accepted", session_id = %session, "socket signed in");
                        (
                            Stage::Name { session: session.clone() },
                            DialogStep { prompts: vec![NAME_PROMPT.to_string()], attach: Some(session) },
                        )
                    }
                    LoginOutcome::Rejected { reply } => {
                        let prompts = vec![reply, USERNAME_PROMPT.to_string()];
                        (Stage::Username, DialogStep { prompts, attach: None })
                    }
                }
            }
            Stage::Name { session } => {
                let name = if text.is_empty() { session.as_str() } else { text };
                let prompts = vec![format!("Hello, {name}!"), QUERY_PROMPT.to_string()];
                (Stage::Query { session }, DialogStep { prompts, attach: None })
            }
            Stage::Query { session } | Stage::Conversation { session } => {
                if !text.is_empty() {
                    runtime.submit(&session, text)?;
                }
                (Stage::Conversation { session }, DialogStep::default())
            }
        };
        self.stage = next;
        Ok(step)
    }
}

#[derive(Clone)]
pub struct WsState {
    pub runtime: AgentRuntime,
    pub sockets: Arc<SocketRegistry>,
}

pub fn router(state: WsState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: WsState) {
    let mut dialog = Dialog::default();
    let mut replies: Option<mpsc::UnboundedReceiver<TurnReply>> = None;
    let mut connection: Option<u64> = None;

    if socket.send(WsMessage::Text(Dialog::opening_prompt().into())).await.is_err() {
        return;
    }

    loop {
        let inbound = tokio::select! {
            inbound = socket.recv() => inbound,
            Some(reply) = next_reply(&mut replies) => {
                if send_frame(&mut socket, ServerFrame::from(reply)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let text = match inbound {
            Some(Ok(WsMessage::Text(text))) => text.to_string(),
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(error)) => {
                warn!(event_name = "ws.receive_failed", error = %error, "socket receive failed");
                break;
            }
        };

        let step = match dialog.advance(&text, &state.runtime).await {
            Ok(step) => step,
            Err(error) => {
                warn!(event_name = "ws.dispatch_failed", error = %error, "could not hand input to the runtime");
                break;
            }
        };

        if let Some(session) = &step.attach {
            let attachment = state.sockets.attach(session);
            connection = Some(attachment.id);
            replies = Some(attachment.replies);
        }
        for prompt in step.prompts {
            if socket.send(WsMessage::Text(prompt.into())).await.is_err() {
                return detach(&state, &dialog, connection);
            }
        }
    }

    detach(&state, &dialog, connection);
}

async fn next_reply(
    replies: &mut Option<mpsc::UnboundedReceiver<TurnReply>>,
) -> Option<TurnReply> {
    match replies {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_frame(socket: &mut WebSocket, frame: ServerFrame) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(&frame).unwrap_or_default();
    socket.send(WsMessage::Text(payload.into())).await
}

fn detach(state: &WsState, dialog: &Dialog, connection: Option<u64>) {
    let (Some(session), Some(id)) = (dialog.session(), connection) else {
        return;
    };
    if state.sockets.detach(session, id) {
        state.runtime.cancel_turn(session);
        info!(event_name = "ws.disconnected", session_id = %session, "socket closed");
    } else {
        // A newer socket owns the session; its turn keeps running.
        debug!(event_name = "ws.superseded_socket_closed", session_id = %session, "superseded socket closed");
    }
}
