use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use bankdesk_core::domain::conversation::{AssistantContent, Turn};
use bankdesk_core::domain::session::SessionId;
use bankdesk_core::domain::topic::TopicType;

use crate::bus::{Agent, AgentError, AgentResponse, Message, MessageContext, UserTask};
use crate::session::SessionStore;

pub const USER_PROXY_AGENT_TYPE: &str = "UserProxyAgent";
const EMPTY_REPLY: &str = "Sorry, I don't have an answer for that yet.";

/// One finished turn as the transport sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnReply {
    pub session: SessionId,
    /// Agent type that produced the last assistant text, if any.
    pub agent: String,
    pub text: String,
    pub reply_to: TopicType,
}

/// Where finished turns go. Implementations must not block.
pub trait ReplySink: Send + Sync {
    fn deliver(&self, reply: TurnReply);
}

pub struct ChannelReplySink {
    sender: mpsc::UnboundedSender<TurnReply>,
}

impl ChannelReplySink {
    pub fn new(sender: mpsc::UnboundedSender<TurnReply>) -> Self {
        Self { sender }
    }
}

impl ReplySink for ChannelReplySink {
    fn deliver(&self, reply: TurnReply) {
        if self.sender.send(reply).is_err() {
            warn!(event_name = "user_proxy.reply_dropped", "reply receiver is gone");
        }
    }
}

#[derive(Clone, Default)]
pub struct CollectingReplySink {
    replies: Arc<Mutex<Vec<TurnReply>>>,
}

impl CollectingReplySink {
    pub fn replies(&self) -> Vec<TurnReply> {
        match self.replies.lock() {
            Ok(replies) => replies.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.replies().into_iter().map(|reply| reply.text).collect()
    }
}

impl ReplySink for CollectingReplySink {
    fn deliver(&self, reply: TurnReply) {
        match self.replies.lock() {
            Ok(mut replies) => replies.push(reply),
            Err(poisoned) => poisoned.into_inner().push(reply),
        }
    }
}

/// Bridges the transport and the agents: turns raw input into tasks for the
/// classifier and finished tasks into replies.
pub struct UserProxy {
    sessions: SessionStore,
    sink: Arc<dyn ReplySink>,
}

impl UserProxy {
    pub fn new(sessions: SessionStore, sink: Arc<dyn ReplySink>) -> Self {
        Self { sessions, sink }
    }

    fn on_input(&self, text: String, ctx: &MessageContext) -> Result<(), AgentError> {
        let mut context = self.sessions.take_context(ctx.session());
        context.push(Turn::user(text));
        ctx.publish(TopicType::classifier(), Message::Task(UserTask { context }))?;
        Ok(())
    }

    fn on_response(&self, response: AgentResponse, ctx: &MessageContext) {
        let AgentResponse { context, reply_to, transient_reply } = response;

        let agent = context
            .turns()
            .iter()
            .rev()
            .find_map(|turn| match turn {
                Turn::Assistant { source, content: AssistantContent::Text(_) } => {
                    Some(source.clone())
                }
                _ => None,
            })
            .unwrap_or_else(|| reply_to.as_str().to_string());

        let text = match transient_reply {
            Some(text) => text,
            None => {
                let replies = context.replies_since_last_user();
                if replies.is_empty() {
                    EMPTY_REPLY.to_string()
                } else {
                    replies.join("\n")
                }
            }
        };

        // Login replies carry no conversation of their own.
        if reply_to != TopicType::auth() {
            self.sessions.store_context(ctx.session(), context);
        }
        debug!(
            event_name = "user_proxy.reply_ready",
            session_id = %ctx.session(),
            reply_to = %reply_to,
            "turn finished"
        );
        self.sink.deliver(TurnReply { session: ctx.session().clone(), agent, text, reply_to });
    }

    fn on_login(&self, username: &str, ctx: &MessageContext) {
        self.sink.deliver(TurnReply {
            session: ctx.session().clone(),
            agent: USER_PROXY_AGENT_TYPE.to_string(),
            text: format!("Welcome, {username}! How can I help you with your banking today?"),
            reply_to: TopicType::auth(),
        });
    }
}

#[async_trait]
impl Agent for UserProxy {
    async fn handle(
        &mut self,
        message: Message,
        ctx: &MessageContext,
    ) -> Result<Option<Message>, AgentError> {
        match message {
            Message::UserInput { text } => self.on_input(text, ctx)?,
            Message::Response(response) => self.on_response(response, ctx),
            Message::UserLogin { username } => self.on_login(&username, ctx),
            other => return Err(ctx.unsupported(&other)),
        }
        Ok(None)
    }
}
