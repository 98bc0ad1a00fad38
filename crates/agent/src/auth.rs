use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{info, warn};

use bankdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use bankdesk_core::domain::conversation::ConversationContext;
use bankdesk_core::domain::topic::TopicType;
use bankdesk_db::repositories::CredentialRepository;

use crate::bus::{Agent, AgentError, AgentResponse, Message, MessageContext};

pub const AUTH_AGENT_TYPE: &str = "AuthenticationAgent";
pub const AUTH_FAILED_REPLY: &str = "Authentication failed. Please check your username and password.";
const AUTH_UNAVAILABLE_REPLY: &str =
    "Sorry, we cannot verify your credentials right now. Please try again shortly.";

/// Result of one sign-in attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted,
    Rejected { reply: String },
}

impl LoginOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Checks credentials against stored SHA-256 digests and announces the login.
pub struct AuthAgent {
    credentials: Arc<dyn CredentialRepository>,
    audit: Arc<dyn AuditSink>,
}

impl AuthAgent {
    pub fn new(credentials: Arc<dyn CredentialRepository>, audit: Arc<dyn AuditSink>) -> Self {
        Self { credentials, audit }
    }

    async fn authenticate(
        &self,
        username: String,
        password: SecretString,
        ctx: &MessageContext,
    ) -> Result<Option<Message>, AgentError> {
        let (verified, failure_reply) = match self.credentials.find_credential(&username).await {
            Ok(Some(credential)) => (credential.verify(&password), AUTH_FAILED_REPLY),
            Ok(None) => (false, AUTH_FAILED_REPLY),
            Err(error) => {
                warn!(
                    event_name = "auth.lookup_failed",
                    username = %username,
                    error = %error,
                    "credential lookup failed"
                );
                (false, AUTH_UNAVAILABLE_REPLY)
            }
        };

        self.audit.emit(
            AuditEvent::new(
                Some(ctx.session().clone()),
                ctx.correlation_id.clone(),
                "auth.attempt",
                AuditCategory::Ingress,
                AUTH_AGENT_TYPE,
                if verified { AuditOutcome::Success } else { AuditOutcome::Rejected },
            )
            .with_metadata("username", username.as_str()),
        );

        if !verified {
            info!(event_name = "auth.rejected", username = %username, "login rejected");
            // Rejections go to the caller only, never to the session's reply topic.
            return Ok(Some(Message::Response(AgentResponse {
                context: ConversationContext::new(),
                reply_to: TopicType::auth(),
                transient_reply: Some(failure_reply.to_string()),
            })));
        }

        info!(event_name = "auth.accepted", username = %username, "login accepted");
        let login = Message::UserLogin { username };
        ctx.publish(TopicType::user(), login.clone())?;
        Ok(Some(login))
    }
}

#[async_trait]
impl Agent for AuthAgent {
    async fn handle(
        &mut self,
        message: Message,
        ctx: &MessageContext,
    ) -> Result<Option<Message>, AgentError> {
        match message {
            Message::Credentials { username, password } => {
                self.authenticate(username, password, ctx).await
            }
            other => Err(ctx.unsupported(&other)),
        }
    }
}
