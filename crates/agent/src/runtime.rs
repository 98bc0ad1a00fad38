use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::info;

use bankdesk_core::audit::AuditSink;
use bankdesk_core::config::{AppConfig, DEFAULT_MAX_TOOL_ITERATIONS};
use bankdesk_core::domain::label::ClassificationLabel;
use bankdesk_core::domain::session::SessionId;
use bankdesk_core::domain::topic::{AgentId, TopicId, TopicType};
use bankdesk_db::repositories::{AccountRepository, CredentialRepository, GatewayRepository};

use crate::auth::{AuthAgent, LoginOutcome, AUTH_AGENT_TYPE, AUTH_FAILED_REPLY};
use crate::bus::{Agent, AgentResponse, BusError, Message, MessageBus, PublishReceipt};
use crate::classifier::{
    ClassifierAgent, ClassifierDeps, DomainClassifier, HandoffTable, CLASSIFIER_AGENT_TYPE,
};
use crate::handler::{standard_handlers, DomainHandler, HandlerDeps};
use crate::model::ModelClient;
use crate::session::SessionStore;
use crate::tool_loop::ToolLoop;
use crate::user_proxy::{ReplySink, UserProxy, USER_PROXY_AGENT_TYPE};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub max_tool_iterations: u32,
    pub model_timeout: Duration,
    pub default_label: ClassificationLabel,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            model_timeout: Duration::from_secs(30),
            default_label: ClassificationLabel::RetailBanking,
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_tool_iterations: config.model.max_tool_iterations,
            model_timeout: Duration::from_secs(config.model.timeout_secs),
            default_label: config.routing.default_label,
        }
    }
}

/// Collaborators the runtime is assembled from.
pub struct RuntimeDeps {
    pub model: Arc<dyn ModelClient>,
    pub accounts: Arc<dyn AccountRepository>,
    pub gateway: Arc<dyn GatewayRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub replies: Arc<dyn ReplySink>,
    pub audit: Arc<dyn AuditSink>,
    pub settings: RuntimeSettings,
}

/// The assembled agent system: user proxy, authentication, classifier and
/// the ten domain handlers on one message bus.
#[derive(Clone)]
pub struct AgentRuntime {
    bus: MessageBus,
    sessions: SessionStore,
}

impl AgentRuntime {
    pub fn start(deps: RuntimeDeps) -> Result<Self, BusError> {
        let RuntimeDeps { model, accounts, gateway, credentials, replies, audit, settings } = deps;
        let bus = MessageBus::new();
        let sessions = SessionStore::new();

        {
            let sessions = sessions.clone();
            bus.register(USER_PROXY_AGENT_TYPE, move |_id: &AgentId| -> Box<dyn Agent> {
                Box::new(UserProxy::new(sessions.clone(), Arc::clone(&replies)))
            })?;
            bus.subscribe(TopicType::user(), USER_PROXY_AGENT_TYPE)?;
        }

        {
            let audit = Arc::clone(&audit);
            bus.register(AUTH_AGENT_TYPE, move |_id: &AgentId| -> Box<dyn Agent> {
                Box::new(AuthAgent::new(Arc::clone(&credentials), Arc::clone(&audit)))
            })?;
            bus.subscribe(TopicType::auth(), AUTH_AGENT_TYPE)?;
        }

        let classifier_deps = ClassifierDeps {
            classifier: Arc::new(DomainClassifier::new(
                Arc::clone(&model),
                settings.default_label,
                settings.model_timeout,
            )),
            handoffs: Arc::new(HandoffTable::standard(settings.default_label)),
            sessions: sessions.clone(),
            audit: Arc::clone(&audit),
        };
        bus.register(CLASSIFIER_AGENT_TYPE, move |_id: &AgentId| -> Box<dyn Agent> {
            Box::new(ClassifierAgent::new(classifier_deps.clone()))
        })?;
        bus.subscribe(TopicType::classifier(), CLASSIFIER_AGENT_TYPE)?;

        let handler_deps = HandlerDeps {
            model,
            tool_loop: ToolLoop::new(settings.max_tool_iterations, settings.model_timeout),
            sessions: sessions.clone(),
            audit,
        };
        for spec in standard_handlers(accounts, gateway) {
            let spec = Arc::new(spec);
            let agent_type = spec.agent_type();
            let topic = spec.topic();
            let deps = handler_deps.clone();
            bus.register(agent_type.clone(), move |_id: &AgentId| -> Box<dyn Agent> {
                Box::new(DomainHandler::new(Arc::clone(&spec), deps.clone()))
            })?;
            bus.subscribe(topic, agent_type)?;
        }

        info!(
            event_name = "runtime.started",
            max_tool_iterations = settings.max_tool_iterations,
            default_label = %settings.default_label,
            "agent runtime assembled"
        );
        Ok(Self { bus, sessions })
    }

    /// Queues one line of user input for the session.
    pub fn submit(
        &self,
        session: &SessionId,
        text: impl Into<String>,
    ) -> Result<PublishReceipt, BusError> {
        self.bus.publish(
            TopicId::new(TopicType::user(), session.clone()),
            Message::UserInput { text: text.into() },
        )
    }

    /// Verifies credentials. On success the session keyed by `username` gets
    /// a greeting through the reply sink. A rejection is only reported to the
    /// caller, and a name that never signed in leaves nothing behind.
    pub async fn login(
        &self,
        username: &str,
        password: SecretString,
    ) -> Result<LoginOutcome, BusError> {
        let session = SessionId::new(username);
        let reply = self
            .bus
            .send_direct(
                AgentId::new(AUTH_AGENT_TYPE, session.clone()),
                Message::Credentials { username: username.to_string(), password },
            )
            .await?;
        let outcome = match reply {
            Some(Message::UserLogin { .. }) => LoginOutcome::Accepted,
            Some(Message::Response(AgentResponse { transient_reply: Some(reply), .. })) => {
                LoginOutcome::Rejected { reply }
            }
            _ => LoginOutcome::Rejected { reply: AUTH_FAILED_REPLY.to_string() },
        };
        if !outcome.is_accepted() {
            self.bus.release_unused(&session);
        }
        Ok(outcome)
    }

    /// Cancels the running turn, if any, and queues a reset behind it.
    pub fn reset_session(&self, session: &SessionId) -> Result<PublishReceipt, BusError> {
        self.bus.cancel_session(session);
        self.bus.publish(TopicId::new(TopicType::classifier(), session.clone()), Message::Reset)
    }

    pub fn cancel_turn(&self, session: &SessionId) {
        self.bus.cancel_session(session);
    }

    pub async fn run_until_idle(&self) {
        self.bus.run_until_idle().await;
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}
