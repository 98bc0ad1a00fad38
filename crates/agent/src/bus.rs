use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use bankdesk_core::domain::conversation::ConversationContext;
use bankdesk_core::domain::session::SessionId;
use bankdesk_core::domain::topic::{AgentId, AgentType, TopicId, TopicType};

/// Conversation handed from one agent to the next for processing.
#[derive(Clone, Debug, PartialEq)]
pub struct UserTask {
    pub context: ConversationContext,
}

/// Conversation handed back to the user proxy once a turn is finished.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentResponse {
    pub context: ConversationContext,
    pub reply_to: TopicType,
    /// Reply text for turns whose context was cleared and so carries no
    /// assistant turn to read it from.
    pub transient_reply: Option<String>,
}

pub enum Message {
    UserInput { text: String },
    UserLogin { username: String },
    Credentials { username: String, password: SecretString },
    Task(UserTask),
    Response(AgentResponse),
    Reset,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserInput { .. } => "user_input",
            Self::UserLogin { .. } => "user_login",
            Self::Credentials { .. } => "credentials",
            Self::Task(_) => "user_task",
            Self::Response(_) => "agent_response",
            Self::Reset => "reset",
        }
    }
}

impl Clone for Message {
    fn clone(&self) -> Self {
        match self {
            Self::UserInput { text } => Self::UserInput { text: text.clone() },
            Self::UserLogin { username } => Self::UserLogin { username: username.clone() },
            Self::Credentials { username, password } => Self::Credentials {
                username: username.clone(),
                password: SecretString::from(password.expose_secret().to_owned()),
            },
            Self::Task(task) => Self::Task(task.clone()),
            Self::Response(response) => Self::Response(response.clone()),
            Self::Reset => Self::Reset,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credentials { username, .. } => f
                .debug_struct("Credentials")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::UserInput { text } => f.debug_struct("UserInput").field("text", text).finish(),
            Self::UserLogin { username } => {
                f.debug_struct("UserLogin").field("username", username).finish()
            }
            Self::Task(task) => f.debug_tuple("Task").field(task).finish(),
            Self::Response(response) => f.debug_tuple("Response").field(response).finish(),
            Self::Reset => f.write_str("Reset"),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("agent type `{0}` is already registered")]
    DuplicateRegistration(AgentType),
    #[error("agent type `{0}` is not registered")]
    UnknownAgentType(AgentType),
    #[error("mailbox for session `{0}` is closed")]
    MailboxClosed(SessionId),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("{agent} does not handle {kind} messages")]
    Unsupported { agent: AgentType, kind: &'static str },
}

/// Everything an agent sees about the delivery it is handling.
pub struct MessageContext {
    pub agent_id: AgentId,
    /// `None` for direct sends.
    pub topic: Option<TopicId>,
    pub correlation_id: String,
    pub cancellation: CancellationToken,
    bus: MessageBus,
    /// Follow-up deliveries of the turn being handled. `None` outside a
    /// mailbox worker.
    outbox: Option<Mutex<Vec<Envelope>>>,
}

impl MessageContext {
    pub fn session(&self) -> &SessionId {
        &self.agent_id.key
    }

    /// Publishes to `topic_type` under the current session key.
    pub fn publish(
        &self,
        topic_type: impl Into<TopicType>,
        message: Message,
    ) -> Result<PublishReceipt, BusError> {
        let topic = TopicId::new(topic_type, self.session().clone());
        let Some(outbox) = &self.outbox else {
            return self.bus.publish_correlated(topic, message, self.correlation_id.clone());
        };
        match self.bus.prepare(topic, message, self.correlation_id.clone()) {
            Some(envelope) => {
                let subscribers = envelope.subscribers.len();
                lock(outbox).push(envelope);
                Ok(PublishReceipt::Queued { subscribers })
            }
            None => Ok(PublishReceipt::NoSubscribers),
        }
    }

    pub fn unsupported(&self, message: &Message) -> AgentError {
        AgentError::Unsupported { agent: self.agent_id.agent_type.clone(), kind: message.kind() }
    }
}

#[async_trait]
pub trait Agent: Send {
    /// Handles one delivery. The returned message is only meaningful for
    /// direct sends; published deliveries discard it.
    async fn handle(
        &mut self,
        message: Message,
        ctx: &MessageContext,
    ) -> Result<Option<Message>, AgentError>;
}

pub type AgentFactory = Arc<dyn Fn(&AgentId) -> Box<dyn Agent> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishReceipt {
    Queued { subscribers: usize },
    NoSubscribers,
}

#[derive(Default)]
struct Registry {
    factories: HashMap<AgentType, AgentFactory>,
    subscriptions: HashMap<TopicType, Vec<AgentType>>,
}

struct Envelope {
    topic: TopicId,
    message: Message,
    correlation_id: String,
    subscribers: Vec<AgentType>,
}

type Instance = Arc<tokio::sync::Mutex<Box<dyn Agent>>>;

struct BusInner {
    registry: RwLock<Registry>,
    instances: Mutex<HashMap<AgentId, Instance>>,
    mailboxes: Mutex<HashMap<SessionId, mpsc::UnboundedSender<Envelope>>>,
    cancellations: Mutex<HashMap<SessionId, CancellationToken>>,
    in_flight: watch::Sender<usize>,
    delivered: AtomicU64,
    undelivered: AtomicU64,
}

/// Topic-based publish/subscribe runtime with one FIFO mailbox per session.
///
/// Deliveries for one session key are handled strictly one after another.
/// Messages published while handling a delivery belong to the same turn and
/// are drained before the mailbox takes its next external message, so two
/// turns of one session never interleave. Different sessions run on
/// independent tasks.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MessageBus {
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(BusInner {
                registry: RwLock::new(Registry::default()),
                instances: Mutex::new(HashMap::new()),
                mailboxes: Mutex::new(HashMap::new()),
                cancellations: Mutex::new(HashMap::new()),
                in_flight,
                delivered: AtomicU64::new(0),
                undelivered: AtomicU64::new(0),
            }),
        }
    }

    fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        match self.inner.registry.read() {
            Ok(registry) => registry,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        match self.inner.registry.write() {
            Ok(registry) => registry,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register<F>(&self, agent_type: impl Into<AgentType>, factory: F) -> Result<(), BusError>
    where
        F: Fn(&AgentId) -> Box<dyn Agent> + Send + Sync + 'static,
    {
        let agent_type = agent_type.into();
        let mut registry = self.registry_mut();
        if registry.factories.contains_key(&agent_type) {
            return Err(BusError::DuplicateRegistration(agent_type));
        }
        debug!(event_name = "bus.agent_registered", agent_type = %agent_type, "agent type registered");
        registry.factories.insert(agent_type, Arc::new(factory));
        Ok(())
    }

    pub fn subscribe(
        &self,
        topic_type: impl Into<TopicType>,
        agent_type: impl Into<AgentType>,
    ) -> Result<(), BusError> {
        let topic_type = topic_type.into();
        let agent_type = agent_type.into();
        let mut registry = self.registry_mut();
        if !registry.factories.contains_key(&agent_type) {
            return Err(BusError::UnknownAgentType(agent_type));
        }
        let subscribers = registry.subscriptions.entry(topic_type).or_default();
        if !subscribers.contains(&agent_type) {
            subscribers.push(agent_type);
        }
        Ok(())
    }

    pub fn subscribers(&self, topic_type: &TopicType) -> Vec<AgentType> {
        self.registry().subscriptions.get(topic_type).cloned().unwrap_or_default()
    }

    pub fn publish(&self, topic: TopicId, message: Message) -> Result<PublishReceipt, BusError> {
        self.publish_correlated(topic, message, Uuid::new_v4().to_string())
    }

    fn publish_correlated(
        &self,
        topic: TopicId,
        message: Message,
        correlation_id: String,
    ) -> Result<PublishReceipt, BusError> {
        let Some(envelope) = self.prepare(topic, message, correlation_id) else {
            return Ok(PublishReceipt::NoSubscribers);
        };
        let count = envelope.subscribers.len();
        let session = envelope.topic.session.clone();
        if self.mailbox(&session).send(envelope).is_err() {
            self.finish_one();
            return Err(BusError::MailboxClosed(session));
        }
        Ok(PublishReceipt::Queued { subscribers: count })
    }

    /// Resolves subscribers and counts the delivery as in flight. `None`
    /// when nobody listens on the topic.
    fn prepare(&self, topic: TopicId, message: Message, correlation_id: String) -> Option<Envelope> {
        let subscribers = self.subscribers(&topic.topic_type);
        if subscribers.is_empty() {
            self.inner.undelivered.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_name = "bus.undelivered",
                topic = %topic,
                message_kind = message.kind(),
                correlation_id = %correlation_id,
                "no subscribers for topic; message dropped"
            );
            return None;
        }

        debug!(
            event_name = "bus.published",
            topic = %topic,
            message_kind = message.kind(),
            subscribers = subscribers.len(),
            correlation_id = %correlation_id,
            "message queued"
        );
        self.inner.in_flight.send_modify(|n| *n += 1);
        Some(Envelope { topic, message, correlation_id, subscribers })
    }

    /// Delivers straight to one instance and returns its reply. Runs on the
    /// caller's task, outside the session mailbox.
    pub async fn send_direct(
        &self,
        target: AgentId,
        message: Message,
    ) -> Result<Option<Message>, BusError> {
        let correlation_id = Uuid::new_v4().to_string();
        let instance = self.instance(&target)?;
        let ctx = MessageContext {
            agent_id: target.clone(),
            topic: None,
            correlation_id,
            cancellation: self.cancellation_token(&target.key),
            bus: self.clone(),
            outbox: None,
        };
        let kind = message.kind();
        let mut agent = instance.lock().await;
        match agent.handle(message, &ctx).await {
            Ok(reply) => {
                self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(reply)
            }
            Err(error) => {
                error!(
                    event_name = "bus.handler_failed",
                    agent_id = %target,
                    message_kind = kind,
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "direct delivery failed"
                );
                Ok(None)
            }
        }
    }

    /// Waits until every queued delivery, including ones published while
    /// waiting, has been handled.
    pub async fn run_until_idle(&self) {
        let mut in_flight = self.inner.in_flight.subscribe();
        let _ = in_flight.wait_for(|count| *count == 0).await;
    }

    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// Cancels the session's current token. Later deliveries get a fresh one.
    pub fn cancel_session(&self, session: &SessionId) {
        if let Some(token) = lock(&self.inner.cancellations).remove(session) {
            info!(event_name = "bus.session_cancelled", session_id = %session, "session cancelled");
            token.cancel();
        }
    }

    pub fn cancellation_token(&self, session: &SessionId) -> CancellationToken {
        lock(&self.inner.cancellations).entry(session.clone()).or_default().clone()
    }

    pub fn delivered_count(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    pub fn undelivered_count(&self) -> u64 {
        self.inner.undelivered.load(Ordering::Relaxed)
    }

    /// Drops the agent instances and cancellation token of a session that
    /// never had a message published to it. Returns `false` and leaves the
    /// session alone once it owns a mailbox.
    pub fn release_unused(&self, session: &SessionId) -> bool {
        let mailboxes = lock(&self.inner.mailboxes);
        if mailboxes.contains_key(session) {
            return false;
        }
        lock(&self.inner.instances).retain(|agent_id, _| &agent_id.key != session);
        lock(&self.inner.cancellations).remove(session);
        debug!(event_name = "bus.session_released", session_id = %session, "unused session released");
        true
    }

    pub fn instance_count(&self) -> usize {
        lock(&self.inner.instances).len()
    }

    fn instance(&self, agent_id: &AgentId) -> Result<Instance, BusError> {
        if let Some(instance) = lock(&self.inner.instances).get(agent_id) {
            return Ok(Arc::clone(instance));
        }

        let factory = self
            .registry()
            .factories
            .get(&agent_id.agent_type)
            .cloned()
            .ok_or_else(|| BusError::UnknownAgentType(agent_id.agent_type.clone()))?;

        let mut instances = lock(&self.inner.instances);
        let instance = instances.entry(agent_id.clone()).or_insert_with(|| {
            debug!(event_name = "bus.instance_created", agent_id = %agent_id, "agent instance created");
            Arc::new(tokio::sync::Mutex::new(factory(agent_id)))
        });
        Ok(Arc::clone(instance))
    }

    fn mailbox(&self, session: &SessionId) -> mpsc::UnboundedSender<Envelope> {
        let mut mailboxes = lock(&self.inner.mailboxes);
        if let Some(sender) = mailboxes.get(session).filter(|sender| !sender.is_closed()) {
            return sender.clone();
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_mailbox(Arc::downgrade(&self.inner), receiver));
        mailboxes.insert(session.clone(), sender.clone());
        sender
    }

    fn finish_one(&self) {
        self.inner.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Hands one envelope to every subscriber in order and returns what they
    /// published meanwhile.
    async fn dispatch(
        &self,
        envelope: Envelope,
        cancellation: &CancellationToken,
    ) -> Vec<Envelope> {
        let Envelope { topic, message, correlation_id, subscribers } = envelope;
        let mut follow_ups = Vec::new();

        for agent_type in subscribers {
            let agent_id = AgentId::new(agent_type, topic.session.clone());
            let instance = match self.instance(&agent_id) {
                Ok(instance) => instance,
                Err(error) => {
                    error!(
                        event_name = "bus.handler_failed",
                        agent_id = %agent_id,
                        error = %error,
                        "could not create agent instance"
                    );
                    continue;
                }
            };

            let ctx = MessageContext {
                agent_id: agent_id.clone(),
                topic: Some(topic.clone()),
                correlation_id: correlation_id.clone(),
                cancellation: cancellation.clone(),
                bus: self.clone(),
                outbox: Some(Mutex::new(Vec::new())),
            };

            let mut agent = instance.lock().await;
            let result = agent.handle(message.clone(), &ctx).await;
            drop(agent);
            if let Some(outbox) = ctx.outbox {
                follow_ups.extend(match outbox.into_inner() {
                    Ok(envelopes) => envelopes,
                    Err(poisoned) => poisoned.into_inner(),
                });
            }
            match result {
                Ok(_) => {
                    self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        event_name = "bus.delivered",
                        agent_id = %agent_id,
                        topic = %topic,
                        message_kind = message.kind(),
                        correlation_id = %correlation_id,
                        "message handled"
                    );
                }
                Err(error) => {
                    error!(
                        event_name = "bus.handler_failed",
                        agent_id = %agent_id,
                        topic = %topic,
                        message_kind = message.kind(),
                        correlation_id = %correlation_id,
                        error = %error,
                        "agent failed to handle message"
                    );
                }
            }
        }
        follow_ups
    }
}

async fn run_mailbox(inner: Weak<BusInner>, mut receiver: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = receiver.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let bus = MessageBus { inner };
        // One token for the whole turn, so a cancel reaches its follow-ups too.
        let cancellation = bus.cancellation_token(&envelope.topic.session);
        let mut turn = VecDeque::from([envelope]);
        while let Some(envelope) = turn.pop_front() {
            let follow_ups = bus.dispatch(envelope, &cancellation).await;
            turn.extend(follow_ups);
            bus.finish_one();
        }
    }
}
