use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bankdesk_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use bankdesk_core::domain::conversation::{ConversationContext, Turn};
use bankdesk_core::domain::label::{ClassificationLabel, UnknownLabel};
use bankdesk_core::domain::topic::TopicType;
use bankdesk_core::flows::{
    ConversationFlow, FlowAction, FlowEngine, FlowEvent, ReplyIntent, SessionState,
};

use crate::bus::{Agent, AgentError, AgentResponse, Message, MessageContext, UserTask};
use crate::model::{ModelClient, ModelOutput, ModelRequest};
use crate::session::SessionStore;

pub const CLASSIFIER_AGENT_TYPE: &str = "DomainClassifierAgent";
pub const SESSION_RESET_REPLY: &str = "Your session has been reset. How can I help you today?";

const CLASSIFIER_INSTRUCTIONS: &str = "\
You route banking customer messages to exactly one department.
Departments:
- RetailBankingAgent: personal accounts, balances, sending money, cards, loans for individuals.
- CorporateBusinessBankingAgent: business accounts, payroll, trade finance, commercial lending.
- InvestmentBankingAgent: IPOs, mergers and acquisitions, underwriting, capital markets deals.
- WealthManagementAgent: portfolios, retirement and estate planning, advisory.
- RiskManagementAgent: fraud, compliance, KYC and AML, credit risk.
- InsuranceAgent: policies, premiums, claims.
- ITOpsAgent: app or website problems, login trouble, OTP delivery, outages.
- PaymentsAgent: a payment made but not reflecting, status mismatches, reconciliation.
- CapitalTreasuryAgent: liquidity, FX, hedging, cash management.
- AnalyticsAgent: spending reports, trends, account insights.
Sending money is RetailBankingAgent. A payment that already happened but is missing or pending is PaymentsAgent.
Answer with one JSON object and nothing else: {\"agent_name\": \"<department>\"}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassificationParseError {
    #[error("classifier output contains no JSON object")]
    MissingObject,
    #[error("classifier output is malformed: {0}")]
    Malformed(String),
    #[error(transparent)]
    UnknownLabel(#[from] UnknownLabel),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Verdict {
    agent_name: String,
}

/// Reads `{"agent_name": "<label>"}` out of raw model text. Anything before
/// the first `{` or after the last `}` is ignored.
pub fn parse_classification(raw: &str) -> Result<ClassificationLabel, ClassificationParseError> {
    let object = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => return Err(ClassificationParseError::MissingObject),
    };
    let verdict: Verdict = serde_json::from_str(object)
        .map_err(|error| ClassificationParseError::Malformed(error.to_string()))?;
    Ok(verdict.agent_name.parse()?)
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("classification was cancelled")]
pub struct ClassificationCancelled;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub label: ClassificationLabel,
    /// Set when the default label was substituted for the model's verdict.
    pub fallback_reason: Option<String>,
}

/// Maps free text onto one label. Any model or parse problem yields the
/// configured default label; only a cancelled turn gets no label at all.
pub struct DomainClassifier {
    model: Arc<dyn ModelClient>,
    default_label: ClassificationLabel,
    timeout: Duration,
}

impl DomainClassifier {
    pub fn new(
        model: Arc<dyn ModelClient>,
        default_label: ClassificationLabel,
        timeout: Duration,
    ) -> Self {
        Self { model, default_label, timeout }
    }

    pub fn default_label(&self) -> ClassificationLabel {
        self.default_label
    }

    pub async fn classify(
        &self,
        text: &str,
        cancellation: &CancellationToken,
    ) -> Result<Classification, ClassificationCancelled> {
        let request = ModelRequest {
            instructions: CLASSIFIER_INSTRUCTIONS.to_string(),
            turns: vec![Turn::user(text)],
            tools: Vec::new(),
            json_output: true,
        };

        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(ClassificationCancelled),
            result = tokio::time::timeout(self.timeout, self.model.complete(request)) => match result {
                Err(_) => Err(format!("model call timed out after {:?}", self.timeout)),
                Ok(Err(error)) => Err(error.to_string()),
                Ok(Ok(ModelOutput::ToolCalls(_))) => {
                    Err("model answered with tool calls".to_string())
                }
                Ok(Ok(ModelOutput::Text(raw))) => {
                    parse_classification(&raw).map_err(|error| error.to_string())
                }
            },
        };

        match outcome {
            Ok(label) => Ok(Classification { label, fallback_reason: None }),
            Err(reason) => {
                warn!(
                    event_name = "classifier.fallback",
                    default_label = %self.default_label,
                    reason = %reason,
                    "classifier output unusable; using default label"
                );
                Ok(Classification { label: self.default_label, fallback_reason: Some(reason) })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoffRoute {
    pub topic: TopicType,
    pub tool_name: String,
}

impl HandoffRoute {
    pub fn for_label(label: ClassificationLabel) -> Self {
        Self { topic: TopicType::new(label.topic()), tool_name: label.transfer_tool().to_string() }
    }
}

/// Label to handler topic lookup. Unmapped labels resolve to the fallback route.
#[derive(Clone, Debug)]
pub struct HandoffTable {
    routes: HashMap<ClassificationLabel, HandoffRoute>,
    fallback: HandoffRoute,
}

impl HandoffTable {
    pub fn new(fallback: HandoffRoute) -> Self {
        Self { routes: HashMap::new(), fallback }
    }

    pub fn standard(default_label: ClassificationLabel) -> Self {
        ClassificationLabel::ALL.into_iter().fold(
            Self::new(HandoffRoute::for_label(default_label)),
            |table, label| table.with_route(label, HandoffRoute::for_label(label)),
        )
    }

    pub fn with_route(mut self, label: ClassificationLabel, route: HandoffRoute) -> Self {
        self.routes.insert(label, route);
        self
    }

    pub fn resolve(&self, label: ClassificationLabel) -> &HandoffRoute {
        self.routes.get(&label).unwrap_or_else(|| {
            warn!(
                event_name = "classifier.unmapped_label",
                label = %label,
                fallback_topic = %self.fallback.topic,
                "label has no handler; using fallback route"
            );
            &self.fallback
        })
    }
}

#[derive(Clone)]
pub struct ClassifierDeps {
    pub classifier: Arc<DomainClassifier>,
    pub handoffs: Arc<HandoffTable>,
    pub sessions: SessionStore,
    pub audit: Arc<dyn AuditSink>,
}

/// Entry point for every user turn: runs the post-resolution dialog when one
/// is open, otherwise classifies and hands the task to a domain handler.
pub struct ClassifierAgent {
    deps: ClassifierDeps,
    flow: FlowEngine<ConversationFlow>,
}

impl ClassifierAgent {
    pub fn new(deps: ClassifierDeps) -> Self {
        Self { deps, flow: FlowEngine::default() }
    }

    fn audit_context(&self, ctx: &MessageContext) -> AuditContext {
        AuditContext::new(
            Some(ctx.session().clone()),
            ctx.correlation_id.clone(),
            CLASSIFIER_AGENT_TYPE,
        )
    }

    async fn route(
        &mut self,
        task: UserTask,
        ctx: &MessageContext,
    ) -> Result<Option<Message>, AgentError> {
        let session = ctx.session().clone();
        let mut context = task.context;
        let current = self.deps.sessions.state(&session);

        let intent = ReplyIntent::parse(context.last_user_text().unwrap_or_default());
        match self.flow.apply_with_audit(
            &current,
            &FlowEvent::UserReplied(intent),
            self.deps.audit.as_ref(),
            &self.audit_context(ctx),
        ) {
            Ok(outcome) => match outcome.actions.first() {
                Some(FlowAction::Classify) => {}
                Some(FlowAction::RouteTo(topic)) => {
                    info!(
                        event_name = "classifier.follow_up",
                        session_id = %session,
                        topic = %topic,
                        "continuing with the previous handler"
                    );
                    ctx.publish(topic.clone(), Message::Task(UserTask { context }))?;
                    return Ok(None);
                }
                _ => {
                    let reply = outcome.reply_text().unwrap_or_default();
                    self.deps.sessions.set_state(&session, outcome.to.clone());
                    let response = if outcome.clears_context() {
                        AgentResponse {
                            context: ConversationContext::new(),
                            reply_to: TopicType::classifier(),
                            transient_reply: Some(reply),
                        }
                    } else {
                        context.push(Turn::assistant_text(CLASSIFIER_AGENT_TYPE, reply));
                        AgentResponse {
                            context,
                            reply_to: TopicType::classifier(),
                            transient_reply: None,
                        }
                    };
                    ctx.publish(TopicType::user(), Message::Response(response))?;
                    return Ok(None);
                }
            },
            Err(error) => {
                warn!(
                    event_name = "classifier.state_recovered",
                    session_id = %session,
                    error = %error,
                    "session state was inconsistent; starting over with classification"
                );
                self.deps.sessions.set_state(&session, SessionState::fresh());
            }
        }

        let text = context.last_user_text().unwrap_or_default().to_owned();
        let Ok(classification) = self.deps.classifier.classify(&text, &ctx.cancellation).await
        else {
            info!(
                event_name = "classifier.cancelled",
                session_id = %session,
                "turn cancelled before routing; no handoff recorded"
            );
            self.deps.sessions.store_context(&session, context);
            return Ok(None);
        };
        let route = self.deps.handoffs.resolve(classification.label).clone();
        context.record_handoff(CLASSIFIER_AGENT_TYPE, &route.tool_name, route.topic.as_str());

        let outcome =
            if classification.fallback_reason.is_some() { AuditOutcome::Rejected } else { AuditOutcome::Success };
        self.deps.audit.emit(
            AuditEvent::new(
                Some(session.clone()),
                ctx.correlation_id.clone(),
                "routing.handoff",
                AuditCategory::Routing,
                CLASSIFIER_AGENT_TYPE,
                outcome,
            )
            .with_metadata("label", classification.label.as_str())
            .with_metadata("topic", route.topic.as_str()),
        );
        info!(
            event_name = "classifier.routed",
            session_id = %session,
            label = %classification.label,
            topic = %route.topic,
            "user task handed to domain handler"
        );

        ctx.publish(route.topic, Message::Task(UserTask { context }))?;
        Ok(None)
    }

    fn reset(&mut self, ctx: &MessageContext) -> Result<Option<Message>, AgentError> {
        let session = ctx.session().clone();
        let current = self.deps.sessions.state(&session);
        // Reset is total, so the transition cannot fail.
        let _ = self.flow.apply_with_audit(
            &current,
            &FlowEvent::Reset,
            self.deps.audit.as_ref(),
            &self.audit_context(ctx),
        );
        self.deps.sessions.reset(&session);
        info!(event_name = "classifier.session_reset", session_id = %session, "session reset");

        ctx.publish(
            TopicType::user(),
            Message::Response(AgentResponse {
                context: ConversationContext::new(),
                reply_to: TopicType::classifier(),
                transient_reply: Some(SESSION_RESET_REPLY.to_string()),
            }),
        )?;
        Ok(None)
    }
}

#[async_trait]
impl Agent for ClassifierAgent {
    async fn handle(
        &mut self,
        message: Message,
        ctx: &MessageContext,
    ) -> Result<Option<Message>, AgentError> {
        match message {
            Message::Task(task) => self.route(task, ctx).await,
            Message::Reset => self.reset(ctx),
            other => Err(ctx.unsupported(&other)),
        }
    }
}
