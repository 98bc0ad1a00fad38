use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use bankdesk_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use bankdesk_core::domain::conversation::{ToolResult, Turn};
use bankdesk_core::domain::label::ClassificationLabel;
use bankdesk_core::domain::topic::{AgentType, TopicType};
use bankdesk_core::errors::ApplicationError;
use bankdesk_core::flows::{ConversationFlow, FlowEngine, FlowEvent};
use bankdesk_db::repositories::{AccountRepository, GatewayRepository};

use crate::banking_tools::{
    CheckBalanceTool, FixCoreBankingStatusTool, LookupTransactionTool, MakePaymentTool,
    CHECK_BALANCE, FIX_CORE_BANKING_STATUS, LOOKUP_TRANSACTION, MAKE_PAYMENT,
};
use crate::bus::{Agent, AgentError, AgentResponse, Message, MessageContext, UserTask};
use crate::model::ModelClient;
use crate::session::SessionStore;
use crate::tool_loop::ToolLoop;
use crate::tools::{ToolContext, ToolRegistry};

/// Decides whether a finished turn closed the customer's issue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolutionPolicy {
    /// Any final answer resolves the issue.
    OnAnswer,
    /// Resolved once one of the named tools succeeded during the turn;
    /// otherwise the handler keeps the conversation.
    OnToolSuccess(Vec<&'static str>),
}

impl ResolutionPolicy {
    pub fn is_resolved(&self, executed: &[ToolResult]) -> bool {
        match self {
            Self::OnAnswer => true,
            Self::OnToolSuccess(names) => executed
                .iter()
                .any(|result| !result.is_error && names.contains(&result.name.as_str())),
        }
    }
}

#[derive(Clone)]
pub struct HandlerSpec {
    pub label: ClassificationLabel,
    pub instructions: String,
    pub tools: ToolRegistry,
    pub resolution: ResolutionPolicy,
}

impl HandlerSpec {
    pub fn agent_type(&self) -> AgentType {
        AgentType::new(self.label.as_str())
    }

    pub fn topic(&self) -> TopicType {
        TopicType::new(self.label.topic())
    }
}

fn persona(label: ClassificationLabel) -> (&'static str, &'static str) {
    use ClassificationLabel::*;
    match label {
        RetailBanking => (
            "retail banking",
            "Help with personal accounts. Use check_balance for balance questions and \
             make_payment to send money. Ask for the receiver and amount when either is missing.",
        ),
        CorporateBusinessBanking => (
            "corporate and business banking",
            "Help businesses with accounts, payroll, trade finance and commercial lending.",
        ),
        InvestmentBanking => (
            "investment banking",
            "Explain capital markets services such as IPOs, underwriting and advisory on mergers.",
        ),
        WealthManagement => (
            "wealth management",
            "Discuss portfolios, retirement planning and advisory services in general terms.",
        ),
        RiskManagement => (
            "risk management",
            "Handle fraud reports, KYC and compliance questions. Never ask for full card numbers.",
        ),
        Insurance => ("insurance", "Explain policies, premiums and the claims process."),
        ItOps => (
            "IT operations",
            "Troubleshoot app, website, login and OTP problems step by step.",
        ),
        Payments => (
            "payments",
            "Resolve payments that are not reflecting. Ask for the transaction ID if it is \
             missing, look it up with lookup_transaction, and when PaymentStatus is Success \
             but CoreBankingStatus is not, call fix_core_banking_status. Summarise the result.",
        ),
        CapitalTreasury => (
            "capital and treasury",
            "Cover liquidity, FX, hedging and cash management questions.",
        ),
        Analytics => (
            "analytics",
            "Describe spending reports, trends and account insights.",
        ),
    }
}

fn instructions_for(label: ClassificationLabel) -> String {
    let (department, duties) = persona(label);
    format!(
        "You are the {department} assistant of a bank, speaking to a signed-in customer. \
         {duties} Keep answers short and factual. Do not invent balances or transaction data."
    )
}

/// The ten standard handlers, tool-backed for retail and payments.
pub fn standard_handlers(
    accounts: Arc<dyn AccountRepository>,
    gateway: Arc<dyn GatewayRepository>,
) -> Vec<HandlerSpec> {
    ClassificationLabel::ALL
        .into_iter()
        .map(|label| {
            let (tools, resolution) = match label {
                ClassificationLabel::RetailBanking => (
                    ToolRegistry::default()
                        .with(CheckBalanceTool::new(Arc::clone(&accounts)))
                        .with(MakePaymentTool::new(Arc::clone(&accounts))),
                    ResolutionPolicy::OnToolSuccess(vec![CHECK_BALANCE, MAKE_PAYMENT]),
                ),
                ClassificationLabel::Payments => (
                    ToolRegistry::default()
                        .with(LookupTransactionTool::new(Arc::clone(&gateway)))
                        .with(FixCoreBankingStatusTool::new(Arc::clone(&gateway))),
                    ResolutionPolicy::OnToolSuccess(vec![
                        LOOKUP_TRANSACTION,
                        FIX_CORE_BANKING_STATUS,
                    ]),
                ),
                _ => (ToolRegistry::default(), ResolutionPolicy::OnAnswer),
            };
            HandlerSpec { label, instructions: instructions_for(label), tools, resolution }
        })
        .collect()
}

#[derive(Clone)]
pub struct HandlerDeps {
    pub model: Arc<dyn ModelClient>,
    pub tool_loop: ToolLoop,
    pub sessions: SessionStore,
    pub audit: Arc<dyn AuditSink>,
}

/// Answers one domain's tasks through the tool loop and reports back to the
/// user proxy.
pub struct DomainHandler {
    spec: Arc<HandlerSpec>,
    deps: HandlerDeps,
    flow: FlowEngine<ConversationFlow>,
}

impl DomainHandler {
    pub fn new(spec: Arc<HandlerSpec>, deps: HandlerDeps) -> Self {
        Self { spec, deps, flow: FlowEngine::default() }
    }

    async fn answer(
        &mut self,
        task: UserTask,
        ctx: &MessageContext,
    ) -> Result<Option<Message>, AgentError> {
        let session = ctx.session().clone();
        let agent_type = self.spec.agent_type();
        let topic = self.spec.topic();
        let audit = AuditContext::new(
            Some(session.clone()),
            ctx.correlation_id.clone(),
            agent_type.as_str(),
        );
        let tool_ctx = ToolContext::new(session.clone(), agent_type.clone(), ctx.cancellation.clone())
            .with_audit(Arc::clone(&self.deps.audit), ctx.correlation_id.clone());
        let mut context = task.context;

        let result = self
            .deps
            .tool_loop
            .run(
                self.deps.model.as_ref(),
                &self.spec.instructions,
                &self.spec.tools,
                &mut context,
                &tool_ctx,
            )
            .await;

        match result {
            Ok(outcome) => {
                let resolved = self.spec.resolution.is_resolved(&outcome.executed);
                let event = if resolved {
                    FlowEvent::IssueResolved { by: topic.clone() }
                } else {
                    FlowEvent::HandlerContinues { by: topic.clone() }
                };
                let current = self.deps.sessions.state(&session);
                match self.flow.apply_with_audit(&current, &event, self.deps.audit.as_ref(), &audit)
                {
                    Ok(transition) => {
                        self.deps.sessions.set_state(&session, transition.to.clone());
                        if let Some(prompt) = transition.reply_text() {
                            context.push(Turn::assistant_text(agent_type.as_str(), prompt));
                        }
                    }
                    Err(error) => warn!(
                        event_name = "handler.transition_rejected",
                        session_id = %session,
                        agent_type = %agent_type,
                        error = %error,
                        "handler outcome could not be applied to the session"
                    ),
                }
                info!(
                    event_name = "handler.turn_completed",
                    session_id = %session,
                    agent_type = %agent_type,
                    resolved,
                    iterations = outcome.iterations,
                    "handler answered the task"
                );
            }
            Err(error) => {
                let reason = error.to_string();
                let failure = ApplicationError::from(error).into_interface(ctx.correlation_id.clone());
                warn!(
                    event_name = "handler.turn_failed",
                    session_id = %session,
                    agent_type = %agent_type,
                    correlation_id = %ctx.correlation_id,
                    error = %reason,
                    "handler turn failed; replying with an apology"
                );
                self.deps.audit.emit(
                    AuditEvent::new(
                        Some(session.clone()),
                        ctx.correlation_id.clone(),
                        "handler.turn_failed",
                        AuditCategory::Tool,
                        agent_type.as_str(),
                        AuditOutcome::Failed,
                    )
                    .with_metadata("reason", reason),
                );
                context.push(Turn::assistant_text(agent_type.as_str(), failure.user_message()));
            }
        }

        ctx.publish(
            TopicType::user(),
            Message::Response(AgentResponse { context, reply_to: topic, transient_reply: None }),
        )?;
        Ok(None)
    }
}

#[async_trait]
impl Agent for DomainHandler {
    async fn handle(
        &mut self,
        message: Message,
        ctx: &MessageContext,
    ) -> Result<Option<Message>, AgentError> {
        match message {
            Message::Task(task) => self.answer(task, ctx).await,
            other => Err(ctx.unsupported(&other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use bankdesk_core::domain::conversation::{ToolCall, ToolResult};
    use bankdesk_core::domain::label::ClassificationLabel;
    use bankdesk_db::repositories::{InMemoryAccountRepository, InMemoryGatewayRepository};

    use super::{standard_handlers, ResolutionPolicy};

    #[test]
    fn tool_success_policy_ignores_failed_and_unrelated_results() {
        let policy = ResolutionPolicy::OnToolSuccess(vec!["fix_core_banking_status"]);
        let fix = ToolCall::new("c1", "fix_core_banking_status", json!({}));
        let lookup = ToolCall::new("c2", "lookup_transaction", json!({}));

        assert!(!policy.is_resolved(&[]));
        assert!(!policy.is_resolved(&[ToolResult::success(&lookup, "{}")]));
        assert!(!policy.is_resolved(&[ToolResult::error(&fix, "{}")]));
        assert!(policy.is_resolved(&[ToolResult::success(&fix, "{}")]));
        assert!(ResolutionPolicy::OnAnswer.is_resolved(&[]));
    }

    #[test]
    fn catalogue_covers_every_label_once() {
        let handlers = standard_handlers(
            Arc::new(InMemoryAccountRepository::default()),
            Arc::new(InMemoryGatewayRepository::default()),
        );

        assert_eq!(handlers.len(), ClassificationLabel::ALL.len());
        let retail = &handlers[0];
        assert_eq!(retail.label, ClassificationLabel::RetailBanking);
        assert_eq!(retail.tools.names(), vec!["check_balance", "make_payment"]);
        let payments = handlers
            .iter()
            .find(|spec| spec.label == ClassificationLabel::Payments)
            .expect("payments handler");
        assert_eq!(payments.tools.names(), vec!["fix_core_banking_status", "lookup_transaction"]);
        assert!(handlers
            .iter()
            .filter(|spec| spec.tools.is_empty())
            .all(|spec| spec.resolution == ResolutionPolicy::OnAnswer));
    }
}
