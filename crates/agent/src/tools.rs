use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bankdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use bankdesk_core::domain::conversation::{ToolCall, ToolResult};
use bankdesk_core::domain::session::SessionId;
use bankdesk_core::domain::topic::AgentType;

use crate::model::ToolSchema;

/// Per-invocation data handed to a tool: who is asking and whether the turn
/// has been cancelled.
#[derive(Clone)]
pub struct ToolContext {
    pub session: SessionId,
    pub agent_type: AgentType,
    pub cancellation: CancellationToken,
    audit: Option<(Arc<dyn AuditSink>, String)>,
}

impl ToolContext {
    pub fn new(session: SessionId, agent_type: AgentType, cancellation: CancellationToken) -> Self {
        Self { session, agent_type, cancellation, audit: None }
    }

    /// Records a `tool.executed` audit event for every invocation.
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>, correlation_id: impl Into<String>) -> Self {
        self.audit = Some((sink, correlation_id.into()));
        self
    }

    fn record(&self, result: &ToolResult) {
        let Some((sink, correlation_id)) = &self.audit else {
            return;
        };
        let outcome = if result.is_error { AuditOutcome::Failed } else { AuditOutcome::Success };
        sink.emit(
            AuditEvent::new(
                Some(self.session.clone()),
                correlation_id.clone(),
                "tool.executed",
                AuditCategory::Tool,
                self.agent_type.as_str(),
                outcome,
            )
            .with_metadata("tool", result.name.as_str())
            .with_metadata("call_id", result.call_id.as_str()),
        );
    }

    pub fn ensure_active(&self) -> Result<(), ToolError> {
        if self.cancellation.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
    #[error("request was cancelled before any change was made")]
    Cancelled,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema describing the accepted arguments object.
    fn parameters(&self) -> Value;
    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

pub fn parse_arguments<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments).map_err(|error| ToolError::InvalidArguments(error.to_string()))
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn with<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.register(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Runs one call. Unknown tools and tool failures come back as error
    /// results so the model can see them on its next call.
    pub async fn invoke(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let result = self.execute(call, ctx).await;
        ctx.record(&result);
        result
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(
                event_name = "tool_loop.unknown_tool",
                session_id = %ctx.session,
                agent_type = %ctx.agent_type,
                tool = %call.name,
                "model requested a tool that is not registered"
            );
            let message =
                format!("unknown tool `{}`; available tools: {}", call.name, self.names().join(", "));
            return ToolResult::error(call, error_payload(&message));
        };

        match tool.execute(call.arguments.clone(), ctx).await {
            Ok(value) => {
                info!(
                    event_name = "tool_loop.tool_succeeded",
                    session_id = %ctx.session,
                    agent_type = %ctx.agent_type,
                    tool = %call.name,
                    "tool call completed"
                );
                ToolResult::success(call, value.to_string())
            }
            Err(error) => {
                warn!(
                    event_name = "tool_loop.tool_failed",
                    session_id = %ctx.session,
                    agent_type = %ctx.agent_type,
                    tool = %call.name,
                    error = %error,
                    "tool call failed"
                );
                ToolResult::error(call, error_payload(&error.to_string()))
            }
        }
    }
}

fn error_payload(message: &str) -> String {
    json!({ "error": message }).to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use bankdesk_core::audit::{AuditCategory, AuditOutcome, InMemoryAuditSink};
    use bankdesk_core::domain::conversation::ToolCall;
    use bankdesk_core::domain::session::SessionId;
    use bankdesk_core::domain::topic::AgentType;

    use super::{parse_arguments, Tool, ToolContext, ToolError, ToolRegistry};

    struct Echo;

    #[derive(Deserialize)]
    struct EchoArgs {
        text: String,
    }

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echo text back."
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
        }

        async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            let args: EchoArgs = parse_arguments(arguments)?;
            Ok(json!({ "echo": args.text }))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(SessionId::new("alice"), AgentType::new("Test"), CancellationToken::new())
    }

    #[tokio::test]
    async fn invoke_returns_success_payload() {
        let registry = ToolRegistry::default().with(Echo);
        let call = ToolCall::new("c1", "echo", json!({"text": "hi"}));

        let result = registry.invoke(&call, &ctx()).await;

        assert!(!result.is_error);
        assert_eq!(result.call_id, "c1");
        assert_eq!(result.content, r#"{"echo":"hi"}"#);
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_fold_into_error_results() {
        let registry = ToolRegistry::default().with(Echo);

        let unknown = registry.invoke(&ToolCall::new("c1", "teleport", json!({})), &ctx()).await;
        assert!(unknown.is_error);
        assert!(unknown.content.contains("unknown tool `teleport`"));
        assert!(unknown.content.contains("echo"));

        let bad = registry.invoke(&ToolCall::new("c2", "echo", json!({"txt": 1})), &ctx()).await;
        assert!(bad.is_error);
        assert!(bad.content.contains("invalid arguments"));
    }

    #[tokio::test]
    async fn every_invocation_is_audited_with_its_outcome() {
        let audit = Arc::new(InMemoryAuditSink::default());
        let registry = ToolRegistry::default().with(Echo);
        let ctx = ctx().with_audit(audit.clone(), "corr-1");

        registry.invoke(&ToolCall::new("c1", "echo", json!({"text": "hi"})), &ctx).await;
        registry.invoke(&ToolCall::new("c2", "teleport", json!({})), &ctx).await;

        let events = audit.events_of_type("tool.executed");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome, AuditOutcome::Success);
        assert_eq!(events[0].category, AuditCategory::Tool);
        assert_eq!(events[0].correlation_id, "corr-1");
        assert_eq!(events[0].metadata["tool"], "echo");
        assert_eq!(events[1].outcome, AuditOutcome::Failed);
        assert_eq!(events[1].metadata["call_id"], "c2");
        assert_eq!(events[1].actor, "Test");
    }

    #[test]
    fn schemas_are_listed_in_name_order() {
        let registry = ToolRegistry::default().with(Echo);
        let schemas = registry.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "echo");
        assert_eq!(schemas[0].parameters["required"][0], "text");
    }
}
