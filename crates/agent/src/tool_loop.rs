use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use bankdesk_core::config::DEFAULT_MAX_TOOL_ITERATIONS;
use bankdesk_core::domain::conversation::{ConversationContext, ToolResult, Turn};
use bankdesk_core::errors::ApplicationError;

use crate::model::{ModelClient, ModelError, ModelOutput, ModelRequest};
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolLoopError {
    #[error("tool loop exceeded {limit} model invocations without a final answer")]
    Exceeded { limit: u32 },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("turn was cancelled")]
    Cancelled,
    #[error("conversation does not end with unanswered input")]
    NotAwaitingAnswer,
}

impl From<ToolLoopError> for ApplicationError {
    fn from(value: ToolLoopError) -> Self {
        match value {
            ToolLoopError::Model(error) => Self::Integration(error.to_string()),
            other => Self::TurnAborted(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolLoopOutcome {
    pub answer: String,
    pub iterations: u32,
    /// Every tool result produced during this run, in execution order.
    pub executed: Vec<ToolResult>,
}

/// Bounded call-tools-until-text loop over one conversation context.
#[derive(Clone, Debug)]
pub struct ToolLoop {
    max_iterations: u32,
    model_timeout: Duration,
}

impl Default for ToolLoop {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOOL_ITERATIONS, Duration::from_secs(30))
    }
}

impl ToolLoop {
    pub fn new(max_iterations: u32, model_timeout: Duration) -> Self {
        Self { max_iterations: max_iterations.max(1), model_timeout }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Calls the model until it answers with text. Each model call counts as
    /// one iteration. Tool calls of a batch run sequentially and their
    /// results are appended in call order.
    pub async fn run(
        &self,
        model: &dyn ModelClient,
        instructions: &str,
        tools: &ToolRegistry,
        context: &mut ConversationContext,
        ctx: &ToolContext,
    ) -> Result<ToolLoopOutcome, ToolLoopError> {
        if !context.awaiting_answer() {
            return Err(ToolLoopError::NotAwaitingAnswer);
        }

        let source = ctx.agent_type.as_str().to_owned();
        let mut executed = Vec::new();

        for iteration in 1..=self.max_iterations {
            if ctx.cancellation.is_cancelled() {
                return Err(self.cancelled(ctx, iteration));
            }

            let request = ModelRequest {
                instructions: instructions.to_owned(),
                turns: context.turns().to_vec(),
                tools: tools.schemas(),
                json_output: false,
            };

            let output = tokio::select! {
                _ = ctx.cancellation.cancelled() => return Err(self.cancelled(ctx, iteration)),
                result = tokio::time::timeout(self.model_timeout, model.complete(request)) => {
                    match result {
                        Ok(output) => output?,
                        Err(_) => return Err(ModelError::Timeout(self.model_timeout).into()),
                    }
                }
            };

            match output {
                ModelOutput::Text(answer) => {
                    context.push(Turn::assistant_text(source.as_str(), answer.as_str()));
                    info!(
                        event_name = "tool_loop.completed",
                        session_id = %ctx.session,
                        agent_type = %ctx.agent_type,
                        iterations = iteration,
                        tools_executed = executed.len(),
                        "tool loop produced a final answer"
                    );
                    return Ok(ToolLoopOutcome { answer, iterations: iteration, executed });
                }
                ModelOutput::ToolCalls(calls) if calls.is_empty() => {
                    return Err(ModelError::InvalidResponse(
                        "tool call batch was empty".to_string(),
                    )
                    .into());
                }
                ModelOutput::ToolCalls(calls) => {
                    debug!(
                        event_name = "tool_loop.tool_batch",
                        session_id = %ctx.session,
                        agent_type = %ctx.agent_type,
                        iteration,
                        calls = calls.len(),
                        "executing tool batch"
                    );
                    context.push(Turn::tool_calls(source.as_str(), calls.clone()));
                    for call in &calls {
                        let result = tools.invoke(call, ctx).await;
                        context.push(Turn::ToolResult(result.clone()));
                        executed.push(result);
                    }
                }
            }
        }

        warn!(
            event_name = "tool_loop.exceeded",
            session_id = %ctx.session,
            agent_type = %ctx.agent_type,
            limit = self.max_iterations,
            "tool loop hit its iteration bound"
        );
        Err(ToolLoopError::Exceeded { limit: self.max_iterations })
    }

    fn cancelled(&self, ctx: &ToolContext, iteration: u32) -> ToolLoopError {
        info!(
            event_name = "tool_loop.cancelled",
            session_id = %ctx.session,
            agent_type = %ctx.agent_type,
            iteration,
            "tool loop stopped by cancellation"
        );
        ToolLoopError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use bankdesk_core::domain::conversation::{
        AssistantContent, ConversationContext, ToolCall, Turn,
    };
    use bankdesk_core::domain::session::SessionId;
    use bankdesk_core::domain::topic::AgentType;

    use super::{ToolLoop, ToolLoopError};
    use crate::model::{ModelOutput, ScriptedModel};
    use crate::tools::{Tool, ToolContext, ToolError, ToolRegistry};

    struct Counter;

    #[async_trait]
    impl Tool for Counter {
        fn name(&self) -> &'static str {
            "count"
        }

        fn description(&self) -> &'static str {
            "Returns a constant."
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(json!({"count": 1}))
        }
    }

    fn ctx(token: CancellationToken) -> ToolContext {
        ToolContext::new(SessionId::new("alice"), AgentType::new("RetailBankingAgent"), token)
    }

    fn context_with(text: &str) -> ConversationContext {
        let mut context = ConversationContext::new();
        context.push(Turn::user(text));
        context
    }

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "count", json!({}))
    }

    #[tokio::test]
    async fn tool_batch_then_text_appends_turns_in_order() {
        let model = ScriptedModel::with_outputs([
            ModelOutput::ToolCalls(vec![call("a"), call("b")]),
            ModelOutput::Text("done".to_string()),
        ]);
        let registry = ToolRegistry::default().with(Counter);
        let mut context = context_with("count twice");

        let outcome = ToolLoop::default()
            .run(&model, "be brief", &registry, &mut context, &ctx(CancellationToken::new()))
            .await
            .expect("loop should finish");

        assert_eq!(outcome.answer, "done");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.executed.len(), 2);
        let turns = context.turns();
        assert_eq!(turns.len(), 5);
        assert!(matches!(&turns[1], Turn::Assistant { content: AssistantContent::ToolCalls(calls), .. } if calls.len() == 2));
        assert!(matches!(&turns[2], Turn::ToolResult(result) if result.call_id == "a"));
        assert!(matches!(&turns[3], Turn::ToolResult(result) if result.call_id == "b"));
        assert!(matches!(&turns[4], Turn::Assistant { content: AssistantContent::Text(text), .. } if text == "done"));
        assert_eq!(model.requests()[1].turns.len(), 4);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_back_to_the_model() {
        let model = ScriptedModel::with_outputs([
            ModelOutput::ToolCalls(vec![ToolCall::new("x1", "open_vault", json!({}))]),
            ModelOutput::Text("I cannot do that, but here is what I can do.".to_string()),
        ]);
        let registry = ToolRegistry::default().with(Counter);
        let mut context = context_with("open the vault");

        let outcome = ToolLoop::default()
            .run(&model, "", &registry, &mut context, &ctx(CancellationToken::new()))
            .await
            .expect("unknown tool must not end the turn");

        assert_eq!(model.call_count(), 2);
        assert_eq!(outcome.answer, "I cannot do that, but here is what I can do.");
        let turns = context.turns();
        assert!(matches!(
            &turns[2],
            Turn::ToolResult(result)
                if result.is_error && result.call_id == "x1" && result.content.contains("unknown tool `open_vault`")
        ));
        assert!(model.requests()[1].turns.iter().any(|turn| matches!(turn, Turn::ToolResult(r) if r.is_error)));
    }

    #[tokio::test]
    async fn loop_stops_after_the_configured_number_of_model_calls() {
        let model = ScriptedModel::repeating(ModelOutput::ToolCalls(vec![call("again")]));
        let registry = ToolRegistry::default().with(Counter);
        let mut context = context_with("loop forever");

        let error = ToolLoop::new(3, Duration::from_secs(5))
            .run(&model, "", &registry, &mut context, &ctx(CancellationToken::new()))
            .await
            .expect_err("loop must be bounded");

        assert_eq!(error, ToolLoopError::Exceeded { limit: 3 });
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn cancelled_turn_never_calls_the_model() {
        let model = ScriptedModel::with_outputs([ModelOutput::Text("late".to_string())]);
        let token = CancellationToken::new();
        token.cancel();
        let mut context = context_with("hello");

        let error = ToolLoop::default()
            .run(&model, "", &ToolRegistry::default(), &mut context, &ctx(token))
            .await
            .expect_err("cancelled");

        assert_eq!(error, ToolLoopError::Cancelled);
        assert_eq!(model.call_count(), 0);
        assert_eq!(context.len(), 1);
    }

    #[tokio::test]
    async fn answered_context_is_rejected() {
        let model = ScriptedModel::default();
        let mut context = context_with("hi");
        context.push(Turn::assistant_text("RetailBankingAgent", "hello"));

        let error = ToolLoop::default()
            .run(&model, "", &ToolRegistry::default(), &mut context, &ctx(CancellationToken::new()))
            .await
            .expect_err("nothing to answer");

        assert_eq!(error, ToolLoopError::NotAwaitingAnswer);
    }
}
