use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use bankdesk_core::domain::conversation::{ToolCall, Turn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    pub instructions: String,
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolSchema>,
    /// Ask the backend for a single JSON object instead of prose.
    pub json_output: bool,
}

/// What a model call produced: final text or a batch of tool invocations.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelOutput {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model backend unavailable: {0}")]
    Unavailable(String),
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("model returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelOutput, ModelError>;
}

/// Replays queued outputs in order and records every request it sees.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelOutput, ModelError>>>,
    repeat: Option<ModelOutput>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(script: impl IntoIterator<Item = Result<ModelOutput, ModelError>>) -> Self {
        Self { script: Mutex::new(script.into_iter().collect()), ..Self::default() }
    }

    pub fn with_outputs(outputs: impl IntoIterator<Item = ModelOutput>) -> Self {
        Self::new(outputs.into_iter().map(Ok))
    }

    /// Returns `output` for every call once the script runs dry.
    pub fn repeating(output: ModelOutput) -> Self {
        Self { repeat: Some(output), ..Self::default() }
    }

    pub fn then_repeating(mut self, output: ModelOutput) -> Self {
        self.repeat = Some(output);
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelOutput, ModelError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }

        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };

        match (next, &self.repeat) {
            (Some(result), _) => result,
            (None, Some(output)) => Ok(output.clone()),
            (None, None) => Err(ModelError::Unavailable("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use bankdesk_core::domain::conversation::Turn;

    use super::{ModelClient, ModelError, ModelOutput, ModelRequest, ScriptedModel};

    fn request(text: &str) -> ModelRequest {
        ModelRequest {
            instructions: "test".to_string(),
            turns: vec![Turn::user(text)],
            tools: Vec::new(),
            json_output: false,
        }
    }

    #[tokio::test]
    async fn scripted_model_replays_in_order_then_reports_exhaustion() {
        let model = ScriptedModel::with_outputs([
            ModelOutput::Text("first".to_string()),
            ModelOutput::Text("second".to_string()),
        ]);

        assert_eq!(model.complete(request("a")).await, Ok(ModelOutput::Text("first".to_string())));
        assert_eq!(model.complete(request("b")).await, Ok(ModelOutput::Text("second".to_string())));
        assert!(matches!(model.complete(request("c")).await, Err(ModelError::Unavailable(_))));
        assert_eq!(model.call_count(), 3);
        assert_eq!(model.requests()[1].turns, vec![Turn::user("b")]);
    }
}
