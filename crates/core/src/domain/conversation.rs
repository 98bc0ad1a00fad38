use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const USER_SOURCE: &str = "User";
pub const HANDOFF_CALL_ID: &str = "auto_handoff";
pub const HANDOFF_TOOL_PREFIX: &str = "transfer_to_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
            is_error: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AssistantContent {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "turn", rename_all = "snake_case")]
pub enum Turn {
    User { text: String, source: String },
    Assistant { source: String, content: AssistantContent },
    ToolResult(ToolResult),
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into(), source: USER_SOURCE.to_owned() }
    }

    pub fn assistant_text(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Assistant { source: source.into(), content: AssistantContent::Text(text.into()) }
    }

    pub fn tool_calls(source: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self::Assistant { source: source.into(), content: AssistantContent::ToolCalls(calls) }
    }
}

/// Ordered turns of one session. Only ever appended to while a turn is processed;
/// a reset replaces the whole context instead of editing it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    turns: Vec<Turn>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// True when the context ends with input the assistant has not answered yet.
    pub fn awaiting_answer(&self) -> bool {
        matches!(self.turns.last(), Some(Turn::User { .. }) | Some(Turn::ToolResult(_)))
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|turn| match turn {
            Turn::User { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Assistant texts appended after the most recent user turn, oldest first.
    pub fn replies_since_last_user(&self) -> Vec<&str> {
        let start = self
            .turns
            .iter()
            .rposition(|turn| matches!(turn, Turn::User { .. }))
            .map(|index| index + 1)
            .unwrap_or(0);

        self.turns[start..]
            .iter()
            .filter_map(|turn| match turn {
                Turn::Assistant { content: AssistantContent::Text(text), .. } => {
                    Some(text.as_str())
                }
                _ => None,
            })
            .collect()
    }

    /// Appends the transfer record: a synthetic call to the handoff tool and its result.
    pub fn record_handoff(&mut self, source: &str, tool_name: &str, target_topic: &str) {
        let call = ToolCall::new(HANDOFF_CALL_ID, tool_name, Value::Object(Default::default()));
        let result = ToolResult::success(
            &call,
            format!("Transferred to {target_topic}. Adopt persona immediately."),
        );
        self.push(Turn::tool_calls(source, vec![call]));
        self.push(Turn::ToolResult(result));
    }

    /// The most recent handoff result, if the session was transferred at least once.
    pub fn last_handoff(&self) -> Option<&ToolResult> {
        self.turns.iter().rev().find_map(|turn| match turn {
            Turn::ToolResult(result) if result.name.starts_with(HANDOFF_TOOL_PREFIX) => {
                Some(result)
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ConversationContext, ToolCall, ToolResult, Turn};

    #[test]
    fn awaiting_answer_tracks_the_last_turn() {
        let mut context = ConversationContext::new();
        assert!(!context.awaiting_answer());

        context.push(Turn::user("what is my balance?"));
        assert!(context.awaiting_answer());

        let call = ToolCall::new("call-1", "check_balance", json!({}));
        context.push(Turn::tool_calls("RetailBankingAgent", vec![call.clone()]));
        assert!(!context.awaiting_answer());

        context.push(Turn::ToolResult(ToolResult::success(&call, "{\"balance\":\"10\"}")));
        assert!(context.awaiting_answer());

        context.push(Turn::assistant_text("RetailBankingAgent", "Your balance is $10."));
        assert!(!context.awaiting_answer());
    }

    #[test]
    fn handoff_record_is_recoverable_from_context() {
        let mut context = ConversationContext::new();
        context.push(Turn::user("my payment is missing"));
        context.record_handoff("DomainClassifierAgent", "transfer_to_payments", "Payments");

        assert_eq!(context.len(), 3);
        assert!(context.awaiting_answer());
        let handoff = context.last_handoff().expect("handoff recorded");
        assert_eq!(handoff.call_id, "auto_handoff");
        assert_eq!(handoff.content, "Transferred to Payments. Adopt persona immediately.");
        assert!(!handoff.is_error);
    }

    #[test]
    fn replies_since_last_user_skips_earlier_turns() {
        let mut context = ConversationContext::new();
        context.push(Turn::user("first"));
        context.push(Turn::assistant_text("A", "old reply"));
        context.push(Turn::user("second"));
        context.push(Turn::assistant_text("A", "new reply"));
        context.push(Turn::assistant_text("A", "Did this resolve your issue? (yes/no)"));

        assert_eq!(
            context.replies_since_last_user(),
            vec!["new reply", "Did this resolve your issue? (yes/no)"]
        );
        assert_eq!(context.last_user_text(), Some("second"));
    }
}
