use serde::{Deserialize, Serialize};

use crate::domain::topic::TopicType;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowState {
    #[default]
    Fresh,
    PostAction,
    AskAdditional,
    AskFollowup,
    FollowUp,
}

/// Per-session routing state. Exactly one exists per session id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub state: FlowState,
    pub last_agent_topic: Option<TopicType>,
}

impl SessionState {
    pub fn fresh() -> Self {
        Self::default()
    }

    pub fn is_fresh(&self) -> bool {
        self.state == FlowState::Fresh
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyIntent {
    Yes,
    No,
    Other,
}

impl ReplyIntent {
    /// Classifies a raw user reply. Only the words `yes` and `no` count,
    /// compared after trimming and lower-casing; anything else is `Other`.
    pub fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "yes" => Self::Yes,
            "no" => Self::No,
            _ => Self::Other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    UserReplied(ReplyIntent),
    IssueResolved { by: TopicType },
    HandlerContinues { by: TopicType },
    Reset,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    Classify,
    RouteTo(TopicType),
    AskResolution,
    AskAdditionalQueries,
    AskFollowup,
    AwaitFollowup,
    PromptNewQuery,
    CloseSession,
    ClearContext,
}

impl FlowAction {
    /// Scripted text shown to the user for this action, if any.
    pub fn prompt(&self) -> Option<&'static str> {
        match self {
            Self::AskResolution => Some("Did this resolve your issue? (yes/no)"),
            Self::AskAdditionalQueries => Some("Do you have any additional queries? (yes/no)"),
            Self::AskFollowup => Some("Would you like to follow up on the same issue? (yes/no)"),
            Self::AwaitFollowup => Some("Sure, please share the details of your follow-up."),
            Self::PromptNewQuery => Some("Great, please go ahead with your new query."),
            Self::CloseSession => Some("Thank you for banking with us. Have a great day!"),
            Self::Classify | Self::RouteTo(_) | Self::ClearContext => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: SessionState,
    pub to: SessionState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn clears_context(&self) -> bool {
        self.actions.contains(&FlowAction::ClearContext)
    }

    /// Scripted replies for this transition joined in action order.
    pub fn reply_text(&self) -> Option<String> {
        let prompts: Vec<&str> = self.actions.iter().filter_map(FlowAction::prompt).collect();
        (!prompts.is_empty()).then(|| prompts.join("\n"))
    }
}
