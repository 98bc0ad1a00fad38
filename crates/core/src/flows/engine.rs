use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{
    FlowAction, FlowEvent, FlowState, ReplyIntent, SessionState, TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> SessionState;
    fn transition(
        &self,
        current: &SessionState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Yes/no confirmation dialog that runs after a handler resolves an issue.
#[derive(Clone, Debug, Default)]
pub struct ConversationFlow;

impl FlowDefinition for ConversationFlow {
    fn initial_state(&self) -> SessionState {
        SessionState::fresh()
    }

    fn transition(
        &self,
        current: &SessionState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_conversation(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> SessionState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &SessionState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &SessionState,
        event: &FlowEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from.state))
                    .with_metadata("to", format!("{:?}", outcome.to.state))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<ConversationFlow> {
    fn default() -> Self {
        Self::new(ConversationFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("session in {state:?} has no last agent to route the reply to")]
    MissingLastAgent { state: FlowState },
}

fn transition_conversation(
    current: &SessionState,
    event: &FlowEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        AskAdditionalQueries, AskFollowup as AskFollowupAction, AskResolution, AwaitFollowup,
        ClearContext, Classify, CloseSession, PromptNewQuery, RouteTo,
    };
    use FlowState::{AskAdditional, AskFollowup, Fresh, FollowUp, PostAction};
    use ReplyIntent::{No, Yes};

    let keep_agent = || current.last_agent_topic.clone();

    let (to, actions) = match (current.state, event) {
        (_, FlowEvent::Reset) => (SessionState::fresh(), vec![ClearContext]),
        (_, FlowEvent::IssueResolved { by }) => (
            SessionState { state: PostAction, last_agent_topic: Some(by.clone()) },
            vec![AskResolution],
        ),
        (_, FlowEvent::HandlerContinues { by }) => {
            (SessionState { state: FollowUp, last_agent_topic: Some(by.clone()) }, Vec::new())
        }
        (Fresh, FlowEvent::UserReplied(_)) => (current.clone(), vec![Classify]),
        (FollowUp, FlowEvent::UserReplied(_)) => match &current.last_agent_topic {
            Some(topic) => (current.clone(), vec![RouteTo(topic.clone())]),
            None => return Err(FlowTransitionError::MissingLastAgent { state: FollowUp }),
        },
        (PostAction, FlowEvent::UserReplied(Yes)) => (
            SessionState { state: AskAdditional, last_agent_topic: keep_agent() },
            vec![AskAdditionalQueries],
        ),
        (PostAction, FlowEvent::UserReplied(No)) => (
            SessionState { state: AskFollowup, last_agent_topic: keep_agent() },
            vec![AskFollowupAction],
        ),
        (PostAction, FlowEvent::UserReplied(_)) => (current.clone(), vec![AskResolution]),
        (AskAdditional, FlowEvent::UserReplied(Yes)) => {
            (SessionState::fresh(), vec![ClearContext, PromptNewQuery])
        }
        (AskAdditional, FlowEvent::UserReplied(_)) => {
            (SessionState::fresh(), vec![ClearContext, CloseSession])
        }
        (AskFollowup, FlowEvent::UserReplied(Yes)) if current.last_agent_topic.is_some() => (
            SessionState { state: FollowUp, last_agent_topic: keep_agent() },
            vec![AwaitFollowup],
        ),
        (AskFollowup, FlowEvent::UserReplied(_)) => {
            (SessionState::fresh(), vec![ClearContext, CloseSession])
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::session::SessionId;
    use crate::domain::topic::TopicType;
    use crate::flows::engine::{ConversationFlow, FlowEngine, FlowTransitionError};
    use crate::flows::states::{
        FlowAction, FlowEvent, FlowState, ReplyIntent, SessionState, TransitionOutcome,
    };

    fn payments() -> TopicType {
        TopicType::new("Payments")
    }

    fn state(state: FlowState, last: Option<TopicType>) -> SessionState {
        SessionState { state, last_agent_topic: last }
    }

    fn reply(
        engine: &FlowEngine<ConversationFlow>,
        current: &SessionState,
        text: &str,
    ) -> TransitionOutcome {
        engine
            .apply(current, &FlowEvent::UserReplied(ReplyIntent::parse(text)))
            .expect("reply transition")
    }

    #[test]
    fn transition_table_is_deterministic() {
        use FlowAction as A;
        use FlowState as S;

        let engine = FlowEngine::default();
        let last = Some(payments());
        let cases = [
            (state(S::PostAction, last.clone()), "yes", S::AskAdditional, vec![A::AskAdditionalQueries]),
            (state(S::PostAction, last.clone()), "no", S::AskFollowup, vec![A::AskFollowup]),
            (state(S::AskAdditional, last.clone()), "yes", S::Fresh, vec![A::ClearContext, A::PromptNewQuery]),
            (state(S::AskAdditional, last.clone()), "later", S::Fresh, vec![A::ClearContext, A::CloseSession]),
            (state(S::AskFollowup, last.clone()), "yes", S::FollowUp, vec![A::AwaitFollowup]),
            (state(S::AskFollowup, None), "yes", S::Fresh, vec![A::ClearContext, A::CloseSession]),
            (state(S::AskFollowup, last.clone()), "no", S::Fresh, vec![A::ClearContext, A::CloseSession]),
            (state(S::FollowUp, last.clone()), "T1001", S::FollowUp, vec![A::RouteTo(payments())]),
            (state(S::Fresh, None), "hello", S::Fresh, vec![A::Classify]),
        ];

        for (current, input, expected_state, expected_actions) in cases {
            let first = reply(&engine, &current, input);
            let second = reply(&engine, &current, input);
            assert_eq!(first, second, "replay of {current:?} with {input:?}");
            assert_eq!(first.to.state, expected_state, "{current:?} with {input:?}");
            assert_eq!(first.actions, expected_actions, "{current:?} with {input:?}");
        }
    }

    #[test]
    fn post_action_then_two_noes_resets_the_session() {
        let engine = FlowEngine::default();
        let resolved = engine
            .apply(&engine.initial_state(), &FlowEvent::IssueResolved { by: payments() })
            .expect("resolution");
        assert_eq!(resolved.to, state(FlowState::PostAction, Some(payments())));
        assert_eq!(resolved.reply_text().as_deref(), Some("Did this resolve your issue? (yes/no)"));

        let follow_up_question = reply(&engine, &resolved.to, "no");
        assert_eq!(follow_up_question.to.state, FlowState::AskFollowup);
        assert!(!follow_up_question.clears_context());

        let closed = reply(&engine, &follow_up_question.to, "No");
        assert_eq!(closed.to, SessionState::fresh());
        assert!(closed.clears_context());
    }

    #[test]
    fn unrecognized_answer_in_post_action_asks_again() {
        let engine = FlowEngine::default();
        let current = state(FlowState::PostAction, Some(payments()));
        let outcome = reply(&engine, &current, "what?");
        assert_eq!(outcome.to, current);
        assert_eq!(outcome.actions, vec![FlowAction::AskResolution]);
    }

    #[test]
    fn follow_up_without_last_agent_is_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&state(FlowState::FollowUp, None), &FlowEvent::UserReplied(ReplyIntent::Other))
            .expect_err("no route target");
        assert_eq!(error, FlowTransitionError::MissingLastAgent { state: FlowState::FollowUp });
    }

    #[test]
    fn handler_continuation_records_owner() {
        let engine = FlowEngine::default();
        let retail = TopicType::new("RetailBanking");
        let outcome = engine
            .apply(&SessionState::fresh(), &FlowEvent::HandlerContinues { by: retail.clone() })
            .expect("continuation");
        assert_eq!(outcome.to, state(FlowState::FollowUp, Some(retail)));
        assert!(outcome.reply_text().is_none());
    }

    #[test]
    fn reset_is_idempotent() {
        let engine = FlowEngine::default();
        let once = engine
            .apply(&state(FlowState::AskFollowup, Some(payments())), &FlowEvent::Reset)
            .expect("reset");
        let twice = engine.apply(&once.to, &FlowEvent::Reset).expect("reset again");
        assert_eq!(once.to, twice.to);
        assert_eq!(twice.to, SessionState::fresh());
    }

    #[test]
    fn flow_transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                &state(FlowState::PostAction, Some(payments())),
                &FlowEvent::UserReplied(ReplyIntent::Yes),
                &sink,
                &AuditContext::new(Some(SessionId::new("alice")), "req-42", "DomainClassifierAgent"),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].session_id.as_ref().map(SessionId::as_str), Some("alice"));
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("AskAdditional"));
    }
}
