use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bankdesk_core::domain::conversation::ConversationContext;
use bankdesk_core::domain::session::SessionId;
use bankdesk_core::flows::SessionState;

/// Routing state plus the stored conversation for one session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionRecord {
    pub state: SessionState,
    pub context: ConversationContext,
}

/// Process-local session table. Entries are created lazily on first access.
///
/// Every delivery for a session runs on that session's mailbox worker, so
/// at most one turn reads or writes a record at a time. The lock only guards
/// the map across sessions.
#[derive(Clone, Default)]
pub struct SessionStore {
    records: Arc<Mutex<HashMap<SessionId, SessionRecord>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<SessionId, SessionRecord>> {
        match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self, session: &SessionId) -> SessionState {
        self.records().entry(session.clone()).or_default().state.clone()
    }

    pub fn set_state(&self, session: &SessionId, state: SessionState) {
        self.records().entry(session.clone()).or_default().state = state;
    }

    /// Moves the stored context out; the record keeps an empty one until the
    /// turn stores its result back.
    pub fn take_context(&self, session: &SessionId) -> ConversationContext {
        std::mem::take(&mut self.records().entry(session.clone()).or_default().context)
    }

    pub fn store_context(&self, session: &SessionId, context: ConversationContext) {
        self.records().entry(session.clone()).or_default().context = context;
    }

    /// Back to a fresh state with an empty context. Safe to repeat.
    pub fn reset(&self, session: &SessionId) {
        self.records().insert(session.clone(), SessionRecord::default());
    }

    pub fn snapshot(&self, session: &SessionId) -> Option<SessionRecord> {
        self.records().get(session).cloned()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use bankdesk_core::domain::conversation::Turn;
    use bankdesk_core::domain::session::SessionId;
    use bankdesk_core::domain::topic::TopicType;
    use bankdesk_core::flows::{FlowState, SessionState};

    use super::{SessionRecord, SessionStore};

    #[test]
    fn unknown_session_starts_fresh_and_empty() {
        let store = SessionStore::new();
        let session = SessionId::new("alice");

        assert!(store.state(&session).is_fresh());
        assert!(store.take_context(&session).is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn take_then_store_round_trips_context() {
        let store = SessionStore::new();
        let session = SessionId::new("alice");
        let mut context = store.take_context(&session);
        context.push(Turn::user("hi"));
        store.store_context(&session, context.clone());

        assert_eq!(store.take_context(&session), context);
        assert!(store.take_context(&session).is_empty());
    }

    #[test]
    fn reset_is_idempotent() {
        let store = SessionStore::new();
        let session = SessionId::new("bob");
        store.set_state(
            &session,
            SessionState {
                state: FlowState::FollowUp,
                last_agent_topic: Some(TopicType::new("Payments")),
            },
        );
        store.store_context(&session, {
            let mut context = store.take_context(&session);
            context.push(Turn::user("T1001"));
            context
        });

        store.reset(&session);
        let once = store.snapshot(&session);
        store.reset(&session);

        assert_eq!(once, Some(SessionRecord::default()));
        assert_eq!(store.snapshot(&session), once);
    }
}
