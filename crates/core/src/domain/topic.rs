use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::session::SessionId;

pub const USER_TOPIC: &str = "User";
pub const DOMAIN_CLASSIFIER_TOPIC: &str = "DomainClassifier";
pub const AUTH_TOPIC: &str = "Auth";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicType(pub String);

impl TopicType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn user() -> Self {
        Self::new(USER_TOPIC)
    }

    pub fn classifier() -> Self {
        Self::new(DOMAIN_CLASSIFIER_TOPIC)
    }

    pub fn auth() -> Self {
        Self::new(AUTH_TOPIC)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopicType {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Topic type plus the session key the delivery is addressed to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicId {
    pub topic_type: TopicType,
    pub session: SessionId,
}

impl TopicId {
    pub fn new(topic_type: impl Into<TopicType>, session: SessionId) -> Self {
        Self { topic_type: topic_type.into(), session }
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic_type, self.session)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentType(pub String);

impl AgentType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentType {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// One virtual actor instance: an agent type bound to a session key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId {
    pub agent_type: AgentType,
    pub key: SessionId,
}

impl AgentId {
    pub fn new(agent_type: impl Into<AgentType>, key: SessionId) -> Self {
        Self { agent_type: agent_type.into(), key }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_type, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::{AgentId, SessionId, TopicId, TopicType};

    #[test]
    fn topic_and_agent_ids_render_type_then_session() {
        let session = SessionId::new("alice");
        assert_eq!(TopicId::new("Payments", session.clone()).to_string(), "Payments/alice");
        assert_eq!(AgentId::new("PaymentsAgent", session).to_string(), "PaymentsAgent/alice");
        assert_eq!(TopicType::user().as_str(), "User");
    }
}
