pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::banking::{Account, Credential, GatewayTransaction, LedgerEntry, PaymentStatus};
pub use domain::conversation::{AssistantContent, ConversationContext, ToolCall, ToolResult, Turn};
pub use domain::label::{ClassificationLabel, UnknownLabel};
pub use domain::session::SessionId;
pub use domain::topic::{AgentId, AgentType, TopicId, TopicType};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowEngine, FlowEvent, FlowState, ReplyIntent, SessionState};
