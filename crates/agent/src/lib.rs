//! Agent runtime for the banking assistant.
//!
//! Every user turn travels the same path over the message bus:
//! 1. **User proxy** (`user_proxy`) - appends the input to the session
//!    context and hands it to the classifier
//! 2. **Classifier** (`classifier`) - answers the yes/no dialog when one is
//!    open, otherwise labels the request and records the handoff
//! 3. **Domain handler** (`handler`) - runs the bounded tool loop
//!    (`tool_loop`) over the banking tools (`banking_tools`)
//! 4. **User proxy** again - stores the context and emits the reply
//!
//! Deliveries for one session are serialized by its mailbox (`bus`), so the
//! session record (`session`) only ever has one writer at a time.
//!
//! # Key Types
//!
//! - `AgentRuntime` - wires all agents onto one bus (see `runtime`)
//! - `ModelClient` - pluggable model backend; `OfflineModel` and
//!   `ScriptedModel` need no network
//! - `ReplySink` - where finished turns are delivered to a transport

pub mod auth;
pub mod banking_tools;
pub mod bus;
pub mod classifier;
pub mod handler;
pub mod model;
pub mod offline;
pub mod runtime;
pub mod session;
pub mod tool_loop;
pub mod tools;
pub mod user_proxy;

pub use auth::LoginOutcome;
pub use bus::{Agent, AgentError, BusError, Message, MessageBus, MessageContext, PublishReceipt};
pub use model::{ModelClient, ModelError, ModelOutput, ModelRequest, ScriptedModel};
pub use offline::OfflineModel;
pub use runtime::{AgentRuntime, RuntimeDeps, RuntimeSettings};
pub use session::{SessionRecord, SessionStore};
pub use user_proxy::{ChannelReplySink, CollectingReplySink, ReplySink, TurnReply};
