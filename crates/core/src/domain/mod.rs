pub mod banking;
pub mod conversation;
pub mod label;
pub mod session;
pub mod topic;
