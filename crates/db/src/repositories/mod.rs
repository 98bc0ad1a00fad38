use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use bankdesk_core::domain::banking::{Account, Credential, GatewayTransaction, LedgerEntry};

pub mod account;
pub mod credential;
pub mod gateway;
pub mod memory;

pub use account::SqlAccountRepository;
pub use credential::SqlCredentialRepository;
pub use gateway::SqlGatewayRepository;
pub use memory::{
    InMemoryAccountRepository, InMemoryCredentialRepository, InMemoryGatewayRepository,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("account `{0}` not found")]
    AccountNotFound(String),
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Decimal, requested: Decimal },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPayment {
    pub sender: String,
    pub receiver: String,
    pub amount: Decimal,
    pub ifsc: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub entry: LedgerEntry,
    pub new_balance: Decimal,
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find_account(&self, username: &str) -> Result<Option<Account>, RepositoryError>;
    async fn save_account(&self, account: Account) -> Result<(), RepositoryError>;
    /// Debits the sender and appends the ledger entry as one unit of work.
    async fn record_payment(&self, payment: NewPayment)
        -> Result<PaymentReceipt, RepositoryError>;
    async fn ledger_for(&self, username: &str) -> Result<Vec<LedgerEntry>, RepositoryError>;
}

#[async_trait]
pub trait GatewayRepository: Send + Sync {
    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<GatewayTransaction>, RepositoryError>;
    async fn save_transaction(&self, transaction: GatewayTransaction)
        -> Result<(), RepositoryError>;
    /// Sets the core banking status to Success when the gateway reports Success and
    /// the two disagree. Returns whether a row changed.
    async fn reconcile_core_status(&self, transaction_id: &str) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn find_credential(&self, username: &str)
        -> Result<Option<Credential>, RepositoryError>;
    async fn save_credential(&self, credential: Credential) -> Result<(), RepositoryError>;
}
