use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use bankdesk_core::domain::banking::{
    next_transaction_id, Account, Credential, GatewayTransaction, LedgerEntry, PaymentStatus,
};

use super::{
    AccountRepository, CredentialRepository, GatewayRepository, NewPayment, PaymentReceipt,
    RepositoryError,
};

#[derive(Default)]
struct AccountBook {
    accounts: HashMap<String, Account>,
    ledger: Vec<LedgerEntry>,
}

#[derive(Default)]
pub struct InMemoryAccountRepository {
    book: RwLock<AccountBook>,
}

impl InMemoryAccountRepository {
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let accounts =
            accounts.into_iter().map(|account| (account.username.clone(), account)).collect();
        Self { book: RwLock::new(AccountBook { accounts, ledger: Vec::new() }) }
    }
}

#[async_trait::async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn find_account(&self, username: &str) -> Result<Option<Account>, RepositoryError> {
        let book = self.book.read().await;
        Ok(book.accounts.get(username).cloned())
    }

    async fn save_account(&self, account: Account) -> Result<(), RepositoryError> {
        let mut book = self.book.write().await;
        book.accounts.insert(account.username.clone(), account);
        Ok(())
    }

    async fn record_payment(
        &self,
        payment: NewPayment,
    ) -> Result<PaymentReceipt, RepositoryError> {
        let mut book = self.book.write().await;
        let latest = book.ledger.last().map(|entry| entry.transaction_id.clone());

        let account = book
            .accounts
            .get_mut(&payment.sender)
            .ok_or_else(|| RepositoryError::AccountNotFound(payment.sender.clone()))?;
        if account.balance < payment.amount {
            return Err(RepositoryError::InsufficientFunds {
                available: account.balance,
                requested: payment.amount,
            });
        }
        account.balance -= payment.amount;
        let new_balance = account.balance;

        let entry = LedgerEntry {
            transaction_id: next_transaction_id(latest.as_deref()),
            sender: payment.sender,
            receiver: payment.receiver,
            amount: payment.amount,
            ifsc: payment.ifsc,
            created_at: Utc::now(),
        };
        book.ledger.push(entry.clone());

        Ok(PaymentReceipt { entry, new_balance })
    }

    async fn ledger_for(&self, username: &str) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let book = self.book.read().await;
        Ok(book.ledger.iter().filter(|entry| entry.sender == username).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryGatewayRepository {
    transactions: RwLock<HashMap<String, GatewayTransaction>>,
}

impl InMemoryGatewayRepository {
    pub fn with_transactions(transactions: impl IntoIterator<Item = GatewayTransaction>) -> Self {
        let transactions =
            transactions.into_iter().map(|tx| (tx.transaction_id.clone(), tx)).collect();
        Self { transactions: RwLock::new(transactions) }
    }
}

#[async_trait::async_trait]
impl GatewayRepository for InMemoryGatewayRepository {
    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<GatewayTransaction>, RepositoryError> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(transaction_id).cloned())
    }

    async fn save_transaction(
        &self,
        transaction: GatewayTransaction,
    ) -> Result<(), RepositoryError> {
        let mut transactions = self.transactions.write().await;
        transactions.insert(transaction.transaction_id.clone(), transaction);
        Ok(())
    }

    async fn reconcile_core_status(&self, transaction_id: &str) -> Result<bool, RepositoryError> {
        let mut transactions = self.transactions.write().await;
        match transactions.get_mut(transaction_id) {
            Some(transaction) if transaction.can_reconcile() => {
                transaction.core_banking_status = PaymentStatus::Success;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryCredentialRepository {
    credentials: RwLock<HashMap<String, Credential>>,
}

#[async_trait::async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn find_credential(
        &self,
        username: &str,
    ) -> Result<Option<Credential>, RepositoryError> {
        let credentials = self.credentials.read().await;
        Ok(credentials.get(username).cloned())
    }

    async fn save_credential(&self, credential: Credential) -> Result<(), RepositoryError> {
        let mut credentials = self.credentials.write().await;
        credentials.insert(credential.username.clone(), credential);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use bankdesk_core::domain::banking::Account;

    use crate::repositories::{
        AccountRepository, InMemoryAccountRepository, NewPayment, RepositoryError,
    };

    #[tokio::test]
    async fn in_memory_accounts_match_sql_payment_semantics() {
        let repo = InMemoryAccountRepository::with_accounts([Account {
            username: "bob".to_string(),
            balance: Decimal::new(120, 0),
        }]);

        let receipt = repo
            .record_payment(NewPayment {
                sender: "bob".to_string(),
                receiver: "carol".to_string(),
                amount: Decimal::new(20, 0),
                ifsc: None,
            })
            .await
            .expect("payment");
        assert_eq!(receipt.entry.transaction_id, "TX001");
        assert_eq!(receipt.new_balance, Decimal::new(100, 0));

        let error = repo
            .record_payment(NewPayment {
                sender: "bob".to_string(),
                receiver: "carol".to_string(),
                amount: Decimal::new(101, 0),
                ifsc: None,
            })
            .await
            .expect_err("overdraft");
        assert!(matches!(error, RepositoryError::InsufficientFunds { .. }));
        assert_eq!(repo.ledger_for("bob").await.expect("ledger").len(), 1);
    }
}
