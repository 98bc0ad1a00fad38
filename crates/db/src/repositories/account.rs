use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use bankdesk_core::domain::banking::{next_transaction_id, Account, LedgerEntry};

use super::{AccountRepository, NewPayment, PaymentReceipt, RepositoryError};
use crate::DbPool;

pub struct SqlAccountRepository {
    pool: DbPool,
}

impl SqlAccountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AccountRepository for SqlAccountRepository {
    async fn find_account(&self, username: &str) -> Result<Option<Account>, RepositoryError> {
        let row = sqlx::query("SELECT username, balance FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        row.map(account_from_row).transpose()
    }

    async fn save_account(&self, account: Account) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO accounts (username, balance, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET
                balance = excluded.balance,
                updated_at = excluded.updated_at",
        )
        .bind(&account.username)
        .bind(account.balance.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_payment(
        &self,
        payment: NewPayment,
    ) -> Result<PaymentReceipt, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT username, balance FROM accounts WHERE username = ?")
            .bind(&payment.sender)
            .fetch_optional(&mut *tx)
            .await?;
        let account = row
            .map(account_from_row)
            .transpose()?
            .ok_or_else(|| RepositoryError::AccountNotFound(payment.sender.clone()))?;

        if account.balance < payment.amount {
            return Err(RepositoryError::InsufficientFunds {
                available: account.balance,
                requested: payment.amount,
            });
        }

        let latest: Option<String> = sqlx::query_scalar(
            "SELECT transaction_id FROM ledger
             ORDER BY LENGTH(transaction_id) DESC, transaction_id DESC
             LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let now = Utc::now();
        let new_balance = account.balance - payment.amount;
        let entry = LedgerEntry {
            transaction_id: next_transaction_id(latest.as_deref()),
            sender: payment.sender,
            receiver: payment.receiver,
            amount: payment.amount,
            ifsc: payment.ifsc,
            created_at: now,
        };

        sqlx::query("UPDATE accounts SET balance = ?, updated_at = ? WHERE username = ?")
            .bind(new_balance.to_string())
            .bind(now.to_rfc3339())
            .bind(&entry.sender)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO ledger (transaction_id, sender, receiver, amount, ifsc, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.transaction_id)
        .bind(&entry.sender)
        .bind(&entry.receiver)
        .bind(entry.amount.to_string())
        .bind(&entry.ifsc)
        .bind(entry.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PaymentReceipt { entry, new_balance })
    }

    async fn ledger_for(&self, username: &str) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT transaction_id, sender, receiver, amount, ifsc, created_at
             FROM ledger
             WHERE sender = ?
             ORDER BY created_at ASC, transaction_id ASC",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ledger_entry_from_row).collect()
    }
}

fn account_from_row(row: SqliteRow) -> Result<Account, RepositoryError> {
    Ok(Account {
        username: row.try_get("username")?,
        balance: parse_decimal("balance", row.try_get("balance")?)?,
    })
}

fn ledger_entry_from_row(row: SqliteRow) -> Result<LedgerEntry, RepositoryError> {
    Ok(LedgerEntry {
        transaction_id: row.try_get("transaction_id")?,
        sender: row.try_get("sender")?,
        receiver: row.try_get("receiver")?,
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        ifsc: row.try_get("ifsc")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
