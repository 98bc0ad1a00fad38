use sqlx::{sqlite::SqliteRow, Row};

use bankdesk_core::domain::banking::{GatewayTransaction, PaymentStatus};

use super::account::{parse_decimal, parse_timestamp};
use super::{GatewayRepository, RepositoryError};
use crate::DbPool;

pub struct SqlGatewayRepository {
    pool: DbPool,
}

impl SqlGatewayRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl GatewayRepository for SqlGatewayRepository {
    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<GatewayTransaction>, RepositoryError> {
        let row = sqlx::query(
            "SELECT transaction_id, occurred_at, amount, payment_status, core_banking_status
             FROM gateway_transactions
             WHERE transaction_id = ?",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(transaction_from_row).transpose()
    }

    async fn save_transaction(
        &self,
        transaction: GatewayTransaction,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO gateway_transactions (
                transaction_id,
                occurred_at,
                amount,
                payment_status,
                core_banking_status
             ) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(transaction_id) DO UPDATE SET
                occurred_at = excluded.occurred_at,
                amount = excluded.amount,
                payment_status = excluded.payment_status,
                core_banking_status = excluded.core_banking_status",
        )
        .bind(&transaction.transaction_id)
        .bind(transaction.timestamp.to_rfc3339())
        .bind(transaction.amount.to_string())
        .bind(transaction.payment_status.as_str())
        .bind(transaction.core_banking_status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reconcile_core_status(&self, transaction_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE gateway_transactions
             SET core_banking_status = 'Success'
             WHERE transaction_id = ?
               AND payment_status = 'Success'
               AND core_banking_status != 'Success'",
        )
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn transaction_from_row(row: SqliteRow) -> Result<GatewayTransaction, RepositoryError> {
    Ok(GatewayTransaction {
        transaction_id: row.try_get("transaction_id")?,
        timestamp: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        payment_status: parse_status("payment_status", row.try_get("payment_status")?)?,
        core_banking_status: parse_status(
            "core_banking_status",
            row.try_get("core_banking_status")?,
        )?,
    })
}

fn parse_status(column: &str, value: String) -> Result<PaymentStatus, RepositoryError> {
    value
        .parse()
        .map_err(|_| RepositoryError::Decode(format!("unknown status in `{column}`: `{value}`")))
}
