use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use bankdesk_core::domain::banking::{password_digest, GatewayTransaction, PaymentStatus};

use crate::repositories::{GatewayRepository, RepositoryError, SqlGatewayRepository};
use crate::DbPool;

struct SeedAccount {
    username: &'static str,
    password: &'static str,
    /// Balance in cents.
    balance_cents: i64,
}

struct SeedGatewayRow {
    transaction_id: &'static str,
    amount_cents: i64,
    payment_status: PaymentStatus,
    core_banking_status: PaymentStatus,
    description: &'static str,
}

const SEED_ACCOUNTS: &[SeedAccount] = &[
    SeedAccount { username: "alice", password: "alice123", balance_cents: 500_000 },
    SeedAccount { username: "bob", password: "bob123", balance_cents: 120_050 },
    SeedAccount { username: "carol", password: "carol123", balance_cents: 30_000 },
];

const SEED_GATEWAY_ROWS: &[SeedGatewayRow] = &[
    SeedGatewayRow {
        transaction_id: "T1001",
        amount_cents: 25_000,
        payment_status: PaymentStatus::Success,
        core_banking_status: PaymentStatus::Pending,
        description: "gateway success not reflected in core banking",
    },
    SeedGatewayRow {
        transaction_id: "T1002",
        amount_cents: 7_500,
        payment_status: PaymentStatus::Success,
        core_banking_status: PaymentStatus::Success,
        description: "settled payment",
    },
    SeedGatewayRow {
        transaction_id: "T1003",
        amount_cents: 1_999,
        payment_status: PaymentStatus::Failed,
        core_banking_status: PaymentStatus::Failed,
        description: "failed at gateway",
    },
    SeedGatewayRow {
        transaction_id: "T1004",
        amount_cents: 45_000,
        payment_status: PaymentStatus::Pending,
        core_banking_status: PaymentStatus::Pending,
        description: "still pending at gateway",
    },
];

/// Deterministic demo data: accounts with credentials and a gateway log that
/// contains one reconcilable mismatch. Loading twice leaves the same rows.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        for account in SEED_ACCOUNTS {
            sqlx::query(
                "INSERT INTO accounts (username, balance, updated_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT(username) DO NOTHING",
            )
            .bind(account.username)
            .bind(Decimal::new(account.balance_cents, 2).to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO credentials (username, password_sha256, created_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT(username) DO NOTHING",
            )
            .bind(account.username)
            .bind(password_digest(account.password))
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let gateway = SqlGatewayRepository::new(pool.clone());
        for row in SEED_GATEWAY_ROWS {
            if gateway.find_transaction(row.transaction_id).await?.is_none() {
                gateway.save_transaction(seed_transaction(row)).await?;
            }
        }

        Ok(SeedResult {
            accounts_seeded: SEED_ACCOUNTS.iter().map(|account| account.username).collect(),
            transactions_seeded: SEED_GATEWAY_ROWS
                .iter()
                .map(|row| (row.transaction_id, row.description))
                .collect(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for account in SEED_ACCOUNTS {
            let account_exists: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE username = ?1)")
                    .bind(account.username)
                    .fetch_one(pool)
                    .await?;
            checks.push((account.username, account_exists == 1));

            let credential_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM credentials WHERE username = ?1 AND password_sha256 = ?2)",
            )
            .bind(account.username)
            .bind(password_digest(account.password))
            .fetch_one(pool)
            .await?;
            checks.push(("credential", credential_ok == 1));
        }

        for row in SEED_GATEWAY_ROWS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM gateway_transactions WHERE transaction_id = ?1)",
            )
            .bind(row.transaction_id)
            .fetch_one(pool)
            .await?;
            checks.push((row.transaction_id, exists == 1));
        }

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }
}

fn seed_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).single().unwrap_or_else(Utc::now)
}

fn seed_transaction(row: &SeedGatewayRow) -> GatewayTransaction {
    GatewayTransaction {
        transaction_id: row.transaction_id.to_string(),
        timestamp: seed_timestamp(),
        amount: Decimal::new(row.amount_cents, 2),
        payment_status: row.payment_status,
        core_banking_status: row.core_banking_status,
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub accounts_seeded: Vec<&'static str>,
    pub transactions_seeded: Vec<(&'static str, &'static str)>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");

        migrations::run_pending(&pool).await.expect("run migrations");

        let first = DemoSeedDataset::load(&pool).await.expect("load seed fixtures");
        let first_verification = DemoSeedDataset::verify(&pool).await.expect("verify seed");
        assert!(first_verification.all_present);
        assert_eq!(first.accounts_seeded.len(), 3);

        let second = DemoSeedDataset::load(&pool).await.expect("reload seed fixtures");
        let second_verification = DemoSeedDataset::verify(&pool).await.expect("re-verify seed");
        assert!(second_verification.all_present);
        assert_eq!(second.transactions_seeded.len(), 4);
        assert_eq!(first_verification.checks, second_verification.checks);

        let accounts: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM accounts")
            .fetch_one(&pool)
            .await
            .expect("count accounts");
        assert_eq!(accounts, 3);
    }
}
