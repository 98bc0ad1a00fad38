use bankdesk_core::domain::banking::PaymentStatus;
use bankdesk_db::repositories::{
    AccountRepository, CredentialRepository, GatewayRepository, SqlAccountRepository,
    SqlCredentialRepository, SqlGatewayRepository,
};
use bankdesk_db::{connect_with_settings, migrations, DemoSeedDataset, DbPool};
use rust_decimal::Decimal;
use secrecy::SecretString;

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

async fn seeded_pool() -> SeedContractTestResult<DbPool> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect failed: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate failed: {error}"))?;
    DemoSeedDataset::load(&pool).await.map_err(|error| format!("seed failed: {error}"))?;
    Ok(pool)
}

#[tokio::test]
async fn seed_contains_one_reconcilable_gateway_mismatch() -> SeedContractTestResult {
    let pool = seeded_pool().await?;
    let gateway = SqlGatewayRepository::new(pool);

    let mut reconcilable = Vec::new();
    for id in ["T1001", "T1002", "T1003", "T1004"] {
        let tx = gateway
            .find_transaction(id)
            .await
            .map_err(|error| error.to_string())?
            .ok_or_else(|| format!("{id} should be seeded"))?;
        if tx.can_reconcile() {
            reconcilable.push(tx.transaction_id.clone());
        }
    }
    require_eq!(reconcilable, vec!["T1001".to_string()]);

    let mismatch = gateway
        .find_transaction("T1001")
        .await
        .map_err(|error| error.to_string())?
        .ok_or("T1001 should be seeded")?;
    require_eq!(mismatch.payment_status, PaymentStatus::Success);
    require_eq!(mismatch.core_banking_status, PaymentStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn seeded_users_can_authenticate_and_pay() -> SeedContractTestResult {
    let pool = seeded_pool().await?;
    let credentials = SqlCredentialRepository::new(pool.clone());
    let accounts = SqlAccountRepository::new(pool);

    for (username, password) in [("alice", "alice123"), ("bob", "bob123"), ("carol", "carol123")] {
        let credential = credentials
            .find_credential(username)
            .await
            .map_err(|error| error.to_string())?
            .ok_or_else(|| format!("{username} should have a credential"))?;
        require!(
            credential.verify(&SecretString::from(password.to_string())),
            "{username} should verify with the seeded password"
        );
    }

    let alice = accounts
        .find_account("alice")
        .await
        .map_err(|error| error.to_string())?
        .ok_or("alice should be seeded")?;
    require_eq!(alice.balance, Decimal::new(500_000, 2));
    require!(accounts.ledger_for("alice").await.map_err(|e| e.to_string())?.is_empty());
    Ok(())
}
