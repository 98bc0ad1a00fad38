use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub balance: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub transaction_id: String,
    pub sender: String,
    pub receiver: String,
    pub amount: Decimal,
    pub ifsc: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Success,
    Pending,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Pending => "Pending",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Success" => Ok(Self::Success),
            "Pending" => Ok(Self::Pending),
            "Failed" => Ok(Self::Failed),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown payment status `{other}`"
            ))),
        }
    }
}

/// Gateway-side record of a payment, compared against core banking during reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayTransaction {
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
    pub amount: Decimal,
    pub payment_status: PaymentStatus,
    pub core_banking_status: PaymentStatus,
}

impl GatewayTransaction {
    pub fn has_discrepancy(&self) -> bool {
        self.payment_status != self.core_banking_status
    }

    pub fn can_reconcile(&self) -> bool {
        self.payment_status == PaymentStatus::Success
            && self.core_banking_status != PaymentStatus::Success
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password_sha256: String,
}

impl Credential {
    pub fn from_password(username: impl Into<String>, password: &str) -> Self {
        Self { username: username.into(), password_sha256: password_digest(password) }
    }

    pub fn verify(&self, password: &SecretString) -> bool {
        password_digest(password.expose_secret()) == self.password_sha256
    }
}

pub fn password_digest(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// Next ledger id after `latest`, formatted `TX###`. Starts at `TX001`.
pub fn next_transaction_id(latest: Option<&str>) -> String {
    let current = latest
        .and_then(|id| id.strip_prefix("TX"))
        .and_then(|digits| digits.parse::<u32>().ok())
        .unwrap_or(0);
    format!("TX{:03}", current + 1)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    use super::{next_transaction_id, Credential, GatewayTransaction, PaymentStatus};

    #[test]
    fn transaction_ids_continue_from_latest() {
        assert_eq!(next_transaction_id(None), "TX001");
        assert_eq!(next_transaction_id(Some("TX009")), "TX010");
        assert_eq!(next_transaction_id(Some("TX999")), "TX1000");
        assert_eq!(next_transaction_id(Some("garbage")), "TX001");
    }

    #[test]
    fn credential_verifies_only_matching_password() {
        let credential = Credential::from_password("alice", "wonderland");
        assert!(credential.verify(&SecretString::from("wonderland".to_owned())));
        assert!(!credential.verify(&SecretString::from("looking-glass".to_owned())));
        assert_eq!(credential.password_sha256.len(), 64);
    }

    #[test]
    fn reconcile_requires_gateway_success_and_core_mismatch() {
        let mut tx = GatewayTransaction {
            transaction_id: "T1001".to_owned(),
            timestamp: Utc::now(),
            amount: Decimal::new(25000, 2),
            payment_status: PaymentStatus::Success,
            core_banking_status: PaymentStatus::Pending,
        };
        assert!(tx.has_discrepancy());
        assert!(tx.can_reconcile());

        tx.payment_status = PaymentStatus::Pending;
        assert!(!tx.can_reconcile());

        tx.payment_status = PaymentStatus::Success;
        tx.core_banking_status = PaymentStatus::Success;
        assert!(!tx.has_discrepancy());
        assert!(!tx.can_reconcile());
    }
}
