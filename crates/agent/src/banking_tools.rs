use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use bankdesk_db::repositories::{
    AccountRepository, GatewayRepository, NewPayment, RepositoryError,
};

use crate::tools::{parse_arguments, Tool, ToolContext, ToolError};

pub const CHECK_BALANCE: &str = "check_balance";
pub const MAKE_PAYMENT: &str = "make_payment";
pub const LOOKUP_TRANSACTION: &str = "lookup_transaction";
pub const FIX_CORE_BANKING_STATUS: &str = "fix_core_banking_status";

pub const NO_UPDATE_MESSAGE: &str =
    "No update done. Possibly transaction not found or PaymentStatus not Success.";

fn storage_failure(error: RepositoryError) -> ToolError {
    ToolError::Failed(format!("banking records are unavailable right now ({error})"))
}

/// Reports the logged-in user's balance.
pub struct CheckBalanceTool {
    accounts: Arc<dyn AccountRepository>,
}

impl CheckBalanceTool {
    pub fn new(accounts: Arc<dyn AccountRepository>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl Tool for CheckBalanceTool {
    fn name(&self) -> &'static str {
        CHECK_BALANCE
    }

    fn description(&self) -> &'static str {
        "Return the current balance of the signed-in customer's account."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let username = ctx.session.as_str();
        let account = self
            .accounts
            .find_account(username)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| ToolError::Failed(format!("No account found for user '{username}'.")))?;

        Ok(json!({
            "username": account.username,
            "balance": account.balance.round_dp(2).to_string(),
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct PaymentArgs {
    receiver: Option<String>,
    amount: Option<Value>,
    ifsc: Option<String>,
}

fn parse_amount(raw: &Value) -> Option<Decimal> {
    match raw {
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        Value::String(text) => {
            Decimal::from_str(text.trim().trim_start_matches('$').replace(',', "").as_str()).ok()
        }
        _ => None,
    }
}

/// Debits the signed-in customer and records a ledger entry.
pub struct MakePaymentTool {
    accounts: Arc<dyn AccountRepository>,
}

impl MakePaymentTool {
    pub fn new(accounts: Arc<dyn AccountRepository>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl Tool for MakePaymentTool {
    fn name(&self) -> &'static str {
        MAKE_PAYMENT
    }

    fn description(&self) -> &'static str {
        "Send money from the signed-in customer's account. Requires receiver and amount; ifsc is optional."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "receiver": {"type": "string", "description": "Name or account of the payee"},
                "amount": {"type": "number", "description": "Amount to send, greater than zero"},
                "ifsc": {"type": "string", "description": "Branch code of the payee, if known"}
            },
            "required": ["receiver", "amount"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: PaymentArgs = parse_arguments(arguments)?;

        let receiver = args.receiver.map(|value| value.trim().to_string()).filter(|v| !v.is_empty());
        let amount = args.amount.as_ref().and_then(parse_amount);

        let mut missing = Vec::new();
        if receiver.is_none() {
            missing.push("receiver");
        }
        if args.amount.is_none() {
            missing.push("amount");
        }
        if !missing.is_empty() {
            return Err(ToolError::InvalidArguments(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let (Some(receiver), Some(amount)) = (receiver, amount) else {
            return Err(ToolError::InvalidArguments("amount must be a number".to_string()));
        };
        if amount <= Decimal::ZERO {
            return Err(ToolError::InvalidArguments("amount must be greater than zero".to_string()));
        }

        ctx.ensure_active()?;

        let payment = NewPayment {
            sender: ctx.session.as_str().to_string(),
            receiver,
            amount,
            ifsc: args.ifsc.map(|code| code.trim().to_uppercase()).filter(|code| !code.is_empty()),
        };

        match self.accounts.record_payment(payment).await {
            Ok(receipt) => {
                info!(
                    event_name = "tools.payment_recorded",
                    session_id = %ctx.session,
                    transaction_id = %receipt.entry.transaction_id,
                    "payment recorded"
                );
                let new_balance = receipt.new_balance.round_dp(2);
                Ok(json!({
                    "transaction_id": receipt.entry.transaction_id,
                    "receiver": receipt.entry.receiver,
                    "amount": receipt.entry.amount.round_dp(2).to_string(),
                    "new_balance": new_balance.to_string(),
                    "message": format!(
                        "Payment success! TxID={}, New balance=${}",
                        receipt.entry.transaction_id, new_balance
                    ),
                }))
            }
            Err(RepositoryError::InsufficientFunds { available, requested }) => {
                Err(ToolError::Failed(format!(
                    "Payment failed! You only have ${}, but tried ${}.",
                    available.round_dp(2),
                    requested.round_dp(2)
                )))
            }
            Err(RepositoryError::AccountNotFound(username)) => {
                Err(ToolError::Failed(format!("No account found for user '{username}'.")))
            }
            Err(error) => Err(storage_failure(error)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TransactionArgs {
    transaction_id: String,
}

/// Reads one gateway transaction with both status columns.
pub struct LookupTransactionTool {
    gateway: Arc<dyn GatewayRepository>,
}

impl LookupTransactionTool {
    pub fn new(gateway: Arc<dyn GatewayRepository>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for LookupTransactionTool {
    fn name(&self) -> &'static str {
        LOOKUP_TRANSACTION
    }

    fn description(&self) -> &'static str {
        "Look up a payment gateway transaction and its payment and core banking statuses."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"transaction_id": {"type": "string"}},
            "required": ["transaction_id"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: TransactionArgs = parse_arguments(arguments)?;
        let transaction_id = args.transaction_id.trim();
        let transaction = self
            .gateway
            .find_transaction(transaction_id)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| {
                ToolError::Failed(format!("Transaction '{transaction_id}' not found."))
            })?;

        Ok(json!({
            "TransactionID": transaction.transaction_id,
            "Timestamp": transaction.timestamp.to_rfc3339(),
            "Amount": transaction.amount.round_dp(2).to_string(),
            "PaymentStatus": transaction.payment_status.as_str(),
            "CoreBankingStatus": transaction.core_banking_status.as_str(),
        }))
    }
}

/// Marks core banking as Success for a transaction the gateway already
/// settled. No-op for every other row.
pub struct FixCoreBankingStatusTool {
    gateway: Arc<dyn GatewayRepository>,
}

impl FixCoreBankingStatusTool {
    pub fn new(gateway: Arc<dyn GatewayRepository>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for FixCoreBankingStatusTool {
    fn name(&self) -> &'static str {
        FIX_CORE_BANKING_STATUS
    }

    fn description(&self) -> &'static str {
        "Set CoreBankingStatus to Success when PaymentStatus is Success but core banking disagrees."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"transaction_id": {"type": "string"}},
            "required": ["transaction_id"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: TransactionArgs = parse_arguments(arguments)?;
        let transaction_id = args.transaction_id.trim();

        ctx.ensure_active()?;

        let updated =
            self.gateway.reconcile_core_status(transaction_id).await.map_err(storage_failure)?;
        if !updated {
            return Err(ToolError::Failed(NO_UPDATE_MESSAGE.to_string()));
        }

        info!(
            event_name = "tools.core_status_reconciled",
            session_id = %ctx.session,
            transaction_id,
            "core banking status set to Success"
        );
        Ok(json!({
            "success": true,
            "message": format!("Updated transaction {transaction_id} so CoreBankingStatus=Success."),
        }))
    }
}
