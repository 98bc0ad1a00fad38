use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use bankdesk_core::domain::conversation::{ToolCall, ToolResult, Turn, HANDOFF_TOOL_PREFIX};
use bankdesk_core::domain::label::ClassificationLabel;

use crate::banking_tools::{CHECK_BALANCE, FIX_CORE_BANKING_STATUS, LOOKUP_TRANSACTION, MAKE_PAYMENT};
use crate::model::{ModelClient, ModelError, ModelOutput, ModelRequest};

/// Keyword routing table, checked in order. Retail banking catches the rest.
const ROUTES: &[(ClassificationLabel, &[&str])] = &[
    (
        ClassificationLabel::Payments,
        &[
            "not reflect",
            "isn't reflect",
            "not credited",
            "not received",
            "not updated",
            "mismatch",
            "discrepancy",
            "reconcil",
            "stuck",
            "pending payment",
            "payment status",
        ],
    ),
    (ClassificationLabel::RiskManagement, &["fraud", "suspicious", "compliance", "kyc", "aml", "risk"]),
    (ClassificationLabel::Insurance, &["insurance", "premium", "claim", "policy"]),
    (ClassificationLabel::WealthManagement, &["wealth", "portfolio", "retirement", "estate plan"]),
    (
        ClassificationLabel::InvestmentBanking,
        &["ipo", "merger", "acquisition", "underwrit", "capital market"],
    ),
    (
        ClassificationLabel::CorporateBusinessBanking,
        &["business account", "corporate", "payroll", "trade finance", "letter of credit", "company"],
    ),
    (ClassificationLabel::CapitalTreasury, &["treasury", "liquidity", "forex", "hedg", "cash management"]),
    (
        ClassificationLabel::ItOps,
        &["app ", "website", "login", "log in", "otp", "outage", "crash", "error code"],
    ),
    (ClassificationLabel::Analytics, &["report", "analytics", "spending", "trend", "insight"]),
];

const PAYMENT_WORDS: &[&str] = &["pay", "send", "transfer"];
const RECEIVER_MARKERS: &[&str] = &["pay", "to"];
const NOT_A_NAME: &[&str] = &["the", "my", "a", "an", "me", "money", "rs", "usd", "dollars", "it"];

/// Deterministic stand-in for a hosted model. Classifies by keyword and
/// drives the banking tools from simple intent extraction, so the whole
/// runtime can be exercised without network access.
#[derive(Clone, Debug, Default)]
pub struct OfflineModel;

impl OfflineModel {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_text(text: &str) -> ClassificationLabel {
        let normalized = format!("{} ", normalize_text(text));
        ROUTES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|keyword| normalized.contains(keyword)))
            .map(|(label, _)| *label)
            .unwrap_or(ClassificationLabel::RetailBanking)
    }

    fn respond(&self, request: &ModelRequest) -> ModelOutput {
        let last_user = request.turns.iter().rposition(|turn| matches!(turn, Turn::User { .. }));
        let user_text = last_user
            .and_then(|index| match &request.turns[index] {
                Turn::User { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or_default();

        if request.json_output {
            let label = Self::classify_text(user_text);
            return ModelOutput::Text(json!({ "agent_name": label.as_str() }).to_string());
        }

        let recent: Vec<&ToolResult> = request.turns[last_user.unwrap_or(0)..]
            .iter()
            .filter_map(|turn| match turn {
                Turn::ToolResult(result) if !result.name.starts_with(HANDOFF_TOOL_PREFIX) => {
                    Some(result)
                }
                _ => None,
            })
            .collect();

        if let Some(result) = recent.last() {
            return after_tool(result, &recent, request);
        }

        let has_tool = |name: &str| request.tools.iter().any(|tool| tool.name == name);
        if has_tool(LOOKUP_TRANSACTION) {
            return payments_intent(request);
        }
        if has_tool(MAKE_PAYMENT) || has_tool(CHECK_BALANCE) {
            return retail_intent(request, user_text);
        }

        ModelOutput::Text(format!(
            "Thanks for reaching out to our {} team about \"{}\". A specialist will review the \
             details and get back to you shortly.",
            department(&request.instructions),
            user_text.trim()
        ))
    }
}

#[async_trait]
impl ModelClient for OfflineModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelOutput, ModelError> {
        Ok(self.respond(&request))
    }
}

fn department(instructions: &str) -> &str {
    instructions
        .split_once("You are the ")
        .and_then(|(_, rest)| rest.split_once(" assistant"))
        .map(|(department, _)| department)
        .unwrap_or("support")
}

fn call_id(request: &ModelRequest) -> String {
    format!("offline-{}", request.turns.len())
}

fn payload(result: &ToolResult) -> Value {
    serde_json::from_str(&result.content).unwrap_or(Value::Null)
}

fn field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn after_tool(latest: &ToolResult, recent: &[&ToolResult], request: &ModelRequest) -> ModelOutput {
    let value = payload(latest);
    if latest.is_error {
        let message = field(&value, "error");
        let text = if latest.name == LOOKUP_TRANSACTION {
            format!("{message} Please check the transaction ID and share it again.")
        } else if latest.name == MAKE_PAYMENT && message.starts_with("invalid arguments") {
            format!("I could not make that payment: {message}. Please share who to pay and how much.")
        } else {
            message.to_string()
        };
        return ModelOutput::Text(text);
    }

    let text = match latest.name.as_str() {
        LOOKUP_TRANSACTION => {
            let id = field(&value, "TransactionID");
            let payment = field(&value, "PaymentStatus");
            let core = field(&value, "CoreBankingStatus");
            let already_fixed = recent.iter().any(|result| result.name == FIX_CORE_BANKING_STATUS);
            let can_fix = request.tools.iter().any(|tool| tool.name == FIX_CORE_BANKING_STATUS);

            if payment == "Success" && core != "Success" && can_fix && !already_fixed {
                return ModelOutput::ToolCalls(vec![ToolCall::new(
                    call_id(request),
                    FIX_CORE_BANKING_STATUS,
                    json!({ "transaction_id": id }),
                )]);
            }
            if payment == core {
                format!(
                    "Transaction {id} is consistent: payment status {payment} and core banking \
                     status {core}. No discrepancy detected."
                )
            } else {
                format!(
                    "Transaction {id} shows payment status {payment} and core banking status \
                     {core}. The gateway has not settled it, so there is nothing to reconcile yet."
                )
            }
        }
        FIX_CORE_BANKING_STATUS => field(&value, "message").to_string(),
        CHECK_BALANCE => format!("Your current balance is ${}.", field(&value, "balance")),
        MAKE_PAYMENT => field(&value, "message").to_string(),
        _ => "Done.".to_string(),
    };
    ModelOutput::Text(text)
}

fn payments_intent(request: &ModelRequest) -> ModelOutput {
    let transaction_id = episode_user_texts(request)
        .iter()
        .rev()
        .find_map(|text| find_transaction_id(text));

    match transaction_id {
        Some(transaction_id) => ModelOutput::ToolCalls(vec![ToolCall::new(
            call_id(request),
            LOOKUP_TRANSACTION,
            json!({ "transaction_id": transaction_id }),
        )]),
        None => ModelOutput::Text(
            "I can help with that. Please share the transaction ID of the payment (for example T1001)."
                .to_string(),
        ),
    }
}

fn retail_intent(request: &ModelRequest, user_text: &str) -> ModelOutput {
    let normalized = normalize_text(user_text);
    if normalized.contains("balance") {
        return ModelOutput::ToolCalls(vec![ToolCall::new(call_id(request), CHECK_BALANCE, json!({}))]);
    }

    let texts = episode_user_texts(request);
    let wants_payment = texts.iter().any(|text| {
        tokenize(text).iter().any(|token| PAYMENT_WORDS.contains(&token.to_ascii_lowercase().as_str()))
    });
    if !wants_payment {
        return ModelOutput::Text(
            "I can help with your balance or with sending a payment. What would you like to do?"
                .to_string(),
        );
    }

    let intent = PaymentIntent::extract(&texts.join(" "));
    match (&intent.receiver, intent.amount) {
        (Some(receiver), Some(amount)) => {
            let mut arguments = json!({ "receiver": receiver, "amount": amount.to_string() });
            if let Some(ifsc) = &intent.ifsc {
                arguments["ifsc"] = json!(ifsc);
            }
            ModelOutput::ToolCalls(vec![ToolCall::new(call_id(request), MAKE_PAYMENT, arguments)])
        }
        (receiver, amount) => {
            let mut missing = Vec::new();
            if receiver.is_none() {
                missing.push("who to pay");
            }
            if amount.is_none() {
                missing.push("the amount");
            }
            ModelOutput::Text(format!(
                "To make a payment I still need {}. Please share the missing details.",
                missing.join(" and ")
            ))
        }
    }
}

/// User texts of the current handler episode, oldest first: the message that
/// triggered the latest handoff and everything after it.
fn episode_user_texts(request: &ModelRequest) -> Vec<&str> {
    let is_user = |turn: &Turn| matches!(turn, Turn::User { .. });
    let start = request
        .turns
        .iter()
        .rposition(|turn| {
            matches!(turn, Turn::ToolResult(result) if result.name.starts_with(HANDOFF_TOOL_PREFIX))
        })
        .map(|handoff| request.turns[..handoff].iter().rposition(is_user).unwrap_or(handoff))
        .unwrap_or(0);
    request.turns[start..]
        .iter()
        .filter_map(|turn| match turn {
            Turn::User { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentIntent {
    pub receiver: Option<String>,
    pub amount: Option<Decimal>,
    pub ifsc: Option<String>,
}

impl PaymentIntent {
    pub fn extract(text: &str) -> Self {
        let tokens = tokenize(text);
        let mut intent = Self::default();

        for (index, token) in tokens.iter().enumerate() {
            let lowered = token.to_ascii_lowercase();
            if intent.ifsc.is_none() && is_ifsc(token) {
                intent.ifsc = Some(token.to_ascii_uppercase());
                continue;
            }
            if intent.amount.is_none() {
                if let Some(amount) = parse_money_token(&lowered) {
                    intent.amount = Some(amount);
                    continue;
                }
            }
            let follows_marker = index > 0
                && RECEIVER_MARKERS.contains(&tokens[index - 1].to_ascii_lowercase().as_str());
            if intent.receiver.is_none()
                && follows_marker
                && lowered.chars().all(|ch| ch.is_ascii_alphabetic())
                && !NOT_A_NAME.contains(&lowered.as_str())
            {
                intent.receiver = Some(token.clone());
            }
        }
        intent
    }
}

fn normalize_text(text: &str) -> String {
    text.to_ascii_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_ascii_alphanumeric() || matches!(character, '$' | '.' | ',') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_end_matches(['.', ',']).to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

/// `$100`, `250.50`, `1,200`, `1.5k`. Bare words and zero are rejected.
fn parse_money_token(token: &str) -> Option<Decimal> {
    let trimmed = token.trim_start_matches('$').replace(',', "");
    if !trimmed.starts_with(|ch: char| ch.is_ascii_digit()) {
        return None;
    }

    let (number_part, multiplier) = if let Some(prefix) = trimmed.strip_suffix('k') {
        (prefix, Decimal::from(1_000))
    } else if let Some(prefix) = trimmed.strip_suffix('m') {
        (prefix, Decimal::from(1_000_000))
    } else {
        (trimmed.as_str(), Decimal::ONE)
    };

    let amount = Decimal::from_str(number_part).ok()? * multiplier;
    (amount > Decimal::ZERO).then(|| amount.normalize())
}

fn is_ifsc(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() == 11
        && bytes[..4].iter().all(u8::is_ascii_alphabetic)
        && bytes[4] == b'0'
        && bytes[5..].iter().all(u8::is_ascii_alphanumeric)
}

fn find_transaction_id(text: &str) -> Option<String> {
    tokenize(text).into_iter().find_map(|token| {
        let upper = token.to_ascii_uppercase();
        let looks_like_id = upper.starts_with('T')
            && (3..=24).contains(&upper.len())
            && upper.chars().all(|ch| ch.is_ascii_alphanumeric())
            && upper.chars().any(|ch| ch.is_ascii_digit());
        looks_like_id.then_some(upper)
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use bankdesk_core::domain::conversation::{ConversationContext, ToolResult, Turn};
    use bankdesk_core::domain::label::ClassificationLabel;

    use super::{OfflineModel, PaymentIntent};
    use crate::model::{ModelClient, ModelOutput, ModelRequest, ToolSchema};

    #[test]
    fn keyword_routing_matches_the_reference_scenarios() {
        let cases = [
            ("How do I pay John 100?", ClassificationLabel::RetailBanking),
            ("My payment isn't reflecting in the system", ClassificationLabel::Payments),
            ("I want to file an insurance claim", ClassificationLabel::Insurance),
            ("I think there is fraud on my card", ClassificationLabel::RiskManagement),
            ("The app keeps crashing at login", ClassificationLabel::ItOps),
            ("what is my balance", ClassificationLabel::RetailBanking),
        ];
        for (text, expected) in cases {
            assert_eq!(OfflineModel::classify_text(text), expected, "{text}");
        }
    }

    #[test]
    fn payment_intent_extracts_receiver_amount_and_ifsc() {
        assert_eq!(
            PaymentIntent::extract("How do I pay John 100?"),
            PaymentIntent {
                receiver: Some("John".to_string()),
                amount: Some(Decimal::from(100)),
                ifsc: None,
            }
        );
        assert_eq!(
            PaymentIntent::extract("send $1.5k to Maria, ifsc hdfc0001234"),
            PaymentIntent {
                receiver: Some("Maria".to_string()),
                amount: Some(Decimal::from(1500)),
                ifsc: Some("HDFC0001234".to_string()),
            }
        );
        assert_eq!(PaymentIntent::extract("pay the bill").receiver, None);
    }

    fn schema(name: &str) -> ToolSchema {
        ToolSchema { name: name.to_string(), description: String::new(), parameters: json!({}) }
    }

    #[tokio::test]
    async fn payments_flow_looks_up_then_fixes_then_summarises() {
        let model = OfflineModel::new();
        let tools = vec![schema("fix_core_banking_status"), schema("lookup_transaction")];
        let mut context = ConversationContext::new();
        context.push(Turn::user("my payment isn't reflecting"));
        context.record_handoff("DomainClassifierAgent", "transfer_to_payments", "Payments");
        context.push(Turn::assistant_text("PaymentsAgent", "Please share the transaction ID."));
        context.push(Turn::user("it is T1001"));

        let request = |context: &ConversationContext| ModelRequest {
            instructions: "You are the payments assistant of a bank.".to_string(),
            turns: context.turns().to_vec(),
            tools: tools.clone(),
            json_output: false,
        };

        let ModelOutput::ToolCalls(lookup) = model.complete(request(&context)).await.expect("lookup") else {
            panic!("expected a lookup call");
        };
        assert_eq!(lookup[0].name, "lookup_transaction");
        assert_eq!(lookup[0].arguments["transaction_id"], "T1001");

        context.push(Turn::tool_calls("PaymentsAgent", lookup.clone()));
        context.push(Turn::ToolResult(ToolResult::success(
            &lookup[0],
            json!({"TransactionID": "T1001", "PaymentStatus": "Success", "CoreBankingStatus": "Pending"})
                .to_string(),
        )));
        let ModelOutput::ToolCalls(fix) = model.complete(request(&context)).await.expect("fix") else {
            panic!("expected a fix call");
        };
        assert_eq!(fix[0].name, "fix_core_banking_status");

        context.push(Turn::tool_calls("PaymentsAgent", fix.clone()));
        context.push(Turn::ToolResult(ToolResult::success(
            &fix[0],
            json!({"success": true, "message": "Updated transaction T1001 so CoreBankingStatus=Success."})
                .to_string(),
        )));
        assert_eq!(
            model.complete(request(&context)).await.expect("summary"),
            ModelOutput::Text("Updated transaction T1001 so CoreBankingStatus=Success.".to_string())
        );
    }

    #[tokio::test]
    async fn tool_less_handlers_answer_in_their_department_voice() {
        let model = OfflineModel::new();
        let output = model
            .complete(ModelRequest {
                instructions: "You are the insurance assistant of a bank.".to_string(),
                turns: vec![Turn::user("How do claims work?")],
                tools: Vec::new(),
                json_output: false,
            })
            .await
            .expect("answer");

        let ModelOutput::Text(text) = output else { panic!("expected text") };
        assert!(text.contains("insurance team"));
        assert!(text.contains("How do claims work?"));
    }
}
