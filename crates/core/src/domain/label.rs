use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of domains the classifier may route to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClassificationLabel {
    #[serde(rename = "RetailBankingAgent")]
    RetailBanking,
    #[serde(rename = "CorporateBusinessBankingAgent")]
    CorporateBusinessBanking,
    #[serde(rename = "InvestmentBankingAgent")]
    InvestmentBanking,
    #[serde(rename = "WealthManagementAgent")]
    WealthManagement,
    #[serde(rename = "RiskManagementAgent")]
    RiskManagement,
    #[serde(rename = "InsuranceAgent")]
    Insurance,
    #[serde(rename = "ITOpsAgent")]
    ItOps,
    #[serde(rename = "PaymentsAgent")]
    Payments,
    #[serde(rename = "CapitalTreasuryAgent")]
    CapitalTreasury,
    #[serde(rename = "AnalyticsAgent")]
    Analytics,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown classification label `{0}`")]
pub struct UnknownLabel(pub String);

impl ClassificationLabel {
    pub const ALL: [ClassificationLabel; 10] = [
        Self::RetailBanking,
        Self::CorporateBusinessBanking,
        Self::InvestmentBanking,
        Self::WealthManagement,
        Self::RiskManagement,
        Self::Insurance,
        Self::ItOps,
        Self::Payments,
        Self::CapitalTreasury,
        Self::Analytics,
    ];

    /// Wire name, also used as the handler's agent type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RetailBanking => "RetailBankingAgent",
            Self::CorporateBusinessBanking => "CorporateBusinessBankingAgent",
            Self::InvestmentBanking => "InvestmentBankingAgent",
            Self::WealthManagement => "WealthManagementAgent",
            Self::RiskManagement => "RiskManagementAgent",
            Self::Insurance => "InsuranceAgent",
            Self::ItOps => "ITOpsAgent",
            Self::Payments => "PaymentsAgent",
            Self::CapitalTreasury => "CapitalTreasuryAgent",
            Self::Analytics => "AnalyticsAgent",
        }
    }

    pub fn topic(self) -> &'static str {
        match self {
            Self::RetailBanking => "RetailBanking",
            Self::CorporateBusinessBanking => "CorporateBanking",
            Self::InvestmentBanking => "InvestmentBanking",
            Self::WealthManagement => "WealthManagement",
            Self::RiskManagement => "RiskManagement",
            Self::Insurance => "Insurance",
            Self::ItOps => "ITOps",
            Self::Payments => "Payments",
            Self::CapitalTreasury => "CapitalTreasury",
            Self::Analytics => "Analytics",
        }
    }

    pub fn transfer_tool(self) -> &'static str {
        match self {
            Self::RetailBanking => "transfer_to_retail_banking",
            Self::CorporateBusinessBanking => "transfer_to_corporate_banking",
            Self::InvestmentBanking => "transfer_to_investment_banking",
            Self::WealthManagement => "transfer_to_wealth_management",
            Self::RiskManagement => "transfer_to_risk_management",
            Self::Insurance => "transfer_to_insurance",
            Self::ItOps => "transfer_to_itops",
            Self::Payments => "transfer_to_payments",
            Self::CapitalTreasury => "transfer_to_capital_treasury",
            Self::Analytics => "transfer_to_analytics",
        }
    }
}

impl fmt::Display for ClassificationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassificationLabel {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|label| label.as_str() == trimmed)
            .ok_or_else(|| UnknownLabel(trimmed.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{ClassificationLabel, UnknownLabel};

    #[test]
    fn every_label_round_trips_through_its_wire_name() {
        for label in ClassificationLabel::ALL {
            assert_eq!(label.as_str().parse::<ClassificationLabel>(), Ok(label));
        }
    }

    #[test]
    fn topics_and_transfer_tools_are_unique() {
        let topics: HashSet<_> = ClassificationLabel::ALL.iter().map(|l| l.topic()).collect();
        let tools: HashSet<_> =
            ClassificationLabel::ALL.iter().map(|l| l.transfer_tool()).collect();
        assert_eq!(topics.len(), 10);
        assert_eq!(tools.len(), 10);
    }

    #[test]
    fn labels_outside_the_set_are_rejected() {
        assert_eq!(
            "MortgageAgent".parse::<ClassificationLabel>(),
            Err(UnknownLabel("MortgageAgent".to_owned()))
        );
        assert!("paymentsagent".parse::<ClassificationLabel>().is_err());
    }
}
