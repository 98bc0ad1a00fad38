use bankdesk_db::{DemoSeedDataset, SeedResult, VerificationResult};

use crate::commands::{with_database, CommandResult, StepFailure};

pub fn run() -> CommandResult {
    let seeded = with_database("seed", |_, pool| async move {
        let seed = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        check_verification(&verification)?;
        Ok(seed)
    });

    match seeded {
        Ok(seed) => CommandResult::success("seed", summary(&seed)),
        Err(failure) => failure,
    }
}

fn check_verification(verification: &VerificationResult) -> Result<(), StepFailure> {
    if verification.all_present {
        return Ok(());
    }
    let failed_checks = verification
        .checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(*check))
        .collect::<Vec<_>>();
    Err(("seed_verification", verification_message(&failed_checks), 6u8))
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

fn summary(seed: &SeedResult) -> String {
    let transactions: Vec<String> = seed
        .transactions_seeded
        .iter()
        .map(|(transaction_id, description)| format!("  - {transaction_id}: {description}"))
        .collect();
    format!(
        "demo data ready for accounts {}; gateway transactions:\n{}",
        seed.accounts_seeded.join(", "),
        transactions.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        assert_eq!(
            verification_message(&["credential", "T1001"]),
            "Seed verification failed for checks: credential, T1001"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        assert_eq!(verification_message(&[]), "Some seed data failed to load");
    }
}
