pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "bankdesk",
    about = "Bankdesk operator CLI",
    long_about = "Inspect configuration, check readiness, prepare the database, and chat with the banking agents from a terminal.",
    after_help = "Examples:\n  bankdesk doctor --json\n  bankdesk seed\n  bankdesk chat --user alice --password alice123"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo accounts, credentials and gateway transactions (idempotent)")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution"
    )]
    Config,
    #[command(about = "Validate config, database connectivity and schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Talk to the agents on the console; type `exit` to leave")]
    Chat {
        #[arg(long, help = "Session key, usually the customer's username")]
        user: String,
        #[arg(long, help = "Sign in before chatting")]
        password: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Chat { user, password } => {
            let stdin = std::io::stdin();
            commands::chat::run(&user, password, stdin.lock(), std::io::stdout())
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
