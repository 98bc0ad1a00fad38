use std::process::ExitCode;

fn main() -> ExitCode {
    bankdesk_cli::run()
}
