use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use bankdesk_agent::auth::AUTH_AGENT_TYPE;
use bankdesk_agent::{
    AgentRuntime, ChannelReplySink, LoginOutcome, OfflineModel, RuntimeDeps, RuntimeSettings,
    TurnReply,
};
use bankdesk_core::audit::TracingAuditSink;
use bankdesk_core::domain::session::SessionId;
use bankdesk_db::repositories::{
    SqlAccountRepository, SqlCredentialRepository, SqlGatewayRepository,
};
use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::commands::{with_database, CommandResult};

const EXIT_WORDS: &[&str] = &["exit", "quit"];
const RESET_WORD: &str = "/reset";

/// Console conversation bound to one session key.
struct Console {
    runtime: AgentRuntime,
    replies: mpsc::UnboundedReceiver<TurnReply>,
    session: SessionId,
}

impl Console {
    async fn settle(&mut self) -> Vec<TurnReply> {
        self.runtime.run_until_idle().await;
        let mut finished = Vec::new();
        while let Ok(reply) = self.replies.try_recv() {
            finished.push(reply);
        }
        finished
    }

    async fn login(&mut self, password: String) -> anyhow::Result<(LoginOutcome, Vec<TurnReply>)> {
        let outcome = self
            .runtime
            .login(self.session.as_str(), SecretString::from(password))
            .await
            .context("login could not be dispatched")?;
        Ok((outcome, self.settle().await))
    }

    async fn say(&mut self, line: &str) -> anyhow::Result<Vec<TurnReply>> {
        if line == RESET_WORD {
            self.runtime.reset_session(&self.session).context("reset could not be dispatched")?;
        } else {
            self.runtime.submit(&self.session, line).context("input could not be dispatched")?;
        }
        Ok(self.settle().await)
    }
}

fn print_replies(output: &mut impl Write, replies: &[TurnReply]) -> std::io::Result<()> {
    for reply in replies {
        writeln!(output, "[{}] {}", reply.agent, reply.text)?;
    }
    output.flush()
}

/// Runs the console loop until `exit` or end of input. Replies are written to
/// `output`; the returned result summarises the session.
pub fn run(
    user: &str,
    password: Option<String>,
    input: impl BufRead,
    mut output: impl Write,
) -> CommandResult {
    let user = user.trim().to_string();
    if user.is_empty() {
        return CommandResult::failure("chat", "invalid_arguments", "--user must not be empty", 2);
    }

    let session = SessionId::new(user.as_str());
    let outcome = with_database("chat", |config, pool| async move {
        let (sender, receiver) = mpsc::unbounded_channel();
        let runtime = AgentRuntime::start(RuntimeDeps {
            model: Arc::new(OfflineModel::new()),
            accounts: Arc::new(SqlAccountRepository::new(pool.clone())),
            gateway: Arc::new(SqlGatewayRepository::new(pool.clone())),
            credentials: Arc::new(SqlCredentialRepository::new(pool.clone())),
            replies: Arc::new(ChannelReplySink::new(sender)),
            audit: Arc::new(TracingAuditSink),
            settings: RuntimeSettings::from_config(&config),
        })
        .map_err(|error| ("runtime_init", error.to_string(), 3u8))?;

        let mut console = Console { runtime, replies: receiver, session };
        converse(&mut console, password, input, &mut output)
            .await
            .map_err(|error| ("chat_io", format!("{error:#}"), 7u8))
    });

    match outcome {
        Ok(ChatOutcome::Closed { turns }) => {
            CommandResult::success("chat", format!("session `{user}` closed after {turns} turns"))
        }
        Ok(ChatOutcome::Rejected) => {
            CommandResult::failure("chat", "authentication", "sign-in was rejected", 8)
        }
        Err(failure) => failure,
    }
}

enum ChatOutcome {
    Closed { turns: usize },
    Rejected,
}

async fn converse(
    console: &mut Console,
    password: Option<String>,
    input: impl BufRead,
    output: &mut impl Write,
) -> anyhow::Result<ChatOutcome> {
    if let Some(password) = password {
        let (outcome, replies) = console.login(password).await?;
        print_replies(output, &replies)?;
        if let LoginOutcome::Rejected { reply } = outcome {
            writeln!(output, "[{AUTH_AGENT_TYPE}] {reply}")?;
            return Ok(ChatOutcome::Rejected);
        }
    }

    let mut turns = 0;
    for line in input.lines() {
        let line = line.context("failed to read console input")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&line.to_ascii_lowercase().as_str()) {
            break;
        }
        let replies = console.say(line).await?;
        print_replies(output, &replies)?;
        turns += 1;
    }

    Ok(ChatOutcome::Closed { turns })
}
