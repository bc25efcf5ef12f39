//! Main Entrypoint for the Sprechen practice host
//!
//! Wires the dialogue core to a gateway (or the offline backend) and runs one
//! of the subcommands: an interactive practice conversation, a session reset,
//! or a letter evaluation.

mod cli;
mod render;

use anyhow::{Context, bail};
use clap::Parser;
use cli::{BackendArgs, Cli, Command};
use sprechen_core::writing::LETTER_SESSION_KEY;
use sprechen_core::{
    DialogueServices, FileSessionStore, GenerationBackend, HttpGenerationBackend, LetterEvaluator,
    LetterPrompt, OfflineBackend, PracticeSession, PromptSet, ProtectionClient, Register,
    RetryPolicy, Scenario, SessionChannel, SessionLimits, SessionPhase, SessionStore,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Everything a subcommand needs to talk to the gateway.
struct Host {
    channel: SessionChannel,
    store: Arc<dyn SessionStore>,
    prompts: Arc<PromptSet>,
}

impl Host {
    fn build(args: &BackendArgs) -> anyhow::Result<Self> {
        let backend: Arc<dyn GenerationBackend> = if args.offline {
            info!("Using the offline backend.");
            Arc::new(OfflineBackend)
        } else {
            info!(endpoint = %args.endpoint, "Using the gateway backend.");
            Arc::new(
                HttpGenerationBackend::new(&args.endpoint, Duration::from_secs(args.timeout_secs))
                    .context("Failed to build HTTP client")?,
            )
        };

        let store = FileSessionStore::open(&args.state_dir);
        if !store.is_persistent() {
            warn!(dir = %args.state_dir.display(), "Session ids will not survive this run");
        }
        let store: Arc<dyn SessionStore> = Arc::new(store);

        let prompts = match &args.prompts {
            Some(dir) => PromptSet::load_dir(dir)?,
            None => PromptSet::default(),
        };

        let client = Arc::new(ProtectionClient::new(backend, RetryPolicy::default()));
        Ok(Self {
            channel: SessionChannel::new(client, store.clone(), args.model.clone()),
            store,
            prompts: Arc::new(prompts),
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read {what} {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid {what} {}", path.display()))
}

/// Cancels `token` on Ctrl+C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C. Cancelling...");
            token.cancel();
        }
    });
}

async fn practice(host: Host, scenario: Scenario, limits: SessionLimits) -> anyhow::Result<()> {
    let services = DialogueServices::new(host.channel.clone(), host.prompts.clone());
    let mut session = PracticeSession::new(scenario, services, limits);
    let cancel = session.cancel_token();
    cancel_on_ctrl_c(cancel.clone());

    println!("=== {} ===", session.scenario().title);
    println!("{}\n", session.scenario().task);
    println!("{}\n", render::coverage(session.scenario(), session.covered()));

    let opening = match session.begin().await {
        Ok(turn) => turn,
        Err(e) => bail!(e.user_message()),
    };
    println!("{}", render::tutor(&opening));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while session.phase() == SessionPhase::Active {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read from stdin")?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match session.submit(&line).await {
            Ok(outcome) => {
                if let Some(text) = outcome.correction.as_ref().and_then(render::correction) {
                    println!("{text}");
                }
                println!("{}", render::tutor(&outcome.reply));
                if let Some(closing) = &outcome.closing {
                    println!("{}", render::tutor(closing));
                }
                println!("{}", render::coverage(session.scenario(), &outcome.covered));
                if let Some(count) = host
                    .store
                    .session(&session.scenario().key)
                    .map(|s| s.message_count)
                {
                    println!("  Nachrichten: {count}");
                }
            }
            Err(e) if e.is_terminal() => {
                println!("{}", e.user_message());
                return Ok(());
            }
            Err(e) => println!("{}", e.user_message()),
        }
    }

    if let Some(report) = session.report() {
        println!("\n{}", render::report(report));
    }
    Ok(())
}

/// Forgets the stored session id of the scenario at `path`; returns its key.
fn reset(host: &Host, path: &Path) -> anyhow::Result<String> {
    let scenario: Scenario = read_json(path, "scenario")?;
    host.store.clear(&scenario.key);
    Ok(scenario.key)
}

async fn letter(
    host: Host,
    prompt: LetterPrompt,
    text: String,
    register: Register,
    json: bool,
) -> anyhow::Result<()> {
    let evaluator = LetterEvaluator::new(host.channel, host.prompts);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let evaluation = match evaluator.evaluate(&text, &prompt, register, &cancel).await {
        Ok(evaluation) => evaluation,
        Err(e) => bail!(e.user_message()),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
    } else {
        println!("=== {} ===\n{}", prompt.title, render::letter(&evaluation));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let host = Host::build(&cli.backend)?;
    match cli.command {
        Command::Practice {
            scenario,
            min_exchanges,
            max_turns,
        } => {
            let scenario: Scenario = read_json(&scenario, "scenario")?;
            let limits = SessionLimits {
                min_exchanges,
                max_learner_turns: max_turns,
            };
            practice(host, scenario, limits).await
        }
        Command::Reset { scenario } => {
            let key = reset(&host, &scenario)?;
            println!("Sitzung für '{key}' zurückgesetzt.");
            Ok(())
        }
        Command::Letter {
            prompt,
            text,
            register,
            json,
        } => {
            let prompt: LetterPrompt = read_json(&prompt, "writing task")?;
            let text = std::fs::read_to_string(&text)
                .with_context(|| format!("Could not read letter {}", text.display()))?;
            if host.store.session(LETTER_SESSION_KEY).is_some() {
                info!("Continuing the stored letter session.");
            }
            letter(host, prompt, text, register, json).await
        }
    }
}
