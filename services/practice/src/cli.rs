//! CLI command definitions and subcommands

use clap::{Args, Parser, Subcommand};
use sprechen_core::Register;
use std::path::PathBuf;

/// Sprechen - B1 speaking and writing practice in the terminal
#[derive(Parser, Debug)]
#[command(
    name = "sprechen",
    about = "Practise B1 German conversations and letters against an AI tutor",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Where requests go and where session ids are kept.
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Gateway chat endpoint
    #[arg(
        long,
        global = true,
        env = "SPRECHEN_ENDPOINT",
        default_value = "http://localhost:3001/api/chat"
    )]
    pub endpoint: String,

    /// Model requested from the provider
    #[arg(long, global = true, env = "SPRECHEN_MODEL", default_value = sprechen_core::generation::DEFAULT_MODEL)]
    pub model: String,

    /// Directory holding the persisted session ids
    #[arg(long, global = true, env = "SPRECHEN_STATE_DIR", default_value = ".sprechen")]
    pub state_dir: PathBuf,

    /// Directory of prompt overrides (*.md, by template name)
    #[arg(long, global = true, env = "SPRECHEN_PROMPTS")]
    pub prompts: Option<PathBuf>,

    /// Answer locally with canned replies instead of calling the gateway
    #[arg(long, global = true)]
    pub offline: bool,

    /// Per-request timeout in seconds
    #[arg(long, global = true, default_value_t = 60)]
    pub timeout_secs: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Hold a practice conversation on stdin/stdout
    Practice {
        /// Scenario file (JSON)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Learner turns required before the tutor may close
        #[arg(long, default_value_t = 3)]
        min_exchanges: usize,

        /// Learner turns after which the conversation ends
        #[arg(long, default_value_t = 15)]
        max_turns: usize,
    },

    /// Forget the stored session id of a scenario
    Reset {
        /// Scenario file (JSON)
        #[arg(short, long)]
        scenario: PathBuf,
    },

    /// Evaluate a written letter
    Letter {
        /// Writing task file (JSON)
        #[arg(short, long)]
        prompt: PathBuf,

        /// The letter text
        #[arg(short, long)]
        text: PathBuf,

        /// formal or informal
        #[arg(short, long, default_value = "formal")]
        register: Register,

        /// Print the evaluation as JSON
        #[arg(long)]
        json: bool,
    },
}
