use clap::{Parser, Subcommand};

/// `mnemo` - episodic/semantic memory consolidation for conversational agents.
#[derive(Parser, Debug)]
#[command(name = "mnemo")]
#[command(version = "0.1.0")]
#[command(about = "Remember, recall and consolidate conversational memories.", long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store one interaction as an episodic memory
    Remember {
        #[arg(long)]
        user: String,

        #[arg(long)]
        chat: String,

        /// Interaction text
        text: String,
    },

    /// Print the memory context assembled for a query
    Recall {
        #[arg(long)]
        user: String,

        query: String,
    },

    /// Run one consolidation batch for a user
    Consolidate {
        #[arg(long)]
        user: String,

        /// Run even if fewer than `min_new_episodes` records are pending
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration with secrets redacted
    Config,
}
