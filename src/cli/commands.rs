use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chatvault")]
#[command(author, version, about = "Persistent chat conversation store with search", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new conversation and print its id
    New {
        /// Explicit title; otherwise derived from the first user message
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Append a message to a conversation
    Append {
        id: String,

        /// user, assistant or system
        role: String,

        content: String,
    },

    /// Show a conversation by id
    Show {
        id: String,

        /// Print only the context window handed to the model
        #[arg(short, long)]
        context: bool,
    },

    /// List all conversations, most recently updated first
    List,

    /// Search conversations by keyword
    Search { query: String },

    /// Delete a conversation by id
    Delete { id: String },

    /// Remove conversations not updated within the retention window
    Cleanup {
        /// Override the configured retention window (days)
        #[arg(short, long)]
        days: Option<i64>,
    },

    /// Show storage statistics for the active backend
    Stats {
        /// Keep refreshing at the configured health-check interval
        #[arg(short, long)]
        watch: bool,
    },
}
