use chat_common::EndPoint;
use clap::{Parser, Subcommand};

/// One-shot command-line front end for a chat cluster. Each invocation
/// makes a single call (or, for `stream`, stays attached until interrupted)
/// and exits: this tool has no notion of a standing session to hold open
/// between commands.
#[derive(Parser, Debug)]
#[command(name = "chat-cli")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Cluster member address, most-likely-leader first. Repeat to give
    /// the client several addresses to try.
    #[arg(long = "server", required = true)]
    pub servers: Vec<EndPoint>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new account.
    Register { username: String, password: String },

    /// Authenticate and report the unread message count.
    Login { username: String, password: String },

    /// Mark an account as logged out.
    Logout { username: String },

    /// Permanently delete an account and its messages.
    DeleteAccount { username: String },

    /// List accounts matching a `LIKE`-style pattern.
    ListAccounts {
        #[arg(default_value = "%")]
        pattern: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },

    /// Send a message to another account.
    Send {
        sender: String,
        recipient: String,
        content: String,
    },

    /// Fetch the most recent messages delivered to an account.
    Inbox {
        username: String,
        #[arg(long, default_value_t = 20)]
        count: u32,
    },

    /// Delete messages by id.
    DeleteMessages { username: String, ids: Vec<u64> },

    /// Mark messages as read by id.
    MarkAsRead { username: String, ids: Vec<u64> },

    /// Stay attached and print messages as they arrive.
    Stream { username: String },
}
