mod cli;

use std::sync::Arc;

use chat_client::ChatClient;
use clap::Parser;
use cli::{Cli, Command};
use sha2::{Digest, Sha256};
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let client = Arc::new(ChatClient::new(cli.servers));

    match cli.command {
        Command::Register { username, password } => {
            client.register(username, hash_password(&password)).await?;
            println!("registered");
        }
        Command::Login { username, password } => {
            let unread = client.login(username, hash_password(&password)).await?;
            println!("logged in, {unread} unread message(s)");
        }
        Command::Logout { username } => {
            client.logout(username).await?;
            println!("logged out");
        }
        Command::DeleteAccount { username } => {
            client.delete_account(username).await?;
            println!("account deleted");
        }
        Command::ListAccounts { pattern, page, per_page } => {
            let page = client.list_accounts(pattern, page, per_page).await?;
            for account in page.items {
                println!("{}\tcreated {}", account.username, account.created_at);
            }
            println!("(page {}/{} total)", page.page, page.total);
        }
        Command::Send {
            sender,
            recipient,
            content,
        } => {
            let id = client.send_message(sender, recipient, content).await?;
            println!("sent, id {id}");
        }
        Command::Inbox { username, count } => {
            let messages = client.get_messages(username, count).await?;
            for message in messages {
                let mark = if message.read { " " } else { "*" };
                println!("{mark}[{}] {} -> {}: {}", message.id, message.sender, message.recipient, message.content);
            }
        }
        Command::DeleteMessages { username, ids } => {
            let deleted = client.delete_messages(username, ids).await?;
            println!("deleted {deleted} message(s)");
        }
        Command::MarkAsRead { username, ids } => {
            let marked = client.mark_as_read(username, ids).await?;
            println!("marked {marked} message(s) as read");
        }
        Command::Stream { username } => {
            let mut stream = client.stream_messages(username);
            println!("streaming, press ctrl-c to stop");
            while let Some(message) = stream.recv().await {
                println!("[{}] {} -> {}: {}", message.id, message.sender, message.recipient, message.content);
            }
        }
    }

    Ok(())
}

/// The core treats `password_hash` as opaque bytes and does no hashing of
/// its own; this caller hashes the same way the original Python client did
/// (`hashlib.sha256(password.encode()).hexdigest()`), just without leaving
/// the CLI as the only place that knows how.
fn hash_password(password: &str) -> Vec<u8> {
    Sha256::digest(password.as_bytes()).to_vec()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::WARN.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
