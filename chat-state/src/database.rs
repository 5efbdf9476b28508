use std::collections::HashMap;

use chat_common::{AccountInfo, Command, Error, MessageRecord, Page, Result};
use chrono::{DateTime, Utc};

use crate::model::{Account, CommandOutcome, Message};

/// The replicated state machine every chat node applies committed log
/// entries into. Deliberately a simple in-memory table pair (HashMap for
/// accounts, an ordered Vec for messages) rather than an embedded database:
/// at chat-room scale this is both simpler and faster than SQLite would be,
/// and a JSON snapshot (see [`Database::snapshot`]) is enough to recover it
/// without replaying the whole log on every restart.
#[derive(Default)]
pub struct Database {
    accounts: HashMap<String, Account>,
    messages: Vec<Message>,
    next_message_id: u64,
    /// Index of the highest log entry applied so far; lets the apply loop
    /// resume from the right place and lets a node answer "am I caught up"
    /// without asking the consensus layer.
    pub last_applied: u64,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one committed log entry. Idempotent with respect to
    /// `last_applied`: replaying an index at or below the current watermark
    /// is a no-op, which protects against double-application if the applier
    /// ever reprocesses an index after a restart.
    pub fn apply(&mut self, index: u64, command: Command) -> Result<CommandOutcome> {
        if index <= self.last_applied && self.last_applied != 0 {
            return Err(Error::precondition("entry already applied"));
        }

        // The watermark advances even when the command itself is rejected
        // (duplicate register, unknown recipient, ...): an application-level
        // error is a recorded outcome, not a reason to stall `last_applied`
        // and desynchronize it from the log index it was given.
        let result = self.apply_command(command);
        self.last_applied = index;
        result
    }

    fn apply_command(&mut self, command: Command) -> Result<CommandOutcome> {
        match command {
            Command::Register {
                username,
                password_hash,
                timestamp,
            } => self.register(username, password_hash, timestamp),
            Command::Login {
                username,
                password_hash,
                timestamp,
            } => self.login(username, password_hash, timestamp),
            Command::Logout { username } => self.logout(username),
            Command::DeleteAccount { username } => self.delete_account(username),
            Command::SendMessage {
                sender,
                recipient,
                content,
                timestamp,
            } => self.send_message(sender, recipient, content, timestamp),
            Command::DeleteMessages { username, ids } => self.delete_messages(username, ids),
            Command::MarkAsRead { username, ids } => self.mark_as_read(username, ids),
            Command::PromoteServer { server_id } => Ok(CommandOutcome::ServerPromoted { server_id }),
        }
    }

    fn register(
        &mut self,
        username: String,
        password_hash: Vec<u8>,
        timestamp: DateTime<Utc>,
    ) -> Result<CommandOutcome> {
        if username.trim().is_empty() {
            return Err(Error::invalid("username must not be empty"));
        }

        if self.accounts.contains_key(&username) {
            return Err(Error::precondition(format!(
                "account '{username}' already exists"
            )));
        }

        self.accounts.insert(
            username.clone(),
            Account {
                username,
                password_hash,
                created_at: timestamp,
                last_login: None,
            },
        );

        Ok(CommandOutcome::Registered)
    }

    fn login(
        &mut self,
        username: String,
        password_hash: Vec<u8>,
        timestamp: DateTime<Utc>,
    ) -> Result<CommandOutcome> {
        let account = self
            .accounts
            .get_mut(&username)
            .ok_or_else(|| Error::precondition(format!("no such account '{username}'")))?;

        if account.password_hash != password_hash {
            return Err(Error::precondition("incorrect password"));
        }

        account.last_login = Some(timestamp);

        let unread_count = self
            .messages
            .iter()
            .filter(|m| m.recipient == username && !m.read)
            .count() as u64;

        Ok(CommandOutcome::LoggedIn { unread_count })
    }

    fn logout(&mut self, username: String) -> Result<CommandOutcome> {
        if !self.accounts.contains_key(&username) {
            return Err(Error::precondition(format!("no such account '{username}'")));
        }

        Ok(CommandOutcome::LoggedOut)
    }

    fn delete_account(&mut self, username: String) -> Result<CommandOutcome> {
        if self.accounts.remove(&username).is_none() {
            return Err(Error::precondition(format!("no such account '{username}'")));
        }

        self.messages
            .retain(|m| m.sender != username && m.recipient != username);

        Ok(CommandOutcome::AccountDeleted)
    }

    fn send_message(
        &mut self,
        sender: String,
        recipient: String,
        content: String,
        timestamp: DateTime<Utc>,
    ) -> Result<CommandOutcome> {
        if !self.accounts.contains_key(&sender) {
            return Err(Error::precondition(format!("no such account '{sender}'")));
        }

        if !self.accounts.contains_key(&recipient) {
            return Err(Error::precondition(format!(
                "no such account '{recipient}'"
            )));
        }

        let id = self.next_message_id;
        self.next_message_id += 1;

        self.messages.push(Message {
            id,
            sender: sender.clone(),
            recipient: recipient.clone(),
            content: content.clone(),
            timestamp,
            read: false,
        });

        Ok(CommandOutcome::MessageSent {
            record: MessageRecord {
                id,
                sender,
                recipient,
                content,
                timestamp,
                read: false,
            },
        })
    }

    fn delete_messages(&mut self, username: String, ids: Vec<u64>) -> Result<CommandOutcome> {
        if ids.is_empty() {
            return Err(Error::precondition("ids must not be empty"));
        }

        let id_set: std::collections::HashSet<u64> = ids.into_iter().collect();
        let before = self.messages.len();

        // Either party to a message may delete it, not just the recipient.
        self.messages.retain(|m| {
            !(id_set.contains(&m.id) && (m.sender == username || m.recipient == username))
        });

        let count = (before - self.messages.len()) as u32;
        Ok(CommandOutcome::MessagesDeleted { count })
    }

    fn mark_as_read(&mut self, username: String, ids: Vec<u64>) -> Result<CommandOutcome> {
        if ids.is_empty() {
            return Err(Error::precondition("ids must not be empty"));
        }

        let id_set: std::collections::HashSet<u64> = ids.into_iter().collect();
        let mut count = 0u32;

        for message in self.messages.iter_mut() {
            if message.recipient == username && id_set.contains(&message.id) && !message.read {
                message.read = true;
                count += 1;
            }
        }

        Ok(CommandOutcome::MessagesMarkedRead { count })
    }

    // ---- read-only queries, safe to serve from any node that is caught up --

    pub fn account_exists(&self, username: &str) -> bool {
        self.accounts.contains_key(username)
    }

    pub fn verify_password(&self, username: &str, password_hash: &[u8]) -> bool {
        self.accounts
            .get(username)
            .map(|a| a.password_hash == password_hash)
            .unwrap_or(false)
    }

    pub fn list_accounts(&self, pattern: &str, page: u32, per_page: u32) -> Page<AccountInfo> {
        let mut matches: Vec<&Account> = self
            .accounts
            .values()
            .filter(|a| pattern.is_empty() || like_match(pattern, &a.username))
            .collect();

        matches.sort_by(|a, b| a.username.cmp(&b.username));

        let total = matches.len() as u32;
        let per_page = per_page.max(1);
        let start = (page.saturating_sub(1) as usize) * per_page as usize;

        let items = matches
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .map(|a| AccountInfo {
                username: a.username.clone(),
                created_at: a.created_at,
                last_login: a.last_login,
            })
            .collect();

        Page {
            items,
            page,
            per_page,
            total,
        }
    }

    pub fn get_messages(&self, username: &str, count: u32) -> Vec<MessageRecord> {
        let mut messages: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| m.recipient == username)
            .collect();

        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        let count = if count == 0 { messages.len() } else { count as usize };

        messages
            .into_iter()
            .take(count)
            .map(|m| MessageRecord {
                id: m.id,
                sender: m.sender.clone(),
                recipient: m.recipient.clone(),
                content: m.content.clone(),
                timestamp: m.timestamp,
                read: m.read,
            })
            .collect()
    }

    pub fn unread_count(&self, username: &str) -> u64 {
        self.messages
            .iter()
            .filter(|m| m.recipient == username && !m.read)
            .count() as u64
    }
}

/// SQL-`LIKE`-style matcher: `%` matches any run of characters (including
/// none), `_` matches exactly one character, everything else matches
/// literally. Classic DP over the two strings; `pattern` and `text` are
/// small enough (usernames) that the O(n*m) table is not a concern.
fn like_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let mut table = vec![vec![false; text.len() + 1]; pattern.len() + 1];
    table[0][0] = true;

    for (i, p) in pattern.iter().enumerate() {
        if *p == '%' {
            table[i + 1][0] = table[i][0];
        }
    }

    for i in 0..pattern.len() {
        for j in 0..text.len() {
            table[i + 1][j + 1] = match pattern[i] {
                '%' => table[i][j + 1] || table[i + 1][j],
                '_' => table[i][j],
                c => table[i][j] && c == text[j],
            };
        }
    }

    table[pattern.len()][text.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(db: &mut Database, username: &str) {
        db.apply(
            db.last_applied + 1,
            Command::Register {
                username: username.to_string(),
                password_hash: b"secret".to_vec(),
                timestamp: Utc::now(),
            },
        )
        .unwrap();
    }

    fn send(db: &mut Database, index: u64, sender: &str, recipient: &str, content: &str) {
        db.apply(
            index,
            Command::SendMessage {
                sender: sender.to_string(),
                recipient: recipient.to_string(),
                content: content.to_string(),
                timestamp: Utc::now(),
            },
        )
        .unwrap();
    }

    #[test]
    fn register_then_duplicate_register_fails() {
        let mut db = Database::new();
        register(&mut db, "alice");

        let err = db
            .apply(
                2,
                Command::Register {
                    username: "alice".to_string(),
                    password_hash: b"other".to_vec(),
                    timestamp: Utc::now(),
                },
            )
            .unwrap_err();

        assert!(matches!(err, Error::PreconditionFailed(_)));
    }

    #[test]
    fn login_reports_unread_count() {
        let mut db = Database::new();
        register(&mut db, "alice");
        register(&mut db, "bob");

        send(&mut db, 3, "bob", "alice", "hi");

        let outcome = db
            .apply(
                4,
                Command::Login {
                    username: "alice".to_string(),
                    password_hash: b"secret".to_vec(),
                    timestamp: Utc::now(),
                },
            )
            .unwrap();

        match outcome {
            CommandOutcome::LoggedIn { unread_count } => assert_eq!(unread_count, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn delete_account_cascades_to_messages() {
        let mut db = Database::new();
        register(&mut db, "alice");
        register(&mut db, "bob");

        send(&mut db, 3, "alice", "bob", "hi");

        db.apply(
            4,
            Command::DeleteAccount {
                username: "alice".to_string(),
            },
        )
        .unwrap();

        assert!(db.get_messages("bob", 0).is_empty());
    }

    #[test]
    fn delete_messages_allows_either_sender_or_recipient() {
        let mut db = Database::new();
        register(&mut db, "alice");
        register(&mut db, "bob");
        register(&mut db, "carol");

        send(&mut db, 3, "alice", "bob", "one");

        let outcome = db
            .apply(
                4,
                Command::DeleteMessages {
                    username: "alice".to_string(),
                    ids: vec![0],
                },
            )
            .unwrap();

        match outcome {
            CommandOutcome::MessagesDeleted { count } => assert_eq!(count, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(db.get_messages("bob", 0).is_empty());
    }

    #[test]
    fn delete_messages_by_an_unrelated_user_deletes_nothing() {
        let mut db = Database::new();
        register(&mut db, "alice");
        register(&mut db, "bob");
        register(&mut db, "carol");

        send(&mut db, 3, "alice", "bob", "one");

        let outcome = db
            .apply(
                4,
                Command::DeleteMessages {
                    username: "carol".to_string(),
                    ids: vec![0],
                },
            )
            .unwrap();

        match outcome {
            CommandOutcome::MessagesDeleted { count } => assert_eq!(count, 0),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(db.get_messages("bob", 0).len(), 1);
    }

    #[test]
    fn empty_ids_is_rejected_for_delete_and_mark_read() {
        let mut db = Database::new();
        register(&mut db, "alice");

        let delete_err = db.apply(
            2,
            Command::DeleteMessages {
                username: "alice".to_string(),
                ids: vec![],
            },
        );
        assert!(matches!(delete_err, Err(Error::PreconditionFailed(_))));

        let mark_err = db.apply(
            2,
            Command::MarkAsRead {
                username: "alice".to_string(),
                ids: vec![],
            },
        );
        assert!(matches!(mark_err, Err(Error::PreconditionFailed(_))));
    }

    #[test]
    fn mark_as_read_only_affects_named_ids() {
        let mut db = Database::new();
        register(&mut db, "alice");
        register(&mut db, "bob");

        send(&mut db, 3, "bob", "alice", "one");
        send(&mut db, 4, "bob", "alice", "two");

        let outcome = db
            .apply(
                5,
                Command::MarkAsRead {
                    username: "alice".to_string(),
                    ids: vec![0],
                },
            )
            .unwrap();

        match outcome {
            CommandOutcome::MessagesMarkedRead { count } => assert_eq!(count, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(db.unread_count("alice"), 1);
    }

    #[test]
    fn list_accounts_paginates_and_filters() {
        let mut db = Database::new();
        register(&mut db, "alice");
        register(&mut db, "albert");
        register(&mut db, "bob");

        let page = db.list_accounts("al%", 1, 1);
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].username, "albert");
    }

    #[test]
    fn list_accounts_like_wildcards() {
        let mut db = Database::new();
        register(&mut db, "alice");
        register(&mut db, "albert");
        register(&mut db, "bob");

        assert_eq!(db.list_accounts("%", 1, 10).total, 3);
        assert_eq!(db.list_accounts("%ob", 1, 10).total, 1);
        assert_eq!(db.list_accounts("al_ce", 1, 10).total, 1);
        assert_eq!(db.list_accounts("carol", 1, 10).total, 0);
    }

    #[test]
    fn get_messages_orders_newest_first() {
        let mut db = Database::new();
        register(&mut db, "alice");
        register(&mut db, "bob");

        send(&mut db, 3, "alice", "bob", "first");
        send(&mut db, 4, "alice", "bob", "second");

        let messages = db.get_messages("bob", 10);
        assert_eq!(messages[0].content, "second");
        assert_eq!(messages[1].content, "first");
    }
}
