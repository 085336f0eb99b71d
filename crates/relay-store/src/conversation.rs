use chrono::Utc;
use tracing::instrument;

use relay_core::Message;

use crate::database::Database;
use crate::error::StoreError;

pub const DEFAULT_HISTORY_KEY: &str = "chat_history";

/// Seeded as the only message when a history key holds nothing.
pub const WELCOME_TEXT: &str = "Hi! Ask me anything and I'll stream the answer back.";

/// Append-only, ordered conversation history persisted under one key.
///
/// The in-memory list is authoritative for the running session. Writes go
/// through to SQLite; a failed write leaves the in-memory list intact and is
/// reported to the caller.
pub struct ConversationStore {
    db: Database,
    key: String,
    messages: Vec<Message>,
    /// Sequence for the next row. Never reused, even after a failed write.
    next_sequence: i64,
}

impl ConversationStore {
    /// Open the history stored under `key`, seeding the welcome message if
    /// there is none.
    pub fn open(db: Database, key: impl Into<String>) -> Result<Self, StoreError> {
        let mut store = Self {
            db,
            key: key.into(),
            messages: Vec::new(),
            next_sequence: 0,
        };
        store.restore()?;
        Ok(store)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Reload the history from disk.
    #[instrument(skip(self), fields(history_key = %self.key))]
    pub fn restore(&mut self) -> Result<&[Message], StoreError> {
        let key = self.key.clone();
        let (loaded, next_sequence) = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT is_from_user, text FROM messages
                 WHERE history_key = ?1 ORDER BY sequence ASC",
            )?;
            let rows = stmt.query_map([&key], |row| {
                Ok(Message {
                    is_from_user: row.get::<_, i64>(0)? != 0,
                    text: row.get(1)?,
                })
            })?;
            let loaded = rows.collect::<Result<Vec<_>, _>>()?;
            let next: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence), -1) + 1 FROM messages WHERE history_key = ?1",
                [&key],
                |row| row.get(0),
            )?;
            Ok((loaded, next))
        })?;

        self.messages = loaded;
        self.next_sequence = next_sequence;
        if self.messages.is_empty() {
            tracing::debug!("no stored history, seeding welcome message");
            self.append(Message::assistant(WELCOME_TEXT))?;
        }
        Ok(&self.messages)
    }

    /// Append a complete message.
    #[instrument(skip(self, message), fields(history_key = %self.key, from_user = message.is_from_user))]
    pub fn append(&mut self, message: Message) -> Result<(), StoreError> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let key = self.key.clone();
        let is_from_user = i64::from(message.is_from_user);
        let text = message.text.clone();
        self.messages.push(message);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (history_key, sequence, is_from_user, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![key, sequence, is_from_user, text, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Drop every message under this key. The welcome message is seeded
    /// again on the next [`restore`](Self::restore).
    #[instrument(skip(self), fields(history_key = %self.key))]
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.messages.clear();
        let key = self.key.clone();
        self.db.with_tx(|tx| {
            tx.execute("DELETE FROM messages WHERE history_key = ?1", [&key])?;
            Ok(())
        })?;
        self.next_sequence = 0;
        Ok(())
    }

    /// The history as a JSON array of `{isFromUser, text}` objects.
    pub fn export_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.messages)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Database, ConversationStore) {
        let db = Database::in_memory().unwrap();
        let store = ConversationStore::open(db.clone(), DEFAULT_HISTORY_KEY).unwrap();
        (db, store)
    }

    #[test]
    fn empty_history_is_seeded_with_welcome() {
        let (_db, store) = store();
        assert_eq!(store.messages(), &[Message::assistant(WELCOME_TEXT)]);
    }

    #[test]
    fn appended_messages_survive_reopen_in_order() {
        let (db, mut store) = store();
        store.append(Message::user("hello")).unwrap();
        store.append(Message::assistant("Hello!")).unwrap();

        let reopened = ConversationStore::open(db, DEFAULT_HISTORY_KEY).unwrap();
        assert_eq!(
            reopened.messages(),
            &[
                Message::assistant(WELCOME_TEXT),
                Message::user("hello"),
                Message::assistant("Hello!"),
            ]
        );
    }

    #[test]
    fn keys_are_isolated() {
        let db = Database::in_memory().unwrap();
        let mut a = ConversationStore::open(db.clone(), "a").unwrap();
        a.append(Message::user("only in a")).unwrap();

        let b = ConversationStore::open(db, "b").unwrap();
        assert_eq!(b.messages().len(), 1);
        assert_eq!(b.key(), "b");
    }

    #[test]
    fn clear_then_restore_reseeds() {
        let (_db, mut store) = store();
        store.append(Message::user("hello")).unwrap();
        store.clear().unwrap();
        assert!(store.messages().is_empty());

        let restored = store.restore().unwrap();
        assert_eq!(restored, &[Message::assistant(WELCOME_TEXT)]);
    }

    #[test]
    fn export_uses_wire_field_names() {
        let (_db, store) = store();
        let json = store.export_json().unwrap();
        assert!(json.contains("\"isFromUser\": false"), "got: {json}");
    }

    #[test]
    fn failed_write_keeps_message_in_memory() {
        let (db, mut store) = store();
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE messages")?;
            Ok(())
        })
        .unwrap();

        let result = store.append(Message::user("kept"));
        assert!(matches!(result, Err(StoreError::Database(_))));
        assert_eq!(store.messages().last(), Some(&Message::user("kept")));
    }

    #[test]
    fn failed_write_does_not_shift_later_rows() {
        let (db, mut store) = store();
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON messages
                 WHEN NEW.text = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        store.append(Message::user("a")).unwrap();
        assert!(store.append(Message::user("boom")).is_err());
        store.append(Message::user("b")).unwrap();

        let mut reopened = ConversationStore::open(db.clone(), DEFAULT_HISTORY_KEY).unwrap();
        reopened.append(Message::user("c")).unwrap();

        let again = ConversationStore::open(db, DEFAULT_HISTORY_KEY).unwrap();
        assert_eq!(
            again.messages(),
            &[
                Message::assistant(WELCOME_TEXT),
                Message::user("a"),
                Message::user("b"),
                Message::user("c"),
            ]
        );
    }
}
