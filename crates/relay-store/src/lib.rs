pub mod conversation;
pub mod database;
pub mod error;
pub mod schema;

pub use conversation::{ConversationStore, DEFAULT_HISTORY_KEY, WELCOME_TEXT};
pub use database::Database;
pub use error::StoreError;
