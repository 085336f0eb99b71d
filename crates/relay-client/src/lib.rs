pub mod chat;
pub mod connection;
pub mod pacer;

pub use chat::{ChatConfig, ChatEvent, ChatSession, SubmitOutcome};
pub use connection::{ClientConfig, ConnectionEvent, ConnectionManager, ConnectionState, SendError};
pub use pacer::{Finalized, Tick, TokenPacer};
