pub mod errors;
pub mod frame;
pub mod ids;
pub mod messages;
pub mod source;

pub use errors::SourceError;
pub use frame::{ServerFrame, BUSY_NOTICE, SENTINEL, SOURCE_ERROR_TEXT};
pub use ids::{ConnectionId, RequestId};
pub use messages::{Message, StreamRequest};
pub use source::{FragmentStream, StreamSource};
