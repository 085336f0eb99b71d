pub mod registry;
pub mod server;
pub mod session;

pub use registry::{ConnectionRegistry, Registration};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use session::{relay_stream, InboundOutcome, RelayOutcome, RelaySession};
