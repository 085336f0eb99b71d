pub mod mock;
pub mod openai;
pub mod sse;

pub use mock::{MockResponse, MockSource};
pub use openai::{OpenAiConfig, OpenAiSource};
