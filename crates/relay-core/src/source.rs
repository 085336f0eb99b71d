use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::SourceError;

/// Lazy, finite, non-restartable sequence of text fragments. An `Err` item may
/// appear at any point; callers stop iterating after the first one.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, SourceError>> + Send>>;

/// A capability that turns a prompt into a stream of text fragments.
///
/// Each call is stateless: the prompt is the only context forwarded.
#[async_trait]
pub trait StreamSource: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, prompt: &str) -> Result<FragmentStream, SourceError>;
}
