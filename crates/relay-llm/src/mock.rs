use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use relay_core::{FragmentStream, SourceError, StreamSource};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield these fragments, then end.
    Fragments(Vec<String>),
    /// Fail the `open()` call itself.
    FailOpen(SourceError),
    /// Yield these fragments, then one error item.
    FailAfter(Vec<String>, SourceError),
    /// Sleep between fragments.
    Paced(Duration, Vec<String>),
    /// Yield these fragments, then never end.
    Stalled(Vec<String>),
    /// Wait a duration before opening, then resolve the inner response.
    Delayed(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn fragments(parts: &[&str]) -> Self {
        Self::Fragments(parts.iter().map(|p| (*p).to_string()).collect())
    }

    pub fn paced(every: Duration, parts: &[&str]) -> Self {
        Self::Paced(every, parts.iter().map(|p| (*p).to_string()).collect())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delayed(delay, Box::new(inner))
    }
}

enum Mode {
    Scripted(Vec<MockResponse>),
    Echo,
}

/// Source that replays scripted responses in call order, or echoes the
/// prompt back word by word.
pub struct MockSource {
    mode: Mode,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self::with_mode(Mode::Scripted(responses))
    }

    /// Echo mode, used by `serve --mock` for offline runs.
    pub fn echo() -> Self {
        Self::with_mode(Mode::Echo)
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every prompt `open()` was called with, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl StreamSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self, prompt: &str) -> Result<FragmentStream, SourceError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().push(prompt.to_owned());

        let response = match &self.mode {
            Mode::Echo => MockResponse::Paced(Duration::from_millis(40), echo_words(prompt)),
            Mode::Scripted(responses) => match responses.get(idx) {
                Some(response) => response.clone(),
                None => {
                    return Err(SourceError::InvalidRequest(format!(
                        "MockSource: no response configured for call {idx}"
                    )))
                }
            },
        };

        resolve_response(response).await
    }
}

fn echo_words(prompt: &str) -> Vec<String> {
    let mut words: Vec<String> = vec!["You said: ".to_string()];
    words.extend(prompt.split_inclusive(' ').map(str::to_owned));
    words
}

/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<FragmentStream, SourceError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Fragments(parts) => {
                return Ok(Box::pin(stream::iter(
                    parts.into_iter().map(Ok::<String, SourceError>),
                )));
            }
            MockResponse::FailOpen(e) => return Err(e),
            MockResponse::FailAfter(parts, e) => {
                let items = parts
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(e)));
                return Ok(Box::pin(stream::iter(items)));
            }
            MockResponse::Paced(every, parts) => {
                let paced = stream::iter(parts).then(move |part| async move {
                    tokio::time::sleep(every).await;
                    Ok::<String, SourceError>(part)
                });
                return Ok(Box::pin(paced));
            }
            MockResponse::Stalled(parts) => {
                let stalled = stream::iter(parts.into_iter().map(Ok::<String, SourceError>))
                    .chain(stream::pending());
                return Ok(Box::pin(stalled));
            }
            MockResponse::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                current = *inner;
            }
        }
    }
}
