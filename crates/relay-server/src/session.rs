use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use relay_core::{
    ConnectionId, SourceError, StreamRequest, StreamSource, BUSY_NOTICE, SENTINEL,
    SOURCE_ERROR_TEXT,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// What happened to one inbound text frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Blank after trimming; nothing was sent upstream.
    Ignored,
    /// A reply was already streaming; a busy notice was sent instead.
    Busy,
    /// A new reply stream was started.
    Started,
}

/// How a single forwarded stream ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The sentinel was queued. `failed` is true when the error text was
    /// sent in place of (or after) the fragments.
    Completed { fragments: usize, failed: bool },
    /// The connection went away before the sentinel could be queued.
    Abandoned { fragments: usize },
}

/// Per-connection relay state: at most one reply stream in flight.
pub struct RelaySession {
    id: ConnectionId,
    source: Arc<dyn StreamSource>,
    outbound: mpsc::Sender<String>,
    in_flight: Option<JoinHandle<RelayOutcome>>,
    /// Cleared by the stream task before its sentinel is queued.
    streaming: Arc<AtomicBool>,
}

impl RelaySession {
    pub fn new(
        id: ConnectionId,
        source: Arc<dyn StreamSource>,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        tracing::info!(connection_id = %id, source = source.name(), "relay session opened");
        Self {
            id,
            source,
            outbound,
            in_flight: None,
            streaming: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Whether a reply stream is still running on this connection. False as
    /// soon as the stream's last frame is about to be queued.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Handle one inbound prompt frame.
    pub async fn on_inbound_request(&mut self, raw: &str) -> InboundOutcome {
        let Some(request) = StreamRequest::from_input(raw) else {
            tracing::debug!(connection_id = %self.id, "ignoring blank request");
            return InboundOutcome::Ignored;
        };

        if self.is_streaming() {
            tracing::warn!(
                connection_id = %self.id,
                request_id = %request.id,
                "request received while a reply is streaming, rejecting"
            );
            // Dropped silently if the connection is already gone.
            let _ = self.outbound.send(BUSY_NOTICE.to_owned()).await;
            return InboundOutcome::Busy;
        }

        let span = tracing::info_span!(
            "relay_request",
            connection_id = %self.id,
            request_id = %request.id,
        );
        let source = Arc::clone(&self.source);
        let outbound = self.outbound.clone();
        let streaming = Arc::clone(&self.streaming);
        streaming.store(true, Ordering::Release);
        self.in_flight = Some(tokio::spawn(
            async move {
                let outcome = relay_until_sentinel(
                    source.as_ref(),
                    &request.text,
                    &outbound,
                    &streaming,
                )
                .await;
                tracing::info!(?outcome, "reply stream finished");
                outcome
            }
            .instrument(span),
        ));
        InboundOutcome::Started
    }

    /// Wait for the in-flight stream, if any, to finish.
    pub async fn wait_idle(&mut self) -> Option<RelayOutcome> {
        let handle = self.in_flight.take()?;
        handle.await.ok()
    }

    /// Abandon any in-flight stream. No further frames are produced for this
    /// connection.
    pub fn on_disconnect(&mut self) {
        self.streaming.store(false, Ordering::Release);
        if let Some(handle) = self.in_flight.take() {
            if !handle.is_finished() {
                tracing::info!(connection_id = %self.id, "abandoning in-flight reply");
            }
            handle.abort();
        }
        tracing::info!(connection_id = %self.id, "relay session closed");
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

/// Stream one prompt through `source` into `outbound`.
///
/// Every fragment is queued verbatim in arrival order. The sentinel is queued
/// exactly once whether the source finishes or fails; a failure queues the
/// fixed error text first. A closed `outbound` ends the relay quietly.
pub async fn relay_stream(
    source: &dyn StreamSource,
    prompt: &str,
    outbound: &mpsc::Sender<String>,
) -> RelayOutcome {
    relay_until_sentinel(source, prompt, outbound, &AtomicBool::new(true)).await
}

/// [`relay_stream`], clearing `streaming` right before the sentinel is queued.
async fn relay_until_sentinel(
    source: &dyn StreamSource,
    prompt: &str,
    outbound: &mpsc::Sender<String>,
    streaming: &AtomicBool,
) -> RelayOutcome {
    let mut fragments = 0;

    let failure: Option<SourceError> = match source.open(prompt).await {
        Ok(mut stream) => loop {
            match stream.next().await {
                Some(Ok(fragment)) => {
                    if outbound.send(fragment).await.is_err() {
                        return RelayOutcome::Abandoned { fragments };
                    }
                    fragments += 1;
                }
                Some(Err(e)) => break Some(e),
                None => break None,
            }
        },
        Err(e) => Some(e),
    };

    let failed = failure.is_some();
    if let Some(error) = failure {
        tracing::warn!(
            error = %error,
            kind = error.error_kind(),
            transport = error.is_transport(),
            fragments,
            "source failed, sending error reply"
        );
        if outbound.send(SOURCE_ERROR_TEXT.to_owned()).await.is_err() {
            return RelayOutcome::Abandoned { fragments };
        }
    }

    streaming.store(false, Ordering::Release);
    if outbound.send(SENTINEL.to_owned()).await.is_err() {
        return RelayOutcome::Abandoned { fragments };
    }
    RelayOutcome::Completed { fragments, failed }
}
