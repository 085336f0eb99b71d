use std::time::Duration;

use relay_core::{Message, ServerFrame, StreamRequest};
use relay_store::ConversationStore;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::connection::{ClientConfig, ConnectionEvent, ConnectionManager, ConnectionState};
use crate::pacer::{Finalized, TokenPacer};

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub connection: ClientConfig,
    /// Delay between revealing two characters.
    pub pace_interval: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            connection: ClientConfig::default(),
            pace_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent,
    /// Blank input; nothing was sent.
    Ignored,
    /// A reply is still being streamed or revealed.
    Busy,
    /// The link to the relay is not open.
    Offline,
}

/// What the presentation layer needs to render.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Status(ConnectionState),
    Submitted(SubmitOutcome),
    Reveal(char),
    /// A message was added to the history.
    Committed(Message),
    InputEnabled(bool),
    /// The in-flight reply was lost with the connection.
    ReplyDiscarded,
}

/// Ties the connection, the pacer and the history together for one chat.
pub struct ChatSession {
    connection: ConnectionManager,
    connection_events: mpsc::Receiver<ConnectionEvent>,
    /// Link state as of the last processed connection event.
    link: ConnectionState,
    pacer: TokenPacer,
    store: ConversationStore,
    pace_interval: Duration,
    events: mpsc::Sender<ChatEvent>,
}

impl ChatSession {
    pub fn start(config: ChatConfig, store: ConversationStore) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (connection, connection_events) = ConnectionManager::spawn(config.connection);
        let (events, events_rx) = mpsc::channel(1024);
        let session = Self {
            connection,
            connection_events,
            link: ConnectionState::Connecting,
            pacer: TokenPacer::new(),
            store,
            pace_interval: config.pace_interval,
            events,
        };
        (session, events_rx)
    }

    pub fn history(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link
    }

    pub fn input_enabled(&self) -> bool {
        !self.pacer.is_pending()
    }

    /// Submit one line of user input.
    pub async fn submit(&mut self, raw: &str) -> SubmitOutcome {
        let Some(request) = StreamRequest::from_input(raw) else {
            return self.report(SubmitOutcome::Ignored).await;
        };
        if self.pacer.is_pending() {
            return self.report(SubmitOutcome::Busy).await;
        }
        if self.link != ConnectionState::Open {
            return self.report(SubmitOutcome::Offline).await;
        }
        if let Err(e) = self.connection.send(&request.text).await {
            tracing::debug!(error = %e, "submit refused");
            return self.report(SubmitOutcome::Offline).await;
        }

        self.pacer.begin();
        self.report(SubmitOutcome::Sent).await;
        self.emit(ChatEvent::InputEnabled(false)).await;
        self.commit(Message::user(request.text)).await;
        SubmitOutcome::Sent
    }

    async fn report(&self, outcome: SubmitOutcome) -> SubmitOutcome {
        self.emit(ChatEvent::Submitted(outcome)).await;
        outcome
    }

    /// Drive the session until `shutdown` fires, or until `input` closes and
    /// no reply is left pending.
    pub async fn run(mut self, mut input: mpsc::Receiver<String>, shutdown: CancellationToken) {
        let mut pacing = tokio::time::interval(self.pace_interval);
        pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut input_open = true;

        loop {
            // Queued connection events are applied before the next input line.
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = self.connection_events.recv() => {
                    self.on_connection_event(event).await;
                }
                _ = pacing.tick(), if self.pacer.is_pending() => {
                    self.on_tick().await;
                }
                line = input.recv(), if input_open => match line {
                    Some(line) => {
                        self.submit(&line).await;
                    }
                    None => {
                        tracing::debug!("input closed");
                        input_open = false;
                    }
                },
            }
            if !input_open && !self.pacer.is_pending() {
                break;
            }
        }

        tracing::debug!("chat session stopping");
        self.connection.shutdown().await;
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                self.link = state;
                self.emit(ChatEvent::Status(state)).await;
                let lost = matches!(state, ConnectionState::Closed | ConnectionState::Error);
                if lost && self.pacer.discard() {
                    self.emit(ChatEvent::ReplyDiscarded).await;
                    self.emit(ChatEvent::InputEnabled(true)).await;
                }
            }
            ConnectionEvent::Frame(ServerFrame::Busy) => {
                tracing::warn!("relay reported busy");
            }
            ConnectionEvent::Frame(frame) => {
                if let Some(done) = self.pacer.push(frame) {
                    self.finish(done).await;
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        let tick = self.pacer.tick();
        if let Some(c) = tick.revealed {
            self.emit(ChatEvent::Reveal(c)).await;
        }
        if let Some(done) = tick.finalized {
            self.finish(done).await;
        }
    }

    async fn finish(&mut self, done: Finalized) {
        if let Some(message) = done.message {
            self.commit(message).await;
        }
        self.emit(ChatEvent::InputEnabled(true)).await;
    }

    async fn commit(&mut self, message: Message) {
        if let Err(e) = self.store.append(message.clone()) {
            tracing::warn!(error = %e, "failed to persist message");
        }
        self.emit(ChatEvent::Committed(message)).await;
    }

    async fn emit(&self, event: ChatEvent) {
        // A closed receiver only means nobody is rendering.
        let _ = self.events.send(event).await;
    }
}
