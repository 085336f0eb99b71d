use std::collections::VecDeque;

use relay_core::{Message, ServerFrame};

/// Emitted exactly once per reply, when the sentinel has arrived and every
/// received character has been revealed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finalized {
    /// `None` when the reply carried no text at all.
    pub message: Option<Message>,
}

/// Result of one pacing tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tick {
    pub revealed: Option<char>,
    pub finalized: Option<Finalized>,
}

/// The reply currently being streamed and revealed.
#[derive(Debug, Default)]
struct PendingReply {
    accumulated: String,
    display: VecDeque<char>,
    revealed: String,
    ended: bool,
}

impl PendingReply {
    fn is_drained(&self) -> bool {
        self.ended && self.display.is_empty()
    }
}

/// Decouples fragment arrival from display.
///
/// Fragments land in the accumulator and the display queue in one step;
/// each [`tick`](Self::tick) reveals at most one character. Finalization is
/// a state transition, not a poll: it fires from whichever of `push(End)` or
/// `tick()` observes "sentinel received and queue empty" first.
#[derive(Debug, Default)]
pub struct TokenPacer {
    pending: Option<PendingReply>,
}

impl TokenPacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a reply for a request that was just sent. Returns false if one
    /// is already pending.
    pub fn begin(&mut self) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(PendingReply::default());
        true
    }

    /// Whether a reply is in flight. Input stays gated while this is true.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Text revealed so far for the in-flight reply.
    pub fn revealed(&self) -> &str {
        self.pending.as_ref().map_or("", |p| p.revealed.as_str())
    }

    /// Characters received but not yet revealed.
    pub fn backlog(&self) -> usize {
        self.pending.as_ref().map_or(0, |p| p.display.len())
    }

    /// Feed one inbound frame.
    pub fn push(&mut self, frame: ServerFrame) -> Option<Finalized> {
        let Some(pending) = self.pending.as_mut() else {
            tracing::debug!(?frame, "frame with no pending reply, ignoring");
            return None;
        };
        if pending.ended {
            tracing::warn!(?frame, "frame after sentinel, ignoring");
            return None;
        }

        match frame {
            ServerFrame::Fragment(text) => {
                pending.accumulated.push_str(&text);
                pending.display.extend(text.chars());
                None
            }
            ServerFrame::End => {
                pending.ended = true;
                self.finalize_if_drained()
            }
            ServerFrame::Busy => {
                tracing::warn!("relay rejected a request as busy");
                None
            }
        }
    }

    /// Reveal at most one character.
    pub fn tick(&mut self) -> Tick {
        let revealed = self.pending.as_mut().and_then(|pending| {
            let c = pending.display.pop_front()?;
            pending.revealed.push(c);
            Some(c)
        });
        Tick {
            revealed,
            finalized: self.finalize_if_drained(),
        }
    }

    /// Drop the in-flight reply without producing a message. Returns true if
    /// there was one.
    pub fn discard(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                tracing::info!(
                    received = pending.accumulated.len(),
                    ended = pending.ended,
                    "discarding pending reply"
                );
                true
            }
            None => false,
        }
    }

    fn finalize_if_drained(&mut self) -> Option<Finalized> {
        if !self.pending.as_ref().is_some_and(PendingReply::is_drained) {
            return None;
        }
        let pending = self.pending.take()?;
        let message = (!pending.accumulated.is_empty()).then(|| Message::assistant(pending.accumulated));
        Some(Finalized { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::SOURCE_ERROR_TEXT;

    fn fragment(text: &str) -> ServerFrame {
        ServerFrame::Fragment(text.into())
    }

    /// Tick until finalized, collecting revealed characters.
    fn run_out(pacer: &mut TokenPacer) -> (String, Finalized) {
        let mut shown = String::new();
        for _ in 0..10_000 {
            let tick = pacer.tick();
            if let Some(c) = tick.revealed {
                shown.push(c);
            }
            if let Some(done) = tick.finalized {
                return (shown, done);
            }
        }
        panic!("pacer never finalized");
    }

    #[test]
    fn hello_scenario() {
        let mut pacer = TokenPacer::new();
        assert!(pacer.begin());
        for f in ["He", "llo", "!"] {
            assert_eq!(pacer.push(fragment(f)), None);
        }
        assert_eq!(pacer.push(ServerFrame::End), None);
        assert!(pacer.is_pending());

        let (shown, done) = run_out(&mut pacer);
        assert_eq!(shown, "Hello!");
        assert_eq!(done.message, Some(Message::assistant("Hello!")));
        assert!(!pacer.is_pending());
    }

    #[test]
    fn one_character_per_tick() {
        let mut pacer = TokenPacer::new();
        pacer.begin();
        pacer.push(fragment(&"x".repeat(50)));

        let tick = pacer.tick();
        assert_eq!(tick.revealed, Some('x'));
        assert_eq!(pacer.backlog(), 49);
        assert_eq!(pacer.revealed(), "x");
    }

    #[test]
    fn sentinel_waits_for_drain() {
        let mut pacer = TokenPacer::new();
        pacer.begin();
        pacer.push(fragment("ab"));
        pacer.push(ServerFrame::End);

        let first = pacer.tick();
        assert_eq!(first.revealed, Some('a'));
        assert_eq!(first.finalized, None);

        let last = pacer.tick();
        assert_eq!(last.revealed, Some('b'));
        assert_eq!(
            last.finalized,
            Some(Finalized {
                message: Some(Message::assistant("ab"))
            })
        );

        // Exactly once.
        assert_eq!(pacer.tick(), Tick::default());
    }

    #[test]
    fn sentinel_on_drained_queue_finalizes_immediately() {
        let mut pacer = TokenPacer::new();
        pacer.begin();
        pacer.push(fragment("a"));
        assert_eq!(pacer.tick().revealed, Some('a'));

        let done = pacer.push(ServerFrame::End);
        assert_eq!(
            done,
            Some(Finalized {
                message: Some(Message::assistant("a"))
            })
        );
    }

    #[test]
    fn empty_reply_finalizes_without_message() {
        let mut pacer = TokenPacer::new();
        pacer.begin();
        assert_eq!(
            pacer.push(ServerFrame::End),
            Some(Finalized { message: None })
        );
        assert!(!pacer.is_pending());
    }

    #[test]
    fn error_reply_is_committed_as_text() {
        let mut pacer = TokenPacer::new();
        pacer.begin();
        pacer.push(fragment(SOURCE_ERROR_TEXT));
        pacer.push(ServerFrame::End);
        let (shown, done) = run_out(&mut pacer);
        assert_eq!(shown, SOURCE_ERROR_TEXT);
        assert_eq!(done.message, Some(Message::assistant(SOURCE_ERROR_TEXT)));
    }

    #[test]
    fn fragments_interleaved_with_ticks_keep_order() {
        let mut pacer = TokenPacer::new();
        pacer.begin();
        pacer.push(fragment("He"));
        let mut shown = String::new();
        shown.extend(pacer.tick().revealed);
        pacer.push(fragment("llo"));
        shown.extend(pacer.tick().revealed);
        shown.extend(pacer.tick().revealed);
        pacer.push(fragment("!"));
        pacer.push(ServerFrame::End);

        let (rest, done) = run_out(&mut pacer);
        shown.push_str(&rest);
        assert_eq!(shown, "Hello!");
        assert_eq!(done.message, Some(Message::assistant("Hello!")));
    }

    #[test]
    fn multibyte_text_reveals_by_char() {
        let mut pacer = TokenPacer::new();
        pacer.begin();
        pacer.push(fragment("héé"));
        pacer.push(ServerFrame::End);
        let (shown, _) = run_out(&mut pacer);
        assert_eq!(shown, "héé");
    }

    #[test]
    fn busy_notice_leaves_reply_untouched() {
        let mut pacer = TokenPacer::new();
        pacer.begin();
        pacer.push(fragment("a"));
        assert_eq!(pacer.push(ServerFrame::Busy), None);
        pacer.push(ServerFrame::End);
        let (shown, done) = run_out(&mut pacer);
        assert_eq!(shown, "a");
        assert_eq!(done.message, Some(Message::assistant("a")));
    }

    #[test]
    fn discard_drops_partial_reply() {
        let mut pacer = TokenPacer::new();
        pacer.begin();
        pacer.push(fragment("par"));
        pacer.push(fragment("tial"));
        pacer.tick();

        assert!(pacer.discard());
        assert!(!pacer.is_pending());
        assert_eq!(pacer.tick(), Tick::default());
        assert!(!pacer.discard());
    }

    #[test]
    fn frames_without_pending_reply_are_ignored() {
        let mut pacer = TokenPacer::new();
        assert_eq!(pacer.push(fragment("stray")), None);
        assert_eq!(pacer.push(ServerFrame::End), None);
        assert!(!pacer.is_pending());
    }

    #[test]
    fn begin_is_refused_while_pending() {
        let mut pacer = TokenPacer::new();
        assert!(pacer.begin());
        assert!(!pacer.begin());
    }
}
