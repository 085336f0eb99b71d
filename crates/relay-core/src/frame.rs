/// Marks the end of one reply stream, after success or after an error reply.
pub const SENTINEL: &str = "[END]";

/// Sent in place of fragments when the upstream source fails. Always followed
/// by [`SENTINEL`].
pub const SOURCE_ERROR_TEXT: &str =
    "Sorry, something went wrong while generating a response. Please try again.";

/// Sent when a prompt arrives while another reply is still streaming on the
/// same connection. The rejected prompt gets no sentinel of its own.
pub const BUSY_NOTICE: &str = "[BUSY]";

/// A server→client text frame, classified.
///
/// Ordering contract per request: `Fragment* → End`. `Busy` may appear at any
/// point and never belongs to the in-flight reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerFrame {
    Fragment(String),
    End,
    Busy,
}

impl ServerFrame {
    /// Classify a raw text payload received from the relay.
    pub fn parse(text: &str) -> Self {
        match text {
            SENTINEL => Self::End,
            BUSY_NOTICE => Self::Busy,
            other => Self::Fragment(other.to_owned()),
        }
    }

    /// The text payload carried on the wire.
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Fragment(text) => text,
            Self::End => SENTINEL,
            Self::Busy => BUSY_NOTICE,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_classifies_markers() {
        assert_eq!(ServerFrame::parse("[END]"), ServerFrame::End);
        assert_eq!(ServerFrame::parse("[BUSY]"), ServerFrame::Busy);
        assert_eq!(
            ServerFrame::parse("He"),
            ServerFrame::Fragment("He".into())
        );
    }

    #[test]
    fn markers_are_exact_matches() {
        // Whitespace around a marker makes it ordinary text.
        assert_eq!(
            ServerFrame::parse(" [END]"),
            ServerFrame::Fragment(" [END]".into())
        );
        assert_eq!(
            ServerFrame::parse("[end]"),
            ServerFrame::Fragment("[end]".into())
        );
    }

    #[test]
    fn error_text_is_an_ordinary_fragment() {
        let frame = ServerFrame::parse(SOURCE_ERROR_TEXT);
        assert_eq!(frame, ServerFrame::Fragment(SOURCE_ERROR_TEXT.into()));
        assert!(!frame.is_terminal());
    }

    #[test]
    fn wire_text_matches_parse() {
        for frame in [
            ServerFrame::End,
            ServerFrame::Busy,
            ServerFrame::Fragment("llo".into()),
        ] {
            assert_eq!(ServerFrame::parse(frame.as_wire()), frame);
        }
        assert!(ServerFrame::End.is_terminal());
    }
}
