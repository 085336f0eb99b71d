use std::io::{BufRead, Write};

use relay_client::{ChatEvent, SubmitOutcome};
use relay_core::Message;
use tokio::sync::mpsc;

const PROMPT: &str = "you> ";
const REPLY: &str = "ai>  ";

pub fn print_transcript(messages: &[Message]) {
    for message in messages {
        let who = if message.is_from_user { PROMPT } else { REPLY };
        println!("{who}{}", message.text);
    }
}

/// Forward stdin lines until EOF or until the session stops listening.
///
/// Runs on a detached thread: a blocked stdin read must not hold up runtime
/// shutdown after ctrl-c.
pub fn spawn_line_reader(input: mpsc::Sender<String>) {
    std::thread::spawn(move || forward_lines(std::io::stdin().lock(), &input));
}

fn forward_lines(reader: impl BufRead, input: &mpsc::Sender<String>) {
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if input.blocking_send(line).is_err() {
            break;
        }
    }
}

/// Draw chat events on stdout until the session ends.
pub async fn render(mut events: mpsc::Receiver<ChatEvent>) {
    let mut out = std::io::stdout();
    while let Some(event) = events.recv().await {
        // Write failures on a closed terminal are not worth reporting.
        let _ = draw(&mut out, &event);
        let _ = out.flush();
    }
}

fn draw(out: &mut impl Write, event: &ChatEvent) -> std::io::Result<()> {
    match event {
        ChatEvent::Status(state) => writeln!(out, "[{state}]"),
        ChatEvent::Submitted(SubmitOutcome::Sent) => write!(out, "{REPLY}"),
        ChatEvent::Submitted(SubmitOutcome::Busy) => {
            writeln!(out, "[still answering, wait for the reply to finish]")
        }
        ChatEvent::Submitted(SubmitOutcome::Offline) => {
            writeln!(out, "[not connected, try again shortly]")
        }
        ChatEvent::Submitted(SubmitOutcome::Ignored) => Ok(()),
        ChatEvent::Reveal(c) => write!(out, "{c}"),
        ChatEvent::Committed(message) if !message.is_from_user => writeln!(out),
        ChatEvent::Committed(_) => Ok(()),
        ChatEvent::InputEnabled(true) => write!(out, "{PROMPT}"),
        ChatEvent::InputEnabled(false) => Ok(()),
        ChatEvent::ReplyDiscarded => writeln!(out, "\n[reply lost with the connection]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_client::ConnectionState;

    fn drawn(events: &[ChatEvent]) -> String {
        let mut buf = Vec::new();
        for event in events {
            draw(&mut buf, event).unwrap();
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn reply_is_drawn_char_by_char() {
        let text = drawn(&[
            ChatEvent::Submitted(SubmitOutcome::Sent),
            ChatEvent::InputEnabled(false),
            ChatEvent::Committed(Message::user("hello")),
            ChatEvent::Reveal('H'),
            ChatEvent::Reveal('i'),
            ChatEvent::Committed(Message::assistant("Hi")),
            ChatEvent::InputEnabled(true),
        ]);
        assert_eq!(text, "ai>  Hi\nyou> ");
    }

    #[test]
    fn lines_are_forwarded_until_eof() {
        let (tx, mut rx) = mpsc::channel(8);
        forward_lines(std::io::Cursor::new("hello\n\nbye\n"), &tx);
        drop(tx);

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["hello", "", "bye"]);
    }

    #[test]
    fn status_and_rejections() {
        let text = drawn(&[
            ChatEvent::Status(ConnectionState::Open),
            ChatEvent::Submitted(SubmitOutcome::Ignored),
            ChatEvent::Submitted(SubmitOutcome::Offline),
        ]);
        assert_eq!(text, "[open]\n[not connected, try again shortly]\n");
    }
}
