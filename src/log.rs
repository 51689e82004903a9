//! Message log collaborator interface.
//!
//! The session renders one line per completed text exchange and otherwise
//! stays out of presentation. Bold markers (`**…**`), bullet markers, and
//! line breaks in peer text are semantic hints a renderer may interpret —
//! the peer tends to answer in concise bullet-pointed form.

use std::io::Write;

/// Who authored a rendered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Peer,
}

impl Speaker {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Peer => "AI",
        }
    }
}

/// Where completed exchanges go. Implemented by the terminal renderer here
/// and by test recorders.
pub trait MessageLog: Send + Sync {
    fn render(&self, speaker: Speaker, text: &str);
}

/// Terminal renderer: strips bold markers, keeps bullets and line
/// structure, indents continuation lines under the speaker label.
pub struct StdoutLog;

impl MessageLog for StdoutLog {
    fn render(&self, speaker: Speaker, text: &str) {
        let mut out = std::io::stdout().lock();
        for (i, line) in text.lines().enumerate() {
            let line = strip_bold(line.trim_end());
            let result = if i == 0 {
                writeln!(out, "{}: {}", speaker.label(), line)
            } else {
                writeln!(out, "     {line}")
            };
            if result.is_err() {
                return;
            }
        }
    }
}

fn strip_bold(line: &str) -> String {
    line.replace("**", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speaker_labels() {
        assert_eq!(Speaker::User.label(), "You");
        assert_eq!(Speaker::Peer.label(), "AI");
    }

    #[test]
    fn bold_markers_are_stripped() {
        assert_eq!(strip_bold("a **bold** word"), "a bold word");
        assert_eq!(strip_bold("- plain bullet"), "- plain bullet");
        assert_eq!(strip_bold("no markers"), "no markers");
    }
}
