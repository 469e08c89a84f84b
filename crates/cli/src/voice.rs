//! Console "speech": replies are printed instead of synthesized.
//!
//! With streaming, reply text is printed as the engine produces it. The
//! voice then skips the same reply when the runtime speaks it.

use async_trait::async_trait;
use hearth_agent::ReplySink;
use hearth_core::error::SpeechError;
use hearth_core::ids::EventId;
use hearth_core::speech::SpeechSynthesizer;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

const PREFIX: &str = "  Hearth > ";
const SHOWN_CAPACITY: usize = 8;

#[derive(Default)]
struct Shown {
    /// Trigger whose reply line is currently open
    open: Option<EventId>,
    replies: VecDeque<String>,
}

impl Shown {
    fn remember(&mut self, reply: &str) {
        if self.replies.len() == SHOWN_CAPACITY {
            self.replies.pop_front();
        }
        self.replies.push_back(reply.to_string());
    }

    /// True once per streamed copy of `text`.
    fn take(&mut self, text: &str) -> bool {
        match self.replies.iter().position(|r| r == text) {
            Some(i) => {
                self.replies.remove(i);
                true
            }
            None => false,
        }
    }
}

/// A voice and a reply stream that share what was already printed.
pub fn console() -> (ConsoleVoice, ConsoleStream) {
    let shown = Arc::new(Mutex::new(Shown::default()));
    (
        ConsoleVoice {
            shown: shown.clone(),
        },
        ConsoleStream { shown },
    )
}

pub struct ConsoleVoice {
    shown: Arc<Mutex<Shown>>,
}

#[async_trait]
impl SpeechSynthesizer for ConsoleVoice {
    fn name(&self) -> &str {
        "console"
    }

    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let streamed = self
            .shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take(text);
        if !streamed {
            println!("{PREFIX}{text}");
        }
        Ok(())
    }
}

pub struct ConsoleStream {
    shown: Arc<Mutex<Shown>>,
}

impl ReplySink for ConsoleStream {
    fn chunk(&self, trigger: EventId, text: &str) {
        let mut shown = self.shown.lock().unwrap_or_else(|p| p.into_inner());
        let mut out = std::io::stdout().lock();
        if shown.open != Some(trigger) {
            if shown.open.is_some() {
                let _ = writeln!(out);
            }
            let _ = write!(out, "{PREFIX}");
            shown.open = Some(trigger);
        }
        let _ = write!(out, "{text}");
        let _ = out.flush();
    }

    fn finish(&self, trigger: EventId, reply: Option<&str>) {
        let mut shown = self.shown.lock().unwrap_or_else(|p| p.into_inner());
        if shown.open != Some(trigger) {
            return;
        }
        shown.open = None;
        println!();
        if let Some(reply) = reply {
            shown.remember(reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streamed_reply_is_not_printed_twice() {
        let (voice, stream) = console();
        let trigger = EventId::new();

        stream.chunk(trigger, "Lights ");
        stream.chunk(trigger, "on.");
        stream.finish(trigger, Some("Lights on."));
        assert_eq!(voice.shown.lock().unwrap().replies, ["Lights on."]);

        voice.speak("Lights on.").await.unwrap();
        assert!(voice.shown.lock().unwrap().replies.is_empty());
    }

    #[tokio::test]
    async fn unstreamed_turns_leave_nothing_behind() {
        let (voice, stream) = console();
        stream.finish(EventId::new(), Some("Hello."));
        assert!(voice.shown.lock().unwrap().replies.is_empty());
        assert!(voice.shown.lock().unwrap().open.is_none());
        voice.speak("Hello.").await.unwrap();
    }

    #[test]
    fn shown_replies_are_bounded() {
        let mut shown = Shown::default();
        for i in 0..20 {
            shown.remember(&format!("reply {i}"));
        }
        assert_eq!(shown.replies.len(), SHOWN_CAPACITY);
        assert!(shown.take("reply 19"));
        assert!(!shown.take("reply 0"));
    }
}
