//! Incremental terminal rendering of conversation snapshots.

use localchat_application::{AcquisitionProgress, ConversationSnapshot, LifecycleState, Role};
use std::io::{self, Write};

const MODEL_PREFIX: &str = "model> ";

/// Prints only what changed since the previous snapshot.
///
/// User messages are never echoed; the terminal already shows them. A model
/// message that is still streaming is printed fragment by fragment and the
/// line is closed once the message is final.
#[derive(Debug, Default)]
pub struct Renderer {
    printed: usize,
    partial: Option<String>,
    last_progress: Option<AcquisitionProgress>,
}

impl Renderer {
    pub fn render<W: Write>(&mut self, snapshot: &ConversationSnapshot, out: &mut W) -> io::Result<()> {
        match &snapshot.progress {
            Some(progress) if self.last_progress.as_ref() != Some(progress) => {
                writeln!(out, "[{:>3}%] {}", progress.percent, progress.status_text)?;
                self.last_progress = Some(progress.clone());
            }
            Some(_) => {}
            None => self.last_progress = None,
        }

        let streaming = snapshot.state == LifecycleState::Generating;
        let total = snapshot.messages.len();

        while self.printed < total {
            let message = &snapshot.messages[self.printed];
            if message.role == Role::User {
                self.finish_partial(out)?;
                self.printed += 1;
                continue;
            }

            self.write_partial(&message.content, out)?;
            if streaming && self.printed + 1 == total {
                break;
            }
            self.finish_partial(out)?;
            self.printed += 1;
        }

        out.flush()
    }

    fn write_partial<W: Write>(&mut self, text: &str, out: &mut W) -> io::Result<()> {
        if self.partial.is_none() {
            write!(out, "{}", MODEL_PREFIX)?;
        }
        let shown = self.partial.get_or_insert_with(String::new);

        // The streaming placeholder is whitespace only.
        if text.trim().is_empty() {
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix(shown.as_str()) {
            write!(out, "{}", rest)?;
            *shown = text.to_string();
        }
        Ok(())
    }

    fn finish_partial<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if self.partial.take().is_some() {
            writeln!(out)?;
        }
        Ok(())
    }
}
