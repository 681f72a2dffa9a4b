//! Stdin handling: the consent prompt and REPL commands share one line reader.

use async_trait::async_trait;
use localchat_application::{ConsentDecision, ConsentPrompt};
use localchat_models::ModelSpec;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

pub type InputLines = Arc<Mutex<Lines<BufReader<Stdin>>>>;

pub fn stdin_lines() -> InputLines {
    Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Say(&'a str),
    Stop,
    Download,
    Quit,
    Empty,
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        match line.trim() {
            "" => Command::Empty,
            "/stop" => Command::Stop,
            "/download" => Command::Download,
            "/quit" | "/exit" => Command::Quit,
            text => Command::Say(text),
        }
    }
}

/// Anything but an explicit yes is a decline.
pub fn parse_consent(answer: &str) -> ConsentDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ConsentDecision::Accept,
        _ => ConsentDecision::Decline,
    }
}

pub struct TerminalConsent {
    input: InputLines,
}

impl TerminalConsent {
    pub fn new(input: InputLines) -> Self {
        Self { input }
    }
}

#[async_trait]
impl ConsentPrompt for TerminalConsent {
    async fn ask(&self, model: &ModelSpec) -> ConsentDecision {
        print!(
            "Do you want to download offline mode ({})? [y/N] ",
            model.size_text
        );
        if std::io::stdout().flush().is_err() {
            return ConsentDecision::Unavailable;
        }

        let mut input = self.input.lock().await;
        match input.next_line().await {
            Ok(Some(answer)) => parse_consent(&answer),
            Ok(None) => ConsentDecision::Unavailable,
            Err(e) => {
                tracing::warn!("Could not read consent answer: {}", e);
                ConsentDecision::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("  hello  "), Command::Say("hello"));
        assert_eq!(Command::parse("/stop"), Command::Stop);
        assert_eq!(Command::parse("/download\n"), Command::Download);
        assert_eq!(Command::parse("/exit"), Command::Quit);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn test_consent_defaults_to_decline() {
        assert_eq!(parse_consent("Y"), ConsentDecision::Accept);
        assert_eq!(parse_consent(" yes "), ConsentDecision::Accept);
        assert_eq!(parse_consent(""), ConsentDecision::Decline);
        assert_eq!(parse_consent("nope"), ConsentDecision::Decline);
    }
}
