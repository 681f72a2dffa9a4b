use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Degraded responder used when no engine is available.
#[derive(Debug, Clone)]
pub struct SimulatedResponder {
    delay: Duration,
    reply: String,
}

impl SimulatedResponder {
    pub fn new(delay: Duration, reply: impl Into<String>) -> Self {
        Self {
            delay,
            reply: reply.into(),
        }
    }

    /// Wait out the delay and return the canned reply, or `None` if
    /// `teardown` fires first.
    pub async fn respond(&self, teardown: &CancellationToken) -> Option<String> {
        tokio::select! {
            _ = teardown.cancelled() => None,
            _ = tokio::time::sleep(self.delay) => Some(self.reply.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_replies_after_delay() {
        let responder = SimulatedResponder::new(Duration::from_secs(1), "canned");
        let start = tokio::time::Instant::now();
        let reply = responder.respond(&CancellationToken::new()).await;
        assert_eq!(reply.as_deref(), Some("canned"));
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_suppresses_reply() {
        let responder = SimulatedResponder::new(Duration::from_secs(1), "canned");
        let teardown = CancellationToken::new();
        teardown.cancel();
        assert_eq!(responder.respond(&teardown).await, None);
    }
}
