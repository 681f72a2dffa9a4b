use crate::constants::{
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, SIMULATED_DELAY, SIMULATED_REPLY, SYSTEM_PROMPT,
};
use std::time::Duration;

/// Per-session tuning for the chat controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Instruction placed ahead of the history in every prompt.
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub simulated_delay: Duration,
    pub simulated_reply: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            simulated_delay: SIMULATED_DELAY,
            simulated_reply: SIMULATED_REPLY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.system_prompt, "You are a helpful assistant.");
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.simulated_delay, Duration::from_secs(1));
    }
}
