//! Single-slot cancellation for the in-flight generation stream.

use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A token handed out by [`CancellationSlot::begin_token`].
#[derive(Debug, Clone)]
pub struct SlotToken {
    generation: u64,
    token: CancellationToken,
}

impl SlotToken {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct SlotState {
    next_generation: u64,
    held: Option<SlotToken>,
}

/// Holds at most one live token.
#[derive(Debug, Default)]
pub struct CancellationSlot {
    state: Mutex<SlotState>,
}

impl CancellationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh token, cancelling whatever was held before.
    pub fn begin_token(&self) -> SlotToken {
        let mut state = self.state.lock().expect("cancellation slot poisoned");
        state.next_generation += 1;
        let fresh = SlotToken {
            generation: state.next_generation,
            token: CancellationToken::new(),
        };
        if let Some(previous) = state.held.replace(fresh.clone()) {
            previous.token.cancel();
        }
        fresh
    }

    /// Cancel and clear the held token.
    ///
    /// Returns true if there was one.
    pub fn cancel(&self) -> bool {
        let taken = self
            .state
            .lock()
            .expect("cancellation slot poisoned")
            .held
            .take();
        match taken {
            Some(held) => {
                held.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Clear the slot once a stream ends, unless a newer token replaced it.
    pub fn finish(&self, token: &SlotToken) {
        let mut state = self.state.lock().expect("cancellation slot poisoned");
        if state
            .held
            .as_ref()
            .is_some_and(|held| held.generation == token.generation)
        {
            state.held = None;
        }
    }

    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .expect("cancellation slot poisoned")
            .held
            .is_some()
    }
}
