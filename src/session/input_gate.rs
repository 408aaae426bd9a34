//! Duplicate Enter suppression for interactive input
//!
//! Some input methods deliver the same Enter twice in quick succession.
//! An Enter is dropped only when the input right before it was also an
//! Enter, sent inside the window. Everything else always passes.

use std::time::Duration;

use tokio::time::Instant;

const ENTER: &str = "\n";

#[derive(Debug)]
pub struct InputGate {
    window: Duration,
    /// Previous admitted input and when it was sent
    last: Option<(String, Instant)>,
}

impl InputGate {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Whether `text` should be sent; every admitted input is recorded
    pub fn admit(&mut self, text: &str) -> bool {
        let now = Instant::now();
        if text == ENTER {
            if let Some((previous, at)) = &self.last {
                if previous == ENTER && now.duration_since(*at) < self.window {
                    return false;
                }
            }
        }
        self.last = Some((text.to_string(), now));
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rapid_enter_is_dropped() {
        let mut gate = InputGate::new(Duration::from_millis(150));

        assert!(gate.admit("\n"));
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!gate.admit("\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_after_window_passes() {
        let mut gate = InputGate::new(Duration::from_millis(150));

        assert!(gate.admit("\n"));
        tokio::time::advance(Duration::from_millis(151)).await;
        assert!(gate.admit("\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_input_never_dropped() {
        let mut gate = InputGate::new(Duration::from_millis(150));

        assert!(gate.admit("\n"));
        assert!(gate.admit("ls"));
        assert!(gate.admit("\n\n"));
        assert!(gate.admit("\r\n"));
        assert!(gate.admit("\u{3}"));
        assert!(gate.admit("ls"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_after_other_key_passes() {
        let mut gate = InputGate::new(Duration::from_millis(150));

        assert!(gate.admit("\n"));
        assert!(gate.admit("y"));
        assert!(gate.admit("\n"));
        // only now is the previous input an Enter
        assert!(!gate.admit("\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_enter_does_not_extend_window() {
        let mut gate = InputGate::new(Duration::from_millis(150));

        assert!(gate.admit("\n"));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!gate.admit("\n"));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(gate.admit("\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forgets_last_enter() {
        let mut gate = InputGate::new(Duration::from_millis(150));

        assert!(gate.admit("\n"));
        gate.reset();
        assert!(gate.admit("\n"));
    }
}
