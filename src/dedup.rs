use std::time::{Duration, Instant};

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(1200);

/// Drops a message identical to the one immediately before it when it
/// arrives within the window. Only the previous message is remembered.
#[derive(Debug)]
pub struct DedupGate {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Default for DedupGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl DedupGate {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn should_suppress_at(&mut self, text: &str, now: Instant) -> bool {
        if let Some((last_text, last_seen)) = &self.last {
            if last_text == text && now.saturating_duration_since(*last_seen) < self.window {
                return true;
            }
        }
        self.last = Some((text.to_string(), now));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_inside_window_are_dropped() {
        let mut gate = DedupGate::default();
        let start = Instant::now();
        assert!(!gate.should_suppress_at("你好", start));
        assert!(gate.should_suppress_at("你好", start + Duration::from_millis(1199)));
    }

    #[test]
    fn repeats_after_window_pass() {
        let mut gate = DedupGate::default();
        let start = Instant::now();
        assert!(!gate.should_suppress_at("你好", start));
        assert!(!gate.should_suppress_at("你好", start + Duration::from_millis(1200)));
    }

    #[test]
    fn only_the_previous_message_counts() {
        let mut gate = DedupGate::default();
        let start = Instant::now();
        assert!(!gate.should_suppress_at("a", start));
        assert!(!gate.should_suppress_at("b", start + Duration::from_millis(10)));
        assert!(!gate.should_suppress_at("a", start + Duration::from_millis(20)));
    }

    #[test]
    fn shorter_window_applies_to_the_remembered_message() {
        let mut gate = DedupGate::default();
        let start = Instant::now();
        assert!(!gate.should_suppress_at("x", start));
        gate.set_window(Duration::from_millis(200));
        assert!(!gate.should_suppress_at("x", start + Duration::from_millis(300)));
    }

    #[test]
    fn suppressed_repeat_does_not_extend_window() {
        let mut gate = DedupGate::default();
        let start = Instant::now();
        assert!(!gate.should_suppress_at("x", start));
        assert!(gate.should_suppress_at("x", start + Duration::from_millis(1000)));
        assert!(!gate.should_suppress_at("x", start + Duration::from_millis(1300)));
    }
}
