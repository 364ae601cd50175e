use std::collections::HashMap;

use crate::model::Timestamp;

/// Who has polled recently. In-memory only, empty after a restart.
#[derive(Debug, Clone)]
pub struct ListenerRegistry {
    last_seen: HashMap<String, Timestamp>,
    window: f64,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new(30.0)
    }
}

impl ListenerRegistry {
    pub fn new(window_secs: f64) -> Self {
        Self { last_seen: HashMap::new(), window: window_secs }
    }

    pub fn touch(&mut self, listener_id: &str, now: Timestamp) {
        self.last_seen.insert(listener_id.to_string(), now);
    }

    /// Prunes stale entries, then counts what is left.
    pub fn active_count(&mut self, now: Timestamp) -> usize {
        let window = self.window;
        self.last_seen.retain(|_, seen| now - *seen <= window);
        self.last_seen.len()
    }
}
