use std::collections::VecDeque;

/// Recently played ids, oldest first.
///
/// Only used to steer shuffle and auto-fill away from repeats. The bound
/// follows the library size: `max(10, library_len - 5)`.
#[derive(Debug, Clone, Default)]
pub struct History {
    ids: VecDeque<String>,
}

impl History {
    pub fn capacity_for(library_len: usize) -> usize {
        library_len.saturating_sub(5).max(10)
    }

    pub fn push(&mut self, id: impl Into<String>, library_len: usize) {
        self.ids.push_back(id.into());
        self.trim(library_len);
    }

    /// Evict from the front until the bound for `library_len` holds.
    pub fn trim(&mut self, library_len: usize) {
        let cap = Self::capacity_for(library_len);
        while self.ids.len() > cap {
            self.ids.pop_front();
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|h| h == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}
