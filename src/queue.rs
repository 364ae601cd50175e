use std::collections::VecDeque;

use crate::error::{Result, StationError};
use crate::history::History;
use crate::model::{Category, MediaItem};

/// Lookahead depth the queue is topped up to.
pub const TARGET_DEPTH: usize = 10;

// --- Queue top-up ---------------------------------------------------------
//
// The manual queue doubles as the "coming up" list. After every selection
// (and after any operator edit) it is topped up with random `Music` items so
// listeners always see what's next.

#[derive(Debug, Clone)]
pub struct QueueManager {
    target_depth: usize,
    max_attempts: usize,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(TARGET_DEPTH)
    }
}

impl QueueManager {
    pub fn new(target_depth: usize) -> Self {
        Self { target_depth, max_attempts: target_depth * 4 + 4 }
    }

    pub fn target_depth(&self) -> usize {
        self.target_depth
    }

    /// Top the queue up to the target depth. Returns how many ids were added.
    ///
    /// Candidates are `Music` items that are not already queued, not recently
    /// played and not in `exclude`. When that leaves nothing, history is
    /// ignored. When even that is empty the queue stays short.
    pub fn auto_fill(
        &self,
        queue: &mut VecDeque<String>,
        library: &[MediaItem],
        history: &History,
        exclude: &[&str],
        rng: &mut fastrand::Rng,
    ) -> usize {
        let mut added = 0;
        let mut attempts = 0;
        while queue.len() < self.target_depth && attempts < self.max_attempts {
            attempts += 1;

            let eligible = |m: &&MediaItem| {
                m.category == Category::Music
                    && !queue.iter().any(|q| *q == m.id)
                    && !exclude.contains(&m.id.as_str())
            };
            let mut pool: Vec<&MediaItem> = library
                .iter()
                .filter(eligible)
                .filter(|m| !history.contains(&m.id))
                .collect();
            if pool.is_empty() {
                pool = library.iter().filter(eligible).collect();
            }
            if pool.is_empty() {
                break;
            }

            let id = pool[rng.usize(..pool.len())].id.clone();
            queue.push_back(id);
            added += 1;
        }
        added
    }

    /// Put `id` at the head so it plays before anything already queued.
    pub fn insert_next(
        &self,
        queue: &mut VecDeque<String>,
        library: &[MediaItem],
        id: &str,
    ) -> Result<()> {
        if !library.iter().any(|m| m.id == id) {
            return Err(StationError::MediaNotFound(id.to_string()));
        }
        queue.push_front(id.to_string());
        Ok(())
    }

    /// Drop every entry matching `id`, then top up without re-adding it.
    /// Returns the number of entries removed.
    pub fn remove(
        &self,
        queue: &mut VecDeque<String>,
        library: &[MediaItem],
        history: &History,
        id: &str,
        rng: &mut fastrand::Rng,
    ) -> usize {
        let before = queue.len();
        queue.retain(|q| q != id);
        let removed = before - queue.len();
        self.auto_fill(queue, library, history, &[id], rng);
        removed
    }

    /// Replace the queue with `order`, keeping only ids still in the library.
    pub fn reorder(
        &self,
        queue: &mut VecDeque<String>,
        library: &[MediaItem],
        history: &History,
        order: &[String],
        rng: &mut fastrand::Rng,
    ) {
        *queue = order
            .iter()
            .filter(|id| library.iter().any(|m| m.id == **id))
            .cloned()
            .collect();
        self.auto_fill(queue, library, history, &[], rng);
    }
}
