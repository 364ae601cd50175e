use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, warn};

use crate::history::History;
use crate::model::{MediaItem, ScheduleEntry, Timestamp};

// --- Track selection ------------------------------------------------------
//
// Priority, first match wins:
//   1) the earliest schedule entry, if it is due
//   2) the manual queue, head first
//   3) shuffle over the library
//
// Stale references (ids no longer in the library) are dropped where they are
// found and selection moves on to the next tier in the same call.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Schedule,
    Queue,
    Shuffle,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub item: MediaItem,
    pub source: Source,
}

pub fn select_next(
    library: &[MediaItem],
    schedule: &mut Vec<ScheduleEntry>,
    queue: &mut VecDeque<String>,
    history: &History,
    now: Timestamp,
    rng: &mut fastrand::Rng,
) -> Option<Selection> {
    if let Some(item) = take_due_schedule(library, schedule, now) {
        return Some(Selection { item, source: Source::Schedule });
    }
    if let Some(item) = pop_queue(library, queue) {
        return Some(Selection { item, source: Source::Queue });
    }
    shuffle_pick(library, history, rng).map(|item| Selection { item, source: Source::Shuffle })
}

fn find<'a>(library: &'a [MediaItem], id: &str) -> Option<&'a MediaItem> {
    library.iter().find(|m| m.id == id)
}

/// Consume the earliest entry if due. A dangling entry is still consumed;
/// it is never retried.
fn take_due_schedule(
    library: &[MediaItem],
    schedule: &mut Vec<ScheduleEntry>,
    now: Timestamp,
) -> Option<MediaItem> {
    schedule.sort_by(|a, b| a.run_at.total_cmp(&b.run_at));
    if schedule.first().map_or(true, |e| e.run_at > now) {
        return None;
    }
    let entry = schedule.remove(0);
    match find(library, &entry.media_id) {
        Some(item) => Some(item.clone()),
        None => {
            warn!(
                entry = %entry.id,
                media_id = %entry.media_id,
                "discarding schedule entry for missing media"
            );
            None
        }
    }
}

fn pop_queue(library: &[MediaItem], queue: &mut VecDeque<String>) -> Option<MediaItem> {
    while let Some(id) = queue.pop_front() {
        if let Some(item) = find(library, &id) {
            return Some(item.clone());
        }
        debug!(media_id = %id, "dropping stale queue entry");
    }
    None
}

fn shuffle_pick(
    library: &[MediaItem],
    history: &History,
    rng: &mut fastrand::Rng,
) -> Option<MediaItem> {
    let pool: Vec<&MediaItem> = library
        .iter()
        .filter(|m| !m.category.is_shuffle_blocked())
        .collect();
    let unplayed: Vec<&MediaItem> = pool
        .iter()
        .copied()
        .filter(|m| !history.contains(&m.id))
        .collect();

    let candidates = if !unplayed.is_empty() {
        unplayed
    } else if !pool.is_empty() {
        pool
    } else {
        library.iter().collect()
    };

    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.usize(..candidates.len())].clone())
}
