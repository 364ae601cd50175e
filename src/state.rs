use std::collections::{BTreeSet, VecDeque};

use crate::history::History;
use crate::mirror::MirrorSnapshot;
use crate::model::{CurrentTrack, MediaItem, ScheduleEntry, Timestamp};
use crate::store::StoreSnapshot;

/// Playback phase derived from `current` and `playing`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    Idle,
    Playing { start_time: Timestamp },
}

/// Everything a failed write has to put back.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    store: StoreSnapshot,
    mirror: MirrorSnapshot,
    history: History,
}

/// The one mutable state object. Lives behind `Station`'s mutex; every
/// operation and every scheduler tick works on it under that lock.
#[derive(Debug)]
pub struct RadioState {
    pub library: Vec<MediaItem>,
    pub schedule: Vec<ScheduleEntry>,
    pub tombstones: BTreeSet<String>,
    pub queue: VecDeque<String>,
    pub history: History,
    pub current: Option<CurrentTrack>,
    pub playing: bool,
    /// Bumped on every mutation; snapshots carry it so writers can drop
    /// out-of-order saves.
    pub revision: u64,
    pub rng: fastrand::Rng,
}

impl RadioState {
    pub fn new(store: StoreSnapshot, mirror: MirrorSnapshot, rng: fastrand::Rng) -> Self {
        let mut state = Self {
            library: Vec::new(),
            schedule: Vec::new(),
            tombstones: BTreeSet::new(),
            queue: VecDeque::new(),
            history: History::default(),
            current: None,
            playing: false,
            revision: 0,
            rng,
        };
        state.apply_store(store);
        state.apply_mirror(mirror);
        state
    }

    pub fn phase(&self) -> Phase {
        match &self.current {
            Some(cur) if self.playing => Phase::Playing { start_time: cur.start_time },
            _ => Phase::Idle,
        }
    }

    pub fn find(&self, id: &str) -> Option<&MediaItem> {
        self.library.iter().find(|m| m.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut MediaItem> {
        self.library.iter_mut().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Mark the state as changed and return the new revision.
    pub fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    pub fn apply_store(&mut self, store: StoreSnapshot) {
        self.library = store.library;
        self.schedule = store.schedule;
        self.tombstones = store.deleted_files;
        self.history.trim(self.library.len());
    }

    pub fn apply_mirror(&mut self, mirror: MirrorSnapshot) {
        self.playing = mirror.playing && mirror.current_track.is_some();
        self.current = mirror.current_track;
        self.queue = mirror.queue.into();
    }

    pub fn store_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            library: self.library.clone(),
            schedule: self.schedule.clone(),
            deleted_files: self.tombstones.clone(),
        }
    }

    pub fn mirror_snapshot(&self) -> MirrorSnapshot {
        MirrorSnapshot {
            current_track: self.current.clone(),
            playing: self.playing,
            queue: self.queue.iter().cloned().collect(),
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            store: self.store_snapshot(),
            mirror: self.mirror_snapshot(),
            history: self.history.clone(),
        }
    }

    /// Return to `checkpoint`. The revision is left alone; callers bump it.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.apply_store(checkpoint.store);
        self.apply_mirror(checkpoint.mirror);
        self.history = checkpoint.history;
    }

    /// Take an item out of the library along with every reference to it.
    /// The filename is tombstoned first.
    pub fn remove_media(&mut self, id: &str) -> Option<MediaItem> {
        let idx = self.library.iter().position(|m| m.id == id)?;
        self.tombstones.insert(self.library[idx].filename.clone());
        let removed = self.library.remove(idx);
        self.queue.retain(|q| q != id);
        self.schedule.retain(|s| s.media_id != id);
        self.history.trim(self.library.len());
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use crate::selector::tests::item;

    #[test]
    fn restores_phase_from_the_mirror() {
        let playing = MirrorSnapshot {
            current_track: Some(CurrentTrack::start(item("a", Category::Music, 5.0), 40.0)),
            playing: true,
            queue: vec!["a".into()],
        };
        let state = RadioState::new(StoreSnapshot::default(), playing, fastrand::Rng::with_seed(0));
        assert_eq!(state.phase(), Phase::Playing { start_time: 40.0 });
        assert_eq!(state.queue.len(), 1);

        let inconsistent = MirrorSnapshot { current_track: None, playing: true, queue: vec![] };
        let rng = fastrand::Rng::with_seed(0);
        let state = RadioState::new(StoreSnapshot::default(), inconsistent, rng);
        assert_eq!(state.phase(), Phase::Idle);
        assert!(!state.playing);
    }

    #[test]
    fn remove_media_tombstones_and_drops_references() {
        let store = StoreSnapshot {
            library: vec![item("a", Category::Music, 5.0), item("b", Category::Music, 5.0)],
            schedule: vec![ScheduleEntry { id: "e".into(), media_id: "a".into(), run_at: 1.0 }],
            deleted_files: BTreeSet::new(),
        };
        let queue = vec!["a".into(), "b".into()];
        let mirror = MirrorSnapshot { current_track: None, playing: false, queue };
        let mut state = RadioState::new(store, mirror, fastrand::Rng::with_seed(0));

        let removed = state.remove_media("a").unwrap();
        assert_eq!(removed.filename, "a.mp3");
        assert!(state.tombstones.contains("a.mp3"));
        assert!(state.schedule.is_empty());
        assert_eq!(state.queue, VecDeque::from(vec!["b".to_string()]));
        assert!(state.remove_media("a").is_none());
    }

    #[test]
    fn restore_undoes_a_removal() {
        let store = StoreSnapshot {
            library: vec![item("a", Category::Music, 5.0), item("b", Category::Music, 5.0)],
            ..StoreSnapshot::default()
        };
        let queue = vec!["a".into()];
        let mirror = MirrorSnapshot { current_track: None, playing: false, queue };
        let mut state = RadioState::new(store, mirror, fastrand::Rng::with_seed(0));
        state.history.push("a", 2);

        let checkpoint = state.checkpoint();
        state.remove_media("a");
        state.history.push("b", 1);
        state.restore(checkpoint);

        assert!(state.contains("a"));
        assert!(state.tombstones.is_empty());
        assert_eq!(state.queue, VecDeque::from(vec!["a".to_string()]));
        assert_eq!(state.history.iter().collect::<Vec<_>>(), vec!["a"]);
    }
}
