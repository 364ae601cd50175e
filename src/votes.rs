use std::path::PathBuf;

use crate::model::{Timestamp, Vote};
use crate::store::{read_json_or_default, write_json_durable, FileLock};

/// Listener ratings, one live vote per (track, listener).
///
/// Blocking; the station calls into it from spawn_blocking. Writers in every
/// process serialize on `<votes file>.lock`.
#[derive(Debug)]
pub struct VoteStore {
    path: PathBuf,
    lock_path: PathBuf,
    retention_secs: f64,
}

impl VoteStore {
    pub fn new(path: impl Into<PathBuf>, retention_secs: f64) -> Self {
        let path = path.into();
        let lock_path = FileLock::sibling_of(&path);
        Self { path, lock_path, retention_secs }
    }

    /// Insert or replace the vote, pruning anything past retention.
    pub fn record(&self, vote: Vote) -> anyhow::Result<()> {
        let _lock = FileLock::exclusive(&self.lock_path)?;
        let now = vote.timestamp;
        let mut votes: Vec<Vote> = read_json_or_default(&self.path);
        votes.retain(|v| {
            now - v.timestamp <= self.retention_secs
                && !(v.track_id == vote.track_id && v.listener_id == vote.listener_id)
        });
        votes.push(vote);
        write_json_durable(&self.path, &votes)?;
        Ok(())
    }

    pub fn user_vote(&self, track_id: &str, listener_id: &str, now: Timestamp) -> Option<u8> {
        let votes: Vec<Vote> = read_json_or_default(&self.path);
        votes
            .iter()
            .filter(|v| now - v.timestamp <= self.retention_secs)
            .find(|v| v.track_id == track_id && v.listener_id == listener_id)
            .map(|v| v.rating)
    }

    pub fn all(&self) -> Vec<Vote> {
        read_json_or_default(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::temp_path;

    const DAY: f64 = 86_400.0;

    fn vote(track: &str, listener: &str, rating: u8, at: f64) -> Vote {
        Vote { track_id: track.into(), listener_id: listener.into(), rating, timestamp: at }
    }

    #[test]
    fn revote_replaces_previous_rating() {
        let store = VoteStore::new(temp_path("votes.json"), 90.0 * DAY);
        store.record(vote("t1", "l1", 2, 100.0)).unwrap();
        store.record(vote("t1", "l2", 5, 101.0)).unwrap();
        store.record(vote("t1", "l1", 4, 102.0)).unwrap();

        assert_eq!(store.all().len(), 2);
        assert_eq!(store.user_vote("t1", "l1", 103.0), Some(4));
        assert_eq!(store.user_vote("t1", "l3", 103.0), None);
    }

    #[test]
    fn old_votes_expire() {
        let store = VoteStore::new(temp_path("votes.json"), 90.0 * DAY);
        store.record(vote("t1", "l1", 3, 0.0)).unwrap();
        assert_eq!(store.user_vote("t1", "l1", 91.0 * DAY), None);

        store.record(vote("t2", "l1", 5, 91.0 * DAY)).unwrap();
        let all = store.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].track_id, "t2");
    }

    #[test]
    fn concurrent_writers_lose_no_votes() {
        let path = temp_path("votes.json");
        let writers: Vec<_> = (0..2)
            .map(|w| {
                let path = path.clone();
                std::thread::spawn(move || {
                    // Separate handles, as two server processes would have.
                    let store = VoteStore::new(path, 90.0 * DAY);
                    for i in 0..20 {
                        store.record(vote("t1", &format!("l{w}-{i}"), 3, 100.0)).unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        let store = VoteStore::new(&path, 90.0 * DAY);
        assert_eq!(store.all().len(), 40);
        assert_eq!(store.user_vote("t1", "l1-19", 101.0), Some(3));
    }
}
