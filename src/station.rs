use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Result, StationError};
use crate::listeners::ListenerRegistry;
use crate::mirror::{MirrorSnapshot, VolatileMirror};
use crate::model::{
    now_ts, Category, MediaItem, QueueView, ScheduleEntry, StatusResponse, Timestamp, Vote,
};
use crate::queue::QueueManager;
use crate::state::RadioState;
use crate::store::{FileLock, PersistedStore, StoreSnapshot};
use crate::votes::VoteStore;

// --- Station ----------------------------------------------------------------
//
// Owns the shared state and its single lock. API handlers and the scheduler
// loop both come through here. The state lock is held only for in-memory
// work; snapshots are taken under it and written after it is released.
//
// Mutations are serialized by a write lock: an in-process gate plus flock
// on `<data_file>.lock` for sibling processes. Under it a mutation first
// absorbs foreign writes, so it never saves a stale view, and a failed save
// puts the in-memory state back.

/// Which files a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Touched {
    Store,
    Mirror,
    Both,
}

/// A snapshot waiting to be written.
pub(crate) struct Persist {
    revision: u64,
    store: Option<StoreSnapshot>,
    mirror: Option<MirrorSnapshot>,
}

impl Persist {
    pub(crate) fn of(st: &RadioState, touched: Touched) -> Self {
        let store = matches!(touched, Touched::Store | Touched::Both);
        let mirror = matches!(touched, Touched::Mirror | Touched::Both);
        Self {
            revision: st.revision,
            store: store.then(|| st.store_snapshot()),
            mirror: mirror.then(|| st.mirror_snapshot()),
        }
    }
}

/// Held for the duration of one mutation.
pub(crate) struct WriteGuard<'a> {
    _file: FileLock,
    _gate: MutexGuard<'a, ()>,
}

/// Fields for a new library item.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMedia {
    pub title: String,
    pub filename: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub art: Option<String>,
}

/// Partial edit of a library item. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaUpdate {
    pub title: Option<String>,
    pub category: Option<Category>,
    pub duration: Option<f64>,
    pub art: Option<String>,
    pub eq: Option<String>,
}

pub struct Station {
    pub(crate) config: EngineConfig,
    pub(crate) state: Mutex<RadioState>,
    pub(crate) store: Arc<PersistedStore>,
    pub(crate) mirror: Arc<VolatileMirror>,
    pub(crate) votes: Arc<VoteStore>,
    pub(crate) listeners: Mutex<ListenerRegistry>,
    pub(crate) queue: QueueManager,
    write_gate: Mutex<()>,
    write_lock_path: PathBuf,
}

impl Station {
    /// Load persisted and volatile state and build the station.
    pub async fn open(config: EngineConfig) -> anyhow::Result<Arc<Self>> {
        let store = Arc::new(PersistedStore::new(&config.data_file));
        let mirror = Arc::new(VolatileMirror::new(&config.state_file));

        let (s, m) = (store.clone(), mirror.clone());
        let (snapshot, volatile) =
            tokio::task::spawn_blocking(move || (s.load(), m.load_state())).await?;

        info!(
            items = snapshot.library.len(),
            scheduled = snapshot.schedule.len(),
            tombstones = snapshot.deleted_files.len(),
            "loaded {}",
            store.path().display()
        );
        if let Some(cur) = &volatile.current_track {
            info!(id = %cur.item.id, title = %cur.item.title, "restored on-air track");
        }

        let votes = Arc::new(VoteStore::new(
            &config.votes_file,
            config.vote_retention.as_secs_f64(),
        ));
        let listeners = ListenerRegistry::new(config.listener_window.as_secs_f64());
        let queue = QueueManager::new(config.queue_depth);

        Ok(Arc::new(Self {
            state: Mutex::new(RadioState::new(snapshot, volatile, fastrand::Rng::new())),
            store,
            mirror,
            votes,
            listeners: Mutex::new(listeners),
            queue,
            write_gate: Mutex::new(()),
            write_lock_path: FileLock::sibling_of(&config.data_file),
            config,
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Direct access to the shared state, for embedding and tests.
    pub async fn lock(&self) -> MutexGuard<'_, RadioState> {
        self.state.lock().await
    }

    /// Exclusive right to change state and files, against this process and
    /// its siblings.
    pub(crate) async fn write_lock(&self) -> anyhow::Result<WriteGuard<'_>> {
        let gate = self.write_gate.lock().await;
        let path = self.write_lock_path.clone();
        let file = tokio::task::spawn_blocking(move || FileLock::exclusive(&path)).await??;
        Ok(WriteGuard { _file: file, _gate: gate })
    }

    /// Write a snapshot.
    pub(crate) async fn persist(&self, p: Persist) -> anyhow::Result<()> {
        let store = self.store.clone();
        let mirror = self.mirror.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if let Some(s) = &p.store {
                store.save(s, p.revision)?;
            }
            if let Some(m) = &p.mirror {
                mirror.save_state(m, p.revision)?;
            }
            Ok(())
        })
        .await?
    }

    /// Absorb writes made by other processes. The persisted store is applied
    /// before the mirror, so the store decides what exists and the mirror
    /// decides what is on air and queued.
    pub async fn sync_from_disk(&self) -> anyhow::Result<bool> {
        let _gate = self.write_gate.lock().await;
        self.absorb_foreign().await
    }

    /// `sync_from_disk` for callers already holding the write lock.
    pub(crate) async fn absorb_foreign(&self) -> anyhow::Result<bool> {
        let store = self.store.clone();
        let mirror = self.mirror.clone();
        let (s, m) = tokio::task::spawn_blocking(move || {
            let s = store.changed_externally().then(|| store.load());
            let m = mirror.changed_externally().then(|| mirror.load_state());
            (s, m)
        })
        .await?;

        if s.is_none() && m.is_none() {
            return Ok(false);
        }

        let mut st = self.state.lock().await;
        if let Some(s) = s {
            info!(items = s.library.len(), "persisted store changed on disk, reloading");
            st.apply_store(s);
        }
        if let Some(m) = m {
            debug!(
                queued = m.queue.len(),
                playing = m.playing,
                "absorbing playback state from disk"
            );
            st.apply_mirror(m);
        }
        st.bump();
        Ok(true)
    }

    /// Run one mutation end to end. `op` must validate before it changes
    /// anything; an `Err` from it is returned as is.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut RadioState) -> Result<(T, Touched)>,
    ) -> Result<T> {
        let _write = self.write_lock().await?;
        self.absorb_foreign().await?;

        let (value, touched, checkpoint, persist) = {
            let mut guard = self.state.lock().await;
            let st = &mut *guard;
            let checkpoint = st.checkpoint();
            let (value, touched) = op(st)?;
            st.bump();
            (value, touched, checkpoint, Persist::of(st, touched))
        };

        if let Err(e) = self.persist(persist).await {
            let undo = {
                let mut st = self.state.lock().await;
                st.restore(checkpoint);
                st.bump();
                Persist::of(&st, touched)
            };
            // Undo whichever file did land before the failure.
            if let Err(undo_err) = self.persist(undo).await {
                debug!("rollback write failed as well: {undo_err:#}");
            }
            return Err(StationError::Storage(e));
        }
        Ok(value)
    }

    pub(crate) async fn delete_media_files(&self, filenames: Vec<String>) {
        let dir = self.config.media_dir.clone();
        let res = tokio::task::spawn_blocking(move || {
            for name in filenames {
                let path: PathBuf = dir.join(&name);
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!("deleted {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("failed to delete {}: {e}", path.display()),
                }
            }
        })
        .await;
        if let Err(e) = res {
            warn!("failed to join media delete task: {e}");
        }
    }

    // --- Library ------------------------------------------------------------

    pub async fn library(&self) -> Vec<MediaItem> {
        self.state.lock().await.library.clone()
    }

    pub async fn add_item(&self, new: NewMedia) -> Result<MediaItem> {
        let filename = new.filename.trim().to_string();
        if filename.is_empty() {
            return Err(StationError::InvalidInput("filename is required".into()));
        }
        if !new.duration.is_finite() || new.duration < 0.0 {
            return Err(StationError::InvalidInput("duration must be a non-negative number".into()));
        }
        let now = now_ts();

        let item = self
            .mutate(|st| {
                if st.tombstones.contains(&filename) {
                    return Err(StationError::Tombstoned(filename));
                }
                let title = match new.title.trim() {
                    "" => filename.clone(),
                    t => t.to_string(),
                };
                let item = MediaItem {
                    id: next_media_id(st, now),
                    title,
                    filename,
                    duration: new.duration,
                    category: new.category,
                    art: new.art,
                    eq: None,
                    added_at: Some(now),
                    last_played_at: None,
                };
                st.library.push(item.clone());
                Ok((item, Touched::Store))
            })
            .await?;

        info!(id = %item.id, title = %item.title, category = item.category.as_str(), "added media");
        Ok(item)
    }

    /// Remove an item, tombstone its filename and delete the backing file.
    pub async fn remove_item(&self, id: &str) -> Result<MediaItem> {
        let removed = self
            .mutate(|st| {
                let removed = st
                    .remove_media(id)
                    .ok_or_else(|| StationError::MediaNotFound(id.to_string()))?;
                Ok((removed, Touched::Both))
            })
            .await?;
        self.delete_media_files(vec![removed.filename.clone()]).await;

        info!(id = %removed.id, title = %removed.title, "removed media");
        Ok(removed)
    }

    /// Edit an item. Title, art and EQ changes also reach the on-air copy.
    pub async fn update_item(&self, id: &str, update: MediaUpdate) -> Result<MediaItem> {
        if let Some(d) = update.duration {
            if !d.is_finite() || d < 0.0 {
                let msg = "duration must be a non-negative number";
                return Err(StationError::InvalidInput(msg.into()));
            }
        }
        if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(StationError::InvalidInput("title cannot be empty".into()));
        }

        self.mutate(|st| {
            let item = st
                .find_mut(id)
                .ok_or_else(|| StationError::MediaNotFound(id.to_string()))?;
            if let Some(title) = update.title {
                item.title = title.trim().to_string();
            }
            if let Some(category) = update.category {
                item.category = category;
            }
            if let Some(duration) = update.duration {
                item.duration = duration;
            }
            if let Some(art) = update.art {
                item.art = Some(art);
            }
            if let Some(eq) = update.eq {
                item.eq = Some(eq);
            }
            let item = item.clone();

            if let Some(cur) = st.current.as_mut().filter(|c| c.item.id == item.id) {
                cur.item.title = item.title.clone();
                cur.item.art = item.art.clone();
                cur.item.eq = item.eq.clone();
            }
            Ok((item, Touched::Both))
        })
        .await
    }

    // --- Queue --------------------------------------------------------------

    /// Queue `id` to play next, ahead of anything already queued.
    pub async fn enqueue(&self, id: &str) -> Result<()> {
        self.mutate(|st| {
            self.queue.insert_next(&mut st.queue, &st.library, id)?;
            Ok(((), Touched::Mirror))
        })
        .await?;
        info!(id, "queued next");
        Ok(())
    }

    /// Drop every queue entry for `id`. Returns how many were removed.
    pub async fn dequeue(&self, id: &str) -> Result<usize> {
        self.mutate(|st| {
            if !st.contains(id) && !st.queue.iter().any(|q| q == id) {
                return Err(StationError::MediaNotFound(id.to_string()));
            }
            let removed =
                self.queue.remove(&mut st.queue, &st.library, &st.history, id, &mut st.rng);
            Ok((removed, Touched::Mirror))
        })
        .await
    }

    pub async fn reorder_queue(&self, order: Vec<String>) -> Result<Vec<String>> {
        self.mutate(|st| {
            self.queue.reorder(&mut st.queue, &st.library, &st.history, &order, &mut st.rng);
            Ok((st.queue.iter().cloned().collect(), Touched::Mirror))
        })
        .await
    }

    pub async fn clear_queue(&self) -> Result<()> {
        self.mutate(|st| {
            st.queue.clear();
            Ok(((), Touched::Mirror))
        })
        .await?;
        warn!("queue cleared");
        Ok(())
    }

    // --- Schedule -----------------------------------------------------------

    pub async fn schedule(&self) -> Vec<ScheduleEntry> {
        let mut entries = self.state.lock().await.schedule.clone();
        entries.sort_by(|a, b| a.run_at.total_cmp(&b.run_at));
        entries
    }

    pub async fn add_schedule_entry(
        &self,
        media_id: &str,
        run_at: Timestamp,
    ) -> Result<ScheduleEntry> {
        if !run_at.is_finite() {
            return Err(StationError::InvalidRunAt(run_at.to_string()));
        }
        let entry = self
            .mutate(|st| {
                if !st.contains(media_id) {
                    return Err(StationError::MediaNotFound(media_id.to_string()));
                }
                let entry = ScheduleEntry {
                    id: uuid::Uuid::new_v4().to_string(),
                    media_id: media_id.to_string(),
                    run_at,
                };
                st.schedule.push(entry.clone());
                Ok((entry, Touched::Store))
            })
            .await?;

        info!(entry = %entry.id, media_id, run_at, "scheduled");
        Ok(entry)
    }

    pub async fn remove_schedule_entry(&self, id: &str) -> Result<ScheduleEntry> {
        self.mutate(|st| {
            let idx = st
                .schedule
                .iter()
                .position(|e| e.id == id)
                .ok_or_else(|| StationError::ScheduleEntryNotFound(id.to_string()))?;
            Ok((st.schedule.remove(idx), Touched::Store))
        })
        .await
    }

    // --- Votes & listeners --------------------------------------------------

    pub async fn record_vote(
        &self,
        track_id: &str,
        listener_id: &str,
        rating: i64,
    ) -> Result<Vote> {
        if !(1..=5).contains(&rating) {
            return Err(StationError::InvalidRating(rating));
        }
        let listener_id = listener_id.trim();
        if listener_id.is_empty() {
            return Err(StationError::MissingListener);
        }
        self.sync_from_disk().await?;
        {
            let st = self.state.lock().await;
            let on_air = st.current.as_ref().is_some_and(|c| c.item.id == track_id);
            if !on_air && !st.contains(track_id) {
                return Err(StationError::MediaNotFound(track_id.to_string()));
            }
        }

        let vote = Vote {
            track_id: track_id.to_string(),
            listener_id: listener_id.to_string(),
            rating: rating as u8,
            timestamp: now_ts(),
        };
        let votes = self.votes.clone();
        let stored = vote.clone();
        tokio::task::spawn_blocking(move || votes.record(stored))
            .await
            .map_err(|e| anyhow::anyhow!(e))??;
        Ok(vote)
    }

    pub async fn heartbeat(&self, listener_id: &str) -> Result<usize> {
        let listener_id = listener_id.trim();
        if listener_id.is_empty() {
            return Err(StationError::MissingListener);
        }
        let now = now_ts();
        let mut reg = self.listeners.lock().await;
        reg.touch(listener_id, now);
        Ok(reg.active_count(now))
    }

    // --- Transport ----------------------------------------------------------

    /// Take the current track off air. The scheduler picks a replacement on
    /// its next tick; calling this twice before then is the same as once.
    pub async fn skip(&self) -> Result<()> {
        self.mutate(|st| {
            if let Some(cur) = &st.current {
                info!(id = %cur.item.id, title = %cur.item.title, "skipping");
            }
            st.current = None;
            st.playing = false;
            Ok(((), Touched::Mirror))
        })
        .await
    }

    /// Emergency reset: empty the queue and take the current track off air.
    pub async fn force_next(&self) -> Result<()> {
        self.mutate(|st| {
            st.queue.clear();
            st.current = None;
            st.playing = false;
            Ok(((), Touched::Mirror))
        })
        .await?;
        warn!("forced next: queue cleared and current track dropped");
        Ok(())
    }

    // --- Status -------------------------------------------------------------

    pub async fn status(&self, listener_id: Option<&str>) -> StatusResponse {
        if let Err(e) = self.sync_from_disk().await {
            warn!("failed to refresh state from disk: {e:#}");
        }
        let now = now_ts();

        let (current, playing, queue) = {
            let st = self.state.lock().await;
            let queue: Vec<QueueView> = st
                .queue
                .iter()
                .filter_map(|id| st.find(id))
                .map(|m| QueueView {
                    id: m.id.clone(),
                    title: m.title.clone(),
                    category: m.category.clone(),
                })
                .collect();
            (st.current.clone(), st.playing, queue)
        };

        let listener_id = listener_id.map(str::trim).filter(|l| !l.is_empty());
        let listeners = {
            let mut reg = self.listeners.lock().await;
            if let Some(l) = listener_id {
                reg.touch(l, now);
            }
            reg.active_count(now)
        };

        let user_vote = match (listener_id, &current) {
            (Some(l), Some(cur)) => {
                let votes = self.votes.clone();
                let (track, listener) = (cur.item.id.clone(), l.to_string());
                tokio::task::spawn_blocking(move || votes.user_vote(&track, &listener, now))
                    .await
                    .unwrap_or_default()
            }
            _ => None,
        };

        StatusResponse {
            playing,
            elapsed: current.as_ref().map_or(0.0, |c| c.elapsed(now).max(0.0)),
            current_track: current.map(|c| c.item),
            listeners,
            queue,
            user_vote,
            server_time: now,
        }
    }
}

/// Millisecond clock plus a random suffix, retried until unused.
fn next_media_id(st: &mut RadioState, now: Timestamp) -> String {
    let millis = (now * 1000.0) as u64;
    loop {
        let id = format!("{millis}{:03}", st.rng.u32(..1000));
        if !st.contains(&id) {
            return id;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::tests::temp_path;

    pub(crate) fn test_config() -> EngineConfig {
        let root = temp_path("station");
        EngineConfig {
            data_file: root.join("data.json"),
            state_file: root.join("radio_state.json"),
            votes_file: root.join("votes.json"),
            lease_file: root.join("scheduler.lease"),
            media_dir: root.join("media"),
            ..EngineConfig::default()
        }
    }

    pub(crate) fn music(title: &str, duration: f64) -> NewMedia {
        NewMedia {
            title: title.into(),
            filename: format!("{title}.mp3"),
            duration,
            category: Category::Music,
            art: None,
        }
    }

    #[tokio::test]
    async fn added_items_persist_and_reload() {
        let cfg = test_config();
        let station = Station::open(cfg.clone()).await.unwrap();
        let a = station.add_item(music("a", 5.0)).await.unwrap();
        let b = station.add_item(music("b", 5.0)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.added_at.is_some());

        let reopened = Station::open(cfg).await.unwrap();
        let ids: Vec<String> = reopened.library().await.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn deleted_filenames_cannot_come_back() {
        let station = Station::open(test_config()).await.unwrap();
        let a = station.add_item(music("a", 5.0)).await.unwrap();
        station.enqueue(&a.id).await.unwrap();

        station.remove_item(&a.id).await.unwrap();
        assert!(station.lock().await.queue.is_empty());

        let err = station.add_item(music("a", 5.0)).await.unwrap_err();
        assert!(matches!(err, StationError::Tombstoned(f) if f == "a.mp3"));
        assert!(matches!(
            station.remove_item(&a.id).await.unwrap_err(),
            StationError::MediaNotFound(_)
        ));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_without_side_effects() {
        let station = Station::open(test_config()).await.unwrap();
        let a = station.add_item(music("a", 5.0)).await.unwrap();

        assert!(matches!(station.enqueue("nope").await, Err(StationError::MediaNotFound(_))));
        assert!(matches!(
            station.add_schedule_entry("nope", 10.0).await,
            Err(StationError::MediaNotFound(_))
        ));
        assert!(matches!(
            station.record_vote(&a.id, "l1", 6).await,
            Err(StationError::InvalidRating(6))
        ));
        assert!(matches!(
            station.record_vote(&a.id, "  ", 3).await,
            Err(StationError::MissingListener)
        ));

        let st = station.lock().await;
        assert!(st.queue.is_empty());
        assert!(st.schedule.is_empty());
    }

    #[tokio::test]
    async fn update_reaches_the_on_air_copy() {
        let station = Station::open(test_config()).await.unwrap();
        let a = station.add_item(music("a", 5.0)).await.unwrap();
        {
            let mut st = station.lock().await;
            let item = st.find(&a.id).cloned().unwrap();
            st.current = Some(crate::model::CurrentTrack::start(item, 1.0));
            st.playing = true;
        }

        let update = MediaUpdate {
            art: Some("covers/a.jpg".into()),
            eq: Some("voice".into()),
            duration: Some(7.0),
            ..MediaUpdate::default()
        };
        station.update_item(&a.id, update).await.unwrap();

        let st = station.lock().await;
        let cur = st.current.as_ref().unwrap();
        assert_eq!(cur.item.art.as_deref(), Some("covers/a.jpg"));
        assert_eq!(cur.item.eq.as_deref(), Some("voice"));
        // Duration of the running copy is left alone.
        assert_eq!(cur.item.duration, 5.0);
        assert_eq!(st.find(&a.id).unwrap().duration, 7.0);
    }

    #[tokio::test]
    async fn votes_show_up_in_status() {
        let station = Station::open(test_config()).await.unwrap();
        let a = station.add_item(music("a", 5.0)).await.unwrap();
        {
            let mut st = station.lock().await;
            let item = st.find(&a.id).cloned().unwrap();
            st.current = Some(crate::model::CurrentTrack::start(item, now_ts()));
            st.playing = true;
        }
        station.record_vote(&a.id, "l1", 4).await.unwrap();
        station.record_vote(&a.id, "l1", 5).await.unwrap();

        let status = station.status(Some("l1")).await;
        assert!(status.playing);
        assert_eq!(status.user_vote, Some(5));
        assert_eq!(status.listeners, 1);
        assert_eq!(status.current_track.unwrap().id, a.id);

        let anon = station.status(None).await;
        assert_eq!(anon.user_vote, None);
    }

    #[tokio::test]
    async fn status_lists_only_resolvable_queue_entries() {
        let station = Station::open(test_config()).await.unwrap();
        let a = station.add_item(music("a", 5.0)).await.unwrap();
        {
            let mut st = station.lock().await;
            st.queue.push_back("ghost".into());
            st.queue.push_back(a.id.clone());
        }
        let status = station.status(None).await;
        assert!(!status.playing);
        assert_eq!(status.elapsed, 0.0);
        assert_eq!(status.queue.len(), 1);
        assert_eq!(status.queue[0].title, "a");
    }

    #[tokio::test]
    async fn schedule_entries_can_be_removed() {
        let station = Station::open(test_config()).await.unwrap();
        let a = station.add_item(music("a", 5.0)).await.unwrap();
        let later = station.add_schedule_entry(&a.id, 500.0).await.unwrap();
        let sooner = station.add_schedule_entry(&a.id, 100.0).await.unwrap();

        let listed: Vec<String> = station.schedule().await.into_iter().map(|e| e.id).collect();
        assert_eq!(listed, vec![sooner.id.clone(), later.id.clone()]);

        station.remove_schedule_entry(&sooner.id).await.unwrap();
        assert_eq!(station.schedule().await.len(), 1);
        assert!(matches!(
            station.remove_schedule_entry(&sooner.id).await,
            Err(StationError::ScheduleEntryNotFound(_))
        ));
    }

    /// Keep consecutive cross-process writes in distinct mtime ticks.
    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn follower_writes_keep_the_leaders_progress() {
        let cfg = test_config();
        let leader = Station::open(cfg.clone()).await.unwrap();
        let a = leader.add_item(music("a", 1.0)).await.unwrap();
        leader.add_schedule_entry(&a.id, 0.0).await.unwrap();
        let follower = Station::open(cfg.clone()).await.unwrap();

        settle().await;
        let now = now_ts();
        // Consumes the due entry, then finishes the one-second track.
        crate::scheduler::tick_once(&leader, now).await.unwrap();
        settle().await;
        crate::scheduler::tick_once(&leader, now + 3.0).await.unwrap();
        settle().await;

        follower.add_item(music("b", 1.0)).await.unwrap();

        let on_disk = PersistedStore::new(&cfg.data_file).load();
        assert!(on_disk.schedule.is_empty());
        assert_eq!(on_disk.library.len(), 2);
        let a_on_disk = on_disk.library.iter().find(|m| m.id == a.id).unwrap();
        assert_eq!(a_on_disk.last_played_at, Some(now + 3.0));
        assert!(follower.schedule().await.is_empty());
    }

    #[tokio::test]
    async fn follower_enqueue_leaves_the_track_on_air() {
        let cfg = test_config();
        let leader = Station::open(cfg.clone()).await.unwrap();
        let a = leader.add_item(music("a", 300.0)).await.unwrap();
        let b = leader.add_item(music("b", 300.0)).await.unwrap();
        let follower = Station::open(cfg.clone()).await.unwrap();

        settle().await;
        let now = now_ts();
        crate::scheduler::tick_once(&leader, now).await.unwrap();
        let on_air = leader.lock().await.current.clone().unwrap();
        let other = if on_air.item.id == a.id { b.id } else { a.id };

        settle().await;
        follower.enqueue(&other).await.unwrap();
        settle().await;
        crate::scheduler::tick_once(&leader, now + 1.0).await.unwrap();

        let st = leader.lock().await;
        let cur = st.current.as_ref().unwrap();
        assert!(st.playing);
        assert_eq!(cur.item.id, on_air.item.id);
        assert_eq!(cur.start_time, on_air.start_time);
        assert_eq!(st.queue.front(), Some(&other));
    }

    #[tokio::test]
    async fn failed_store_write_leaves_state_unchanged() {
        let cfg = test_config();
        // A directory where the store file should be: the rename fails.
        std::fs::create_dir_all(&cfg.data_file).unwrap();
        let station = Station::open(cfg).await.unwrap();

        let err = station.add_item(music("a", 5.0)).await.unwrap_err();
        assert!(matches!(err, StationError::Storage(_)));
        assert!(station.library().await.is_empty());
    }

    #[tokio::test]
    async fn failed_mirror_write_leaves_state_unchanged() {
        let cfg = test_config();
        let station = Station::open(cfg.clone()).await.unwrap();
        let a = station.add_item(music("a", 5.0)).await.unwrap();
        std::fs::create_dir_all(&cfg.state_file).unwrap();

        assert!(matches!(station.enqueue(&a.id).await, Err(StationError::Storage(_))));
        assert!(station.lock().await.queue.is_empty());

        // The store side is untouched by the failed queue edit.
        let removed = station.remove_item(&a.id).await;
        assert!(matches!(removed, Err(StationError::Storage(_))));
        let st = station.lock().await;
        assert!(st.contains(&a.id));
        assert!(st.tombstones.is_empty());
        drop(st);
        assert_eq!(PersistedStore::new(&cfg.data_file).load().library.len(), 1);
    }
}
