use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::FinishTiming;
use crate::lease::LeaseCoordinator;
use crate::model::{now_ts, CurrentTrack, MediaItem, Timestamp};
use crate::queue::QueueManager;
use crate::selector::{select_next, Selection};
use crate::state::RadioState;
use crate::station::{Persist, Station, Touched};

// --- Scheduler loop -----------------------------------------------------------
//
// Fixed-interval polling. Each tick, for the lease holder only:
//   1) renew the lease (non-holders stop here)
//   2) absorb foreign writes: persisted store first, then the mirror
//   3) sweep expired `Temporary` items
//   4) decide whether the on-air item is done
//   5) if so, select a replacement, record history, top up the queue
//   6) persist store and mirror
//
// A failed tick is logged and followed by a longer sleep. The loop itself
// never returns.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Nothing was on air.
    Idle,
    /// Normal end of track.
    Finished,
    /// Far past the expected end, or a start time in the future.
    Stuck,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub reason: Reason,
    /// Id of the item that came off air, if it finished on its own.
    pub finished: Option<String>,
    pub selection: Option<Selection>,
    /// False when an idle channel stayed idle with nothing touched.
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub enum TickReport {
    NotLeader,
    Ran { expired: usize, transition: Option<Transition> },
}

pub fn needs_selection(
    state: &RadioState,
    now: Timestamp,
    timing: &FinishTiming,
) -> Option<Reason> {
    let cur = match (&state.current, state.playing) {
        (Some(cur), true) => cur,
        _ => return Some(Reason::Idle),
    };
    let effective = cur.item.effective_duration(timing.unknown_duration);
    let elapsed = cur.elapsed(now);

    if elapsed > effective + timing.stuck_grace || elapsed < -timing.stuck_grace {
        return Some(Reason::Stuck);
    }
    if elapsed >= effective + timing.finish_buffer {
        return Some(Reason::Finished);
    }
    None
}

/// Steps 4 and 5 of a tick. Returns `None` while the current item keeps
/// playing.
pub fn advance(
    state: &mut RadioState,
    now: Timestamp,
    timing: &FinishTiming,
    queue: &QueueManager,
) -> Option<Transition> {
    let reason = needs_selection(state, now, timing)?;

    let schedule_before = state.schedule.len();
    let queue_before = state.queue.len();
    let was_on_air = state.current.is_some() || state.playing;

    let finished = match (reason, state.current.take()) {
        (Reason::Finished | Reason::Stuck, Some(cur)) => Some(cur.item.id),
        _ => None,
    };
    if let Some(id) = &finished {
        if let Some(item) = state.find_mut(id) {
            item.last_played_at = Some(now);
        }
    }

    let selection = select_next(
        &state.library,
        &mut state.schedule,
        &mut state.queue,
        &state.history,
        now,
        &mut state.rng,
    );

    match &selection {
        Some(sel) => {
            state.current = Some(CurrentTrack::start(sel.item.clone(), now));
            state.playing = true;
            state.history.push(sel.item.id.clone(), state.library.len());
            queue.auto_fill(&mut state.queue, &state.library, &state.history, &[], &mut state.rng);
        }
        None => {
            state.current = None;
            state.playing = false;
        }
    }

    let changed = was_on_air
        || selection.is_some()
        || state.schedule.len() != schedule_before
        || state.queue.len() != queue_before;

    Some(Transition { reason, finished, selection, changed })
}

/// Remove `Temporary` items older than `ttl` seconds. Returns what was removed
/// so the caller can delete the files outside the lock.
pub fn sweep_expired(state: &mut RadioState, now: Timestamp, ttl: f64) -> Vec<MediaItem> {
    let (expired, kept): (Vec<MediaItem>, Vec<MediaItem>) =
        std::mem::take(&mut state.library).into_iter().partition(|m| {
            m.category == crate::model::Category::Temporary
                && m.added_at.is_some_and(|added| now - added > ttl)
        });
    state.library = kept;
    if !expired.is_empty() {
        state.queue.retain(|id| !expired.iter().any(|m| m.id == *id));
        state.history.trim(state.library.len());
    }
    expired
}

/// One tick body, run by the lease holder. A failed save fails the tick;
/// the in-memory decision stands and the next tick writes it again.
pub async fn tick_once(station: &Station, now: Timestamp) -> anyhow::Result<TickReport> {
    let _write = station.write_lock().await?;
    station.absorb_foreign().await?;

    let cfg = station.config();
    let (expired, transition, persist) = {
        let mut guard = station.state.lock().await;
        let st = &mut *guard;

        let expired = sweep_expired(st, now, cfg.temporary_ttl.as_secs_f64());
        let transition = advance(st, now, &cfg.timing, &station.queue);

        let dirty = !expired.is_empty() || transition.as_ref().is_some_and(|t| t.changed);
        let persist = dirty.then(|| {
            st.bump();
            Persist::of(st, Touched::Both)
        });
        (expired, transition, persist)
    };

    for item in &expired {
        info!(id = %item.id, title = %item.title, "removing expired temporary item");
    }
    if let Some(t) = transition.as_ref().filter(|t| t.changed) {
        match &t.selection {
            Some(sel) => info!(
                source = ?sel.source,
                reason = ?t.reason,
                id = %sel.item.id,
                title = %sel.item.title,
                "now playing"
            ),
            None => info!(reason = ?t.reason, "nothing to play, channel idle"),
        }
    }

    if let Some(p) = persist {
        station.persist(p).await?;
    }
    if !expired.is_empty() {
        station
            .delete_media_files(expired.iter().map(|m| m.filename.clone()).collect())
            .await;
    }

    Ok(TickReport::Ran { expired: expired.len(), transition })
}

pub struct Scheduler {
    station: Arc<Station>,
    lease: LeaseCoordinator,
    identity: String,
    leading: bool,
}

impl Scheduler {
    pub fn new(station: Arc<Station>, lease: LeaseCoordinator, identity: String) -> Self {
        Self { station, lease, identity, leading: false }
    }

    pub fn is_leading(&self) -> bool {
        self.leading
    }

    /// Renew the lease and, when held, run one tick body. The body runs as
    /// its own task so a panic inside it surfaces here as an error.
    pub async fn tick(&mut self) -> anyhow::Result<TickReport> {
        let lease = self.lease.clone();
        let identity = self.identity.clone();
        let holder =
            tokio::task::spawn_blocking(move || lease.try_acquire_or_renew(&identity)).await??;

        if !holder {
            if self.leading {
                warn!(
                    identity = %self.identity,
                    "scheduler lease lost, another instance superseded this one"
                );
            }
            self.leading = false;
            return Ok(TickReport::NotLeader);
        }
        if !self.leading {
            info!(identity = %self.identity, "acquired scheduler lease");
            self.leading = true;
        }

        let station = self.station.clone();
        let report = tokio::spawn(async move { tick_once(&station, now_ts()).await }).await??;
        Ok(report)
    }

    pub async fn run(mut self) {
        let cfg = self.station.config().clone();
        info!(
            identity = %self.identity,
            interval_ms = cfg.tick_interval.as_millis() as u64,
            "scheduler loop started"
        );

        let mut interval = tokio::time::interval(cfg.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                error!("scheduler tick failed, backing off: {e:#}");
                tokio::time::sleep(cfg.error_backoff).await;
            }
        }
    }
}
