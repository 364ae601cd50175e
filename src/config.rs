use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

// Engine configuration.
//
// Everything is read from `RADIOCAST_*` environment variables once at
// startup. Every value has a default so a bare `radiocast-engine` run works
// from the current directory.

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Library, schedule and deletion tombstones.
    pub data_file: PathBuf,
    /// Current track, playing flag and manual queue.
    pub state_file: PathBuf,
    pub votes_file: PathBuf,
    /// Scheduler lease token. A sibling `.lock` file is used for flock.
    pub lease_file: PathBuf,
    /// Directory `MediaItem::filename` is relative to.
    pub media_dir: PathBuf,
    pub bind: SocketAddr,
    pub ffprobe: String,

    pub tick_interval: Duration,
    pub error_backoff: Duration,
    pub lease_ttl: Duration,
    pub timing: FinishTiming,
    /// Age after which `Temporary` items are swept from the library.
    pub temporary_ttl: Duration,
    /// Votes older than this are dropped on the next write.
    pub vote_retention: Duration,
    /// A listener counts as active this long after its last heartbeat.
    pub listener_window: Duration,
    pub queue_depth: usize,
}

/// Thresholds used to decide that the on-air item is finished.
#[derive(Debug, Clone, Copy)]
pub struct FinishTiming {
    /// Added to the track duration before a normal finish.
    pub finish_buffer: f64,
    /// Past `duration + stuck_grace` the track is replaced no matter what.
    pub stuck_grace: f64,
    /// Stand-in duration for items whose duration is unknown.
    pub unknown_duration: f64,
}

impl Default for FinishTiming {
    fn default() -> Self {
        Self { finish_buffer: 1.0, stuck_grace: 10.0, unknown_duration: 10.0 }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data.json"),
            state_file: PathBuf::from("radio_state.json"),
            votes_file: PathBuf::from("votes.json"),
            lease_file: PathBuf::from("scheduler.lease"),
            media_dir: PathBuf::from("static/media"),
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            ffprobe: "ffprobe".to_string(),
            tick_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(10),
            timing: FinishTiming::default(),
            temporary_ttl: Duration::from_secs(24 * 60 * 60),
            vote_retention: Duration::from_secs(90 * 24 * 60 * 60),
            listener_window: Duration::from_secs(30),
            queue_depth: crate::queue::TARGET_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            data_file: env_path("RADIOCAST_DATA_FILE", d.data_file),
            state_file: env_path("RADIOCAST_STATE_FILE", d.state_file),
            votes_file: env_path("RADIOCAST_VOTES_FILE", d.votes_file),
            lease_file: env_path("RADIOCAST_LEASE_FILE", d.lease_file),
            media_dir: env_path("RADIOCAST_MEDIA_DIR", d.media_dir),
            bind: env_parse("RADIOCAST_BIND", d.bind),
            ffprobe: std::env::var("RADIOCAST_FFPROBE").unwrap_or(d.ffprobe),
            tick_interval: Duration::from_millis(env_parse(
                "RADIOCAST_TICK_MS",
                d.tick_interval.as_millis() as u64,
            )),
            error_backoff: Duration::from_millis(env_parse(
                "RADIOCAST_ERROR_BACKOFF_MS",
                d.error_backoff.as_millis() as u64,
            )),
            lease_ttl: Duration::from_secs(env_parse(
                "RADIOCAST_LEASE_TTL_SECS",
                d.lease_ttl.as_secs(),
            )),
            timing: FinishTiming {
                finish_buffer: env_parse("RADIOCAST_FINISH_BUFFER_SECS", d.timing.finish_buffer),
                stuck_grace: env_parse("RADIOCAST_STUCK_GRACE_SECS", d.timing.stuck_grace),
                unknown_duration: d.timing.unknown_duration,
            },
            temporary_ttl: Duration::from_secs(env_parse(
                "RADIOCAST_TEMP_TTL_SECS",
                d.temporary_ttl.as_secs(),
            )),
            vote_retention: d.vote_retention,
            listener_window: d.listener_window,
            queue_depth: d.queue_depth,
        }
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var_os(key).map(PathBuf::from).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!("ignoring unparseable {key}={raw:?}, using {default}");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_broadcast_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.tick_interval, Duration::from_secs(1));
        assert_eq!(cfg.lease_ttl, Duration::from_secs(10));
        assert_eq!(cfg.temporary_ttl, Duration::from_secs(86_400));
        assert_eq!(cfg.queue_depth, 10);
        assert_eq!(cfg.timing.finish_buffer, 1.0);
        assert_eq!(cfg.timing.stuck_grace, 10.0);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("RADIOCAST_TEST_GARBAGE_MS", "soon");
        assert_eq!(env_parse("RADIOCAST_TEST_GARBAGE_MS", 250u64), 250);
        std::env::set_var("RADIOCAST_TEST_GARBAGE_MS", " 75 ");
        assert_eq!(env_parse("RADIOCAST_TEST_GARBAGE_MS", 250u64), 75);
        std::env::remove_var("RADIOCAST_TEST_GARBAGE_MS");
    }
}
