use serde::{Deserialize, Deserializer, Serialize};

/// UNIX seconds with a fractional part.
pub type Timestamp = f64;

pub fn now_ts() -> Timestamp {
    time::OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

/// Parse a client-supplied `run_at`: either UNIX seconds or an RFC 3339
/// string such as `2026-10-17T20:00:00Z`.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<Timestamp> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<f64>() {
                return v.is_finite().then_some(v);
            }
            let dt = time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
                .ok()?;
            Some(dt.unix_timestamp_nanos() as f64 / 1_000_000_000.0)
        }
        _ => None,
    }
}

/// Free-form category tag. Three values carry selection semantics; any other
/// string round-trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    #[default]
    Music,
    Sermon,
    Temporary,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Music => "Music",
            Category::Sermon => "Sermon",
            Category::Temporary => "Temporary",
            Category::Other(s) => s,
        }
    }

    /// Categories the shuffle tier avoids unless nothing else is left.
    pub fn is_shuffle_blocked(&self) -> bool {
        matches!(self, Category::Temporary | Category::Sermon)
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Music" => Category::Music,
            "Sermon" => Category::Sermon,
            "Temporary" => Category::Temporary,
            _ => Category::Other(s),
        }
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        match c {
            Category::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub title: String,
    pub filename: String,
    /// Seconds. `0.0` means unknown.
    #[serde(default, deserialize_with = "lenient_duration")]
    pub duration: f64,
    #[serde(default)]
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art: Option<String>,
    /// Equalizer preset name handed to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played_at: Option<Timestamp>,
}

impl MediaItem {
    /// Duration used for finish detection.
    pub fn effective_duration(&self, unknown: f64) -> f64 {
        if self.duration > 0.0 {
            self.duration
        } else {
            unknown
        }
    }
}

// Durations written by older tooling can be null, strings or negative.
fn lenient_duration<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let secs = match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(secs.filter(|d| d.is_finite() && *d >= 0.0).unwrap_or(0.0))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    pub media_id: String,
    pub run_at: Timestamp,
}

/// Snapshot of the item on air. Edits to the library item do not flow into
/// it, except the fields `Station::update_item` propagates explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentTrack {
    #[serde(flatten)]
    pub item: MediaItem,
    pub start_time: Timestamp,
}

impl CurrentTrack {
    pub fn start(item: MediaItem, now: Timestamp) -> Self {
        Self { item, start_time: now }
    }

    pub fn elapsed(&self, now: Timestamp) -> f64 {
        now - self.start_time
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub track_id: String,
    pub listener_id: String,
    pub rating: u8,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueView {
    pub id: String,
    pub title: String,
    pub category: Category,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub playing: bool,
    pub current_track: Option<MediaItem>,
    pub elapsed: f64,
    pub listeners: usize,
    pub queue: Vec<QueueView>,
    pub user_vote: Option<u8>,
    pub server_time: Timestamp,
}
