use std::path::{Component, Path};
use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Result, StationError};
use crate::model::Category;
use crate::station::{NewMedia, Station};

/// Extensions accepted for import.
const AUDIO_EXTENSIONS: [&str; 9] =
    ["flac", "wav", "mp3", "m4a", "aac", "ogg", "opus", "mp4", "webm"];

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRequest {
    /// Path relative to the media directory.
    pub filename: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
}

/// Validate a file already sitting in the media directory and add it to the
/// library in the background once its duration is known.
///
/// Rejections happen here, synchronously. The returned handle may be dropped;
/// the import still completes.
pub async fn import_local(station: Arc<Station>, req: ImportRequest) -> Result<JoinHandle<()>> {
    let filename = req.filename.trim().to_string();
    validate_relative(&filename)?;

    if !is_supported_media(&filename) {
        return Err(StationError::InvalidInput(format!("{filename} is not a supported audio file")));
    }

    if station.lock().await.tombstones.contains(&filename) {
        return Err(StationError::Tombstoned(filename));
    }

    let full = station.config().media_dir.join(&filename);
    if !tokio::fs::try_exists(&full).await.unwrap_or(false) {
        return Err(StationError::InvalidInput(format!("{filename} not found in media directory")));
    }

    let ffprobe = station.config().ffprobe.clone();
    let handle = tokio::spawn(async move {
        let duration = probe_duration_seconds(&ffprobe, &full).await.unwrap_or(0.0);
        if duration == 0.0 {
            warn!("could not probe duration of {}, storing as unknown", full.display());
        }
        let new = NewMedia {
            title: req
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| title_from_path(&filename)),
            filename,
            duration,
            category: req.category.unwrap_or_default(),
            art: None,
        };
        match station.add_item(new).await {
            Ok(item) => info!(id = %item.id, duration, "import finished"),
            Err(e) => warn!("import of {} failed: {e}", full.display()),
        }
    });
    Ok(handle)
}

fn is_supported_media(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn validate_relative(filename: &str) -> Result<()> {
    if filename.is_empty() {
        return Err(StationError::InvalidInput("filename is required".into()));
    }
    let escapes = Path::new(filename)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(StationError::InvalidInput(format!(
            "{filename} must stay inside the media directory"
        )));
    }
    Ok(())
}

/// Seconds as reported by ffprobe. `None` when ffprobe is missing, fails, or
/// prints nothing usable.
pub async fn probe_duration_seconds(ffprobe: &str, path: &Path) -> Option<f64> {
    let out = tokio::process::Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(path)
        .output()
        .await
        .ok()?;

    if !out.status.success() {
        return None;
    }

    let s = String::from_utf8_lossy(&out.stdout);
    let secs: f64 = s.trim().parse().ok()?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

pub fn title_from_path(p: &str) -> String {
    Path::new(p)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .replace('_', " ")
}
