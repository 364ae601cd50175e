use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::CurrentTrack;
use crate::store::SharedJsonFile;

/// What is on air right now, as last decided by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorSnapshot {
    #[serde(default)]
    pub current_track: Option<CurrentTrack>,
    #[serde(default)]
    pub playing: bool,
    #[serde(default)]
    pub queue: Vec<String>,
}

/// Small, frequently rewritten file holding transient playback state.
///
/// Other processes read it to report the authoritative "now playing" without
/// reloading the whole library.
#[derive(Debug)]
pub struct VolatileMirror {
    file: SharedJsonFile,
}

impl VolatileMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { file: SharedJsonFile::new(path) }
    }

    pub fn save_state(&self, snapshot: &MirrorSnapshot, revision: u64) -> anyhow::Result<bool> {
        self.file.write(snapshot, revision)
    }

    pub fn load_state(&self) -> MirrorSnapshot {
        self.file.read()
    }

    pub fn changed_externally(&self) -> bool {
        self.file.changed_externally()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use crate::selector::tests::item;
    use crate::store::tests::temp_path;

    #[test]
    fn state_survives_a_restart() {
        let path = temp_path("radio_state.json");
        let mirror = VolatileMirror::new(&path);
        assert_eq!(mirror.load_state(), MirrorSnapshot::default());

        let snap = MirrorSnapshot {
            current_track: Some(CurrentTrack::start(item("a", Category::Music, 5.0), 12.5)),
            playing: true,
            queue: vec!["b".into(), "b".into()],
        };
        mirror.save_state(&snap, 1).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["current_track"]["start_time"], 12.5);
        assert_eq!(raw["queue"].as_array().unwrap().len(), 2);

        assert_eq!(VolatileMirror::new(&path).load_state(), snap);
    }
}
