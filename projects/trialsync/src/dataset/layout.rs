use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Paths inside one raw capture session, as laid out by the recording rig.
#[derive(Debug, Clone)]
pub struct RawLayout {
    root: PathBuf,
}

impl RawLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn start_data(&self) -> PathBuf {
        self.root.join("Robot_Input").join("start_data.txt")
    }

    pub fn processing_dir(&self) -> PathBuf {
        self.root.join("Processing_Data")
    }

    pub fn collision_log(&self, trial: u32) -> PathBuf {
        self.root
            .join("Collision_Data")
            .join(format!("Trial{}.csv", trial))
    }

    /// Raw clips of one camera, in lexical order.
    pub fn camera_clips(&self, camera: u32) -> Result<Vec<PathBuf>> {
        let dir = self
            .root
            .join(format!("Camera{}", camera))
            .join("Renamed_Raw_Data");
        let mut clips = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("Failed to list clips in {:?}", dir))?;
            if entry.file_type().is_file() && has_extension(entry.path(), "mp4") {
                clips.push(entry.into_path());
            }
        }
        clips.sort();
        Ok(clips)
    }

    /// Per-trial ancillary logs and the names they get in the trial directory.
    pub fn ancillary_logs(&self, trial: u32) -> [(PathBuf, &'static str); 3] {
        let robot = self.root.join("Robot_Input");
        [
            (
                robot
                    .join("Parsed_Logs")
                    .join(format!("Parsed_Logs{}.csv", trial)),
                "logs.csv",
            ),
            (
                robot
                    .join("Parsed_PoseUpdates")
                    .join(format!("Parsed_PoseUpdates{}.csv", trial)),
                "poses.csv",
            ),
            (
                robot
                    .join("Parsed_Telem")
                    .join(format!("Parsed_Telem{}.csv", trial)),
                "telemetry.csv",
            ),
        ]
    }
}

pub(crate) fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Copies an artifact the core does not interpret. Failures are logged and
/// swallowed: a missing log never aborts a run. Returns whether it was copied.
pub fn copy_ancillary(src: &Path, dst: &Path) -> bool {
    match fs::copy(src, dst) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("Could not copy {:?} to {:?}: {}", src, dst, e);
            false
        }
    }
}
