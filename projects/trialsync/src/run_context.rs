use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::dataset::layout::has_extension;

/// A trial directory of a consolidated session and its videos.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialListing {
    pub dir: PathBuf,
    pub videos: Vec<PathBuf>,
}

/// Lists a consolidated session from its directory tree alone.
pub fn list_trials(output_dir: &Path) -> Result<Vec<TrialListing>> {
    if !output_dir.is_dir() {
        return Err(anyhow!("Not a directory: {:?}", output_dir));
    }
    list_trial_dirs(output_dir)?
        .into_iter()
        .map(|dir| {
            let videos = list_videos(&dir)?;
            Ok(TrialListing { dir, videos })
        })
        .collect()
}

/// Videos directly inside `dir`, sorted by file name.
pub fn list_videos(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(anyhow!("Not a directory: {:?}", dir));
    }
    let mut videos: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| has_extension(e.path(), "mp4"))
        .map(|e| e.into_path())
        .collect();
    videos.sort();
    Ok(videos)
}

/// Trial directories (`01`, `02`, ...) of a consolidated session, in order.
pub fn list_trial_dirs(output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut trials = Vec::new();

    if !output_dir.exists() {
        return Ok(trials);
    }

    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let trial_id = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok());
        if let Some(id) = trial_id {
            trials.push((id, path));
        }
    }

    trials.sort();
    Ok(trials.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_a_bare_trial_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("start_data.txt"), "Start Times:\n0.0\n").unwrap();
        for trial in ["02", "01"] {
            fs::create_dir(dir.path().join(trial)).unwrap();
            fs::write(dir.path().join(trial).join("collisions.csv"), "").unwrap();
        }
        for name in ["01/camera_02.mp4", "01/camera_01.mp4", "02/camera_01.mp4"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let trials = list_trials(dir.path()).unwrap();
        assert!(!dir.path().join("metadata.json").exists());
        assert_eq!(
            trials,
            vec![
                TrialListing {
                    dir: dir.path().join("01"),
                    videos: vec![dir.path().join("01/camera_01.mp4"), dir.path().join("01/camera_02.mp4")],
                },
                TrialListing {
                    dir: dir.path().join("02"),
                    videos: vec![dir.path().join("02/camera_01.mp4")],
                },
            ]
        );
        assert!(list_trials(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn lists_trial_dirs_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["10", "02", "01", "logs"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("03"), "not a dir").unwrap();

        let names: Vec<String> = list_trial_dirs(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["01", "02", "10"]);
    }

    #[test]
    fn lists_only_top_level_videos() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        for name in ["camera_02.mp4", "camera_01.mp4", "collisions.csv", "nested/camera_03.mp4"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let videos = list_videos(dir.path()).unwrap();
        assert_eq!(
            videos,
            vec![dir.path().join("camera_01.mp4"), dir.path().join("camera_02.mp4")]
        );
        assert!(list_videos(&dir.path().join("missing")).is_err());
    }
}
