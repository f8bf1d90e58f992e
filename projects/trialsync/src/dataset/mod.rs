// Dataset consolidation: raw capture session -> time-aligned per-trial tree

pub mod acquire;
pub mod collisions;
pub mod layout;
pub mod metadata;
pub mod robot;
pub mod sync;

pub use collisions::CollisionEvent;

use crate::error::SyncError;
use crate::video::processor::progress_bar;
use crate::video::segment::VideoSegment;
use crate::video::Clip;
use anyhow::{Context, Result};
use layout::{copy_ancillary, RawLayout};
use metadata::MetadataTable;
use robot::RobotTimeline;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use sync::TimelineSynchronizer;

/// One camera's trimmed segment within a trial.
#[derive(Debug)]
pub struct Sample<V> {
    pub camera: u32,
    pub video: V,
    pub frame_start: usize,
    pub frame_end: usize,
    /// Absolute robot-clock bounds, in seconds.
    pub time_start: f64,
    pub time_end: f64,
}

#[derive(Debug)]
pub struct Trial<V> {
    pub id: u32,
    pub samples: BTreeMap<u32, Sample<V>>,
    pub collisions: Vec<CollisionEvent>,
    /// Frame rate of the most recently written sample.
    pub frame_rate: Option<f64>,
}

impl<V: Clip> Trial<V> {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            samples: BTreeMap::new(),
            collisions: Vec::new(),
            frame_rate: None,
        }
    }

    /// Stores `sample` under its camera id, replacing any previous one.
    pub fn insert(&mut self, sample: Sample<V>) {
        self.frame_rate = Some(1.0 / sample.video.frame_period());
        self.samples.insert(sample.camera, sample);
    }
}

#[derive(Debug)]
pub struct Dataset<V> {
    pub id: String,
    /// Raw session directory the dataset was loaded from.
    pub root: PathBuf,
    pub trials: BTreeMap<u32, Trial<V>>,
}

impl<V: Clip> Dataset<V> {
    pub fn new(id: &str, root: PathBuf) -> Self {
        Self {
            id: id.to_string(),
            root,
            trials: BTreeMap::new(),
        }
    }

    /// Returns the trial with the given id, creating it if needed.
    pub fn trial_mut(&mut self, id: u32) -> &mut Trial<V> {
        self.trials.entry(id).or_insert_with(|| Trial::new(id))
    }

    /// Fills every trial's collision sequence from its raw log. A trial without
    /// a log keeps an empty sequence.
    pub fn annotate_collisions(&mut self, layout: &RawLayout, robot: &RobotTimeline) -> Result<()> {
        for trial in self.trials.values_mut() {
            let Some(frame_rate) = trial.frame_rate else {
                continue;
            };
            let path = layout.collision_log(trial.id);
            if !path.exists() {
                tracing::warn!("Trial #{}: no collision log at {:?}", trial.id, path);
                continue;
            }

            let robot_start = robot.start_time(trial.id)?;
            let samples = collisions::read_collision_log(&path)?;
            trial
                .collisions
                .extend(collisions::annotate(&samples, robot_start, frame_rate));
            tracing::debug!(
                "Trial #{}: {} collision events at {:.2} fps",
                trial.id,
                trial.collisions.len(),
                frame_rate
            );
        }
        Ok(())
    }

    /// Writes the consolidated tree under `output_root` and returns the number
    /// of trials written. Every clip is consumed by its export, which releases
    /// its container.
    pub fn save(self, output_root: &Path) -> Result<usize> {
        fs::create_dir_all(output_root)
            .with_context(|| format!("Failed to create output root {:?}", output_root))?;

        let layout = RawLayout::new(&self.root);
        copy_ancillary(&layout.start_data(), &output_root.join("start_data.txt"));

        let total: usize = self.trials.values().map(|t| t.samples.len()).sum();
        let trial_count = self.trials.len();
        let pb = progress_bar(total as u64)?;

        for (id, trial) in self.trials {
            tracing::info!(
                "Saving trial #{}: {} cameras, {} collision events",
                id,
                trial.samples.len(),
                trial.collisions.len()
            );
            let trial_dir = output_root.join(format!("{:02}", id));
            fs::create_dir(&trial_dir)
                .with_context(|| format!("Failed to create trial directory {:?}", trial_dir))?;

            collisions::write_collisions(&trial_dir.join("collisions.csv"), &trial.collisions)?;
            for (src, name) in layout.ancillary_logs(id) {
                copy_ancillary(&src, &trial_dir.join(name));
            }

            for sample in trial.samples.into_values() {
                let target = trial_dir.join(camera_file_name(sample.camera));
                tracing::debug!(
                    "Trial #{} camera #{}: frames {}..={}, robot time {:.3}..{:.3}",
                    id,
                    sample.camera,
                    sample.frame_start,
                    sample.frame_end,
                    sample.time_start,
                    sample.time_end
                );
                sample
                    .video
                    .export(&target, sample.frame_start, Some(sample.frame_end))
                    .with_context(|| format!("Failed to export {:?}", target))?;
                pb.inc(1);
            }
        }

        pb.finish_with_message("Done");
        tracing::info!("Saved {} samples to {:?}", total, output_root);
        Ok(trial_count)
    }
}

pub fn camera_file_name(camera: u32) -> String {
    format!("camera_{:02}.mp4", camera)
}

/// Loads and synchronizes a raw session: every metadata table in order, then
/// the collision logs.
pub fn load_raw(raw_root: &Path, id: &str) -> Result<Dataset<VideoSegment>> {
    let layout = RawLayout::new(raw_root);
    let robot = RobotTimeline::load(&layout.start_data())?;
    let synchronizer = TimelineSynchronizer::new(&robot);
    let mut dataset = Dataset::new(id, raw_root.to_path_buf());
    let mut clips: HashMap<u32, Vec<PathBuf>> = HashMap::new();

    for path in metadata::list_tables(&layout.processing_dir())? {
        let table = MetadataTable::load(&path)?;
        let written = synchronizer.apply(&mut dataset, &table, |record| {
            if !clips.contains_key(&record.camera) {
                clips.insert(record.camera, layout.camera_clips(record.camera)?);
            }
            let clip = clips
                .get(&record.camera)
                .and_then(|list| list.get(record.video - 1))
                .ok_or_else(|| SyncError::MalformedMetadata {
                    path: path.clone(),
                    reason: format!(
                        "camera #{} has no video #{}",
                        record.camera, record.video
                    ),
                })?;
            VideoSegment::open(clip)
        })?;
        tracing::info!("Applied {} records from {:?}", written, path);
    }

    dataset.annotate_collisions(&layout, &robot)?;
    tracing::info!(
        "Loaded session {} with {} trials from {:?}",
        dataset.id,
        dataset.trials.len(),
        raw_root
    );
    Ok(dataset)
}
