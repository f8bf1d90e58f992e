use crate::error::SyncError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct StartRow {
    #[serde(rename = "Start Times:")]
    start: f64,
}

/// Absolute start timestamp of every trial, as logged by the robot.
#[derive(Debug, Clone, Default)]
pub struct RobotTimeline {
    starts: Vec<f64>,
}

impl RobotTimeline {
    pub fn new(starts: Vec<f64>) -> Self {
        Self { starts }
    }

    /// Reads `start_data.txt`: a one-column CSV headed `Start Times:`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open robot start times {:?}", path))?;
        let starts = reader
            .deserialize::<StartRow>()
            .map(|row| row.map(|r| r.start))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Malformed start times in {:?}", path))?;

        tracing::debug!("Loaded {} trial start times from {:?}", starts.len(), path);
        Ok(Self::new(starts))
    }

    /// Start time of trial `trial` (1-based).
    pub fn start_time(&self, trial: u32) -> Result<f64, SyncError> {
        (trial as usize)
            .checked_sub(1)
            .and_then(|i| self.starts.get(i))
            .copied()
            .ok_or(SyncError::MissingStartTime {
                trial,
                known: self.starts.len(),
            })
    }
}
