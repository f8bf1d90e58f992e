use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One collision-log entry mapped onto a trial's video timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionEvent {
    pub frame_index: i64,
    pub collided: bool,
}

/// Raw `Collision_Data/Trial<id>.csv` row: absolute timestamp and a `1`/`0` flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionSample {
    pub timestamp: f64,
    pub collided: bool,
}

pub fn read_collision_log(path: &Path) -> Result<Vec<CollisionSample>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open collision log {:?}", path))?;

    let mut samples = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read {:?}", path))?;
        let timestamp = record
            .get(0)
            .ok_or_else(|| anyhow!("{:?} line {}: missing timestamp", path, line + 1))?
            .trim()
            .parse::<f64>()
            .with_context(|| format!("{:?} line {}: bad timestamp", path, line + 1))?;
        let collided = record.get(1).map(str::trim) == Some("1");
        samples.push(CollisionSample {
            timestamp,
            collided,
        });
    }
    Ok(samples)
}

/// Maps absolute timestamps to frame indices: `round((t - robot_start) * frame_rate)`.
/// Order and duplicates are passed through untouched.
pub fn annotate(samples: &[CollisionSample], robot_start: f64, frame_rate: f64) -> Vec<CollisionEvent> {
    samples
        .iter()
        .map(|sample| CollisionEvent {
            frame_index: ((sample.timestamp - robot_start) * frame_rate).round() as i64,
            collided: sample.collided,
        })
        .collect()
}

/// Writes `frame_index,collided` rows (no header, `true`/`false` tokens).
pub fn write_collisions(path: &Path, events: &[CollisionEvent]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for event in events {
        writer.serialize(event)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads back a file produced by [`write_collisions`].
pub fn read_collisions(path: &Path) -> Result<Vec<CollisionEvent>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;
    reader
        .deserialize::<CollisionEvent>()
        .map(|row| row.with_context(|| format!("Malformed collision row in {:?}", path)))
        .collect()
}
