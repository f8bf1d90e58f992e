use super::metadata::{MetadataRecord, MetadataTable};
use super::robot::RobotTimeline;
use super::{Dataset, Sample};
use crate::video::Clip;
use anyhow::{Context, Result};

/// Resolves raw (possibly NaN) frame bounds against a clip's frame count.
///
/// Missing start means frame 0, missing end means the last frame. Values are
/// truncated, then clamped so that `0 <= start <= end <= frame_count`.
pub fn resolve_frames(raw_start: f64, raw_end: f64, frame_count: usize) -> (usize, usize) {
    let start = if raw_start.is_nan() { 0.0 } else { raw_start.trunc() };
    let end = if raw_end.is_nan() {
        frame_count as f64
    } else {
        raw_end.trunc()
    };

    let count = frame_count as f64;
    let clamped_start = start.clamp(0.0, count);
    let clamped_end = end.clamp(clamped_start, count);
    if clamped_start != start || clamped_end != end {
        tracing::warn!(
            "Frame bounds ({}, {}) fall outside [0, {}], clamped to ({}, {})",
            start,
            end,
            frame_count,
            clamped_start,
            clamped_end
        );
    }
    (clamped_start as usize, clamped_end as usize)
}

/// Robot offset carried into the next record of the same table.
pub fn advance_offset(
    offset: f64,
    raw_start: f64,
    raw_end: f64,
    resolved_start: usize,
    frame_period: f64,
    frame_count: usize,
) -> f64 {
    match (raw_start.is_nan(), raw_end.is_nan()) {
        // The whole clip was consumed; the next one follows it.
        (true, true) => offset + frame_period * frame_count as f64,
        // The clip runs to its natural end; timing restarts from there.
        (false, true) => frame_period * (frame_count - resolved_start) as f64,
        (true, false) => 0.0,
        // No rule for fully bounded records: the offset carries over as is.
        (false, false) => offset,
    }
}

/// Turns metadata tables into per-trial samples with absolute time bounds.
pub struct TimelineSynchronizer<'a> {
    robot: &'a RobotTimeline,
}

impl<'a> TimelineSynchronizer<'a> {
    pub fn new(robot: &'a RobotTimeline) -> Self {
        Self { robot }
    }

    /// Applies one table to `dataset`. The robot offset starts at zero for every
    /// table. `open` resolves a record to its source clip. Later records for the
    /// same (trial, camera) pair replace earlier ones. Returns the number of
    /// samples written.
    pub fn apply<V, F>(&self, dataset: &mut Dataset<V>, table: &MetadataTable, mut open: F) -> Result<usize>
    where
        V: Clip,
        F: FnMut(&MetadataRecord) -> Result<V>,
    {
        let records = table.records()?;
        let mut offset = 0.0;

        for record in &records {
            let robot_start = self.robot.start_time(record.trial)?;
            let video = open(record).with_context(|| {
                format!(
                    "Failed to open video #{} of camera #{} (trial #{})",
                    record.video, record.camera, record.trial
                )
            })?;

            let frame_period = video.frame_period();
            let frame_count = video.frame_count();
            let (frame_start, frame_end) =
                resolve_frames(record.frame_start, record.frame_end, frame_count);

            let time_start = robot_start + offset;
            let time_end = time_start + (frame_end - frame_start) as f64 * frame_period;

            offset = advance_offset(
                offset,
                record.frame_start,
                record.frame_end,
                frame_start,
                frame_period,
                frame_count,
            );

            tracing::debug!(
                "Trial #{} camera #{}: frames [{}, {}], times [{:.3}, {:.3}]",
                record.trial,
                record.camera,
                frame_start,
                frame_end,
                time_start,
                time_end
            );

            dataset.trial_mut(record.trial).insert(Sample {
                camera: record.camera,
                video,
                frame_start,
                frame_end,
                time_start,
                time_end,
            });
        }

        Ok(records.len())
    }
}
