pub mod decoder;
pub mod encoder;
pub mod processor;
pub mod segment;

use anyhow::{anyhow, Result};
use ffmpeg_next::util::frame;
use ffmpeg_next::Rational;
use opencv::{core, prelude::*};
use std::path::Path;

/// Timing and trimming surface of one source clip.
///
/// `VideoSegment` is the real implementation; the synchronizer and the dataset
/// writer only depend on this trait.
pub trait Clip {
    fn frame_period(&self) -> f64;
    fn frame_count(&self) -> usize;

    /// Writes frames `[frame_start, frame_end]` to `target`. The clip is consumed,
    /// so its container handle is released once the export is done.
    fn export(self, target: &Path, frame_start: usize, frame_end: Option<usize>) -> Result<()>
    where
        Self: Sized;
}

/// A sequential producer of BGR frames, consumed by one grid decode worker.
pub trait FrameSource {
    /// Returns `Ok(None)` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<core::Mat>>;
}

/// Picks a stream's frame rate the way FFmpeg guesses it: the real base rate,
/// unless it is missing or implausibly high next to a sane average rate.
pub fn guess_frame_rate(real: Option<f64>, average: Option<f64>) -> Option<f64> {
    match (real, average) {
        (Some(r), Some(a)) if r > 210.0 && a < 70.0 => Some(a),
        (Some(r), _) => Some(r),
        (None, a) => a,
    }
}

/// Nominal duration of one frame: the reciprocal of the rounded frame rate.
pub fn frame_period(frame_rate: f64) -> Result<f64> {
    let rounded = frame_rate.round();
    if rounded < 1.0 {
        return Err(anyhow!("Unusable frame rate: {}", frame_rate));
    }
    Ok(1.0 / rounded)
}

pub(crate) fn positive_rate(rate: Rational) -> Option<f64> {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        Some(rate.numerator() as f64 / rate.denominator() as f64)
    } else {
        None
    }
}

pub(crate) fn time_base_secs(time_base: Rational) -> Result<f64> {
    positive_rate(time_base).ok_or_else(|| anyhow!("Invalid stream time base: {:?}", time_base))
}

/// Convert a BGR24 ffmpeg frame to an OpenCV Mat.
/// The Mat owns a deep copy, so it can travel through channels after the frame is dropped.
pub fn bgr_frame_to_mat(frame: &frame::Video) -> Result<core::Mat> {
    let width = frame.width() as i32;
    let height = frame.height() as i32;
    let data = frame.data(0);
    let stride = frame.stride(0);
    let row_bytes = width as usize * 3;

    let mut mat = unsafe { core::Mat::new_rows_cols(height, width, core::CV_8UC3)? };

    for y in 0..height as usize {
        let src_row = &data[y * stride..y * stride + row_bytes];
        let dst_ptr = mat.ptr_mut(y as i32)?;
        unsafe {
            std::ptr::copy_nonoverlapping(src_row.as_ptr(), dst_ptr, row_bytes);
        }
    }

    Ok(mat)
}

/// Inverse of [`bgr_frame_to_mat`], used when encoding composited canvases.
pub fn mat_to_bgr_frame(mat: &core::Mat) -> Result<frame::Video> {
    if mat.typ() != core::CV_8UC3 {
        return Err(anyhow!("Expected an 8-bit BGR image, got Mat type {}", mat.typ()));
    }

    let width = mat.cols();
    let height = mat.rows();
    let row_bytes = width as usize * 3;
    let mut frame = frame::Video::new(
        ffmpeg_next::format::Pixel::BGR24,
        width as u32,
        height as u32,
    );
    let stride = frame.stride(0);

    for y in 0..height {
        let src_ptr = mat.ptr(y)?;
        let offset = y as usize * stride;
        let dst_row = &mut frame.data_mut(0)[offset..offset + row_bytes];
        unsafe {
            std::ptr::copy_nonoverlapping(src_ptr, dst_row.as_mut_ptr(), row_bytes);
        }
    }

    Ok(frame)
}
