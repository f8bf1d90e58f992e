use super::{bgr_frame_to_mat, frame_period, guess_frame_rate, positive_rate, time_base_secs, Clip};
use crate::error::SyncError;
use anyhow::{anyhow, Context, Result};
use ffmpeg_next::{codec, encoder, ffi, format, media, software::scaling, util::frame, Packet, Rational};
use opencv::core::Mat;
use std::path::{Path, PathBuf};

/// One source video, opened for timing queries, frame lookup and remux export.
pub struct VideoSegment {
    path: PathBuf,
    input: format::context::Input,
    stream_index: usize,
    time_base: Rational,
    frame_period: f64,
    frame_count: usize,
    width: u32,
    height: u32,
}

impl VideoSegment {
    pub fn open(path: &Path) -> Result<Self> {
        ffmpeg_next::init().context("Failed to initialize FFmpeg")?;

        if !path.exists() {
            return Err(anyhow!("Video file not found: {:?}", path));
        }

        let input = format::input(&path)
            .with_context(|| format!("Failed to open video file {:?}", path))?;

        let stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| anyhow!("No video stream found in {:?}", path))?;

        let stream_index = stream.index();
        let time_base = stream.time_base();
        let frame_rate = guess_frame_rate(
            positive_rate(stream.rate()),
            positive_rate(stream.avg_frame_rate()),
        )
        .ok_or_else(|| anyhow!("Could not determine the frame rate of {:?}", path))?;
        let frame_period = frame_period(frame_rate)?;

        let stream_frames = stream.frames().max(0) as usize;
        let duration_secs = input.duration() as f64 / ffi::AV_TIME_BASE as f64;
        let frame_count = if stream_frames == 0 {
            (duration_secs / frame_period).round() as usize
        } else {
            stream_frames
        };

        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .context("Failed to create decoder context")?
            .decoder()
            .video()
            .context("Failed to open video decoder")?;
        let (width, height) = (decoder.width(), decoder.height());

        tracing::debug!(
            "VideoSegment: opened {:?}, {}x{}, fps={:.2}, stream_frames={}, frame_count={}",
            path,
            width,
            height,
            frame_rate,
            stream_frames,
            frame_count
        );

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            time_base,
            frame_period,
            frame_count,
            width,
            height,
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Rounded frame rate, the reciprocal of the frame period.
    pub fn frame_rate(&self) -> f64 {
        1.0 / self.frame_period
    }

    /// Presentation time of frame `index`, in the stream's time base.
    fn offset_of(&self, index: usize) -> Result<i64> {
        let tb = time_base_secs(self.time_base)?;
        Ok((index as f64 * self.frame_period / tb).round() as i64)
    }

    /// Seeks to the random-access point at or before frame `index`.
    /// Returns the frame's presentation time in stream units.
    fn seek(&mut self, index: usize) -> Result<i64> {
        let offset = self.offset_of(index)?;
        let time_secs = index as f64 * self.frame_period;
        let timestamp = (time_secs * ffi::AV_TIME_BASE as f64) as i64;
        self.input
            .seek(timestamp, ..timestamp)
            .with_context(|| format!("Failed to seek {:?} to frame {}", self.path, index))?;
        Ok(offset)
    }

    /// Decodes frame `index` as a BGR image.
    pub fn frame_at(&mut self, index: usize) -> Result<Mat> {
        let offset = match self.seek(index) {
            Ok(offset) => offset,
            Err(e) => {
                tracing::debug!("VideoSegment: {:#}", e);
                return Err(self.frame_not_found(index));
            }
        };

        let parameters = self
            .input
            .stream(self.stream_index)
            .ok_or_else(|| anyhow!("Video stream vanished from {:?}", self.path))?
            .parameters();
        let mut decoder = codec::context::Context::from_parameters(parameters)
            .context("Failed to create decoder context")?
            .decoder()
            .video()
            .context("Failed to open video decoder")?;

        let mut packet = Packet::empty();
        let mut decoded = frame::Video::empty();
        let mut eof_sent = false;

        loop {
            while decoder.receive_frame(&mut decoded).is_ok() {
                if decoded.pts().is_some_and(|pts| pts >= offset) {
                    return to_bgr(&decoded);
                }
            }

            if eof_sent {
                break;
            }

            let mut found_packet = false;
            while packet.read(&mut self.input).is_ok() {
                if packet.stream() == self.stream_index {
                    decoder
                        .send_packet(&packet)
                        .context("Failed to send packet to decoder")?;
                    found_packet = true;
                    break;
                }
            }

            if !found_packet {
                decoder.send_eof().context("Failed to send EOF to decoder")?;
                eof_sent = true;
            }
        }

        Err(self.frame_not_found(index))
    }

    fn frame_not_found(&self, index: usize) -> anyhow::Error {
        SyncError::FrameNotFound {
            index,
            path: self.path.clone(),
            frame_count: self.frame_count,
        }
        .into()
    }

    /// Remuxes frames `[frame_start, frame_end]` into `target`, rebased to start at zero.
    /// Returns the number of packets written.
    pub fn save(mut self, target: &Path, frame_start: usize, frame_end: Option<usize>) -> Result<usize> {
        let frame_end = frame_end.unwrap_or(self.frame_count);
        let end_offset = self.offset_of(frame_end)?;

        let mut octx = format::output(&target)
            .with_context(|| format!("Failed to create output container {:?}", target))?;

        {
            let ist = self
                .input
                .stream(self.stream_index)
                .ok_or_else(|| anyhow!("Video stream vanished from {:?}", self.path))?;
            let mut ost = octx
                .add_stream(encoder::find(codec::Id::None))
                .context("Failed to add output stream")?;
            ost.set_parameters(ist.parameters());
            ost.set_time_base(self.time_base);
            // Let the muxer pick a tag valid for the target container.
            unsafe {
                (*ost.parameters().as_mut_ptr()).codec_tag = 0;
            }
        }

        octx.write_header()
            .with_context(|| format!("Failed to write header of {:?}", target))?;
        let ost_time_base = octx
            .stream(0)
            .ok_or_else(|| anyhow!("Output stream missing in {:?}", target))?
            .time_base();

        self.seek(frame_start)?;

        let mut origin: Option<(i64, i64)> = None;
        let mut written = 0;
        let mut packet = Packet::empty();
        while packet.read(&mut self.input).is_ok() {
            if packet.stream() != self.stream_index {
                continue;
            }

            // Flush markers carry no decode timestamp.
            let Some(dts) = packet.dts() else {
                continue;
            };
            let pts = packet.pts().unwrap_or(dts);

            if pts > end_offset {
                break;
            }

            let (dts_0, pts_0) = *origin.get_or_insert((dts, pts));
            packet.set_dts(Some(dts - dts_0));
            packet.set_pts(Some(pts - pts_0));
            packet.set_stream(0);
            packet.set_position(-1);
            packet.rescale_ts(self.time_base, ost_time_base);
            packet
                .write_interleaved(&mut octx)
                .with_context(|| format!("Failed to mux packet into {:?}", target))?;
            written += 1;
        }

        octx.write_trailer()
            .with_context(|| format!("Failed to finalize {:?}", target))?;

        tracing::debug!(
            "Exported frames {}..={} of {:?} to {:?} ({} packets)",
            frame_start,
            frame_end,
            self.path,
            target,
            written
        );

        Ok(written)
    }
}

impl Clip for VideoSegment {
    fn frame_period(&self) -> f64 {
        self.frame_period
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn export(self, target: &Path, frame_start: usize, frame_end: Option<usize>) -> Result<()> {
        self.save(target, frame_start, frame_end).map(|_| ())
    }
}

impl std::fmt::Debug for VideoSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.path)
    }
}

fn to_bgr(decoded: &frame::Video) -> Result<Mat> {
    let mut scaler = scaling::Context::get(
        decoded.format(),
        decoded.width(),
        decoded.height(),
        format::Pixel::BGR24,
        decoded.width(),
        decoded.height(),
        scaling::Flags::BILINEAR,
    )
    .context("Failed to create scaler")?;

    let mut bgr = frame::Video::empty();
    scaler.run(decoded, &mut bgr).context("Scaler failed")?;
    bgr_frame_to_mat(&bgr)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::video::encoder::{EncoderConfig, GridEncoder};
    use opencv::{core, prelude::*};

    /// Video packets of a container in file order: `(dts, pts, keyframe)`, in stream units.
    pub(crate) fn packet_timestamps(path: &Path) -> Vec<(i64, i64, bool)> {
        let mut input = format::input(&path).unwrap();
        let stream_index = input.streams().best(media::Type::Video).unwrap().index();

        let mut packets = Vec::new();
        let mut packet = Packet::empty();
        while packet.read(&mut input).is_ok() {
            if packet.stream() != stream_index {
                continue;
            }
            if let Some(dts) = packet.dts() {
                packets.push((dts, packet.pts().unwrap_or(dts), packet.is_key()));
            }
        }
        packets
    }

    /// The packets an export of `[frame_start, frame_end]` must carry: from the
    /// last keyframe at or before `frame_start` through the last packet
    /// presented no later than `frame_end`, rebased to the first one.
    fn expected_export(
        source: &[(i64, i64, bool)],
        frame_start: usize,
        frame_end: usize,
    ) -> Vec<(i64, i64)> {
        let mut presentation: Vec<i64> = source.iter().map(|p| p.1).collect();
        presentation.sort();
        let start_pts = presentation[frame_start];
        let end_pts = presentation.get(frame_end).copied().unwrap_or(i64::MAX);

        let k0 = source
            .iter()
            .rposition(|p| p.2 && p.1 <= start_pts)
            .unwrap();
        let (dts_0, pts_0, _) = source[k0];
        source[k0..]
            .iter()
            .take_while(|p| p.1 <= end_pts)
            .map(|p| (p.0 - dts_0, p.1 - pts_0))
            .collect()
    }

    /// Writes a small synthetic MPEG-4 clip whose frames all have a distinct grey level.
    pub(crate) fn write_test_clip(path: &Path, frames: usize, fps: i32) {
        let config = EncoderConfig {
            fps,
            bit_rate: 400_000,
            codec: codec::Id::MPEG4,
            gop_size: Some(5),
        };
        let mut encoder = GridEncoder::create(path, 64, 48, &config).unwrap();
        for k in 0..frames {
            let level = (k * 8 % 256) as f64;
            let canvas = core::Mat::new_rows_cols_with_default(
                48,
                64,
                core::CV_8UC3,
                core::Scalar::all(level),
            )
            .unwrap();
            encoder.push(&canvas).unwrap();
        }
        encoder.finish().unwrap();
    }

    #[test]
    fn open_reports_rate_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        write_test_clip(&path, 30, 15);

        let segment = VideoSegment::open(&path).unwrap();
        assert_eq!(segment.frame_count(), 30);
        assert!((segment.frame_period() - 1.0 / 15.0).abs() < 1e-9);
        assert_eq!((segment.width(), segment.height()), (64, 48));
    }

    #[test]
    fn export_rebases_timestamps_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let target = dir.path().join("trimmed.mp4");
        write_test_clip(&source, 30, 15);

        let segment = VideoSegment::open(&source).unwrap();
        let written = segment.save(&target, 12, Some(20)).unwrap();

        let exported: Vec<(i64, i64)> = packet_timestamps(&target)
            .into_iter()
            .map(|(dts, pts, _)| (dts, pts))
            .collect();
        assert_eq!(exported.len(), written);
        assert_eq!(exported[0], (0, 0));
        assert_eq!(exported, expected_export(&packet_timestamps(&source), 12, 20));
        // At least frames 12..=20.
        assert!(written >= 9);
    }

    #[test]
    fn open_ended_export_runs_to_the_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let target = dir.path().join("tail.mp4");
        write_test_clip(&source, 30, 15);

        let segment = VideoSegment::open(&source).unwrap();
        let written = segment.save(&target, 25, None).unwrap();

        let exported: Vec<(i64, i64)> = packet_timestamps(&target)
            .into_iter()
            .map(|(dts, pts, _)| (dts, pts))
            .collect();
        assert_eq!(exported, expected_export(&packet_timestamps(&source), 25, 30));
        assert!(written >= 5);
    }

    #[test]
    fn export_stops_after_end_frame() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let target = dir.path().join("head.mp4");
        write_test_clip(&source, 30, 15);

        let segment = VideoSegment::open(&source).unwrap();
        let written = segment.save(&target, 0, Some(9)).unwrap();
        // Frames 0..=9 are retained.
        assert_eq!(written, 10);
    }

    #[test]
    fn frame_lookup_past_the_end_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        write_test_clip(&path, 10, 15);

        let mut segment = VideoSegment::open(&path).unwrap();
        let frame = segment.frame_at(3).unwrap();
        assert_eq!((frame.cols(), frame.rows()), (64, 48));

        let err = segment.frame_at(40).unwrap_err();
        match err.downcast_ref::<SyncError>() {
            Some(SyncError::FrameNotFound { index, frame_count, .. }) => {
                assert_eq!(*index, 40);
                assert_eq!(*frame_count, 10);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
