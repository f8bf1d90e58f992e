use super::{bgr_frame_to_mat, FrameSource};
use anyhow::{anyhow, Context, Result};
use ffmpeg_next::{codec, ffi, format, media, software::scaling, util::frame, Packet};
use opencv::core::Mat;
use std::path::{Path, PathBuf};

/// Sequential FFmpeg decoder that hands out every frame rescaled to a fixed size.
/// One instance lives inside each grid decode worker.
pub struct FfmpegDecoder {
    path: PathBuf,
    input_ctx: format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    video_stream_index: usize,
    /// Lazily created on first frame (source format is only known then).
    scaler: Option<scaling::Context>,
    width: u32,
    height: u32,
    /// Persistent packet object to avoid allocations.
    reuse_packet: Packet,
    /// Whether we've sent EOF to the decoder.
    eof_sent: bool,
    frames_decoded: usize,
}

impl FfmpegDecoder {
    pub fn open(path: &Path, width: u32, height: u32) -> Result<Self> {
        ffmpeg_next::init().context("Failed to initialize FFmpeg")?;

        if width == 0 || height == 0 {
            return Err(anyhow!("Cannot scale {:?} to {}x{}", path, width, height));
        }

        let input_ctx = format::input(&path)
            .with_context(|| format!("Failed to open video file {:?}", path))?;

        let video_stream = input_ctx
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| anyhow!("No video stream found in {:?}", path))?;
        let video_stream_index = video_stream.index();

        let decoder = codec::context::Context::from_parameters(video_stream.parameters())
            .context("Failed to create decoder context")?
            .decoder()
            .video()
            .context("Failed to open video decoder")?;

        tracing::debug!(
            "FfmpegDecoder: opened {:?} ({}x{}), scaling to {}x{}",
            path,
            decoder.width(),
            decoder.height(),
            width,
            height
        );

        Ok(Self {
            path: path.to_path_buf(),
            input_ctx,
            decoder,
            video_stream_index,
            scaler: None,
            width,
            height,
            reuse_packet: Packet::empty(),
            eof_sent: false,
            frames_decoded: 0,
        })
    }

    /// Retrieves the next decoded frame. Returns `Ok(false)` once the stream is drained.
    fn decode_loop(&mut self, target_frame: &mut frame::Video) -> Result<bool> {
        loop {
            // 1. Try to receive a decoded frame
            match self.decoder.receive_frame(target_frame) {
                Ok(()) => return Ok(true),
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN }) => {
                    if self.eof_sent {
                        return Ok(false);
                    }
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(false),
                Err(e) => return Err(anyhow!("Decoder error in {:?}: {}", self.path, e)),
            }

            // 2. Feed packets until we find a video packet OR reach EOF
            let mut found_packet = false;
            while self.reuse_packet.read(&mut self.input_ctx).is_ok() {
                if self.reuse_packet.stream() == self.video_stream_index {
                    self.decoder
                        .send_packet(&self.reuse_packet)
                        .context("Failed to send packet to decoder")?;
                    found_packet = true;
                    break;
                }
            }

            if !found_packet {
                // EOF reached in input file, let the decoder flush
                self.decoder
                    .send_eof()
                    .context("Failed to send EOF to decoder")?;
                self.eof_sent = true;
            }
        }
    }

    fn get_or_create_scaler(&mut self, source: &frame::Video) -> Result<&mut scaling::Context> {
        if self.scaler.is_none() {
            let scaler = scaling::Context::get(
                source.format(),
                source.width(),
                source.height(),
                format::Pixel::BGR24,
                self.width,
                self.height,
                scaling::Flags::BILINEAR,
            )
            .context("Failed to create scaler")?;
            self.scaler = Some(scaler);
        }
        self.scaler
            .as_mut()
            .ok_or_else(|| anyhow!("Scaler unavailable"))
    }
}

impl FrameSource for FfmpegDecoder {
    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let mut raw_frame = frame::Video::empty();
        if !self.decode_loop(&mut raw_frame)? {
            tracing::debug!(
                "FfmpegDecoder: {:?} exhausted after {} frames",
                self.path,
                self.frames_decoded
            );
            return Ok(None);
        }

        let mut scaled = frame::Video::empty();
        self.get_or_create_scaler(&raw_frame)?
            .run(&raw_frame, &mut scaled)
            .context("Scaler failed")?;
        self.frames_decoded += 1;

        bgr_frame_to_mat(&scaled).map(Some)
    }
}
