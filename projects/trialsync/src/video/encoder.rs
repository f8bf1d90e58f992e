use super::mat_to_bgr_frame;
use anyhow::{anyhow, Context, Result};
use ffmpeg_next::{codec, encoder, format, software::scaling, util::frame, Packet, Rational};
use opencv::core::Mat;
use opencv::prelude::*;
use std::path::{Path, PathBuf};

/// Output stream settings for composited grid videos.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub fps: i32,
    /// Target bit rate in bits per second.
    pub bit_rate: usize,
    pub codec: codec::Id,
    pub gop_size: Option<u32>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            fps: 15,
            bit_rate: 512_000,
            codec: codec::Id::H264,
            gop_size: None,
        }
    }
}

/// Encodes BGR canvases into a new yuv420p video at a fixed frame rate.
/// Frames are not paced: timing lives entirely in the output timestamps.
pub struct GridEncoder {
    path: PathBuf,
    octx: format::context::Output,
    encoder: encoder::Video,
    scaler: scaling::Context,
    width: u32,
    height: u32,
    frame_time_base: Rational,
    stream_time_base: Rational,
    next_pts: i64,
}

impl GridEncoder {
    pub fn create(path: &Path, width: u32, height: u32, config: &EncoderConfig) -> Result<Self> {
        ffmpeg_next::init().context("Failed to initialize FFmpeg")?;

        if config.fps <= 0 {
            return Err(anyhow!("Invalid output frame rate: {}", config.fps));
        }

        let mut octx = format::output(&path)
            .with_context(|| format!("Failed to create output container {:?}", path))?;
        let global_header = octx
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER);

        let codec = encoder::find(config.codec)
            .ok_or_else(|| anyhow!("No encoder available for {:?}", config.codec))?;
        let frame_time_base = Rational::new(1, config.fps);

        let encoder = {
            let mut ost = octx.add_stream(codec).context("Failed to add video stream")?;

            let mut video = codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .context("Failed to create encoder context")?;
            video.set_width(width);
            video.set_height(height);
            video.set_format(format::Pixel::YUV420P);
            video.set_time_base(frame_time_base);
            video.set_frame_rate(Some(Rational::new(config.fps, 1)));
            video.set_bit_rate(config.bit_rate);
            if let Some(gop) = config.gop_size {
                video.set_gop(gop);
            }
            if global_header {
                video.set_flags(codec::flag::Flags::GLOBAL_HEADER);
            }

            let opened = video
                .open_as(codec)
                .with_context(|| format!("Failed to open {:?} encoder", config.codec))?;
            ost.set_parameters(&opened);
            ost.set_time_base(frame_time_base);
            opened
        };

        octx.write_header()
            .with_context(|| format!("Failed to write header of {:?}", path))?;
        // The muxer may adjust the stream time base while writing the header.
        let stream_time_base = octx
            .stream(0)
            .ok_or_else(|| anyhow!("Output stream missing in {:?}", path))?
            .time_base();

        let scaler = scaling::Context::get(
            format::Pixel::BGR24,
            width,
            height,
            format::Pixel::YUV420P,
            width,
            height,
            scaling::Flags::BILINEAR,
        )
        .context("Failed to create scaler")?;

        tracing::info!(
            "GridEncoder: writing {:?} ({}x{} @ {} fps, {} b/s)",
            path,
            width,
            height,
            config.fps,
            config.bit_rate
        );

        Ok(Self {
            path: path.to_path_buf(),
            octx,
            encoder,
            scaler,
            width,
            height,
            frame_time_base,
            stream_time_base,
            next_pts: 0,
        })
    }

    pub fn push(&mut self, canvas: &Mat) -> Result<()> {
        if canvas.cols() as u32 != self.width || canvas.rows() as u32 != self.height {
            return Err(anyhow!(
                "Canvas is {}x{}, encoder expects {}x{}",
                canvas.cols(),
                canvas.rows(),
                self.width,
                self.height
            ));
        }

        let bgr = mat_to_bgr_frame(canvas)?;
        let mut yuv = frame::Video::empty();
        self.scaler.run(&bgr, &mut yuv).context("Scaler failed")?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv)
            .context("Failed to send frame to encoder")?;
        self.write_pending()
    }

    fn write_pending(&mut self) -> Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(self.frame_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.octx)
                .with_context(|| format!("Failed to mux packet into {:?}", self.path))?;
        }
        Ok(())
    }

    /// Flushes the encoder and closes the container. Returns the number of frames encoded.
    pub fn finish(mut self) -> Result<usize> {
        self.encoder
            .send_eof()
            .context("Failed to send EOF to encoder")?;
        self.write_pending()?;
        self.octx
            .write_trailer()
            .with_context(|| format!("Failed to finalize {:?}", self.path))?;
        Ok(self.next_pts as usize)
    }
}
