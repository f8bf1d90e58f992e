use super::compositor::{CompositorConfig, GridCompositor};
use super::layout::GridLayout;
use super::pacer::Pacer;
use super::worker::SourceFactory;
use crate::dataset::collisions::read_collisions;
use crate::dataset::CollisionEvent;
use crate::error::SyncError;
use crate::run_context::list_videos;
use crate::video::decoder::FfmpegDecoder;
use crate::video::encoder::{EncoderConfig, GridEncoder};
use crate::video::processor::{process_frames, progress_bar, FrameSink, ProcessingStats};
use crate::video::segment::VideoSegment;
use crate::video::FrameSource;
use anyhow::{anyhow, Context, Result};
use opencv::core::Mat;
use opencv::highgui;
use std::path::{Path, PathBuf};

/// A set of videos played side by side, optionally over a collision log.
#[derive(Debug, Clone)]
pub struct VideoGrid {
    paths: Vec<PathBuf>,
    collisions: Vec<CollisionEvent>,
    layout: GridLayout,
    /// Display rate for paced playback.
    fps: f64,
}

impl VideoGrid {
    /// Opens a consolidated trial directory: its videos in file-name order and
    /// its `collisions.csv`. The canvas takes the first video's size and the
    /// display rate its rounded frame rate. The first frame is decoded up
    /// front, so an unreadable trial fails before any worker starts.
    pub fn open_trial(trial_dir: &Path) -> Result<Self> {
        let paths = list_videos(trial_dir)?;
        let first = paths.first().ok_or(SyncError::NoSources)?;
        let mut first_clip = VideoSegment::open(first)?;
        first_clip
            .frame_at(0)
            .with_context(|| format!("Cannot decode the first frame of {:?}", first))?;

        let collisions_path = trial_dir.join("collisions.csv");
        let collisions = if collisions_path.exists() {
            read_collisions(&collisions_path)?
        } else {
            tracing::warn!("No collision log in {:?}", trial_dir);
            Vec::new()
        };

        let layout = GridLayout::new(
            paths.len(),
            first_clip.width() as i32,
            first_clip.height() as i32,
        )?;
        tracing::info!(
            "Trial grid {:?}: {} videos, {} collision events, {:.0} fps",
            trial_dir,
            paths.len(),
            collisions.len(),
            first_clip.frame_rate().round()
        );

        Ok(Self {
            paths,
            collisions,
            layout,
            fps: first_clip.frame_rate().round(),
        })
    }

    /// Grid over arbitrary files at an explicit canvas size, without collisions.
    pub fn from_files(paths: Vec<PathBuf>, width: i32, height: i32, fps: f64) -> Result<Self> {
        let layout = GridLayout::new(paths.len(), width, height)?;
        Ok(Self {
            paths,
            collisions: Vec::new(),
            layout,
            fps,
        })
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Starts decoding and returns the lazy canvas sequence.
    pub fn play(&self, config: &CompositorConfig) -> Result<GridCompositor> {
        let width = self.layout.cell_width as u32;
        let height = self.layout.cell_height as u32;
        let sources: Vec<SourceFactory> = self
            .paths
            .iter()
            .cloned()
            .map(|path| -> SourceFactory {
                Box::new(move || -> Result<Box<dyn FrameSource>> {
                    let decoder = FfmpegDecoder::open(&path, width, height)?;
                    Ok(Box::new(decoder) as Box<dyn FrameSource>)
                })
            })
            .collect();

        GridCompositor::start(self.layout, sources, self.collisions.clone(), config)
    }

    /// Streams canvases to `surface` at the grid's frame rate.
    pub fn show<S: FrameSink>(&self, surface: S, config: &CompositorConfig) -> Result<ProcessingStats> {
        let stats = process_frames(self.play(config)?, surface, Some(Pacer::new(self.fps)), None)?;
        tracing::info!(
            "Displayed {} canvases in {:.1}s",
            stats.processed_frames,
            stats.duration.as_secs_f64()
        );
        Ok(stats)
    }

    /// Encodes every canvas, unpaced, into a new video at `path`.
    pub fn save(
        &self,
        path: &Path,
        encoder_config: &EncoderConfig,
        config: &CompositorConfig,
    ) -> Result<usize> {
        let mut encoder = GridEncoder::create(
            path,
            self.layout.width as u32,
            self.layout.height as u32,
            encoder_config,
        )?;
        let stats = process_frames(
            self.play(config)?,
            |canvas: &Mat| -> Result<()> { encoder.push(canvas) },
            None,
            Some(progress_bar(0)?),
        )
        .with_context(|| format!("Grid export to {:?} aborted", path))?;

        let frames = encoder.finish()?;
        tracing::info!(
            "Encoded {} canvases into {:?} in {:.1}s",
            stats.processed_frames,
            path,
            stats.duration.as_secs_f64()
        );
        Ok(frames)
    }
}

/// An OpenCV window that displays each canvas as it arrives.
pub struct HighguiWindow {
    name: String,
}

impl HighguiWindow {
    pub fn open(name: &str, width: i32, height: i32) -> Result<Self> {
        highgui::named_window(
            name,
            highgui::WINDOW_NORMAL | highgui::WINDOW_KEEPRATIO | highgui::WINDOW_GUI_EXPANDED,
        )
        .map_err(|e| anyhow!("Failed to open window {}: {}", name, e))?;
        highgui::resize_window(name, width, height)?;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl FrameSink for HighguiWindow {
    fn consume(&mut self, canvas: &Mat) -> Result<()> {
        highgui::imshow(&self.name, canvas)?;
        highgui::wait_key(1)?;
        Ok(())
    }
}

impl Drop for HighguiWindow {
    fn drop(&mut self) {
        let _ = highgui::destroy_window(&self.name);
    }
}
