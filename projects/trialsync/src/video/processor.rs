use crate::grid::pacer::Pacer;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use opencv::core::Mat;
use std::time::{Duration, Instant};

pub struct ProcessingStats {
    pub processed_frames: usize,
    pub duration: Duration,
}

/// A consumer of composited canvases. This separates "where frames go"
/// (a window, an encoder) from "how they are produced".
pub trait FrameSink {
    fn consume(&mut self, canvas: &Mat) -> Result<()>;
}

/// Blanket implementation so any closure with the right signature
/// automatically implements FrameSink.
impl<F> FrameSink for F
where
    F: FnMut(&Mat) -> Result<()>,
{
    fn consume(&mut self, canvas: &Mat) -> Result<()> {
        self(canvas)
    }
}

/// Feeds every canvas of `frames` into `sink`, optionally paced to real time.
/// The first error, from either side, aborts the run.
pub fn process_frames<I, S>(
    frames: I,
    mut sink: S,
    mut pacer: Option<Pacer>,
    pb: Option<ProgressBar>,
) -> Result<ProcessingStats>
where
    I: IntoIterator<Item = Result<Mat>>,
    S: FrameSink,
{
    let start_time = Instant::now();
    let mut processed_frames = 0;

    for canvas in frames {
        let canvas = canvas?;
        sink.consume(&canvas)?;
        processed_frames += 1;

        if let Some(pb) = &pb {
            pb.inc(1);
        }
        if let Some(pacer) = pacer.as_mut() {
            pacer.wait();
        }
    }

    if let Some(pb) = &pb {
        pb.finish_with_message("Done");
    }

    Ok(ProcessingStats {
        processed_frames,
        duration: start_time.elapsed(),
    })
}

/// Progress bar in the house style; `len` of zero gives an open-ended spinner.
pub fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = if len == 0 {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::new(len)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow}, {eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}
