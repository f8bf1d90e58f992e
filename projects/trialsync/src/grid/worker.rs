// Decode worker: pulls frames from one source and hands them to the compositor

use crate::video::FrameSource;
use anyhow::Result;
use crossbeam::channel::Sender;
use opencv::core::Mat;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Builds a worker's frame source. It runs on the worker thread, so decoder
/// state never has to cross threads.
pub type SourceFactory = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>> + Send>;

/// `Some(frame)` carries the next frame, `None` is the end-of-stream sentinel.
pub type FrameMessage = Option<Mat>;

/// Sends every frame of the source, then the sentinel. Returns the number of
/// frames delivered. Returns early, without error, once the receiver is gone
/// or `stop` is raised.
pub fn decode_worker(
    source_index: usize,
    factory: SourceFactory,
    tx: Sender<FrameMessage>,
    stop: Arc<AtomicBool>,
) -> Result<usize> {
    let mut source = factory()?;
    let mut delivered = 0;

    loop {
        if stop.load(Ordering::Relaxed) {
            tracing::debug!("Decode worker #{} stopped after {} frames", source_index, delivered);
            return Ok(delivered);
        }

        match source.next_frame()? {
            Some(frame) => {
                // Blocks while the compositor still holds the previous frame.
                if tx.send(Some(frame)).is_err() {
                    return Ok(delivered); // Receiver closed
                }
                delivered += 1;
            }
            None => {
                let _ = tx.send(None);
                return Ok(delivered);
            }
        }
    }
}

/// Runs [`decode_worker`] on its own detached thread. A failing worker drops
/// its sender without the sentinel, which the compositor sees as a disconnect.
pub fn spawn_decode_worker(
    source_index: usize,
    factory: SourceFactory,
    tx: Sender<FrameMessage>,
    stop: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        tracing::debug!("Spawning decode worker #{}", source_index);
        match decode_worker(source_index, factory, tx, stop) {
            Ok(frames) => {
                tracing::debug!("Decode worker #{} finished ({} frames)", source_index, frames)
            }
            Err(e) => tracing::error!("Decode worker #{} failed: {:#}", source_index, e),
        }
    });
}
