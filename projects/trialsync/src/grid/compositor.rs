use super::layout::GridLayout;
use super::worker::{spawn_decode_worker, FrameMessage, SourceFactory};
use crate::dataset::CollisionEvent;
use crate::error::SyncError;
use anyhow::{anyhow, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use opencv::core::{Mat, Rect, Scalar, CV_8UC3};
use opencv::{imgproc, prelude::*};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Border colour (BGR) of canvases whose collision event is flagged.
pub const COLLIDED_BGR: (f64, f64, f64) = (0.0, 0.0, 255.0);
/// Border colour (BGR) of canvases whose collision event is clear.
pub const CLEAR_BGR: (f64, f64, f64) = (255.0, 0.0, 0.0);

#[derive(Debug, Clone)]
pub struct CompositorConfig {
    /// Longest wait for one decoder's next frame before the run is aborted.
    pub timeout: Duration,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
        }
    }
}

/// Background for a canvas: the collision colour while events last, black after.
pub fn background(event: Option<&CollisionEvent>) -> Scalar {
    let (b, g, r) = match event {
        Some(event) if event.collided => COLLIDED_BGR,
        Some(_) => CLEAR_BGR,
        None => return Scalar::all(0.0),
    };
    Scalar::new(b, g, r, 0.0)
}

/// Lazily produced sequence of grid canvases.
///
/// One decode worker per source feeds a capacity-1 channel. Each tick takes
/// at most one frame from every live source and tiles it into its cell; a
/// source that sent its sentinel leaves a black cell. The sequence ends on
/// the first tick where no source is live. Dropping the compositor stops the
/// workers without waiting for them.
pub struct GridCompositor {
    layout: GridLayout,
    /// `None` once the source has sent its sentinel.
    channels: Vec<Option<Receiver<FrameMessage>>>,
    collisions: std::vec::IntoIter<CollisionEvent>,
    timeout: Duration,
    stop: Arc<AtomicBool>,
    done: bool,
    produced: usize,
}

impl GridCompositor {
    pub fn start(
        layout: GridLayout,
        sources: Vec<SourceFactory>,
        collisions: Vec<CollisionEvent>,
        config: &CompositorConfig,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(SyncError::NoSources.into());
        }
        if sources.len() > layout.cells() {
            return Err(anyhow!(
                "{} sources do not fit a {}x{} grid",
                sources.len(),
                layout.rows,
                layout.cols
            ));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let mut channels = Vec::with_capacity(sources.len());
        for (index, factory) in sources.into_iter().enumerate() {
            let (tx, rx) = channel::bounded(1);
            spawn_decode_worker(index, factory, tx, stop.clone());
            channels.push(Some(rx));
        }

        tracing::info!(
            "GridCompositor: {} sources on a {}x{} grid ({}x{} canvas)",
            channels.len(),
            layout.rows,
            layout.cols,
            layout.width,
            layout.height
        );

        Ok(Self {
            layout,
            channels,
            collisions: collisions.into_iter(),
            timeout: config.timeout,
            stop,
            done: false,
            produced: 0,
        })
    }

    /// Builds the next canvas, or `None` when every source is exhausted.
    fn compose(&mut self) -> Result<Option<Mat>> {
        let event = self.collisions.next();
        let mut canvas = Mat::new_rows_cols_with_default(
            self.layout.height,
            self.layout.width,
            CV_8UC3,
            background(event.as_ref()),
        )?;

        let mut live = false;
        for k in 0..self.layout.cells() {
            let cell = self.layout.cell_rect(k);
            imgproc::rectangle(
                &mut canvas,
                cell,
                Scalar::all(0.0),
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )?;

            let Some(slot) = self.channels.get_mut(k) else {
                continue; // No source for this cell
            };
            let Some(rx) = slot.as_ref() else {
                continue; // Source exhausted
            };

            let message = rx.recv_timeout(self.timeout);
            match message {
                Ok(Some(frame)) => {
                    blit(&mut canvas, &frame, cell)?;
                    live = true;
                }
                Ok(None) => *slot = None,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SyncError::ChannelTimeout {
                        source_index: k,
                        waited: self.timeout,
                    }
                    .into())
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SyncError::WorkerDisconnected { source_index: k }.into())
                }
            }
        }

        Ok(live.then_some(canvas))
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Dropping the receivers unblocks workers stuck in `send`.
        self.channels.clear();
    }
}

impl Iterator for GridCompositor {
    type Item = Result<Mat>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.compose() {
            Ok(Some(canvas)) => {
                self.produced += 1;
                Some(Ok(canvas))
            }
            Ok(None) => {
                tracing::debug!("GridCompositor: all sources exhausted after {} canvases", self.produced);
                self.done = true;
                self.shutdown();
                None
            }
            Err(e) => {
                self.done = true;
                self.shutdown();
                Some(Err(e))
            }
        }
    }
}

impl Drop for GridCompositor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Copies `image` into `cell`, cropping whatever does not fit.
fn blit(canvas: &mut Mat, image: &Mat, cell: Rect) -> Result<()> {
    if image.typ() != CV_8UC3 {
        return Err(anyhow!("Expected an 8-bit BGR frame, got Mat type {}", image.typ()));
    }
    let cols = image.cols().min(cell.width);
    let rows = image.rows().min(cell.height);
    if cols <= 0 || rows <= 0 {
        return Ok(());
    }

    let src = Mat::roi(image, Rect::new(0, 0, cols, rows))?;
    let mut dst = Mat::roi_mut(canvas, Rect::new(cell.x, cell.y, cols, rows))?;
    src.copy_to(&mut *dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::worker::tests::{factory, SolidSource};
    use crate::video::FrameSource;
    use opencv::core::Vec3b;
    use std::sync::atomic::AtomicUsize;

    fn pixel(canvas: &Mat, x: i32, y: i32) -> (u8, u8, u8) {
        let p = canvas.at_2d::<Vec3b>(y, x).unwrap();
        (p[0], p[1], p[2])
    }

    fn events(flags: &[bool]) -> Vec<CollisionEvent> {
        flags
            .iter()
            .enumerate()
            .map(|(i, &collided)| CollisionEvent {
                frame_index: i as i64,
                collided,
            })
            .collect()
    }

    #[test]
    fn runs_until_the_longest_source_ends() {
        let layout = GridLayout::new(2, 41, 22).unwrap();
        let sources = vec![
            factory(SolidSource::new(vec![10.0; 3], 19, 20)),
            factory(SolidSource::new(vec![20.0; 5], 19, 20)),
        ];
        let compositor =
            GridCompositor::start(layout, sources, events(&[true, false]), &CompositorConfig::default())
                .unwrap();

        let canvases: Vec<Mat> = compositor.map(|c| c.unwrap()).collect();
        assert_eq!(canvases.len(), 5);

        let (a_x, a_y) = layout.cell_origin(0);
        let (b_x, b_y) = layout.cell_origin(1);
        for (t, canvas) in canvases.iter().enumerate() {
            assert_eq!((canvas.cols(), canvas.rows()), (41, 22));
            let expected_a = if t < 3 { (10, 10, 10) } else { (0, 0, 0) };
            assert_eq!(pixel(canvas, a_x, a_y), expected_a);
            assert_eq!(pixel(canvas, b_x, b_y), (20, 20, 20));
        }

        assert_eq!(pixel(&canvases[0], 0, 0), (0, 0, 255));
        assert_eq!(pixel(&canvases[1], 0, 0), (255, 0, 0));
        // Collision log exhausted.
        assert_eq!(pixel(&canvases[2], 0, 0), (0, 0, 0));
    }

    #[test]
    fn empty_cells_stay_black() {
        let layout = GridLayout::new(3, 40, 40).unwrap();
        let sources = (0..3)
            .map(|_| factory(SolidSource::new(vec![50.0], 8, 8)))
            .collect();
        let mut compositor =
            GridCompositor::start(layout, sources, events(&[true]), &CompositorConfig::default())
                .unwrap();

        let canvas = compositor.next().unwrap().unwrap();
        let (x, y) = layout.cell_origin(3);
        assert_eq!(pixel(&canvas, x, y), (0, 0, 0));
        assert_eq!(pixel(&canvas, x + 10, y + 10), (0, 0, 0));
        assert!(compositor.next().is_none());
    }

    #[test]
    fn oversized_frames_are_cropped_to_the_cell() {
        let layout = GridLayout::new(1, 12, 12).unwrap();
        let sources = vec![factory(SolidSource::new(vec![70.0], 30, 30))];
        let mut compositor =
            GridCompositor::start(layout, sources, events(&[true]), &CompositorConfig::default())
                .unwrap();

        let canvas = compositor.next().unwrap().unwrap();
        assert_eq!(pixel(&canvas, 1, 1), (70, 70, 70));
        assert_eq!(pixel(&canvas, 10, 10), (70, 70, 70));
        // The border keeps the background colour.
        assert_eq!(pixel(&canvas, 11, 11), (0, 0, 255));
    }

    struct StalledSource;

    impl FrameSource for StalledSource {
        fn next_frame(&mut self) -> Result<Option<Mat>> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(None)
        }
    }

    #[test]
    fn slow_decoders_time_out() {
        let layout = GridLayout::new(1, 20, 20).unwrap();
        let stalled: SourceFactory =
            Box::new(|| -> Result<Box<dyn FrameSource>> { Ok(Box::new(StalledSource)) });
        let config = CompositorConfig {
            timeout: Duration::from_millis(50),
        };
        let mut compositor = GridCompositor::start(layout, vec![stalled], Vec::new(), &config).unwrap();

        let err = compositor.next().unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::ChannelTimeout { source_index: 0, .. })
        ));
        assert!(compositor.next().is_none());
    }

    #[test]
    fn failed_decoders_disconnect() {
        let layout = GridLayout::new(2, 40, 20).unwrap();
        let mut broken = SolidSource::new(vec![1.0, 2.0, 3.0], 8, 8);
        broken.fail_at = Some(1);
        let sources = vec![
            factory(SolidSource::new(vec![5.0; 4], 8, 8)),
            factory(broken),
        ];
        let results: Vec<Result<Mat>> =
            GridCompositor::start(layout, sources, Vec::new(), &CompositorConfig::default())
                .unwrap()
                .collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::WorkerDisconnected { source_index: 1 })
        ));
    }

    #[test]
    fn dropping_early_releases_workers() {
        let layout = GridLayout::new(1, 20, 20).unwrap();
        let sources = vec![factory(SolidSource::new(vec![1.0; 1000], 8, 8))];
        let mut compositor =
            GridCompositor::start(layout, sources, Vec::new(), &CompositorConfig::default())
                .unwrap();
        assert!(compositor.next().unwrap().is_ok());
        drop(compositor);
    }

    struct CountingSource {
        inner: SolidSource,
        calls: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingSource {
        fn next_frame(&mut self) -> Result<Option<Mat>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.next_frame()
        }
    }

    #[test]
    fn workers_stay_at_most_one_frame_ahead() {
        let layout = GridLayout::new(1, 20, 20).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let source: SourceFactory = Box::new(move || -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(CountingSource {
                inner: SolidSource::new(vec![9.0; 100], 8, 8),
                calls: counted,
            }))
        });
        let mut compositor =
            GridCompositor::start(layout, vec![source], Vec::new(), &CompositorConfig::default())
                .unwrap();

        for consumed in 1..=3 {
            assert!(compositor.next().unwrap().is_ok());
            std::thread::sleep(Duration::from_millis(100));
            // One frame waiting in the channel, one held by a blocked `send`.
            let decoded = calls.load(Ordering::SeqCst);
            assert!(decoded <= consumed + 2, "decoded {} after {} canvases", decoded, consumed);
            assert!(decoded > consumed);
        }
    }

    #[test]
    fn rejects_empty_source_list() {
        let layout = GridLayout::new(1, 20, 20).unwrap();
        let result = GridCompositor::start(layout, Vec::new(), Vec::new(), &CompositorConfig::default());
        assert!(result.is_err());
    }
}
