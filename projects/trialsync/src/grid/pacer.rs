use std::time::{Duration, Instant};

/// Holds back a frame loop to a nominal rate. Deadlines are absolute
/// (`start + k / fps`), so a slow tick does not push back later ones.
#[derive(Debug, Clone)]
pub struct Pacer {
    start: Instant,
    period: Duration,
    tick: u32,
}

impl Pacer {
    /// A non-positive rate gives a pacer that never waits.
    pub fn new(fps: f64) -> Self {
        let period = if fps > 0.0 {
            Duration::from_secs_f64(1.0 / fps)
        } else {
            Duration::ZERO
        };
        Self {
            start: Instant::now(),
            period,
            tick: 0,
        }
    }

    pub fn deadline(&self, tick: u32) -> Instant {
        self.start + self.period * tick
    }

    /// Blocks until the deadline of the current tick, then advances to the next one.
    pub fn wait(&mut self) {
        let deadline = self.deadline(self.tick);
        let now = Instant::now();
        if deadline > now {
            spin_sleep::sleep(deadline - now);
        }
        self.tick += 1;
    }
}
