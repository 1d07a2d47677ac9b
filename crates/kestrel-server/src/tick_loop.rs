//! Fixed-rate tick scheduling for the dedicated server.
//!
//! Wall-clock time accumulates and is spent in whole ticks. A stalled frame
//! is clamped so the server accepts slowdown instead of replaying a long
//! backlog of ticks.

use std::time::{Duration, Instant};

use tracing::warn;

/// Longest stretch of wall-clock time one frame may account for.
pub const MAX_FRAME_TIME: Duration = Duration::from_millis(250);

pub struct TickClock {
    step: Duration,
    previous: Instant,
    accumulator: Duration,
    ticks: u64,
}

impl TickClock {
    pub fn new(ticks_per_second: u32) -> Self {
        Self {
            step: Duration::from_secs(1) / ticks_per_second.max(1),
            previous: Instant::now(),
            accumulator: Duration::ZERO,
            ticks: 0,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Measures elapsed time and calls `tick_fn` once per whole step.
    pub fn advance(&mut self, tick_fn: impl FnMut()) -> u32 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.previous);
        self.previous = now;
        self.advance_by(elapsed, tick_fn)
    }

    fn advance_by(&mut self, mut elapsed: Duration, mut tick_fn: impl FnMut()) -> u32 {
        if elapsed > MAX_FRAME_TIME {
            warn!(
                "Frame time {:.1}ms exceeds maximum, clamping to {:.1}ms",
                elapsed.as_secs_f64() * 1000.0,
                MAX_FRAME_TIME.as_secs_f64() * 1000.0
            );
            elapsed = MAX_FRAME_TIME;
        }
        self.accumulator += elapsed;

        let mut ran = 0;
        while self.accumulator >= self.step {
            tick_fn();
            self.accumulator -= self.step;
            self.ticks += 1;
            ran += 1;
        }
        ran
    }

    /// Time left until the next tick is due.
    pub fn until_next(&self) -> Duration {
        self.step.saturating_sub(self.accumulator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_length() {
        assert_eq!(TickClock::new(50).step(), Duration::from_millis(20));
        assert_eq!(TickClock::new(0).step(), Duration::from_secs(1));
    }

    #[test]
    fn test_single_step() {
        let mut clock = TickClock::new(50);
        let mut ticks = 0;
        assert_eq!(clock.advance_by(Duration::from_millis(20), || ticks += 1), 1);
        assert_eq!(ticks, 1);
        assert_eq!(clock.until_next(), Duration::from_millis(20));
    }

    #[test]
    fn test_partial_step_carries_over() {
        let mut clock = TickClock::new(50);
        assert_eq!(clock.advance_by(Duration::from_millis(15), || {}), 0);
        assert_eq!(clock.until_next(), Duration::from_millis(5));
        assert_eq!(clock.advance_by(Duration::from_millis(30), || {}), 2);
        assert_eq!(clock.ticks(), 2);
    }

    #[test]
    fn test_stall_is_clamped() {
        let mut clock = TickClock::new(50);
        let ran = clock.advance_by(Duration::from_secs(5), || {});
        assert_eq!(ran, 12);
        assert_eq!(clock.until_next(), Duration::from_millis(10));
    }
}
