use std::time::{Duration, Instant};

/// Sleeps just long enough to hold a target frame rate.
///
/// Deadlines advance from the previous deadline, not from "now", so short
/// hiccups are absorbed. A caller that falls more than one interval behind is
/// resynchronised instead of bursting.
#[derive(Debug)]
pub struct FramePacer {
    interval: Option<Duration>,
    next: Option<Instant>,
}

impl FramePacer {
    /// `fps == 0` disables pacing.
    pub fn new(fps: u32) -> Self {
        Self {
            interval: (fps > 0).then(|| Duration::from_secs(1) / fps),
            next: None,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Time to sleep before the next frame, advancing the schedule.
    pub fn delay(&mut self, now: Instant) -> Duration {
        let Some(interval) = self.interval else {
            return Duration::ZERO;
        };
        let deadline = match self.next {
            Some(next) if next + interval >= now => next,
            _ => now,
        };
        self.next = Some(deadline + interval);
        deadline.saturating_duration_since(now)
    }

    pub fn wait(&mut self) {
        let delay = self.delay(Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}
