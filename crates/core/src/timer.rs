//! Frame timing.

use std::time::{Duration, Instant};

/// Measures per-frame delta time and a rolling frames-per-second figure.
///
/// The FPS value is recomputed once per `report_interval`, so it stays
/// readable when logged every frame.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    report_interval: Duration,
    window_start: Instant,
    window_frames: u32,
    fps: f32,
    frame_count: u64,
}

impl FrameTimer {
    /// Create a timer that refreshes its FPS figure every second.
    pub fn new() -> Self {
        Self::with_report_interval(Duration::from_secs(1))
    }

    /// Create a timer with a custom FPS refresh interval.
    pub fn with_report_interval(report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            report_interval,
            window_start: now,
            window_frames: 0,
            fps: 0.0,
            frame_count: 0,
        }
    }

    /// Mark the end of a frame and return the time since the previous one.
    pub fn tick(&mut self) -> Duration {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Duration {
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.frame_count += 1;
        self.window_frames += 1;

        let window = now.saturating_duration_since(self.window_start);
        if window >= self.report_interval {
            self.fps = self.window_frames as f32 / window.as_secs_f32();
            self.window_frames = 0;
            self.window_start = now;
        }
        delta
    }

    /// Seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Most recent FPS figure (zero until the first interval elapses).
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Number of ticks so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}
