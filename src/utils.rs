use std::time::{Duration, Instant};

/// Tracks how many frames per second a processing loop sustains.
pub struct FpsCounter {
    frame_count: u32,
    total_frames: u64,
    started: Instant,
    last_time: Instant,
    interval: Duration,
}

impl FpsCounter {
    /// Reports once per second.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    pub fn with_interval(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            frame_count: 0,
            total_frames: 0,
            started: now,
            last_time: now,
            interval,
        }
    }

    /// Counts one processed frame.
    /// Returns Some(fps) if the reporting interval has passed, otherwise None.
    pub fn update(&mut self) -> Option<f32> {
        self.frame_count += 1;
        self.total_frames += 1;
        let elapsed = self.last_time.elapsed();

        if elapsed >= self.interval {
            let fps = self.frame_count as f32 / elapsed.as_secs_f32();
            self.frame_count = 0;
            self.last_time = Instant::now();
            Some(fps)
        } else {
            None
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Average rate since the counter was created.
    pub fn average(&self) -> f32 {
        let secs = self.started.elapsed().as_secs_f32();
        if secs > 0.0 {
            self.total_frames as f32 / secs
        } else {
            0.0
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
