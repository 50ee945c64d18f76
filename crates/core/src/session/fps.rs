use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Window {
    frames: u32,
    started: Option<Instant>,
}

/// Counts encoded video frames per one-second window.
#[derive(Debug, Default)]
pub struct FpsCounter {
    window: Mutex<Window>,
    current: AtomicU32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one frame. Yields the frame rate when a window completes.
    pub fn tick(&self) -> Option<u32> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&self, now: Instant) -> Option<u32> {
        let mut window = self.window.lock();
        let started = *window.started.get_or_insert(now);
        window.frames += 1;
        if now.duration_since(started) < WINDOW {
            return None;
        }
        let fps = window.frames;
        window.frames = 0;
        window.started = Some(now);
        self.current.store(fps, Ordering::Relaxed);
        Some(fps)
    }

    /// Rate measured over the last complete window.
    pub fn fps(&self) -> u32 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        *self.window.lock() = Window::default();
        self.current.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_frames_per_window() {
        let counter = FpsCounter::new();
        let t0 = Instant::now();
        for i in 0..30 {
            assert_eq!(counter.tick_at(t0 + Duration::from_millis(i * 33)), None);
        }
        assert_eq!(counter.fps(), 0);
        assert_eq!(counter.tick_at(t0 + Duration::from_secs(1)), Some(31));
        assert_eq!(counter.fps(), 31);
    }

    #[test]
    fn reset_clears_rate() {
        let counter = FpsCounter::new();
        let t0 = Instant::now();
        counter.tick_at(t0);
        counter.tick_at(t0 + Duration::from_secs(2));
        assert_eq!(counter.fps(), 2);
        counter.reset();
        assert_eq!(counter.fps(), 0);
    }
}
