//! Swipe detection from the stream of camera frames.
//!
//! A hand moving across the upper part of the sensor's view floods the top half
//! of the image with bright pixels. Each frame contributes one bright-pixel count
//! to a ring buffer; a strictly rising run of large counts fires the trigger.
//! This is a heuristic over image statistics, not a hand-pose classifier.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use crate::config::GestureConfig;

/// Fixed-capacity circular buffer of per-frame counts
#[derive(Debug, Clone)]
pub struct CountRing {
    counts: Vec<u32>,
    next: usize,
}

impl CountRing {
    /// Zero-filled ring. Capacity must be non-zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            counts: vec![0; capacity],
            next: 0,
        }
    }

    pub fn push(&mut self, count: u32) {
        self.counts[self.next] = count;
        self.next = (self.next + 1) % self.counts.len();
    }

    /// Most recently pushed value
    #[cfg(test)]
    pub fn latest(&self) -> u32 {
        self.counts[(self.next + self.counts.len() - 1) % self.counts.len()]
    }

    /// All entries, newest first
    pub fn iter_recent(&self) -> impl Iterator<Item = u32> + '_ {
        let len = self.counts.len();
        (1..=len).map(move |back| self.counts[(self.next + len - back) % len])
    }
}

/// One-shot flag raised on the sensor thread and taken on the render thread
#[derive(Debug, Default)]
pub struct SwipeLatch(AtomicBool);

impl SwipeLatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Read and clear
    pub fn swipe_detected(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Count pixels in rows `y < height / 2` at or above `threshold`
pub fn count_bright_upper(width: u32, height: u32, pixels: &[u8], threshold: u8) -> u32 {
    let upper = (height / 2) as usize * width as usize;
    pixels[..upper.min(pixels.len())]
        .par_chunks(width.max(1) as usize)
        .map(|row| row.iter().filter(|&&p| p >= threshold).count() as u32)
        .sum()
}

/// Lives on the sensor thread; fed synchronously with every frame.
pub struct GestureDetector {
    config: GestureConfig,
    ring: CountRing,
    /// Seeded with the construction time, so nothing fires during the first
    /// debounce interval after startup
    last_trigger: Instant,
    latch: Arc<SwipeLatch>,
}

impl GestureDetector {
    pub fn new(config: GestureConfig, latch: Arc<SwipeLatch>) -> Self {
        Self::started_at(config, latch, Instant::now())
    }

    /// Detector whose debounce interval starts at `start`
    pub fn started_at(config: GestureConfig, latch: Arc<SwipeLatch>, start: Instant) -> Self {
        let ring = CountRing::new(config.capacity);
        Self {
            config,
            ring,
            last_trigger: start,
            latch,
        }
    }

    /// Feed one frame. Returns true if this frame fired the trigger.
    pub fn observe_frame(&mut self, width: u32, height: u32, pixels: &[u8]) -> bool {
        let count = count_bright_upper(width, height, pixels, self.config.bright_threshold);
        self.push_count_at(count, Instant::now())
    }

    /// Push a precomputed count observed at `now` and evaluate the trigger
    pub fn push_count_at(&mut self, count: u32, now: Instant) -> bool {
        self.ring.push(count);

        if self.rising_run() < self.config.run_length {
            return false;
        }

        if now.saturating_duration_since(self.last_trigger) < self.config.debounce {
            return false;
        }

        log::debug!("Swipe detected (bright upper count {})", count);
        self.last_trigger = now;
        self.latch.raise();
        true
    }

    /// Length of the run ending at the newest entry in which every value is at
    /// least the value threshold and each is strictly larger than the one before it.
    pub fn rising_run(&self) -> usize {
        let mut run = 0;
        let mut previous = u32::MAX;

        for value in self.ring.iter_recent() {
            if value < self.config.value_threshold || value >= previous {
                break;
            }
            run += 1;
            previous = value;
        }

        run
    }

    #[cfg(test)]
    pub fn ring(&self) -> &CountRing {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Detector started at `T0`, plus the first instant a swipe may fire
    fn detector() -> (GestureDetector, Arc<SwipeLatch>, Instant) {
        let latch = Arc::new(SwipeLatch::new());
        let t0 = Instant::now();
        let config = GestureConfig::default();
        let ready = t0 + config.debounce;
        (GestureDetector::started_at(config, latch.clone(), t0), latch, ready)
    }

    fn feed(detector: &mut GestureDetector, counts: &[u32], start: Instant) -> Vec<bool> {
        counts
            .iter()
            .enumerate()
            .map(|(i, &c)| detector.push_count_at(c, start + Duration::from_millis(10 * i as u64)))
            .collect()
    }

    #[test]
    fn test_rising_counts_trigger_on_fifth_push() {
        let (mut detector, latch, ready) = detector();
        let fired = feed(&mut detector, &[31000, 35000, 40000, 45000, 50000], ready);

        assert_eq!(fired, vec![false, false, false, false, true]);
        assert!(latch.swipe_detected());
        assert!(!latch.swipe_detected());
    }

    #[test]
    fn test_non_monotonic_counts_do_not_trigger() {
        let (mut detector, latch, ready) = detector();
        let fired = feed(&mut detector, &[31000, 35000, 30000, 45000, 50000], ready);

        assert!(fired.iter().all(|&f| !f));
        assert_eq!(detector.rising_run(), 3);
        assert!(!latch.swipe_detected());
    }

    #[test]
    fn test_counts_below_threshold_break_the_run() {
        let (mut detector, _, ready) = detector();
        feed(&mut detector, &[29999, 31000, 32000], ready);
        assert_eq!(detector.rising_run(), 2);

        feed(&mut detector, &[40000, 40000], ready);
        assert_eq!(detector.rising_run(), 1, "equal values are not rising");
    }

    #[test]
    fn test_debounce_suppresses_second_trigger() {
        let (mut detector, latch, start) = detector();

        feed(&mut detector, &[31000, 35000, 40000, 45000, 50000], start);
        // Keeps rising: run is still long enough, but only 1s has passed
        assert!(!detector.push_count_at(55000, start + Duration::from_secs(1)));

        assert!(latch.swipe_detected());
        assert!(!latch.swipe_detected());

        // After the debounce interval the same run fires again
        assert!(detector.push_count_at(60000, start + Duration::from_secs(3)));
        assert!(latch.swipe_detected());
    }

    #[test]
    fn test_no_trigger_during_startup_interval() {
        let (mut detector, latch, ready) = detector();
        let early = ready - Duration::from_millis(500);

        let fired = feed(&mut detector, &[31000, 35000, 40000, 45000, 50000], early);
        assert!(fired.iter().all(|&f| !f));
        assert!(!latch.swipe_detected());

        // The run is still rising once the interval has passed
        assert!(detector.push_count_at(55000, ready));
        assert!(latch.swipe_detected());
    }

    #[test]
    fn test_ring_wraps_to_latest() {
        let mut ring = CountRing::new(50);
        for i in 0..=50u32 {
            ring.push(i);
            assert_eq!(ring.latest(), i);
        }
        let recent: Vec<u32> = ring.iter_recent().take(3).collect();
        assert_eq!(recent, vec![50, 49, 48]);
        // The oldest surviving entry is 1; 0 was overwritten
        assert_eq!(ring.iter_recent().last(), Some(1));
    }

    #[test]
    fn test_count_bright_upper_ignores_bottom_half() {
        // 4x4: top two rows have 3 bright pixels, bottom rows are all bright
        let pixels = [
            100, 99, 255, 0, //
            0, 0, 0, 200, //
            255, 255, 255, 255, //
            255, 255, 255, 255,
        ];
        assert_eq!(count_bright_upper(4, 4, &pixels, 100), 3);
        // Odd height: the middle row belongs to the bottom half
        assert_eq!(count_bright_upper(4, 3, &pixels[..12], 100), 2);
    }

    #[test]
    fn test_observe_frame_counts_and_pushes() {
        let (mut detector, _, _) = detector();
        let mut frame = vec![0u8; 640 * 240];
        frame[..640 * 60].fill(200);

        assert!(!detector.observe_frame(640, 240, &frame));
        assert_eq!(detector.ring().latest(), 640 * 60);
    }
}
