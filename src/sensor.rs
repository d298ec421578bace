//! Sensor side: the event stream a hand-tracking device delivers, and a synthetic device.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::SourceError;

/// One camera image as delivered by the device.
/// Pixels start `offset` bytes into `data`, row-major, one byte per sample.
#[derive(Debug, Clone)]
pub struct ImageEvent {
    pub width: u32,
    pub height: u32,
    pub offset: usize,
    pub data: Vec<u8>,
}

impl ImageEvent {
    pub fn pixels(&self) -> &[u8] {
        &self.data[self.offset.min(self.data.len())..]
    }
}

#[derive(Debug, Clone)]
pub enum SensorEvent {
    Image(ImageEvent),
    /// Calibration grid of N*N*2 floats
    Distortion(Vec<f32>),
    /// Diagnostic message from the device service
    Log { timestamp: i64, message: String },
    ConnectionLost,
}

/// A device connection that produces events by polling.
///
/// `poll` blocks for at most `timeout`; `Ok(None)` means the timeout elapsed.
pub trait FrameSource {
    /// Connect and negotiate image streaming
    fn open(&mut self) -> Result<(), SourceError>;
    fn poll(&mut self, timeout: Duration) -> Result<Option<SensorEvent>, SourceError>;
    fn close(&mut self) {}
}

/// Generated camera stream for running without hardware.
///
/// Produces a dim gradient with a bright blob drifting across the lower half,
/// and every `swipe_every` frames a hand-like sweep that floods the upper half.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    grid: usize,
    interval: Duration,
    swipe_every: Option<u64>,
    disconnect_after: Option<u64>,
    frame_index: u64,
    next_frame: Instant,
    queued: VecDeque<SensorEvent>,
    opened: bool,
}

/// Frames in one scripted sweep
const SWEEP_FRAMES: u64 = 6;

impl SyntheticSource {
    /// 640x240 at 60 Hz, same shape as a stereo IR camera's single image
    pub fn new(grid: usize) -> Self {
        Self {
            width: 640,
            height: 240,
            grid,
            interval: Duration::from_secs_f64(1.0 / 60.0),
            swipe_every: None,
            disconnect_after: None,
            frame_index: 0,
            next_frame: Instant::now(),
            queued: VecDeque::new(),
            opened: false,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Drop the connection after `frames` images: one `ConnectionLost`, then silence
    pub fn with_disconnect_after(mut self, frames: u64) -> Self {
        self.disconnect_after = Some(frames);
        self
    }

    /// Script a sweep every `frames` frames (must exceed the sweep length)
    pub fn with_swipe_every(mut self, frames: u64) -> Self {
        self.swipe_every = Some(frames.max(SWEEP_FRAMES + 1));
        self
    }

    /// Position inside the current sweep, if one is running
    fn sweep_step(&self) -> Option<u64> {
        let every = self.swipe_every?;
        let phase = self.frame_index % every;
        (self.frame_index >= every && phase < SWEEP_FRAMES).then_some(phase)
    }

    fn render_frame(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = vec![0u8; w * h];

        // Dim vertical gradient, well under the bright threshold
        for (y, row) in data.chunks_mut(w).enumerate() {
            row.fill((y * 60 / h.max(1)) as u8);
        }

        // Blob drifting left to right in the lower half
        let cx = (self.frame_index as usize * 4) % w.max(1);
        let cy = h * 3 / 4;
        let radius = (h / 8).max(1) as i64;
        for y in (cy.saturating_sub(radius as usize))..(cy + radius as usize).min(h) {
            for x in 0..w {
                let dx = x as i64 - cx as i64;
                let dy = y as i64 - cy as i64;
                if dx * dx + dy * dy <= radius * radius {
                    data[y * w + x] = 220;
                }
            }
        }

        // Sweep: cover a growing share of the upper half
        if let Some(step) = self.sweep_step() {
            let upper = h / 2;
            let rows = upper * (5 + step as usize) / (4 + SWEEP_FRAMES as usize);
            data[..rows.min(upper) * w].fill(200);
        }

        data
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<(), SourceError> {
        if self.width == 0 || self.height == 0 {
            return Err(SourceError::Policy(format!(
                "cannot stream {}x{} images",
                self.width, self.height
            )));
        }
        self.opened = true;
        self.next_frame = Instant::now();
        self.queued.push_back(SensorEvent::Log {
            timestamp: 0,
            message: format!("synthetic sensor streaming {}x{}", self.width, self.height),
        });
        self.queued.push_back(SensorEvent::Distortion(barrel_distortion(self.grid, 0.3)));
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<SensorEvent>, SourceError> {
        if !self.opened {
            return Err(SourceError::Poll("not connected".to_string()));
        }
        if let Some(event) = self.queued.pop_front() {
            return Ok(Some(event));
        }

        match self.disconnect_after {
            Some(limit) if self.frame_index == limit => {
                self.frame_index += 1;
                return Ok(Some(SensorEvent::ConnectionLost));
            }
            Some(limit) if self.frame_index > limit => {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            _ => {}
        }

        let now = Instant::now();
        if self.next_frame > now {
            let wait = self.next_frame - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }
        self.next_frame = (self.next_frame + self.interval).max(Instant::now());

        let data = self.render_frame();
        self.frame_index += 1;

        Ok(Some(SensorEvent::Image(ImageEvent {
            width: self.width,
            height: self.height,
            offset: 0,
            data,
        })))
    }

    fn close(&mut self) {
        self.opened = false;
        self.queued.clear();
    }
}

/// Radial lens model sampled at cell centers, with the vertical flip folded in.
/// Strong enough `k` pushes the corners outside the image.
pub fn barrel_distortion(grid: usize, k: f32) -> Vec<f32> {
    let mut map = Vec::with_capacity(grid * grid * 2);
    for y in 0..grid {
        for x in 0..grid {
            let u = (x as f32 + 0.5) / grid as f32 - 0.5;
            let v = (y as f32 + 0.5) / grid as f32 - 0.5;
            let scale = 1.0 + k * (u * u + v * v);
            map.push(0.5 + u * scale);
            map.push(0.5 - v * scale);
        }
    }
    map
}
