//! Shared frame + distortion state handed from the sensor thread to the render thread.
//!
//! One mutex covers the frame, the distortion grid and every pending flag, so the
//! render thread sees both surfaces consistently in a single critical section.
//! Critical sections only copy memory and flip flags; GPU work happens after the
//! lock is released, on the copies in [`Staging`].

pub mod distortion;
pub mod frame;

pub use distortion::DistortionMap;
pub use frame::FrameBuffer;

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::PassthroughConfig;

#[derive(Debug, Default, Clone, Copy)]
struct PendingFlags {
    frame_changed: bool,
    dimensions_changed: bool,
    distortion_changed: bool,
    use_distortion_map: bool,
    active_changed: bool,
    was_updated: bool,
}

struct Inner {
    frame: FrameBuffer,
    distortion: DistortionMap,
    flags: PendingFlags,
}

/// What changed since the previous consume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUpdate {
    pub frame_changed: bool,
    pub dimensions_changed: bool,
    pub distortion_changed: bool,
    pub distortion_active: bool,
}

/// Consumer-owned copies of the shared buffers, reused across ticks
#[derive(Debug, Default, Clone)]
pub struct Staging {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub distortion: Vec<f32>,
    pub grid: usize,
}

/// Frame store and distortion store behind one lock
pub struct SharedStore {
    inner: Mutex<Inner>,
}

impl SharedStore {
    /// Starts with the placeholder frame and an uncalibrated grid, both
    /// pending so the first consume uploads them.
    pub fn new(config: &PassthroughConfig) -> Self {
        let (w, h) = config.placeholder_size;
        let flags = PendingFlags {
            frame_changed: true,
            dimensions_changed: true,
            distortion_changed: true,
            use_distortion_map: config.distortion_active,
            ..Default::default()
        };

        Self {
            inner: Mutex::new(Inner {
                frame: FrameBuffer::placeholder(w, h, config.placeholder_value),
                distortion: DistortionMap::new(config.distortion_grid),
                flags,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic on the other thread is a contract violation already reported there;
        // the data itself is always left whole.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new frame. `data` must hold at least `width * height` bytes.
    pub fn set_frame(&self, width: u32, height: u32, data: &[u8]) {
        let needed = width as usize * height as usize;
        assert!(
            data.len() >= needed,
            "set_frame: {} bytes supplied for a {}x{} frame",
            data.len(),
            width,
            height
        );

        let mut inner = self.lock();
        if inner.frame.resize_for(width, height) {
            inner.flags.dimensions_changed = true;
        }
        inner.frame.copy_from(data);
        inner.flags.frame_changed = true;
    }

    /// Store a new distortion grid of exactly N*N*2 floats
    pub fn set_distortion_map(&self, data: &[f32]) {
        let mut inner = self.lock();
        inner.distortion.copy_from(data);
        inner.flags.distortion_changed = true;
    }

    /// Enable or disable the distortion indirection in the composite
    pub fn set_distortion_active(&self, active: bool) {
        let mut inner = self.lock();
        if inner.flags.use_distortion_map != active {
            inner.flags.use_distortion_map = active;
            inner.flags.active_changed = true;
        }
    }

    pub fn is_distortion_active(&self) -> bool {
        self.lock().flags.use_distortion_map
    }

    /// Side length of the distortion grid
    pub fn distortion_grid(&self) -> usize {
        self.lock().distortion.grid()
    }

    /// Take whatever changed since the last call.
    ///
    /// Returns `None` without touching `staging` when nothing is pending.
    /// Otherwise copies the changed buffers into `staging`, clears the
    /// pending flags and arms the `was_updated` latch.
    pub fn consume(&self, staging: &mut Staging) -> Option<PendingUpdate> {
        let mut inner = self.lock();
        let flags = inner.flags;

        if !flags.frame_changed && !flags.distortion_changed && !flags.active_changed {
            return None;
        }

        if flags.frame_changed {
            staging.width = inner.frame.width();
            staging.height = inner.frame.height();
            staging.pixels.clear();
            staging.pixels.extend_from_slice(inner.frame.pixels());
        }

        if flags.distortion_changed {
            staging.grid = inner.distortion.grid();
            staging.distortion.clear();
            staging.distortion.extend_from_slice(inner.distortion.coords());
        }

        inner.flags.frame_changed = false;
        inner.flags.dimensions_changed = false;
        inner.flags.distortion_changed = false;
        inner.flags.active_changed = false;
        inner.flags.was_updated = true;

        Some(PendingUpdate {
            frame_changed: flags.frame_changed,
            dimensions_changed: flags.dimensions_changed,
            distortion_changed: flags.distortion_changed,
            distortion_active: flags.use_distortion_map,
        })
    }

    /// Read and clear the "new texture content" latch
    pub fn was_updated(&self) -> bool {
        let mut inner = self.lock();
        std::mem::take(&mut inner.flags.was_updated)
    }

    /// Frame dimensions and reallocation count, for diagnostics
    pub fn frame_info(&self) -> (u32, u32, usize) {
        let inner = self.lock();
        (inner.frame.width(), inner.frame.height(), inner.frame.reallocations())
    }
}
