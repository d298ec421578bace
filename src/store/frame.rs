//! Owned single-channel pixel buffer for the most recent sensor frame

/// Current frame pixels. `pixels.len()` always equals `width * height`.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    reallocations: usize,
}

impl FrameBuffer {
    /// Uniform placeholder frame shown until the sensor delivers one
    pub fn placeholder(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width as usize * height as usize],
            reallocations: 0,
        }
    }

    /// Make the backing storage fit `width x height`.
    ///
    /// Allocates a fresh buffer only when the dimensions differ from the
    /// current ones. Returns whether a reallocation happened.
    pub fn resize_for(&mut self, width: u32, height: u32) -> bool {
        if (width, height) == (self.width, self.height) {
            return false;
        }

        self.width = width;
        self.height = height;
        self.pixels = vec![0u8; width as usize * height as usize];
        self.reallocations += 1;
        true
    }

    /// Copy exactly `width * height` bytes from the front of `data`
    pub fn copy_from(&mut self, data: &[u8]) {
        let len = self.pixels.len();
        assert!(
            data.len() >= len,
            "frame data too short: {} bytes for {}x{}",
            data.len(),
            self.width,
            self.height
        );
        self.pixels.copy_from_slice(&data[..len]);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Number of times the storage was replaced since construction
    pub fn reallocations(&self) -> usize {
        self.reallocations
    }
}
