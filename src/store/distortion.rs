//! Fixed-size N×N distortion lookup grid

/// Value written into cells that have no calibration yet.
/// Out of (0,1), so the composite shows the invalid color there.
pub const UNCALIBRATED: f32 = -1.0;

/// Row-major grid of `(h, v)` pairs in normalized image space.
/// Index of cell (x, y) is `(y * grid + x) * 2`.
#[derive(Debug, Clone)]
pub struct DistortionMap {
    grid: usize,
    coords: Vec<f32>,
}

impl DistortionMap {
    pub fn new(grid: usize) -> Self {
        Self {
            grid,
            coords: vec![UNCALIBRATED; grid * grid * 2],
        }
    }

    /// Side length N
    pub fn grid(&self) -> usize {
        self.grid
    }

    /// Number of floats a calibration payload must carry (N*N*2)
    pub fn float_len(&self) -> usize {
        self.grid * self.grid * 2
    }

    pub fn coords(&self) -> &[f32] {
        &self.coords
    }

    pub fn copy_from(&mut self, data: &[f32]) {
        assert_eq!(
            data.len(),
            self.float_len(),
            "distortion map must hold {}x{}x2 floats",
            self.grid,
            self.grid
        );
        self.coords.copy_from_slice(data);
    }
}

/// Nearest-cell lookup on a raw N×N×2 slice, with clamp-to-edge addressing
/// to match the GPU sampler
pub fn lookup_nearest(coords: &[f32], grid: usize, u: f32, v: f32) -> (f32, f32) {
    if grid == 0 {
        return (UNCALIBRATED, UNCALIBRATED);
    }
    let cell = |t: f32| ((t * grid as f32).floor().max(0.0) as usize).min(grid - 1);
    let idx = (cell(v) * grid + cell(u)) * 2;
    (coords[idx], coords[idx + 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_map_is_uncalibrated() {
        let map = DistortionMap::new(4);
        assert_eq!(map.coords().len(), 32);
        assert_eq!(lookup_nearest(map.coords(), 4, 0.5, 0.5), (UNCALIBRATED, UNCALIBRATED));
    }

    #[test]
    fn test_lookup_clamps_to_edge() {
        let mut map = DistortionMap::new(2);
        // (0,0) (1,0) / (0,1) (1,1)
        map.copy_from(&[0.1, 0.1, 0.9, 0.1, 0.1, 0.9, 0.9, 0.9]);
        let lookup = |u, v| lookup_nearest(map.coords(), map.grid(), u, v);

        assert_eq!(lookup(0.25, 0.25), (0.1, 0.1));
        assert_eq!(lookup(0.75, 0.25), (0.9, 0.1));
        assert_eq!(lookup(0.25, 0.75), (0.1, 0.9));
        // Out of range clamps instead of wrapping to the opposite edge
        assert_eq!(lookup(1.5, 0.25), (0.9, 0.1));
        assert_eq!(lookup(-0.5, 0.25), (0.1, 0.1));
        assert_eq!(lookup(1.0, 1.0), (0.9, 0.9));
    }

    #[test]
    #[should_panic(expected = "distortion map must hold")]
    fn test_wrong_length_panics() {
        let mut map = DistortionMap::new(2);
        map.copy_from(&[0.0; 7]);
    }
}
