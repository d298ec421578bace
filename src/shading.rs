//! CPU reference of the composite shading rule.
//!
//! `gpu/shaders/composite.wgsl` implements the same rule on the GPU. This copy
//! backs the software preview and pins the behaviour down in tests.

use rayon::prelude::*;

use crate::store::distortion::lookup_nearest;
use crate::store::Staging;

/// Output for fragments whose distortion lookup falls outside the image (dim red, almost transparent)
pub const INVALID_COLOR: [f32; 4] = [0.2, 0.0, 0.0, 0.05];

/// Shade one fragment at `uv`.
///
/// Without distortion the video is sampled at `(u, 1 - v)`. With distortion the
/// lookup result is used directly, and anything not strictly inside (0, 1) on
/// both axes gets [`INVALID_COLOR`].
pub fn shade(
    distortion_active: bool,
    uv: (f32, f32),
    video: impl Fn(f32, f32) -> f32,
    distortion: impl Fn(f32, f32) -> (f32, f32),
) -> [f32; 4] {
    let (u, v) = uv;

    if !distortion_active {
        let r = video(u, 1.0 - v);
        return [r, r, r, 1.0];
    }

    let (h, w) = distortion(u, v);
    if h > 0.0 && h < 1.0 && w > 0.0 && w < 1.0 {
        let r = video(h, w);
        [r, r, r, 1.0]
    } else {
        INVALID_COLOR
    }
}

/// Nearest sample of a single-channel image at normalized coordinates, clamped to the edge
pub fn sample_nearest(pixels: &[u8], width: u32, height: u32, u: f32, v: f32) -> f32 {
    if width == 0 || height == 0 {
        return 0.0;
    }
    let x = ((u * width as f32).floor().max(0.0) as u32).min(width - 1);
    let y = ((v * height as f32).floor().max(0.0) as u32).min(height - 1);
    pixels[(y * width + x) as usize] as f32 / 255.0
}

/// Render the composite for a `width x height` target into 0RGB `u32` pixels.
///
/// Row 0 of `out` is the top of the target, which is `v = 1` in quad UV space.
pub fn render_reference(staging: &Staging, distortion_active: bool, width: usize, height: usize, out: &mut [u32]) {
    out.par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, line)| {
            let v = 1.0 - (row as f32 + 0.5) / height as f32;
            for (col, px) in line.iter_mut().enumerate() {
                let u = (col as f32 + 0.5) / width as f32;
                let color = shade(
                    distortion_active,
                    (u, v),
                    |su, sv| sample_nearest(&staging.pixels, staging.width, staging.height, su, sv),
                    |du, dv| lookup_nearest(&staging.distortion, staging.grid, du, dv),
                );
                *px = pack_rgb(color);
            }
        });
}

/// Premultiply by alpha and pack into 0RGB for a window buffer
fn pack_rgb(color: [f32; 4]) -> u32 {
    let byte = |c: f32| ((c * color[3]).clamp(0.0, 1.0) * 255.0) as u32;
    (byte(color[0]) << 16) | (byte(color[1]) << 8) | byte(color[2])
}
