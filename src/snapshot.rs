//! Saving composite readbacks to disk for inspection

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Write tightly packed RGBA rows as a binary PPM, composited over black
pub fn save_ppm(path: &Path, width: u32, height: u32, rgba: &[u8]) -> io::Result<()> {
    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{}x{} snapshot needs {} bytes, got {}", width, height, expected, rgba.len()),
        ));
    }

    let mut file = BufWriter::new(File::create(path)?);
    write!(file, "P6\n{} {}\n255\n", width, height)?;
    for px in rgba.chunks_exact(4) {
        let alpha = px[3] as u32;
        let over_black = |c: u8| ((c as u32 * alpha + 127) / 255) as u8;
        file.write_all(&[over_black(px[0]), over_black(px[1]), over_black(px[2])])?;
    }
    file.flush()
}
