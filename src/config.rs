//! Runtime configuration for the passthrough pipeline

use std::time::Duration;

/// Tuning for the upper-region swipe detector
#[derive(Debug, Clone)]
pub struct GestureConfig {
    /// Minimum intensity (0-255) for a pixel to count as bright
    pub bright_threshold: u8,
    /// Length of the rising run needed to fire
    pub run_length: usize,
    /// Every count in the run must be at least this large
    pub value_threshold: u32,
    /// Minimum time between two triggers
    pub debounce: Duration,
    /// Number of per-frame counts kept in the ring
    pub capacity: usize,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            bright_threshold: 100,
            run_length: 5,
            value_threshold: 30_000,
            debounce: Duration::from_secs(2),
            capacity: 50,
        }
    }
}

/// Configuration for the whole pipeline
#[derive(Debug, Clone)]
pub struct PassthroughConfig {
    /// Offscreen composite target size (independent of the sensor resolution)
    pub framebuffer_size: (u32, u32),
    /// Side length N of the N×N distortion grid
    pub distortion_grid: usize,
    pub gesture: GestureConfig,
    /// Render rate while the overlay is visible
    pub render_fps: u32,
    /// Render rate while the overlay is hidden
    pub idle_fps: u32,
    /// Upper bound on a single sensor poll
    pub poll_timeout: Duration,
    /// Frame shown before the sensor delivers anything
    pub placeholder_size: (u32, u32),
    pub placeholder_value: u8,
    /// Whether the composite starts with the distortion lookup enabled
    pub distortion_active: bool,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            framebuffer_size: (1024, 1024),
            distortion_grid: 64,
            gesture: GestureConfig::default(),
            render_fps: 60,
            idle_fps: 10,
            poll_timeout: Duration::from_millis(1000),
            placeholder_size: (100, 100),
            placeholder_value: 255,
            distortion_active: false,
        }
    }
}

impl PassthroughConfig {
    /// Apply command line overrides on top of the current values.
    ///
    /// Flags that are not configuration (mode switches) are left for the caller.
    pub fn apply_args(&mut self, args: &[String]) -> Result<(), String> {
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--fb-size" => {
                    let value = iter.next().ok_or("--fb-size needs a value like 1024x1024")?;
                    self.framebuffer_size = parse_size(value)?;
                }
                "--grid" => {
                    let value = iter.next().ok_or("--grid needs a value")?;
                    self.distortion_grid = parse_number(value, "--grid")?;
                    if self.distortion_grid == 0 {
                        return Err("--grid must be at least 1".to_string());
                    }
                }
                "--fps" => {
                    let value = iter.next().ok_or("--fps needs a value")?;
                    self.render_fps = parse_number::<u32>(value, "--fps")?.max(1);
                }
                "--debounce-ms" => {
                    let value = iter.next().ok_or("--debounce-ms needs a value")?;
                    self.gesture.debounce = Duration::from_millis(parse_number(value, "--debounce-ms")?);
                }
                "--distortion" => self.distortion_active = true,
                _ => {}
            }
        }
        Ok(())
    }

    /// Frame interval for the current visibility state
    pub fn frame_interval(&self, visible: bool) -> Duration {
        let fps = if visible { self.render_fps } else { self.idle_fps };
        Duration::from_secs_f64(1.0 / fps.max(1) as f64)
    }
}

/// Parse `WIDTHxHEIGHT`
pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let w: u32 = parse_number(w, "width")?;
    let h: u32 = parse_number(h, "height")?;
    if w == 0 || h == 0 {
        return Err(format!("size must be non-zero, got '{}'", value));
    }
    Ok((w, h))
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("invalid value for {}: '{}'", what, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_match_reference_sizing() {
        let config = PassthroughConfig::default();
        assert_eq!(config.gesture.bright_threshold, 100);
        assert_eq!(config.gesture.run_length, 5);
        assert_eq!(config.gesture.value_threshold, 30_000);
        assert_eq!(config.gesture.debounce, Duration::from_secs(2));
        assert_eq!(config.gesture.capacity, 50);
        assert_eq!(config.placeholder_size, (100, 100));
    }

    #[test]
    fn test_apply_args() {
        let mut config = PassthroughConfig::default();
        config
            .apply_args(&args(&["--headless", "--fb-size", "512x256", "--grid", "32", "--distortion"]))
            .unwrap();
        assert_eq!(config.framebuffer_size, (512, 256));
        assert_eq!(config.distortion_grid, 32);
        assert!(config.distortion_active);
    }

    #[test]
    fn test_bad_sizes_rejected() {
        assert!(parse_size("512").is_err());
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("axb").is_err());
        assert_eq!(parse_size("640X240"), Ok((640, 240)));

        let mut config = PassthroughConfig::default();
        assert!(config.apply_args(&args(&["--grid", "0"])).is_err());
        assert!(config.apply_args(&args(&["--fps"])).is_err());
    }

    #[test]
    fn test_frame_interval_throttles_when_hidden() {
        let config = PassthroughConfig::default();
        assert!(config.frame_interval(false) > config.frame_interval(true));
    }
}
