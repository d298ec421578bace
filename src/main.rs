mod acquisition;
mod config;
mod error;
mod gesture;
mod gpu;
mod interactive;
mod overlay;
mod passthrough;
mod sensor;
mod shading;
mod snapshot;
mod store;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::time::Duration;

use config::PassthroughConfig;
use gpu::GpuContext;
use interactive::{InteractiveViewer, ViewerConfig};
use overlay::LoggingOverlay;
use passthrough::{Passthrough, RenderLoop};
use sensor::SyntheticSource;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = PassthroughConfig::default();
    if let Err(e) = config.apply_args(&args[1..]) {
        eprintln!("Error: {}", e);
        print_usage();
        std::process::exit(2);
    }

    let source = match sensor_from_args(&args, &config) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(2);
        }
    };

    let result = if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        Ok(())
    } else if args.iter().any(|a| a == "--preview") {
        interactive::run_gpu_viewer(config, source)
    } else if args.iter().any(|a| a == "--cpu-preview") {
        run_cpu_preview(config, source)
    } else {
        let snapshot_path = flag_value(&args, "--snapshot").map(Path::new);
        run_headless(config, source, frame_limit(&args), snapshot_path)
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Sensor Passthrough");
    println!("  --headless            Composite offscreen without a window (default)");
    println!("  --frames N            Stop the headless loop after N ticks (default 600)");
    println!("  --snapshot PATH       Save the last headless composite as a PPM image");
    println!("  --preview             Show the composite in a wgpu window");
    println!("  --cpu-preview         Show a CPU-composited preview in a minifb window");
    println!("  --fb-size WxH         Composite target size (default 1024x1024)");
    println!("  --grid N              Distortion map grid side (default 64)");
    println!("  --fps N               Render rate while the overlay is visible (default 60)");
    println!("  --debounce-ms N       Minimum time between swipe triggers (default 2000)");
    println!("  --distortion          Start with distortion correction enabled");
    println!("  --sensor-size WxH     Synthetic sensor image size (default 640x240)");
    println!("  --sensor-fps N        Synthetic sensor frame rate (default 60)");
    println!("  --swipe-every N       Frames between scripted swipes (default 240)");
    println!("  --disconnect-after N  Simulate losing the sensor after N frames");
    println!("Set RUST_LOG=info (or debug) for log output");
}

const DEFAULT_FRAMES: u64 = 600;
const DEFAULT_SWIPE_EVERY: u64 = 240;

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).map(String::as_str)
}

fn frame_limit(args: &[String]) -> u64 {
    let Some(value) = flag_value(args, "--frames") else {
        return DEFAULT_FRAMES;
    };
    match value.parse::<u64>() {
        Ok(n) => n,
        Err(_) => {
            log::warn!("--frames expects a number, using {}", DEFAULT_FRAMES);
            DEFAULT_FRAMES
        }
    }
}

/// Build the synthetic sensor from the `--sensor-*`, `--swipe-every` and
/// `--disconnect-after` flags
fn sensor_from_args(args: &[String], config: &PassthroughConfig) -> Result<SyntheticSource, String> {
    let number = |flag: &str| -> Result<Option<u64>, String> {
        flag_value(args, flag)
            .map(|v| v.trim().parse::<u64>().map_err(|_| format!("invalid value for {}: '{}'", flag, v)))
            .transpose()
    };

    let swipe_every = number("--swipe-every")?.unwrap_or(DEFAULT_SWIPE_EVERY);
    let mut source = SyntheticSource::new(config.distortion_grid).with_swipe_every(swipe_every);

    if let Some(size) = flag_value(args, "--sensor-size") {
        let (w, h) = crate::config::parse_size(size)?;
        source = source.with_size(w, h);
    }
    if let Some(fps) = number("--sensor-fps")? {
        source = source.with_interval(Duration::from_secs_f64(1.0 / fps.max(1) as f64));
    }
    if let Some(frames) = number("--disconnect-after")? {
        source = source.with_disconnect_after(frames);
    }
    Ok(source)
}

fn run_headless(
    config: PassthroughConfig,
    source: SyntheticSource,
    frames: u64,
    snapshot_path: Option<&Path>,
) -> Result<(), String> {
    let ctx = GpuContext::headless().map_err(|e| e.to_string())?;

    let mut passthrough = Passthrough::new(config);
    if let Err(e) = passthrough.start_acquisition(source) {
        // Keep rendering the placeholder
        log::error!("{}", e);
    }

    let mut render_loop =
        RenderLoop::new(&ctx, &passthrough, LoggingOverlay::new(true)).map_err(|e| e.to_string())?;
    render_loop.run(&ctx, Some(frames));

    let (w, h, reallocations) = passthrough.store().frame_info();
    log::info!("Last frame {}x{}, {} frame buffer reallocations", w, h, reallocations);

    let overlay = render_loop.overlay();
    log::info!(
        "Overlay showed {:?} ({} texture updates), composite target is {}",
        overlay.current_texture(),
        overlay.texture_updates(),
        render_loop.target_handle()
    );
    if !passthrough.is_acquiring() {
        log::warn!("Sensor thread was not running at shutdown");
    }

    if let Some(path) = snapshot_path {
        let (tw, th) = render_loop.renderer().target_size();
        let rgba = render_loop.renderer().read_target(&ctx)?;
        snapshot::save_ppm(path, tw, th, &rgba).map_err(|e| format!("Failed to save {}: {}", path.display(), e))?;
        log::info!("Saved {}x{} composite to {}", tw, th, path.display());
    }

    passthrough.stop_acquisition();
    Ok(())
}

fn run_cpu_preview(config: PassthroughConfig, source: SyntheticSource) -> Result<(), String> {
    let viewer_config = ViewerConfig {
        pipeline: config,
        ..ViewerConfig::default()
    };

    let mut viewer = InteractiveViewer::new(viewer_config).map_err(|e| format!("Failed to create viewer: {}", e))?;
    viewer.run(source)
}
