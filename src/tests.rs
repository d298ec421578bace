//! End-to-end tests for the passthrough pipeline

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::acquisition::{Acquisition, handle_event};
use crate::config::{GestureConfig, PassthroughConfig};
use crate::error::SourceError;
use crate::gesture::{GestureDetector, SwipeLatch};
use crate::gpu::GpuContext;
use crate::gpu::uploader::TextureState;
use crate::overlay::{LoggingOverlay, OverlaySink};
use crate::passthrough::{Passthrough, RenderLoop};
use crate::sensor::{FrameSource, ImageEvent, SensorEvent, SyntheticSource};
use crate::store::{SharedStore, Staging};

/// Plays back a fixed list of events, then idles
struct ScriptedSource {
    events: VecDeque<SensorEvent>,
    fail_open: bool,
}

impl ScriptedSource {
    fn new(events: Vec<SensorEvent>) -> Self {
        Self {
            events: events.into(),
            fail_open: false,
        }
    }

    fn refusing() -> Self {
        Self {
            events: VecDeque::new(),
            fail_open: true,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn open(&mut self) -> Result<(), SourceError> {
        if self.fail_open {
            Err(SourceError::Connection("service not running".to_string()))
        } else {
            Ok(())
        }
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<SensorEvent>, SourceError> {
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None => {
                thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
    }
}

/// Frame whose upper half has `bright` pixels at 255 and everything else at 0
fn image_with_bright_upper(width: u32, height: u32, bright: usize) -> SensorEvent {
    let mut data = vec![0u8; (width * height) as usize];
    data[..bright].fill(255);
    SensorEvent::Image(ImageEvent {
        width,
        height,
        offset: 0,
        data,
    })
}

/// Low brightness threshold and no debounce, so a detector fires on its first run
fn small_gesture_config() -> GestureConfig {
    GestureConfig {
        value_threshold: 5,
        debounce: Duration::ZERO,
        ..GestureConfig::default()
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn test_consumer_never_sees_partial_frames() {
    let store = Arc::new(SharedStore::new(&PassthroughConfig::default()));
    let producer_store = store.clone();

    let producer = thread::spawn(move || {
        for i in 0..300u32 {
            let (w, h) = if i % 7 == 0 { (64, 48) } else { (32, 24) };
            let value = (i % 256) as u8;
            producer_store.set_frame(w, h, &vec![value; (w * h) as usize]);
        }
    });

    let mut staging = Staging::default();
    let mut seen = 0;
    while !producer.is_finished() || seen == 0 {
        if let Some(update) = store.consume(&mut staging) {
            if update.frame_changed {
                assert_eq!(staging.pixels.len(), (staging.width * staging.height) as usize);
                let first = staging.pixels[0];
                assert!(staging.pixels.iter().all(|&p| p == first), "mixed frame observed");
                seen += 1;
            }
        }
    }
    producer.join().unwrap();
    assert!(seen > 0);
}

#[test]
fn test_acquisition_feeds_store_and_latch() {
    let mut config = PassthroughConfig::default();
    config.gesture = small_gesture_config();
    let store = Arc::new(SharedStore::new(&config));
    let latch = Arc::new(SwipeLatch::new());
    let detector = GestureDetector::new(config.gesture.clone(), latch.clone());

    // 10x10 frames: rising upper-half counts 10..50 make a run of five
    let mut events: Vec<SensorEvent> = (1..=5).map(|k| image_with_bright_upper(10, 10, k * 10)).collect();
    events.push(SensorEvent::Log {
        timestamp: 42,
        message: "scripted".to_string(),
    });

    let mut acquisition =
        Acquisition::start(ScriptedSource::new(events), store.clone(), detector, Duration::from_millis(10)).unwrap();
    assert!(acquisition.is_running());

    assert!(wait_until(Duration::from_secs(2), || latch.swipe_detected()));
    let (w, h, _) = store.frame_info();
    assert_eq!((w, h), (10, 10));

    acquisition.stop();
    assert!(!acquisition.is_running());
}

#[test]
fn test_failed_open_starts_nothing() {
    let mut passthrough = Passthrough::new(PassthroughConfig::default());
    let result = passthrough.start_acquisition(ScriptedSource::refusing());

    assert!(matches!(result, Err(SourceError::Connection(_))));
    assert!(!passthrough.is_acquiring());

    // The placeholder is still there to render
    let mut staging = Staging::default();
    let update = passthrough.store().consume(&mut staging).unwrap();
    assert!(update.frame_changed);
    assert_eq!((staging.width, staging.height), (100, 100));
}

#[test]
fn test_wrong_size_distortion_map_is_ignored() {
    let config = PassthroughConfig {
        distortion_grid: 4,
        ..PassthroughConfig::default()
    };
    let store = SharedStore::new(&config);
    let mut detector = GestureDetector::new(config.gesture.clone(), Arc::new(SwipeLatch::new()));
    let mut staging = Staging::default();
    store.consume(&mut staging);

    handle_event(SensorEvent::Distortion(vec![0.5; 10]), &store, &mut detector);
    assert!(store.consume(&mut staging).is_none());

    handle_event(SensorEvent::Distortion(vec![0.5; 4 * 4 * 2]), &store, &mut detector);
    let update = store.consume(&mut staging).unwrap();
    assert!(update.distortion_changed);
    assert!(!update.frame_changed);
    assert!(staging.distortion.iter().all(|&c| c == 0.5));
}

#[test]
fn test_image_offset_is_skipped() {
    let store = SharedStore::new(&PassthroughConfig::default());
    let mut detector = GestureDetector::new(GestureConfig::default(), Arc::new(SwipeLatch::new()));
    let mut data = vec![9u8; 4];
    data.extend(std::iter::repeat_n(3u8, 2 * 2));

    handle_event(
        SensorEvent::Image(ImageEvent {
            width: 2,
            height: 2,
            offset: 4,
            data,
        }),
        &store,
        &mut detector,
    );

    let mut staging = Staging::default();
    store.consume(&mut staging).unwrap();
    assert_eq!(staging.pixels, vec![3u8; 4]);
}

#[test]
fn test_short_image_is_dropped() {
    let store = SharedStore::new(&PassthroughConfig::default());
    let latch = Arc::new(SwipeLatch::new());
    let mut detector = GestureDetector::new(small_gesture_config(), latch.clone());
    let mut staging = Staging::default();
    store.consume(&mut staging);

    // 4x4 needs 16 bytes after the offset, only 8 remain
    handle_event(
        SensorEvent::Image(ImageEvent {
            width: 4,
            height: 4,
            offset: 4,
            data: vec![255; 12],
        }),
        &store,
        &mut detector,
    );
    handle_event(
        SensorEvent::Image(ImageEvent {
            width: 0,
            height: 8,
            offset: 0,
            data: Vec::new(),
        }),
        &store,
        &mut detector,
    );

    assert!(store.consume(&mut staging).is_none());
    assert_eq!(store.frame_info().0, 100);
    assert!(!latch.swipe_detected());
}

#[test]
fn test_synthetic_source_through_passthrough() {
    let config = PassthroughConfig::default();
    let mut passthrough = Passthrough::new(config.clone());
    let source = SyntheticSource::new(config.distortion_grid)
        .with_size(64, 32)
        .with_interval(Duration::from_millis(1));
    passthrough.start_acquisition(source).unwrap();

    let store = passthrough.store().clone();
    assert!(wait_until(Duration::from_secs(2), || store.frame_info().0 == 64));
    assert_eq!(store.frame_info().1, 32);

    passthrough.stop_acquisition();
    assert!(!passthrough.is_acquiring());
}

// Requires a GPU adapter. Run with: cargo test -- --include-ignored
#[test]
#[ignore]
fn test_render_loop_publishes_stable_target() {
    let ctx = GpuContext::headless().expect("GPU adapter");
    let config = PassthroughConfig {
        framebuffer_size: (128, 128),
        distortion_grid: 8,
        gesture: small_gesture_config(),
        ..PassthroughConfig::default()
    };
    let passthrough = Passthrough::new(config.clone());
    let mut render_loop = RenderLoop::new(&ctx, &passthrough, LoggingOverlay::new(true)).unwrap();
    let target = render_loop.target_handle();
    assert_eq!(render_loop.renderer().target_size(), (128, 128));

    // Placeholder and uncalibrated grid are pending at start
    let outcome = render_loop.tick(&ctx);
    assert!(outcome.redrawn);
    assert!(outcome.published);
    assert_eq!(render_loop.overlay().current_texture(), Some(target));

    // Nothing new: no redraw, no publish
    let outcome = render_loop.tick(&ctx);
    assert_eq!(outcome.plan, None);
    assert!(!outcome.published);

    // A new resolution reallocates the video texture, never the target
    passthrough.store().set_frame(64, 32, &vec![200; 64 * 32]);
    let outcome = render_loop.tick(&ctx);
    assert_eq!(outcome.plan.map(|p| p.video), Some(TextureState::NeedsRealloc));
    assert_eq!(render_loop.target_handle(), target);

    passthrough.store().set_frame(64, 32, &vec![10; 64 * 32]);
    let outcome = render_loop.tick(&ctx);
    assert_eq!(outcome.plan.map(|p| p.video), Some(TextureState::NeedsPartialUpdate));
    assert_eq!(render_loop.overlay().texture_updates(), 3);
    assert_eq!(render_loop.renderer().read_target(&ctx).unwrap().len(), 128 * 128 * 4);

    // A swipe on the sensor thread hides the overlay on the next tick
    let mut detector = GestureDetector::new(config.gesture.clone(), passthrough.latch().clone());
    let now = Instant::now();
    for count in [10, 20, 30, 40, 50] {
        detector.push_count_at(count, now);
    }
    let outcome = render_loop.tick(&ctx);
    assert!(outcome.toggled);
    assert!(!render_loop.overlay().is_visible());
}

// Requires a GPU adapter. Run with: cargo test -- --include-ignored
#[test]
#[ignore]
fn test_unusable_frame_keeps_composite_running() {
    let ctx = GpuContext::headless().expect("GPU adapter");
    let config = PassthroughConfig {
        framebuffer_size: (64, 64),
        distortion_grid: 4,
        ..PassthroughConfig::default()
    };
    let passthrough = Passthrough::new(config);
    let mut render_loop = RenderLoop::new(&ctx, &passthrough, LoggingOverlay::new(true)).unwrap();
    let target = render_loop.target_handle();
    render_loop.tick(&ctx);

    passthrough.store().set_frame(0, 0, &[]);
    let outcome = render_loop.tick(&ctx);
    assert_eq!(outcome.plan.map(|p| p.video), Some(TextureState::UpToDate));
    assert!(outcome.redrawn);
    assert!(outcome.published);
    assert_eq!(render_loop.target_handle(), target);

    // The next good frame is uploaded as usual
    passthrough.store().set_frame(8, 8, &[90; 64]);
    let outcome = render_loop.tick(&ctx);
    assert_eq!(outcome.plan.map(|p| p.video), Some(TextureState::NeedsRealloc));
    let pixels = render_loop.renderer().read_target(&ctx).unwrap();
    assert_eq!(&pixels[..4], &[90, 90, 90, 255]);
}

// Requires a GPU adapter. Run with: cargo test -- --include-ignored
#[test]
#[ignore]
fn test_composite_pixels() {
    const GRID: usize = 4;
    let ctx = GpuContext::headless().expect("GPU adapter");
    let config = PassthroughConfig {
        framebuffer_size: (32, 32),
        distortion_grid: GRID,
        ..PassthroughConfig::default()
    };
    let passthrough = Passthrough::new(config);
    let store = passthrough.store();
    let mut render_loop = RenderLoop::new(&ctx, &passthrough, LoggingOverlay::new(true)).unwrap();
    let pixel_at = |pixels: &[u8], x: usize, y: usize| -> [u8; 4] {
        let i = (y * 32 + x) * 4;
        [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
    };
    let uniform_map = |u: f32, v: f32| -> Vec<f32> { [u, v].repeat(GRID * GRID) };

    // Every grid cell points at the middle of a flat grey frame
    store.set_frame(4, 4, &[128; 16]);
    store.set_distortion_map(&uniform_map(0.5, 0.5));
    store.set_distortion_active(true);
    render_loop.tick(&ctx);
    let pixels = render_loop.renderer().read_target(&ctx).unwrap();
    for (x, y) in [(0, 0), (16, 16), (31, 31)] {
        assert_eq!(pixel_at(&pixels, x, y), [128, 128, 128, 255]);
    }

    // Lookups outside the image show the invalid color
    store.set_distortion_map(&uniform_map(1.2, 0.5));
    render_loop.tick(&ctx);
    let pixels = render_loop.renderer().read_target(&ctx).unwrap();
    for (x, y) in [(0, 0), (16, 16), (31, 31)] {
        assert_eq!(pixel_at(&pixels, x, y), [51, 0, 0, 13]);
    }

    // Without distortion the frame is shown upright: sensor row 0 on top
    let mut striped = vec![255u8; 8];
    striped.extend([0u8; 8]);
    store.set_frame(4, 4, &striped);
    store.set_distortion_active(false);
    render_loop.tick(&ctx);
    let pixels = render_loop.renderer().read_target(&ctx).unwrap();
    assert_eq!(pixel_at(&pixels, 0, 0), [255, 255, 255, 255]);
    assert_eq!(pixel_at(&pixels, 31, 31), [0, 0, 0, 255]);
}
