//! Software preview: composites on the CPU and shows the result in a minifb window

use minifb::{Key, KeyRepeat, Window, WindowOptions};

use crate::config::PassthroughConfig;
use crate::passthrough::Passthrough;
use crate::sensor::SyntheticSource;
use crate::shading::render_reference;
use crate::store::Staging;

/// Configuration for the software preview
#[derive(Clone)]
pub struct ViewerConfig {
    /// Window size in pixels
    pub window_size: (usize, usize),
    pub pipeline: PassthroughConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            window_size: (640, 480),
            pipeline: PassthroughConfig::default(),
        }
    }
}

/// CPU-only stand-in for the GPU composite, useful without a working adapter
pub struct InteractiveViewer {
    config: ViewerConfig,
    passthrough: Passthrough,
    window: Window,
    buffer: Vec<u32>,
    staging: Staging,
}

impl InteractiveViewer {
    pub fn new(config: ViewerConfig) -> Result<Self, String> {
        let (w, h) = config.window_size;
        let window = Window::new(
            "Passthrough Software Preview (D: distortion, ESC: exit)",
            w,
            h,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )
        .map_err(|e| e.to_string())?;

        let passthrough = Passthrough::new(config.pipeline.clone());

        Ok(Self {
            config,
            passthrough,
            window,
            buffer: vec![0u32; w * h],
            staging: Staging::default(),
        })
    }

    /// Run the preview loop, acquiring from `source`
    pub fn run(&mut self, source: SyntheticSource) -> Result<(), String> {
        let (w, h) = self.config.window_size;
        self.window.set_target_fps(self.config.pipeline.render_fps as usize);

        if let Err(e) = self.passthrough.start_acquisition(source) {
            log::error!("{}", e);
        }

        let store = self.passthrough.store().clone();
        let latch = self.passthrough.latch().clone();
        let mut visible = true;

        while self.window.is_open() && !self.window.is_key_down(Key::Escape) {
            if self.window.is_key_pressed(Key::D, KeyRepeat::No) {
                let active = !store.is_distortion_active();
                store.set_distortion_active(active);
                log::info!("Distortion {}", if active { "on" } else { "off" });
            }

            if latch.swipe_detected() {
                visible = !visible;
                log::info!("Swipe gesture: overlay {}", if visible { "shown" } else { "hidden" });
            }

            if let Some(update) = store.consume(&mut self.staging) {
                if visible {
                    render_reference(&self.staging, update.distortion_active, w, h, &mut self.buffer);
                } else {
                    self.buffer.fill(0);
                }
            }

            self.window
                .update_with_buffer(&self.buffer, w, h)
                .map_err(|e| e.to_string())?;
        }

        self.passthrough.stop_acquisition();
        Ok(())
    }
}
