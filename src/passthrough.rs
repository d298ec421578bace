//! Top-level wiring: the shared state both threads use, and the render-side tick.

use std::sync::Arc;
use std::time::Instant;

use crate::acquisition::Acquisition;
use crate::config::PassthroughConfig;
use crate::error::{InitError, SourceError};
use crate::gesture::{GestureDetector, SwipeLatch};
use crate::gpu::{CompositeRenderer, GpuContext, TextureHandle, TextureUploader, UploadPlan};
use crate::overlay::{OverlaySink, log_failure};
use crate::sensor::FrameSource;
use crate::store::{SharedStore, Staging};

/// Owns everything shared between the sensor thread and the render thread
pub struct Passthrough {
    config: PassthroughConfig,
    store: Arc<SharedStore>,
    latch: Arc<SwipeLatch>,
    acquisition: Option<Acquisition>,
}

impl Passthrough {
    pub fn new(config: PassthroughConfig) -> Self {
        let store = Arc::new(SharedStore::new(&config));
        Self {
            config,
            store,
            latch: Arc::new(SwipeLatch::new()),
            acquisition: None,
        }
    }

    /// Open the sensor and start the producer thread.
    /// On failure nothing is started and rendering continues with the placeholder.
    pub fn start_acquisition<S>(&mut self, source: S) -> Result<(), SourceError>
    where
        S: FrameSource + Send + 'static,
    {
        self.stop_acquisition();
        let detector = GestureDetector::new(self.config.gesture.clone(), self.latch.clone());
        let acquisition = Acquisition::start(source, self.store.clone(), detector, self.config.poll_timeout)?;
        self.acquisition = Some(acquisition);
        Ok(())
    }

    pub fn stop_acquisition(&mut self) {
        if let Some(mut acquisition) = self.acquisition.take() {
            acquisition.stop();
        }
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquisition.as_ref().is_some_and(Acquisition::is_running)
    }

    pub fn config(&self) -> &PassthroughConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    pub fn latch(&self) -> &Arc<SwipeLatch> {
        &self.latch
    }
}

/// What a single render tick did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub plan: Option<UploadPlan>,
    pub redrawn: bool,
    pub published: bool,
    pub toggled: bool,
}

/// Render-thread half: uploads, composites and notifies the overlay
pub struct RenderLoop<O: OverlaySink> {
    config: PassthroughConfig,
    store: Arc<SharedStore>,
    latch: Arc<SwipeLatch>,
    uploader: TextureUploader,
    renderer: CompositeRenderer,
    staging: Staging,
    overlay: O,
}

impl<O: OverlaySink> RenderLoop<O> {
    pub fn new(ctx: &GpuContext, passthrough: &Passthrough, overlay: O) -> Result<Self, InitError> {
        let config = passthrough.config().clone();
        let mut uploader = TextureUploader::new(ctx);
        let renderer = CompositeRenderer::new(ctx, &mut uploader, config.framebuffer_size)?;

        Ok(Self {
            config,
            store: passthrough.store().clone(),
            latch: passthrough.latch().clone(),
            uploader,
            renderer,
            staging: Staging::default(),
            overlay,
        })
    }

    /// One consumer pass: take pending changes, upload, redraw, then tell the overlay.
    /// The store lock is only held while copying into the staging buffers.
    pub fn tick(&mut self, ctx: &GpuContext) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if let Some(update) = self.store.consume(&mut self.staging) {
            let plan = self.uploader.apply(ctx, &update, &self.staging);
            if plan.needs_rebind() {
                self.renderer.rebind(ctx, &self.uploader);
            }
            outcome.plan = Some(plan);
            outcome.redrawn = self.renderer.draw(ctx, update.distortion_active);
        }

        if self.store.was_updated() {
            outcome.published = log_failure(self.overlay.set_texture(self.renderer.target_handle()));
        }

        if self.latch.swipe_detected() {
            log::info!("Swipe gesture: toggling overlay");
            outcome.toggled = log_failure(self.overlay.toggle());
        }

        outcome
    }

    /// Tick at the configured rate until `frames` ticks have run (or forever),
    /// slowing down while the overlay is hidden.
    pub fn run(&mut self, ctx: &GpuContext, frames: Option<u64>) {
        let mut count = 0u64;
        while frames.is_none_or(|limit| count < limit) {
            let started = Instant::now();
            let outcome = self.tick(ctx);
            if outcome.redrawn {
                log::trace!("Tick {}: {:?}", count, outcome.plan);
            }
            count += 1;

            let interval = self.config.frame_interval(self.overlay.is_visible());
            if let Some(remaining) = interval.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }

        let stats = self.uploader.stats();
        log::info!(
            "Render loop finished after {} ticks: {} composites, {} reallocations, {} partial updates, {} rejected uploads",
            count,
            self.renderer.draws(),
            stats.reallocations,
            stats.partial_updates,
            stats.rejected
        );
    }

    pub fn target_handle(&self) -> TextureHandle {
        self.renderer.target_handle()
    }

    pub fn renderer(&self) -> &CompositeRenderer {
        &self.renderer
    }

    pub fn overlay(&self) -> &O {
        &self.overlay
    }
}
