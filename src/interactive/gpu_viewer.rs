//! GPU preview window: runs the full pipeline and shows the composite target using wgpu + winit

use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::config::PassthroughConfig;
use crate::gpu::{DisplayPipeline, GpuContext};
use crate::overlay::LoggingOverlay;
use crate::passthrough::{Passthrough, RenderLoop};
use crate::sensor::SyntheticSource;

/// Preview window state
struct PreviewState {
    gpu_ctx: GpuContext,
    display_pipeline: DisplayPipeline,
    render_loop: RenderLoop<LoggingOverlay>,
    // Dropped last so the sensor thread is joined after rendering stops
    passthrough: Passthrough,
}

impl PreviewState {
    fn new(window: Arc<Window>, config: PassthroughConfig, source: SyntheticSource) -> Result<Self, String> {
        let gpu_ctx = GpuContext::new(window).map_err(|e| e.to_string())?;
        let mut display_pipeline = DisplayPipeline::new(&gpu_ctx).ok_or("Preview context has no surface")?;

        let mut passthrough = Passthrough::new(config);
        if let Err(e) = passthrough.start_acquisition(source) {
            log::error!("{}", e);
        }

        let render_loop = RenderLoop::new(&gpu_ctx, &passthrough, LoggingOverlay::new(true)).map_err(|e| e.to_string())?;
        let renderer = render_loop.renderer();
        display_pipeline.bind_target(&gpu_ctx, renderer.target_view(), renderer.target_size());

        Ok(Self {
            gpu_ctx,
            display_pipeline,
            render_loop,
            passthrough,
        })
    }

    fn update_and_render(&mut self) {
        self.render_loop.tick(&self.gpu_ctx);

        if let Err(e) = self.display_pipeline.present(&self.gpu_ctx) {
            log::error!("Render error: {:?}", e);
        }
    }
}

/// Application handler for winit event loop
struct PreviewApp {
    config: PassthroughConfig,
    // Handed to the sensor thread once the window exists
    source: Option<SyntheticSource>,
    state: Option<PreviewState>,
}

impl ApplicationHandler for PreviewApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let Some(source) = self.source.take() else {
            return;
        };

        let (fb_w, fb_h) = self.config.framebuffer_size;
        let window_attrs = Window::default_attributes()
            .with_title("Passthrough Preview (D: distortion, ESC: exit)")
            .with_inner_size(winit::dpi::LogicalSize::new(
                (fb_w as f64).min(1024.0),
                (fb_h as f64).min(1024.0),
            ));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match PreviewState::new(window, self.config.clone(), source) {
            Ok(state) => self.state = Some(state),
            Err(e) => {
                log::error!("Failed to create preview state: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let state = match &mut self.state {
            Some(s) => s,
            None => return,
        };

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                state.gpu_ctx.resize((size.width, size.height));
            }

            WindowEvent::KeyboardInput {
                event: KeyEvent {
                    physical_key: PhysicalKey::Code(key),
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => match key {
                KeyCode::Escape => event_loop.exit(),
                KeyCode::KeyD => {
                    let store = state.passthrough.store();
                    let active = !store.is_distortion_active();
                    store.set_distortion_active(active);
                    log::info!("Distortion {}", if active { "on" } else { "off" });
                }
                _ => {}
            },

            WindowEvent::RedrawRequested => {
                state.update_and_render();
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            // Request continuous redraw; vsync paces the loop
            state.gpu_ctx.request_redraw();
        }
    }
}

/// Run the GPU preview, acquiring from `source`
pub fn run_gpu_viewer(config: PassthroughConfig, source: SyntheticSource) -> Result<(), String> {
    let event_loop = EventLoop::new().map_err(|e| format!("Failed to create event loop: {}", e))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = PreviewApp {
        config,
        source: Some(source),
        state: None,
    };
    event_loop
        .run_app(&mut app)
        .map_err(|e| format!("Event loop error: {}", e))?;

    Ok(())
}
