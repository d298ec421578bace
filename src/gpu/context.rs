//! GPU context management - device, queue and (for the preview) surface setup

use std::sync::Arc;
use winit::window::Window;

use crate::error::InitError;

/// Window surface state, only present when previewing on screen
pub struct SurfaceState {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
    // Keep window alive (surface borrows from it)
    window: Arc<Window>,
}

/// Holds all wgpu state needed for uploading and compositing
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub surface: Option<SurfaceState>,
    pub size: (u32, u32),
}

impl GpuContext {
    /// Create an offscreen-only context
    pub fn headless() -> Result<Self, InitError> {
        pollster::block_on(Self::new_async(None))
    }

    /// Create a context that can also present to `window`
    pub fn new(window: Arc<Window>) -> Result<Self, InitError> {
        pollster::block_on(Self::new_async(Some(window)))
    }

    async fn new_async(window: Option<Arc<Window>>) -> Result<Self, InitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // Create surface (must happen before adapter request on some platforms)
        let surface = match &window {
            Some(window) => Some(
                instance
                    .create_surface(window.clone())
                    .map_err(|e| InitError::Surface(e.to_string()))?,
            ),
            None => None,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface.as_ref(),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(InitError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!("Using GPU: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Passthrough Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(InitError::DeviceRequest)?;

        let (surface, size) = match (surface, window) {
            (Some(surface), Some(window)) => {
                let inner = window.inner_size();
                let size = (inner.width.max(1), inner.height.max(1));

                let surface_caps = surface.get_capabilities(&adapter);
                let surface_format = surface_caps
                    .formats
                    .iter()
                    .find(|f| f.is_srgb())
                    .copied()
                    .or_else(|| surface_caps.formats.first().copied())
                    .ok_or_else(|| InitError::Surface("surface reports no formats".to_string()))?;

                let config = wgpu::SurfaceConfiguration {
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    format: surface_format,
                    width: size.0,
                    height: size.1,
                    present_mode: wgpu::PresentMode::AutoVsync,
                    alpha_mode: surface_caps.alpha_modes[0],
                    view_formats: vec![],
                    desired_maximum_frame_latency: 2,
                };
                surface.configure(&device, &config);

                (Some(SurfaceState { surface, config, window }), size)
            }
            _ => (None, (0, 0)),
        };

        Ok(Self {
            device,
            queue,
            surface,
            size,
        })
    }

    /// Run `f` inside a validation error scope and report the first error raised
    pub fn validated<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }

    /// Handle window resize
    pub fn resize(&mut self, new_size: (u32, u32)) {
        if new_size.0 > 0 && new_size.1 > 0 {
            self.size = new_size;
            if let Some(state) = &mut self.surface {
                state.config.width = new_size.0;
                state.config.height = new_size.1;
                state.surface.configure(&self.device, &state.config);
            }
        }
    }

    /// Get the surface texture format, if presenting
    pub fn format(&self) -> Option<wgpu::TextureFormat> {
        self.surface.as_ref().map(|s| s.config.format)
    }

    /// Request a redraw of the preview window
    pub fn request_redraw(&self) {
        if let Some(state) = &self.surface {
            state.window.request_redraw();
        }
    }
}
