//! Preview pipeline: shows the offscreen composite target in a window

use super::context::GpuContext;

/// Largest rectangle with the target's aspect ratio centered in the surface,
/// as `(x, y, width, height)` in surface pixels
pub fn fit_viewport(surface: (u32, u32), target: (u32, u32)) -> (f32, f32, f32, f32) {
    let (sw, sh) = (surface.0.max(1) as f32, surface.1.max(1) as f32);
    let aspect = target.0.max(1) as f32 / target.1.max(1) as f32;

    let (w, h) = if sw / sh > aspect { (sh * aspect, sh) } else { (sw, sw / aspect) };
    ((sw - w) * 0.5, (sh - h) * 0.5, w, h)
}

/// Draws the composite target onto the window surface, letterboxed
pub struct DisplayPipeline {
    render_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    target: Option<(wgpu::BindGroup, (u32, u32))>,
}

impl DisplayPipeline {
    /// Returns `None` for a headless context
    pub fn new(ctx: &GpuContext) -> Option<Self> {
        let format = ctx.format()?;
        let device = &ctx.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Preview Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/display.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Preview Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Preview Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Preview Render Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    // The invalid color is nearly transparent; blend it over the clear color
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Preview Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Some(Self {
            render_pipeline,
            bind_group_layout,
            sampler,
            target: None,
        })
    }

    /// Point the preview at the composite target. The target never changes
    /// after creation, so this is normally called once.
    pub fn bind_target(&mut self, ctx: &GpuContext, view: &wgpu::TextureView, size: (u32, u32)) {
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Preview Target Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        self.target = Some((bind_group, size));
    }

    /// Present the bound target. A lost or outdated surface is reconfigured
    /// and the frame skipped; other surface errors are returned.
    pub fn present(&self, ctx: &GpuContext) -> Result<(), wgpu::SurfaceError> {
        let (Some(state), Some((bind_group, target_size))) = (&ctx.surface, &self.target) else {
            return Ok(());
        };

        let output = match state.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::debug!("Surface lost or outdated, reconfiguring");
                state.surface.configure(&ctx.device, &state.config);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Preview Encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Preview Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let (x, y, w, h) = fit_viewport((state.config.width, state.config.height), *target_size);
            render_pass.set_viewport(x, y, w, h, 0.0, 1.0);
            render_pass.set_pipeline(&self.render_pipeline);
            render_pass.set_bind_group(0, bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_viewport_pillarboxes_wide_window() {
        assert_eq!(fit_viewport((1600, 800), (1024, 1024)), (400.0, 0.0, 800.0, 800.0));
    }

    #[test]
    fn test_fit_viewport_letterboxes_tall_window() {
        assert_eq!(fit_viewport((400, 1000), (1024, 512)), (0.0, 400.0, 400.0, 200.0));
    }

    #[test]
    fn test_fit_viewport_exact_fit() {
        assert_eq!(fit_viewport((640, 480), (640, 480)), (0.0, 0.0, 640.0, 480.0));
    }
}
