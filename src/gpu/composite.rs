//! Offscreen composite pass producing the texture handed to the overlay

use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::uploader::{TextureHandle, TextureUploader};
use crate::error::InitError;
use crate::shading::INVALID_COLOR;

/// Format of the offscreen color target
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Uniform data sent to the composite shader
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompositeUniforms {
    pub distortion_active: u32,
    pub _padding: [u32; 3],
    pub invalid_color: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

/// Two triangles covering the viewport; uv (0,0) at the bottom-left
const FULLSCREEN_QUAD: [QuadVertex; 6] = [
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 0.0] },
    QuadVertex { position: [1.0, -1.0], uv: [1.0, 0.0] },
    QuadVertex { position: [-1.0, 1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [-1.0, 1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [1.0, 1.0], uv: [1.0, 1.0] },
    QuadVertex { position: [1.0, -1.0], uv: [1.0, 0.0] },
];

/// Draws the video (optionally through the distortion grid) into an offscreen target
pub struct CompositeRenderer {
    render_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    quad_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    bind_group: Option<wgpu::BindGroup>,

    // Offscreen color target exposed to the overlay
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    target_handle: TextureHandle,
    target_size: (u32, u32),
    draws: usize,
}

impl CompositeRenderer {
    /// Build the pipeline and the offscreen target.
    ///
    /// Fails if the shader does not validate or the target cannot be used as a
    /// render attachment at `target_size`.
    pub fn new(ctx: &GpuContext, uploader: &mut TextureUploader, target_size: (u32, u32)) -> Result<Self, InitError> {
        let (target, target_view) = create_target(ctx, target_size)?;

        let (render_pipeline, bind_group_layout) = ctx
            .validated(create_pipeline)
            .map_err(|reason| InitError::ShaderValidation {
                label: "Composite pipeline",
                reason,
            })?;

        let quad_buffer = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Fullscreen Quad Buffer"),
            contents: bytemuck::cast_slice(&FULLSCREEN_QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let uniform_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Composite Uniform Buffer"),
            size: std::mem::size_of::<CompositeUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let target_handle = uploader.issue_handle();
        log::info!(
            "Offscreen target {} ready at {}x{}",
            target_handle,
            target_size.0,
            target_size.1
        );

        Ok(Self {
            render_pipeline,
            bind_group_layout,
            quad_buffer,
            uniform_buffer,
            bind_group: None,
            target,
            target_view,
            target_handle,
            target_size,
            draws: 0,
        })
    }

    /// Rebuild the bind group after the uploader replaced a texture.
    /// Does nothing until both textures exist.
    pub fn rebind(&mut self, ctx: &GpuContext, uploader: &TextureUploader) {
        let (Some(video), Some(distortion)) = (uploader.video_view(), uploader.distortion_view()) else {
            self.bind_group = None;
            return;
        };
        if let Some(handle) = uploader.video_handle() {
            log::debug!("Composite now samples video texture {}", handle);
        }

        self.bind_group = Some(ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(video),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(uploader.video_sampler()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(distortion),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(uploader.distortion_sampler()),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        }));
    }

    /// Clear the target and run the composite pass. Returns false if no textures are bound yet.
    pub fn draw(&mut self, ctx: &GpuContext, distortion_active: bool) -> bool {
        let Some(bind_group) = &self.bind_group else {
            return false;
        };

        let uniforms = CompositeUniforms {
            distortion_active: distortion_active as u32,
            _padding: [0; 3],
            invalid_color: INVALID_COLOR,
        };
        ctx.queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Composite Encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Composite Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_viewport(0.0, 0.0, self.target_size.0 as f32, self.target_size.1 as f32, 0.0, 1.0);
            render_pass.set_pipeline(&self.render_pipeline);
            render_pass.set_bind_group(0, bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.quad_buffer.slice(..));
            render_pass.draw(0..FULLSCREEN_QUAD.len() as u32, 0..1);
        }

        ctx.queue.submit(std::iter::once(encoder.finish()));
        self.draws += 1;
        true
    }

    /// Stable identity of the offscreen target
    pub fn target_handle(&self) -> TextureHandle {
        self.target_handle
    }

    pub fn target_view(&self) -> &wgpu::TextureView {
        &self.target_view
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.target_size
    }

    /// Number of composite passes submitted so far
    pub fn draws(&self) -> usize {
        self.draws
    }

    /// Copy the target back to the CPU as tightly packed RGBA rows, top row first.
    /// Blocks until the GPU has finished every submitted pass.
    pub fn read_target(&self, ctx: &GpuContext) -> Result<Vec<u8>, String> {
        let (width, height) = self.target_size;
        let row_bytes = width * 4;
        let padded_row_bytes = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let readback = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Composite Readback"),
            size: padded_row_bytes as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Composite Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        ctx.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| "readback callback never ran".to_string())?
            .map_err(|e| format!("readback map failed: {}", e))?;

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((row_bytes * height) as usize);
        for row in mapped.chunks(padded_row_bytes as usize) {
            pixels.extend_from_slice(&row[..row_bytes as usize]);
        }
        drop(mapped);
        readback.unmap();

        Ok(pixels)
    }
}

fn create_target(ctx: &GpuContext, size: (u32, u32)) -> Result<(wgpu::Texture, wgpu::TextureView), InitError> {
    let incomplete = |reason: String| InitError::OffscreenIncomplete { size, reason };

    let max = ctx.device.limits().max_texture_dimension_2d;
    if size.0 == 0 || size.1 == 0 || size.0 > max || size.1 > max {
        return Err(incomplete(format!("size must be between 1 and {max} on each axis")));
    }

    ctx.validated(|device| {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Composite Target"),
            size: wgpu::Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            // Rendered here, sampled by the overlay/preview, copied out for inspection
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&Default::default());
        (texture, view)
    })
    .map_err(incomplete)
}

fn create_pipeline(device: &wgpu::Device) -> (wgpu::RenderPipeline, wgpu::BindGroupLayout) {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Composite Shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("shaders/composite.wgsl").into()),
    });

    let texture_entry = |binding: u32, filterable: bool| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Composite Bind Group Layout"),
        entries: &[
            // Video (R8Unorm, linear)
            texture_entry(0, true),
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            // Distortion grid (Rg32Float, nearest)
            texture_entry(2, false),
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 4,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Composite Pipeline Layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Composite Render Pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<QuadVertex>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
            }],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: TARGET_FORMAT,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    (render_pipeline, bind_group_layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layout_matches_wgsl() {
        // u32 + 3 pads, then a 16-byte aligned vec4
        assert_eq!(std::mem::size_of::<CompositeUniforms>(), 32);
        assert_eq!(std::mem::offset_of!(CompositeUniforms, invalid_color), 16);
    }

    #[test]
    fn test_quad_covers_viewport() {
        // uv follows position so v=1 is the top edge
        for vertex in FULLSCREEN_QUAD {
            assert_eq!(vertex.uv[0], (vertex.position[0] + 1.0) / 2.0);
            assert_eq!(vertex.uv[1], (vertex.position[1] + 1.0) / 2.0);
        }
    }

    // Requires a GPU adapter. Run with: cargo test -- --include-ignored
    #[test]
    #[ignore]
    fn test_oversized_target_is_incomplete() {
        let ctx = GpuContext::headless().expect("GPU adapter");
        let mut uploader = TextureUploader::new(&ctx);
        let max = ctx.device.limits().max_texture_dimension_2d;

        match CompositeRenderer::new(&ctx, &mut uploader, (max + 1, 16)) {
            Err(InitError::OffscreenIncomplete { size, .. }) => assert_eq!(size, (max + 1, 16)),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("oversized target must fail"),
        }
    }
}
