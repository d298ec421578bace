//! Video and distortion texture uploads.
//!
//! Each texture is either missing, or allocated at some size. Every tick the
//! pending changes are resolved into one [`TextureState`] per texture, and the
//! upload is a single match on that state: recreate the texture when its size
//! must change, otherwise overwrite the existing allocation in place.

use std::fmt;

use super::context::GpuContext;
use crate::store::{PendingUpdate, Staging};

/// Opaque identity of a GPU texture owned by this subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(u64);

#[cfg(test)]
impl TextureHandle {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// Work needed for one texture this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureState {
    /// Storage missing or the wrong size: specify a new image
    NeedsRealloc,
    /// Same size, new content: overwrite in place
    NeedsPartialUpdate,
    UpToDate,
}

impl TextureState {
    pub fn resolve(allocated: bool, content_changed: bool, size_changed: bool) -> Self {
        match (content_changed, allocated && !size_changed) {
            (false, _) => TextureState::UpToDate,
            (true, false) => TextureState::NeedsRealloc,
            (true, true) => TextureState::NeedsPartialUpdate,
        }
    }
}

/// Per-texture decisions for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPlan {
    pub video: TextureState,
    pub distortion: TextureState,
}

impl UploadPlan {
    /// A texture was replaced, so bind groups referencing it are stale
    pub fn needs_rebind(&self) -> bool {
        self.video == TextureState::NeedsRealloc || self.distortion == TextureState::NeedsRealloc
    }
}

/// Whether a texture of `size` can be created on a device whose largest
/// 2D dimension is `max_dimension`
pub fn fits_device(size: (u32, u32), max_dimension: u32) -> bool {
    (1..=max_dimension).contains(&size.0) && (1..=max_dimension).contains(&size.1)
}

/// Running totals, mostly for logs and tests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub reallocations: usize,
    pub partial_updates: usize,
    /// Uploads skipped because the device cannot hold the texture
    pub rejected: usize,
}

struct ManagedTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
    handle: TextureHandle,
}

/// Owns the video and distortion textures and decides how to refresh them
pub struct TextureUploader {
    video: Option<ManagedTexture>,
    distortion: Option<ManagedTexture>,
    video_sampler: wgpu::Sampler,
    distortion_sampler: wgpu::Sampler,
    next_handle: u64,
    stats: UploadStats,
}

impl TextureUploader {
    pub fn new(ctx: &GpuContext) -> Self {
        let device = &ctx.device;

        // Wrap mode is irrelevant for the video: lookups stay inside [0,1]
        let video_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Video Sampler (Linear)"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // Rg32Float is not filterable; clamp so out-of-range lookups never
        // alias the opposite edge
        let distortion_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Distortion Sampler (Nearest)"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            video: None,
            distortion: None,
            video_sampler,
            distortion_sampler,
            next_handle: 1,
            stats: UploadStats::default(),
        }
    }

    /// Hand out a fresh texture identity
    pub fn issue_handle(&mut self) -> TextureHandle {
        let handle = TextureHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Decide what each texture needs, without touching the GPU
    pub fn plan(&self, update: &PendingUpdate) -> UploadPlan {
        UploadPlan {
            video: TextureState::resolve(
                self.video.is_some(),
                update.frame_changed,
                update.dimensions_changed,
            ),
            // The grid never changes size once allocated
            distortion: TextureState::resolve(self.distortion.is_some(), update.distortion_changed, false),
        }
    }

    /// Upload the staged data according to the plan for this tick.
    ///
    /// Staged data the device cannot hold is dropped with a warning and the
    /// previous texture stays bound; the returned plan reports it as `UpToDate`.
    pub fn apply(&mut self, ctx: &GpuContext, update: &PendingUpdate, staging: &Staging) -> UploadPlan {
        let mut plan = self.plan(update);
        let max_dimension = ctx.device.limits().max_texture_dimension_2d;

        let video_size = (staging.width, staging.height);
        // A frame dropped earlier leaves the texture at an older size
        if plan.video == TextureState::NeedsPartialUpdate && self.video.as_ref().is_some_and(|v| v.size != video_size) {
            plan.video = TextureState::NeedsRealloc;
        }
        if plan.video == TextureState::NeedsRealloc && !fits_device(video_size, max_dimension) {
            log::warn!(
                "Dropping {}x{} frame: texture sides must be 1..={}",
                video_size.0,
                video_size.1,
                max_dimension
            );
            self.stats.rejected += 1;
            plan.video = TextureState::UpToDate;
        }

        let grid = staging.grid as u32;
        if plan.distortion == TextureState::NeedsRealloc && !fits_device((grid, grid), max_dimension) {
            log::warn!("Dropping {}x{} distortion grid: too large for this device", grid, grid);
            self.stats.rejected += 1;
            plan.distortion = TextureState::UpToDate;
        }

        match plan.video {
            TextureState::NeedsRealloc => {
                let texture = self.allocate(ctx, "Video Texture", video_size, wgpu::TextureFormat::R8Unorm);
                log::debug!("Allocated video texture {} at {}x{}", texture.handle, video_size.0, video_size.1);
                self.video = Some(texture);
                self.stats.reallocations += 1;
                self.write_video(ctx, staging);
            }
            TextureState::NeedsPartialUpdate => {
                self.stats.partial_updates += 1;
                self.write_video(ctx, staging);
            }
            TextureState::UpToDate => {}
        }

        match plan.distortion {
            TextureState::NeedsRealloc => {
                let texture = self.allocate(ctx, "Distortion Texture", (grid, grid), wgpu::TextureFormat::Rg32Float);
                log::debug!("Allocated distortion texture {} at {}x{}", texture.handle, grid, grid);
                self.distortion = Some(texture);
                self.stats.reallocations += 1;
                self.write_distortion(ctx, staging);
            }
            TextureState::NeedsPartialUpdate => {
                self.stats.partial_updates += 1;
                self.write_distortion(ctx, staging);
            }
            TextureState::UpToDate => {}
        }

        plan
    }

    fn allocate(
        &mut self,
        ctx: &GpuContext,
        label: &'static str,
        size: (u32, u32),
        format: wgpu::TextureFormat,
    ) -> ManagedTexture {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&Default::default());

        ManagedTexture {
            texture,
            view,
            size,
            handle: self.issue_handle(),
        }
    }

    fn write_video(&self, ctx: &GpuContext, staging: &Staging) {
        if let Some(video) = &self.video {
            write_full(ctx, video, &staging.pixels, video.size.0);
        }
    }

    fn write_distortion(&self, ctx: &GpuContext, staging: &Staging) {
        if let Some(distortion) = &self.distortion {
            // Two f32 per texel
            write_full(ctx, distortion, bytemuck::cast_slice(&staging.distortion), distortion.size.0 * 8);
        }
    }

    pub fn video_view(&self) -> Option<&wgpu::TextureView> {
        self.video.as_ref().map(|t| &t.view)
    }

    pub fn distortion_view(&self) -> Option<&wgpu::TextureView> {
        self.distortion.as_ref().map(|t| &t.view)
    }

    pub fn video_sampler(&self) -> &wgpu::Sampler {
        &self.video_sampler
    }

    pub fn distortion_sampler(&self) -> &wgpu::Sampler {
        &self.distortion_sampler
    }

    pub fn video_handle(&self) -> Option<TextureHandle> {
        self.video.as_ref().map(|t| t.handle)
    }

    pub fn stats(&self) -> UploadStats {
        self.stats
    }
}

fn write_full(ctx: &GpuContext, target: &ManagedTexture, data: &[u8], bytes_per_row: u32) {
    ctx.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &target.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(bytes_per_row),
            rows_per_image: Some(target.size.1),
        },
        wgpu::Extent3d {
            width: target.size.0,
            height: target.size.1,
            depth_or_array_layers: 1,
        },
    );
}
