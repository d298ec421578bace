//! GPU side of the passthrough using wgpu
//!
//! Uploads the latest frame and distortion grid, composites them into an
//! offscreen target, and optionally shows that target in a preview window.

pub mod composite;
pub mod context;
pub mod pipelines;
pub mod uploader;

pub use composite::CompositeRenderer;
pub use context::GpuContext;
pub use pipelines::DisplayPipeline;
pub use uploader::{TextureHandle, TextureUploader, UploadPlan};
