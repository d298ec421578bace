//! Preview windows for watching the passthrough without a VR runtime

mod viewer;
pub mod gpu_viewer;

pub use viewer::{InteractiveViewer, ViewerConfig};
pub use gpu_viewer::run_gpu_viewer;
