//! Error types for the three failure domains: GPU setup, the sensor, and the overlay

use std::fmt;

/// Fatal errors raised while bringing up the GPU side. Startup aborts on any of these.
#[derive(Debug)]
pub enum InitError {
    /// No adapter could be found (headless or for the given surface)
    NoAdapter,
    /// Device request failed
    DeviceRequest(wgpu::RequestDeviceError),
    /// Window surface could not be created
    Surface(String),
    /// Shader module or pipeline failed validation
    ShaderValidation { label: &'static str, reason: String },
    /// The offscreen color target cannot be used as a render attachment
    OffscreenIncomplete { size: (u32, u32), reason: String },
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::NoAdapter => write!(f, "failed to find a suitable GPU adapter"),
            InitError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            InitError::Surface(reason) => write!(f, "failed to create surface: {reason}"),
            InitError::ShaderValidation { label, reason } => {
                write!(f, "{label} failed validation: {reason}")
            }
            InitError::OffscreenIncomplete { size, reason } => write!(
                f,
                "offscreen target {}x{} is incomplete: {reason}",
                size.0, size.1
            ),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::DeviceRequest(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors reported by a sensor connection.
///
/// Open failures keep the producer thread from starting. Poll failures are
/// logged by the acquisition loop, which keeps polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    Connection(String),
    Policy(String),
    Poll(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Connection(reason) => write!(f, "sensor connection failed: {reason}"),
            SourceError::Policy(reason) => write!(f, "sensor policy negotiation failed: {reason}"),
            SourceError::Poll(reason) => write!(f, "sensor poll failed: {reason}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// A single overlay call that the compositor rejected. Logged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayError {
    pub call: &'static str,
    pub reason: String,
}

impl OverlayError {
    pub fn new(call: &'static str, reason: impl Into<String>) -> Self {
        Self { call, reason: reason.into() }
    }
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.call, self.reason)
    }
}

impl std::error::Error for OverlayError {}
