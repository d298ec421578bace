//! Consumer side: the VR overlay that displays the composite texture

use crate::error::OverlayError;
use crate::gpu::TextureHandle;

/// An overlay surface in the VR compositor.
///
/// Every call may fail independently; callers log failures and carry on.
pub trait OverlaySink {
    fn set_texture(&mut self, handle: TextureHandle) -> Result<(), OverlayError>;
    fn show(&mut self) -> Result<(), OverlayError>;
    fn hide(&mut self) -> Result<(), OverlayError>;
    fn is_visible(&self) -> bool;

    fn toggle(&mut self) -> Result<(), OverlayError> {
        if self.is_visible() { self.hide() } else { self.show() }
    }
}

/// Log a failed overlay call and continue in a degraded state
pub fn log_failure(result: Result<(), OverlayError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            log::warn!("{}", e);
            false
        }
    }
}

/// Overlay stand-in that logs every call. Used when no VR runtime is present.
///
/// The composite target is created once, so a second, different handle means
/// the target was recreated behind the overlay's back; that call fails.
#[derive(Debug, Default)]
pub struct LoggingOverlay {
    visible: bool,
    current: Option<TextureHandle>,
    texture_updates: usize,
}

impl LoggingOverlay {
    pub fn new(visible: bool) -> Self {
        Self {
            visible,
            ..Default::default()
        }
    }

    pub fn current_texture(&self) -> Option<TextureHandle> {
        self.current
    }

    pub fn texture_updates(&self) -> usize {
        self.texture_updates
    }
}

impl OverlaySink for LoggingOverlay {
    fn set_texture(&mut self, handle: TextureHandle) -> Result<(), OverlayError> {
        match self.current {
            Some(current) if current != handle => {
                return Err(OverlayError::new(
                    "set_texture",
                    format!("overlay already shows {}, refusing {}", current, handle),
                ));
            }
            Some(_) => {}
            None => log::info!("Overlay texture set to {}", handle),
        }
        self.current = Some(handle);
        self.texture_updates += 1;
        Ok(())
    }

    fn show(&mut self) -> Result<(), OverlayError> {
        log::info!("Overlay shown");
        self.visible = true;
        Ok(())
    }

    fn hide(&mut self) -> Result<(), OverlayError> {
        log::info!("Overlay hidden");
        self.visible = false;
        Ok(())
    }

    fn is_visible(&self) -> bool {
        self.visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_flips_visibility() {
        let mut overlay = LoggingOverlay::new(true);
        overlay.toggle().unwrap();
        assert!(!overlay.is_visible());
        overlay.toggle().unwrap();
        assert!(overlay.is_visible());
    }

    #[test]
    fn test_changed_handle_is_refused() {
        let (first, second) = (TextureHandle::from_raw(1), TextureHandle::from_raw(2));

        let mut overlay = LoggingOverlay::new(true);
        overlay.set_texture(first).unwrap();
        overlay.set_texture(first).unwrap();
        let err = overlay.set_texture(second).unwrap_err();

        assert_eq!(err.call, "set_texture");
        assert_eq!(overlay.current_texture(), Some(first));
        assert_eq!(overlay.texture_updates(), 2);
    }

    #[test]
    fn test_log_failure_reports_outcome() {
        assert!(log_failure(Ok(())));
        assert!(!log_failure(Err(OverlayError::new("SetOverlayTexture", "invalid handle"))));
    }
}
