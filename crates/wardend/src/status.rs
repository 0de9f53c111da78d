//! Shared health flags for the HTTP surface.

use std::sync::atomic::{AtomicBool, Ordering};

/// Read-only projection of frame-source health. The capture thread is
/// the sole writer; HTTP handlers only read.
#[derive(Debug, Default)]
pub struct SystemStatus {
    camera_active: AtomicBool,
}

impl SystemStatus {
    pub fn set_camera_active(&self, active: bool) {
        self.camera_active.store(active, Ordering::Relaxed);
    }

    pub fn camera_active(&self) -> bool {
        self.camera_active.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_active_flag() {
        let status = SystemStatus::default();
        assert!(!status.camera_active());
        status.set_camera_active(true);
        assert!(status.camera_active());
        status.set_camera_active(false);
        assert!(!status.camera_active());
    }
}
