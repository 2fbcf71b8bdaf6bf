//! Camera device abstraction and the scoped lease around an acquired stream

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("No camera device found")]
    DeviceNotFound,

    #[error("Camera is in use by another consumer")]
    DeviceBusy,

    #[error("Camera capture is not supported on this platform")]
    Unsupported,
}

impl CameraError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission-denied",
            Self::DeviceNotFound => "device-not-found",
            Self::DeviceBusy => "device-busy",
            Self::Unsupported => "unsupported",
        }
    }
}

/// A single captured image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// 8-bit luma, row-major
    pub data: Vec<u8>,
}

#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Exclusive acquisition of the device's video stream
    async fn acquire(&self) -> Result<Box<dyn CameraStream>, CameraError>;
}

pub trait CameraStream: Send {
    /// Current frame, or `None` when nothing new is ready yet
    fn capture(&mut self) -> Option<Frame>;

    /// Give the device back. `CameraLease` calls this exactly once.
    fn release(&mut self);
}

/// Owns an acquired stream and guarantees it is released exactly once,
/// whether through `release()` or drop.
pub struct CameraLease {
    stream: Mutex<Option<Box<dyn CameraStream>>>,
    released: AtomicBool,
}

impl CameraLease {
    pub fn new(stream: Box<dyn CameraStream>) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            released: AtomicBool::new(false),
        }
    }

    pub async fn acquire(device: &dyn CameraDevice) -> Result<Self, CameraError> {
        device.acquire().await.map(Self::new)
    }

    pub fn capture(&self) -> Option<Frame> {
        self.stream.lock().as_mut().and_then(|stream| stream.capture())
    }

    /// Returns true only for the call that actually released the device.
    pub fn release(&self) -> bool {
        let Some(mut stream) = self.stream.lock().take() else {
            return false;
        };
        stream.release();
        self.released.store(true, Ordering::SeqCst);
        debug!("Camera released");
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CameraLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraLease")
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingStream {
        releases: Arc<AtomicUsize>,
    }

    impl CameraStream for CountingStream {
        fn capture(&mut self) -> Option<Frame> {
            Some(Frame {
                width: 1,
                height: 1,
                data: vec![0],
            })
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn lease() -> (CameraLease, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let stream = CountingStream {
            releases: releases.clone(),
        };
        (CameraLease::new(Box::new(stream)), releases)
    }

    #[test]
    fn test_release_is_idempotent() {
        let (lease, releases) = lease();
        assert!(lease.release());
        assert!(!lease.release());
        drop(lease);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let (lease, releases) = lease();
        assert!(lease.capture().is_some());
        drop(lease);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_frames_after_release() {
        let (lease, _) = lease();
        lease.release();
        assert!(lease.is_released());
        assert!(lease.capture().is_none());
    }

    #[test]
    fn test_error_reasons_are_distinct() {
        let reasons = [
            CameraError::PermissionDenied.reason(),
            CameraError::DeviceNotFound.reason(),
            CameraError::DeviceBusy.reason(),
            CameraError::Unsupported.reason(),
        ];
        let unique: std::collections::HashSet<_> = reasons.iter().collect();
        assert_eq!(unique.len(), reasons.len());
    }
}
