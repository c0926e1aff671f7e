//! The single loopback capture owned by the controller.

use std::sync::Arc;

use crate::backend::{AudioBackend, CaptureHandle};
use crate::device::{DeviceDirectory, DeviceId};
use crate::error::MirrorError;
use crate::source::LiveSource;

/// A live capture handle plus the source it feeds.
///
/// Dropping the session tears it down: the source is disposed first so no
/// renderer keeps reading from it while the handle is released.
pub struct CaptureSession<B: AudioBackend> {
    device_id: DeviceId,
    device: B::Device,
    handle: B::Capture,
    source: Arc<LiveSource>,
    running: bool,
}

impl<B: AudioBackend> CaptureSession<B> {
    /// Acquire a capture on `device_id`. The handle is started unless `paused`.
    ///
    /// On any failure the half-built handle is disposed before returning.
    pub fn open(backend: &B, device_id: &DeviceId, paused: bool) -> Result<Self, MirrorError> {
        let device = backend
            .directory()
            .resolve_active(device_id)
            .ok_or_else(|| MirrorError::DeviceUnavailable(device_id.clone()))?;

        let mut handle = backend.new_capture();
        match Self::prepare(&mut handle, &device, paused) {
            Ok(source) => Ok(Self {
                device_id: device_id.clone(),
                device,
                handle,
                source,
                running: !paused,
            }),
            Err(e) => {
                handle.dispose();
                Err(e)
            }
        }
    }

    fn prepare(
        handle: &mut B::Capture,
        device: &B::Device,
        paused: bool,
    ) -> Result<Arc<LiveSource>, MirrorError> {
        handle.initialize(device)?;
        if paused {
            handle.stop()?;
        } else {
            handle.start()?;
        }
        handle
            .live_source()
            .ok_or_else(|| MirrorError::CaptureInit("capture produced no live source".into()))
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn source(&self) -> &Arc<LiveSource> {
        &self.source
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the captured endpoint is still usable.
    pub fn is_device_active(&self, directory: &B::Directory) -> bool {
        directory.is_active(&self.device)
    }

    /// Suspend the handle, keeping it and every attached output alive.
    pub fn pause(&mut self) {
        if !self.running {
            return;
        }
        if let Err(e) = self.handle.stop() {
            log::warn!("Failed to pause capture on {}: {}", self.device_id, e);
        }
        self.running = false;
    }

    pub fn resume(&mut self) {
        if self.running {
            return;
        }
        if let Err(e) = self.handle.start() {
            log::warn!("Failed to resume capture on {}: {}", self.device_id, e);
            return;
        }
        self.running = true;
    }

    /// Dispose the source, then the handle.
    pub fn close(self) {
        log::debug!("Closing capture on {}", self.device_id);
        drop(self);
    }
}

impl<B: AudioBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.source.dispose();
        self.handle.dispose();
    }
}
