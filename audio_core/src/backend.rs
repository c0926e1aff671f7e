//! Capability objects supplied by a platform backend.
//!
//! The core never touches OS audio APIs directly. It asks an [`AudioBackend`]
//! for fresh capture/render handles and drives them through
//! initialize/start/stop/dispose.

use std::sync::Arc;

use crate::device::DeviceDirectory;
use crate::error::MirrorError;
use crate::source::LiveSource;

/// Loopback capture bound to one endpoint.
///
/// `dispose` must be idempotent and safe to call after a failed `initialize`.
pub trait CaptureHandle<D>: Send {
    fn initialize(&mut self, device: &D) -> Result<(), MirrorError>;

    fn start(&mut self) -> Result<(), MirrorError>;

    fn stop(&mut self) -> Result<(), MirrorError>;

    fn dispose(&mut self);

    /// The zero-filling source fed by this capture, once initialized.
    fn live_source(&self) -> Option<Arc<LiveSource>>;
}

/// Renderer playing a [`LiveSource`] on one endpoint.
///
/// `dispose` must be idempotent and safe to call after a failed `initialize`.
pub trait RenderHandle<D>: Send {
    fn initialize(&mut self, device: &D, source: &Arc<LiveSource>) -> Result<(), MirrorError>;

    fn start(&mut self) -> Result<(), MirrorError>;

    fn dispose(&mut self);
}

/// Factory for the directory and handles of one platform.
pub trait AudioBackend: Send + Sync + 'static {
    type Device: Clone + Send + std::fmt::Debug + 'static;
    type Directory: DeviceDirectory<Device = Self::Device>;
    type Capture: CaptureHandle<Self::Device> + 'static;
    type Render: RenderHandle<Self::Device> + 'static;

    fn directory(&self) -> &Self::Directory;

    fn new_capture(&self) -> Self::Capture;

    fn new_render(&self) -> Self::Render;
}
