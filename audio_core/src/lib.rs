pub mod backend;
pub mod capture;
pub mod controller;
pub mod device;
pub mod device_watcher;
pub mod error;
pub mod lane;
pub mod mock;
pub mod outputs;
pub mod power;
pub mod readiness;
pub mod service;
pub mod settings;
pub mod source;
#[cfg(windows)]
pub mod wasapi;

pub use backend::{AudioBackend, CaptureHandle, RenderHandle};
pub use controller::{MirrorController, MirrorSnapshot, MirrorState};
pub use device::{DeviceDirectory, DeviceId, DeviceInfo, DeviceState};
pub use device_watcher::{DeviceEvent, DeviceWatcher, forward_events};
pub use error::MirrorError;
pub use power::{PowerEvent, PowerWatcher};
pub use readiness::{CancelFlag, RetryPolicy, wait_until_ready};
pub use service::MirrorHandle;
pub use settings::{DesiredConfig, SettingsView, SharedSettings};
pub use source::{LiveSource, SourceReader, StreamFormat};
#[cfg(windows)]
pub use wasapi::WasapiBackend;
