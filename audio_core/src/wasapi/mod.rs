//! Windows backend on top of WASAPI shared mode.
//!
//! The input endpoint is captured in loopback; each output gets its own
//! render client fed with the exact captured mix format.

pub mod capture;
pub mod com;
pub mod device;
mod pump;
pub mod render;
mod stream;

pub use capture::WasapiCapture;
pub use device::{WasapiDevice, WasapiDirectory};
pub use render::WasapiRender;

use config::StreamSettings;

use crate::backend::AudioBackend;

#[derive(Debug, Default)]
pub struct WasapiBackend {
    directory: WasapiDirectory,
    stream: StreamSettings,
}

impl WasapiBackend {
    pub fn new(stream: StreamSettings) -> Self {
        Self {
            directory: WasapiDirectory,
            stream,
        }
    }
}

impl AudioBackend for WasapiBackend {
    type Device = WasapiDevice;
    type Directory = WasapiDirectory;
    type Capture = WasapiCapture;
    type Render = WasapiRender;

    fn directory(&self) -> &WasapiDirectory {
        &self.directory
    }

    fn new_capture(&self) -> WasapiCapture {
        WasapiCapture::new(self.stream)
    }

    fn new_render(&self) -> WasapiRender {
        WasapiRender::new(self.stream)
    }
}
