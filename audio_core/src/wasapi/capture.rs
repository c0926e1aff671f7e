//! Loopback capture of one render endpoint.

use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use windows::Win32::Media::Audio::{IAudioCaptureClient, IAudioClient};

use super::com::{create_enumerator, device_by_id};
use super::device::WasapiDevice;
use super::pump::{POLL_INTERVAL, PumpThread, request};
use super::stream::{activate, initialize_loopback, mix_format};
use crate::backend::CaptureHandle;
use crate::error::MirrorError;
use crate::source::LiveSource;
use config::StreamSettings;

const AUDCLNT_BUFFERFLAGS_SILENT: u32 = 0x2;

enum Command {
    Start(SyncSender<Result<()>>),
    Stop(SyncSender<Result<()>>),
}

struct CapturePump {
    client: IAudioClient,
    capture: IAudioCaptureClient,
    source: Arc<LiveSource>,
}

impl CapturePump {
    fn open(device_id: &str, settings: StreamSettings) -> Result<(Arc<LiveSource>, CapturePump)> {
        let enumerator = create_enumerator()?;
        let device = device_by_id(&enumerator, device_id)?;
        let client = activate(&device)?;
        let format = mix_format(&client)?;
        let capture = initialize_loopback(&client, &format, settings.capture_buffer_ms)?;
        log::debug!(
            "Loopback capture on {}: {} Hz, {} channels",
            device_id,
            format.sample_rate,
            format.channels
        );

        let source = Arc::new(LiveSource::with_max_latency(
            format,
            std::time::Duration::from_millis(settings.max_queue_ms as u64),
        ));
        let pump = CapturePump {
            client,
            capture,
            source: Arc::clone(&source),
        };
        Ok((source, pump))
    }

    /// Move every pending packet into the source.
    fn drain(&self) -> Result<()> {
        let block_align = self.source.format().block_align as usize;
        loop {
            let packet = unsafe { self.capture.GetNextPacketSize() }
                .map_err(|e| anyhow!("GetNextPacketSize failed: {:?}", e))?;
            if packet == 0 {
                return Ok(());
            }

            let mut data: *mut u8 = std::ptr::null_mut();
            let mut frames: u32 = 0;
            let mut flags: u32 = 0;
            unsafe { self.capture.GetBuffer(&mut data, &mut frames, &mut flags, None, None) }
                .map_err(|e| anyhow!("GetBuffer failed: {:?}", e))?;

            if flags & AUDCLNT_BUFFERFLAGS_SILENT != 0 || data.is_null() {
                self.source.push_silence(frames as usize);
            } else {
                let bytes = frames as usize * block_align;
                let slice = unsafe { std::slice::from_raw_parts(data as *const u8, bytes) };
                self.source.push(slice);
            }

            unsafe { self.capture.ReleaseBuffer(frames) }
                .map_err(|e| anyhow!("ReleaseBuffer failed: {:?}", e))?;
        }
    }

    fn run(self, commands: Receiver<Command>) {
        let mut running = false;
        loop {
            let command = if running {
                match commands.recv_timeout(POLL_INTERVAL) {
                    Ok(c) => Some(c),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match commands.recv() {
                    Ok(c) => Some(c),
                    Err(_) => break,
                }
            };

            match command {
                Some(Command::Start(reply)) => {
                    let res = unsafe { self.client.Start() }
                        .map_err(|e| anyhow!("IAudioClient::Start (capture) failed: {:?}", e));
                    running = res.is_ok();
                    let _ = reply.send(res);
                }
                Some(Command::Stop(reply)) => {
                    let res = unsafe { self.client.Stop() }
                        .map_err(|e| anyhow!("IAudioClient::Stop (capture) failed: {:?}", e));
                    running = false;
                    let _ = reply.send(res);
                }
                None => {}
            }

            if running {
                if let Err(e) = self.drain() {
                    // typically AUDCLNT_E_DEVICE_INVALIDATED; the next restart rebuilds
                    log::warn!("Loopback capture stopped: {:#}", e);
                    running = false;
                }
            }
        }

        let _ = unsafe { self.client.Stop() };
        self.source.dispose();
    }
}

/// [`CaptureHandle`] backed by a WASAPI loopback client on its own thread.
pub struct WasapiCapture {
    settings: StreamSettings,
    pump: Option<PumpThread<Command>>,
    source: Option<Arc<LiveSource>>,
}

impl WasapiCapture {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            settings,
            pump: None,
            source: None,
        }
    }

    fn pump(&self) -> Result<&PumpThread<Command>, MirrorError> {
        self.pump
            .as_ref()
            .ok_or_else(|| MirrorError::CaptureInit("capture is not initialized".into()))
    }
}

impl CaptureHandle<WasapiDevice> for WasapiCapture {
    fn initialize(&mut self, device: &WasapiDevice) -> Result<(), MirrorError> {
        let id = device.id.as_str().to_string();
        let settings = self.settings;
        let (pump, source) = PumpThread::spawn(
            "wasapi-capture",
            move || CapturePump::open(&id, settings),
            CapturePump::run,
        )
        .map_err(|e| MirrorError::CaptureInit(format!("{:#}", e)))?;
        self.pump = Some(pump);
        self.source = Some(source);
        Ok(())
    }

    fn start(&mut self) -> Result<(), MirrorError> {
        request(self.pump()?, Command::Start).map_err(MirrorError::backend)
    }

    fn stop(&mut self) -> Result<(), MirrorError> {
        request(self.pump()?, Command::Stop).map_err(MirrorError::backend)
    }

    fn dispose(&mut self) {
        if let Some(mut pump) = self.pump.take() {
            pump.shutdown();
        }
        if let Some(source) = self.source.take() {
            source.dispose();
        }
    }

    fn live_source(&self) -> Option<Arc<LiveSource>> {
        self.source.clone()
    }
}

impl Drop for WasapiCapture {
    fn drop(&mut self) {
        self.dispose();
    }
}
