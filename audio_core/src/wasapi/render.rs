//! Shared-mode renderer playing a live source on one endpoint.

use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use windows::Win32::Media::Audio::{IAudioClient, IAudioRenderClient};

use super::com::{create_enumerator, device_by_id};
use super::device::WasapiDevice;
use super::pump::{POLL_INTERVAL, PumpThread, request};
use super::stream::{activate, initialize_render};
use crate::backend::RenderHandle;
use crate::error::MirrorError;
use crate::source::{LiveSource, SourceReader};
use config::StreamSettings;

enum Command {
    Start(SyncSender<Result<()>>),
}

struct RenderPump {
    client: IAudioClient,
    render: IAudioRenderClient,
    buffer_frames: u32,
    reader: SourceReader,
}

impl RenderPump {
    fn open(device_id: &str, reader: SourceReader, latency_ms: u32) -> Result<((), RenderPump)> {
        let enumerator = create_enumerator()?;
        let device = device_by_id(&enumerator, device_id)?;
        let client = activate(&device)?;
        let render = initialize_render(&client, reader.format(), latency_ms)?;
        let buffer_frames = unsafe { client.GetBufferSize() }
            .map_err(|e| anyhow!("GetBufferSize failed: {:?}", e))?;
        log::debug!("Renderer on {} holds {} frames", device_id, buffer_frames);

        Ok((
            (),
            RenderPump {
                client,
                render,
                buffer_frames,
                reader,
            },
        ))
    }

    /// Top the endpoint buffer up from the reader. Underruns play silence.
    fn fill(&mut self) -> Result<()> {
        let padding = unsafe { self.client.GetCurrentPadding() }
            .map_err(|e| anyhow!("GetCurrentPadding failed: {:?}", e))?;
        let frames = self.buffer_frames.saturating_sub(padding);
        if frames == 0 {
            return Ok(());
        }

        let block_align = self.reader.format().block_align as usize;
        let data = unsafe { self.render.GetBuffer(frames) }
            .map_err(|e| anyhow!("GetBuffer failed: {:?}", e))?;
        let out = unsafe { std::slice::from_raw_parts_mut(data, frames as usize * block_align) };
        self.reader.read(out);

        unsafe { self.render.ReleaseBuffer(frames, 0) }
            .map_err(|e| anyhow!("ReleaseBuffer failed: {:?}", e))
    }

    fn run(mut self, commands: Receiver<Command>) {
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

            if let Some(Command::Start(reply)) = command {
                // prime with silence so the first period does not glitch
                let res = self.fill().and_then(|_| {
                    unsafe { self.client.Start() }
                        .map_err(|e| anyhow!("IAudioClient::Start (render) failed: {:?}", e))
                });
                running = res.is_ok();
                let _ = reply.send(res);
            }

            if running {
                if let Err(e) = self.fill() {
                    log::warn!("Renderer stopped: {:#}", e);
                    running = false;
                }
            }
        }

        let _ = unsafe { self.client.Stop() };
    }
}

/// [`RenderHandle`] backed by a WASAPI render client on its own thread.
pub struct WasapiRender {
    settings: StreamSettings,
    pump: Option<PumpThread<Command>>,
}

impl WasapiRender {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            settings,
            pump: None,
        }
    }
}

impl RenderHandle<WasapiDevice> for WasapiRender {
    fn initialize(
        &mut self,
        device: &WasapiDevice,
        source: &Arc<LiveSource>,
    ) -> Result<(), MirrorError> {
        let render_init = |reason: String| MirrorError::RenderInit {
            device: device.id.clone(),
            reason,
        };
        if source.is_disposed() {
            return Err(render_init("source is disposed".into()));
        }

        let id = device.id.as_str().to_string();
        let reader = source.subscribe();
        let latency_ms = self.settings.render_latency_ms;
        let (pump, ()) = PumpThread::spawn(
            "wasapi-render",
            move || RenderPump::open(&id, reader, latency_ms),
            RenderPump::run,
        )
        .map_err(|e| render_init(format!("{:#}", e)))?;
        self.pump = Some(pump);
        Ok(())
    }

    fn start(&mut self) -> Result<(), MirrorError> {
        let pump = self
            .pump
            .as_ref()
            .ok_or_else(|| MirrorError::Backend("renderer is not initialized".into()))?;
        request(pump, Command::Start).map_err(MirrorError::backend)
    }

    fn dispose(&mut self) {
        if let Some(mut pump) = self.pump.take() {
            pump.shutdown();
        }
    }
}

impl Drop for WasapiRender {
    fn drop(&mut self) {
        self.dispose();
    }
}
