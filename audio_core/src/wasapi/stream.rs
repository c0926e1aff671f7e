//! Shared-mode client setup for loopback capture and rendering.

use anyhow::{Result, anyhow, bail};
use windows::Win32::Media::Audio::{
    AUDCLNT_SHAREMODE, AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM,
    AUDCLNT_STREAMFLAGS_LOOPBACK, AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY, IAudioCaptureClient,
    IAudioClient, IAudioRenderClient, IMMDevice, WAVEFORMATEX,
};
use windows::Win32::System::Com::{CLSCTX_ALL, CoTaskMemFree};

use crate::source::StreamFormat;

/// Size of the fixed `WAVEFORMATEX` header.
const WAVEFORMATEX_LEN: usize = 18;

pub(super) fn activate(device: &IMMDevice) -> Result<IAudioClient> {
    unsafe { device.Activate::<IAudioClient>(CLSCTX_ALL, None) }
        .map_err(|e| anyhow!("Failed to activate IAudioClient: {:?}", e))
}

/// Parse a raw `WAVEFORMATEX` (possibly extensible) blob.
pub(super) fn format_from_descriptor(descriptor: Vec<u8>) -> Result<StreamFormat> {
    if descriptor.len() < WAVEFORMATEX_LEN {
        bail!("format descriptor too short: {} bytes", descriptor.len());
    }
    let u16_at = |i: usize| u16::from_le_bytes([descriptor[i], descriptor[i + 1]]);
    let channels = u16_at(2);
    let sample_rate =
        u32::from_le_bytes([descriptor[4], descriptor[5], descriptor[6], descriptor[7]]);
    let block_align = u16_at(12);
    if channels == 0 || sample_rate == 0 || block_align == 0 {
        bail!(
            "unusable mix format: {} Hz, {} channels, block align {}",
            sample_rate,
            channels,
            block_align
        );
    }
    Ok(StreamFormat {
        sample_rate,
        channels,
        block_align,
        descriptor,
    })
}

/// The engine mix format of `client`, copied out of COM memory.
pub(super) fn mix_format(client: &IAudioClient) -> Result<StreamFormat> {
    let pwf =
        unsafe { client.GetMixFormat() }.map_err(|e| anyhow!("GetMixFormat failed: {:?}", e))?;
    if pwf.is_null() {
        bail!("GetMixFormat returned null");
    }

    let header = unsafe { std::ptr::read_unaligned(pwf) };
    let size = WAVEFORMATEX_LEN + header.cbSize as usize;
    let bytes = unsafe { std::slice::from_raw_parts(pwf as *const u8, size) }.to_vec();

    unsafe { CoTaskMemFree(Some(pwf as *const _)) };

    format_from_descriptor(bytes)
}

fn shared_mode() -> AUDCLNT_SHAREMODE {
    AUDCLNT_SHAREMODE(AUDCLNT_SHAREMODE_SHARED.0 as i32)
}

fn hns(ms: u32) -> i64 {
    ms as i64 * 10_000
}

/// Initialize `client` for loopback capture of its render endpoint.
pub(super) fn initialize_loopback(
    client: &IAudioClient,
    format: &StreamFormat,
    buffer_ms: u32,
) -> Result<IAudioCaptureClient> {
    let pwf = format.descriptor.as_ptr() as *const WAVEFORMATEX;
    unsafe {
        client
            .Initialize(
                shared_mode(),
                AUDCLNT_STREAMFLAGS_LOOPBACK,
                hns(buffer_ms),
                0,
                pwf,
                None,
            )
            .map_err(|e| anyhow!("IAudioClient::Initialize (capture) failed: {:?}", e))?;

        client.GetService::<IAudioCaptureClient>().map_err(|e| {
            anyhow!(
                "IAudioClient::GetService (IAudioCaptureClient) failed: {:?}",
                e
            )
        })
    }
}

/// Initialize `client` to render `format`, letting the engine resample if the
/// endpoint mix format differs.
pub(super) fn initialize_render(
    client: &IAudioClient,
    format: &StreamFormat,
    latency_ms: u32,
) -> Result<IAudioRenderClient> {
    let pwf = format.descriptor.as_ptr() as *const WAVEFORMATEX;
    unsafe {
        client
            .Initialize(
                shared_mode(),
                AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY,
                hns(latency_ms),
                0,
                pwf,
                None,
            )
            .map_err(|e| anyhow!("IAudioClient::Initialize (render) failed: {:?}", e))?;

        client.GetService::<IAudioRenderClient>().map_err(|e| {
            anyhow!(
                "IAudioClient::GetService (IAudioRenderClient) failed: {:?}",
                e
            )
        })
    }
}
