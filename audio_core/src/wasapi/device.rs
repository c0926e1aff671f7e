//! Endpoint lookup and enumeration through `IMMDeviceEnumerator`.
//!
//! Every query opens a fresh enumerator inside `#[with_com]`, so the
//! directory holds no COM state and can be shared freely.

use anyhow::{Result, anyhow};
use callcomapi_macros::with_com;
use windows::Win32::Media::Audio::{
    DEVICE_STATE_ACTIVE, DEVICE_STATE_DISABLED, DEVICE_STATE_NOTPRESENT, DEVICE_STATE_UNPLUGGED,
    IMMDevice, IMMDeviceCollection, eRender,
};
use windows::Win32::System::Com::STGM_READ;

use super::com::{PKEY_DEVICE_FRIENDLY, create_enumerator, device_by_id, read_property_string};
use crate::device::{DeviceDirectory, DeviceId, DeviceInfo, DeviceState};
use crate::error::MirrorError;

/// A resolved endpoint. Only the id is kept; pump threads re-open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasapiDevice {
    pub id: DeviceId,
}

#[derive(Debug, Default)]
pub struct WasapiDirectory;

pub(crate) fn map_state(state: u32) -> DeviceState {
    if (state & DEVICE_STATE_ACTIVE) != 0 {
        DeviceState::Active
    } else if (state & DEVICE_STATE_DISABLED) != 0 {
        DeviceState::Disabled
    } else if (state & DEVICE_STATE_UNPLUGGED) != 0 {
        DeviceState::Unplugged
    } else if (state & DEVICE_STATE_NOTPRESENT) != 0 {
        DeviceState::NotPresent
    } else {
        DeviceState::Unknown
    }
}

fn device_info_internal(device: &IMMDevice) -> Result<DeviceInfo> {
    let id_pwstr = unsafe { device.GetId() }.map_err(|e| anyhow!("GetId failed: {:?}", e))?;
    let id = unsafe { id_pwstr.to_string() }.map_err(|e| anyhow!("bad device id: {}", e))?;
    let state = unsafe { device.GetState() }.unwrap_or(0);

    let mut friendly_name = id.clone();
    if let Ok(store) = unsafe { device.OpenPropertyStore(STGM_READ) } {
        if let Some(s) = unsafe { read_property_string(&store, &PKEY_DEVICE_FRIENDLY) } {
            friendly_name = s;
        }
    }

    Ok(DeviceInfo {
        id: DeviceId::from(id),
        friendly_name,
        state: map_state(state),
    })
}

#[with_com]
fn endpoint_state(id: &str) -> Result<u32> {
    let enumerator = create_enumerator()?;
    let device = device_by_id(&enumerator, id)?;
    unsafe { device.GetState() }.map_err(|e| anyhow!("GetState failed: {:?}", e))
}

#[with_com]
fn active_render_endpoints() -> Result<Vec<DeviceInfo>> {
    let enumerator = create_enumerator()?;
    let collection: IMMDeviceCollection =
        unsafe { enumerator.EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE) }
            .map_err(|e| anyhow!("EnumAudioEndpoints failed: {:?}", e))?;
    let count = unsafe { collection.GetCount() }.map_err(|e| anyhow!("GetCount failed: {:?}", e))?;

    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let device =
            unsafe { collection.Item(i) }.map_err(|e| anyhow!("Item({}) failed: {:?}", i, e))?;
        match device_info_internal(&device) {
            Ok(info) => out.push(info),
            Err(e) => log::debug!("Skipping endpoint {}: {:#}", i, e),
        }
    }
    Ok(out)
}

impl DeviceDirectory for WasapiDirectory {
    type Device = WasapiDevice;

    fn resolve(&self, id: &DeviceId) -> Option<WasapiDevice> {
        match endpoint_state(id.as_str()) {
            Ok(_) => Some(WasapiDevice { id: id.clone() }),
            Err(e) => {
                log::debug!("Cannot resolve {}: {:#}", id, e);
                None
            }
        }
    }

    fn is_active(&self, device: &WasapiDevice) -> bool {
        endpoint_state(device.id.as_str())
            .map(|s| map_state(s) == DeviceState::Active)
            .unwrap_or(false)
    }

    fn enumerate_active_render_devices(&self) -> Result<Vec<DeviceInfo>, MirrorError> {
        active_render_endpoints().map_err(MirrorError::backend)
    }
}
