//! COM plumbing shared by the WASAPI backend.
//!
//! Every backend thread enters the multithreaded apartment once, creates its
//! own COM objects and drops them before leaving. Only device id strings ever
//! cross threads.

use anyhow::{Result, anyhow};
use std::ffi::OsStr;
use std::marker::PhantomData;
use std::os::windows::ffi::OsStrExt;
use windows::Win32::Media::Audio::{IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator};
use windows::Win32::System::Com::StructuredStorage::PROPVARIANT;
use windows::Win32::System::Com::{
    CLSCTX_ALL, COINIT_MULTITHREADED, CoCreateInstance, CoInitializeEx, CoUninitialize,
};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};
use windows::core::{GUID, PCWSTR};

#[link(name = "ole32")]
unsafe extern "system" {
    fn PropVariantClear(pvar: *mut PROPVARIANT) -> i32;
}

/// MTA membership of the current thread, released on drop.
pub struct ComApartment {
    // CoUninitialize must run on the thread that entered
    _thread_bound: PhantomData<*const ()>,
}

impl ComApartment {
    pub fn enter() -> Result<Self> {
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
            .map_err(|e| anyhow!("CoInitializeEx failed: {:?}", e))?;
        Ok(Self {
            _thread_bound: PhantomData,
        })
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe { CoUninitialize() };
    }
}

/// Create the device enumerator. Must be called in COM.
pub fn create_enumerator() -> Result<IMMDeviceEnumerator> {
    unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
        .map_err(|e| anyhow!("CoCreateInstance MMDeviceEnumerator failed: {:?}", e))
}

/// Look an endpoint up by id. Must be called in COM.
pub fn device_by_id(enumerator: &IMMDeviceEnumerator, id: &str) -> Result<IMMDevice> {
    let wide: Vec<u16> = OsStr::new(id)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    let pwstr = PCWSTR(wide.as_ptr());

    unsafe { enumerator.GetDevice(pwstr) }.map_err(|e| anyhow!("GetDevice({}) failed: {:?}", id, e))
}

pub const PKEY_DEVICE_FRIENDLY: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_u128(0xa45c254e_df1c_4efd_8020_67d146a850e0),
    pid: 14,
};

pub unsafe fn read_property_string(store: &IPropertyStore, key: &PROPERTYKEY) -> Option<String> {
    let mut pv = unsafe { store.GetValue(key) }.ok()?;
    let mut result = None;
    unsafe {
        let raw = pv.Anonymous.Anonymous.Anonymous.pwszVal.0 as *const u16;
        if !raw.is_null() {
            let mut len = 0usize;
            while *raw.add(len) != 0 {
                len += 1;
            }
            let slice = std::slice::from_raw_parts(raw, len);
            if let Ok(s) = String::from_utf16(slice) {
                if !s.is_empty() {
                    result = Some(s);
                }
            }
        }
        let _ = PropVariantClear(&mut pv);
    }
    result
}
