//! System power notifications.
//!
//! Endpoints are torn down by the OS across sleep, so the mirror rebuilds
//! itself on resume. Session end (logoff/shutdown) is delivered by the
//! application's console-control handler, not by this watcher.

use std::sync::mpsc::Receiver;

use crate::error::MirrorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Suspend,
    Resume,
    SessionEnding,
}

#[cfg(windows)]
mod ffi {
    use std::ffi::c_void;

    pub const DEVICE_NOTIFY_CALLBACK: u32 = 2;
    pub const PBT_APMSUSPEND: u32 = 0x4;
    pub const PBT_APMRESUMEAUTOMATIC: u32 = 0x12;
    pub const ERROR_SUCCESS: u32 = 0;

    pub type NotifyCallback =
        unsafe extern "system" fn(context: *const c_void, kind: u32, setting: *const c_void) -> u32;

    #[repr(C)]
    pub struct SubscribeParameters {
        pub callback: NotifyCallback,
        pub context: *const c_void,
    }

    #[link(name = "powrprof")]
    unsafe extern "system" {
        pub fn PowerRegisterSuspendResumeNotification(
            flags: u32,
            recipient: *const c_void,
            registration: *mut *mut c_void,
        ) -> u32;
        pub fn PowerUnregisterSuspendResumeNotification(registration: *mut c_void) -> u32;
    }
}

/// Map a `PBT_*` broadcast code. Manual resume (`PBT_APMRESUMESUSPEND`) is
/// always preceded by the automatic one, so only the latter is reported.
#[cfg(windows)]
fn map_broadcast(kind: u32) -> Option<PowerEvent> {
    match kind {
        ffi::PBT_APMSUSPEND => Some(PowerEvent::Suspend),
        ffi::PBT_APMRESUMEAUTOMATIC => Some(PowerEvent::Resume),
        _ => None,
    }
}

#[cfg(windows)]
unsafe extern "system" fn on_power_broadcast(
    context: *const std::ffi::c_void,
    kind: u32,
    _setting: *const std::ffi::c_void,
) -> u32 {
    if let Some(event) = map_broadcast(kind) {
        let sender = unsafe { &*(context as *const std::sync::mpsc::Sender<PowerEvent>) };
        let _ = sender.send(event);
    }
    ffi::ERROR_SUCCESS
}

/// Suspend/resume registration. Unregisters on `stop()` or drop.
pub struct PowerWatcher {
    #[cfg(windows)]
    registration: *mut std::ffi::c_void,
    #[cfg(windows)]
    params: Option<Box<ffi::SubscribeParameters>>,
    #[cfg(windows)]
    sender: Option<Box<std::sync::mpsc::Sender<PowerEvent>>>,
}

// The registration handle is an opaque token valid on any thread.
unsafe impl Send for PowerWatcher {}

impl PowerWatcher {
    #[cfg(windows)]
    pub fn start() -> Result<(PowerWatcher, Receiver<PowerEvent>), MirrorError> {
        let (tx, rx) = std::sync::mpsc::channel();
        let sender = Box::new(tx);
        let params = Box::new(ffi::SubscribeParameters {
            callback: on_power_broadcast,
            context: sender.as_ref() as *const _ as *const std::ffi::c_void,
        });

        let mut registration = std::ptr::null_mut();
        let status = unsafe {
            ffi::PowerRegisterSuspendResumeNotification(
                ffi::DEVICE_NOTIFY_CALLBACK,
                params.as_ref() as *const _ as *const std::ffi::c_void,
                &mut registration,
            )
        };
        if status != ffi::ERROR_SUCCESS {
            return Err(MirrorError::Backend(format!(
                "PowerRegisterSuspendResumeNotification failed: {}",
                status
            )));
        }
        log::debug!("Registered for suspend/resume notifications");

        Ok((
            PowerWatcher {
                registration,
                params: Some(params),
                sender: Some(sender),
            },
            rx,
        ))
    }

    #[cfg(not(windows))]
    pub fn start() -> Result<(PowerWatcher, Receiver<PowerEvent>), MirrorError> {
        Err(MirrorError::Unsupported("power notifications"))
    }

    /// Unregister. Idempotent.
    pub fn stop(&mut self) {
        #[cfg(windows)]
        {
            if !self.registration.is_null() {
                let status =
                    unsafe { ffi::PowerUnregisterSuspendResumeNotification(self.registration) };
                if status != ffi::ERROR_SUCCESS {
                    log::warn!("PowerUnregisterSuspendResumeNotification failed: {}", status);
                }
                self.registration = std::ptr::null_mut();
            }
            // the callback context must outlive the registration
            self.params = None;
            self.sender = None;
        }
    }
}

impl Drop for PowerWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
