//! Audio endpoint change watcher.
//!
//! A background thread registers an `IMMNotificationClient` and forwards every
//! endpoint notification through a channel. Consumers treat all of them the
//! same way: something may have changed, reconcile.

use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::device::DeviceId;
use crate::error::MirrorError;

/// Endpoint notification, keyed by the affected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Added(DeviceId),
    Removed(DeviceId),
    StateChanged(DeviceId),
    PropertyChanged(DeviceId),
}

impl DeviceEvent {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            DeviceEvent::Added(id)
            | DeviceEvent::Removed(id)
            | DeviceEvent::StateChanged(id)
            | DeviceEvent::PropertyChanged(id) => id,
        }
    }
}

#[cfg(windows)]
mod notify {
    use super::DeviceEvent;
    use crate::device::DeviceId;
    use std::sync::mpsc::Sender;
    use windows::Win32::Media::Audio::{
        EDataFlow, ERole, IMMNotificationClient, IMMNotificationClient_Impl,
    };
    use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;
    use windows::core::{PCWSTR, implement};

    #[implement(IMMNotificationClient)]
    pub struct NotificationClient {
        sender: Sender<DeviceEvent>,
    }

    impl NotificationClient {
        pub fn new(sender: Sender<DeviceEvent>) -> Self {
            Self { sender }
        }

        fn forward(&self, id: &PCWSTR, make: fn(DeviceId) -> DeviceEvent) {
            match unsafe { id.to_string() } {
                Ok(id) => {
                    let _ = self.sender.send(make(DeviceId::from(id)));
                }
                Err(e) => log::warn!("Device notification with unreadable id: {}", e),
            }
        }
    }

    impl IMMNotificationClient_Impl for NotificationClient {
        fn OnDeviceStateChanged(
            &self,
            pwstrdeviceid: &PCWSTR,
            _dwnewstate: u32,
        ) -> windows::core::Result<()> {
            self.forward(pwstrdeviceid, DeviceEvent::StateChanged);
            Ok(())
        }

        fn OnDeviceAdded(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
            self.forward(pwstrdeviceid, DeviceEvent::Added);
            Ok(())
        }

        fn OnDeviceRemoved(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
            self.forward(pwstrdeviceid, DeviceEvent::Removed);
            Ok(())
        }

        // default endpoint changes never affect the explicit selection
        fn OnDefaultDeviceChanged(
            &self,
            _flow: EDataFlow,
            _role: ERole,
            _pwstrdefaultdeviceid: &PCWSTR,
        ) -> windows::core::Result<()> {
            Ok(())
        }

        fn OnPropertyValueChanged(
            &self,
            pwstrdeviceid: &PCWSTR,
            _key: &PROPERTYKEY,
        ) -> windows::core::Result<()> {
            self.forward(pwstrdeviceid, DeviceEvent::PropertyChanged);
            Ok(())
        }
    }
}

/// Drain `events` into `on_event` on a dedicated thread. The thread ends
/// when every sender is gone, i.e. when the producing watcher has stopped.
pub fn forward_events<E, F>(
    name: &str,
    events: Receiver<E>,
    mut on_event: F,
) -> Result<JoinHandle<()>, MirrorError>
where
    E: Send + 'static,
    F: FnMut(E) + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            for event in events {
                on_event(event);
            }
        })
        .map_err(|source| MirrorError::Spawn {
            name: name.to_string(),
            source,
        })
}

/// Handle for the device watcher. Drop or call `stop()` to unregister and stop the background thread.
pub struct DeviceWatcher {
    stop_tx: Option<Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl DeviceWatcher {
    /// Register for endpoint notifications on a background thread.
    ///
    /// Returns once registration has succeeded or failed.
    #[cfg(windows)]
    pub fn start() -> Result<(DeviceWatcher, Receiver<DeviceEvent>), MirrorError> {
        use crate::wasapi::com::{ComApartment, create_enumerator};
        use std::sync::mpsc;
        use windows::Win32::Media::Audio::IMMNotificationClient;

        let (event_tx, event_rx) = mpsc::channel::<DeviceEvent>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), MirrorError>>(1);

        let join_handle = thread::Builder::new()
            .name("audio-device-watcher".into())
            .spawn(move || {
                let registered = (|| -> anyhow::Result<_> {
                    let apartment = ComApartment::enter()?;
                    let enumerator = create_enumerator()?;
                    let client: IMMNotificationClient =
                        notify::NotificationClient::new(event_tx).into();
                    unsafe { enumerator.RegisterEndpointNotificationCallback(&client) }.map_err(
                        |e| anyhow::anyhow!("RegisterEndpointNotificationCallback failed: {:?}", e),
                    )?;
                    Ok((apartment, enumerator, client))
                })();

                let (_apartment, enumerator, client) = match registered {
                    Ok(parts) => {
                        let _ = ready_tx.send(Ok(()));
                        parts
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(MirrorError::backend(e)));
                        return;
                    }
                };

                // stop message or a dropped handle both end the watch
                let _ = stop_rx.recv();

                if let Err(e) = unsafe { enumerator.UnregisterEndpointNotificationCallback(&client) } {
                    log::warn!("UnregisterEndpointNotificationCallback failed: {:?}", e);
                }
                log::debug!("Device watcher stopped");
            })
            .map_err(|source| MirrorError::Spawn {
                name: "audio-device-watcher".into(),
                source,
            })?;

        let mut watcher = DeviceWatcher {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => Ok((watcher, event_rx)),
            Ok(Err(e)) => {
                watcher.stop();
                Err(e)
            }
            Err(_) => {
                watcher.stop();
                Err(MirrorError::Backend("device watcher thread exited".into()))
            }
        }
    }

    #[cfg(not(windows))]
    pub fn start() -> Result<(DeviceWatcher, Receiver<DeviceEvent>), MirrorError> {
        Err(MirrorError::Unsupported("audio endpoint notifications"))
    }

    /// Stop the watcher and wait for the background thread to exit.
    ///
    /// Idempotent. After it returns no more events are sent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(h) = self.join_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
