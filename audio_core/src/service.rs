//! Thread-safe surface of the mirror.
//!
//! [`MirrorHandle`] is what the UI, the device watcher and the power watcher
//! talk to. Every call is fire-and-forget: it turns into one or more tasks on
//! the serial lane that owns the [`MirrorController`]. State flows back out
//! through a snapshot published after every task.

use arc_swap::ArcSwap;
use config::SelectionChange;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::backend::AudioBackend;
use crate::controller::{MirrorController, MirrorSnapshot, MirrorState};
use crate::device_watcher::DeviceEvent;
use crate::error::MirrorError;
use crate::lane::SerialLane;
use crate::power::PowerEvent;
use crate::readiness::{CancelFlag, RetryPolicy, wait_until_ready};
use crate::settings::SettingsView;

struct Shared<B: AudioBackend> {
    lane: SerialLane<MirrorController<B>>,
    snapshot: Arc<ArcSwap<MirrorSnapshot>>,
    backend: Arc<B>,
    settings: Arc<dyn SettingsView>,
    readiness: RetryPolicy,
    devices_changed: AtomicBool,
    shutting_down: CancelFlag,
}

/// Cloneable handle to a running mirror. Safe to use from any thread.
pub struct MirrorHandle<B: AudioBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: AudioBackend> Clone for MirrorHandle<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: AudioBackend> MirrorHandle<B> {
    /// Spawn the lane worker with a stopped controller.
    pub fn spawn(
        backend: Arc<B>,
        settings: Arc<dyn SettingsView>,
        readiness: RetryPolicy,
    ) -> Result<Self, MirrorError> {
        let snapshot = Arc::new(ArcSwap::from_pointee(MirrorSnapshot::default()));
        let publish = Arc::clone(&snapshot);
        let controller = MirrorController::new(Arc::clone(&backend), Arc::clone(&settings));
        let lane = SerialLane::spawn("audio-mirror-lane", controller, move |ctrl| {
            let next = ctrl.snapshot();
            if **publish.load() != next {
                publish.store(Arc::new(next));
            }
        })?;

        Ok(Self {
            shared: Arc::new(Shared {
                lane,
                snapshot,
                backend,
                settings,
                readiness,
                devices_changed: AtomicBool::new(true),
                shutting_down: CancelFlag::new(),
            }),
        })
    }

    fn enqueue<F>(&self, what: &str, f: F)
    where
        F: FnOnce(&mut MirrorController<B>) + Send + 'static,
    {
        if let Err(e) = self.shared.lane.submit(f) {
            log::debug!("Dropping {} request: {}", what, e);
        }
    }

    pub fn start_mirror(&self) {
        self.enqueue("start", |c| c.start_mirror());
    }

    pub fn stop_mirror(&self) {
        self.enqueue("stop", |c| c.stop_mirror());
    }

    pub fn pause_mirror(&self) {
        self.enqueue("pause", |c| c.pause_mirror());
    }

    pub fn resume_mirror(&self) {
        self.enqueue("resume", |c| c.resume_mirror());
    }

    pub fn reconcile_outputs(&self) {
        self.enqueue("reconcile", |c| {
            let report = c.reconcile_outputs();
            if !report.is_unchanged() {
                log::debug!("Outputs updated: {:?}", report);
            }
        });
    }

    /// Start (no-op if already running) and attach outputs.
    pub fn start_and_reconcile(&self) {
        self.start_mirror();
        self.reconcile_outputs();
    }

    /// Tear down and rebuild from the current selection.
    pub fn restart_mirror(&self) {
        log::info!("Restarting mirror");
        self.stop_mirror();
        self.start_and_reconcile();
    }

    /// Queue the work a selection edit calls for.
    pub fn apply_selection(&self, change: SelectionChange) {
        match change {
            SelectionChange::Stop => self.stop_mirror(),
            SelectionChange::Restart => self.restart_mirror(),
            SelectionChange::StartAndReconcile => self.start_and_reconcile(),
            SelectionChange::Reconcile => self.reconcile_outputs(),
        }
    }

    /// Any endpoint change may add or remove a usable output.
    pub fn on_device_event(&self, event: DeviceEvent) {
        log::debug!("Device event: {:?}", event);
        self.shared.devices_changed.store(true, Ordering::SeqCst);
        self.reconcile_outputs();
    }

    pub fn on_power_event(&self, event: PowerEvent) {
        match event {
            PowerEvent::Suspend => log::info!("System is suspending"),
            PowerEvent::Resume => {
                log::info!("Detected system resume from sleep, restarting mirror");
                self.stop_mirror();
                let handle = self.clone();
                let spawned = thread::Builder::new()
                    .name("audio-mirror-resume".into())
                    .spawn(move || {
                        handle.start_when_ready();
                    });
                if let Err(e) = spawned {
                    log::error!("Failed to spawn resume thread: {}", e);
                }
            }
            PowerEvent::SessionEnding => {
                log::info!("Session is ending");
                self.shutdown();
            }
        }
    }

    /// Wait for the selected devices, then start and attach outputs.
    ///
    /// Blocks the calling thread for up to the readiness budget. Returns
    /// whether the start was queued.
    pub fn start_when_ready(&self) -> bool {
        let ready = wait_until_ready(
            self.shared.backend.directory(),
            self.shared.settings.as_ref(),
            self.shared.readiness,
            &self.shared.shutting_down,
        );
        if ready {
            self.start_and_reconcile();
        }
        ready
    }

    /// Latest published controller state.
    pub fn snapshot(&self) -> MirrorSnapshot {
        MirrorSnapshot::clone(&self.shared.snapshot.load())
    }

    pub fn state(&self) -> MirrorState {
        self.shared.snapshot.load().state
    }

    /// Wait until every task queued so far has run and return the resulting state.
    pub fn settle(&self) -> Result<MirrorSnapshot, MirrorError> {
        self.shared.lane.call_sync(|c| c.snapshot())
    }

    /// True once after any device notification (and initially), telling the
    /// UI to re-enumerate endpoints.
    pub fn take_devices_changed(&self) -> bool {
        self.shared.devices_changed.swap(false, Ordering::SeqCst)
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.shared.backend
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutting_down.is_cancelled()
    }

    /// Final stop: queue a teardown, refuse further work and join the lane.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.cancel() {
            return;
        }
        log::info!("Shutting down audio mirror");
        self.shared.lane.close_with(|c| c.stop_mirror());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceId, DeviceState};
    use crate::mock::MockBackend;
    use crate::settings::SharedSettings;
    use std::time::Duration;

    fn spawn(
        devices: &[&str],
        input: Option<&str>,
        outputs: &[&str],
    ) -> (Arc<MockBackend>, Arc<SharedSettings>, MirrorHandle<MockBackend>) {
        let backend = Arc::new(MockBackend::new());
        for d in devices {
            backend.add_device(*d, DeviceState::Active);
        }
        let settings = Arc::new(SharedSettings::with_selection(
            input,
            outputs.iter().copied(),
        ));
        let policy = RetryPolicy {
            attempts: 3,
            interval: Duration::from_millis(1),
        };
        let handle = MirrorHandle::spawn(backend.clone(), settings.clone(), policy).unwrap();
        (backend, settings, handle)
    }

    fn ids(list: &[&str]) -> Vec<DeviceId> {
        list.iter().map(|s| DeviceId::from(*s)).collect()
    }

    #[test]
    fn snapshot_follows_lane() {
        let (_backend, _settings, handle) = spawn(&["in", "a"], Some("in"), &["a"]);
        assert_eq!(handle.state(), MirrorState::Stopped);
        handle.start_and_reconcile();
        let settled = handle.settle().unwrap();
        assert_eq!(settled.state, MirrorState::Running);
        assert_eq!(handle.snapshot(), settled);
        assert_eq!(settled.input, Some(DeviceId::from("in")));
        assert_eq!(settled.outputs, ids(&["a"]));
    }

    #[test]
    fn device_events_trigger_reconciliation() {
        let (backend, _settings, handle) = spawn(&["in", "a"], Some("in"), &["a", "b"]);
        handle.start_and_reconcile();
        assert_eq!(handle.settle().unwrap().outputs, ids(&["a"]));
        assert!(handle.take_devices_changed());
        assert!(!handle.take_devices_changed());

        backend.add_device("b", DeviceState::Active);
        handle.on_device_event(DeviceEvent::Added(DeviceId::from("b")));
        assert_eq!(handle.settle().unwrap().outputs, ids(&["a", "b"]));
        assert!(handle.take_devices_changed());

        backend.set_state("a", DeviceState::Unplugged);
        handle.on_device_event(DeviceEvent::StateChanged(DeviceId::from("a")));
        assert_eq!(handle.settle().unwrap().outputs, ids(&["b"]));
    }

    #[test]
    fn selection_changes_map_to_lane_work() {
        let (backend, settings, handle) = spawn(&["in", "in2", "a"], Some("in"), &["a"]);
        handle.apply_selection(SelectionChange::StartAndReconcile);
        assert_eq!(handle.settle().unwrap().state, MirrorState::Running);

        settings.set_input(Some(DeviceId::from("in2")));
        handle.apply_selection(SelectionChange::Restart);
        let snap = handle.settle().unwrap();
        assert_eq!(snap.input, Some(DeviceId::from("in2")));
        assert_eq!(snap.outputs, ids(&["a"]));
        assert_eq!(backend.live_captures(), 1);

        handle.apply_selection(SelectionChange::Stop);
        assert_eq!(handle.settle().unwrap().state, MirrorState::Stopped);
        assert_eq!(backend.live_captures(), 0);
    }

    #[test]
    fn resume_from_sleep_rebuilds_the_mirror() {
        let (backend, _settings, handle) = spawn(&["in", "a"], Some("in"), &["a"]);
        handle.start_and_reconcile();
        handle.settle().unwrap();
        assert_eq!(backend.captures_created(), 1);

        handle.on_power_event(PowerEvent::Resume);
        let mut snap = handle.settle().unwrap();
        for _ in 0..200 {
            if backend.captures_created() == 2 && snap.outputs == ids(&["a"]) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
            snap = handle.settle().unwrap();
        }
        assert_eq!(backend.captures_created(), 2);
        assert_eq!(snap.state, MirrorState::Running);
        assert_eq!(snap.outputs, ids(&["a"]));
        assert_eq!(backend.live_captures(), 1);
    }

    #[test]
    fn session_end_tears_everything_down() {
        let (backend, _settings, handle) = spawn(&["in", "a"], Some("in"), &["a"]);
        handle.start_and_reconcile();
        handle.settle().unwrap();

        handle.on_power_event(PowerEvent::SessionEnding);
        assert!(handle.is_shut_down());
        assert_eq!(backend.live_captures(), 0);
        assert!(backend.live_render_ids().is_empty());
        assert_eq!(handle.state(), MirrorState::Stopped);

        handle.start_and_reconcile();
        assert!(handle.settle().is_err());
        assert_eq!(backend.live_captures(), 0);
    }

    #[test]
    fn no_capture_survives_shutdown_under_concurrent_starts() {
        let (backend, _settings, handle) = spawn(&["in", "a"], Some("in"), &["a"]);
        let starter = {
            let handle = handle.clone();
            thread::spawn(move || {
                while !handle.is_shut_down() {
                    handle.start_and_reconcile();
                    thread::yield_now();
                }
                for _ in 0..10 {
                    handle.start_and_reconcile();
                }
            })
        };
        thread::sleep(Duration::from_millis(5));
        handle.shutdown();
        starter.join().unwrap();

        assert_eq!(backend.live_captures(), 0);
        assert!(backend.live_render_ids().is_empty());
        assert_eq!(handle.state(), MirrorState::Stopped);
    }

    #[test]
    fn start_when_ready_gives_up_without_devices() {
        let (backend, _settings, handle) = spawn(&["a"], Some("in"), &["a"]);
        assert!(!handle.start_when_ready());
        assert_eq!(handle.settle().unwrap().state, MirrorState::Stopped);
        assert_eq!(backend.captures_created(), 0);
    }
}
