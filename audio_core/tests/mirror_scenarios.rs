//! End-to-end behaviour of the mirror through its thread-safe handle,
//! driven by the in-memory backend.

use audio_core::mock::MockBackend;
use audio_core::{
    DeviceEvent, DeviceId, DeviceState, MirrorHandle, MirrorState, RetryPolicy, SettingsView,
    SharedSettings,
};
use config::ConfigManager;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        interval: Duration::from_millis(1),
    }
}

fn ids(list: &[&str]) -> Vec<DeviceId> {
    list.iter().map(|s| DeviceId::from(*s)).collect()
}

fn mirror(
    backend: MockBackend,
    devices: &[&str],
    input: Option<&str>,
    outputs: &[&str],
) -> (Arc<MockBackend>, Arc<SharedSettings>, MirrorHandle<MockBackend>) {
    let backend = Arc::new(backend);
    for d in devices {
        backend.add_device(*d, DeviceState::Active);
    }
    let settings = Arc::new(SharedSettings::with_selection(
        input,
        outputs.iter().copied(),
    ));
    let handle = MirrorHandle::spawn(backend.clone(), settings.clone(), quick_policy())
        .expect("spawn mirror");
    (backend, settings, handle)
}

#[test]
fn outputs_track_devices_then_selection() {
    let (backend, settings, handle) =
        mirror(MockBackend::new(), &["in", "A", "B"], Some("in"), &["A", "B"]);
    handle.start_and_reconcile();
    assert_eq!(handle.settle().unwrap().outputs, ids(&["A", "B"]));

    backend.set_state("B", DeviceState::Unplugged);
    handle.on_device_event(DeviceEvent::StateChanged("B".into()));
    assert_eq!(handle.settle().unwrap().outputs, ids(&["A"]));

    settings.set_outputs(["B"]);
    handle.reconcile_outputs();
    let snap = handle.settle().unwrap();
    assert!(snap.outputs.is_empty());
    assert_eq!(snap.state, MirrorState::Running);
    assert!(backend.live_render_ids().is_empty());
}

#[test]
fn no_input_means_no_handles() {
    let (backend, _settings, handle) = mirror(MockBackend::new(), &["A"], None, &["A"]);
    handle.start_and_reconcile();
    assert_eq!(handle.settle().unwrap().state, MirrorState::Stopped);
    assert_eq!(backend.captures_created(), 0);
    assert_eq!(backend.renders_created(), 0);
}

#[test]
fn repeated_reconciliation_is_stable() {
    let (backend, _settings, handle) =
        mirror(MockBackend::new(), &["in", "A", "B"], Some("in"), &["A", "B", "C"]);
    handle.start_and_reconcile();
    let first = handle.settle().unwrap();
    let created = backend.renders_created();

    for _ in 0..5 {
        handle.reconcile_outputs();
    }
    assert_eq!(handle.settle().unwrap(), first);
    assert_eq!(backend.renders_created(), created);
    assert_eq!(backend.live_render_ids(), ids(&["A", "B"]));
}

#[test]
fn stop_and_start_from_competing_threads_never_orphan_outputs() {
    let (backend, _settings, handle) = mirror(
        MockBackend::with_settle_time(Duration::from_millis(1)),
        &["in", "A", "B"],
        Some("in"),
        &["A", "B"],
    );
    handle.start_and_reconcile();
    handle.settle().unwrap();

    let stopper = {
        let handle = handle.clone();
        thread::spawn(move || {
            for _ in 0..20 {
                handle.stop_mirror();
                thread::yield_now();
            }
        })
    };
    let starter = {
        let handle = handle.clone();
        thread::spawn(move || {
            for _ in 0..20 {
                handle.start_and_reconcile();
                handle.on_device_event(DeviceEvent::PropertyChanged("A".into()));
            }
        })
    };
    stopper.join().unwrap();
    starter.join().unwrap();

    // stop, then start, as the last two requests
    handle.stop_mirror();
    handle.start_and_reconcile();
    let snap = handle.settle().unwrap();

    assert_eq!(snap.state, MirrorState::Running);
    assert_eq!(snap.outputs, ids(&["A", "B"]));
    assert_eq!(backend.live_captures(), 1);
    assert_eq!(backend.renders_on_disposed_source(), 0);
    assert_eq!(backend.live_render_ids(), ids(&["A", "B"]));
}

#[test]
fn stop_then_start_with_input_gone_ends_stopped() {
    let (backend, _settings, handle) =
        mirror(MockBackend::new(), &["in", "A"], Some("in"), &["A"]);
    handle.start_and_reconcile();
    handle.settle().unwrap();

    backend.set_state("in", DeviceState::Unplugged);
    handle.restart_mirror();
    let snap = handle.settle().unwrap();
    assert_eq!(snap.state, MirrorState::Stopped);
    assert_eq!(backend.live_captures(), 0);
    assert!(backend.live_render_ids().is_empty());
}

#[test]
fn pause_and_resume_keep_outputs() {
    let (backend, _settings, handle) =
        mirror(MockBackend::new(), &["in", "A", "B"], Some("in"), &["A", "B"]);
    handle.start_and_reconcile();
    let before = handle.settle().unwrap().outputs;

    handle.pause_mirror();
    let paused = handle.settle().unwrap();
    assert_eq!(paused.state, MirrorState::Paused);
    assert_eq!(paused.outputs, before);
    assert!(!backend.capture_running());

    handle.resume_mirror();
    let resumed = handle.settle().unwrap();
    assert_eq!(resumed.state, MirrorState::Running);
    assert_eq!(resumed.outputs, before);
    assert!(backend.capture_running());
}

#[test]
fn failed_output_is_retried_on_the_next_event() {
    let (backend, _settings, handle) =
        mirror(MockBackend::new(), &["in", "A", "B"], Some("in"), &["A", "B"]);
    backend.fail_render_init("B", true);
    handle.start_and_reconcile();
    assert_eq!(handle.settle().unwrap().outputs, ids(&["A"]));

    backend.fail_render_init("B", false);
    handle.on_device_event(DeviceEvent::PropertyChanged("B".into()));
    assert_eq!(handle.settle().unwrap().outputs, ids(&["A", "B"]));
}

#[test]
fn shutdown_releases_everything_and_refuses_more_work() {
    let (backend, _settings, handle) =
        mirror(MockBackend::new(), &["in", "A"], Some("in"), &["A"]);
    handle.start_and_reconcile();
    handle.settle().unwrap();

    handle.shutdown();
    handle.shutdown();
    assert_eq!(backend.live_captures(), 0);
    assert!(backend.live_render_ids().is_empty());

    handle.start_and_reconcile();
    assert!(handle.settle().is_err());
    assert_eq!(backend.captures_created(), 1);
}

#[test]
fn persisted_selection_drives_the_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(ConfigManager::load(Some(dir.path().to_path_buf())).unwrap());
    let backend = Arc::new(MockBackend::new());
    for d in ["in", "A", "B"] {
        backend.add_device(d, DeviceState::Active);
    }
    let settings: Arc<dyn SettingsView> = manager.clone();
    let handle = MirrorHandle::spawn(backend.clone(), settings, quick_policy()).unwrap();

    let change = manager.update(|c| c.select_input("in")).unwrap();
    handle.apply_selection(change);
    let change = manager.update(|c| c.toggle_output("A")).unwrap();
    handle.apply_selection(change);
    let snap = handle.settle().unwrap();
    assert_eq!(snap.state, MirrorState::Running);
    assert_eq!(snap.outputs, ids(&["A"]));

    let change = manager.update(|c| c.toggle_output("B")).unwrap();
    handle.apply_selection(change);
    assert_eq!(handle.settle().unwrap().outputs, ids(&["A", "B"]));

    // choosing an output as the input drops it from the outputs and restarts
    let change = manager.update(|c| c.select_input("A")).unwrap();
    handle.apply_selection(change);
    let snap = handle.settle().unwrap();
    assert_eq!(snap.input, Some(DeviceId::from("A")));
    assert_eq!(snap.outputs, ids(&["B"]));

    // the last output going away stops the mirror
    let change = manager.update(|c| c.toggle_output("B")).unwrap();
    handle.apply_selection(change);
    assert_eq!(handle.settle().unwrap().state, MirrorState::Stopped);

    let reloaded = ConfigManager::load(Some(dir.path().to_path_buf())).unwrap();
    assert_eq!(reloaded.snapshot().selected_input.as_deref(), Some("A"));
    assert!(reloaded.snapshot().selected_outputs.is_empty());
    handle.shutdown();
}
