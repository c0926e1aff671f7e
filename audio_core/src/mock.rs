//! In-memory backend for exercising the mirror without audio hardware.
//!
//! Devices live in a shared table whose states tests can flip at any time.
//! Every handle reports into a shared ledger so tests can assert how many
//! captures and renderers exist and whether any of them outlived its source.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{AudioBackend, CaptureHandle, RenderHandle};
use crate::device::{DeviceDirectory, DeviceId, DeviceInfo, DeviceState};
use crate::error::MirrorError;
use crate::source::{LiveSource, SourceReader, StreamFormat};

#[derive(Debug, Clone)]
struct MockEndpoint {
    name: String,
    state: DeviceState,
}

type DeviceTable = Arc<RwLock<BTreeMap<DeviceId, MockEndpoint>>>;

/// Endpoint handle that re-reads the shared table on every state query.
#[derive(Debug, Clone)]
pub struct MockDevice {
    id: DeviceId,
    table: DeviceTable,
}

impl MockDevice {
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    fn state(&self) -> DeviceState {
        self.table
            .read()
            .get(&self.id)
            .map(|e| e.state)
            .unwrap_or(DeviceState::NotPresent)
    }
}

#[derive(Debug, Default)]
pub struct MockDirectory {
    table: DeviceTable,
}

impl DeviceDirectory for MockDirectory {
    type Device = MockDevice;

    fn resolve(&self, id: &DeviceId) -> Option<MockDevice> {
        self.table.read().contains_key(id).then(|| MockDevice {
            id: id.clone(),
            table: Arc::clone(&self.table),
        })
    }

    fn is_active(&self, device: &MockDevice) -> bool {
        device.state() == DeviceState::Active
    }

    fn enumerate_active_render_devices(&self) -> Result<Vec<DeviceInfo>, MirrorError> {
        Ok(self
            .table
            .read()
            .iter()
            .filter(|(_, e)| e.state == DeviceState::Active)
            .map(|(id, e)| DeviceInfo {
                id: id.clone(),
                friendly_name: e.name.clone(),
                state: e.state,
            })
            .collect())
    }
}

#[derive(Debug, Default)]
struct Ledger {
    captures_created: usize,
    renders_created: usize,
    next_handle: u64,
    /// handle number -> (device, running)
    captures: BTreeMap<u64, (DeviceId, bool)>,
    /// handle number -> (device, source it reads)
    renders: BTreeMap<u64, (DeviceId, Arc<LiveSource>)>,
    capture_failures: BTreeSet<DeviceId>,
    render_failures: BTreeSet<DeviceId>,
}

/// Hardware-free [`AudioBackend`].
#[derive(Debug, Default)]
pub struct MockBackend {
    directory: MockDirectory,
    ledger: Arc<Mutex<Ledger>>,
    settle: Duration,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every handle operation sleep for `settle`, widening race windows.
    pub fn with_settle_time(settle: Duration) -> Self {
        Self {
            settle,
            ..Self::default()
        }
    }

    /// 48 kHz stereo float frames.
    pub fn format() -> StreamFormat {
        StreamFormat {
            sample_rate: 48_000,
            channels: 2,
            block_align: 8,
            descriptor: Vec::new(),
        }
    }

    pub fn add_device(&self, id: impl Into<DeviceId>, state: DeviceState) {
        let id = id.into();
        let name = format!("Mock {}", id);
        self.directory
            .table
            .write()
            .insert(id, MockEndpoint { name, state });
    }

    pub fn set_state(&self, id: impl Into<DeviceId>, state: DeviceState) {
        if let Some(e) = self.directory.table.write().get_mut(&id.into()) {
            e.state = state;
        }
    }

    pub fn remove_device(&self, id: impl Into<DeviceId>) {
        self.directory.table.write().remove(&id.into());
    }

    pub fn fail_capture_init(&self, id: impl Into<DeviceId>, fail: bool) {
        let mut ledger = self.ledger.lock();
        if fail {
            ledger.capture_failures.insert(id.into());
        } else {
            ledger.capture_failures.remove(&id.into());
        }
    }

    pub fn fail_render_init(&self, id: impl Into<DeviceId>, fail: bool) {
        let mut ledger = self.ledger.lock();
        if fail {
            ledger.render_failures.insert(id.into());
        } else {
            ledger.render_failures.remove(&id.into());
        }
    }

    pub fn captures_created(&self) -> usize {
        self.ledger.lock().captures_created
    }

    pub fn renders_created(&self) -> usize {
        self.ledger.lock().renders_created
    }

    /// Initialized captures that have not been disposed.
    pub fn live_captures(&self) -> usize {
        self.ledger.lock().captures.len()
    }

    /// True when exactly one capture is alive and it is running.
    pub fn capture_running(&self) -> bool {
        let ledger = self.ledger.lock();
        ledger.captures.len() == 1 && ledger.captures.values().all(|(_, running)| *running)
    }

    /// Devices of the live renderers, sorted, duplicates kept.
    pub fn live_render_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .ledger
            .lock()
            .renders
            .values()
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Live renderers whose source has already been disposed.
    pub fn renders_on_disposed_source(&self) -> usize {
        self.ledger
            .lock()
            .renders
            .values()
            .filter(|(_, source)| source.is_disposed())
            .count()
    }
}

impl AudioBackend for MockBackend {
    type Device = MockDevice;
    type Directory = MockDirectory;
    type Capture = MockCapture;
    type Render = MockRender;

    fn directory(&self) -> &MockDirectory {
        &self.directory
    }

    fn new_capture(&self) -> MockCapture {
        let mut ledger = self.ledger.lock();
        ledger.captures_created += 1;
        ledger.next_handle += 1;
        MockCapture {
            handle: ledger.next_handle,
            ledger: Arc::clone(&self.ledger),
            settle: self.settle,
            source: None,
            disposed: false,
        }
    }

    fn new_render(&self) -> MockRender {
        let mut ledger = self.ledger.lock();
        ledger.renders_created += 1;
        ledger.next_handle += 1;
        MockRender {
            handle: ledger.next_handle,
            ledger: Arc::clone(&self.ledger),
            settle: self.settle,
            reader: None,
            started: false,
            disposed: false,
        }
    }
}

pub struct MockCapture {
    handle: u64,
    ledger: Arc<Mutex<Ledger>>,
    settle: Duration,
    source: Option<Arc<LiveSource>>,
    disposed: bool,
}

impl MockCapture {
    fn set_running(&mut self, running: bool) -> Result<(), MirrorError> {
        if self.disposed || self.source.is_none() {
            return Err(MirrorError::Backend("capture is not initialized".into()));
        }
        if let Some(entry) = self.ledger.lock().captures.get_mut(&self.handle) {
            entry.1 = running;
        }
        Ok(())
    }
}

impl CaptureHandle<MockDevice> for MockCapture {
    fn initialize(&mut self, device: &MockDevice) -> Result<(), MirrorError> {
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        let mut ledger = self.ledger.lock();
        if ledger.capture_failures.contains(device.id()) {
            return Err(MirrorError::CaptureInit(format!(
                "injected failure on {}",
                device.id()
            )));
        }
        ledger
            .captures
            .insert(self.handle, (device.id().clone(), false));
        self.source = Some(Arc::new(LiveSource::with_max_latency(
            MockBackend::format(),
            Duration::from_millis(200),
        )));
        Ok(())
    }

    fn start(&mut self) -> Result<(), MirrorError> {
        self.set_running(true)
    }

    fn stop(&mut self) -> Result<(), MirrorError> {
        self.set_running(false)
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(source) = self.source.take() {
            source.dispose();
        }
        self.ledger.lock().captures.remove(&self.handle);
    }

    fn live_source(&self) -> Option<Arc<LiveSource>> {
        if self.disposed {
            return None;
        }
        self.source.clone()
    }
}

pub struct MockRender {
    handle: u64,
    ledger: Arc<Mutex<Ledger>>,
    settle: Duration,
    reader: Option<SourceReader>,
    started: bool,
    disposed: bool,
}

impl MockRender {
    /// Pull `frames` frames the way a device callback would.
    pub fn pull(&mut self, frames: usize) -> Vec<u8> {
        let mut out = vec![0u8; frames * MockBackend::format().block_align as usize];
        if let Some(reader) = self.reader.as_mut() {
            if self.started {
                reader.read(&mut out);
            }
        }
        out
    }
}

impl RenderHandle<MockDevice> for MockRender {
    fn initialize(
        &mut self,
        device: &MockDevice,
        source: &Arc<LiveSource>,
    ) -> Result<(), MirrorError> {
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        let render_init = |reason: &str| MirrorError::RenderInit {
            device: device.id().clone(),
            reason: reason.to_string(),
        };
        if source.is_disposed() {
            return Err(render_init("source already disposed"));
        }
        let mut ledger = self.ledger.lock();
        if ledger.render_failures.contains(device.id()) {
            return Err(render_init("injected failure"));
        }
        ledger
            .renders
            .insert(self.handle, (device.id().clone(), Arc::clone(source)));
        self.reader = Some(source.subscribe());
        Ok(())
    }

    fn start(&mut self) -> Result<(), MirrorError> {
        if self.disposed || self.reader.is_none() {
            return Err(MirrorError::Backend("render is not initialized".into()));
        }
        self.started = true;
        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.started = false;
        self.reader = None;
        self.ledger.lock().renders.remove(&self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_tracks_live_state() {
        let backend = MockBackend::new();
        backend.add_device("a", DeviceState::Active);
        let dir = backend.directory();
        let dev = dir.resolve(&"a".into()).expect("resolve");
        assert!(dir.is_active(&dev));

        backend.set_state("a", DeviceState::Disabled);
        assert!(!dir.is_active(&dev));
        assert!(dir.resolve_active(&"a".into()).is_none());

        backend.remove_device("a");
        assert!(dir.resolve(&"a".into()).is_none());
        assert!(!dir.is_active(&dev));
    }

    #[test]
    fn enumerate_lists_only_active_devices() {
        let backend = MockBackend::new();
        backend.add_device("a", DeviceState::Active);
        backend.add_device("b", DeviceState::Unplugged);
        let listed = backend.directory().enumerate_active_render_devices().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, DeviceId::from("a"));
        assert_eq!(listed[0].friendly_name, "Mock a");
    }

    #[test]
    fn render_plays_captured_frames() {
        let backend = MockBackend::new();
        backend.add_device("in", DeviceState::Active);
        backend.add_device("out", DeviceState::Active);
        let dir = backend.directory();

        let mut capture = backend.new_capture();
        capture.initialize(&dir.resolve(&"in".into()).unwrap()).unwrap();
        capture.start().unwrap();
        let source = capture.live_source().unwrap();

        let mut render = backend.new_render();
        render
            .initialize(&dir.resolve(&"out".into()).unwrap(), &source)
            .unwrap();
        render.start().unwrap();

        source.push(&[7u8; 8]);
        assert_eq!(render.pull(2), [[7u8; 8], [0u8; 8]].concat());

        capture.dispose();
        capture.dispose();
        assert_eq!(backend.renders_on_disposed_source(), 1);
        render.dispose();
        assert_eq!(backend.renders_on_disposed_source(), 0);
    }

    #[test]
    fn handles_refuse_use_after_dispose() {
        let backend = MockBackend::new();
        let mut capture = backend.new_capture();
        capture.dispose();
        assert!(capture.start().is_err());
        assert!(capture.live_source().is_none());

        let mut render = backend.new_render();
        render.dispose();
        render.dispose();
        assert!(render.start().is_err());
    }
}
