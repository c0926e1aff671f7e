//! Output fan-out and its reconciliation against the desired selection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::backend::{AudioBackend, RenderHandle};
use crate::device::{DeviceDirectory, DeviceId};
use crate::error::MirrorError;
use crate::source::LiveSource;

/// One renderer bound to one output endpoint. Dropping it disposes the handle.
pub struct OutputSink<B: AudioBackend> {
    device_id: DeviceId,
    device: B::Device,
    handle: B::Render,
}

impl<B: AudioBackend> OutputSink<B> {
    fn open(
        backend: &B,
        device_id: &DeviceId,
        source: &Arc<LiveSource>,
    ) -> Result<Self, MirrorError> {
        let device = backend
            .directory()
            .resolve_active(device_id)
            .ok_or_else(|| MirrorError::DeviceUnavailable(device_id.clone()))?;

        // from here on a failure drops `sink`, which disposes the handle
        let mut sink = Self {
            device_id: device_id.clone(),
            device,
            handle: backend.new_render(),
        };
        sink.handle.initialize(&sink.device, source)?;
        sink.handle.start()?;
        Ok(sink)
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }
}

impl<B: AudioBackend> Drop for OutputSink<B> {
    fn drop(&mut self) {
        self.handle.dispose();
    }
}

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub pruned_dead: Vec<DeviceId>,
    pub pruned_unselected: Vec<DeviceId>,
    pub added: Vec<DeviceId>,
    /// Desired outputs that could not be opened this time.
    pub skipped: Vec<DeviceId>,
}

impl ReconcileReport {
    /// True when the sink set was left untouched.
    pub fn is_unchanged(&self) -> bool {
        self.pruned_dead.is_empty() && self.pruned_unselected.is_empty() && self.added.is_empty()
    }
}

/// Active outputs keyed by device.
pub struct OutputSinkSet<B: AudioBackend> {
    sinks: BTreeMap<DeviceId, OutputSink<B>>,
}

impl<B: AudioBackend> Default for OutputSinkSet<B> {
    fn default() -> Self {
        Self {
            sinks: BTreeMap::new(),
        }
    }
}

impl<B: AudioBackend> OutputSinkSet<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converge the sink set onto `desired ∩ active`.
    ///
    /// Passes run in order: drop sinks whose device went inactive, drop sinks
    /// no longer desired, then open every desired output that is missing.
    /// Devices that cannot be opened are skipped; the next device
    /// notification triggers another pass. Without a source this is a no-op.
    pub fn reconcile(
        &mut self,
        backend: &B,
        desired: &BTreeSet<DeviceId>,
        source: Option<&Arc<LiveSource>>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let Some(source) = source else {
            return report;
        };
        let directory = backend.directory();

        self.sinks.retain(|id, sink| {
            if directory.is_active(&sink.device) {
                true
            } else {
                log::info!("Output {} is no longer active, removing", id);
                report.pruned_dead.push(id.clone());
                false
            }
        });

        self.sinks.retain(|id, _| {
            if desired.contains(id) {
                true
            } else {
                log::info!("Output {} was deselected, removing", id);
                report.pruned_unselected.push(id.clone());
                false
            }
        });

        for id in desired {
            if self.sinks.contains_key(id) {
                continue;
            }
            match OutputSink::open(backend, id, source) {
                Ok(sink) => {
                    log::info!("Mirroring to output {}", id);
                    self.sinks.insert(id.clone(), sink);
                    report.added.push(id.clone());
                }
                Err(MirrorError::DeviceUnavailable(_)) => {
                    log::debug!("Output {} is not available, skipping", id);
                    report.skipped.push(id.clone());
                }
                Err(e) => {
                    log::warn!("Failed to open output {}: {}", id, e);
                    report.skipped.push(id.clone());
                }
            }
        }

        report
    }

    /// Dispose every sink.
    pub fn clear(&mut self) {
        if !self.sinks.is_empty() {
            log::debug!("Removing {} outputs", self.sinks.len());
        }
        self.sinks.clear();
    }

    /// Ids of the live sinks, sorted.
    pub fn ids(&self) -> Vec<DeviceId> {
        self.sinks.keys().cloned().collect()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.sinks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}
