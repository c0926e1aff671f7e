//! Mirror state machine.
//!
//! The controller is the only code that creates or destroys capture and
//! output handles. It is not thread-safe on purpose: it lives on the
//! [`SerialLane`](crate::lane::SerialLane) worker and every mutation arrives as
//! a lane task.

use serde::Serialize;
use std::sync::Arc;

use crate::backend::AudioBackend;
use crate::capture::CaptureSession;
use crate::device::DeviceId;
use crate::error::MirrorError;
use crate::outputs::{OutputSinkSet, ReconcileReport};
use crate::settings::SettingsView;
use crate::source::LiveSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MirrorState {
    #[default]
    Stopped,
    Running,
    Paused,
}

/// Point-in-time view of the controller, safe to hand to other threads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorSnapshot {
    pub state: MirrorState,
    pub input: Option<DeviceId>,
    pub outputs: Vec<DeviceId>,
    /// Hold requested by the user; survives stop/start.
    pub hold: bool,
}

pub struct MirrorController<B: AudioBackend> {
    backend: Arc<B>,
    settings: Arc<dyn SettingsView>,
    // outputs are declared first so they are dropped before the capture
    outputs: OutputSinkSet<B>,
    capture: Option<CaptureSession<B>>,
    paused: bool,
}

impl<B: AudioBackend> MirrorController<B> {
    pub fn new(backend: Arc<B>, settings: Arc<dyn SettingsView>) -> Self {
        Self {
            backend,
            settings,
            outputs: OutputSinkSet::new(),
            capture: None,
            paused: false,
        }
    }

    pub fn state(&self) -> MirrorState {
        match &self.capture {
            None => MirrorState::Stopped,
            Some(_) if self.paused => MirrorState::Paused,
            Some(_) => MirrorState::Running,
        }
    }

    pub fn snapshot(&self) -> MirrorSnapshot {
        MirrorSnapshot {
            state: self.state(),
            input: self.capture.as_ref().map(|c| c.device_id().clone()),
            outputs: self.outputs.ids(),
            hold: self.paused,
        }
    }

    pub fn live_source(&self) -> Option<Arc<LiveSource>> {
        self.capture.as_ref().map(|c| Arc::clone(c.source()))
    }

    /// Open the capture on the selected input. No-op when a capture already
    /// exists, no input is selected, or the input is unavailable.
    pub fn start_mirror(&mut self) {
        if self.capture.is_some() {
            return;
        }
        let Some(input) = self.settings.selected_input() else {
            log::debug!("No input selected, mirror stays stopped");
            return;
        };

        match CaptureSession::open(self.backend.as_ref(), &input, self.paused) {
            Ok(session) => {
                log::info!("Starting audio mirror from {}", input);
                self.capture = Some(session);
            }
            Err(MirrorError::DeviceUnavailable(id)) => {
                log::debug!("Input {} is not available, mirror stays stopped", id);
            }
            Err(e) => {
                log::warn!("Failed to start audio mirror from {}: {}", input, e);
            }
        }
    }

    /// Dispose every output, then the capture. Safe from any state.
    pub fn stop_mirror(&mut self) {
        if self.capture.is_none() && self.outputs.is_empty() {
            return;
        }
        log::info!("Stopping audio mirror");
        self.outputs.clear();
        if let Some(session) = self.capture.take() {
            session.close();
        }
    }

    /// Hold the capture. Remembered while stopped so the next start begins held.
    pub fn pause_mirror(&mut self) {
        log::info!("Pausing audio mirror");
        self.paused = true;
        if let Some(session) = self.capture.as_mut() {
            session.pause();
        }
    }

    pub fn resume_mirror(&mut self) {
        log::info!("Resuming audio mirror");
        self.paused = false;
        if let Some(session) = self.capture.as_mut() {
            session.resume();
        }
    }

    /// Converge the outputs on the selection. Only acts while a capture exists
    /// and its device is still active.
    pub fn reconcile_outputs(&mut self) -> ReconcileReport {
        let Some(session) = self.capture.as_ref() else {
            return ReconcileReport::default();
        };
        if !session.is_device_active(self.backend.directory()) {
            log::debug!("Input {} is inactive, not updating outputs", session.device_id());
            return ReconcileReport::default();
        }

        log::debug!("Updating audio mirror outputs");
        let desired = self.settings.selected_outputs();
        let source = Arc::clone(session.source());
        self.outputs
            .reconcile(self.backend.as_ref(), &desired, Some(&source))
    }
}

impl<B: AudioBackend> Drop for MirrorController<B> {
    fn drop(&mut self) {
        self.stop_mirror();
    }
}
