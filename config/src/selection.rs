//! Selection edits made from the device menu.
//!
//! Every edit keeps `selected_input ∉ selected_outputs` and reports which
//! mirror operations the caller has to queue afterwards.

use crate::config::Config;

/// Mirror work required after a selection edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    /// Tear the mirror down.
    Stop,
    /// Stop, start on the new input, then attach outputs.
    Restart,
    /// Start if stopped, then attach outputs.
    StartAndReconcile,
    /// Only the output set changed.
    Reconcile,
}

impl Config {
    /// Pick `id` as the loopback input, or clear it if it already is the input.
    pub fn select_input(&mut self, id: &str) -> SelectionChange {
        if self.selected_input.as_deref() == Some(id) {
            log::debug!("Input {} already selected, unselecting", id);
            self.selected_input = None;
            return SelectionChange::Stop;
        }

        log::debug!("Input {} selected", id);
        self.selected_input = Some(id.to_string());
        if self.selected_outputs.remove(id) {
            log::debug!("Output {} was the new input, unselecting", id);
        }
        SelectionChange::Restart
    }

    /// Add `id` to the outputs, or remove it if it is already there.
    pub fn toggle_output(&mut self, id: &str) -> SelectionChange {
        if self.selected_outputs.remove(id) {
            log::debug!("Output {} already selected, unselecting", id);
            return if self.selected_outputs.is_empty() {
                SelectionChange::Stop
            } else {
                SelectionChange::Reconcile
            };
        }

        log::debug!("Output {} selected", id);
        self.selected_outputs.insert(id.to_string());
        if self.selected_input.as_deref() == Some(id) {
            log::debug!("Input {} is now an output, unselecting", id);
            self.selected_input = None;
            SelectionChange::Stop
        } else {
            SelectionChange::StartAndReconcile
        }
    }
}
