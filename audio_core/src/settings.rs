//! Read-only view of the user's device selection.

use parking_lot::RwLock;
use std::collections::BTreeSet;

use config::{Config, ConfigManager};

use crate::device::DeviceId;

/// Desired input and outputs. Written by the UI, read by the controller.
pub trait SettingsView: Send + Sync {
    fn selected_input(&self) -> Option<DeviceId>;

    fn selected_outputs(&self) -> BTreeSet<DeviceId>;
}

/// Plain selection value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredConfig {
    pub selected_input: Option<DeviceId>,
    pub selected_outputs: BTreeSet<DeviceId>,
}

impl From<&Config> for DesiredConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            selected_input: cfg.selected_input.as_deref().map(DeviceId::from),
            selected_outputs: cfg
                .selected_outputs
                .iter()
                .map(|s| DeviceId::from(s.as_str()))
                .collect(),
        }
    }
}

impl SettingsView for ConfigManager {
    fn selected_input(&self) -> Option<DeviceId> {
        self.handle()
            .read()
            .selected_input
            .as_deref()
            .map(DeviceId::from)
    }

    fn selected_outputs(&self) -> BTreeSet<DeviceId> {
        self.handle()
            .read()
            .selected_outputs
            .iter()
            .map(|s| DeviceId::from(s.as_str()))
            .collect()
    }
}

/// In-memory settings, used where no config file is involved.
#[derive(Debug, Default)]
pub struct SharedSettings {
    inner: RwLock<DesiredConfig>,
}

impl SharedSettings {
    pub fn new(desired: DesiredConfig) -> Self {
        Self {
            inner: RwLock::new(desired),
        }
    }

    pub fn with_selection<I, O>(input: Option<I>, outputs: O) -> Self
    where
        I: Into<DeviceId>,
        O: IntoIterator,
        O::Item: Into<DeviceId>,
    {
        Self::new(DesiredConfig {
            selected_input: input.map(Into::into),
            selected_outputs: outputs.into_iter().map(Into::into).collect(),
        })
    }

    pub fn set_input(&self, input: Option<DeviceId>) {
        self.inner.write().selected_input = input;
    }

    pub fn set_outputs<O>(&self, outputs: O)
    where
        O: IntoIterator,
        O::Item: Into<DeviceId>,
    {
        self.inner.write().selected_outputs = outputs.into_iter().map(Into::into).collect();
    }

    pub fn get(&self) -> DesiredConfig {
        self.inner.read().clone()
    }
}

impl SettingsView for SharedSettings {
    fn selected_input(&self) -> Option<DeviceId> {
        self.inner.read().selected_input.clone()
    }

    fn selected_outputs(&self) -> BTreeSet<DeviceId> {
        self.inner.read().selected_outputs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn config_manager_exposes_selection() {
        let td = tempdir().unwrap();
        let mgr = ConfigManager::load(Some(td.path().to_path_buf())).expect("load");
        assert_eq!(mgr.selected_input(), None);

        mgr.update(|c| {
            c.selected_input = Some("in".to_string());
            c.selected_outputs.insert("out".to_string());
        })
        .expect("update");
        assert_eq!(mgr.selected_input(), Some(DeviceId::from("in")));
        assert_eq!(
            mgr.selected_outputs(),
            BTreeSet::from([DeviceId::from("out")])
        );
        assert_eq!(
            DesiredConfig::from(&mgr.snapshot()).selected_input,
            Some(DeviceId::from("in"))
        );
    }

    #[test]
    fn shared_settings_updates_are_visible() {
        let s = SharedSettings::with_selection(Some("in"), ["a", "b"]);
        assert_eq!(s.selected_outputs().len(), 2);
        s.set_outputs(["c"]);
        s.set_input(None);
        assert_eq!(s.selected_input(), None);
        assert_eq!(s.selected_outputs(), BTreeSet::from([DeviceId::from("c")]));
    }
}
