use audio_core::{DesiredConfig, DeviceId, DeviceInfo, MirrorSnapshot, MirrorState};
use serde::Serialize;
use std::fmt::Write;

/// One checkable device entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuDevice {
    /// 1-based position, accepted by the `input`/`output` commands.
    pub index: usize,
    pub id: DeviceId,
    pub name: String,
    pub checked: bool,
}

/// What the device menu shows. Built fresh from the selection, the active
/// device list and the mirror snapshot; holds no state of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuView {
    pub inputs: Vec<MenuDevice>,
    pub outputs: Vec<MenuDevice>,
    pub state: MirrorState,
    pub paused: bool,
}

fn entry(position: usize, d: &DeviceInfo, checked: bool) -> MenuDevice {
    MenuDevice {
        index: position + 1,
        id: d.id.clone(),
        name: d.friendly_name.clone(),
        checked,
    }
}

fn render_section(out: &mut String, title: &str, items: &[MenuDevice]) {
    let _ = writeln!(out, "{}:", title);
    if items.is_empty() {
        let _ = writeln!(out, "  (no active devices)");
    }
    for d in items {
        let mark = if d.checked { 'x' } else { ' ' };
        let _ = writeln!(out, "  [{}] {}. {}", mark, d.index, d.name);
    }
}

impl MenuView {
    pub fn project(
        devices: &[DeviceInfo],
        desired: &DesiredConfig,
        snapshot: &MirrorSnapshot,
    ) -> Self {
        Self {
            inputs: devices
                .iter()
                .enumerate()
                .map(|(i, d)| entry(i, d, desired.selected_input.as_ref() == Some(&d.id)))
                .collect(),
            outputs: devices
                .iter()
                .enumerate()
                .map(|(i, d)| entry(i, d, desired.selected_outputs.contains(&d.id)))
                .collect(),
            state: snapshot.state,
            paused: snapshot.hold,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        render_section(&mut out, "Input", &self.inputs);
        render_section(&mut out, "Outputs", &self.outputs);
        let _ = write!(
            out,
            "Mirror: {:?}{}",
            self.state,
            if self.paused { " (pause requested)" } else { "" }
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_core::DeviceState;

    fn device(id: &str, name: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.into(),
            friendly_name: name.into(),
            state: DeviceState::Active,
        }
    }

    #[test]
    fn checkmarks_follow_the_selection() {
        let devices = [
            device("a", "Speakers"),
            device("b", "Headset"),
            device("c", "HDMI"),
        ];
        let desired = DesiredConfig {
            selected_input: Some("a".into()),
            selected_outputs: ["b".into(), "c".into()].into(),
        };
        let view = MenuView::project(&devices, &desired, &MirrorSnapshot::default());

        let checked = |items: &[MenuDevice]| {
            items
                .iter()
                .filter(|d| d.checked)
                .map(|d| d.id.as_str().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(checked(&view.inputs), ["a"]);
        assert_eq!(checked(&view.outputs), ["b", "c"]);
        assert_eq!(view.outputs[2].index, 3);
    }

    #[test]
    fn selection_of_missing_devices_is_not_shown() {
        let devices = [device("a", "Speakers")];
        let desired = DesiredConfig {
            selected_input: Some("gone".into()),
            selected_outputs: ["also-gone".into()].into(),
        };
        let view = MenuView::project(&devices, &desired, &MirrorSnapshot::default());
        assert!(view.inputs.iter().all(|d| !d.checked));
        assert!(view.outputs.iter().all(|d| !d.checked));
    }

    #[test]
    fn render_lists_numbered_entries_and_state() {
        let devices = [device("a", "Speakers"), device("b", "Headset")];
        let desired = DesiredConfig {
            selected_input: Some("a".into()),
            selected_outputs: ["b".into()].into(),
        };
        let snapshot = MirrorSnapshot {
            state: MirrorState::Paused,
            hold: true,
            ..MirrorSnapshot::default()
        };
        let text = MenuView::project(&devices, &desired, &snapshot).render();
        assert!(text.contains("[x] 1. Speakers"));
        assert!(text.contains("[ ] 2. Headset"));
        assert!(text.contains("[x] 2. Headset"));
        assert!(text.ends_with("Mirror: Paused (pause requested)"));
    }

    #[test]
    fn render_without_devices() {
        let view = MenuView::project(&[], &DesiredConfig::default(), &MirrorSnapshot::default());
        assert_eq!(
            view.render(),
            "Input:\n  (no active devices)\nOutputs:\n  (no active devices)\nMirror: Stopped"
        );
    }
}
