//! Bounded wait for the selected devices to show up.
//!
//! At launch and after resume from sleep the endpoints often appear a few
//! seconds after the process is running. The probe polls a fixed number of
//! times with a fixed interval: first for the input, then for any output.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::device::{DeviceDirectory, DeviceId};
use crate::settings::SettingsView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        config::StartupPolicy::default().into()
    }
}

impl From<config::StartupPolicy> for RetryPolicy {
    fn from(p: config::StartupPolicy) -> Self {
        Self {
            attempts: p.ready_attempts.max(1),
            interval: p.ready_interval(),
        }
    }
}

/// One-shot cancellation that also wakes a sleeping [`RetryPolicy::poll`].
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns whether it was already raised.
    pub fn cancel(&self) -> bool {
        let mut cancelled = self.cancelled.lock();
        let was = std::mem::replace(&mut *cancelled, true);
        self.wake.notify_all();
        was
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Sleep for `timeout` unless cancelled first. Returns whether cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            if self.wake.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

impl RetryPolicy {
    /// Run `probe` until it succeeds, the attempts run out, or `cancel` is raised.
    pub fn poll(&self, cancel: &CancelFlag, mut probe: impl FnMut() -> bool) -> bool {
        for attempt in 1..=self.attempts {
            if cancel.is_cancelled() {
                return false;
            }
            if probe() {
                return true;
            }
            if attempt < self.attempts && cancel.wait_timeout(self.interval) {
                return false;
            }
        }
        false
    }
}

fn is_available<D: DeviceDirectory + ?Sized>(directory: &D, id: &DeviceId) -> bool {
    directory.resolve_active(id).is_some()
}

/// Block until the selected input and at least one selected output are active.
///
/// The selection is re-read on every attempt, so edits made while waiting count.
pub fn wait_until_ready<D: DeviceDirectory + ?Sized>(
    directory: &D,
    settings: &dyn SettingsView,
    policy: RetryPolicy,
    cancel: &CancelFlag,
) -> bool {
    let input_ready = policy.poll(cancel, || {
        settings
            .selected_input()
            .is_some_and(|id| is_available(directory, &id))
    });
    if !input_ready {
        log::info!("Selected input did not become available");
        return false;
    }

    let output_ready = policy.poll(cancel, || {
        settings
            .selected_outputs()
            .iter()
            .any(|id| is_available(directory, id))
    });
    if !output_ready {
        log::info!("None of the selected outputs became available");
    }
    output_ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AudioBackend;
    use crate::device::DeviceState;
    use crate::mock::MockBackend;
    use crate::settings::SharedSettings;
    use std::sync::Arc;
    use std::thread;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn policy_comes_from_startup_config() {
        let p = RetryPolicy::from(config::StartupPolicy {
            ready_attempts: 3,
            ready_interval_ms: 250,
        });
        assert_eq!(p.attempts, 3);
        assert_eq!(p.interval, Duration::from_millis(250));
        assert_eq!(RetryPolicy::default().attempts, 10);
    }

    #[test]
    fn poll_counts_attempts() {
        let mut calls = 0;
        let ok = quick(4).poll(&CancelFlag::new(), || {
            calls += 1;
            false
        });
        assert!(!ok);
        assert_eq!(calls, 4);
    }

    #[test]
    fn poll_stops_on_success() {
        let mut calls = 0;
        let ok = quick(10).poll(&CancelFlag::new(), || {
            calls += 1;
            calls == 3
        });
        assert!(ok);
        assert_eq!(calls, 3);
    }

    #[test]
    fn cancelled_poll_gives_up_immediately() {
        let started = Instant::now();
        let policy = RetryPolicy {
            attempts: 5,
            interval: Duration::from_secs(10),
        };
        let cancel = CancelFlag::new();
        assert!(!cancel.cancel());
        assert!(!policy.poll(&cancel, || true));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cancel_wakes_a_poll_between_attempts() {
        let cancel = Arc::new(CancelFlag::new());
        let policy = RetryPolicy {
            attempts: 5,
            interval: Duration::from_secs(30),
        };
        let raiser = {
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let mut calls = 0;
        let ready = policy.poll(&cancel, || {
            calls += 1;
            false
        });
        raiser.join().unwrap();
        assert!(!ready);
        assert_eq!(calls, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn wait_timeout_elapses_when_not_cancelled() {
        let cancel = CancelFlag::new();
        let started = Instant::now();
        assert!(!cancel.wait_timeout(Duration::from_millis(10)));
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert!(!cancel.cancel());
        assert!(cancel.cancel());
    }

    #[test]
    fn ready_when_input_and_one_output_are_active() {
        let backend = MockBackend::new();
        backend.add_device("in", DeviceState::Active);
        backend.add_device("a", DeviceState::Unplugged);
        backend.add_device("b", DeviceState::Active);
        let settings = SharedSettings::with_selection(Some("in"), ["a", "b"]);
        assert!(wait_until_ready(
            backend.directory(),
            &settings,
            quick(2),
            &CancelFlag::new()
        ));
    }

    #[test]
    fn not_ready_without_input() {
        let backend = MockBackend::new();
        backend.add_device("a", DeviceState::Active);
        let settings = SharedSettings::with_selection(None::<&str>, ["a"]);
        assert!(!wait_until_ready(
            backend.directory(),
            &settings,
            quick(3),
            &CancelFlag::new()
        ));
    }

    #[test]
    fn not_ready_without_active_output() {
        let backend = MockBackend::new();
        backend.add_device("in", DeviceState::Active);
        backend.add_device("a", DeviceState::Disabled);
        let settings = SharedSettings::with_selection(Some("in"), ["a"]);
        assert!(!wait_until_ready(
            backend.directory(),
            &settings,
            quick(3),
            &CancelFlag::new()
        ));
    }

    #[test]
    fn output_appearing_late_is_picked_up() {
        let backend = Arc::new(MockBackend::new());
        backend.add_device("in", DeviceState::Active);
        backend.add_device("a", DeviceState::NotPresent);
        let settings = SharedSettings::with_selection(Some("in"), ["a"]);

        let plug = {
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                backend.set_state("a", DeviceState::Active);
            })
        };
        let policy = RetryPolicy {
            attempts: 200,
            interval: Duration::from_millis(5),
        };
        assert!(wait_until_ready(
            backend.directory(),
            &settings,
            policy,
            &CancelFlag::new()
        ));
        plug.join().unwrap();
    }
}
