use anyhow::{Result, bail};
use audio_core::{
    AudioBackend, DeviceWatcher, MirrorHandle, PowerEvent, PowerWatcher, RetryPolicy,
    SettingsView, forward_events,
};
use config::ConfigManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

// console commands live in a separate module, the menu projection in types
mod command;
mod types;
pub use command::{AppState, Command, HELP, Outcome};
pub use types::{MenuDevice, MenuView};

/// Command line options.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Options {
    /// Directory holding `audio-mirror.toml`.
    pub config_dir: Option<PathBuf>,
}

impl Options {
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut options = Options::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config-dir" => match args.next() {
                    Some(dir) => options.config_dir = Some(PathBuf::from(dir)),
                    None => bail!("--config-dir needs a path"),
                },
                other => bail!("unknown argument `{}`", other),
            }
        }
        Ok(options)
    }
}

/// OS notification sources feeding the mirror.
#[derive(Default)]
struct Watchers {
    device: Option<DeviceWatcher>,
    power: Option<PowerWatcher>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Watchers {
    fn start<B: AudioBackend>(handle: &MirrorHandle<B>) -> Self {
        let mut watchers = Watchers::default();

        match DeviceWatcher::start() {
            Ok((watcher, events)) => {
                let handle = handle.clone();
                match forward_events("audio-device-events", events, move |e| {
                    handle.on_device_event(e)
                }) {
                    Ok(join) => watchers.forwarders.push(join),
                    Err(e) => log::error!("Failed to forward device events: {}", e),
                }
                watchers.device = Some(watcher);
            }
            Err(e) => log::warn!("Device notifications unavailable: {}", e),
        }

        match PowerWatcher::start() {
            Ok((watcher, events)) => {
                let handle = handle.clone();
                match forward_events("power-events", events, move |e| handle.on_power_event(e)) {
                    Ok(join) => watchers.forwarders.push(join),
                    Err(e) => log::error!("Failed to forward power events: {}", e),
                }
                watchers.power = Some(watcher);
            }
            Err(e) => log::warn!("Power notifications unavailable: {}", e),
        }

        watchers
    }

    /// Unregister both watchers, then wait for the forwarders to drain.
    fn stop(&mut self) {
        if let Some(mut w) = self.device.take() {
            w.stop();
        }
        if let Some(mut w) = self.power.take() {
            w.stop();
        }
        for join in self.forwarders.drain(..) {
            let _ = join.join();
        }
    }
}

/// Resolves when the user logs off or the machine shuts down.
async fn session_ending() {
    #[cfg(windows)]
    {
        use tokio::signal::windows::{ctrl_logoff, ctrl_shutdown};
        match (ctrl_shutdown(), ctrl_logoff()) {
            (Ok(mut shutdown), Ok(mut logoff)) => {
                tokio::select! {
                    _ = shutdown.recv() => {}
                    _ = logoff.recv() => {}
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => log::warn!("Cannot watch for session end: {}", e),
        }
    }
    std::future::pending::<()>().await
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await
    }
}

/// Entry point of the binary: load the config and mirror on the system's endpoints.
pub async fn run() -> Result<()> {
    let options = Options::from_args(std::env::args().skip(1))?;
    let config_manager = Arc::new(ConfigManager::load(options.config_dir)?);
    log::info!("Using config {}", config_manager.path().display());

    #[cfg(windows)]
    {
        let stream = config_manager.snapshot().stream;
        serve(Arc::new(audio_core::WasapiBackend::new(stream)), config_manager).await
    }
    #[cfg(not(windows))]
    {
        drop(config_manager);
        Err(audio_core::MirrorError::Unsupported("audio mirroring").into())
    }
}

/// Mirror on `backend`, taking commands from stdin until `quit`, EOF or a signal.
pub async fn serve<B: AudioBackend>(
    backend: Arc<B>,
    config_manager: Arc<ConfigManager>,
) -> Result<()> {
    serve_with_input(backend, config_manager, BufReader::new(tokio::io::stdin())).await
}

pub async fn serve_with_input<B, R>(
    backend: Arc<B>,
    config_manager: Arc<ConfigManager>,
    input: R,
) -> Result<()>
where
    B: AudioBackend,
    R: AsyncBufRead + Unpin,
{
    let cfg = config_manager.snapshot();
    let settings: Arc<dyn SettingsView> = config_manager.clone();
    let handle = MirrorHandle::spawn(backend, settings, RetryPolicy::from(cfg.startup))?;
    let state = Arc::new(AppState::new(handle.clone(), config_manager));
    let mut watchers = Watchers::start(&handle);

    if cfg.general.start_paused {
        handle.pause_mirror();
    }
    if cfg.general.auto_start {
        let handle = handle.clone();
        tokio::task::spawn_blocking(move || {
            if handle.start_when_ready() {
                log::info!("Devices ready, mirror started");
            } else if !handle.is_shut_down() {
                log::warn!("Selected devices not ready, mirror left stopped");
            }
        });
    }

    let ctrl_c = interrupted();
    let session_end = session_ending();
    tokio::pin!(ctrl_c, session_end);
    let mut lines = input.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let command = match line.parse::<Command>() {
                        Ok(c) => c,
                        Err(e) => {
                            println!("{}", e);
                            continue;
                        }
                    };
                    let state = Arc::clone(&state);
                    match tokio::task::spawn_blocking(move || state.execute(command)).await? {
                        Ok(Outcome::Reply(text)) => println!("{}", text),
                        Ok(Outcome::Exit) => break,
                        Err(e) => println!("Error: {:#}", e),
                    }
                }
                Ok(None) => {
                    log::info!("Console closed");
                    break;
                }
                Err(e) => {
                    log::error!("Failed to read console input: {}", e);
                    break;
                }
            },
            _ = &mut ctrl_c => {
                log::info!("Interrupted");
                break;
            }
            _ = &mut session_end => {
                let handle = handle.clone();
                tokio::task::spawn_blocking(move || {
                    handle.on_power_event(PowerEvent::SessionEnding)
                })
                .await?;
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || {
        watchers.stop();
        handle.shutdown();
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_core::mock::MockBackend;
    use audio_core::{DeviceId, DeviceState};
    use std::time::{Duration, Instant};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn options_from_args() {
        assert_eq!(Options::from_args(args(&[])).unwrap(), Options::default());
        assert_eq!(
            Options::from_args(args(&["--config-dir", "C:\\mirror"]))
                .unwrap()
                .config_dir,
            Some(PathBuf::from("C:\\mirror"))
        );
        assert!(Options::from_args(args(&["--config-dir"])).is_err());
        assert!(Options::from_args(args(&["--verbose"])).is_err());
    }

    fn setup(devices: &[&str]) -> (tempfile::TempDir, Arc<MockBackend>, Arc<ConfigManager>) {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ConfigManager::load(Some(dir.path().to_path_buf())).unwrap());
        manager
            .update(|c| {
                c.general.auto_start = false;
                c.startup.ready_attempts = 2;
                c.startup.ready_interval_ms = 1;
            })
            .unwrap();
        let backend = Arc::new(MockBackend::new());
        for d in devices {
            backend.add_device(*d, DeviceState::Active);
        }
        (dir, backend, manager)
    }

    #[tokio::test]
    async fn scripted_session_persists_selection_and_cleans_up() {
        let (_dir, backend, manager) = setup(&["in", "out"]);
        let script: &[u8] = b"help\nbogus\ninput 1\nlist\ninput 1\noutput 2\nstatus\nquit\nlist\n";

        serve_with_input(backend.clone(), manager.clone(), script)
            .await
            .unwrap();

        let cfg = manager.snapshot();
        assert_eq!(cfg.selected_input.as_deref(), Some("in"));
        assert!(cfg.selected_outputs.contains("out"));
        assert_eq!(backend.captures_created(), 1);
        assert_eq!(backend.live_captures(), 0);
        assert!(backend.live_render_ids().is_empty());
    }

    #[tokio::test]
    async fn end_of_input_shuts_down() {
        let (_dir, backend, manager) = setup(&["in", "out"]);
        manager
            .update(|c| {
                c.selected_input = Some("in".into());
                c.selected_outputs.insert("out".into());
            })
            .unwrap();
        let script: &[u8] = b"restart\n";

        serve_with_input(backend.clone(), manager, script)
            .await
            .unwrap();
        assert_eq!(backend.renders_created(), 1);
        assert_eq!(backend.live_captures(), 0);
        assert_eq!(backend.live_render_ids(), Vec::<DeviceId>::new());
    }

    #[tokio::test]
    async fn startup_settings_are_applied_and_undone_on_exit() {
        let (_dir, backend, manager) = setup(&["in", "out"]);
        manager
            .update(|c| {
                c.general.auto_start = true;
                c.general.start_paused = true;
                c.selected_input = Some("in".into());
                c.selected_outputs.insert("out".into());
            })
            .unwrap();

        // empty console: the auto start races the immediate shutdown
        let script: &[u8] = b"";
        serve_with_input(backend.clone(), manager, script)
            .await
            .unwrap();
        assert_eq!(backend.live_captures(), 0);
        assert!(!backend.capture_running());
    }

    #[test]
    fn quitting_during_the_startup_wait_exits_promptly() {
        let (_dir, backend, manager) = setup(&["out"]);
        manager
            .update(|c| {
                c.general.auto_start = true;
                c.startup.ready_attempts = 5;
                c.startup.ready_interval_ms = 3_000;
                c.selected_input = Some("in".into());
                c.selected_outputs.insert("out".into());
            })
            .unwrap();

        let started = Instant::now();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let script: &[u8] = b"quit\n";
        runtime
            .block_on(serve_with_input(backend.clone(), manager, script))
            .unwrap();
        // dropping the runtime waits for the blocked auto start
        drop(runtime);

        assert!(started.elapsed() < Duration::from_millis(2_000));
        assert_eq!(backend.captures_created(), 0);
    }
}
