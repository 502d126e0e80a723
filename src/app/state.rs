use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::app::adb::locator::{resolve_aapt_program, resolve_adb_program};
use crate::app::adb::logcat::LogcatRegistry;
use crate::app::adb::runner::AdbRunner;
use crate::app::config::{AppConfig, SettingsStore};
use crate::app::devices::DeviceRegistry;
use crate::app::log_sink::LogSink;
use crate::app::scheduler::TaskScheduler;

/// Everything an operation needs, owned by the front end and shared with workers by `Arc`.
///
/// The runner is built from the configuration at construction time; changes to `adb.*` take
/// effect on the next start.
pub struct AppState {
    settings: Mutex<SettingsStore>,
    devices: DeviceRegistry,
    sink: Arc<LogSink>,
    logcat: LogcatRegistry,
    scheduler: Arc<TaskScheduler>,
}

impl AppState {
    pub fn new(store: SettingsStore, scheduler: Arc<TaskScheduler>) -> Self {
        let sink = Arc::new(LogSink::from_settings(&store.config().logging));
        Self::with_sink(store, sink, scheduler)
    }

    pub fn with_sink(
        store: SettingsStore,
        sink: Arc<LogSink>,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        let config = store.config();
        let runner = AdbRunner::new(
            resolve_adb_program(&config.adb.command_path),
            resolve_aapt_program(&config.adb.aapt_path),
        )
        .with_timeout(config.command_timeout())
        .with_sink(Arc::clone(&sink));
        Self {
            settings: Mutex::new(store),
            devices: DeviceRegistry::new(runner, config.device.show_offline_devices),
            sink,
            logcat: LogcatRegistry::new(),
            scheduler,
        }
    }

    pub fn settings(&self) -> MutexGuard<'_, SettingsStore> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> AppConfig {
        self.settings().config()
    }

    pub fn runner(&self) -> &AdbRunner {
        self.devices.runner()
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn sink(&self) -> &Arc<LogSink> {
        &self.sink
    }

    pub fn logcat(&self) -> &LogcatRegistry {
        &self.logcat
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }
}
