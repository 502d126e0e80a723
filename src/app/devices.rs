use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::adb::parse::{
    build_device_detail, parse_adb_devices, parse_battery_level, parse_getprop_map,
};
use crate::app::adb::runner::AdbRunner;
use crate::app::error::{AppError, ERR_DEVICE_NOT_FOUND};
use crate::app::models::{DeviceDetail, DeviceInfo, DeviceSummary};

pub const ONLINE_STATE: &str = "device";

/// Device list derived from `adb devices -l`. Nothing is cached beyond the last snapshot, which
/// every refresh replaces wholesale.
pub struct DeviceRegistry {
    runner: AdbRunner,
    show_offline: bool,
    snapshot: Mutex<Option<Vec<DeviceSummary>>>,
}

impl DeviceRegistry {
    pub fn new(runner: AdbRunner, show_offline: bool) -> Self {
        Self {
            runner,
            show_offline,
            snapshot: Mutex::new(None),
        }
    }

    pub fn runner(&self) -> &AdbRunner {
        &self.runner
    }

    pub fn refresh(&self, trace_id: &str) -> Result<Vec<DeviceSummary>, AppError> {
        let output = self.runner.run(None, &["devices", "-l"], trace_id)?;
        if !output.success() {
            return Err(AppError::dependency(
                format!("adb devices failed: {}", output.text()),
                trace_id,
            ));
        }
        let devices = parse_adb_devices(&output.stdout);
        debug!(trace_id = %trace_id, count = devices.len(), "device list refreshed");
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(devices.clone());
        Ok(devices)
    }

    /// Last snapshot, without running adb.
    pub fn snapshot(&self) -> Vec<DeviceSummary> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }

    fn snapshot_or_refresh(&self, trace_id: &str) -> Result<Vec<DeviceSummary>, AppError> {
        let cached = self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match cached {
            Some(devices) => Ok(devices),
            None => self.refresh(trace_id),
        }
    }

    /// Serials of the last snapshot in `adb devices` order.
    pub fn serials(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|device| self.show_offline || device.state == ONLINE_STATE)
            .map(|device| device.serial)
            .collect()
    }

    pub fn ensure_connected(&self, serial: &str, trace_id: &str) -> Result<(), AppError> {
        let serial = serial.trim();
        if serial.is_empty() {
            return Err(AppError::validation("serial is required", trace_id));
        }
        let devices = self.snapshot_or_refresh(trace_id)?;
        match devices.iter().find(|device| device.serial == serial) {
            Some(device) if device.state == ONLINE_STATE => Ok(()),
            Some(device) => Err(AppError::new(
                ERR_DEVICE_NOT_FOUND,
                format!("Device {serial} is {}", device.state),
                trace_id,
            )),
            None => Err(AppError::device_not_found(serial, trace_id)),
        }
    }

    /// The only online device, used when the caller did not pick one.
    pub fn sole_device(&self, trace_id: &str) -> Result<String, AppError> {
        let online: Vec<String> = self
            .refresh(trace_id)?
            .into_iter()
            .filter(|device| device.state == ONLINE_STATE)
            .map(|device| device.serial)
            .collect();
        match online.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(AppError::new(
                ERR_DEVICE_NOT_FOUND,
                "No device connected",
                trace_id,
            )),
            _ => Err(AppError::validation(
                format!(
                    "Multiple devices connected ({}); pass --serial",
                    online.join(", ")
                ),
                trace_id,
            )),
        }
    }

    pub fn device_detail(&self, serial: &str, trace_id: &str) -> Result<DeviceDetail, AppError> {
        let props = self.runner.shell(serial, "getprop", trace_id)?;
        if !props.success() {
            return Err(AppError::dependency(
                format!("getprop failed: {}", props.text()),
                trace_id,
            ));
        }
        let mut detail = build_device_detail(serial, &parse_getprop_map(&props.stdout));
        match self.runner.shell(serial, "dumpsys battery", trace_id) {
            Ok(output) => detail.battery_level = parse_battery_level(&output.stdout),
            Err(err) => {
                warn!(trace_id = %trace_id, serial = %serial, error = %err, "battery level unavailable")
            }
        }
        Ok(detail)
    }

    pub fn list_with_details(&self, trace_id: &str) -> Result<Vec<DeviceInfo>, AppError> {
        let devices = self.refresh(trace_id)?;
        Ok(devices
            .into_iter()
            .filter(|device| self.show_offline || device.state == ONLINE_STATE)
            .map(|summary| {
                let detail = (summary.state == ONLINE_STATE)
                    .then(|| self.device_detail(&summary.serial, trace_id))
                    .and_then(|result| {
                        result
                            .map_err(|err| {
                                warn!(trace_id = %trace_id, serial = %summary.serial, error = %err, "device detail failed")
                            })
                            .ok()
                    });
                DeviceInfo { summary, detail }
            })
            .collect())
    }
}

/// Periodic refresh on a background thread.
pub struct DeviceWatcher {
    stop_flag: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl DeviceWatcher {
    pub fn start<F>(
        registry: Arc<DeviceRegistry>,
        interval: Duration,
        trace_id: String,
        on_snapshot: F,
    ) -> Self
    where
        F: Fn(Vec<DeviceSummary>) + Send + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop_flag);
        let interval = interval.max(Duration::from_millis(100));
        let join = thread::spawn(move || {
            let mut backoff = interval;
            while !stop_thread.load(Ordering::Relaxed) {
                let wait = match registry.refresh(&trace_id) {
                    Ok(devices) => {
                        backoff = interval;
                        on_snapshot(devices);
                        interval
                    }
                    Err(err) => {
                        warn!(trace_id = %trace_id, error = %err, "device refresh failed");
                        backoff = (backoff * 2).min(interval * 6);
                        backoff
                    }
                };
                let deadline = Instant::now() + wait;
                while Instant::now() < deadline {
                    if stop_thread.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(Duration::from_millis(50));
                }
            }
        });
        Self { stop_flag, join }
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    pub fn stop(self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        let _ = self.join.join();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn fake_adb(dir: &TempDir, devices_output: &str) -> String {
        let path = dir.path().join("adb");
        let script = format!(
            "#!/bin/sh\nwhile [ \"$1\" = \"-s\" ]; do shift 2; done\ncase \"$1\" in\n  devices) printf '{}' ;;\n  shell) shift; case \"$1\" in getprop) echo '[ro.product.model]: [Pixel 7]'; echo '[ro.build.version.sdk]: [34]' ;; *) echo 'level: 64' ;; esac ;;\n  *) exit 1 ;;\nesac\n",
            devices_output
        );
        fs::write(&path, script).expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path.to_string_lossy().to_string()
    }

    fn registry(dir: &TempDir, output: &str, show_offline: bool) -> DeviceRegistry {
        DeviceRegistry::new(AdbRunner::new(fake_adb(dir, output), "aapt"), show_offline)
    }

    const LISTING: &str = "List of devices attached\\nAAA device model:Pixel_7\\nBBB offline\\nCCC unauthorized\\n";

    #[test]
    fn refresh_and_serials_follow_offline_setting() {
        let dir = TempDir::new().expect("tmp");
        let hidden = registry(&dir, LISTING, false);
        assert!(hidden.serials().is_empty());
        assert_eq!(hidden.refresh("t").expect("refresh").len(), 3);
        assert_eq!(hidden.serials(), vec!["AAA"]);

        let shown = registry(&dir, LISTING, true);
        shown.refresh("t").expect("refresh");
        assert_eq!(shown.serials(), vec!["AAA", "BBB", "CCC"]);
    }

    #[test]
    fn ensure_connected_requires_online_listing() {
        let dir = TempDir::new().expect("tmp");
        let registry = registry(&dir, LISTING, false);
        assert!(registry.ensure_connected("AAA", "t").is_ok());
        assert_eq!(
            registry.ensure_connected("BBB", "t").expect_err("offline").code,
            "ERR_DEVICE_NOT_FOUND"
        );
        assert_eq!(
            registry.ensure_connected("ZZZ", "t").expect_err("missing").code,
            "ERR_DEVICE_NOT_FOUND"
        );
        assert_eq!(
            registry.ensure_connected(" ", "t").expect_err("empty").code,
            "ERR_VALIDATION"
        );
    }

    #[test]
    fn sole_device_picks_the_only_online_serial() {
        let dir = TempDir::new().expect("tmp");
        assert_eq!(registry(&dir, LISTING, false).sole_device("t").expect("one"), "AAA");
        let many = registry(&dir, "List of devices attached\\nA device\\nB device\\n", false);
        assert_eq!(many.sole_device("t").expect_err("many").code, "ERR_VALIDATION");
    }

    #[test]
    fn reads_device_detail() {
        let dir = TempDir::new().expect("tmp");
        let registry = registry(&dir, LISTING, false);
        let detail = registry.device_detail("AAA", "t").expect("detail");
        assert_eq!(detail.model.as_deref(), Some("Pixel 7"));
        assert_eq!(detail.api_level.as_deref(), Some("34"));
        assert_eq!(detail.battery_level, Some(64));

        let listed = registry.list_with_details("t").expect("list");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].detail.is_some());
    }

    #[test]
    fn watcher_delivers_snapshots_until_stopped() {
        let dir = TempDir::new().expect("tmp");
        let registry = Arc::new(registry(&dir, LISTING, false));
        let (tx, rx) = mpsc::channel();
        let watcher = DeviceWatcher::start(
            Arc::clone(&registry),
            Duration::from_millis(100),
            "watch".to_string(),
            move |devices| {
                let _ = tx.send(devices.len());
            },
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).expect("first"), 3);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).expect("second"), 3);
        assert!(watcher.is_running());
        watcher.stop();
    }
}
