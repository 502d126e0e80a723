//! Operations behind every front-end action.
//!
//! Each operation takes the shared [`AppState`], resolves a trace id, validates its input,
//! runs adb through the state's runner and returns a [`CommandResponse`]. Operation and timing
//! records go to the log sink whether the operation succeeds or not.

use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::runner::CommandOutput;
use crate::app::error::AppError;
use crate::app::log_sink::{OperationRecord, PerformanceRecord};
use crate::app::models::CommandResult;
use crate::app::state::AppState;

mod apps;
mod device;
mod files;
mod input;
mod logcat;
mod maintenance;
mod media;
mod shell;
mod system;

pub use apps::{
    apk_info, app_version, clear_app_data, current_activity, force_stop_app, install_apk,
    launch_app, list_apps, uninstall_app, InstallOptions,
};
pub use device::{check_adb, device_detail, list_devices, list_devices_detailed};
pub use files::{list_device_files, pull_file, push_file};
pub use input::{input_text, key_event, long_press, swipe, tap};
pub use logcat::{clear_logcat, dump_logcat, start_logcat, stop_logcat};
pub use maintenance::{
    backup_config, check_for_update, clear_logs, export_diagnostics, get_config,
    get_config_value, list_config_backups, recent_logs, reset_config, restore_config_backup,
    set_config_value,
};
pub use media::screenshot;
pub use shell::run_shell;
pub use system::{
    acquire_root, engineering_modes, enter_engineering_mode, reboot, remount, run_privileged,
    EngineeringLaunch,
};

#[cfg(test)]
mod tests;

pub fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub(crate) fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            format!("{field} is required"),
            trace_id,
        ));
    }
    Ok(())
}

/// Rejects empty serials and serials missing from the latest device list.
pub(crate) fn connected(state: &AppState, serial: &str, trace_id: &str) -> Result<(), AppError> {
    ensure_non_empty(serial, "serial", trace_id)?;
    state.devices().ensure_connected(serial, trace_id)
}

pub(crate) fn ensure_all_connected(
    state: &AppState,
    serials: &[String],
    trace_id: &str,
) -> Result<(), AppError> {
    if serials.is_empty() {
        return Err(AppError::validation("serials is required", trace_id));
    }
    for serial in serials {
        connected(state, serial, trace_id)?;
    }
    Ok(())
}

pub(crate) fn command_result(serial: &str, output: CommandOutput) -> CommandResult {
    CommandResult {
        serial: serial.to_string(),
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
        elapsed_ms: output.elapsed_ms,
    }
}

pub(crate) fn require_success(
    output: CommandOutput,
    action: &str,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    if output.success() {
        return Ok(output);
    }
    let detail = output.text();
    let detail = detail.trim();
    Err(AppError::dependency(
        if detail.is_empty() {
            format!("{action} failed with exit code {:?}", output.exit_code)
        } else {
            format!("{action} failed: {detail}")
        },
        trace_id,
    ))
}

/// Runs `work` holding the device lock for `serial`. Only for operations that fan out over
/// several devices; the dispatcher already holds the lock for single-device tasks.
pub(crate) fn with_device_lock<T>(state: &AppState, serial: &str, work: impl FnOnce() -> T) -> T {
    let lock = state.scheduler().device_lock(serial);
    let _guard = lock
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    work()
}

/// Runs one operation and appends its operation and performance records.
pub(crate) fn tracked<T>(
    state: &AppState,
    operation: &str,
    serial: Option<&str>,
    trace_id: &str,
    work: impl FnOnce() -> Result<T, AppError>,
) -> Result<T, AppError> {
    info!(trace_id = %trace_id, serial = serial.unwrap_or("-"), "{operation}");
    let started = Instant::now();
    let result = work();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let message = match &result {
        Ok(_) => String::new(),
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "{operation} failed");
            err.to_string()
        }
    };
    let sink = state.sink();
    sink.record_operation(OperationRecord {
        timestamp: Utc::now(),
        trace_id: trace_id.to_string(),
        operation: operation.to_string(),
        serial: serial.map(str::to_string),
        success: result.is_ok(),
        message,
    });
    sink.record_performance(PerformanceRecord {
        timestamp: Utc::now(),
        operation: operation.to_string(),
        serial: serial.map(str::to_string),
        elapsed_ms,
    });
    result
}
