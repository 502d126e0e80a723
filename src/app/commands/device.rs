use std::time::Duration;

use tracing::warn;

use crate::app::adb::locator::validate_program;
use crate::app::adb::runner::run_command_with_timeout;
use crate::app::devices::ONLINE_STATE;
use crate::app::error::AppError;
use crate::app::models::{AdbInfo, CommandResponse, DeviceDetail, DeviceInfo, DeviceSummary};
use crate::app::state::AppState;

use super::{connected, resolve_trace_id, tracked};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn probe(program: &str, label: &str, args: &[&str], trace_id: &str) -> Result<String, String> {
    validate_program(program, label)?;
    let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    let output = run_command_with_timeout(program, &args, PROBE_TIMEOUT, trace_id)
        .map_err(|err| err.error)?;
    if output.success() {
        Ok(output.combined())
    } else if output.stderr.trim().is_empty() {
        Err(format!("{label} returned a non-zero exit code"))
    } else {
        Err(output.stderr.trim().to_string())
    }
}

/// Reports whether adb (and aapt) can be run. Never fails on a missing tool.
pub fn check_adb(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<AdbInfo>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let runner = state.runner();
    let program = runner.program().to_string();

    let adb = probe(&program, "adb", &["version"], &trace_id);
    if let Err(message) = &adb {
        warn!(trace_id = %trace_id, error = %message, "adb check failed");
    }
    // aapt prints usage and exits non-zero without arguments; `version` is accepted everywhere.
    let aapt_available = probe(runner.aapt_program(), "aapt", &["version"], &trace_id).is_ok();

    let data = match adb {
        Ok(version_output) => AdbInfo {
            available: true,
            aapt_available,
            version_output,
            command_path: program,
            error: None,
        },
        Err(message) => AdbInfo {
            available: false,
            aapt_available,
            version_output: String::new(),
            command_path: program,
            error: Some(message),
        },
    };
    Ok(CommandResponse { trace_id, data })
}

/// Refreshes the registry and returns the devices visible under `device.show_offline_devices`.
pub fn list_devices(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<DeviceSummary>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let show_offline = state.config().device.show_offline_devices;
    let data = tracked(state, "list_devices", None, &trace_id, || {
        Ok(state
            .devices()
            .refresh(&trace_id)?
            .into_iter()
            .filter(|device| show_offline || device.state == ONLINE_STATE)
            .collect())
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn list_devices_detailed(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<DeviceInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "list_devices_detailed", None, &trace_id, || {
        state.devices().list_with_details(&trace_id)
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn device_detail(
    state: &AppState,
    serial: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<DeviceDetail>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "device_detail", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        state.devices().device_detail(serial, &trace_id)
    })?;
    Ok(CommandResponse { trace_id, data })
}
