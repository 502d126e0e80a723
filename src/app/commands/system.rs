use serde::Serialize;
use tracing::{info, warn};

use crate::app::adb::engineering::{detect_vendor, launch_failed, modes_for, EngineeringMode, Vendor};
use crate::app::adb::parse::parse_getprop_map;
use crate::app::adb::root::{self, needs_root_retry, RebootMode, RootOutcome, RootStatus};
use crate::app::adb::runner::CommandOutput;
use crate::app::error::AppError;
use crate::app::models::{CommandResponse, CommandResult};
use crate::app::state::AppState;

use super::{
    command_result, connected, ensure_all_connected, ensure_non_empty, require_success,
    resolve_trace_id, tracked, with_device_lock,
};

const DECLINED_MESSAGE: &str =
    "adbd cannot run as root on this build; root needs a userdebug or eng image";

fn root_device(state: &AppState, serial: &str, trace_id: &str) -> Result<RootStatus, AppError> {
    let timeout = state.config().root_timeout();
    let mut status = root::acquire_root(state.runner(), serial, timeout, trace_id)?;
    if status.outcome == RootOutcome::Declined {
        status.message = DECLINED_MESSAGE.to_string();
    }
    Ok(status)
}

pub fn acquire_root(
    state: &AppState,
    serial: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<RootStatus>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "acquire_root", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        root_device(state, serial, &trace_id)
    })?;
    Ok(CommandResponse { trace_id, data })
}

/// Runs `attempt`; when its output asks for root, acquires root and runs it once more.
fn retry_with_root(
    state: &AppState,
    serial: &str,
    trace_id: &str,
    attempt: impl Fn() -> Result<CommandOutput, AppError>,
) -> Result<CommandOutput, AppError> {
    let output = attempt()?;
    if !needs_root_retry(&output) {
        return Ok(output);
    }
    info!(trace_id = %trace_id, serial = %serial, "command needs root; acquiring");
    let status = root_device(state, serial, trace_id)?;
    if !status.is_root {
        return Err(AppError::dependency(
            format!("Root required: {}", status.message.trim()),
            trace_id,
        ));
    }
    attempt()
}

/// Shell command that may need root. Retried once after `adb root` when the first attempt
/// reports "not found", "permission denied" or "not running as root".
pub fn run_privileged(
    state: &AppState,
    serial: &str,
    command: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "run_privileged", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        ensure_non_empty(command, "command", &trace_id)?;
        let output = retry_with_root(state, serial, &trace_id, || {
            state.runner().shell(serial, command, &trace_id)
        })?;
        Ok(command_result(serial, output))
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn remount(
    state: &AppState,
    serial: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "remount", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        let output = retry_with_root(state, serial, &trace_id, || {
            state.runner().run(Some(serial), &["remount"], &trace_id)
        })?;
        Ok(command_result(serial, require_success(output, "remount", &trace_id)?))
    })?;
    Ok(CommandResponse { trace_id, data })
}

/// Reboots each device in turn. Failures are per-device results.
pub fn reboot(
    state: &AppState,
    serials: Vec<String>,
    mode: RebootMode,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<CommandResult>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "reboot", None, &trace_id, || {
        ensure_all_connected(state, &serials, &trace_id)?;
        serials
            .iter()
            .map(|serial| {
                with_device_lock(state, serial, || {
                    state
                        .runner()
                        .run(Some(serial), &mode.args(), &trace_id)
                        .map(|output| command_result(serial, output))
                })
            })
            .collect::<Result<Vec<_>, _>>()
    })?;
    Ok(CommandResponse { trace_id, data })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineeringLaunch {
    pub serial: String,
    pub vendor: Vendor,
    pub mode: String,
    pub output: String,
}

fn resolve_vendor(
    state: &AppState,
    serial: &str,
    vendor_override: Option<&str>,
    trace_id: &str,
) -> Result<Vendor, AppError> {
    if let Some(name) = vendor_override.map(str::trim).filter(|value| !value.is_empty()) {
        return Vendor::parse(name)
            .ok_or_else(|| AppError::validation(format!("Unknown vendor: {name}"), trace_id));
    }
    let props = require_success(
        state.runner().shell(serial, "getprop", trace_id)?,
        "getprop",
        trace_id,
    )?;
    Ok(detect_vendor(&parse_getprop_map(&props.stdout)))
}

pub fn engineering_modes(
    state: &AppState,
    serial: &str,
    vendor_override: Option<&str>,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<EngineeringMode>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "engineering_modes", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        Ok(modes_for(resolve_vendor(state, serial, vendor_override, &trace_id)?))
    })?;
    Ok(CommandResponse { trace_id, data })
}

/// Tries the vendor's entry points in order and stops at the first one `am` accepts.
pub fn enter_engineering_mode(
    state: &AppState,
    serial: &str,
    vendor_override: Option<&str>,
    trace_id: Option<String>,
) -> Result<CommandResponse<EngineeringLaunch>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "enter_engineering_mode", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        let vendor = resolve_vendor(state, serial, vendor_override, &trace_id)?;
        let mut failures = Vec::new();
        for mode in modes_for(vendor) {
            let output = state
                .runner()
                .shell(serial, &mode.entry.shell_command(), &trace_id)?;
            let text = output.combined();
            if output.success() && !launch_failed(&text) {
                return Ok(EngineeringLaunch {
                    serial: serial.to_string(),
                    vendor,
                    mode: mode.name.to_string(),
                    output: text,
                });
            }
            warn!(trace_id = %trace_id, serial = %serial, mode = mode.name, "engineering entry point failed");
            failures.push(format!("{}: {}", mode.name, text.trim()));
        }
        Err(AppError::dependency(
            format!(
                "No engineering mode could be opened for {}: {}",
                vendor.as_str(),
                failures.join("; ")
            ),
            &trace_id,
        ))
    })?;
    Ok(CommandResponse { trace_id, data })
}
