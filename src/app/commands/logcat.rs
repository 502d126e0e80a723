use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::app::adb::logcat::{spawn_adb_logcat, BatchPolicy, LogcatEmitter};
use crate::app::adb::paths::timestamped_file_name;
use crate::app::error::AppError;
use crate::app::models::{CommandResponse, CommandResult};
use crate::app::state::AppState;

use super::{command_result, connected, require_success, resolve_trace_id, tracked};

const DUMP_TIMEOUT: Duration = Duration::from_secs(120);

fn resolve_filter(state: &AppState, filter: Option<String>) -> Option<String> {
    filter
        .or_else(|| Some(state.config().logcat.default_filter))
        .filter(|value| !value.trim().is_empty())
}

/// Streams `adb logcat` for `serial` into `emitter` until [`stop_logcat`]. A second start for
/// the same device is rejected.
pub fn start_logcat(
    state: &AppState,
    serial: &str,
    filter: Option<String>,
    emitter: LogcatEmitter,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    tracked(state, "start_logcat", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        let filter = resolve_filter(state, filter);
        let policy = BatchPolicy::from_settings(&state.config().logcat);
        let program = state.runner().program().to_string();
        state.logcat().start(
            serial,
            filter.as_deref(),
            policy,
            emitter,
            &trace_id,
            |serial, filter, trace_id| spawn_adb_logcat(&program, serial, filter, trace_id),
        )
    })?;
    Ok(CommandResponse {
        trace_id,
        data: true,
    })
}

pub fn stop_logcat(
    state: &AppState,
    serial: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    tracked(state, "stop_logcat", Some(serial), &trace_id, || {
        state.logcat().stop(serial, &trace_id)
    })?;
    Ok(CommandResponse {
        trace_id,
        data: true,
    })
}

pub fn clear_logcat(
    state: &AppState,
    serial: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "clear_logcat", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        let output = state.runner().run(Some(serial), &["logcat", "-c"], &trace_id)?;
        Ok(command_result(serial, require_success(output, "logcat -c", &trace_id)?))
    })?;
    Ok(CommandResponse { trace_id, data })
}

/// Writes the current log buffer (`logcat -d`) to `output`, or to a timestamped file in the
/// configured output directory. Returns the file path.
pub fn dump_logcat(
    state: &AppState,
    serial: &str,
    output: Option<PathBuf>,
    filter: Option<String>,
    trace_id: Option<String>,
) -> Result<CommandResponse<String>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "dump_logcat", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        let target = output.unwrap_or_else(|| {
            state
                .config()
                .output_dir()
                .join(timestamped_file_name(serial, "logcat", "txt"))
        });
        if let Some(parent) = target.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::system(format!("Failed to create output dir: {err}"), &trace_id)
            })?;
        }
        let mut args = vec!["logcat".to_string(), "-d".to_string()];
        if let Some(filter) = resolve_filter(state, filter) {
            args.extend(filter.split_whitespace().map(str::to_string));
        }
        let result = state
            .runner()
            .run_with_timeout(Some(serial), &args, DUMP_TIMEOUT, &trace_id)?;
        let result = require_success(result, "logcat -d", &trace_id)?;
        fs::write(&target, result.stdout.as_bytes()).map_err(|err| {
            AppError::system(format!("Failed to write logcat dump: {err}"), &trace_id)
        })?;
        Ok(target.to_string_lossy().to_string())
    })?;
    Ok(CommandResponse { trace_id, data })
}
