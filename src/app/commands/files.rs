use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::app::adb::parse::parse_ls_la;
use crate::app::adb::paths::{device_file_name, validate_device_path};
use crate::app::adb::runner::{AdbRunner, CommandOutput};
use crate::app::adb::transfer::{progress_flag_unsupported, run_with_progress};
use crate::app::error::AppError;
use crate::app::models::{CommandResponse, DeviceFileEntry};
use crate::app::state::AppState;

use super::{connected, ensure_non_empty, require_success, resolve_trace_id, tracked};

const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Single-quotes a path for the device shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn checked_device_path(path: &str, trace_id: &str) -> Result<String, AppError> {
    validate_device_path(path).map_err(|message| AppError::validation(message, trace_id))?;
    Ok(path.trim().to_string())
}

pub fn list_device_files(
    state: &AppState,
    serial: &str,
    path: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<DeviceFileEntry>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "list_device_files", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        let path = if path.trim() == "/" {
            "/".to_string()
        } else {
            checked_device_path(path, &trace_id)?
        };
        let output = require_success(
            state
                .runner()
                .shell(serial, &format!("ls -la {}", shell_quote(&path)), &trace_id)?,
            "ls",
            &trace_id,
        )?;
        Ok(parse_ls_la(&path, &output.stdout))
    })?;
    Ok(CommandResponse { trace_id, data })
}

/// Runs `adb -s <serial> <args>` with `-p` right after the verb, retrying without it on adb
/// builds that reject the flag.
fn transfer<F>(
    runner: &AdbRunner,
    serial: &str,
    verb: &str,
    operands: &[String],
    mut on_progress: F,
    trace_id: &str,
) -> Result<CommandOutput, AppError>
where
    F: FnMut(u8),
{
    let mut with_flag = vec![verb.to_string(), "-p".to_string()];
    with_flag.extend(operands.iter().cloned());
    let attempt = |args: Vec<String>, on_progress: &mut F| {
        let full = AdbRunner::adb_args(Some(serial), &args);
        let started = Instant::now();
        let result = run_with_progress(runner.program(), &full, TRANSFER_TIMEOUT, trace_id, |pct| {
            on_progress(pct)
        });
        runner.record(
            runner.program(),
            Some(serial),
            &full,
            &result,
            started.elapsed().as_millis() as u64,
            trace_id,
        );
        result
    };

    let output = attempt(with_flag, &mut on_progress)?;
    if output.success() || !progress_flag_unsupported(&output) {
        return Ok(output);
    }
    warn!(trace_id = %trace_id, serial = %serial, "adb {verb} rejected -p; retrying without progress");
    let mut plain = vec![verb.to_string()];
    plain.extend(operands.iter().cloned());
    attempt(plain, &mut on_progress)
}

/// Pulls a device file into `output_dir` (the configured output path when `None`). Returns the
/// local path.
pub fn pull_file<F>(
    state: &AppState,
    serial: &str,
    device_path: &str,
    output_dir: Option<PathBuf>,
    on_progress: F,
    trace_id: Option<String>,
) -> Result<CommandResponse<String>, AppError>
where
    F: FnMut(u8),
{
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "pull_file", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        let device_path = checked_device_path(device_path, &trace_id)?;
        let output_dir = output_dir.unwrap_or_else(|| state.config().output_dir());
        fs::create_dir_all(&output_dir).map_err(|err| {
            AppError::system(format!("Failed to create output dir: {err}"), &trace_id)
        })?;
        let local_dir = output_dir.to_string_lossy().to_string();
        let output = transfer(
            state.runner(),
            serial,
            "pull",
            &[device_path.clone(), local_dir],
            on_progress,
            &trace_id,
        )?;
        require_success(output, "Pull", &trace_id)?;
        let file_name = device_file_name(&device_path).unwrap_or_else(|| "output".to_string());
        Ok(output_dir.join(file_name).to_string_lossy().to_string())
    })?;
    Ok(CommandResponse { trace_id, data })
}

/// Pushes a local file or directory. A device path ending in `/` receives the local file name.
/// Returns the device path written.
pub fn push_file<F>(
    state: &AppState,
    serial: &str,
    local_path: &Path,
    device_path: &str,
    on_progress: F,
    trace_id: Option<String>,
) -> Result<CommandResponse<String>, AppError>
where
    F: FnMut(u8),
{
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "push_file", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        ensure_non_empty(&local_path.to_string_lossy(), "local_path", &trace_id)?;
        if !local_path.exists() {
            return Err(AppError::validation(
                format!("Local path not found: {}", local_path.display()),
                &trace_id,
            ));
        }
        let device_path = checked_device_path(device_path, &trace_id)?;
        let target = match (device_path.ends_with('/'), local_path.file_name()) {
            (true, Some(name)) => format!("{device_path}{}", name.to_string_lossy()),
            _ => device_path,
        };
        let output = transfer(
            state.runner(),
            serial,
            "push",
            &[local_path.to_string_lossy().to_string(), target.clone()],
            on_progress,
            &trace_id,
        )?;
        require_success(output, "Push", &trace_id)?;
        Ok(target)
    })?;
    Ok(CommandResponse { trace_id, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_paths_for_device_shell() {
        assert_eq!(shell_quote("/sdcard/My Files"), "'/sdcard/My Files'");
        assert_eq!(shell_quote("/sdcard/it's"), r"'/sdcard/it'\''s'");
    }
}
