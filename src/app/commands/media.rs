use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::app::adb::paths::timestamped_file_name;
use crate::app::adb::runner::AdbRunner;
use crate::app::config::ScreenshotSettings;
use crate::app::error::AppError;
use crate::app::models::CommandResponse;
use crate::app::state::AppState;

use super::{connected, require_success, resolve_trace_id, tracked};

const PNG_MAGIC: &[u8] = b"\x89PNG";

fn screencap_args(settings: &ScreenshotSettings) -> Vec<String> {
    let mut args = vec!["screencap".to_string(), "-p".to_string()];
    if settings.display_id >= 0 {
        args.push("-d".to_string());
        args.push(settings.display_id.to_string());
    }
    args.extend(settings.extra_args.split_whitespace().map(str::to_string));
    args
}

const EXEC_OUT_TIMEOUT: Duration = Duration::from_secs(20);

/// `exec-out` streams the PNG on stdout, which must stay binary.
fn capture_exec_out(
    runner: &AdbRunner,
    serial: &str,
    screencap: &[String],
    target: &Path,
    trace_id: &str,
) -> Result<(), String> {
    let mut args = vec!["exec-out".to_string()];
    args.extend(screencap.iter().cloned());
    let output = runner
        .run_bytes_with_timeout(Some(serial), &args, EXEC_OUT_TIMEOUT, trace_id)
        .map_err(|err| err.error)?;
    if !output.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(if stderr.is_empty() {
            "unknown error".to_string()
        } else {
            stderr
        });
    }
    if !output.stdout.starts_with(PNG_MAGIC) {
        return Err("exec-out did not return PNG data".to_string());
    }
    fs::write(target, &output.stdout).map_err(|err| format!("Failed to write screenshot: {err}"))
}

fn capture_via_device_file(
    runner: &AdbRunner,
    serial: &str,
    screencap: &[String],
    target: &Path,
    file_name: &str,
    trace_id: &str,
) -> Result<(), AppError> {
    let remote_path = format!("/sdcard/{file_name}");
    let command = format!("{} {}", screencap.join(" "), remote_path);
    require_success(
        runner.shell_with_timeout(serial, &command, Duration::from_secs(10), trace_id)?,
        "Fallback screencap",
        trace_id,
    )?;
    let local = target.to_string_lossy().to_string();
    let pulled = runner
        .run_with_timeout(
            Some(serial),
            &["pull", remote_path.as_str(), local.as_str()],
            Duration::from_secs(20),
            trace_id,
        )
        .and_then(|output| require_success(output, "Fallback pull", trace_id));
    // The device copy goes away whether or not the pull worked.
    if let Err(err) = runner.shell_with_timeout(
        serial,
        &format!("rm -f {remote_path}"),
        Duration::from_secs(10),
        trace_id,
    ) {
        warn!(trace_id = %trace_id, error = %err.error, "failed to remove fallback screenshot");
    }
    pulled.map(|_| ())
}

/// Saves a timestamped PNG under `output_dir` (the configured output path when `None`) and
/// returns its path.
pub fn screenshot(
    state: &AppState,
    serial: &str,
    output_dir: Option<PathBuf>,
    trace_id: Option<String>,
) -> Result<CommandResponse<String>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "screenshot", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        let config = state.config();
        let output_dir = output_dir.unwrap_or_else(|| config.output_dir());
        fs::create_dir_all(&output_dir).map_err(|err| {
            AppError::system(format!("Failed to create output dir: {err}"), &trace_id)
        })?;
        let file_name = timestamped_file_name(serial, "screenshot", "png");
        let target = output_dir.join(&file_name);
        let screencap = screencap_args(&config.screenshot);
        let runner = state.runner();

        let exec_error = match capture_exec_out(runner, serial, &screencap, &target, &trace_id) {
            Ok(()) => return Ok(target.to_string_lossy().to_string()),
            Err(message) => message,
        };
        warn!(
            trace_id = %trace_id,
            error = %exec_error,
            "exec-out screencap failed; falling back to pull"
        );
        capture_via_device_file(runner, serial, &screencap, &target, &file_name, &trace_id)
            .map_err(|err| {
                AppError::dependency(
                    format!(
                        "Screenshot failed (exec-out): {exec_error}. Fallback failed: {}",
                        err.error
                    ),
                    &trace_id,
                )
            })?;
        Ok(target.to_string_lossy().to_string())
    })?;
    Ok(CommandResponse { trace_id, data })
}
