use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::app::adb::parse::parse_adb_devices;
use crate::app::adb::paths::sanitize_filename_component;
use crate::app::adb::runner::AdbRunner;
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::log_sink::LogSink;
use crate::app::models::DeviceSummary;

#[derive(Debug, Serialize)]
struct DiagnosticsManifest {
    app_version: &'static str,
    os: &'static str,
    arch: &'static str,
    timestamp_utc: String,
    trace_id: String,
    adb_program: String,
    log_files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DevicesPayload {
    parsed: Vec<DeviceSummary>,
    raw_stdout: String,
    raw_stderr: String,
    exit_code: Option<i32>,
    error: Option<String>,
}

fn collect_devices(runner: &AdbRunner, trace_id: &str) -> DevicesPayload {
    let mut payload = DevicesPayload {
        parsed: Vec::new(),
        raw_stdout: String::new(),
        raw_stderr: String::new(),
        exit_code: None,
        error: None,
    };
    match runner.run(None, &["devices", "-l"], trace_id) {
        Ok(output) => {
            payload.parsed = parse_adb_devices(&output.stdout);
            payload.exit_code = output.exit_code;
            payload.raw_stdout = output.stdout;
            payload.raw_stderr = output.stderr;
        }
        Err(err) => {
            warn!(
                trace_id = %trace_id,
                error = %err.error,
                code = %err.code,
                "Failed to run adb devices for diagnostics"
            );
            payload.error = Some(err.error);
        }
    }
    payload
}

fn write_entry(
    zip: &mut ZipWriter<fs::File>,
    name: &str,
    bytes: &[u8],
    trace_id: &str,
) -> Result<(), AppError> {
    zip.start_file(name, FileOptions::<()>::default())
        .map_err(|err| AppError::system(format!("Failed to write bundle: {err}"), trace_id))?;
    zip.write_all(bytes)
        .map_err(|err| AppError::system(format!("Failed to write bundle: {err}"), trace_id))
}

fn to_json<T: Serialize>(value: &T, trace_id: &str) -> Result<Vec<u8>, AppError> {
    serde_json::to_vec_pretty(value).map_err(|err| {
        AppError::system(format!("Failed to serialize diagnostics payload: {err}"), trace_id)
    })
}

/// Zip with `manifest.json`, `config.json`, `devices.json` and the log sink files under `logs/`.
pub fn export_diagnostics_bundle(
    runner: &AdbRunner,
    config: &AppConfig,
    sink: Option<&LogSink>,
    output_dir: Option<&Path>,
    trace_id: &str,
) -> Result<PathBuf, AppError> {
    let resolved_dir = output_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.output_dir());
    fs::create_dir_all(&resolved_dir).map_err(|err| {
        AppError::system(format!("Failed to create output dir: {err}"), trace_id)
    })?;

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let trace_short = sanitize_filename_component(trace_id)
        .chars()
        .take(8)
        .collect::<String>();
    let bundle_path = resolved_dir.join(format!("diagnostics_{timestamp}_{trace_short}.zip"));

    let log_files = sink.map(LogSink::files).unwrap_or_default();
    let manifest = DiagnosticsManifest {
        app_version: env!("CARGO_PKG_VERSION"),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        timestamp_utc: Utc::now().to_rfc3339(),
        trace_id: trace_id.to_string(),
        adb_program: runner.program().to_string(),
        log_files: log_files
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect(),
    };
    let devices = collect_devices(runner, trace_id);

    let file = fs::File::create(&bundle_path)
        .map_err(|err| AppError::system(format!("Failed to create bundle: {err}"), trace_id))?;
    let mut zip = ZipWriter::new(file);
    write_entry(&mut zip, "manifest.json", &to_json(&manifest, trace_id)?, trace_id)?;
    write_entry(&mut zip, "config.json", &to_json(config, trace_id)?, trace_id)?;
    write_entry(&mut zip, "devices.json", &to_json(&devices, trace_id)?, trace_id)?;
    for path in &log_files {
        let Some(name) = path.file_name().map(|name| name.to_string_lossy().to_string()) else {
            continue;
        };
        match fs::read(path) {
            Ok(bytes) => write_entry(&mut zip, &format!("logs/{name}"), &bytes, trace_id)?,
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err, path = %path.display(), "skipping unreadable log file")
            }
        }
    }
    zip.finish()
        .map_err(|err| AppError::system(format!("Failed to finalize bundle: {err}"), trace_id))?;

    info!(trace_id = %trace_id, path = %bundle_path.display(), "diagnostics bundle written");
    Ok(bundle_path)
}
