use std::path::PathBuf;

use serde_json::Value;

use crate::app::config::AppConfig;
use crate::app::diagnostics;
use crate::app::error::AppError;
use crate::app::log_sink::RecordKind;
use crate::app::models::CommandResponse;
use crate::app::state::AppState;
use crate::app::update::{self, UpdateCheck};

use super::{ensure_non_empty, resolve_trace_id, tracked};

pub fn get_config(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    Ok(CommandResponse {
        trace_id,
        data: state.config(),
    })
}

/// Value at a dotted key, falling back to the compiled default.
pub fn get_config_value(
    state: &AppState,
    key: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<Value>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(key, "key", &trace_id)?;
    let data = state
        .settings()
        .get_or_default(key)
        .ok_or_else(|| AppError::validation(format!("Unknown config key: {key}"), &trace_id))?;
    Ok(CommandResponse { trace_id, data })
}

/// `raw` is parsed as JSON when possible (`30`, `true`, `["a"]`) and stored as a string
/// otherwise.
pub fn set_config_value(
    state: &AppState,
    key: &str,
    raw: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<Value>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "set_config_value", None, &trace_id, || {
        let value = serde_json::from_str::<Value>(raw.trim())
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        state.settings().set(key, value.clone(), &trace_id)?;
        Ok(value)
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn reset_config(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "reset_config", None, &trace_id, || {
        state.settings().reset(&trace_id)
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn backup_config(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<String>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "backup_config", None, &trace_id, || {
        state
            .settings()
            .backup_now(&trace_id)
            .map(|path| path.to_string_lossy().to_string())
    })?;
    Ok(CommandResponse { trace_id, data })
}

/// Backup file names, oldest first.
pub fn list_config_backups(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<String>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = state
        .settings()
        .list_backups()
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .collect();
    Ok(CommandResponse { trace_id, data })
}

pub fn restore_config_backup(
    state: &AppState,
    name: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "restore_config_backup", None, &trace_id, || {
        state.settings().restore_backup(name, &trace_id)
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn recent_logs(
    state: &AppState,
    kind: &str,
    limit: usize,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<Value>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let kind = RecordKind::parse(kind).ok_or_else(|| {
        AppError::validation(
            format!("Unknown log kind: {kind} (expected operations, commands or performance)"),
            &trace_id,
        )
    })?;
    let data = state.sink().recent_raw(kind, limit.max(1));
    Ok(CommandResponse { trace_id, data })
}

/// Deletes every log sink file. Returns how many were removed.
pub fn clear_logs(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<usize>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = state
        .sink()
        .clear()
        .map_err(|err| AppError::system(format!("Failed to clear logs: {err}"), &trace_id))?;
    Ok(CommandResponse { trace_id, data })
}

pub fn export_diagnostics(
    state: &AppState,
    output_dir: Option<PathBuf>,
    trace_id: Option<String>,
) -> Result<CommandResponse<String>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "export_diagnostics", None, &trace_id, || {
        diagnostics::export_diagnostics_bundle(
            state.runner(),
            &state.config(),
            Some(state.sink().as_ref()),
            output_dir.as_deref(),
            &trace_id,
        )
        .map(|path| path.to_string_lossy().to_string())
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn check_for_update(
    state: &AppState,
    current_version: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<UpdateCheck>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "check_for_update", None, &trace_id, || {
        update::check_for_update(&state.config().update, current_version, &trace_id)
    })?;
    Ok(CommandResponse { trace_id, data })
}
