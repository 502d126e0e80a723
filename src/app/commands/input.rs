use crate::app::adb::input::{
    input_text_args, key_event_args, long_press_args, swipe_args, tap_args,
};
use crate::app::error::AppError;
use crate::app::models::{CommandResponse, CommandResult};
use crate::app::state::AppState;

use super::{command_result, connected, require_success, resolve_trace_id, tracked};

fn send_input(
    state: &AppState,
    operation: &str,
    serial: &str,
    args: Result<Vec<String>, String>,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, operation, Some(serial), &trace_id, || {
        let args = args.map_err(|message| AppError::validation(message, &trace_id))?;
        connected(state, serial, &trace_id)?;
        let output = state.runner().run(Some(serial), &args, &trace_id)?;
        Ok(command_result(serial, require_success(output, operation, &trace_id)?))
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn tap(
    state: &AppState,
    serial: &str,
    x: i32,
    y: i32,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    send_input(state, "tap", serial, tap_args(x, y), trace_id)
}

/// Without a duration, the swipe takes longer the further it travels.
pub fn swipe(
    state: &AppState,
    serial: &str,
    from: (i32, i32),
    to: (i32, i32),
    duration_ms: Option<u64>,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    let args = swipe_args(from.0, from.1, to.0, to.1, duration_ms);
    send_input(state, "swipe", serial, args, trace_id)
}

pub fn long_press(
    state: &AppState,
    serial: &str,
    x: i32,
    y: i32,
    duration_ms: Option<u64>,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    send_input(state, "long_press", serial, long_press_args(x, y, duration_ms), trace_id)
}

pub fn key_event(
    state: &AppState,
    serial: &str,
    key: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    send_input(state, "key_event", serial, key_event_args(key), trace_id)
}

pub fn input_text(
    state: &AppState,
    serial: &str,
    text: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    send_input(state, "input_text", serial, input_text_args(text), trace_id)
}
