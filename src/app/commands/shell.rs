use std::thread;

use tracing::warn;

use crate::app::error::AppError;
use crate::app::models::{CommandResponse, CommandResult};
use crate::app::state::AppState;

use super::{
    command_result, ensure_all_connected, ensure_non_empty, resolve_trace_id, tracked,
    with_device_lock,
};

fn run_one(
    state: &AppState,
    serial: &str,
    command: &str,
    trace_id: &str,
) -> Result<CommandResult, AppError> {
    with_device_lock(state, serial, || {
        state
            .runner()
            .shell(serial, command, trace_id)
            .map(|output| command_result(serial, output))
    })
}

/// Runs `command` on every serial. Results come back in the order the serials were given, and
/// a non-zero exit code is a result, not an error.
pub fn run_shell(
    state: &AppState,
    serials: Vec<String>,
    command: String,
    parallel: Option<bool>,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<CommandResult>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let label = (serials.len() == 1).then(|| serials[0].as_str());
    let data = tracked(state, "run_shell", label, &trace_id, || {
        ensure_non_empty(&command, "command", &trace_id)?;
        ensure_all_connected(state, &serials, &trace_id)?;
        let config = state.config();
        let use_parallel = parallel.unwrap_or(config.command.parallel_execution) && serials.len() > 1;

        let results = if use_parallel {
            let command = command.as_str();
            let trace = trace_id.as_str();
            thread::scope(|scope| {
                let handles: Vec<_> = serials
                    .iter()
                    .map(|serial| scope.spawn(move || run_one(state, serial, command, trace)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(AppError::system("Shell command thread panicked", &trace_id))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })?
        } else {
            serials
                .iter()
                .map(|serial| run_one(state, serial, &command, &trace_id))
                .collect::<Result<Vec<_>, _>>()?
        };

        if config.command.auto_save_history {
            let mut store = state.settings();
            let mut preview = store.config();
            if preview.push_history(&command) {
                if let Err(err) = store.update(
                    |cfg| {
                        cfg.push_history(&command);
                    },
                    &trace_id,
                ) {
                    warn!(trace_id = %trace_id, error = %err, "Failed to save command history");
                }
            }
        }
        Ok(results)
    })?;
    Ok(CommandResponse { trace_id, data })
}
