use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::app::adb::parse::parse_uid;
use crate::app::adb::runner::{AdbRunner, CommandOutput};
use crate::app::error::AppError;

const WAIT_FOR_DEVICE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootOutcome {
    AlreadyRoot,
    Restarted,
    Declined,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootStatus {
    pub serial: String,
    pub outcome: RootOutcome,
    pub uid: Option<u32>,
    pub is_root: bool,
    pub message: String,
}

pub fn classify_root_output(output: &str) -> RootOutcome {
    let lower = output.to_lowercase();
    if lower.contains("already running as root") {
        RootOutcome::AlreadyRoot
    } else if lower.contains("cannot run as root") || lower.contains("adbd cannot") {
        RootOutcome::Declined
    } else if lower.contains("restarting adbd as root") {
        RootOutcome::Restarted
    } else {
        RootOutcome::Unknown
    }
}

/// Output markers after which a command is worth retrying with root.
pub fn needs_root_retry(output: &CommandOutput) -> bool {
    let lower = output.combined().to_lowercase();
    ["not found", "permission denied", "not running as root"]
        .iter()
        .any(|marker| lower.contains(marker))
}

pub fn read_uid(runner: &AdbRunner, serial: &str, trace_id: &str) -> Result<Option<u32>, AppError> {
    let output = runner.shell(serial, "id -u", trace_id)?;
    Ok(parse_uid(&output.stdout))
}

/// Runs `adb root`, waits for adbd to come back when it restarted, then checks `id -u`.
pub fn acquire_root(
    runner: &AdbRunner,
    serial: &str,
    root_timeout: Duration,
    trace_id: &str,
) -> Result<RootStatus, AppError> {
    let output = runner.run_with_timeout(Some(serial), &["root"], root_timeout, trace_id)?;
    let message = output.text();
    let outcome = classify_root_output(&output.combined());
    info!(trace_id = %trace_id, serial = %serial, outcome = ?outcome, "adb root finished");

    if outcome == RootOutcome::Declined {
        return Ok(RootStatus {
            serial: serial.to_string(),
            outcome,
            uid: None,
            is_root: false,
            message,
        });
    }

    if outcome != RootOutcome::AlreadyRoot {
        let waited = runner.run_with_timeout(
            Some(serial),
            &["wait-for-device"],
            WAIT_FOR_DEVICE_TIMEOUT,
            trace_id,
        );
        if let Err(err) = waited {
            warn!(trace_id = %trace_id, serial = %serial, error = %err, "device did not return after adb root");
        }
    }

    let uid = read_uid(runner, serial, trace_id)?;
    Ok(RootStatus {
        serial: serial.to_string(),
        outcome,
        uid,
        is_root: uid == Some(0),
        message,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebootMode {
    System,
    Recovery,
    Bootloader,
    Fastboot,
}

impl RebootMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "system" | "normal" => Some(RebootMode::System),
            "recovery" => Some(RebootMode::Recovery),
            "bootloader" => Some(RebootMode::Bootloader),
            "fastboot" => Some(RebootMode::Fastboot),
            _ => None,
        }
    }

    pub fn args(&self) -> Vec<&'static str> {
        match self {
            RebootMode::System => vec!["reboot"],
            RebootMode::Recovery => vec!["reboot", "recovery"],
            RebootMode::Bootloader => vec!["reboot", "bootloader"],
            RebootMode::Fastboot => vec!["reboot", "fastboot"],
        }
    }
}
