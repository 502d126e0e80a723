use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app::adb::aapt::parse_badging;
use crate::app::adb::apk::{
    apply_badging, extract_split_apks, get_apk_info, is_split_bundle, normalize_apk_path,
    SplitApkBundle,
};
use crate::app::adb::apps::{
    build_app_version, is_valid_package_name, package_entry_to_app_info, parse_current_activity,
    parse_pm_list_packages_output,
};
use crate::app::adb::runner::AdbRunner;
use crate::app::config::ApkInstallSettings;
use crate::app::error::AppError;
use crate::app::models::{
    ApkBatchInstallResult, ApkInfo, ApkInstallErrorCode, ApkInstallResult, AppInfo, AppVersion,
    CommandResponse, CommandResult,
};
use crate::app::state::AppState;

use super::{
    command_result, connected, ensure_all_connected, ensure_non_empty, require_success,
    resolve_trace_id, tracked, with_device_lock,
};

const MIN_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallOptions {
    pub replace: bool,
    pub allow_downgrade: bool,
    pub grant_permissions: bool,
    pub allow_test_packages: bool,
    pub extra_args: String,
}

impl InstallOptions {
    pub fn from_settings(settings: &ApkInstallSettings) -> Self {
        Self {
            replace: settings.replace_existing,
            allow_downgrade: settings.allow_downgrade,
            grant_permissions: settings.grant_permissions,
            allow_test_packages: settings.allow_test_packages,
            extra_args: settings.extra_args.clone(),
        }
    }

    pub fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        for (enabled, flag) in [
            (self.replace, "-r"),
            (self.allow_downgrade, "-d"),
            (self.grant_permissions, "-g"),
            (self.allow_test_packages, "-t"),
        ] {
            if enabled {
                flags.push(flag.to_string());
            }
        }
        flags.extend(self.extra_args.split_whitespace().map(str::to_string));
        flags
    }
}

fn validate_package(package: &str, trace_id: &str) -> Result<(), AppError> {
    ensure_non_empty(package, "package", trace_id)?;
    if !is_valid_package_name(package) {
        return Err(AppError::validation(
            format!("Invalid package name: {package}"),
            trace_id,
        ));
    }
    Ok(())
}

/// Fills package metadata from `aapt dump badging`. aapt is optional, so failures only warn.
fn enrich_with_badging(runner: &AdbRunner, info: &mut ApkInfo, apk: &str, trace_id: &str) {
    match runner.aapt(&["dump", "badging", apk], trace_id) {
        Ok(output) if output.success() => apply_badging(info, parse_badging(&output.stdout)),
        Ok(output) => {
            warn!(trace_id = %trace_id, error = %output.text().trim(), "aapt dump badging failed")
        }
        Err(err) => warn!(trace_id = %trace_id, error = %err, "aapt unavailable"),
    }
}

fn inspect_apk(
    runner: &AdbRunner,
    path: &str,
    trace_id: &str,
) -> Result<(ApkInfo, Option<SplitApkBundle>), AppError> {
    let mut info = get_apk_info(path);
    if info.error.is_some() {
        return Ok((info, None));
    }
    if !info.is_split_apk {
        enrich_with_badging(runner, &mut info, path, trace_id);
        return Ok((info, None));
    }
    let bundle = extract_split_apks(path).map_err(|err| AppError::dependency(err, trace_id))?;
    if let Some(base) = bundle.base_apk() {
        enrich_with_badging(runner, &mut info, base, trace_id);
    }
    Ok((info, Some(bundle)))
}

pub fn apk_info(
    state: &AppState,
    path: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<ApkInfo>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "apk_info", None, &trace_id, || {
        ensure_non_empty(path, "apk_path", &trace_id)?;
        let normalized = normalize_apk_path(path).to_string_lossy().to_string();
        inspect_apk(state.runner(), &normalized, &trace_id).map(|(info, _)| info)
    })?;
    Ok(CommandResponse { trace_id, data })
}

fn failed_result(serial: &str, code: ApkInstallErrorCode, raw_output: String) -> ApkInstallResult {
    ApkInstallResult {
        serial: serial.to_string(),
        success: false,
        error_code: code,
        raw_output,
        duration_seconds: 0.0,
        device_model: None,
    }
}

fn install_on_device(
    state: &AppState,
    serial: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> ApkInstallResult {
    let started = Instant::now();
    let device_model = state
        .devices()
        .snapshot()
        .into_iter()
        .find(|device| device.serial == serial)
        .and_then(|device| device.model);
    let output = with_device_lock(state, serial, || {
        state
            .runner()
            .run_with_timeout(Some(serial), args, timeout, trace_id)
    });
    let (success, error_code, raw_output) = match output {
        Ok(output) => {
            let combined = output.combined();
            let code = ApkInstallErrorCode::from_output(&combined);
            if output.success() && code == ApkInstallErrorCode::Success {
                (true, code, combined)
            } else if code == ApkInstallErrorCode::Success {
                (false, ApkInstallErrorCode::UnknownError, combined)
            } else {
                (false, code, combined)
            }
        }
        Err(err) => (false, ApkInstallErrorCode::UnknownError, err.to_string()),
    };
    ApkInstallResult {
        serial: serial.to_string(),
        success,
        error_code,
        raw_output,
        duration_seconds: started.elapsed().as_secs_f64(),
        device_model,
    }
}

/// Installs an APK, or an `.apks`/`.xapk` bundle through `install-multiple`, on every serial.
/// Per-device failures are reported in the result map; `on_result` sees each one as it lands.
pub fn install_apk<F>(
    state: &AppState,
    serials: Vec<String>,
    apk_path: &str,
    options: Option<InstallOptions>,
    on_result: F,
    trace_id: Option<String>,
) -> Result<CommandResponse<ApkBatchInstallResult>, AppError>
where
    F: Fn(&ApkInstallResult) + Sync,
{
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "install_apk", None, &trace_id, || {
        ensure_non_empty(apk_path, "apk_path", &trace_id)?;
        ensure_all_connected(state, &serials, &trace_id)?;
        let config = state.config();
        let options =
            options.unwrap_or_else(|| InstallOptions::from_settings(&config.apk_install));
        let apk_path = normalize_apk_path(apk_path).to_string_lossy().to_string();
        let started = Instant::now();

        let (info, bundle) = inspect_apk(state.runner(), &apk_path, &trace_id)?;
        let mut result = ApkBatchInstallResult {
            apk_path: apk_path.clone(),
            apk_info: Some(info.clone()),
            results: HashMap::new(),
            total_duration_seconds: 0.0,
        };
        if let Some(error) = info.error.clone() {
            for serial in &serials {
                let item =
                    failed_result(serial, ApkInstallErrorCode::InstallFailedInvalidApk, error.clone());
                on_result(&item);
                result.results.insert(serial.clone(), item);
            }
            result.total_duration_seconds = started.elapsed().as_secs_f64();
            return Ok(result);
        }

        let mut args = vec![if bundle.is_some() { "install-multiple" } else { "install" }.to_string()];
        args.extend(options.flags());
        match &bundle {
            Some(bundle) => args.extend(bundle.apk_paths.iter().cloned()),
            None => args.push(apk_path.clone()),
        }
        let timeout = config.command_timeout().max(MIN_INSTALL_TIMEOUT);

        let items: Vec<ApkInstallResult> = if config.command.parallel_execution && serials.len() > 1 {
            let (args, trace, on_result) = (&args, trace_id.as_str(), &on_result);
            thread::scope(|scope| {
                let handles: Vec<_> = serials
                    .iter()
                    .map(|serial| {
                        scope.spawn(move || {
                            let item = install_on_device(state, serial, args, timeout, trace);
                            on_result(&item);
                            item
                        })
                    })
                    .collect();
                serials
                    .iter()
                    .zip(handles)
                    .map(|(serial, handle)| {
                        handle.join().unwrap_or_else(|_| {
                            failed_result(
                                serial,
                                ApkInstallErrorCode::UnknownError,
                                "Install thread panicked".to_string(),
                            )
                        })
                    })
                    .collect()
            })
        } else {
            serials
                .iter()
                .map(|serial| {
                    let item = install_on_device(state, serial, &args, timeout, &trace_id);
                    on_result(&item);
                    item
                })
                .collect()
        };
        drop(bundle);

        for item in items {
            result.results.insert(item.serial.clone(), item);
        }
        result.total_duration_seconds = started.elapsed().as_secs_f64();
        Ok(result)
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn uninstall_app(
    state: &AppState,
    serial: &str,
    package: &str,
    keep_data: bool,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "uninstall_app", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        validate_package(package, &trace_id)?;
        let mut args = vec!["uninstall"];
        if keep_data {
            args.push("-k");
        }
        args.push(package.trim());
        let output = state.runner().run(Some(serial), &args, &trace_id)?;
        if !output.contains_ignore_case("success") {
            return Err(AppError::dependency(
                format!("Uninstall failed: {}", output.text().trim()),
                &trace_id,
            ));
        }
        Ok(command_result(serial, output))
    })?;
    Ok(CommandResponse { trace_id, data })
}

/// Packages from `pm list packages -f`, sorted by name. Third-party only unless
/// `include_system` is set.
pub fn list_apps(
    state: &AppState,
    serial: &str,
    include_system: bool,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<AppInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "list_apps", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        let command = if include_system {
            "pm list packages -f"
        } else {
            "pm list packages -f -3"
        };
        let output = require_success(
            state.runner().shell(serial, command, &trace_id)?,
            "pm list packages",
            &trace_id,
        )?;
        let mut apps: Vec<AppInfo> = parse_pm_list_packages_output(&output.stdout)
            .into_iter()
            .map(package_entry_to_app_info)
            .collect();
        apps.sort_by(|a, b| a.package_name.cmp(&b.package_name));
        Ok(apps)
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn app_version(
    state: &AppState,
    serial: &str,
    package: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppVersion>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "app_version", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        validate_package(package, &trace_id)?;
        let output = state.runner().shell(
            serial,
            &format!("dumpsys package {}", package.trim()),
            &trace_id,
        )?;
        build_app_version(package.trim(), &output.stdout).ok_or_else(|| {
            AppError::validation(format!("Package not installed: {package}"), &trace_id)
        })
    })?;
    Ok(CommandResponse { trace_id, data })
}

fn package_shell(
    state: &AppState,
    operation: &str,
    serial: &str,
    package: &str,
    command: String,
    expect_success_text: bool,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, operation, Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        validate_package(package, &trace_id)?;
        let output = require_success(
            state.runner().shell(serial, &command, &trace_id)?,
            operation,
            &trace_id,
        )?;
        if expect_success_text && !output.contains_ignore_case("success") {
            return Err(AppError::dependency(
                format!("{operation} failed: {}", output.text().trim()),
                &trace_id,
            ));
        }
        Ok(command_result(serial, output))
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn clear_app_data(
    state: &AppState,
    serial: &str,
    package: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    let command = format!("pm clear {}", package.trim());
    package_shell(state, "clear_app_data", serial, package, command, true, trace_id)
}

pub fn force_stop_app(
    state: &AppState,
    serial: &str,
    package: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    let command = format!("am force-stop {}", package.trim());
    package_shell(state, "force_stop_app", serial, package, command, false, trace_id)
}

/// Starts the launcher activity through `monkey`, which resolves it without knowing its name.
pub fn launch_app(
    state: &AppState,
    serial: &str,
    package: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "launch_app", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        validate_package(package, &trace_id)?;
        let command = format!(
            "monkey -p {} -c android.intent.category.LAUNCHER 1",
            package.trim()
        );
        let output = state.runner().shell(serial, &command, &trace_id)?;
        if output.contains_ignore_case("no activities found")
            || output.contains_ignore_case("monkey aborted")
        {
            return Err(AppError::dependency(
                format!("No launchable activity for {package}"),
                &trace_id,
            ));
        }
        Ok(command_result(serial, require_success(output, "launch_app", &trace_id)?))
    })?;
    Ok(CommandResponse { trace_id, data })
}

pub fn current_activity(
    state: &AppState,
    serial: &str,
    trace_id: Option<String>,
) -> Result<CommandResponse<Option<String>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let data = tracked(state, "current_activity", Some(serial), &trace_id, || {
        connected(state, serial, &trace_id)?;
        let output = require_success(
            state.runner().shell(serial, "dumpsys window", &trace_id)?,
            "dumpsys window",
            &trace_id,
        )?;
        Ok(parse_current_activity(&output.stdout))
    })?;
    Ok(CommandResponse { trace_id, data })
}
