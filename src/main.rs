//! `adbtools` command line front end.
//!
//! Every subcommand becomes one dispatcher task. The main thread parses arguments, drains task
//! events, prints progress to stderr and the final text to stdout.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use adbtools_lib::app::adb::logcat::{LogcatBatch, LogcatEmitter};
use adbtools_lib::app::adb::root::RebootMode;
use adbtools_lib::app::commands::{self, InstallOptions};
use adbtools_lib::app::config::SettingsStore;
use adbtools_lib::app::devices::{DeviceRegistry, DeviceWatcher, ONLINE_STATE};
use adbtools_lib::app::dispatcher::{
    pump_until_idle, Dispatcher, TaskContext, TaskEventKind, TaskOutcome, TaskResult,
};
use adbtools_lib::app::error::{AppError, ERR_DEVICE_NOT_FOUND};
use adbtools_lib::app::logging::init_logging;
use adbtools_lib::app::models::{CommandResponse, CommandResult};
use adbtools_lib::app::state::AppState;

const TASK_WAIT_LIMIT: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "adbtools", version, about = "Android Debug Bridge toolbox")]
struct Cli {
    /// Target device. Falls back to ANDROID_SERIAL, then to the only connected device.
    #[arg(long, short = 's', global = true)]
    serial: Option<String>,

    /// Config file instead of ADBTOOLS_CONFIG_PATH or ~/adbtools_config.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    trace_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List connected devices
    Devices {
        /// Include getprop/battery details
        #[arg(long)]
        detailed: bool,
        /// Keep printing the list whenever it changes
        #[arg(long)]
        watch: bool,
        /// Stop watching after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Report whether adb and aapt can be run
    CheckAdb,
    /// Run a shell command
    Shell {
        /// Run on every online device
        #[arg(long)]
        all: bool,
        /// One device at a time even when parallel execution is configured
        #[arg(long)]
        sequential: bool,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Shell command that is retried once after `adb root` when it needs root
    Privileged {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Install an .apk, .apks or .xapk
    Install {
        apk: String,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        no_replace: bool,
        #[arg(long)]
        downgrade: bool,
        #[arg(long)]
        grant: bool,
        #[arg(long)]
        test: bool,
        /// Extra arguments passed to `adb install`
        #[arg(long, allow_hyphen_values = true)]
        extra: Option<String>,
    },
    Uninstall {
        package: String,
        #[arg(long)]
        keep_data: bool,
    },
    /// List installed packages
    Apps {
        /// Include system packages
        #[arg(long)]
        system: bool,
    },
    AppVersion {
        package: String,
    },
    /// Read package metadata from a local APK
    ApkInfo {
        path: String,
    },
    ClearData {
        package: String,
    },
    ForceStop {
        package: String,
    },
    Launch {
        package: String,
    },
    /// Print the focused activity
    Activity,
    /// List a device directory
    Ls {
        #[arg(default_value = "/sdcard")]
        path: String,
    },
    Pull {
        device_path: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Push {
        local_path: PathBuf,
        device_path: String,
    },
    Tap {
        x: i32,
        y: i32,
    },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[arg(long)]
        duration: Option<u64>,
    },
    LongPress {
        x: i32,
        y: i32,
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Send a key event (code, KEYCODE_* name or alias such as `home`)
    Key {
        key: String,
    },
    Text {
        text: String,
    },
    Screenshot {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Stream logcat, or write the current buffer with --dump
    Logcat {
        #[arg(long)]
        dump: Option<PathBuf>,
        #[arg(long, allow_hyphen_values = true)]
        filter: Option<String>,
        /// Stop streaming after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    LogcatClear,
    Root,
    Remount,
    Reboot {
        /// system, recovery, bootloader or fastboot
        #[arg(default_value = "system")]
        mode: String,
        #[arg(long)]
        all: bool,
    },
    /// Open the vendor engineering menu
    Engineering {
        /// mediatek, samsung, xiaomi, huawei or generic
        #[arg(long)]
        vendor: Option<String>,
        /// Only list the entry points that would be tried
        #[arg(long)]
        list: bool,
    },
    UpdateCheck,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
    /// Write a diagnostics zip
    Diagnostics {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Get { key: String },
    /// Value is parsed as JSON when possible, otherwise stored as a string
    Set {
        key: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    Reset,
    Backup,
    Backups,
    Restore { name: String },
}

#[derive(Subcommand, Debug)]
enum LogsAction {
    /// operations, commands or performance
    Recent {
        #[arg(default_value = "operations")]
        kind: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Clear,
}

type Work = Box<dyn FnOnce(&TaskContext) -> TaskResult + Send>;

struct Job {
    label: &'static str,
    serial: Option<String>,
    work: Work,
}

fn trace(ctx: &TaskContext) -> Option<String> {
    Some(ctx.trace_id().to_string())
}

fn render<T: Serialize>(response: CommandResponse<T>) -> TaskResult {
    serde_json::to_string_pretty(&response.data).map_err(|err| {
        AppError::system(format!("Failed to render result: {err}"), &response.trace_id)
    })
}

fn render_shell(results: &[CommandResult]) -> String {
    results
        .iter()
        .map(|result| {
            let exit = result
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "?".to_string());
            let mut block = format!("== {} (exit {exit}) ==\n{}", result.serial, result.stdout);
            if !result.stderr.trim().is_empty() {
                block.push_str(&result.stderr);
            }
            block.trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn target_serial(
    state: &AppState,
    explicit: Option<&str>,
    trace_id: &str,
) -> Result<String, AppError> {
    match explicit {
        Some(serial) => Ok(serial.to_string()),
        None => state.devices().sole_device(trace_id),
    }
}

fn target_serials(
    state: &AppState,
    explicit: Option<&str>,
    all: bool,
    trace_id: &str,
) -> Result<Vec<String>, AppError> {
    if !all {
        return target_serial(state, explicit, trace_id).map(|serial| vec![serial]);
    }
    let online: Vec<String> = state
        .devices()
        .refresh(trace_id)?
        .into_iter()
        .filter(|device| device.state == ONLINE_STATE)
        .map(|device| device.serial)
        .collect();
    if online.is_empty() {
        return Err(AppError::new(ERR_DEVICE_NOT_FOUND, "No device connected", trace_id));
    }
    Ok(online)
}

/// Blocks the worker until `running` turns false, the task is cancelled or `seconds` pass.
fn wait_until_stopped(ctx: &TaskContext, seconds: Option<u64>, running: impl Fn() -> bool) {
    let deadline = seconds.map(|secs| Instant::now() + Duration::from_secs(secs));
    while running()
        && !ctx.is_cancelled()
        && deadline.map_or(true, |deadline| Instant::now() < deadline)
    {
        thread::sleep(POLL_INTERVAL);
    }
}

/// Task without a device of its own. Multi-device operations lock each device internally.
fn job<F>(label: &'static str, state: &Arc<AppState>, work: F) -> Job
where
    F: FnOnce(&AppState, &TaskContext) -> TaskResult + Send + 'static,
{
    let state = Arc::clone(state);
    Job {
        label,
        serial: None,
        work: Box::new(move |ctx| work(&state, ctx)),
    }
}

/// Task bound to one device. An explicit serial also serializes it against other tasks on
/// that device.
fn device_job<F>(label: &'static str, state: &Arc<AppState>, serial: Option<String>, work: F) -> Job
where
    F: FnOnce(&AppState, &str, &TaskContext) -> TaskResult + Send + 'static,
{
    let state = Arc::clone(state);
    Job {
        label,
        serial: serial.clone(),
        work: Box::new(move |ctx| {
            let serial = target_serial(&state, serial.as_deref(), ctx.trace_id())?;
            work(&state, &serial, ctx)
        }),
    }
}

fn watch_devices(state: &AppState, seconds: Option<u64>, ctx: &TaskContext) -> TaskResult {
    let config = state.config();
    let registry = Arc::new(DeviceRegistry::new(
        state.runner().clone(),
        config.device.show_offline_devices,
    ));
    let interval = Duration::from_secs(config.device.refresh_interval.max(1) as u64);
    let last = Mutex::new(None::<Vec<(String, String)>>);
    let watcher = DeviceWatcher::start(
        registry,
        interval,
        ctx.trace_id().to_string(),
        move |devices| {
            let current: Vec<(String, String)> = devices
                .into_iter()
                .map(|device| (device.serial, device.state))
                .collect();
            let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_ref() == Some(&current) {
                return;
            }
            let lines: Vec<String> = current
                .iter()
                .map(|(serial, state)| format!("{serial}\t{state}"))
                .collect();
            let text = if lines.is_empty() {
                "(no devices)".to_string()
            } else {
                lines.join("\n")
            };
            println!("{text}\n");
            *last = Some(current);
        },
    );
    wait_until_stopped(ctx, seconds, || watcher.is_running());
    watcher.stop();
    Ok(String::new())
}

fn stream_logcat(
    state: &AppState,
    serial: &str,
    filter: Option<String>,
    seconds: Option<u64>,
    ctx: &TaskContext,
) -> TaskResult {
    let emitter: LogcatEmitter = Arc::new(|batch: LogcatBatch| {
        for line in batch.lines {
            println!("{line}");
        }
    });
    commands::start_logcat(state, serial, filter, emitter, trace(ctx))?;
    wait_until_stopped(ctx, seconds, || state.logcat().is_alive(serial));
    if state.logcat().is_running(serial) {
        commands::stop_logcat(state, serial, trace(ctx))?;
    }
    Ok(String::new())
}

fn config_job(action: ConfigAction, state: &Arc<AppState>) -> Job {
    match action {
        ConfigAction::Show => job("config-show", state, |state, ctx| {
            render(commands::get_config(state, trace(ctx))?)
        }),
        ConfigAction::Get { key } => job("config-get", state, move |state, ctx| {
            render(commands::get_config_value(state, &key, trace(ctx))?)
        }),
        ConfigAction::Set { key, value } => job("config-set", state, move |state, ctx| {
            render(commands::set_config_value(state, &key, &value, trace(ctx))?)
        }),
        ConfigAction::Reset => job("config-reset", state, |state, ctx| {
            commands::reset_config(state, trace(ctx))?;
            Ok("Configuration reset to defaults".to_string())
        }),
        ConfigAction::Backup => job("config-backup", state, |state, ctx| {
            Ok(commands::backup_config(state, trace(ctx))?.data)
        }),
        ConfigAction::Backups => job("config-backups", state, |state, ctx| {
            Ok(commands::list_config_backups(state, trace(ctx))?.data.join("\n"))
        }),
        ConfigAction::Restore { name } => job("config-restore", state, move |state, ctx| {
            commands::restore_config_backup(state, &name, trace(ctx))?;
            Ok(format!("Restored {name}"))
        }),
    }
}

fn logs_job(action: LogsAction, state: &Arc<AppState>) -> Job {
    match action {
        LogsAction::Recent { kind, limit } => job("logs-recent", state, move |state, ctx| {
            let records = commands::recent_logs(state, &kind, limit, trace(ctx))?.data;
            Ok(records
                .iter()
                .map(|record| record.to_string())
                .collect::<Vec<_>>()
                .join("\n"))
        }),
        LogsAction::Clear => job("logs-clear", state, |state, ctx| {
            let removed = commands::clear_logs(state, trace(ctx))?.data;
            Ok(format!("Removed {removed} log files"))
        }),
    }
}

fn build_job(command: Command, state: &Arc<AppState>, serial: Option<String>) -> Job {
    match command {
        Command::Devices {
            detailed,
            watch,
            seconds,
        } => {
            if watch {
                job("devices-watch", state, move |state, ctx| {
                    watch_devices(state, seconds, ctx)
                })
            } else if detailed {
                job("devices", state, |state, ctx| {
                    render(commands::list_devices_detailed(state, trace(ctx))?)
                })
            } else {
                job("devices", state, |state, ctx| {
                    render(commands::list_devices(state, trace(ctx))?)
                })
            }
        }
        Command::CheckAdb => job("check-adb", state, |state, ctx| {
            render(commands::check_adb(state, trace(ctx))?)
        }),
        Command::Shell {
            all,
            sequential,
            command,
        } => job("shell", state, move |state, ctx| {
            let serials = target_serials(state, serial.as_deref(), all, ctx.trace_id())?;
            let parallel = sequential.then_some(false);
            let response =
                commands::run_shell(state, serials, command.join(" "), parallel, trace(ctx))?;
            Ok(render_shell(&response.data))
        }),
        Command::Privileged { command } => {
            device_job("privileged", state, serial, move |state, serial, ctx| {
                let response =
                    commands::run_privileged(state, serial, &command.join(" "), trace(ctx))?;
                Ok(render_shell(std::slice::from_ref(&response.data)))
            })
        }
        Command::Install {
            apk,
            all,
            no_replace,
            downgrade,
            grant,
            test,
            extra,
        } => job("install", state, move |state, ctx| {
            let mut options = InstallOptions::from_settings(&state.config().apk_install);
            options.replace &= !no_replace;
            options.allow_downgrade |= downgrade;
            options.grant_permissions |= grant;
            options.allow_test_packages |= test;
            if let Some(extra) = extra {
                options.extra_args = extra;
            }
            let serials = target_serials(state, serial.as_deref(), all, ctx.trace_id())?;
            let response = commands::install_apk(
                state,
                serials,
                &apk,
                Some(options),
                |item| {
                    let status = if item.success {
                        "installed".to_string()
                    } else {
                        format!("{} ({})", item.error_code.code(), item.error_message())
                    };
                    ctx.progress(format!("{}: {status}", item.serial));
                },
                trace(ctx),
            )?;
            let installed = response.data.successful_count();
            let total = response.data.results.len();
            let summary = render(response)?;
            Ok(format!("{installed}/{total} installed\n{summary}"))
        }),
        Command::Uninstall { package, keep_data } => {
            device_job("uninstall", state, serial, move |state, serial, ctx| {
                commands::uninstall_app(state, serial, &package, keep_data, trace(ctx))?;
                Ok(format!("Uninstalled {package} from {serial}"))
            })
        }
        Command::Apps { system } => device_job("apps", state, serial, move |state, serial, ctx| {
            let apps = commands::list_apps(state, serial, system, trace(ctx))?.data;
            Ok(apps
                .iter()
                .map(|app| app.package_name.as_str())
                .collect::<Vec<_>>()
                .join("\n"))
        }),
        Command::AppVersion { package } => {
            device_job("app-version", state, serial, move |state, serial, ctx| {
                render(commands::app_version(state, serial, &package, trace(ctx))?)
            })
        }
        Command::ApkInfo { path } => job("apk-info", state, move |state, ctx| {
            render(commands::apk_info(state, &path, trace(ctx))?)
        }),
        Command::ClearData { package } => {
            device_job("clear-data", state, serial, move |state, serial, ctx| {
                commands::clear_app_data(state, serial, &package, trace(ctx))?;
                Ok(format!("Cleared data of {package}"))
            })
        }
        Command::ForceStop { package } => {
            device_job("force-stop", state, serial, move |state, serial, ctx| {
                commands::force_stop_app(state, serial, &package, trace(ctx))?;
                Ok(format!("Stopped {package}"))
            })
        }
        Command::Launch { package } => {
            device_job("launch", state, serial, move |state, serial, ctx| {
                commands::launch_app(state, serial, &package, trace(ctx))?;
                Ok(format!("Launched {package}"))
            })
        }
        Command::Activity => device_job("activity", state, serial, |state, serial, ctx| {
            Ok(commands::current_activity(state, serial, trace(ctx))?
                .data
                .unwrap_or_else(|| "(no focused activity)".to_string()))
        }),
        Command::Ls { path } => device_job("ls", state, serial, move |state, serial, ctx| {
            let entries = commands::list_device_files(state, serial, &path, trace(ctx))?.data;
            Ok(entries
                .iter()
                .map(|entry| {
                    let size = entry.size_bytes.map(|size| size.to_string()).unwrap_or_default();
                    let suffix = if entry.is_dir { "/" } else { "" };
                    format!("{size:>12}  {}{suffix}", entry.name)
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }),
        Command::Pull { device_path, out } => {
            device_job("pull", state, serial, move |state, serial, ctx| {
                Ok(commands::pull_file(
                    state,
                    serial,
                    &device_path,
                    out,
                    |percent| ctx.progress(format!("{percent}%")),
                    trace(ctx),
                )?
                .data)
            })
        }
        Command::Push {
            local_path,
            device_path,
        } => device_job("push", state, serial, move |state, serial, ctx| {
            Ok(commands::push_file(
                state,
                serial,
                &local_path,
                &device_path,
                |percent| ctx.progress(format!("{percent}%")),
                trace(ctx),
            )?
            .data)
        }),
        Command::Tap { x, y } => device_job("tap", state, serial, move |state, serial, ctx| {
            commands::tap(state, serial, x, y, trace(ctx))?;
            Ok(String::new())
        }),
        Command::Swipe {
            x1,
            y1,
            x2,
            y2,
            duration,
        } => device_job("swipe", state, serial, move |state, serial, ctx| {
            commands::swipe(state, serial, (x1, y1), (x2, y2), duration, trace(ctx))?;
            Ok(String::new())
        }),
        Command::LongPress { x, y, duration } => {
            device_job("long-press", state, serial, move |state, serial, ctx| {
                commands::long_press(state, serial, x, y, duration, trace(ctx))?;
                Ok(String::new())
            })
        }
        Command::Key { key } => device_job("key", state, serial, move |state, serial, ctx| {
            commands::key_event(state, serial, &key, trace(ctx))?;
            Ok(String::new())
        }),
        Command::Text { text } => device_job("text", state, serial, move |state, serial, ctx| {
            commands::input_text(state, serial, &text, trace(ctx))?;
            Ok(String::new())
        }),
        Command::Screenshot { out } => {
            device_job("screenshot", state, serial, move |state, serial, ctx| {
                Ok(commands::screenshot(state, serial, out, trace(ctx))?.data)
            })
        }
        Command::Logcat {
            dump,
            filter,
            seconds,
        } => device_job("logcat", state, serial, move |state, serial, ctx| match dump {
            Some(output) => {
                Ok(commands::dump_logcat(state, serial, Some(output), filter, trace(ctx))?.data)
            }
            None => stream_logcat(state, serial, filter, seconds, ctx),
        }),
        Command::LogcatClear => device_job("logcat-clear", state, serial, |state, serial, ctx| {
            commands::clear_logcat(state, serial, trace(ctx))?;
            Ok("Log buffer cleared".to_string())
        }),
        Command::Root => device_job("root", state, serial, |state, serial, ctx| {
            render(commands::acquire_root(state, serial, trace(ctx))?)
        }),
        Command::Remount => device_job("remount", state, serial, |state, serial, ctx| {
            let response = commands::remount(state, serial, trace(ctx))?;
            Ok(response.data.stdout.trim().to_string())
        }),
        Command::Reboot { mode, all } => job("reboot", state, move |state, ctx| {
            let mode = RebootMode::parse(&mode).ok_or_else(|| {
                AppError::validation(format!("Unknown reboot mode: {mode}"), ctx.trace_id())
            })?;
            let serials = target_serials(state, serial.as_deref(), all, ctx.trace_id())?;
            let response = commands::reboot(state, serials, mode, trace(ctx))?;
            Ok(render_shell(&response.data))
        }),
        Command::Engineering { vendor, list } => {
            device_job("engineering", state, serial, move |state, serial, ctx| {
                if list {
                    render(commands::engineering_modes(
                        state,
                        serial,
                        vendor.as_deref(),
                        trace(ctx),
                    )?)
                } else {
                    render(commands::enter_engineering_mode(
                        state,
                        serial,
                        vendor.as_deref(),
                        trace(ctx),
                    )?)
                }
            })
        }
        Command::UpdateCheck => job("update-check", state, |state, ctx| {
            render(commands::check_for_update(
                state,
                env!("CARGO_PKG_VERSION"),
                trace(ctx),
            )?)
        }),
        Command::Config { action } => config_job(action, state),
        Command::Logs { action } => logs_job(action, state),
        Command::Diagnostics { out } => job("diagnostics", state, move |state, ctx| {
            Ok(commands::export_diagnostics(state, out, trace(ctx))?.data)
        }),
    }
}

/// Background check at startup. Only an available update produces text.
fn startup_update_job(state: &Arc<AppState>) -> Job {
    job("startup-update-check", state, |state, ctx| {
        let check = commands::check_for_update(state, env!("CARGO_PKG_VERSION"), trace(ctx))?.data;
        Ok(if check.update_available {
            format!(
                "Update available: {} -> {}",
                check.current_version, check.latest_version
            )
        } else {
            String::new()
        })
    })
}

fn open_store(path: Option<&Path>, trace_id: &str) -> Result<SettingsStore, AppError> {
    match path {
        Some(path) => SettingsStore::open(path, trace_id),
        None => SettingsStore::open_default(trace_id),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let trace_id = commands::resolve_trace_id(cli.trace_id.clone());
    let store = match open_store(cli.config.as_deref(), &trace_id) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("error: {}", err.user_message());
            return ExitCode::FAILURE;
        }
    };
    let config = store.config();
    init_logging(&config.logging, Some(config.logging.resolved_log_dir()));
    match store.maybe_backup(&trace_id) {
        Ok(Some(path)) => info!(trace_id = %trace_id, path = %path.display(), "config backed up"),
        Ok(None) => {}
        Err(err) => warn!(trace_id = %trace_id, error = %err, "config backup failed"),
    }

    let workers = thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
        .max(2);
    let (dispatcher, events) = Dispatcher::new(workers);
    let state = Arc::new(AppState::new(store, Arc::clone(dispatcher.scheduler())));
    let serial = cli
        .serial
        .or_else(|| std::env::var("ANDROID_SERIAL").ok())
        .filter(|value| !value.trim().is_empty());

    let startup_check = (config.update.check_on_startup
        && !config.update.manifest_url.trim().is_empty()
        && !matches!(cli.command, Command::UpdateCheck))
    .then(|| {
        let job = startup_update_job(&state);
        dispatcher.spawn(job.label, job.serial, job.work)
    });

    let job = build_job(cli.command, &state, serial);
    let handle = dispatcher.spawn_traced(job.label, job.serial, Some(trace_id), job.work);
    let main_task = handle.id;
    let main_trace = handle.trace_id.clone();
    let interrupt = handle.cancel_flag();
    // First Ctrl-C asks the main task to wind down, a second one exits right away.
    if let Err(err) = ctrlc::set_handler(move || {
        if interrupt.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
    }) {
        warn!(trace_id = %main_trace, error = %err, "failed to install Ctrl-C handler");
    }
    let expected = 1 + usize::from(startup_check.is_some());

    let finished = pump_until_idle(&events, expected, TASK_WAIT_LIMIT, |event| {
        if event.task_id != main_task {
            return;
        }
        match event.kind {
            TaskEventKind::Progress(message) => eprintln!("{message}"),
            TaskEventKind::Finished(TaskOutcome::Err(err)) => {
                warn!(trace_id = %event.trace_id, error = %err, "{} failed", event.label)
            }
            TaskEventKind::Started | TaskEventKind::Finished(TaskOutcome::Ok(_)) => {}
        }
    });
    if finished < expected {
        handle.cancel();
    }

    let result = handle.wait();
    if let Some(check) = startup_check {
        match check.wait() {
            Ok(text) if !text.is_empty() => eprintln!("{text}"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "startup update check failed"),
        }
    }
    state.logcat().stop_all(&main_trace);

    let device_missing = matches!(&result, Err(err) if err.is_code(ERR_DEVICE_NOT_FOUND));
    let failed = result.is_err();
    let text = TaskOutcome::from(result).display_text();
    if failed {
        eprintln!("error: {text}");
        if device_missing {
            eprintln!("hint: `adbtools devices` lists the connected devices");
        }
        return ExitCode::FAILURE;
    }
    if !text.is_empty() {
        println!("{text}");
    }
    ExitCode::SUCCESS
}

