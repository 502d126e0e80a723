use super::*;
use crate::app::error::{ERR_DEPENDENCY, ERR_DEVICE_NOT_FOUND, ERR_VALIDATION};

#[test]
fn resolve_trace_id_keeps_input() {
    assert_eq!(resolve_trace_id(Some("abc".to_string())), "abc");
}

#[test]
fn resolve_trace_id_generates_for_blank_input() {
    let generated = resolve_trace_id(Some("   ".to_string()));
    assert!(uuid::Uuid::parse_str(&generated).is_ok());
    assert_ne!(resolve_trace_id(None), resolve_trace_id(None));
}

#[test]
fn ensure_non_empty_rejects_blank() {
    let err = ensure_non_empty("  ", "serial", "trace").expect_err("blank");
    assert_eq!(err.code, ERR_VALIDATION);
    assert_eq!(err.trace_id, "trace");
    assert!(err.error.contains("serial"));
    assert!(ensure_non_empty("AAA", "serial", "trace").is_ok());
}

#[cfg(unix)]
mod with_fake_adb {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    use serde_json::{json, Value};
    use tempfile::TempDir;

    use crate::app::adb::logcat::{LogcatBatch, LogcatEmitter};
    use crate::app::adb::root::{RebootMode, RootOutcome};
    use crate::app::config::SettingsStore;
    use crate::app::log_sink::LogSink;
    use crate::app::models::ApkInstallErrorCode;
    use crate::app::scheduler::TaskScheduler;

    const FAKE_ADB: &str = r##"#!/bin/sh
DIR=$(dirname "$0")
echo "$*" >> "$DIR/calls.log"
SERIAL=""
if [ "$1" = "-s" ]; then SERIAL="$2"; shift 2; fi
case "$1" in
  version) echo 'Android Debug Bridge version 1.0.41' ;;
  devices) printf 'List of devices attached\nAAA device model:Pixel_7\nBBB device model:Galaxy\nCCC offline\n' ;;
  root)
    if [ -f "$DIR/rooted" ]; then echo 'adbd is already running as root'
    else touch "$DIR/rooted"; echo 'restarting adbd as root'; fi ;;
  wait-for-device) exit 0 ;;
  install|install-multiple) echo 'Performing Streamed Install'; echo 'Success' ;;
  uninstall) echo 'Success' ;;
  reboot) exit 0 ;;
  exec-out)
    if [ -f "$DIR/no_exec_out" ]; then echo 'screencap: not supported'
    else printf '\211PNG\r\n\032\nfake'; fi ;;
  pull)
    if [ "$2" = "-p" ]; then echo 'adb: unknown option -p' >&2; exit 1; fi
    if [ -f "$DIR/pull_fails" ]; then echo "adb: error: failed to stat remote object '$2'" >&2; exit 1; fi
    if [ -d "$3" ]; then echo pulled > "$3/$(basename "$2")"
    else printf '\211PNG\r\n\032\npulled' > "$3"; fi
    echo "$2: 1 file pulled" ;;
  push)
    if [ "$2" = "-p" ]; then echo "[ 50%] $4"; echo "[100%] $4"; fi
    echo '1 file pushed' ;;
  logcat)
    if [ "$2" = "-c" ]; then exit 0; fi
    if [ "$2" = "-d" ]; then echo 'I/Tag: first'; echo 'I/Tag: second'; exit 0; fi
    echo 'I/Stream: one'; echo 'I/Stream: two'; exec sleep 5 ;;
  shell)
    shift
    case "$*" in
      'id -u') if [ -f "$DIR/rooted" ]; then echo 0; else echo 2000; fi ;;
      'cat /data/secret')
        if [ -f "$DIR/rooted" ]; then echo secret
        else echo 'cat: /data/secret: Permission denied' >&2; exit 1; fi ;;
      'echo serial') echo "$SERIAL" ;;
      'false') exit 3 ;;
      'getprop') echo '[ro.product.manufacturer]: [samsung]'; echo '[ro.product.model]: [Galaxy]' ;;
      'pm list packages -f -3')
        echo 'package:/data/app/com.example.b-1/base.apk=com.example.b'
        echo 'package:/data/app/com.example.a-1/base.apk=com.example.a' ;;
      'dumpsys package com.example.a')
        echo '    versionCode=42 minSdk=24 targetSdk=34'; echo '    versionName=1.2.3' ;;
      'dumpsys package '*) echo 'Unable to find package' ;;
      'pm clear com.example.a') echo 'Success' ;;
      'pm clear '*) echo 'Failed' ;;
      *0011*) echo 'Error: broadcast rejected' ;;
      'am broadcast '*) echo 'Broadcast completed: result=0' ;;
      'input '*) exit 0 ;;
      'screencap -p /sdcard/'*) exit 0 ;;
      'rm -f /sdcard/'*) exit 0 ;;
      "ls -la '/sdcard'")
        echo 'total 8'
        echo 'drwxrwx--x 2 root sdcard_rw 4096 2024-01-01 12:00 Download'
        echo '-rw-rw---- 1 root sdcard_rw 12 2024-01-02 08:30 notes.txt' ;;
      *) echo "$*: not found" >&2; exit 127 ;;
    esac ;;
  *) echo "unsupported: $1" >&2; exit 1 ;;
esac
"##;

    struct Fixture {
        dir: TempDir,
        state: AppState,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().expect("tmp");
            let adb = dir.path().join("adb");
            fs::write(&adb, FAKE_ADB).expect("write adb");
            fs::set_permissions(&adb, fs::Permissions::from_mode(0o755)).expect("chmod");

            let mut store = SettingsStore::open(dir.path().join("adbtools_config.json"), "t")
                .expect("store");
            store
                .set("adb.command_path", json!(adb.to_string_lossy()), "t")
                .expect("adb path");
            store
                .set(
                    "adb.aapt_path",
                    json!(dir.path().join("missing-aapt").to_string_lossy()),
                    "t",
                )
                .expect("aapt path");
            store
                .set("output_path", json!(dir.path().join("out").to_string_lossy()), "t")
                .expect("output path");
            let sink = Arc::new(LogSink::new(dir.path().join("logs"), 1_000_000, 3));
            let state = AppState::with_sink(store, sink, Arc::new(TaskScheduler::new(4)));
            Self { dir, state }
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn calls(&self) -> Vec<String> {
            fs::read_to_string(self.path().join("calls.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    fn serials(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn write_apk(dir: &Path) -> PathBuf {
        let path = dir.join("app.apk");
        let file = fs::File::create(&path).expect("create apk");
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("AndroidManifest.xml", zip::write::FileOptions::<()>::default())
            .expect("entry");
        writer.write_all(b"manifest").expect("write entry");
        writer.finish().expect("finish");
        path
    }

    #[test]
    fn check_adb_reports_missing_aapt_without_failing() {
        let fx = Fixture::new();
        let info = check_adb(&fx.state, None).expect("check").data;
        assert!(info.available);
        assert!(!info.aapt_available);
        assert!(info.version_output.contains("Android Debug Bridge"));
    }

    #[test]
    fn list_devices_hides_offline_by_default() {
        let fx = Fixture::new();
        let devices = list_devices(&fx.state, Some("t1".to_string())).expect("list");
        assert_eq!(devices.trace_id, "t1");
        let found: Vec<_> = devices.data.iter().map(|d| d.serial.as_str()).collect();
        assert_eq!(found, vec!["AAA", "BBB"]);
        assert_eq!(devices.data[0].model.as_deref(), Some("Pixel_7"));
    }

    #[test]
    fn operations_reject_unknown_and_offline_devices() {
        let fx = Fixture::new();
        let err = tap(&fx.state, "ZZZ", 1, 2, None).expect_err("unknown");
        assert_eq!(err.code, ERR_DEVICE_NOT_FOUND);
        let err = tap(&fx.state, "CCC", 1, 2, None).expect_err("offline");
        assert_eq!(err.code, ERR_DEVICE_NOT_FOUND);
        assert!(err.error.contains("offline"));
        let err = tap(&fx.state, " ", 1, 2, None).expect_err("blank");
        assert_eq!(err.code, ERR_VALIDATION);
    }

    #[test]
    fn run_shell_keeps_serial_order_and_saves_history() {
        let fx = Fixture::new();
        let response = run_shell(
            &fx.state,
            serials(&["BBB", "AAA"]),
            "echo serial".to_string(),
            Some(true),
            None,
        )
        .expect("shell");
        let outputs: Vec<_> = response
            .data
            .iter()
            .map(|result| (result.serial.as_str(), result.stdout.trim()))
            .collect();
        assert_eq!(outputs, vec![("BBB", "BBB"), ("AAA", "AAA")]);

        run_shell(&fx.state, serials(&["AAA"]), "echo serial".to_string(), None, None)
            .expect("repeat");
        assert_eq!(fx.state.config().command_history, vec!["echo serial"]);
    }

    #[test]
    fn run_shell_reports_failed_exit_as_result() {
        let fx = Fixture::new();
        let response = run_shell(&fx.state, serials(&["AAA"]), "false".to_string(), None, None)
            .expect("shell");
        assert_eq!(response.data[0].exit_code, Some(3));

        let err = run_shell(&fx.state, Vec::new(), "id".to_string(), None, None)
            .expect_err("no serials");
        assert_eq!(err.code, ERR_VALIDATION);
        let err = run_shell(&fx.state, serials(&["AAA"]), " ".to_string(), None, None)
            .expect_err("no command");
        assert_eq!(err.code, ERR_VALIDATION);
    }

    #[test]
    fn install_reports_invalid_apk_per_device() {
        let fx = Fixture::new();
        let missing = fx.path().join("missing.apk");
        let response = install_apk(
            &fx.state,
            serials(&["AAA", "BBB"]),
            &missing.to_string_lossy(),
            None,
            |_| {},
            None,
        )
        .expect("install");
        assert_eq!(response.data.results.len(), 2);
        for result in response.data.results.values() {
            assert!(!result.success);
            assert_eq!(result.error_code, ApkInstallErrorCode::InstallFailedInvalidApk);
        }
        assert!(!fx.calls().iter().any(|call| call.contains(" install ")));
    }

    #[test]
    fn install_runs_on_every_device_and_reports_each() {
        let fx = Fixture::new();
        let apk = write_apk(fx.path());
        let seen = Mutex::new(Vec::new());
        let options = InstallOptions {
            replace: true,
            allow_downgrade: false,
            grant_permissions: true,
            allow_test_packages: false,
            extra_args: String::new(),
        };
        let response = install_apk(
            &fx.state,
            serials(&["AAA", "BBB"]),
            &apk.to_string_lossy(),
            Some(options),
            |item| seen.lock().expect("seen").push(item.serial.clone()),
            None,
        )
        .expect("install");

        let results = &response.data.results;
        assert!(results.values().all(|result| result.success));
        assert_eq!(results["AAA"].device_model.as_deref(), Some("Pixel_7"));
        let mut seen = seen.into_inner().expect("seen");
        seen.sort();
        assert_eq!(seen, vec!["AAA", "BBB"]);
        assert!(fx
            .calls()
            .iter()
            .any(|call| call.starts_with("-s AAA install -r -g ")));
    }

    #[test]
    fn uninstall_validates_package_name() {
        let fx = Fixture::new();
        let err = uninstall_app(&fx.state, "AAA", "not a package", false, None)
            .expect_err("invalid");
        assert_eq!(err.code, ERR_VALIDATION);

        uninstall_app(&fx.state, "AAA", "com.example.a", true, None).expect("uninstall");
        assert!(fx
            .calls()
            .contains(&"-s AAA uninstall -k com.example.a".to_string()));
    }

    #[test]
    fn list_apps_sorts_third_party_packages() {
        let fx = Fixture::new();
        let apps = list_apps(&fx.state, "AAA", false, None).expect("apps").data;
        let names: Vec<_> = apps.iter().map(|app| app.package_name.as_str()).collect();
        assert_eq!(names, vec!["com.example.a", "com.example.b"]);
        assert!(apps.iter().all(|app| !app.is_system));
    }

    #[test]
    fn app_version_reads_dumpsys() {
        let fx = Fixture::new();
        let version = app_version(&fx.state, "AAA", "com.example.a", None)
            .expect("version")
            .data;
        assert_eq!(version.version_name.as_deref(), Some("1.2.3"));
        assert_eq!(version.version_code.as_deref(), Some("42"));

        let err = app_version(&fx.state, "AAA", "com.example.missing", None).expect_err("missing");
        assert_eq!(err.code, ERR_VALIDATION);
    }

    #[test]
    fn clear_app_data_requires_success_output() {
        let fx = Fixture::new();
        clear_app_data(&fx.state, "AAA", "com.example.a", None).expect("clear");
        let err = clear_app_data(&fx.state, "AAA", "com.example.b", None).expect_err("failed");
        assert_eq!(err.code, ERR_DEPENDENCY);
    }

    #[test]
    fn input_validates_coordinates_before_running() {
        let fx = Fixture::new();
        let err = tap(&fx.state, "AAA", -1, 5, None).expect_err("negative");
        assert_eq!(err.code, ERR_VALIDATION);
        assert!(!fx.calls().iter().any(|call| call.contains("input")));

        tap(&fx.state, "AAA", 10, 20, None).expect("tap");
        swipe(&fx.state, "AAA", (0, 0), (0, 100), Some(300), None).expect("swipe");
        key_event(&fx.state, "AAA", "home", None).expect("key");
        let calls = fx.calls();
        assert!(calls.contains(&"-s AAA shell input tap 10 20".to_string()));
        assert!(calls.contains(&"-s AAA shell input swipe 0 0 0 100 300".to_string()));
    }

    #[test]
    fn list_device_files_parses_listing() {
        let fx = Fixture::new();
        let entries = list_device_files(&fx.state, "AAA", "/sdcard", None)
            .expect("ls")
            .data;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].path, "/sdcard/notes.txt");
        assert_eq!(entries[1].size_bytes, Some(12));
    }

    #[test]
    fn pull_retries_without_progress_flag() {
        let fx = Fixture::new();
        let out = fx.path().join("pulled");
        let local = pull_file(&fx.state, "AAA", "/sdcard/notes.txt", Some(out.clone()), |_| {}, None)
            .expect("pull")
            .data;
        assert_eq!(PathBuf::from(&local), out.join("notes.txt"));
        assert_eq!(fs::read_to_string(&local).expect("read").trim(), "pulled");
        let pulls: Vec<_> = fx.calls().into_iter().filter(|c| c.contains(" pull ")).collect();
        assert_eq!(pulls.len(), 2);
    }

    #[test]
    fn push_reports_progress_and_appends_file_name() {
        let fx = Fixture::new();
        let local = fx.path().join("upload.txt");
        fs::write(&local, "data").expect("write");
        let mut progress = Vec::new();
        let target = push_file(&fx.state, "AAA", &local, "/sdcard/", |pct| progress.push(pct), None)
            .expect("push")
            .data;
        assert_eq!(target, "/sdcard/upload.txt");
        assert_eq!(progress.last(), Some(&100));

        let err = push_file(&fx.state, "AAA", &fx.path().join("nope"), "/sdcard/", |_| {}, None)
            .expect_err("missing local");
        assert_eq!(err.code, ERR_VALIDATION);
    }

    #[test]
    fn screenshot_writes_png_from_exec_out() {
        let fx = Fixture::new();
        let path = screenshot(&fx.state, "AAA", None, None).expect("screenshot").data;
        assert!(path.starts_with(&*fx.path().join("out").to_string_lossy()));
        let bytes = fs::read(&path).expect("read png");
        assert!(bytes.starts_with(b"\x89PNG"));
    }

    fn device_calls(fx: &Fixture, serial: &str) -> Vec<String> {
        let prefix = format!("-s {serial} ");
        fx.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    #[test]
    fn screenshot_falls_back_to_device_file_when_exec_out_is_not_png() {
        let fx = Fixture::new();
        fs::write(fx.path().join("no_exec_out"), "").expect("flag");
        let path = screenshot(&fx.state, "AAA", None, None).expect("screenshot").data;
        let bytes = fs::read(&path).expect("read png");
        assert!(bytes.starts_with(b"\x89PNG"));

        let calls = device_calls(&fx, "AAA");
        assert_eq!(calls.len(), 4, "{calls:?}");
        assert_eq!(calls[0], "exec-out screencap -p");
        assert!(calls[1].starts_with("shell screencap -p /sdcard/"));
        assert!(calls[2].starts_with("pull /sdcard/"));
        assert!(calls[2].ends_with(&path));
        assert!(calls[3].starts_with("shell rm -f /sdcard/"));
        let remote = calls[1].trim_start_matches("shell screencap -p ");
        assert_eq!(calls[3], format!("shell rm -f {remote}"));
    }

    #[test]
    fn failed_fallback_pull_still_removes_device_file() {
        let fx = Fixture::new();
        fs::write(fx.path().join("no_exec_out"), "").expect("flag");
        fs::write(fx.path().join("pull_fails"), "").expect("flag");
        let err = screenshot(&fx.state, "AAA", None, None).expect_err("pull fails");
        assert_eq!(err.code, ERR_DEPENDENCY);
        assert!(err.error.contains("Fallback failed"));

        let calls = device_calls(&fx, "AAA");
        let last = calls.last().expect("calls");
        assert!(last.starts_with("shell rm -f /sdcard/"), "{calls:?}");
    }

    #[test]
    fn run_privileged_roots_and_retries_once() {
        let fx = Fixture::new();
        let result = run_privileged(&fx.state, "AAA", "cat /data/secret", None)
            .expect("privileged")
            .data;
        assert_eq!(result.stdout.trim(), "secret");
        let calls = fx.calls();
        assert!(calls.contains(&"-s AAA root".to_string()));
        let attempts = calls.iter().filter(|c| c.ends_with("cat /data/secret")).count();
        assert_eq!(attempts, 2);
    }

    #[test]
    fn acquire_root_reports_uid() {
        let fx = Fixture::new();
        let status = acquire_root(&fx.state, "AAA", None).expect("root").data;
        assert!(status.is_root);
        assert_eq!(status.uid, Some(0));
        let again = acquire_root(&fx.state, "AAA", None).expect("root again").data;
        assert_eq!(again.outcome, RootOutcome::AlreadyRoot);
    }

    #[test]
    fn reboot_runs_per_device() {
        let fx = Fixture::new();
        let results = reboot(&fx.state, serials(&["AAA", "BBB"]), RebootMode::Recovery, None)
            .expect("reboot")
            .data;
        assert_eq!(results.len(), 2);
        assert!(fx.calls().contains(&"-s BBB reboot recovery".to_string()));
    }

    #[test]
    fn engineering_mode_falls_through_to_next_entry_point() {
        let fx = Fixture::new();
        let modes = engineering_modes(&fx.state, "AAA", None, None).expect("modes").data;
        assert_eq!(modes.len(), 2);

        let launch = enter_engineering_mode(&fx.state, "AAA", None, None)
            .expect("launch")
            .data;
        assert_eq!(launch.mode, "Testing Menu");
        let err = enter_engineering_mode(&fx.state, "AAA", Some("nokia"), None)
            .expect_err("unknown vendor");
        assert_eq!(err.code, ERR_VALIDATION);
    }

    #[test]
    fn logcat_streams_batches_and_rejects_second_start() {
        let fx = Fixture::new();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let emitter: LogcatEmitter = Arc::new(move |batch: LogcatBatch| {
            let _ = tx.lock().expect("tx").send(batch);
        });
        start_logcat(&fx.state, "AAA", None, Arc::clone(&emitter), None).expect("start");
        let err = start_logcat(&fx.state, "AAA", None, emitter, None).expect_err("second start");
        assert_eq!(err.code, ERR_VALIDATION);

        let batch = rx.recv_timeout(Duration::from_secs(5)).expect("batch");
        assert_eq!(batch.serial, "AAA");
        assert!(batch.lines.iter().any(|line| line.contains("I/Stream: one")));

        stop_logcat(&fx.state, "AAA", None).expect("stop");
        let err = stop_logcat(&fx.state, "AAA", None).expect_err("not running");
        assert_eq!(err.code, ERR_VALIDATION);
    }

    #[test]
    fn dump_logcat_writes_buffer_to_file() {
        let fx = Fixture::new();
        let target = fx.path().join("dump.txt");
        let path = dump_logcat(&fx.state, "AAA", Some(target.clone()), None, None)
            .expect("dump")
            .data;
        assert_eq!(PathBuf::from(path), target);
        let text = fs::read_to_string(&target).expect("read");
        assert!(text.contains("I/Tag: second"));
    }

    #[test]
    fn config_values_round_trip_through_store() {
        let fx = Fixture::new();
        set_config_value(&fx.state, "command.command_timeout", "45", None).expect("set");
        let value = get_config_value(&fx.state, "command.command_timeout", None)
            .expect("get")
            .data;
        assert_eq!(value, json!(45));
        assert_eq!(fx.state.config().command.command_timeout, 45);

        let err = set_config_value(&fx.state, "command.command_timeout", "soon", None)
            .expect_err("wrong type");
        assert_eq!(err.code, ERR_VALIDATION);

        let backup = backup_config(&fx.state, None).expect("backup").data;
        let name = PathBuf::from(&backup)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .expect("name");
        assert!(list_config_backups(&fx.state, None)
            .expect("backups")
            .data
            .contains(&name));

        set_config_value(&fx.state, "command.command_timeout", "90", None).expect("set again");
        let restored = restore_config_backup(&fx.state, &name, None).expect("restore").data;
        assert_eq!(restored.command.command_timeout, 45);

        let reset = reset_config(&fx.state, None).expect("reset").data;
        assert_eq!(reset.command.command_timeout, 30);
    }

    #[test]
    fn operations_land_in_log_sink() {
        let fx = Fixture::new();
        let _ = tap(&fx.state, "ZZZ", 1, 1, Some("trace-op".to_string()));
        let records = recent_logs(&fx.state, "operations", 10, None).expect("recent").data;
        let record = records
            .iter()
            .find(|record| record["trace_id"] == Value::from("trace-op"))
            .expect("operation record");
        assert_eq!(record["operation"], Value::from("tap"));
        assert_eq!(record["success"], Value::from(false));

        let err = recent_logs(&fx.state, "everything", 10, None).expect_err("kind");
        assert_eq!(err.code, ERR_VALIDATION);

        let removed = clear_logs(&fx.state, None).expect("clear").data;
        assert!(removed >= 1);
        assert!(recent_logs(&fx.state, "operations", 10, None)
            .expect("recent")
            .data
            .is_empty());
    }

    #[test]
    fn diagnostics_bundle_lands_in_requested_dir() {
        let fx = Fixture::new();
        let target = fx.path().join("diag");
        let path = export_diagnostics(&fx.state, Some(target.clone()), None)
            .expect("export")
            .data;
        assert!(PathBuf::from(&path).starts_with(&target));
        assert!(path.ends_with(".zip"));
    }
}
