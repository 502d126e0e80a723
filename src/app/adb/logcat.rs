use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::app::config::LogcatSettings;
use crate::app::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogcatBatch {
    pub serial: String,
    pub lines: Vec<String>,
    pub trace_id: String,
}

pub type LogcatEmitter = Arc<dyn Fn(LogcatBatch) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub limit: usize,
    pub delay: Duration,
}

impl BatchPolicy {
    pub fn from_settings(settings: &LogcatSettings) -> Self {
        Self {
            limit: settings.batch_lines.max(1) as usize,
            delay: Duration::from_millis(settings.batch_interval_ms.max(0) as u64),
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            limit: 50,
            delay: Duration::from_millis(60),
        }
    }
}

struct LogcatHandle {
    child: Child,
    stop_flag: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
}

pub fn logcat_args(serial: &str, filter: Option<&str>) -> Vec<String> {
    let mut args = vec!["-s".to_string(), serial.to_string(), "logcat".to_string()];
    if let Some(filter) = filter.map(str::trim).filter(|value| !value.is_empty()) {
        args.extend(filter.split_whitespace().map(str::to_string));
    }
    args
}

pub fn spawn_adb_logcat(
    program: &str,
    serial: &str,
    filter: Option<&str>,
    trace_id: &str,
) -> Result<Child, AppError> {
    Command::new(program)
        .args(logcat_args(serial, filter))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::dependency(format!("Failed to start logcat: {err}"), trace_id))
}

fn spawn_line_reader<R: Read + Send + 'static>(
    reader: R,
    prefix: Option<&'static str>,
    trace_id: String,
    stop_flag: Arc<AtomicBool>,
    lines: Sender<String>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for line_result in BufReader::new(reader).lines() {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            let line = match line_result {
                Ok(line) => line,
                Err(err) => {
                    warn!(trace_id = %trace_id, error = %err, "failed to read logcat output");
                    break;
                }
            };
            let line = match prefix {
                Some(prefix) => format!("{prefix}{line}"),
                None => line,
            };
            if lines.send(line).is_err() {
                break;
            }
        }
    })
}

/// Groups lines into batches. A batch goes out when it is full, or once `policy.delay` passes
/// without it being flushed, so quiet periods never hold lines back. Ends when every reader has
/// hung up.
fn spawn_batcher(
    lines: Receiver<String>,
    serial: String,
    trace_id: String,
    emitter: LogcatEmitter,
    policy: BatchPolicy,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let delay = policy.delay.max(Duration::from_millis(1));
        let mut pending: Vec<String> = Vec::new();
        let mut last_emit = Instant::now();
        let flush = |pending: &mut Vec<String>| {
            if !pending.is_empty() {
                (emitter)(LogcatBatch {
                    serial: serial.clone(),
                    lines: std::mem::take(pending),
                    trace_id: trace_id.clone(),
                });
            }
        };
        loop {
            match lines.recv_timeout(delay) {
                Ok(line) => {
                    pending.push(line);
                    if pending.len() >= policy.limit || last_emit.elapsed() >= delay {
                        flush(&mut pending);
                        last_emit = Instant::now();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    flush(&mut pending);
                    last_emit = Instant::now();
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        flush(&mut pending);
    })
}

/// One streaming logcat process per device.
#[derive(Default)]
pub struct LogcatRegistry {
    sessions: Mutex<HashMap<String, LogcatHandle>>,
}

impl LogcatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, serial: &str) -> bool {
        self.sessions
            .lock()
            .map(|guard| guard.contains_key(serial))
            .unwrap_or(false)
    }

    pub fn running(&self) -> Vec<String> {
        let mut serials: Vec<String> = self
            .sessions
            .lock()
            .map(|guard| guard.keys().cloned().collect())
            .unwrap_or_default();
        serials.sort();
        serials
    }

    /// True while the process for `serial` is still alive. A process that exited on its own is
    /// removed from the registry.
    pub fn is_alive(&self, serial: &str) -> bool {
        let Ok(mut guard) = self.sessions.lock() else {
            return false;
        };
        let exited = match guard.get_mut(serial) {
            Some(handle) => !matches!(handle.child.try_wait(), Ok(None)),
            None => return false,
        };
        if exited {
            if let Some(handle) = guard.remove(serial) {
                for reader in handle.readers {
                    let _ = reader.join();
                }
            }
            return false;
        }
        true
    }

    pub fn start<S>(
        &self,
        serial: &str,
        filter: Option<&str>,
        policy: BatchPolicy,
        emitter: LogcatEmitter,
        trace_id: &str,
        spawn_logcat: S,
    ) -> Result<(), AppError>
    where
        S: FnOnce(&str, Option<&str>, &str) -> Result<Child, AppError>,
    {
        let mut guard = self
            .sessions
            .lock()
            .map_err(|_| AppError::system("Logcat registry locked", trace_id))?;
        if guard.contains_key(serial) {
            return Err(AppError::validation(
                format!("Logcat already running for {serial}"),
                trace_id,
            ));
        }

        let mut child = spawn_logcat(
            serial,
            filter.filter(|value| !value.trim().is_empty()),
            trace_id,
        )?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::system("Failed to capture logcat stdout", trace_id))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::system("Failed to capture logcat stderr", trace_id))?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (line_tx, line_rx) = mpsc::channel();
        let readers = vec![
            spawn_line_reader(
                stdout,
                None,
                trace_id.to_string(),
                Arc::clone(&stop_flag),
                line_tx.clone(),
            ),
            spawn_line_reader(
                stderr,
                Some("STDERR: "),
                trace_id.to_string(),
                Arc::clone(&stop_flag),
                line_tx,
            ),
            spawn_batcher(
                line_rx,
                serial.to_string(),
                trace_id.to_string(),
                emitter,
                policy,
            ),
        ];

        info!(trace_id = %trace_id, serial = %serial, "logcat stream started");
        guard.insert(
            serial.to_string(),
            LogcatHandle {
                child,
                stop_flag,
                readers,
            },
        );
        Ok(())
    }

    /// Stops the stream and waits for the readers to flush their last batch.
    pub fn stop(&self, serial: &str, trace_id: &str) -> Result<(), AppError> {
        let handle = {
            let mut guard = self
                .sessions
                .lock()
                .map_err(|_| AppError::system("Logcat registry locked", trace_id))?;
            guard.remove(serial)
        };
        let Some(mut handle) = handle else {
            return Err(AppError::validation(
                format!("Logcat not running for {serial}"),
                trace_id,
            ));
        };
        handle.stop_flag.store(true, Ordering::Relaxed);
        let _ = handle.child.kill();
        let _ = handle.child.wait();
        for reader in handle.readers {
            let _ = reader.join();
        }
        info!(trace_id = %trace_id, serial = %serial, "logcat stream stopped");
        Ok(())
    }

    pub fn stop_all(&self, trace_id: &str) {
        for serial in self.running() {
            if let Err(err) = self.stop(&serial, trace_id) {
                warn!(trace_id = %trace_id, serial = %serial, error = %err, "failed to stop logcat");
            }
        }
    }
}

impl Drop for LogcatRegistry {
    fn drop(&mut self) {
        if let Ok(guard) = self.sessions.get_mut() {
            for handle in guard.values_mut() {
                handle.stop_flag.store(true, Ordering::Relaxed);
                let _ = handle.child.kill();
                let _ = handle.child.wait();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_logcat_args_with_filter() {
        assert_eq!(
            logcat_args("ABC", Some(" ActivityManager:I *:S ")),
            vec!["-s", "ABC", "logcat", "ActivityManager:I", "*:S"]
        );
        assert_eq!(logcat_args("ABC", Some("  ")), vec!["-s", "ABC", "logcat"]);
    }

    #[test]
    fn policy_follows_settings() {
        let settings = LogcatSettings {
            batch_lines: 0,
            batch_interval_ms: 250,
            ..LogcatSettings::default()
        };
        let policy = BatchPolicy::from_settings(&settings);
        assert_eq!(policy.limit, 1);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }

    #[test]
    fn stop_without_session_is_validation_error() {
        let registry = LogcatRegistry::new();
        let err = registry.stop("ABC", "trace").expect_err("not running");
        assert_eq!(err.code, "ERR_VALIDATION");
    }

    #[cfg(unix)]
    #[test]
    fn streams_batches_until_stopped() {
        let registry = LogcatRegistry::new();
        let collected = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&collected);
        let emitter: LogcatEmitter = Arc::new(move |batch: LogcatBatch| {
            assert_eq!(batch.serial, "ABC");
            sink.lock().expect("lock").extend(batch.lines);
        });
        let spawn = |_: &str, _: Option<&str>, trace_id: &str| {
            Command::new("sh")
                .args(["-c", "echo one; echo two; echo oops >&2; exec sleep 5"])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|err| AppError::dependency(err.to_string(), trace_id))
        };
        registry
            .start("ABC", None, BatchPolicy::default(), Arc::clone(&emitter), "trace", spawn)
            .expect("start");
        assert!(registry.is_running("ABC"));

        let duplicate = registry.start("ABC", None, BatchPolicy::default(), emitter, "trace", spawn);
        assert_eq!(duplicate.expect_err("dup").code, "ERR_VALIDATION");

        let deadline = Instant::now() + Duration::from_secs(3);
        while collected.lock().expect("lock").len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        registry.stop("ABC", "trace").expect("stop");
        assert!(!registry.is_running("ABC"));

        let lines = collected.lock().expect("lock").clone();
        assert!(lines.contains(&"one".to_string()));
        assert!(lines.contains(&"two".to_string()));
        assert!(lines.contains(&"STDERR: oops".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn quiet_stream_still_delivers_pending_lines() {
        let registry = LogcatRegistry::new();
        let collected = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&collected);
        let emitter: LogcatEmitter = Arc::new(move |batch: LogcatBatch| {
            sink.lock().expect("lock").extend(batch.lines);
        });
        registry
            .start("ABC", None, BatchPolicy::default(), emitter, "trace", |_, _, trace_id| {
                Command::new("sh")
                    .args(["-c", "echo one; echo two; exec sleep 5"])
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|err| AppError::dependency(err.to_string(), trace_id))
            })
            .expect("start");

        let deadline = Instant::now() + Duration::from_secs(2);
        while collected.lock().expect("lock").len() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(registry.is_alive("ABC"));
        assert_eq!(*collected.lock().expect("lock"), vec!["one", "two"]);
        registry.stop("ABC", "trace").expect("stop");
    }

    #[cfg(unix)]
    #[test]
    fn exited_process_is_reaped() {
        let registry = LogcatRegistry::new();
        let emitter: LogcatEmitter = Arc::new(|_| {});
        registry
            .start("ABC", None, BatchPolicy::default(), emitter, "trace", |_, _, trace_id| {
                Command::new("sh")
                    .args(["-c", "exit 0"])
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|err| AppError::dependency(err.to_string(), trace_id))
            })
            .expect("start");
        let deadline = Instant::now() + Duration::from_secs(3);
        while registry.is_alive("ABC") && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!registry.is_running("ABC"));
    }
}
