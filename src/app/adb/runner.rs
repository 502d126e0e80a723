use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::app::error::AppError;
use crate::app::log_sink::{CommandRecord, LogSink};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (false, false) => format!("{stdout}\n{stderr}"),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (true, true) => String::new(),
        }
    }

    /// Stdout, or stderr when stdout is empty. This is what most adb subcommands report on.
    pub fn text(&self) -> String {
        if self.stdout.trim().is_empty() {
            self.stderr.trim().to_string()
        } else {
            self.stdout.trim().to_string()
        }
    }

    pub fn contains_ignore_case(&self, needle: &str) -> bool {
        self.combined().to_lowercase().contains(&needle.to_lowercase())
    }
}

/// Process output before any text decoding, for binary payloads such as `exec-out screencap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
}

impl RawOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

fn drain<R: Read + Send + 'static>(reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut reader = reader;
        let mut buffer = Vec::<u8>::new();
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&temp[..count]),
                Err(_) => break,
            }
        }
        buffer
    })
}

/// Like [`run_command_with_timeout`], but keeps stdout and stderr as raw bytes.
pub fn run_command_bytes_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<RawOutput, AppError> {
    let start = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            AppError::dependency(format!("Failed to start {program}: {err}"), trace_id)
        })?;

    // Both pipes are drained in parallel; a chatty child would otherwise block once the pipe
    // buffer fills and hit the timeout.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stdout_handle = drain(stdout);
    let stderr_handle = drain(stderr);

    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AppError::timeout(
                        format!("{program} did not finish within {}s", timeout.as_secs()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    Ok(RawOutput {
        stdout: stdout_handle.join().unwrap_or_default(),
        stderr: stderr_handle.join().unwrap_or_default(),
        exit_code,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    run_command_bytes_with_timeout(program, args, timeout, trace_id).map(|raw| CommandOutput {
        stdout: String::from_utf8_lossy(&raw.stdout).to_string(),
        stderr: String::from_utf8_lossy(&raw.stderr).to_string(),
        exit_code: raw.exit_code,
        elapsed_ms: raw.elapsed_ms,
    })
}

pub fn render_command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    line
}

/// Builds `adb [-s <serial>] <args>` invocations and records each one in the log sink.
#[derive(Clone)]
pub struct AdbRunner {
    program: String,
    aapt_program: String,
    default_timeout: Duration,
    sink: Option<Arc<LogSink>>,
}

impl AdbRunner {
    pub fn new(program: impl Into<String>, aapt_program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            aapt_program: aapt_program.into(),
            default_timeout: Duration::from_secs(30),
            sink: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_sink(mut self, sink: Arc<LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn aapt_program(&self) -> &str {
        &self.aapt_program
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn adb_args<S: AsRef<str>>(serial: Option<&str>, args: &[S]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(serial) = serial.map(str::trim).filter(|value| !value.is_empty()) {
            full.push("-s".to_string());
            full.push(serial.to_string());
        }
        full.extend(args.iter().map(|arg| arg.as_ref().to_string()));
        full
    }

    pub fn run<S: AsRef<str>>(
        &self,
        serial: Option<&str>,
        args: &[S],
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        self.run_with_timeout(serial, args, self.default_timeout, trace_id)
    }

    pub fn run_with_timeout<S: AsRef<str>>(
        &self,
        serial: Option<&str>,
        args: &[S],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        let full = Self::adb_args(serial, args);
        self.execute(&self.program, serial, &full, timeout, trace_id)
    }

    pub fn shell(
        &self,
        serial: &str,
        command: &str,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        self.run(Some(serial), &["shell", command], trace_id)
    }

    pub fn shell_with_timeout(
        &self,
        serial: &str,
        command: &str,
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        self.run_with_timeout(Some(serial), &["shell", command], timeout, trace_id)
    }

    pub fn aapt<S: AsRef<str>>(&self, args: &[S], trace_id: &str) -> Result<CommandOutput, AppError> {
        let args: Vec<String> = args.iter().map(|arg| arg.as_ref().to_string()).collect();
        self.execute(&self.aapt_program, None, &args, self.default_timeout, trace_id)
    }

    /// Binary-safe `adb` invocation. The command record keeps only the stdout size.
    pub fn run_bytes_with_timeout<S: AsRef<str>>(
        &self,
        serial: Option<&str>,
        args: &[S],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<RawOutput, AppError> {
        let full = Self::adb_args(serial, args);
        let started = Instant::now();
        let result = run_command_bytes_with_timeout(&self.program, &full, timeout, trace_id);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let summary = match &result {
            Ok(raw) => Ok(CommandOutput {
                stdout: format!("<{} bytes>", raw.stdout.len()),
                stderr: String::from_utf8_lossy(&raw.stderr).to_string(),
                exit_code: raw.exit_code,
                elapsed_ms: raw.elapsed_ms,
            }),
            Err(err) => Err(err.clone()),
        };
        if let Err(err) = &summary {
            warn!(
                trace_id = %trace_id,
                serial = serial.unwrap_or("-"),
                error = %err,
                elapsed_ms,
                "command failed to run"
            );
        }
        self.record(&self.program, serial, &full, &summary, elapsed_ms, trace_id);
        result
    }

    pub(crate) fn record(
        &self,
        program: &str,
        serial: Option<&str>,
        args: &[String],
        result: &Result<CommandOutput, AppError>,
        elapsed_ms: u64,
        trace_id: &str,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };
        let (exit_code, output) = match result {
            Ok(output) => (output.exit_code, output.combined()),
            Err(err) => (None, err.to_string()),
        };
        sink.record_command(CommandRecord {
            timestamp: Utc::now(),
            trace_id: trace_id.to_string(),
            serial: serial.map(str::to_string),
            command: render_command_line(program, args),
            exit_code,
            output,
            elapsed_ms,
        });
    }

    fn execute(
        &self,
        program: &str,
        serial: Option<&str>,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        let started = Instant::now();
        let result = run_command_with_timeout(program, args, timeout, trace_id);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(output) => debug!(
                trace_id = %trace_id,
                serial = serial.unwrap_or("-"),
                exit_code = ?output.exit_code,
                elapsed_ms,
                "{}",
                render_command_line(program, args)
            ),
            Err(err) => warn!(
                trace_id = %trace_id,
                serial = serial.unwrap_or("-"),
                error = %err,
                elapsed_ms,
                "command failed to run"
            ),
        }
        self.record(program, serial, args, &result, elapsed_ms, trace_id);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::log_sink::RecordKind;
    use tempfile::TempDir;

    fn sh(script: &str) -> (String, Vec<String>) {
        ("sh".to_string(), vec!["-c".to_string(), script.to_string()])
    }

    #[cfg(unix)]
    #[test]
    fn run_command_with_timeout_does_not_deadlock_on_large_stdout() {
        // A child that fills the pipe must still complete well inside the timeout.
        let (program, args) =
            sh("i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done");
        let output = run_command_with_timeout(&program, &args, Duration::from_secs(10), "trace")
            .expect("expected large-output command to complete without timing out");
        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.len() >= 1_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn reports_timeout_with_dedicated_code() {
        let (program, args) = sh("sleep 5");
        let err = run_command_with_timeout(&program, &args, Duration::from_millis(200), "trace-t")
            .expect_err("expected timeout");
        assert_eq!(err.code, "ERR_TIMEOUT");
        assert_eq!(err.trace_id, "trace-t");
    }

    #[cfg(unix)]
    #[test]
    fn bytes_variant_keeps_binary_stdout_and_times_out() {
        let (program, args) = sh("printf '\\211PNG\\377'");
        let raw = run_command_bytes_with_timeout(&program, &args, DEFAULT_TIMEOUT, "trace")
            .expect("run");
        assert!(raw.success());
        assert_eq!(raw.stdout, b"\x89PNG\xff".to_vec());

        let (program, args) = sh("sleep 5");
        let err = run_command_bytes_with_timeout(&program, &args, Duration::from_millis(200), "trace")
            .expect_err("expected timeout");
        assert_eq!(err.code, "ERR_TIMEOUT");
    }

    #[cfg(unix)]
    #[test]
    fn bytes_runner_records_size_only() {
        let tmp = TempDir::new().expect("tmp");
        let sink = Arc::new(LogSink::new(tmp.path(), 1024 * 1024, 2));
        let runner = AdbRunner::new("sh", "aapt").with_sink(Arc::clone(&sink));
        let raw = runner
            .run_bytes_with_timeout(None, &["-c", "printf abc"], DEFAULT_TIMEOUT, "trace-raw")
            .expect("run");
        assert_eq!(raw.stdout, b"abc".to_vec());
        let records: Vec<CommandRecord> = sink.recent(RecordKind::Command, 10);
        assert_eq!(records[0].output, "<3 bytes>");
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_reported_as_is() {
        let (program, args) = sh("echo oops >&2; exit 3");
        let output =
            run_command_with_timeout(&program, &args, DEFAULT_TIMEOUT, "trace").expect("run");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.text(), "oops");
    }

    #[test]
    fn missing_program_is_dependency_error() {
        let err =
            run_command_with_timeout("/definitely/not/a/real/adb", &[], DEFAULT_TIMEOUT, "trace")
                .expect_err("spawn");
        assert_eq!(err.code, "ERR_DEPENDENCY");
    }

    #[test]
    fn prefixes_serial_only_when_present() {
        assert_eq!(
            AdbRunner::adb_args(Some("ABC"), &["shell", "id"]),
            vec!["-s", "ABC", "shell", "id"]
        );
        assert_eq!(AdbRunner::adb_args(None, &["devices"]), vec!["devices"]);
        assert_eq!(AdbRunner::adb_args(Some("  "), &["devices"]), vec!["devices"]);
    }

    #[test]
    fn renders_quoted_arguments() {
        let args = vec!["shell".to_string(), "input text".to_string()];
        assert_eq!(render_command_line("adb", &args), "adb shell \"input text\"");
    }

    #[test]
    fn combined_joins_streams() {
        let output = CommandOutput {
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
            exit_code: Some(0),
            elapsed_ms: 1,
        };
        assert_eq!(output.combined(), "out\nerr");
        assert!(output.contains_ignore_case("ERR"));
    }

    #[cfg(unix)]
    #[test]
    fn runner_records_every_invocation() {
        let tmp = TempDir::new().expect("tmp");
        let sink = Arc::new(LogSink::new(tmp.path(), 1024 * 1024, 2));
        let runner = AdbRunner::new("sh", "aapt").with_sink(Arc::clone(&sink));
        let output = runner
            .run(None, &["-c", "echo hello"], "trace-rec")
            .expect("run");
        assert_eq!(output.stdout.trim(), "hello");

        let records: Vec<CommandRecord> = sink.recent(RecordKind::Command, 10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].trace_id, "trace-rec");
        assert_eq!(records[0].exit_code, Some(0));
        assert_eq!(records[0].output, "hello");
        assert!(records[0].command.starts_with("sh -c"));
    }
}
