use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::app::adb::runner::CommandOutput;
use crate::app::error::AppError;

const MAX_CAPTURED: usize = 200_000;

pub fn parse_progress_percent(line: &str) -> Option<u8> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    // adb `-p` output looks like: "[ 42%] /remote/file -> /local/file"
    if let Some(percent) = parse_bracket_percent(trimmed) {
        return Some(percent);
    }
    parse_loose_percent(trimmed)
}

fn parse_bracket_percent(input: &str) -> Option<u8> {
    let open = input.find('[')?;
    let close = input[open..].find(']')? + open;
    parse_loose_percent(&input[open + 1..close])
}

fn parse_loose_percent(input: &str) -> Option<u8> {
    let bytes = input.as_bytes();
    let percent_index = bytes.iter().position(|b| *b == b'%')?;
    let mut start = percent_index;
    let mut digits = 0;
    while start > 0 && digits < 3 && bytes[start - 1].is_ascii_digit() {
        start -= 1;
        digits += 1;
    }
    if digits == 0 {
        return None;
    }
    let value: u8 = input[start..percent_index].parse().ok()?;
    (value <= 100).then_some(value)
}

/// True when the adb build rejected the `-p` flag and the transfer should be retried without it.
pub fn progress_flag_unsupported(output: &CommandOutput) -> bool {
    let combined = output.combined().to_lowercase();
    combined.contains("-p") && (combined.contains("unknown option") || combined.contains("usage:"))
}

fn append_limited(buffer: &mut String, chunk: &str, max_len: usize) {
    if buffer.len() >= max_len {
        return;
    }
    let mut end = (max_len - buffer.len()).min(chunk.len());
    while end > 0 && !chunk.is_char_boundary(end) {
        end -= 1;
    }
    buffer.push_str(&chunk[..end]);
}

enum StreamEvent {
    Percent(u8),
    Stdout(String),
    Stderr(String),
}

fn split_progress_lines(pending: &mut String, last: &mut Option<u8>) -> Vec<u8> {
    let mut found = Vec::new();
    let mut start = 0usize;
    for (index, ch) in pending.char_indices() {
        if ch == '\n' || ch == '\r' {
            if let Some(percent) = parse_progress_percent(&pending[start..index]) {
                if *last != Some(percent) {
                    *last = Some(percent);
                    found.push(percent);
                }
            }
            start = index + ch.len_utf8();
        }
    }
    pending.drain(..start);
    found
}

/// Runs an adb transfer and reports each distinct percentage to `on_progress` on the calling
/// thread. adb writes `-p` progress with carriage returns, so both streams are scanned.
pub fn run_with_progress<F>(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
    mut on_progress: F,
) -> Result<CommandOutput, AppError>
where
    F: FnMut(u8),
{
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

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;

    let (tx, rx) = mpsc::channel::<StreamEvent>();
    let readers: Vec<_> = [
        (Box::new(stdout) as Box<dyn Read + Send>, true),
        (Box::new(stderr) as Box<dyn Read + Send>, false),
    ]
    .into_iter()
    .map(|(mut reader, is_stdout)| {
        let tx = tx.clone();
        std::thread::spawn(move || {
            let mut temp = [0u8; 4096];
            let mut pending = String::new();
            let mut last = None;
            loop {
                let count = match reader.read(&mut temp) {
                    Ok(0) | Err(_) => break,
                    Ok(count) => count,
                };
                let chunk = String::from_utf8_lossy(&temp[..count]).to_string();
                pending.push_str(&chunk);
                for percent in split_progress_lines(&mut pending, &mut last) {
                    let _ = tx.send(StreamEvent::Percent(percent));
                }
                let event = if is_stdout {
                    StreamEvent::Stdout(chunk)
                } else {
                    StreamEvent::Stderr(chunk)
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        })
    })
    .collect();
    drop(tx);

    let mut stdout_text = String::new();
    let mut stderr_text = String::new();
    let mut last_reported = None;
    let mut handle_event = |event: StreamEvent,
                            stdout_text: &mut String,
                            stderr_text: &mut String| match event {
        StreamEvent::Percent(percent) => {
            if last_reported != Some(percent) {
                last_reported = Some(percent);
                on_progress(percent);
            }
        }
        StreamEvent::Stdout(chunk) => append_limited(stdout_text, &chunk, MAX_CAPTURED),
        StreamEvent::Stderr(chunk) => append_limited(stderr_text, &chunk, MAX_CAPTURED),
    };

    let exit_code = loop {
        while let Ok(event) = rx.try_recv() {
            handle_event(event, &mut stdout_text, &mut stderr_text);
        }
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    for reader in readers {
                        let _ = reader.join();
                    }
                    return Err(AppError::timeout(
                        format!("Transfer did not finish within {}s", timeout.as_secs()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                let _ = child.kill();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    for reader in readers {
        let _ = reader.join();
    }
    for event in rx.try_iter() {
        handle_event(event, &mut stdout_text, &mut stderr_text);
    }

    Ok(CommandOutput {
        stdout: stdout_text,
        stderr: stderr_text,
        exit_code,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}
