//! Verification subprocess runner.
//!
//! The command runs under `sh -c` in the project root so configured
//! commands keep their shell semantics. The child is killable: hitting the
//! timeout drops (and thereby kills) it and reports `return_code: -1`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use mend_plan::VerifyOutcome;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::VerifyError;

/// Captured output is truncated to this many trailing characters.
pub const OUTPUT_TAIL_CHARS: usize = 3000;

/// Pytest's "no tests were collected" exit code.
const PYTEST_NO_TESTS_RC: i32 = 5;

/// Runs `command` under `sh -c` in `root` with a hard timeout.
///
/// A timeout is an ordinary failed outcome, not an error: `success: false`,
/// `return_code: -1`, and stderr explaining the timeout.
///
/// # Errors
///
/// Only spawn/collection failures (e.g. `sh` missing) are errors.
pub async fn run_verify(
    root: &Path,
    command: &str,
    timeout_secs: u64,
) -> Result<VerifyOutcome, VerifyError> {
    let started = Instant::now();
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| VerifyError::Spawn {
            command: command.to_owned(),
            source,
        })?;

    match timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let outcome = VerifyOutcome {
                success: output.status.success(),
                return_code: output.status.code().unwrap_or(-1),
                stdout: tail(&String::from_utf8_lossy(&output.stdout), OUTPUT_TAIL_CHARS),
                stderr: tail(&String::from_utf8_lossy(&output.stderr), OUTPUT_TAIL_CHARS),
                duration_ms: elapsed_ms(started),
                command: command.to_owned(),
                reason: None,
                timed_out: false,
                py_compile_fallback: false,
                fix_import_retry: false,
            };
            info!(
                success = outcome.success,
                return_code = outcome.return_code,
                duration_ms = outcome.duration_ms,
                "verify finished"
            );
            Ok(outcome)
        }
        Ok(Err(source)) => Err(VerifyError::Wait {
            command: command.to_owned(),
            source,
        }),
        Err(_elapsed) => {
            warn!(command, timeout_secs, "verify command timed out, child killed");
            Ok(VerifyOutcome {
                success: false,
                return_code: -1,
                stdout: String::new(),
                stderr: format!("verify command timed out after {timeout_secs}s"),
                duration_ms: elapsed_ms(started),
                command: command.to_owned(),
                reason: None,
                timed_out: true,
                py_compile_fallback: false,
                fix_import_retry: false,
            })
        }
    }
}

/// Cap applied to the compile-only fallback's timeout.
pub const COMPILE_TIMEOUT_CAP_SECS: u64 = 60;

/// Whether the orchestrator should retry with the compile-only check:
/// pytest collected nothing (exit 5 plus the "no tests" phrase), the
/// command was not forced, and there is something modified to compile.
#[must_use]
pub fn needs_compile_fallback(outcome: &VerifyOutcome, forced: bool, modified_count: usize) -> bool {
    if forced || modified_count == 0 || outcome.success || outcome.timed_out {
        return false;
    }
    let combined = format!("{}{}", outcome.stdout, outcome.stderr).to_lowercase();
    outcome.return_code == PYTEST_NO_TESTS_RC && combined.contains("no tests")
}

/// Compile-only fallback: byte-compiles the modified `.py` files instead
/// of running a test suite. The outcome is tagged `py_compile_fallback`.
///
/// # Errors
///
/// Same as [`run_verify`]; a list with no `.py` files short-circuits to
/// success.
pub async fn compile_check(
    root: &Path,
    files: &[PathBuf],
    timeout_secs: u64,
) -> Result<VerifyOutcome, VerifyError> {
    let py_files: Vec<&PathBuf> = files
        .iter()
        .filter(|f| f.extension().and_then(|e| e.to_str()) == Some("py"))
        .collect();
    if py_files.is_empty() {
        return Ok(VerifyOutcome {
            success: true,
            return_code: 0,
            stdout: String::from("no .py files to compile"),
            stderr: String::new(),
            duration_ms: 0,
            command: String::from("python -m py_compile"),
            reason: None,
            timed_out: false,
            py_compile_fallback: true,
            fix_import_retry: false,
        });
    }
    let command = build_compile_command(&py_files);
    let mut outcome = run_verify(root, &command, timeout_secs).await?;
    outcome.py_compile_fallback = true;
    Ok(outcome)
}

pub(crate) fn build_compile_command(files: &[&PathBuf]) -> String {
    let quoted: Vec<String> = files.iter().map(|f| shell_quote(f)).collect();
    format!("python -m py_compile {}", quoted.join(" "))
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "'\\''"))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_owned();
    }
    text.chars().skip(count - max_chars).collect()
}
