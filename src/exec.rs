//! External command execution
//!
//! This module provides:
//! - CommandExecutor trait for running lock and system test commands
//! - ShellExecutor running multiline command strings through the shell
//! - Template substitution with shell escaping for {{package}}, {{version}},
//!   {{constraint}} and {{with_all_deps_flag}} placeholders
//! - Timeout enforcement with process kill on expiry
//!
//! Commands run through the user's shell ($SHELL, falling back to /bin/sh)
//! so pipes and shell features in configured command lines work as written.
//! Lines ending with a backslash are joined with the next line; lines
//! ending with a pipe continue into the next line's command.

use crate::error::ExecError;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Poll interval while waiting for a child process to finish
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Runs external commands for lock regeneration and system tests.
///
/// Implemented by [`ShellExecutor`] in production. Closures with the same
/// signature also implement the trait, which keeps tests free of process
/// spawning.
pub trait CommandExecutor: Send + Sync {
    /// Executes a multiline command string and returns the last command's
    /// stdout. A timeout of 0 disables the deadline.
    fn execute(
        &self,
        commands: &str,
        env: &BTreeMap<String, String>,
        dir: &Path,
        timeout_seconds: u64,
        replacements: &HashMap<String, String>,
    ) -> Result<Vec<u8>, ExecError>;
}

impl<F> CommandExecutor for F
where
    F: Fn(&str, &BTreeMap<String, String>, &Path, u64, &HashMap<String, String>) -> Result<Vec<u8>, ExecError>
        + Send
        + Sync,
{
    fn execute(
        &self,
        commands: &str,
        env: &BTreeMap<String, String>,
        dir: &Path,
        timeout_seconds: u64,
        replacements: &HashMap<String, String>,
    ) -> Result<Vec<u8>, ExecError> {
        self(commands, env, dir, timeout_seconds, replacements)
    }
}

/// Default executor running commands through the user's shell
#[derive(Debug, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    /// Creates a new shell executor
    pub fn new() -> Self {
        Self
    }

    /// Returns the shell binary used for command execution
    fn shell() -> String {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }

    /// Runs one command line through the shell, enforcing the deadline
    fn run_line(
        &self,
        line: &str,
        env: &BTreeMap<String, String>,
        dir: &Path,
        timeout_seconds: u64,
    ) -> Result<Vec<u8>, ExecError> {
        if line.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        let shell = Self::shell();
        let mut command = Command::new(&shell);
        command
            .arg("-c")
            .arg(line)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (key, value) in env {
            // Allow $VAR references inside configured values
            command.env(key, expand_env(value));
        }

        let mut child = command.spawn().map_err(|e| ExecError::Spawn {
            command: line.to_string(),
            source: e,
        })?;

        // Drain the pipes on background threads so a chatty child cannot
        // block on a full pipe buffer while we poll for its exit
        let stdout_reader = child.stdout.take().map(spawn_pipe_reader);
        let stderr_reader = child.stderr.take().map(spawn_pipe_reader);

        let deadline = if timeout_seconds > 0 {
            Some(Instant::now() + Duration::from_secs(timeout_seconds))
        } else {
            None
        };

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(ExecError::Timeout {
                                seconds: timeout_seconds,
                            });
                        }
                    }
                    std::thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(ExecError::Spawn {
                        command: line.to_string(),
                        source: e,
                    })
                }
            }
        };

        let stdout = stdout_reader.map(collect_pipe).unwrap_or_default();
        let stderr = stderr_reader.map(collect_pipe).unwrap_or_default();

        if status.success() {
            Ok(stdout)
        } else {
            let mut message = String::from_utf8_lossy(&stderr).trim().to_string();
            if message.is_empty() {
                message = String::from_utf8_lossy(&stdout).trim().to_string();
            }
            if message.is_empty() {
                message = format!("exit status {status}");
            }
            Err(ExecError::CommandFailed { message })
        }
    }
}

impl CommandExecutor for ShellExecutor {
    fn execute(
        &self,
        commands: &str,
        env: &BTreeMap<String, String>,
        dir: &Path,
        timeout_seconds: u64,
        replacements: &HashMap<String, String>,
    ) -> Result<Vec<u8>, ExecError> {
        if commands.trim().is_empty() {
            return Err(ExecError::NoCommands);
        }

        let substituted = apply_replacements(commands, replacements);
        let lines = join_command_lines(&substituted);
        if lines.is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        let mut last_output = Vec::new();
        for line in &lines {
            tracing::debug!(command = %line, "running command");
            last_output = self.run_line(line, env, dir, timeout_seconds)?;
        }
        Ok(last_output)
    }
}

fn spawn_pipe_reader<R: std::io::Read + Send + 'static>(
    mut pipe: R,
) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        buffer
    })
}

fn collect_pipe(handle: std::thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

/// Builds the standard replacement map for lock command templates
pub fn build_replacements(
    package: &str,
    version: &str,
    constraint: &str,
    with_all_deps: bool,
) -> HashMap<String, String> {
    let mut replacements = HashMap::new();
    replacements.insert("package".to_string(), package.to_string());
    replacements.insert("version".to_string(), version.to_string());
    replacements.insert("constraint".to_string(), constraint.to_string());
    replacements.insert(
        "with_all_deps_flag".to_string(),
        if with_all_deps { "-W" } else { "" }.to_string(),
    );
    replacements
}

/// Substitutes {{key}} placeholders with shell-escaped values
pub fn apply_replacements(commands: &str, replacements: &HashMap<String, String>) -> String {
    let mut result = commands.to_string();
    for (key, value) in replacements {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, &shell_escape(value));
    }
    result
}

/// Escapes a value for safe interpolation into a shell command line.
///
/// Values consisting only of safe characters pass through unquoted; other
/// values are wrapped in single quotes with embedded quotes escaped.
pub fn shell_escape(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    if value.chars().all(is_shell_safe) {
        return value.to_string();
    }

    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

fn is_shell_safe(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(ch, '-' | '_' | '.' | '/' | '@' | ':' | '+' | '=')
}

/// Expands $VAR and ${VAR} references against the process environment
fn expand_env(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                name.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if braced && chars.peek() == Some(&'}') {
            chars.next();
        }
        if name.is_empty() {
            result.push('$');
        } else {
            result.push_str(&std::env::var(&name).unwrap_or_default());
        }
    }
    result
}

/// Joins multiline command strings into executable lines.
///
/// Lines ending with a backslash are continued onto the next line; lines
/// ending with a pipe are joined with the following command. Blank lines
/// separate sequential commands.
pub fn join_command_lines(commands: &str) -> Vec<String> {
    let normalized = commands.replace("\r\n", "\n");
    let mut lines = Vec::new();
    let mut pending = String::new();

    for raw in normalized.split('\n') {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(continued) = trimmed.strip_suffix('\\') {
            pending.push_str(continued.trim_end());
            pending.push(' ');
            continue;
        }

        pending.push_str(trimmed);

        if pending.trim_end().ends_with('|') {
            pending.push(' ');
            continue;
        }

        lines.push(pending.trim().to_string());
        pending.clear();
    }

    if !pending.trim().is_empty() {
        lines.push(pending.trim().trim_end_matches('|').trim().to_string());
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run(commands: &str) -> Result<Vec<u8>, ExecError> {
        let dir = TempDir::new().unwrap();
        ShellExecutor::new().execute(
            commands,
            &BTreeMap::new(),
            dir.path(),
            0,
            &HashMap::new(),
        )
    }

    #[test]
    fn test_shell_escape_safe_values() {
        assert_eq!(shell_escape("lodash"), "lodash");
        assert_eq!(shell_escape("@types/node"), "@types/node");
        assert_eq!(shell_escape("1.2.3+build"), "1.2.3+build");
    }

    #[test]
    fn test_shell_escape_unsafe_values() {
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("a b"), "'a b'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
        assert_eq!(shell_escape("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn test_apply_replacements() {
        let replacements = build_replacements("lodash", "4.18.0", "^", false);
        let result = apply_replacements(
            "npm install {{package}}@{{version}} {{with_all_deps_flag}}",
            &replacements,
        );
        assert_eq!(result, "npm install lodash@4.18.0 ''");
    }

    #[test]
    fn test_build_replacements_with_all_deps() {
        let replacements = build_replacements("symfony/console", "6.4.0", "^", true);
        assert_eq!(replacements.get("with_all_deps_flag").unwrap(), "-W");
    }

    #[test]
    fn test_join_command_lines_sequential() {
        let lines = join_command_lines("echo one\necho two\n");
        assert_eq!(lines, vec!["echo one", "echo two"]);
    }

    #[test]
    fn test_join_command_lines_backslash_continuation() {
        let lines = join_command_lines("echo one \\\n  two");
        assert_eq!(lines, vec!["echo one two"]);
    }

    #[test]
    fn test_join_command_lines_trailing_pipe() {
        let lines = join_command_lines("printf 'a\\nb' |\ngrep a");
        assert_eq!(lines, vec!["printf 'a\\nb' | grep a"]);
    }

    #[test]
    fn test_join_command_lines_skips_blank_lines() {
        let lines = join_command_lines("\n\necho hi\n\n");
        assert_eq!(lines, vec!["echo hi"]);
    }

    #[test]
    fn test_execute_captures_stdout() {
        let output = run("printf hello").unwrap();
        assert_eq!(String::from_utf8_lossy(&output), "hello");
    }

    #[test]
    fn test_execute_returns_last_output() {
        let output = run("printf first\nprintf second").unwrap();
        assert_eq!(String::from_utf8_lossy(&output), "second");
    }

    #[test]
    fn test_execute_empty_commands() {
        let err = run("   \n  ").unwrap_err();
        assert!(matches!(err, ExecError::NoCommands));
    }

    #[test]
    fn test_execute_failure_surfaces_stderr() {
        let err = run("sh -c 'echo broken >&2; exit 3'").unwrap_err();
        match err {
            ExecError::CommandFailed { message } => assert!(message.contains("broken")),
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_failure_falls_back_to_stdout() {
        let err = run("sh -c 'echo visible; exit 1'").unwrap_err();
        match err {
            ExecError::CommandFailed { message } => assert!(message.contains("visible")),
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let start = Instant::now();
        let err = ShellExecutor::new()
            .execute("sleep 30", &BTreeMap::new(), dir.path(), 1, &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { seconds: 1 }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_execute_env_is_passed() {
        let dir = TempDir::new().unwrap();
        let mut env = BTreeMap::new();
        env.insert("UPLOCK_TEST_VALUE".to_string(), "marker".to_string());
        let output = ShellExecutor::new()
            .execute(
                "printf \"$UPLOCK_TEST_VALUE\"",
                &env,
                dir.path(),
                0,
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output), "marker");
    }

    #[test]
    fn test_closure_implements_executor() {
        let executor = |commands: &str,
                        _env: &BTreeMap<String, String>,
                        _dir: &Path,
                        _timeout: u64,
                        _replacements: &HashMap<String, String>|
         -> Result<Vec<u8>, ExecError> { Ok(commands.as_bytes().to_vec()) };
        let output = executor
            .execute("noop", &BTreeMap::new(), Path::new("."), 0, &HashMap::new())
            .unwrap();
        assert_eq!(output, b"noop");
    }
}
