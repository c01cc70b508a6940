//! Runs an approved shell command under a hard timeout.
//!
//! The permission check is repeated right before spawning, so a caller that
//! skipped it (or checked under a different mode) still cannot run a denied
//! command. Nothing here returns an error: denials, spawn failures and
//! timeouts all come back as an [`ExecuteResult`].

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::permissions::{
    PermissionConfig, PermissionConfigResolver, PermissionMode, PermissionsContext,
    ToolCheckOptions, should_allow_tool_in_mode,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);
/// Time a process gets to exit after SIGTERM before it is killed.
pub const KILL_GRACE: Duration = Duration::from_secs(2);
pub const MAX_OUTPUT_CHARS: usize = 30_000;
/// Bytes kept per stream: [`MAX_OUTPUT_CHARS`] characters of any UTF-8
/// text plus one more, so truncation is still detected.
const MAX_CAPTURE_BYTES: usize = (MAX_OUTPUT_CHARS + 1) * 4;

#[derive(Clone, Default)]
pub struct ExecuteOptions {
    /// Merged over the inherited environment.
    pub env: HashMap<String, String>,
    /// Clamped to [`MAX_TIMEOUT`]; [`DEFAULT_TIMEOUT`] when unset.
    pub timeout: Option<Duration>,
    pub cwd: Option<PathBuf>,
    pub permission_mode: PermissionMode,
    pub permissions_context: PermissionsContext,
    /// Source of the configuration for the re-check. The built-in
    /// allowlist is used when unset.
    pub resolver: Option<Arc<dyn PermissionConfigResolver>>,
    pub check_options: ToolCheckOptions,
}

impl fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("cwd", &self.cwd)
            .field("permission_mode", &self.permission_mode)
            .field("permissions_context", &self.permissions_context)
            .field("resolver", &self.resolver.is_some())
            .field("check_options", &self.check_options)
            .finish()
    }
}

impl ExecuteOptions {
    pub fn new(permission_mode: PermissionMode) -> Self {
        Self {
            permission_mode,
            ..Default::default()
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn context(mut self, context: PermissionsContext) -> Self {
        self.permissions_context = context;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn PermissionConfigResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn check_options(mut self, options: ToolCheckOptions) -> Self {
        self.check_options = options;
        self
    }

    fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT).min(MAX_TIMEOUT)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// The permission re-check denied the command; `stderr` holds the reason.
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecuteResult {
    fn blocked(reason: String) -> Self {
        Self {
            stderr: reason,
            blocked: true,
            ..Default::default()
        }
    }

    fn failed(stderr: String) -> Self {
        Self {
            stderr,
            ..Default::default()
        }
    }
}

/// Runs `command` through the platform shell.
pub async fn execute_command(command: &str, options: ExecuteOptions) -> ExecuteResult {
    if let Some(reason) = recheck_permission(command, &options) {
        return ExecuteResult::blocked(reason);
    }

    let limit = options.effective_timeout();
    let mut cmd = shell_command(command);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    cmd.envs(&options.env);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(error = %e, "failed to spawn shell");
            return ExecuteResult::failed(format!("Failed to spawn shell: {e}"));
        }
    };

    let stdout = child.stdout.take().map(Capture::spawn);
    let stderr = child.stderr.take().map(Capture::spawn);

    let (status, timed_out) = match timeout(limit, child.wait()).await {
        Ok(Ok(status)) => (Some(status), false),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to wait for shell");
            terminate(&mut child).await;
            (None, false)
        }
        Err(_) => {
            tracing::warn!(timeout_secs = limit.as_secs_f64(), "command timed out, terminating");
            terminate(&mut child).await;
            (None, true)
        }
    };

    let stdout = collect(stdout).await;
    let mut stderr = collect(stderr).await;
    if timed_out {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "Command timed out after {} seconds",
            limit.as_secs_f64()
        ));
    }

    let exit_code = status.and_then(|s| s.code());
    ExecuteResult {
        success: !timed_out && status.is_some_and(|s| s.success()),
        stdout: truncate_output(stdout),
        stderr: truncate_output(stderr),
        blocked: false,
        exit_code,
        timed_out,
    }
}

/// The denial message when the command may not run in the current mode.
fn recheck_permission(command: &str, options: &ExecuteOptions) -> Option<String> {
    if options.permission_mode.allows_all() {
        tracing::warn!(
            session_id = options.permissions_context.session_id.as_deref().unwrap_or(""),
            "allow-all mode: executing command without permission checks"
        );
        return None;
    }

    let config = match &options.resolver {
        Some(resolver) => resolver.resolve(&options.permissions_context),
        None => Arc::new(PermissionConfig::default()),
    };
    let mut check_options = options.check_options.clone();
    if check_options.cwd.is_none()
        && let Some(cwd) = &options.cwd
    {
        check_options = check_options.cwd(cwd);
    }

    let input = serde_json::json!({ "command": command });
    let result = should_allow_tool_in_mode(
        "Bash",
        &input,
        options.permission_mode,
        &config,
        &check_options,
    );
    if !result.is_allowed() {
        tracing::debug!(mode = %options.permission_mode, "execution blocked by permission re-check");
        return Some(result.reason);
    }
    if cfg!(windows)
        && let Some(construct) = cmd_reinterpreted(command)
    {
        tracing::debug!(construct, "execution blocked: cmd.exe would read the command differently");
        return Some(format!(
            "The command was checked with shell syntax, but cmd.exe gives {construct} a different \
             meaning, so it cannot run in {} mode.",
            options.permission_mode
        ));
    }
    None
}

/// Syntax that `cmd /C` treats differently from the shell grammar the
/// command was validated with: `%VAR%` expansion, `^` escapes, a lone `&`
/// separating commands, and pipes or redirects inside quoting cmd does not
/// recognize.
fn cmd_reinterpreted(command: &str) -> Option<&'static str> {
    if command.contains('%') {
        return Some("`%`");
    }
    if command.contains('^') {
        return Some("`^`");
    }
    let bytes = command.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'&' {
            if bytes.get(i + 1) == Some(&b'&') {
                i += 2;
                continue;
            }
            let duplicates_fd = i > 0 && matches!(bytes[i - 1], b'>' | b'<');
            if !duplicates_fd {
                return Some("a lone `&`");
            }
        }
        i += 1;
    }
    if (command.contains('\'') || command.contains("\\\""))
        && command.contains(['|', '<', '>'])
    {
        return Some("quoted `|`, `<` or `>`");
    }
    None
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Output read from one pipe. The buffer is shared with the reader task so
/// that whatever was read survives the task being abandoned.
struct Capture {
    bytes: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Capture {
    /// Reads `reader` to the end, keeping at most [`MAX_CAPTURE_BYTES`].
    /// The rest is drained so the child never blocks on a full pipe.
    fn spawn<R>(mut reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&bytes);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let mut kept = sink.lock().await;
                        let room = MAX_CAPTURE_BYTES.saturating_sub(kept.len());
                        kept.extend_from_slice(&chunk[..n.min(room)]);
                    }
                }
            }
        });
        Self { bytes, task }
    }
}

/// Output of a reader task. A descendant that left the process group can
/// keep the pipe open forever, so this gives up after the grace period and
/// returns what was read until then.
async fn collect(capture: Option<Capture>) -> String {
    let Some(Capture { bytes, mut task }) = capture else {
        return String::new();
    };
    if timeout(KILL_GRACE, &mut task).await.is_err() {
        tracing::debug!("output pipe still open after grace period, keeping partial output");
        task.abort();
    }
    let bytes = bytes.lock().await;
    String::from_utf8_lossy(&bytes).into_owned()
}

/// SIGTERM to the whole process group, then SIGKILL if it is still alive
/// after [`KILL_GRACE`].
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    let group = child
        .id()
        .and_then(|id| i32::try_from(id).ok())
        .and_then(rustix::process::Pid::from_raw);

    #[cfg(unix)]
    if let Some(pid) = group {
        let _ = rustix::process::kill_process_group(pid, rustix::process::Signal::TERM);
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    if timeout(KILL_GRACE, child.wait()).await.is_ok() {
        return;
    }

    tracing::warn!("process survived SIGTERM, killing");
    #[cfg(unix)]
    if let Some(pid) = group {
        let _ = rustix::process::kill_process_group(pid, rustix::process::Signal::KILL);
    }
    let _ = child.kill().await;
}

fn truncate_output(text: String) -> String {
    match text.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((idx, _)) => {
            let mut truncated = text[..idx].to_string();
            truncated.push_str("\n... (output truncated)");
            truncated
        }
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn allow_all() -> ExecuteOptions {
        ExecuteOptions::new(PermissionMode::AllowAll)
    }

    #[test]
    fn test_timeout_is_clamped() {
        assert_eq!(allow_all().effective_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(
            allow_all().timeout(Duration::from_secs(3600)).effective_timeout(),
            MAX_TIMEOUT
        );
    }

    #[test]
    fn test_truncate_output() {
        let short = "hello".to_string();
        assert_eq!(truncate_output(short.clone()), short);

        let long = "é".repeat(MAX_OUTPUT_CHARS + 10);
        let truncated = truncate_output(long);
        assert!(truncated.ends_with("(output truncated)"));
        assert_eq!(
            truncated.chars().filter(|c| *c == 'é').count(),
            MAX_OUTPUT_CHARS
        );
    }

    #[test]
    fn test_cmd_reinterpretation() {
        for command in [
            "echo %PATH%",
            "echo a^&b",
            "git status & del x",
            "cat 'a & b'",
            "grep 'x|del /q C:/' notes.txt",
            r#"grep "a\" | del x | \"b" notes.txt"#,
            "ls &> out",
        ] {
            assert!(cmd_reinterpreted(command).is_some(), "{command}");
        }
        for command in [
            "git status && git log",
            "git log 2>&1",
            "dir | findstr todo",
            "type \"notes.txt\"",
        ] {
            assert_eq!(cmd_reinterpreted(command), None, "{command}");
        }
    }

    #[tokio::test]
    async fn test_capture_is_bounded() {
        let noisy = std::io::Cursor::new(vec![b'a'; MAX_CAPTURE_BYTES * 3]);
        let capture = Capture::spawn(noisy);
        let text = collect(Some(capture)).await;
        assert_eq!(text.len(), MAX_CAPTURE_BYTES);
        assert!(truncate_output(text).ends_with("(output truncated)"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_command() {
        let result = execute_command("echo hello", allow_all()).await;
        assert!(result.success);
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.blocked);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit() {
        let result = execute_command("echo oops >&2; exit 3", allow_all()).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let options = allow_all().env("SAFE_MODE_TEST_VAR", "42").cwd(dir.path());
        let result = execute_command("echo $SAFE_MODE_TEST_VAR; pwd", options).await;
        let mut lines = result.stdout.lines();
        assert_eq!(lines.next(), Some("42"));
        let cwd = lines.next().unwrap();
        assert!(cwd.ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_safe_mode_blocks_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let command = format!("touch {}", marker.display());
        let result = execute_command(&command, ExecuteOptions::new(PermissionMode::Safe)).await;
        assert!(result.blocked);
        assert!(!result.success);
        assert!(result.stderr.contains("Explore"));
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_safe_mode_runs_read_only() {
        let result = execute_command("echo fine", ExecuteOptions::new(PermissionMode::Safe)).await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.stdout.trim(), "fine");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process_ignoring_term() {
        let options = allow_all().timeout(Duration::from_millis(300));
        let started = Instant::now();
        let result = execute_command("trap '' TERM; sleep 30", options).await;
        assert!(result.timed_out);
        assert!(!result.success);
        assert!(result.stderr.contains("timed out"));
        assert!(started.elapsed() < Duration::from_millis(300) + KILL_GRACE * 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_kept_when_pipe_outlives_shell() {
        let started = Instant::now();
        let result = execute_command("echo partial; sleep 10 &", allow_all()).await;
        assert_eq!(result.stdout.trim(), "partial");
        assert!(started.elapsed() < KILL_GRACE * 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_truncated() {
        let command = format!("head -c {} /dev/zero | tr '\\0' a", MAX_OUTPUT_CHARS + 500);
        let result = execute_command(&command, allow_all()).await;
        assert!(result.success);
        assert!(result.stdout.ends_with("(output truncated)"));
    }
}
