//! The safe-mode decision for one tool call.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;

use super::config::PermissionConfig;
use super::decision::PermissionResult;
use super::format::{
    format_ambiguous_write_message, format_api_message, format_bash_rejection_message,
    format_blocked_tool_message, format_missing_command_message, format_namespaced_tool_message,
    format_session_tool_message,
};
use super::modes::PermissionMode;
use super::tool_kind::{SESSION_READ_ONLY_TOOLS, ToolKind};
use super::write_target::{
    FolderException, WriteTargets, bash_write_targets, escaped_quote_targets, looks_like_write,
    powershell_targets,
};
use crate::security::bash::{BashValidator, normalize_windows_paths, promote_partial_fail};
use crate::security::ParseError;
use crate::security::path::Platform;
use crate::security::pattern::CompiledPattern;
use crate::security::powershell::{
    PowerShellParser, PowerShellValidator, PsNode, launches_powershell, looks_like_powershell,
    needs_powershell_parser, unwrap_powershell_command,
};
use crate::security::verdict::{OperatorKind, RejectionReason, Verdict};

/// `cmd.exe` syntax the bash grammar cannot represent faithfully.
static BATCH_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)(?:%[a-z_][a-z0-9_]*%|%%[a-z]\b|^\s*@?echo\s+off\b|^\s*cmd(?:\.exe)?\s+/[ck]\b|\bif\s+(?:not\s+)?exist\b|\bfor\s+/[fdlr]\b)",
    )
    .expect("valid regex")
});

/// Per-call context that is not part of the permission configuration.
#[derive(Clone, Default)]
pub struct ToolCheckOptions {
    pub plans_folder: Option<String>,
    pub data_folder: Option<String>,
    /// Directory relative paths are resolved against.
    pub cwd: Option<String>,
    pub platform: Platform,
    pub powershell: Option<Arc<dyn PowerShellParser>>,
}

impl fmt::Debug for ToolCheckOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCheckOptions")
            .field("plans_folder", &self.plans_folder)
            .field("data_folder", &self.data_folder)
            .field("cwd", &self.cwd)
            .field("platform", &self.platform)
            .field("powershell", &self.powershell.is_some())
            .finish()
    }
}

impl ToolCheckOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plans_folder(mut self, folder: impl AsRef<Path>) -> Self {
        self.plans_folder = Some(folder.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn data_folder(mut self, folder: impl AsRef<Path>) -> Self {
        self.data_folder = Some(folder.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn powershell(mut self, parser: Arc<dyn PowerShellParser>) -> Self {
        self.powershell = Some(parser);
        self
    }

    fn powershell_parser(&self) -> Option<&dyn PowerShellParser> {
        self.powershell
            .as_deref()
            .filter(|parser| parser.is_available())
    }
}

/// Decides whether `tool_name` may run with `input` in `mode`.
///
/// Only [`PermissionMode::Safe`] restricts anything here. In `Ask` mode the
/// caller's approval flow does the asking; `AllowAll` skips all checks.
pub fn should_allow_tool_in_mode(
    tool_name: &str,
    input: &Value,
    mode: PermissionMode,
    config: &PermissionConfig,
    options: &ToolCheckOptions,
) -> PermissionResult {
    match mode {
        PermissionMode::AllowAll => {
            return PermissionResult::allowed("allow-all mode: no checks").with_tool(tool_name);
        }
        PermissionMode::Ask => {
            return PermissionResult::allowed("ask mode: confirmation happens in the approval flow")
                .with_tool(tool_name);
        }
        PermissionMode::Safe => {}
    }

    let kind = ToolKind::classify(tool_name, input);
    let check = SafeModeCheck::new(config, options);
    let result = match kind {
        ToolKind::ReadOnly => PermissionResult::allowed("read-only tool"),
        ToolKind::Shell { command: None } => {
            PermissionResult::denied(format_missing_command_message(tool_name, config))
        }
        ToolKind::Shell {
            command: Some(command),
        } => check.shell(command),
        ToolKind::StructuredWrite { path } => match path {
            Some(path) if check.exception.permits(path) => {
                PermissionResult::allowed("write inside an allowed folder")
            }
            _ => PermissionResult::denied(format_blocked_tool_message(tool_name, path, config)),
        },
        ToolKind::Admin => PermissionResult::allowed("agent administration tool"),
        ToolKind::Session { tool } => {
            if SESSION_READ_ONLY_TOOLS.contains(&tool) {
                PermissionResult::allowed("read-only session tool")
            } else {
                PermissionResult::denied(format_session_tool_message(tool, config))
            }
        }
        ToolKind::Api { method, path } => {
            if method.eq_ignore_ascii_case("GET") {
                PermissionResult::allowed("GET request")
            } else if path.is_some_and(|path| config.allows_endpoint(method, path)) {
                PermissionResult::allowed("allowlisted endpoint")
            } else {
                PermissionResult::denied(format_api_message(method, path, config))
            }
        }
        ToolKind::Namespaced { tool } => {
            if config.read_only_mcp_patterns.iter().any(|p| p.is_match(tool)) {
                PermissionResult::allowed("read-only tool name")
            } else {
                PermissionResult::denied(format_namespaced_tool_message(tool_name, config))
            }
        }
        // Unknown tools pass. Callers wanting fail-closed behaviour should
        // register them as namespaced tools.
        ToolKind::Unrecognized => PermissionResult::allowed("unrecognized tool"),
    };

    tracing::debug!(
        tool = tool_name,
        kind = kind.label(),
        allowed = result.is_allowed(),
        "safe mode decision"
    );
    result.with_tool(tool_name)
}

struct SafeModeCheck<'a> {
    config: &'a PermissionConfig,
    options: &'a ToolCheckOptions,
    exception: FolderException<'a>,
}

impl<'a> SafeModeCheck<'a> {
    fn new(config: &'a PermissionConfig, options: &'a ToolCheckOptions) -> Self {
        let folders = options
            .plans_folder
            .iter()
            .chain(options.data_folder.iter());
        Self {
            config,
            options,
            exception: FolderException::new(
                folders,
                &config.allowed_write_paths,
                options.cwd.as_deref(),
                options.platform,
            ),
        }
    }

    fn shell(&self, command: &str) -> PermissionResult {
        if let Some(position) = command.find('\0') {
            return self.deny(RejectionReason::ControlChar { code: 0, position }, false);
        }

        let script: Option<Cow<'_, str>> = if launches_powershell(command) {
            match unwrap_powershell_command(command) {
                Some(script) => Some(Cow::Owned(script)),
                None => {
                    return self.deny(
                        RejectionReason::parse_error(
                            "PowerShell launch whose script cannot be inspected (-EncodedCommand or -File)",
                        ),
                        false,
                    );
                }
            }
        } else if looks_like_powershell(command) {
            Some(Cow::Borrowed(command))
        } else {
            None
        };

        if let Some(script) = &script
            && let Some(parser) = self.options.powershell_parser()
        {
            let validator = PowerShellValidator::new(parser).unknown_nodes(self.config.unknown_nodes);
            match validator.parse(script) {
                Ok(tree) => return self.powershell(command, &validator, &tree),
                Err(ParseError::Unavailable) => {
                    tracing::debug!("PowerShell parser unavailable, validating as bash");
                }
                Err(err) => return self.deny(RejectionReason::parse_error(err.to_string()), false),
            }
        }

        if let Some(script) = &script
            && needs_powershell_parser(script)
        {
            return self.deny(
                RejectionReason::parse_error(
                    "PowerShell script blocks, subexpressions and statement operators need a PowerShell parser",
                ),
                false,
            );
        }

        self.bash(command, script.as_deref().unwrap_or(command))
    }

    fn bash(&self, original: &str, command: &str) -> PermissionResult {
        let platform = self.options.platform;
        if platform.is_windows() && BATCH_SYNTAX.is_match(command) {
            return self.deny(
                RejectionReason::parse_error(
                    "Windows batch syntax (%VAR%, cmd /c, if exist, for /f) cannot be analysed",
                ),
                false,
            );
        }

        let text = if platform.is_windows() {
            Cow::Owned(normalize_windows_paths(command))
        } else {
            Cow::Borrowed(command)
        };

        let verdict = BashValidator::new()
            .unknown_nodes(self.config.unknown_nodes)
            .validate(&text, &self.config.read_only_bash_patterns);
        self.settle(original, &text, verdict, |patterns| {
            bash_write_targets(&text, patterns)
        })
    }

    fn powershell(
        &self,
        original: &str,
        validator: &PowerShellValidator<'_>,
        tree: &PsNode,
    ) -> PermissionResult {
        let verdict = validator.validate_tree(tree, &self.config.read_only_bash_patterns);
        self.settle(original, original, verdict, |patterns| {
            powershell_targets(tree, patterns)
        })
    }

    /// Turns a verdict into a result, applying the folder exception to
    /// denied writes.
    fn settle(
        &self,
        original: &str,
        text: &str,
        verdict: Verdict,
        targets: impl FnOnce(&[CompiledPattern]) -> WriteTargets,
    ) -> PermissionResult {
        let Some(reason) = promote_partial_fail(verdict) else {
            return PermissionResult::allowed("read-only command");
        };

        let writes = looks_like_write(original) || looks_like_write(text);
        if !writes || !exception_may_apply(&reason) {
            return self.deny(reason, false);
        }

        let mut found = targets(&self.config.read_only_bash_patterns);
        if found.paths.is_empty() && original.contains("\\\"") {
            found = escaped_quote_targets(original);
        }

        if found.eligible && self.exception.permits_all(&found.paths) {
            tracing::debug!(targets = ?found.paths, "write allowed by folder exception");
            return PermissionResult::allowed("write inside an allowed folder");
        }
        self.deny(reason, found.paths.is_empty())
    }

    fn deny(&self, reason: RejectionReason, ambiguous_write: bool) -> PermissionResult {
        let message = if ambiguous_write {
            format_ambiguous_write_message(&reason, self.config)
        } else {
            format_bash_rejection_message(&reason, self.config)
        };
        PermissionResult::denied(message).with_rejection(reason)
    }
}

/// Denials a write to an allowed folder can override. Substitutions,
/// backgrounding and unparseable input never qualify.
fn exception_may_apply(reason: &RejectionReason) -> bool {
    match reason {
        RejectionReason::NoSafePattern { .. } | RejectionReason::CompoundPartialFail { .. } => true,
        RejectionReason::DangerousOperator { kind, .. } => *kind == OperatorKind::Redirect,
        RejectionReason::ControlChar { .. }
        | RejectionReason::DangerousSubstitution { .. }
        | RejectionReason::ParseError { .. }
        | RejectionReason::UnsafeArgument { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::permissions::config::RawPermissionConfig;

    fn config() -> PermissionConfig {
        let raw = RawPermissionConfig::from_json(
            r#"{
                "readOnlyBashPatterns": [
                    { "pattern": "^git\\s+(status|log|diff)\\b", "comment": "git: status, log, diff" },
                    "^ls\\b",
                    "^cat\\b",
                    "^echo\\b",
                    "(?i)^Get-ChildItem\\b"
                ],
                "readOnlyMcpPatterns": ["^(list|get)_"],
                "allowedApiEndpoints": [{ "method": "POST", "path": "^/search$" }],
                "allowedWritePaths": ["/tmp/scratch/**"]
            }"#,
        )
        .unwrap();
        let compiled = raw.compile_for(Platform::Posix);
        assert!(compiled.is_clean());
        compiled.config
    }

    fn options() -> ToolCheckOptions {
        ToolCheckOptions::new()
            .plans_folder("/work/.agent/plans")
            .data_folder("/work/.agent/data")
            .cwd("/work")
            .platform(Platform::Posix)
    }

    fn check(tool: &str, input: Value) -> PermissionResult {
        should_allow_tool_in_mode(tool, &input, PermissionMode::Safe, &config(), &options())
    }

    fn bash(command: &str) -> PermissionResult {
        check("Bash", json!({ "command": command }))
    }

    #[test]
    fn test_non_safe_modes_allow_everything() {
        for mode in [PermissionMode::Ask, PermissionMode::AllowAll] {
            let result = should_allow_tool_in_mode(
                "Bash",
                &json!({ "command": "rm -rf /" }),
                mode,
                &config(),
                &options(),
            );
            assert!(result.is_allowed());
        }
    }

    #[test]
    fn test_shell_allowlist() {
        assert!(bash("git status && git log").is_allowed());
        let denied = bash("git status && git push");
        assert!(denied.is_denied());
        assert!(matches!(
            denied.rejection,
            Some(RejectionReason::CompoundPartialFail { .. })
        ));
        assert!(denied.reason.contains("`git push`"));
    }

    #[test]
    fn test_null_byte_rejected() {
        let result = bash("ls\0-la");
        assert!(matches!(
            result.rejection,
            Some(RejectionReason::ControlChar { code: 0, position: 2 })
        ));
    }

    #[test]
    fn test_redirect_into_plans_folder() {
        assert!(bash("echo '# Plan' > /work/.agent/plans/plan.md").is_allowed());
        assert!(bash("echo hi > .agent/PLANS/plan.md").is_allowed());
        assert!(bash("cat > /tmp/scratch/a.txt <<'EOF'\nhello\nEOF\n").is_allowed());
        assert!(bash("echo hi > /work/.agent/notes.md").is_denied());
        assert!(bash("echo hi > /work/.agent/plans/a.md && rm -rf /").is_denied());
        assert!(bash("echo $(id) > /work/.agent/plans/a.md").is_denied());
    }

    #[test]
    fn test_ambiguous_write_flagged() {
        let result = bash("echo hi > \"$OUT\"");
        assert!(result.is_denied());

        let result = bash("cp a b");
        assert!(result.is_denied());
        assert!(result.reason.contains("target path could not be determined"));
    }

    #[test]
    fn test_structured_writes() {
        assert!(check("Write", json!({ "file_path": "/work/.agent/plans/notes.md" })).is_allowed());
        assert!(check("Edit", json!({ "file_path": "/work/.agent/data/x.json" })).is_allowed());
        assert!(check("Write", json!({ "file_path": "/work/.agent/plans-old/x" })).is_denied());
        assert!(check("MultiEdit", json!({})).is_denied());
        assert!(
            check("NotebookEdit", json!({ "notebook_path": "/tmp/scratch/n.ipynb" })).is_allowed()
        );
    }

    #[test]
    fn test_namespaced_and_api_tools() {
        assert!(check("mcp__preferences__set_mode", json!({})).is_allowed());
        assert!(check("mcp__session__list_sessions", json!({})).is_allowed());
        assert!(check("mcp__session__delete_session", json!({})).is_denied());
        assert!(check("mcp__github__list_issues", json!({})).is_allowed());
        assert!(check("mcp__github__create_issue", json!({})).is_denied());
        assert!(check("api_linear", json!({ "path": "/issues" })).is_allowed());
        assert!(check("api_linear", json!({ "method": "POST", "path": "/search" })).is_allowed());
        assert!(check("api_linear", json!({ "method": "DELETE", "path": "/search" })).is_denied());
        assert!(check("Read", json!({})).is_allowed());
        assert!(check("SomethingNew", json!({})).is_allowed());
    }

    #[test]
    fn test_windows_batch_rejected() {
        let options = options().platform(Platform::Windows);
        for command in ["echo %PATH%", "cmd /c dir", "for /f %%a in (x) do echo %%a"] {
            let result = should_allow_tool_in_mode(
                "Bash",
                &json!({ "command": command }),
                PermissionMode::Safe,
                &config(),
                &options,
            );
            assert!(
                matches!(result.rejection, Some(RejectionReason::ParseError { .. })),
                "{command}"
            );
        }
    }

    #[test]
    fn test_windows_paths_normalized() {
        let options = ToolCheckOptions::new()
            .plans_folder(r"C:\Work\Plans")
            .platform(Platform::Windows);
        let allow = |command: &str| {
            should_allow_tool_in_mode(
                "Bash",
                &json!({ "command": command }),
                PermissionMode::Safe,
                &config(),
                &options,
            )
        };
        assert!(allow(r#"cat "C:\Users\me\file.txt""#).is_allowed());
        assert!(allow(r"echo hi > C:\work\plans\a.md").is_allowed());
        assert!(allow(r"echo hi > C:\work\other\a.md").is_denied());
    }

    #[test]
    fn test_powershell_falls_back_without_parser() {
        assert!(bash("Get-ChildItem -Recurse").is_allowed());
        assert!(bash(r#"pwsh -NoProfile -Command "Get-ChildItem src""#).is_allowed());
        assert!(bash("powershell -EncodedCommand ZQBjAGgAbwA=").is_denied());
    }

    #[test]
    fn test_powershell_syntax_without_parser_denied() {
        for command in [
            r#"pwsh -Command "Get-ChildItem | Where-Object {Remove-Item -Recurse -Force $_.FullName}""#,
            "Get-ChildItem | Where-Object {Remove-Item -Recurse -Force $_.FullName}",
            "ls | Where-Object {Remove-Item $_}",
            "Get-ChildItem -Path:$(Remove-Item -Recurse C:/)",
            "Get-ChildItem; Remove-Item x",
        ] {
            let result = bash(command);
            assert!(result.is_denied(), "{command}");
            assert!(
                matches!(result.rejection, Some(RejectionReason::ParseError { .. })),
                "{command}: {:?}",
                result.rejection
            );
        }
        assert!(bash("Get-ChildItem -Recurse src").is_allowed());
    }

    #[test]
    fn test_escaped_quote_fallback() {
        let options = ToolCheckOptions::new()
            .plans_folder(r"C:\work\plans")
            .platform(Platform::Windows);
        let result = should_allow_tool_in_mode(
            "Bash",
            &json!({ "command": r#"powershell -Command "Set-Content -Path \"C:\work\plans\a.md\" -Value hi""# }),
            PermissionMode::Safe,
            &config(),
            &options,
        );
        assert!(result.is_allowed(), "{}", result.reason);
    }
}
