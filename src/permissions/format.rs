//! User-facing explanations for safe-mode denials.
//!
//! Every message names the construct that was refused, says what could go
//! wrong, and ends with how to leave safe mode. Allowlist misses also point
//! at the configuration and, when available, at why the closest pattern
//! did not match.

use std::fmt::Write as _;

use super::config::PermissionConfig;
use crate::security::verdict::{
    MismatchAnalysis, OperatorKind, PatternSummary, RejectionReason, SubstitutionKind,
};

/// Patterns listed under an allowlist miss.
const MAX_LISTED_PATTERNS: usize = 3;

/// Explains why a shell command was denied.
pub fn format_bash_rejection_message(reason: &RejectionReason, config: &PermissionConfig) -> String {
    bash_rejection(reason, config, false)
}

/// Like [`format_bash_rejection_message`], for a denial that looks like a
/// file write but names no file that could be checked against the allowed
/// folders.
pub fn format_ambiguous_write_message(reason: &RejectionReason, config: &PermissionConfig) -> String {
    bash_rejection(reason, config, true)
}

fn bash_rejection(reason: &RejectionReason, config: &PermissionConfig, ambiguous_write: bool) -> String {
    let mut message = match reason {
        RejectionReason::ControlChar { code, position } => format!(
            "The command contains control character U+{code:04X} at position {position}. \
             Control characters can hide what a command really does."
        ),
        RejectionReason::NoSafePattern {
            command,
            relevant_patterns,
            mismatch,
        } => {
            let mut message = format!(
                "`{command}` is not in the read-only allowlist. Only commands matching a \
                 read-only pattern run in {} mode, because anything else may change files \
                 or system state.",
                config.display_name
            );
            push_patterns(&mut message, relevant_patterns);
            if let Some(mismatch) = mismatch {
                push_mismatch(&mut message, mismatch);
            }
            push_guidance(&mut message, config);
            message
        }
        RejectionReason::DangerousOperator {
            kind,
            operator,
            target,
        } => operator_message(*kind, operator, target.as_deref()),
        RejectionReason::DangerousSubstitution { kind, pattern } => {
            substitution_message(*kind, pattern)
        }
        RejectionReason::ParseError { message } => format!(
            "The command could not be analysed ({message}). Commands whose structure cannot \
             be checked are not run in {} mode.",
            config.display_name
        ),
        RejectionReason::UnsafeArgument { command, argument } => format!(
            "`{command}` is read-only on its own, but `{argument}` makes it write files or \
             start another program, which is not allowed in {} mode.",
            config.display_name
        ),
        RejectionReason::CompoundPartialFail { failed, passed } => {
            let failed_texts: Vec<String> = failed.iter().map(|r| format!("`{}`", r.text)).collect();
            let mut message = format!(
                "Part of this compound command is not in the read-only allowlist: {}. \
                 Every part of a compound command runs, so every part must be read-only.",
                failed_texts.join(", ")
            );
            if !passed.is_empty() {
                let passed: Vec<String> = passed.iter().map(|t| format!("`{t}`")).collect();
                let _ = write!(message, "\nAllowed parts: {}.", passed.join(", "));
            }
            let first_miss = failed.iter().find_map(|r| match &r.reason {
                Some(RejectionReason::NoSafePattern {
                    relevant_patterns,
                    mismatch,
                    ..
                }) => Some((relevant_patterns, mismatch)),
                _ => None,
            });
            if let Some((patterns, mismatch)) = first_miss {
                push_patterns(&mut message, patterns);
                if let Some(mismatch) = mismatch {
                    push_mismatch(&mut message, mismatch);
                }
            }
            push_guidance(&mut message, config);
            message
        }
    };
    if ambiguous_write {
        message.push_str(
            "\nThis looks like a file write, but its target path could not be determined, \
             so the allowed-folder exception could not be applied. Write to an explicit \
             path with a plain redirect or use the Write tool.",
        );
    }
    push_mode_hint(&mut message, config);
    message
}

fn operator_message(kind: OperatorKind, operator: &str, target: Option<&str>) -> String {
    match kind {
        OperatorKind::Redirect => match target {
            Some(target) => format!(
                "Output redirect `{operator}` to `{target}` writes to a file, which is not \
                 allowed in read-only mode."
            ),
            None => format!(
                "Redirect `{operator}` writes to a file, which is not allowed in read-only mode."
            ),
        },
        OperatorKind::Background => format!(
            "Background operator `{operator}` runs the command out of sight, after the \
             permission check has returned."
        ),
        OperatorKind::Pipeline => format!(
            "Pipeline `{operator}` feeds output into dynamic evaluation, so what finally \
             runs cannot be checked in advance."
        ),
        OperatorKind::Assignment => match target {
            Some(target) => format!(
                "Assignment `{operator}` to `{target}` changes session state and can \
                 stage values for later execution."
            ),
            None => format!(
                "Assignment `{operator}` changes session state and can stage values for \
                 later execution."
            ),
        },
    }
}

fn substitution_message(kind: SubstitutionKind, pattern: &str) -> String {
    let risk = match kind {
        SubstitutionKind::Command | SubstitutionKind::Process => {
            "it runs another command whose effects cannot be checked before it executes"
        }
        SubstitutionKind::ScriptBlock => "the block can be executed by the receiving command",
        SubstitutionKind::DynamicEval => "the text it runs is only known at execution time",
        SubstitutionKind::DotSource => "it runs a script in the current scope",
        SubstitutionKind::MethodInvocation => {
            "a .NET method can do anything, including writing files"
        }
    };
    let mut label = kind.label().to_string();
    if let Some(first) = label.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    format!("{label} `{pattern}` is not allowed in read-only mode: {risk}.")
}

fn push_patterns(message: &mut String, patterns: &[PatternSummary]) {
    if patterns.is_empty() {
        return;
    }
    message.push_str("\nRelated allowlist patterns:");
    for pattern in patterns.iter().take(MAX_LISTED_PATTERNS) {
        let _ = write!(message, "\n  - `{}`", pattern.source);
        if let Some(comment) = &pattern.comment {
            let _ = write!(message, " ({comment})");
        }
    }
    if patterns.len() > MAX_LISTED_PATTERNS {
        let _ = write!(message, "\n  - ... and {} more", patterns.len() - MAX_LISTED_PATTERNS);
    }
}

fn push_mismatch(message: &mut String, mismatch: &MismatchAnalysis) {
    let _ = write!(
        message,
        "\nClosest pattern `{}` matched `{}` and stopped at `{}` (position {}).",
        mismatch.best_match_pattern,
        mismatch.matched_prefix,
        mismatch.failed_token,
        mismatch.failed_at_position
    );
    if let Some(suggestion) = &mismatch.suggestion {
        let _ = write!(message, "\nSuggestion: {suggestion}");
    }
    if let Some(comment) = &mismatch.pattern_comment {
        let _ = write!(message, "\nPattern note: {comment}");
    }
}

fn push_guidance(message: &mut String, config: &PermissionConfig) {
    if let Some(file) = &config.guidance.config_file {
        let _ = write!(
            message,
            "\nIf this command is read-only, add a pattern for it to {file}."
        );
    }
    if let Some(docs) = &config.guidance.docs_path {
        let _ = write!(message, "\nSee {docs} for the pattern format.");
    }
}

fn push_mode_hint(message: &mut String, config: &PermissionConfig) {
    let _ = write!(
        message,
        "\nTo run it anyway, switch out of {} mode with {}.",
        config.display_name, config.shortcut_hint
    );
}

/// Denial for a whole-file write/edit tool outside the allowed folders.
pub fn format_blocked_tool_message(
    tool_name: &str,
    path: Option<&str>,
    config: &PermissionConfig,
) -> String {
    let mut message = match path {
        Some(path) => format!(
            "`{tool_name}` on `{path}` is blocked: {} mode is read-only and this path is \
             outside the plans/data folders and allowed write paths.",
            config.display_name
        ),
        None => format!(
            "`{tool_name}` is blocked: {} mode is read-only and the call names no file path \
             that could be checked against the allowed folders.",
            config.display_name
        ),
    };
    push_mode_hint(&mut message, config);
    message
}

/// Denial for a session tool that changes session state.
pub fn format_session_tool_message(tool: &str, config: &PermissionConfig) -> String {
    let mut message = format!(
        "Session tool `{tool}` changes session state, which is not allowed in {} mode.",
        config.display_name
    );
    push_mode_hint(&mut message, config);
    message
}

/// Denial for an API call whose method and path are not allowlisted.
pub fn format_api_message(method: &str, path: Option<&str>, config: &PermissionConfig) -> String {
    let target = path.unwrap_or("(no path)");
    let mut message = format!(
        "API call `{} {target}` is not allowed: only GET requests and allowlisted endpoints \
         run in {} mode, because other methods can change remote data.",
        method.to_ascii_uppercase(),
        config.display_name
    );
    push_guidance(&mut message, config);
    push_mode_hint(&mut message, config);
    message
}

/// Denial for a namespaced tool whose name is not on the read-only list.
pub fn format_namespaced_tool_message(tool_name: &str, config: &PermissionConfig) -> String {
    let mut message = format!(
        "Tool `{tool_name}` is not in the read-only tool allowlist and may change data, so \
         it does not run in {} mode.",
        config.display_name
    );
    push_guidance(&mut message, config);
    push_mode_hint(&mut message, config);
    message
}

/// Denial for a shell tool call without a command.
pub fn format_missing_command_message(tool_name: &str, config: &PermissionConfig) -> String {
    let mut message =
        format!("`{tool_name}` was called without a `command`, so there is nothing to check.");
    push_mode_hint(&mut message, config);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::config::GuidancePaths;
    use crate::security::verdict::SubcommandResult;

    fn config() -> PermissionConfig {
        PermissionConfig {
            guidance: GuidancePaths {
                config_file: Some("~/.agent/permissions.json".into()),
                docs_path: Some("docs/permissions.md".into()),
            },
            ..PermissionConfig::default()
        }
    }

    fn assert_hint(message: &str) {
        assert!(
            message.ends_with("switch out of Explore mode with SHIFT+TAB."),
            "{message}"
        );
    }

    #[test]
    fn test_every_reason_has_hint() {
        let reasons = [
            RejectionReason::ControlChar { code: 7, position: 3 },
            RejectionReason::parse_error("unexpected token"),
            RejectionReason::substitution(SubstitutionKind::Command, "$()"),
            RejectionReason::operator(OperatorKind::Background, "&"),
            RejectionReason::DangerousOperator {
                kind: OperatorKind::Redirect,
                operator: ">".into(),
                target: Some("out.txt".into()),
            },
            RejectionReason::UnsafeArgument {
                command: "rg --pre=/tmp/x TODO".into(),
                argument: "--pre=/tmp/x".into(),
            },
        ];
        for reason in &reasons {
            assert_hint(&format_bash_rejection_message(reason, &config()));
        }
    }

    #[test]
    fn test_construct_is_named() {
        let message = format_bash_rejection_message(
            &RejectionReason::substitution(SubstitutionKind::Command, "$()"),
            &config(),
        );
        assert!(message.starts_with("Command substitution `$()`"));

        let message = format_bash_rejection_message(
            &RejectionReason::DangerousOperator {
                kind: OperatorKind::Redirect,
                operator: ">>".into(),
                target: Some("log.txt".into()),
            },
            &config(),
        );
        assert!(message.contains("`>>` to `log.txt`"));

        let message = format_bash_rejection_message(
            &RejectionReason::ControlChar { code: 0x1b, position: 4 },
            &config(),
        );
        assert!(message.contains("U+001B"));

        let message = format_bash_rejection_message(
            &RejectionReason::UnsafeArgument {
                command: "git diff --output=notes".into(),
                argument: "--output=notes".into(),
            },
            &config(),
        );
        assert!(message.starts_with("`git diff --output=notes` is read-only on its own"));
        assert!(message.contains("`--output=notes`"));
    }

    #[test]
    fn test_allowlist_miss_details() {
        let reason = RejectionReason::NoSafePattern {
            command: "git push".into(),
            relevant_patterns: vec![PatternSummary {
                source: r"^git\s+(status|log)\b".into(),
                comment: Some("git: status, log".into()),
            }],
            mismatch: Some(MismatchAnalysis {
                matched_prefix: "git ".into(),
                failed_at_position: 4,
                failed_token: "push".into(),
                best_match_pattern: r"^git\s+(status|log)\b".into(),
                pattern_comment: Some("git: status, log".into()),
                suggestion: None,
            }),
        };
        let message = format_bash_rejection_message(&reason, &config());
        assert!(message.starts_with("`git push` is not in the read-only allowlist"));
        assert!(message.contains("(git: status, log)"));
        assert!(message.contains("stopped at `push` (position 4)"));
        assert!(message.contains("~/.agent/permissions.json"));
        assert!(message.contains("docs/permissions.md"));
        assert_hint(&message);
    }

    #[test]
    fn test_guidance_only_when_configured() {
        let reason = RejectionReason::NoSafePattern {
            command: "make".into(),
            relevant_patterns: Vec::new(),
            mismatch: None,
        };
        let message = format_bash_rejection_message(&reason, &PermissionConfig::default());
        assert!(!message.contains("add a pattern"));
        assert!(!message.contains("Related allowlist patterns"));
    }

    #[test]
    fn test_partial_fail_lists_parts() {
        let reason = RejectionReason::CompoundPartialFail {
            failed: vec![SubcommandResult {
                text: "git push".into(),
                allowed: false,
                reason: Some(RejectionReason::NoSafePattern {
                    command: "git push".into(),
                    relevant_patterns: Vec::new(),
                    mismatch: None,
                }),
            }],
            passed: vec!["git status".into()],
        };
        let message = format_bash_rejection_message(&reason, &config());
        assert!(message.contains("`git push`"));
        assert!(message.contains("Allowed parts: `git status`."));
        assert_hint(&message);
    }

    #[test]
    fn test_tool_messages() {
        let config = config();
        assert_hint(&format_blocked_tool_message("Write", Some("/etc/hosts"), &config));
        assert_hint(&format_session_tool_message("delete_session", &config));
        assert!(format_api_message("post", Some("/v1/items"), &config).contains("`POST /v1/items`"));
        assert_hint(&format_namespaced_tool_message("mcp__x__create", &config));

        let message = format_ambiguous_write_message(
            &RejectionReason::operator(OperatorKind::Redirect, ">"),
            &config,
        );
        assert!(message.contains("target path could not be determined"));
        assert_hint(&message);
    }
}
