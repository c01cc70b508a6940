//! Verdicts and rejection reasons produced by the shell validators.

use serde::{Deserialize, Serialize};

/// Shell operator class that is denied in read-only mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    /// Output piped into dynamic evaluation (`... | Invoke-Expression`).
    Pipeline,
    /// Output-mutating redirect (`>`, `>>`, `>|`, here-doc).
    Redirect,
    /// Backgrounded execution (`&`, `Start-Job`, PowerShell `&` suffix).
    Background,
    /// Variable assignment (PowerShell `$x = ...`).
    Assignment,
}

impl OperatorKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Redirect => "redirect",
            Self::Background => "background",
            Self::Assignment => "assignment",
        }
    }
}

/// Construct that runs code while the surrounding command is evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstitutionKind {
    /// `$(...)`, backticks, PowerShell `$(...)` subexpressions.
    Command,
    /// `<(...)` / `>(...)`.
    Process,
    /// PowerShell `{ ... }` literal handed to another command.
    ScriptBlock,
    /// `Invoke-Expression` / `iex` / `&` on a computed name.
    DynamicEval,
    /// PowerShell `. ./script.ps1`.
    DotSource,
    /// PowerShell `.NET` member invocation such as `[IO.File]::Delete(...)`.
    MethodInvocation,
}

impl SubstitutionKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Command => "command substitution",
            Self::Process => "process substitution",
            Self::ScriptBlock => "script block",
            Self::DynamicEval => "dynamic expression evaluation",
            Self::DotSource => "dot-sourcing",
            Self::MethodInvocation => ".NET method invocation",
        }
    }
}

/// Pattern text shown to the user when an allowlist miss is explained.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Why the longest-matching allowlist pattern stopped matching.
///
/// Advisory only; never feeds back into the allow/deny decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchAnalysis {
    pub matched_prefix: String,
    pub failed_at_position: usize,
    pub failed_token: String,
    pub best_match_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Per-subcommand outcome recorded while walking a compound command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcommandResult {
    pub text: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectionReason>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RejectionReason {
    ControlChar {
        code: u32,
        position: usize,
    },
    NoSafePattern {
        command: String,
        relevant_patterns: Vec<PatternSummary>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mismatch: Option<MismatchAnalysis>,
    },
    DangerousOperator {
        kind: OperatorKind,
        operator: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    DangerousSubstitution {
        kind: SubstitutionKind,
        pattern: String,
    },
    ParseError {
        message: String,
    },
    /// Allowlisted command given an option that writes files or runs
    /// another program, e.g. `git diff --output=FILE`.
    UnsafeArgument {
        command: String,
        argument: String,
    },
    CompoundPartialFail {
        failed: Vec<SubcommandResult>,
        passed: Vec<String>,
    },
}

impl RejectionReason {
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
        }
    }

    pub fn substitution(kind: SubstitutionKind, pattern: impl Into<String>) -> Self {
        Self::DangerousSubstitution {
            kind,
            pattern: pattern.into(),
        }
    }

    pub fn operator(kind: OperatorKind, operator: impl Into<String>) -> Self {
        Self::DangerousOperator {
            kind,
            operator: operator.into(),
            target: None,
        }
    }

    /// Stable snake_case tag, identical to the serialized `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ControlChar { .. } => "control_char",
            Self::NoSafePattern { .. } => "no_safe_pattern",
            Self::DangerousOperator { .. } => "dangerous_operator",
            Self::DangerousSubstitution { .. } => "dangerous_substitution",
            Self::ParseError { .. } => "parse_error",
            Self::UnsafeArgument { .. } => "unsafe_argument",
            Self::CompoundPartialFail { .. } => "compound_partial_fail",
        }
    }

    /// Whether the denial is only an allowlist miss, i.e. the command shape
    /// itself was acceptable.
    pub fn is_allowlist_miss(&self) -> bool {
        matches!(
            self,
            Self::NoSafePattern { .. } | Self::CompoundPartialFail { .. }
        )
    }
}

/// Result of validating one command.
///
/// A reason is present exactly when the command is denied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<RejectionReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    subcommand_results: Vec<SubcommandResult>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            subcommand_results: Vec::new(),
        }
    }

    pub fn deny(reason: RejectionReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            subcommand_results: Vec::new(),
        }
    }

    pub fn with_subcommands(mut self, results: Vec<SubcommandResult>) -> Self {
        self.subcommand_results = results;
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn reason(&self) -> Option<&RejectionReason> {
        self.reason.as_ref()
    }

    pub fn into_reason(self) -> Option<RejectionReason> {
        self.reason
    }

    pub fn subcommand_results(&self) -> &[SubcommandResult] {
        &self.subcommand_results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_present_iff_denied() {
        let allowed = Verdict::allow();
        assert!(allowed.is_allowed());
        assert!(allowed.reason().is_none());

        let denied = Verdict::deny(RejectionReason::parse_error("boom"));
        assert!(!denied.is_allowed());
        assert_eq!(denied.reason().map(|r| r.kind()), Some("parse_error"));
    }

    #[test]
    fn test_reason_serde_tag_matches_kind() {
        let reason = RejectionReason::substitution(SubstitutionKind::Command, "$()");
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["type"], reason.kind());
        assert_eq!(json["kind"], "command");
        assert_eq!(json["pattern"], "$()");

        let reason = RejectionReason::UnsafeArgument {
            command: "tree -o out.txt".into(),
            argument: "-o".into(),
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["type"], "unsafe_argument");
        assert_eq!(json["argument"], "-o");
    }

    #[test]
    fn test_allowlist_miss() {
        let miss = RejectionReason::NoSafePattern {
            command: "git push".into(),
            relevant_patterns: vec![],
            mismatch: None,
        };
        assert!(miss.is_allowlist_miss());
        assert!(!RejectionReason::operator(OperatorKind::Background, "&").is_allowlist_miss());
    }
}
