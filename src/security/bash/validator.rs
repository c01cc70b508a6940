//! Compositional safety check over a parsed shell command.

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::{Deserialize, Serialize};

use super::ast::{ExpansionKind, ShellNode, SimpleCommand, Word};
use super::hazards::unsafe_argument;
use super::parser::{ShellParser, TreeSitterBashParser};
use crate::security::diagnostics::{analyze_mismatch, relevant_patterns, summarize};
use crate::security::error::ParseError;
use crate::security::pattern::CompiledPattern;
use crate::security::verdict::{
    OperatorKind, RejectionReason, SubcommandResult, SubstitutionKind, Verdict,
};

/// What to do with syntax the validator has no model for, once its nested
/// statements and substitutions have been checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownNodePolicy {
    #[default]
    Allow,
    Deny,
}

/// Validates one command against the read-only allowlist.
pub fn validate_bash_command(command: &str, patterns: &[CompiledPattern]) -> Verdict {
    BashValidator::new().validate(command, patterns)
}

/// The reason `command` is denied, or `None` when it is allowed.
pub fn get_bash_rejection_reason(
    command: &str,
    patterns: &[CompiledPattern],
) -> Option<RejectionReason> {
    BashValidator::new().rejection_reason(command, patterns)
}

#[derive(Clone, Debug, Default)]
pub struct BashValidator<P = TreeSitterBashParser> {
    parser: P,
    unknown_nodes: UnknownNodePolicy,
}

impl BashValidator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: ShellParser> BashValidator<P> {
    pub fn with_parser(parser: P) -> Self {
        Self {
            parser,
            unknown_nodes: UnknownNodePolicy::default(),
        }
    }

    pub fn unknown_nodes(mut self, policy: UnknownNodePolicy) -> Self {
        self.unknown_nodes = policy;
        self
    }

    /// Parses `command`, converting a panicking parser into an error.
    pub fn parse(&self, command: &str) -> Result<ShellNode, ParseError> {
        catch_unwind(AssertUnwindSafe(|| self.parser.parse(command)))
            .unwrap_or_else(|_| Err(ParseError::Failed("shell parser panicked".into())))
    }

    pub fn validate(&self, command: &str, patterns: &[CompiledPattern]) -> Verdict {
        if let Some((position, c)) = find_control_char(command) {
            return Verdict::deny(RejectionReason::ControlChar {
                code: c as u32,
                position,
            });
        }

        let tree = match self.parse(command) {
            Ok(tree) => tree,
            Err(err) => return Verdict::deny(RejectionReason::parse_error(err.to_string())),
        };

        let mut walk = Walk {
            patterns,
            unknown_nodes: self.unknown_nodes,
            results: Vec::new(),
        };
        match walk.node(&tree) {
            Ok(()) => Verdict::allow().with_subcommands(walk.results),
            Err(reason) => Verdict::deny(reason).with_subcommands(walk.results),
        }
    }

    /// Like [`validate`](Self::validate), but a compound command whose only
    /// problem is allowlist misses, and where some parts did pass, is reported
    /// as `compound_partial_fail`.
    pub fn rejection_reason(
        &self,
        command: &str,
        patterns: &[CompiledPattern],
    ) -> Option<RejectionReason> {
        let verdict = self.validate(command, patterns);
        promote_partial_fail(verdict)
    }
}

pub(crate) fn promote_partial_fail(verdict: Verdict) -> Option<RejectionReason> {
    if verdict.is_allowed() {
        return None;
    }
    let results = verdict.subcommand_results().to_vec();
    let reason = verdict.into_reason()?;

    let (passed, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.allowed);
    let only_misses = failed.iter().all(|r| {
        r.reason
            .as_ref()
            .is_some_and(|reason| matches!(reason, RejectionReason::NoSafePattern { .. }))
    });

    if matches!(reason, RejectionReason::NoSafePattern { .. })
        && !passed.is_empty()
        && only_misses
    {
        Some(RejectionReason::CompoundPartialFail {
            failed,
            passed: passed.into_iter().map(|r| r.text).collect(),
        })
    } else {
        Some(reason)
    }
}

/// First control character other than tab, newline or carriage return.
fn find_control_char(command: &str) -> Option<(usize, char)> {
    command
        .char_indices()
        .find(|(_, c)| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
}

fn substitution_in<'a>(words: impl Iterator<Item = &'a Word>) -> Option<RejectionReason> {
    words
        .flat_map(|w| w.expansions.iter())
        .find(|e| e.kind.executes_code())
        .map(|e| substitution_reason(e.kind))
}

fn substitution_reason(kind: ExpansionKind) -> RejectionReason {
    let (kind, pattern) = match kind {
        ExpansionKind::Backtick => (SubstitutionKind::Command, "``"),
        ExpansionKind::ProcessInput => (SubstitutionKind::Process, "<()"),
        ExpansionKind::ProcessOutput => (SubstitutionKind::Process, ">()"),
        _ => (SubstitutionKind::Command, "$()"),
    };
    RejectionReason::substitution(kind, pattern)
}

/// Text matched against the allowlist: assignments, name and arguments.
pub(crate) fn allowlist_text(cmd: &SimpleCommand) -> String {
    cmd.assignments
        .iter()
        .chain(cmd.name.iter())
        .chain(cmd.args.iter())
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

struct Walk<'a> {
    patterns: &'a [CompiledPattern],
    unknown_nodes: UnknownNodePolicy,
    results: Vec<SubcommandResult>,
}

impl Walk<'_> {
    fn node(&mut self, node: &ShellNode) -> Result<(), RejectionReason> {
        match node {
            ShellNode::Script(items) | ShellNode::CompoundList(items) | ShellNode::Pipeline(items) => {
                self.all(items)
            }
            ShellNode::Logical { left, right, .. } => {
                self.node(left)?;
                self.node(right)
            }
            ShellNode::Subshell(inner) => self.node(inner),
            ShellNode::Background(_) => {
                Err(RejectionReason::operator(OperatorKind::Background, "&"))
            }
            ShellNode::Redirected { body, redirects } => {
                if let Some(reason) = substitution_in(redirects.iter().filter_map(|r| r.target.as_ref())) {
                    return Err(reason);
                }
                if let Some(redirect) = redirects.iter().find(|r| !r.is_safe()) {
                    return Err(RejectionReason::DangerousOperator {
                        kind: OperatorKind::Redirect,
                        operator: redirect.op.symbol().to_string(),
                        target: redirect.target_text().map(String::from),
                    });
                }
                self.node(body)
            }
            ShellNode::Command(cmd) => {
                let outcome = self.command(cmd);
                self.results.push(SubcommandResult {
                    text: cmd.text.trim().to_string(),
                    allowed: outcome.is_ok(),
                    reason: outcome.as_ref().err().cloned(),
                });
                outcome
            }
            ShellNode::Unknown {
                kind,
                expansions,
                children,
                ..
            } => {
                if let Some(e) = expansions.iter().find(|e| e.kind.executes_code()) {
                    return Err(substitution_reason(e.kind));
                }
                self.all(children)?;
                match self.unknown_nodes {
                    UnknownNodePolicy::Allow => Ok(()),
                    UnknownNodePolicy::Deny => Err(RejectionReason::parse_error(format!(
                        "unsupported shell construct `{kind}`"
                    ))),
                }
            }
        }
    }

    /// Every item is checked so each one gets a subcommand result; the first
    /// denial is returned.
    fn all(&mut self, items: &[ShellNode]) -> Result<(), RejectionReason> {
        let mut first = None;
        for item in items {
            if let Err(reason) = self.node(item) {
                first.get_or_insert(reason);
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn command(&self, cmd: &SimpleCommand) -> Result<(), RejectionReason> {
        if let Some(reason) = substitution_in(cmd.words()) {
            return Err(reason);
        }

        if let Some(redirect) = cmd.redirects.iter().find(|r| !r.is_safe()) {
            return Err(RejectionReason::DangerousOperator {
                kind: OperatorKind::Redirect,
                operator: redirect.op.symbol().to_string(),
                target: redirect.target_text().map(String::from),
            });
        }

        let text = allowlist_text(cmd);
        if text.is_empty() {
            // Nothing but safe redirects, e.g. `< file`.
            return Ok(());
        }
        if self.patterns.iter().any(|p| p.is_match(&text)) {
            return match unsafe_argument(cmd) {
                Some(argument) => Err(RejectionReason::UnsafeArgument {
                    command: text,
                    argument,
                }),
                None => Ok(()),
            };
        }

        let relevant = relevant_patterns(&text, self.patterns);
        Err(RejectionReason::NoSafePattern {
            relevant_patterns: summarize(&relevant),
            mismatch: analyze_mismatch(&text, &relevant),
            command: text,
        })
    }
}
