//! Safety check over a parsed PowerShell command.

use std::panic::{AssertUnwindSafe, catch_unwind};

use super::ast::{Invocation, PsCommand, PsElement, PsNode, PsRedirect};
use super::parser::PowerShellParser;
use crate::security::bash::UnknownNodePolicy;
use crate::security::diagnostics::{analyze_mismatch, relevant_patterns, summarize};
use crate::security::error::ParseError;
use crate::security::pattern::CompiledPattern;
use crate::security::verdict::{
    OperatorKind, RejectionReason, SubcommandResult, SubstitutionKind, Verdict,
};

const DYNAMIC_EVAL: &[&str] = &["Invoke-Expression", "iex"];
const BACKGROUND_JOBS: &[&str] = &["Start-Job", "Start-ThreadJob", "sajb"];

pub struct PowerShellValidator<'p> {
    parser: &'p dyn PowerShellParser,
    unknown_nodes: UnknownNodePolicy,
}

impl<'p> PowerShellValidator<'p> {
    pub fn new(parser: &'p dyn PowerShellParser) -> Self {
        Self {
            parser,
            unknown_nodes: UnknownNodePolicy::default(),
        }
    }

    pub fn unknown_nodes(mut self, policy: UnknownNodePolicy) -> Self {
        self.unknown_nodes = policy;
        self
    }

    pub fn is_available(&self) -> bool {
        self.parser.is_available()
    }

    pub fn parse(&self, command: &str) -> Result<PsNode, ParseError> {
        catch_unwind(AssertUnwindSafe(|| self.parser.parse(command)))
            .unwrap_or_else(|_| Err(ParseError::Failed("PowerShell parser panicked".into())))
    }

    /// Validates `command`.
    ///
    /// Returns `Err(ParseError::Unavailable)` when the host cannot parse
    /// PowerShell at all, so the caller can fall back to the bash path. Every
    /// other parser failure is a `parse_error` denial.
    pub fn validate(
        &self,
        command: &str,
        patterns: &[CompiledPattern],
    ) -> Result<Verdict, ParseError> {
        if !self.is_available() {
            return Err(ParseError::Unavailable);
        }
        let tree = match self.parse(command) {
            Ok(tree) => tree,
            Err(ParseError::Unavailable) => return Err(ParseError::Unavailable),
            Err(err) => {
                return Ok(Verdict::deny(RejectionReason::parse_error(err.to_string())));
            }
        };
        Ok(self.validate_tree(&tree, patterns))
    }

    pub fn validate_tree(&self, tree: &PsNode, patterns: &[CompiledPattern]) -> Verdict {
        let mut walk = Walk {
            patterns,
            unknown_nodes: self.unknown_nodes,
            results: Vec::new(),
        };
        match walk.node(tree) {
            Ok(()) => Verdict::allow().with_subcommands(walk.results),
            Err(reason) => Verdict::deny(reason).with_subcommands(walk.results),
        }
    }
}

struct Walk<'a> {
    patterns: &'a [CompiledPattern],
    unknown_nodes: UnknownNodePolicy,
    results: Vec<SubcommandResult>,
}

impl Walk<'_> {
    fn node(&mut self, node: &PsNode) -> Result<(), RejectionReason> {
        match node {
            PsNode::Script(items) => self.all(items),
            PsNode::Pipeline {
                elements,
                background,
            } => {
                if *background {
                    return Err(RejectionReason::operator(OperatorKind::Background, "&"));
                }
                let feeds_eval = elements.iter().skip(1).any(|e| {
                    matches!(e, PsNode::Command(cmd) if cmd.is_named(DYNAMIC_EVAL))
                });
                if feeds_eval {
                    return Err(RejectionReason::operator(
                        OperatorKind::Pipeline,
                        "| Invoke-Expression",
                    ));
                }
                self.all(elements)
            }
            PsNode::Command(cmd) => {
                let outcome = self.command(cmd);
                self.results.push(SubcommandResult {
                    text: cmd.text.trim().to_string(),
                    allowed: outcome.is_ok(),
                    reason: outcome.as_ref().err().cloned(),
                });
                outcome
            }
            PsNode::Assignment { text } => Err(RejectionReason::DangerousOperator {
                kind: OperatorKind::Assignment,
                operator: "=".into(),
                target: text
                    .split_once('=')
                    .map(|(lhs, _)| lhs.trim_end_matches(['+', '-', '*', '/', '%', '?']).trim())
                    .filter(|lhs| !lhs.is_empty())
                    .map(String::from),
            }),
            PsNode::ScriptBlock { .. } => Err(RejectionReason::substitution(
                SubstitutionKind::ScriptBlock,
                "{ }",
            )),
            PsNode::SubExpression { .. } => Err(RejectionReason::substitution(
                SubstitutionKind::Command,
                "$()",
            )),
            PsNode::MemberInvocation { text } => Err(RejectionReason::substitution(
                SubstitutionKind::MethodInvocation,
                text.clone(),
            )),
            PsNode::Expression { children, .. } => self.all(children),
            PsNode::Unknown { kind, children, .. } => {
                self.all(children)?;
                match self.unknown_nodes {
                    UnknownNodePolicy::Allow => Ok(()),
                    UnknownNodePolicy::Deny => Err(RejectionReason::parse_error(format!(
                        "unsupported PowerShell construct `{kind}`"
                    ))),
                }
            }
        }
    }

    fn all(&mut self, items: &[PsNode]) -> Result<(), RejectionReason> {
        let mut first = None;
        for item in items {
            if let Err(reason) = self.node(item) {
                first.get_or_insert(reason);
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn command(&mut self, cmd: &PsCommand) -> Result<(), RejectionReason> {
        match cmd.invocation {
            Invocation::DotSource => {
                return Err(RejectionReason::substitution(SubstitutionKind::DotSource, ". "));
            }
            Invocation::Call if cmd.name.is_none() => {
                return Err(RejectionReason::substitution(SubstitutionKind::DynamicEval, "& "));
            }
            Invocation::Call | Invocation::Plain => {}
        }
        if cmd.name.is_none() {
            return Err(RejectionReason::substitution(
                SubstitutionKind::DynamicEval,
                cmd.text.trim(),
            ));
        }
        if cmd.is_named(DYNAMIC_EVAL) {
            return Err(RejectionReason::substitution(
                SubstitutionKind::DynamicEval,
                "Invoke-Expression",
            ));
        }
        if let Some(job) = BACKGROUND_JOBS.iter().copied().find(|job| cmd.is_named(&[*job])) {
            return Err(RejectionReason::operator(OperatorKind::Background, job));
        }

        for node in cmd.elements.iter().filter_map(PsElement::node) {
            self.nested(node)?;
        }

        if let Some(PsRedirect::File { append, target, .. }) =
            cmd.redirects.iter().find(|r| !r.is_safe())
        {
            return Err(RejectionReason::DangerousOperator {
                kind: OperatorKind::Redirect,
                operator: if *append { ">>" } else { ">" }.into(),
                target: Some(target.clone()),
            });
        }

        let text = cmd.flat_text();
        if self.patterns.iter().any(|p| p.is_match(&text)) {
            return Ok(());
        }
        let relevant = relevant_patterns(&text, self.patterns);
        Err(RejectionReason::NoSafePattern {
            relevant_patterns: summarize(&relevant),
            mismatch: analyze_mismatch(&text, &relevant),
            command: text,
        })
    }

    /// Argument values are checked with the same walk, but commands nested in
    /// them (`(Get-Item x).Length`) must not clobber the outer result order.
    fn nested(&mut self, node: &PsNode) -> Result<(), RejectionReason> {
        let mut inner = Walk {
            patterns: self.patterns,
            unknown_nodes: self.unknown_nodes,
            results: Vec::new(),
        };
        inner.node(node)
    }
}
