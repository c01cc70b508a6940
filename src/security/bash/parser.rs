//! Tree-sitter front end that lowers bash syntax into [`ShellNode`] trees.

use tree_sitter::{Language, Node, Parser};

use super::ast::{
    Expansion, ExpansionKind, LogicalOp, Redirect, RedirectOp, ShellNode, SimpleCommand, Word,
};
use crate::security::error::ParseError;

/// Consumed capability: command text in, syntax tree out.
pub trait ShellParser: Send + Sync {
    fn parse(&self, source: &str) -> Result<ShellNode, ParseError>;
}

fn bash_language() -> Language {
    tree_sitter_bash::LANGUAGE.into()
}

/// Node kinds that form a statement of their own.
const STATEMENT_KINDS: &[&str] = &[
    "command",
    "list",
    "pipeline",
    "subshell",
    "compound_statement",
    "redirected_statement",
    "negated_command",
    "variable_assignment",
    "variable_assignments",
    "if_statement",
    "while_statement",
    "for_statement",
    "c_style_for_statement",
    "case_statement",
    "function_definition",
    "declaration_command",
    "unset_command",
    "test_command",
];

const REDIRECT_KINDS: &[&str] = &["file_redirect", "heredoc_redirect", "herestring_redirect"];

/// Substitutions are reported as expansions of the word that holds them,
/// never as statements of the enclosing script.
const OPAQUE_KINDS: &[&str] = &["command_substitution", "process_substitution"];

#[derive(Clone, Copy, Debug, Default)]
pub struct TreeSitterBashParser;

impl TreeSitterBashParser {
    pub fn new() -> Self {
        Self
    }
}

impl ShellParser for TreeSitterBashParser {
    fn parse(&self, source: &str) -> Result<ShellNode, ParseError> {
        if source.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let mut parser = Parser::new();
        parser
            .set_language(&bash_language())
            .map_err(|_| ParseError::Grammar("bash"))?;
        let tree = parser.parse(source, None).ok_or(ParseError::NoTree)?;

        let root = tree.root_node();
        if root.has_error() {
            let (offset, snippet) = first_error(root, source);
            return Err(ParseError::Syntax { offset, snippet });
        }

        Ok(Lowering { src: source }.node(root))
    }
}

fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn first_error(root: Node<'_>, source: &str) -> (usize, String) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let start = node.start_byte();
            let end = node.end_byte().max(start + 1).min(start + 40);
            let snippet = source
                .get(start..end.min(source.len()))
                .or_else(|| source.get(start..))
                .unwrap_or("")
                .trim()
                .to_string();
            return (start, snippet);
        }
        let mut kids = children(node);
        kids.reverse();
        stack.extend(kids);
    }
    (0, source.chars().take(40).collect())
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

struct Lowering<'s> {
    src: &'s str,
}

impl Lowering<'_> {
    fn text(&self, node: Node<'_>) -> String {
        node.utf8_text(self.src.as_bytes())
            .unwrap_or_default()
            .to_string()
    }

    fn node(&self, node: Node<'_>) -> ShellNode {
        match node.kind() {
            "program" => ShellNode::Script(self.statements(node)),
            "compound_statement" => ShellNode::CompoundList(self.statements(node)),
            "subshell" => {
                ShellNode::Subshell(Box::new(ShellNode::CompoundList(self.statements(node))))
            }
            "list" => self.list(node),
            "pipeline" => ShellNode::Pipeline(self.statements(node)),
            "redirected_statement" => self.redirected(node),
            "command" => ShellNode::Command(self.command(node)),
            "variable_assignment" | "variable_assignments" => ShellNode::Command(SimpleCommand {
                assignments: vec![self.word(node)],
                text: self.text(node),
                ..Default::default()
            }),
            "negated_command" => named_children(node)
                .into_iter()
                .find(|c| STATEMENT_KINDS.contains(&c.kind()))
                .map(|inner| self.node(inner))
                .unwrap_or_else(|| self.unknown(node)),
            _ => self.unknown(node),
        }
    }

    /// Statements below `node`, flattening non-statement wrappers such as
    /// `do_group` or `else_clause`. A statement followed by `&` is wrapped in
    /// [`ShellNode::Background`].
    fn statements(&self, node: Node<'_>) -> Vec<ShellNode> {
        let kids = children(node);
        let mut out = Vec::new();
        for (i, child) in kids.iter().enumerate() {
            if !child.is_named() || child.kind() == "comment" || OPAQUE_KINDS.contains(&child.kind())
            {
                continue;
            }
            if STATEMENT_KINDS.contains(&child.kind()) {
                let lowered = self.node(*child);
                let backgrounded = kids
                    .get(i + 1)
                    .is_some_and(|next| !next.is_named() && next.kind() == "&");
                out.push(if backgrounded {
                    ShellNode::Background(Box::new(lowered))
                } else {
                    lowered
                });
            } else {
                out.extend(self.statements(*child));
            }
        }
        out
    }

    fn list(&self, node: Node<'_>) -> ShellNode {
        let op = children(node)
            .into_iter()
            .find(|c| !c.is_named())
            .map(|c| c.kind());
        let mut operands = self.statements(node);
        let op = match op {
            Some("&&") => LogicalOp::And,
            Some("||") => LogicalOp::Or,
            _ => return ShellNode::CompoundList(operands),
        };
        if operands.len() != 2 {
            return ShellNode::CompoundList(operands);
        }
        let right = operands.pop().map(Box::new);
        let left = operands.pop().map(Box::new);
        match (left, right) {
            (Some(left), Some(right)) => ShellNode::Logical { op, left, right },
            _ => ShellNode::CompoundList(Vec::new()),
        }
    }

    fn redirected(&self, node: Node<'_>) -> ShellNode {
        let redirects: Vec<Redirect> = children(node)
            .into_iter()
            .filter(|c| REDIRECT_KINDS.contains(&c.kind()))
            .map(|c| self.redirect(c))
            .collect();

        match node.child_by_field_name("body") {
            Some(body) if body.kind() == "command" => {
                let mut cmd = self.command(body);
                cmd.redirects.extend(redirects);
                cmd.text = self.text(node);
                ShellNode::Command(cmd)
            }
            Some(body) => ShellNode::Redirected {
                body: Box::new(self.node(body)),
                redirects,
            },
            None => ShellNode::Redirected {
                body: Box::new(ShellNode::CompoundList(Vec::new())),
                redirects,
            },
        }
    }

    fn command(&self, node: Node<'_>) -> SimpleCommand {
        let mut cmd = SimpleCommand {
            text: self.text(node),
            ..Default::default()
        };
        for child in named_children(node) {
            match child.kind() {
                "command_name" => cmd.name = Some(self.word(child)),
                "variable_assignment" => cmd.assignments.push(self.word(child)),
                "comment" => {}
                kind if REDIRECT_KINDS.contains(&kind) => cmd.redirects.push(self.redirect(child)),
                _ => cmd.args.push(self.word(child)),
            }
        }
        cmd
    }

    fn redirect(&self, node: Node<'_>) -> Redirect {
        let kids = children(node);
        match node.kind() {
            "heredoc_redirect" => Redirect {
                op: RedirectOp::HereDoc,
                fd: None,
                target: kids
                    .iter()
                    .find(|c| c.kind() == "heredoc_body")
                    .map(|body| self.word(*body)),
            },
            "herestring_redirect" => Redirect {
                op: RedirectOp::HereString,
                fd: None,
                target: kids.iter().find(|c| c.is_named()).map(|w| self.word(*w)),
            },
            _ => {
                let op = kids
                    .iter()
                    .filter(|c| !c.is_named())
                    .find_map(|c| RedirectOp::from_token(c.kind()))
                    .unwrap_or(RedirectOp::Output);
                Redirect {
                    op,
                    fd: node
                        .child_by_field_name("descriptor")
                        .map(|d| self.text(d)),
                    target: node
                        .child_by_field_name("destination")
                        .map(|d| self.word(d)),
                }
            }
        }
    }

    fn word(&self, node: Node<'_>) -> Word {
        let mut expansions = Vec::new();
        self.collect_expansions(node, &mut expansions);
        Word {
            text: self.unquote(node),
            raw: self.text(node),
            expansions,
        }
    }

    fn unquote(&self, node: Node<'_>) -> String {
        let text = self.text(node);
        match node.kind() {
            "raw_string" => text
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .unwrap_or(&text)
                .to_string(),
            "ansi_c_string" => text
                .strip_prefix("$'")
                .and_then(|s| s.strip_suffix('\''))
                .unwrap_or(&text)
                .to_string(),
            "string" => text
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(&text)
                .to_string(),
            "word" => unescape(&text),
            "command_name" | "concatenation" => {
                let kids = children(node);
                if kids.is_empty() {
                    text
                } else {
                    kids.into_iter().map(|c| self.unquote(c)).collect()
                }
            }
            _ => text,
        }
    }

    fn collect_expansions(&self, node: Node<'_>, out: &mut Vec<Expansion>) {
        let text = || self.text(node);
        let kind = match node.kind() {
            "command_substitution" if text().starts_with('`') => Some(ExpansionKind::Backtick),
            "command_substitution" => Some(ExpansionKind::CommandSubstitution),
            "process_substitution" if text().starts_with('>') => Some(ExpansionKind::ProcessOutput),
            "process_substitution" => Some(ExpansionKind::ProcessInput),
            "simple_expansion" | "expansion" => Some(ExpansionKind::Parameter),
            "arithmetic_expansion" => Some(ExpansionKind::Arithmetic),
            _ => None,
        };
        if let Some(kind) = kind {
            out.push(Expansion { kind, text: text() });
            if kind.executes_code() {
                return;
            }
        }
        for child in children(node) {
            if !STATEMENT_KINDS.contains(&child.kind()) {
                self.collect_expansions(child, out);
            }
        }
    }

    fn unknown(&self, node: Node<'_>) -> ShellNode {
        let mut expansions = Vec::new();
        for child in children(node) {
            if !STATEMENT_KINDS.contains(&child.kind()) {
                self.collect_expansions(child, &mut expansions);
            }
        }
        ShellNode::Unknown {
            kind: node.kind().to_string(),
            text: self.text(node),
            expansions,
            children: self.statements(node),
        }
    }
}
