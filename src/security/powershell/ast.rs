//! Owned PowerShell syntax tree.

/// How a command is invoked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Invocation {
    #[default]
    Plain,
    /// `& name ...`
    Call,
    /// `. ./script.ps1`
    DotSource,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PsNode {
    /// Statement sequence. `a && b` chains are flattened into one as well.
    Script(Vec<PsNode>),
    Pipeline {
        elements: Vec<PsNode>,
        /// Trailing `&` (PowerShell 7 background operator).
        background: bool,
    },
    Command(PsCommand),
    Assignment {
        text: String,
    },
    ScriptBlock {
        text: String,
    },
    /// `$( ... )`
    SubExpression {
        text: String,
    },
    /// `[Type]::Method(...)` or `$obj.Method(...)`
    MemberInvocation {
        text: String,
    },
    Expression {
        text: String,
        children: Vec<PsNode>,
    },
    Unknown {
        kind: String,
        text: String,
        children: Vec<PsNode>,
    },
}

impl PsNode {
    pub fn commands(&self) -> Vec<&PsCommand> {
        let mut out = Vec::new();
        self.collect_commands(&mut out);
        out
    }

    fn collect_commands<'a>(&'a self, out: &mut Vec<&'a PsCommand>) {
        match self {
            Self::Command(cmd) => {
                out.push(cmd);
                for element in &cmd.elements {
                    if let Some(node) = element.node() {
                        node.collect_commands(out);
                    }
                }
            }
            Self::Script(items)
            | Self::Pipeline {
                elements: items, ..
            }
            | Self::Expression {
                children: items, ..
            }
            | Self::Unknown {
                children: items, ..
            } => items.iter().for_each(|n| n.collect_commands(out)),
            Self::Assignment { .. }
            | Self::ScriptBlock { .. }
            | Self::SubExpression { .. }
            | Self::MemberInvocation { .. } => {}
        }
    }

    /// Number of top-level statements.
    pub fn statement_count(&self) -> usize {
        match self {
            Self::Script(items) => items.iter().map(Self::statement_count).sum(),
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PsCommand {
    /// Literal command name; `None` when computed (`& $cmd`).
    pub name: Option<String>,
    pub invocation: Invocation,
    /// Elements after the name.
    pub elements: Vec<PsElement>,
    pub redirects: Vec<PsRedirect>,
    pub text: String,
}

impl PsCommand {
    pub fn is_named(&self, names: &[&str]) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| names.iter().any(|candidate| n.eq_ignore_ascii_case(candidate)))
    }

    /// Name and elements joined by single spaces, string literals unquoted.
    pub fn flat_text(&self) -> String {
        self.name
            .iter()
            .cloned()
            .chain(self.elements.iter().map(PsElement::text))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PsElement {
    Parameter {
        name: String,
        /// `-Path:value` form. Always a `Value`.
        argument: Option<Box<PsElement>>,
    },
    Value {
        /// Literal value for string constants, source text otherwise.
        text: String,
        node: PsNode,
    },
}

impl PsElement {
    pub fn text(&self) -> String {
        match self {
            Self::Parameter {
                name,
                argument: Some(arg),
            } => format!("-{name}:{}", arg.text()),
            Self::Parameter { name, .. } => format!("-{name}"),
            Self::Value { text, .. } => text.clone(),
        }
    }

    /// The expression this element evaluates, if any.
    pub fn node(&self) -> Option<&PsNode> {
        match self {
            Self::Parameter { argument, .. } => argument.as_deref().and_then(Self::node),
            Self::Value { node, .. } => Some(node),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PsRedirect {
    /// `2>&1` and friends.
    Merging { text: String },
    File {
        append: bool,
        target: String,
        text: String,
    },
}

impl PsRedirect {
    pub fn is_safe(&self) -> bool {
        match self {
            Self::Merging { .. } => true,
            Self::File { target, .. } => target.eq_ignore_ascii_case("$null"),
        }
    }
}
