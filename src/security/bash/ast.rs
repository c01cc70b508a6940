//! Owned syntax tree for POSIX-like shell commands.
//!
//! Only the structure a safety decision needs is modelled. Constructs the
//! validator does not understand are kept as [`ShellNode::Unknown`] together
//! with the statements nested inside them, so nothing executable disappears
//! from view.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShellNode {
    Script(Vec<ShellNode>),
    Command(SimpleCommand),
    Logical {
        op: LogicalOp,
        left: Box<ShellNode>,
        right: Box<ShellNode>,
    },
    Pipeline(Vec<ShellNode>),
    Subshell(Box<ShellNode>),
    CompoundList(Vec<ShellNode>),
    /// Redirects attached to something other than a simple command,
    /// e.g. `{ a; b; } > out`.
    Redirected {
        body: Box<ShellNode>,
        redirects: Vec<Redirect>,
    },
    /// Statement terminated by `&`.
    Background(Box<ShellNode>),
    Unknown {
        kind: String,
        text: String,
        expansions: Vec<Expansion>,
        children: Vec<ShellNode>,
    },
}

impl ShellNode {
    /// Number of statements at the top of a script, with `&&`/`||` chains
    /// counted per operand.
    pub fn statement_count(&self) -> usize {
        match self {
            Self::Script(items) | Self::CompoundList(items) => {
                items.iter().map(Self::statement_count).sum()
            }
            Self::Logical { left, right, .. } => left.statement_count() + right.statement_count(),
            _ => 1,
        }
    }

    /// Every simple command in source order, descending into all compound forms.
    pub fn commands(&self) -> Vec<&SimpleCommand> {
        let mut out = Vec::new();
        self.collect_commands(&mut out);
        out
    }

    fn collect_commands<'a>(&'a self, out: &mut Vec<&'a SimpleCommand>) {
        match self {
            Self::Command(cmd) => out.push(cmd),
            Self::Script(items) | Self::CompoundList(items) | Self::Pipeline(items) => {
                items.iter().for_each(|n| n.collect_commands(out));
            }
            Self::Logical { left, right, .. } => {
                left.collect_commands(out);
                right.collect_commands(out);
            }
            Self::Subshell(inner) | Self::Background(inner) => inner.collect_commands(out),
            Self::Redirected { body, .. } => body.collect_commands(out),
            Self::Unknown { children, .. } => {
                children.iter().for_each(|n| n.collect_commands(out));
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimpleCommand {
    pub name: Option<Word>,
    pub args: Vec<Word>,
    /// `FOO=bar` prefixes (or a bare assignment statement).
    pub assignments: Vec<Word>,
    pub redirects: Vec<Redirect>,
    /// Source text of the whole command.
    pub text: String,
}

impl SimpleCommand {
    pub fn name_text(&self) -> Option<&str> {
        self.name.as_ref().map(|w| w.text.as_str())
    }

    /// Name and arguments joined by single spaces, quotes removed.
    pub fn flat_text(&self) -> String {
        self.name
            .iter()
            .chain(self.args.iter())
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn words(&self) -> impl Iterator<Item = &Word> {
        self.name
            .iter()
            .chain(self.args.iter())
            .chain(self.assignments.iter())
            .chain(self.redirects.iter().filter_map(|r| r.target.as_ref()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Word {
    /// Text with surrounding quotes removed.
    pub text: String,
    /// Text exactly as written.
    pub raw: String,
    pub expansions: Vec<Expansion>,
}

impl Word {
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            raw: text.clone(),
            text,
            expansions: Vec::new(),
        }
    }

    /// The shell will use exactly the characters written. Expansions,
    /// globs, brace lists, tildes and escapes all disqualify a word.
    pub fn is_literal(&self) -> bool {
        if !self.expansions.is_empty() {
            return false;
        }
        let mut quote = None;
        let mut chars = self.raw.chars().peekable();
        while let Some(c) = chars.next() {
            match (quote, c) {
                (Some('\''), '\'') | (Some('"'), '"') => quote = None,
                (Some('\''), _) => {}
                (Some(_), '\\') if chars.peek().is_some_and(|n| "$`\"\\\n".contains(*n)) => {
                    return false;
                }
                (Some(_), '$' | '`') => return false,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(c),
                (None, '$' | '`' | '\\' | '*' | '?' | '[' | ']' | '{' | '}' | '~') => return false,
                (None, _) => {}
            }
        }
        quote.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expansion {
    pub kind: ExpansionKind,
    pub text: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpansionKind {
    /// `$(...)`
    CommandSubstitution,
    /// `` `...` ``
    Backtick,
    /// `<(...)`
    ProcessInput,
    /// `>(...)`
    ProcessOutput,
    /// `$x`, `${x}`
    Parameter,
    /// `$((...))`
    Arithmetic,
}

impl ExpansionKind {
    pub fn executes_code(&self) -> bool {
        matches!(
            self,
            Self::CommandSubstitution | Self::Backtick | Self::ProcessInput | Self::ProcessOutput
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
    pub op: RedirectOp,
    pub fd: Option<String>,
    pub target: Option<Word>,
}

impl Redirect {
    pub fn target_text(&self) -> Option<&str> {
        self.target.as_ref().map(|w| w.text.as_str())
    }

    /// Reads, fd duplication onto a numeric target, and writes into
    /// `/dev/null` cannot change anything on disk.
    pub fn is_safe(&self) -> bool {
        let target = self.target_text().unwrap_or("");
        match self.op {
            RedirectOp::Input
            | RedirectOp::DupInput
            | RedirectOp::HereString
            | RedirectOp::CloseFd => true,
            RedirectOp::DupOutput => {
                target == "-" || target == "/dev/null" || target.chars().all(|c| c.is_ascii_digit())
            }
            RedirectOp::Output
            | RedirectOp::Append
            | RedirectOp::Clobber
            | RedirectOp::OutputAll
            | RedirectOp::AppendAll => target == "/dev/null",
            RedirectOp::ReadWrite | RedirectOp::HereDoc => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectOp {
    Input,
    Output,
    Append,
    Clobber,
    OutputAll,
    AppendAll,
    DupInput,
    DupOutput,
    ReadWrite,
    CloseFd,
    HereDoc,
    HereString,
}

impl RedirectOp {
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "<" => Self::Input,
            ">" => Self::Output,
            ">>" => Self::Append,
            ">|" => Self::Clobber,
            "&>" => Self::OutputAll,
            "&>>" => Self::AppendAll,
            "<&" => Self::DupInput,
            ">&" => Self::DupOutput,
            "<>" => Self::ReadWrite,
            "<&-" | ">&-" => Self::CloseFd,
            "<<" | "<<-" => Self::HereDoc,
            "<<<" => Self::HereString,
            _ => return None,
        })
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Input => "<",
            Self::Output => ">",
            Self::Append => ">>",
            Self::Clobber => ">|",
            Self::OutputAll => "&>",
            Self::AppendAll => "&>>",
            Self::DupInput => "<&",
            Self::DupOutput => ">&",
            Self::ReadWrite => "<>",
            Self::CloseFd => ">&-",
            Self::HereDoc => "<<",
            Self::HereString => "<<<",
        }
    }
}
