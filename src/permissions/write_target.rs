//! Files a denied command would write, and the folder exception that may
//! still allow it.
//!
//! The exception is deliberately narrow. It applies only to a single write
//! statement whose every other part is read-only on its own, and only when
//! every file it writes is inside an allowed location.

use std::sync::LazyLock;

use regex::Regex;

use crate::security::bash::{
    BashValidator, Redirect, RedirectOp, ShellNode, SimpleCommand, Word, allowlist_text,
    unsafe_argument,
};
use crate::security::path::{Platform, is_within, normalize_path_for_comparison};
use crate::security::pattern::{CompiledGlob, CompiledPattern};
use crate::security::powershell::{Invocation, PsCommand, PsNode, powershell_write_targets};

/// Rough shape of a write, used to decide whether to look for targets and
/// to flag denials whose target could not be determined.
static WRITE_IDIOM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:>{1,2}\|?\s*[^&\s>]|\btee\b|\b(?:Set-Content|Add-Content|Out-File|New-Item|Copy-Item|Move-Item|Remove-Item)\b|\b(?:touch|mkdir|cp|mv|rm|dd|truncate|install)\s|\bsed\s+-i)",
    )
    .expect("valid regex")
});

/// `-Path \"...\"` or `> \"...\"` inside a double-quoted wrapper script.
static ESCAPED_QUOTE_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:-(?:Path|LiteralPath|FilePath)\s+|>{1,2}\s*)\\"((?:[^"\\]|\\[^"])+)\\""#)
        .expect("valid regex")
});

const SHELL_WRAPPERS: &[&str] = &["bash", "sh", "zsh"];
const SHELL_DIRS: &[&str] = &["/bin", "/usr/bin"];
const SCRIPT_FLAGS: &[&str] = &["-c", "-lc"];
const WRITE_CMDLETS: &[&str] = &["Set-Content", "Out-File"];
const PATH_PARAMETERS: &[&str] = &["-Path", "-LiteralPath", "-FilePath"];

/// Characters that could smuggle more execution past the escaped-quote
/// fallback, which has no syntax tree to check.
const FALLBACK_UNSAFE: &[char] = &[';', '&', '|', '`', '\n', '\r', '(', '{', '$'];

pub fn looks_like_write(command: &str) -> bool {
    WRITE_IDIOM.is_match(command)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteTargets {
    /// Every file the command writes, as written in the command.
    pub paths: Vec<String>,
    /// The command is one write statement whose other parts are read-only,
    /// so allowing its targets allows the whole command.
    pub eligible: bool,
}

impl WriteTargets {
    fn ineligible(paths: Vec<String>) -> Self {
        Self {
            paths,
            eligible: false,
        }
    }
}

/// Write targets of a bash command. `patterns` decide whether the
/// non-writing parts are read-only.
pub fn bash_write_targets(command: &str, patterns: &[CompiledPattern]) -> WriteTargets {
    let Ok(tree) = BashValidator::new().parse(command) else {
        return WriteTargets::default();
    };

    let mut targets = Vec::new();
    for cmd in tree.commands() {
        targets.extend(command_targets(cmd, patterns));
    }
    grouped_redirect_targets(&tree, &mut targets);

    let eligible = !targets.is_empty()
        && targets.iter().all(|t| t.literal)
        && single_statement(&tree).is_some_and(|stmt| statement_is_pure_write(stmt, patterns));
    WriteTargets {
        paths: targets.into_iter().map(|t| t.path).collect(),
        eligible,
    }
}

/// A file a bash command writes. `literal` is false when the shell would
/// still expand the path, so its written form says nothing about where
/// the write lands.
struct Target {
    path: String,
    literal: bool,
}

impl Target {
    fn from_word(word: &Word) -> Self {
        Self {
            path: word.text.clone(),
            literal: word.is_literal(),
        }
    }
}

/// Targets of redirects attached to groups such as `{ a; b; } > out`.
fn grouped_redirect_targets(node: &ShellNode, out: &mut Vec<Target>) {
    match node {
        ShellNode::Redirected { body, redirects } => {
            out.extend(redirects.iter().filter_map(write_redirect_target));
            grouped_redirect_targets(body, out);
        }
        ShellNode::Script(items) | ShellNode::CompoundList(items) | ShellNode::Pipeline(items) => {
            items.iter().for_each(|n| grouped_redirect_targets(n, out));
        }
        ShellNode::Logical { left, right, .. } => {
            grouped_redirect_targets(left, out);
            grouped_redirect_targets(right, out);
        }
        ShellNode::Subshell(inner) | ShellNode::Background(inner) => {
            grouped_redirect_targets(inner, out);
        }
        ShellNode::Unknown { children, .. } => {
            children.iter().for_each(|n| grouped_redirect_targets(n, out));
        }
        ShellNode::Command(_) => {}
    }
}

fn single_statement(node: &ShellNode) -> Option<&ShellNode> {
    match node {
        ShellNode::Script(items) if items.len() == 1 => single_statement(&items[0]),
        ShellNode::Script(_) => None,
        other => Some(other),
    }
}

fn statement_is_pure_write(stmt: &ShellNode, patterns: &[CompiledPattern]) -> bool {
    let commands: Vec<&SimpleCommand> = match stmt {
        ShellNode::Command(cmd) => vec![cmd],
        ShellNode::Pipeline(stages) => {
            let mut commands = Vec::with_capacity(stages.len());
            for stage in stages {
                let ShellNode::Command(cmd) = stage else {
                    return false;
                };
                commands.push(cmd);
            }
            commands
        }
        _ => return false,
    };

    commands.iter().all(|cmd| {
        let executes = cmd
            .words()
            .flat_map(|w| w.expansions.iter())
            .any(|e| e.kind.executes_code());
        !executes && command_is_read_only_or_write(cmd, patterns)
    })
}

/// The command's own text is allowlisted, or it is a writer whose only
/// effect is writing its targets.
fn command_is_read_only_or_write(cmd: &SimpleCommand, patterns: &[CompiledPattern]) -> bool {
    // `BASH_ENV=`, `LD_PRELOAD=` and friends load code before the command runs.
    if !cmd.assignments.is_empty() {
        return false;
    }
    let name = cmd.name_text().unwrap_or("");
    if name == "tee" || is_write_cmdlet_name(name) {
        return true;
    }
    if is_shell_wrapper(cmd) {
        return wrapped_script(cmd).is_some_and(|script| {
            script.is_literal() && bash_write_targets(&script.text, patterns).eligible
        });
    }
    if unsafe_argument(cmd).is_some() {
        return false;
    }
    let text = allowlist_text(cmd);
    text.is_empty() || patterns.iter().any(|p| p.is_match(&text))
}

fn command_targets(cmd: &SimpleCommand, patterns: &[CompiledPattern]) -> Vec<Target> {
    let mut targets: Vec<Target> = cmd
        .redirects
        .iter()
        .filter_map(write_redirect_target)
        .collect();

    let name = cmd.name_text().unwrap_or("");
    if name == "tee" {
        targets.extend(
            cmd.args
                .iter()
                .filter(|w| !w.text.starts_with('-'))
                .map(Target::from_word),
        );
    } else if is_write_cmdlet_name(name) {
        targets.extend(cmdlet_path(&cmd.args));
    } else if let Some(script) = wrapped_script(cmd) {
        let literal = script.is_literal();
        targets.extend(
            bash_write_targets(&script.text, patterns)
                .paths
                .into_iter()
                .map(|path| Target { path, literal }),
        );
    }
    targets
}

fn write_redirect_target(redirect: &Redirect) -> Option<Target> {
    if redirect.is_safe() {
        return None;
    }
    match redirect.op {
        RedirectOp::Output
        | RedirectOp::Append
        | RedirectOp::Clobber
        | RedirectOp::OutputAll
        | RedirectOp::AppendAll
        | RedirectOp::ReadWrite
        | RedirectOp::DupOutput => redirect.target.as_ref().map(Target::from_word),
        _ => None,
    }
}

fn is_write_cmdlet_name(name: &str) -> bool {
    WRITE_CMDLETS.iter().any(|c| c.eq_ignore_ascii_case(name))
}

fn is_shell_wrapper(cmd: &SimpleCommand) -> bool {
    let Some(name) = cmd.name_text() else {
        return false;
    };
    let base = match name.rsplit_once('/') {
        Some((dir, base)) if SHELL_DIRS.contains(&dir) => base,
        Some(_) => return false,
        None => name,
    };
    SHELL_WRAPPERS.contains(&base)
}

/// Script of `bash -c SCRIPT`, `sh -lc -- SCRIPT` and the like. The flag
/// must come first and the script must be the only other word, so no
/// script file or extra positional parameters ride along.
fn wrapped_script(cmd: &SimpleCommand) -> Option<&Word> {
    if !is_shell_wrapper(cmd) {
        return None;
    }
    let (flag, rest) = cmd.args.split_first()?;
    if !SCRIPT_FLAGS.contains(&flag.raw.as_str()) {
        return None;
    }
    match rest {
        [script] if script.text != "--" => Some(script),
        [dashes, script] if dashes.raw == "--" => Some(script),
        _ => None,
    }
}

/// Path argument of `Set-Content`/`Out-File` written in bash-parsed form.
fn cmdlet_path(args: &[Word]) -> Option<Target> {
    let mut positional = None;
    let mut after_parameter = false;
    for (i, arg) in args.iter().enumerate() {
        let text = arg.text.as_str();
        if text.starts_with('-') {
            let (param, value) = match text.split_once(':') {
                Some((param, value)) => (param, Some(value)),
                None => (text, None),
            };
            if PATH_PARAMETERS.iter().any(|p| p.eq_ignore_ascii_case(param)) {
                return match value {
                    Some(value) => Some(Target {
                        path: value.to_string(),
                        literal: arg.is_literal(),
                    }),
                    None => args.get(i + 1).map(Target::from_word),
                };
            }
            after_parameter = value.is_none();
            continue;
        }
        if !after_parameter && positional.is_none() {
            positional = Some(Target::from_word(arg));
        }
        after_parameter = false;
    }
    positional
}

/// Write targets of a parsed PowerShell command.
pub fn powershell_targets(tree: &PsNode, patterns: &[CompiledPattern]) -> WriteTargets {
    let paths = powershell_write_targets(tree);
    let eligible = !paths.is_empty()
        && ps_single_statement(tree).is_some_and(|stmt| ps_statement_is_pure_write(stmt, patterns));
    WriteTargets { paths, eligible }
}

fn ps_single_statement(node: &PsNode) -> Option<&PsNode> {
    match node {
        PsNode::Script(items) if items.len() == 1 => ps_single_statement(&items[0]),
        PsNode::Script(_) => None,
        other => Some(other),
    }
}

fn ps_statement_is_pure_write(stmt: &PsNode, patterns: &[CompiledPattern]) -> bool {
    let stages: &[PsNode] = match stmt {
        PsNode::Pipeline {
            elements,
            background: false,
        } => elements,
        PsNode::Command(_) => std::slice::from_ref(stmt),
        _ => return false,
    };

    stages.iter().all(|stage| match stage {
        PsNode::Command(cmd) => ps_command_is_read_only_or_write(cmd, patterns),
        _ => false,
    })
}

fn ps_command_is_read_only_or_write(cmd: &PsCommand, patterns: &[CompiledPattern]) -> bool {
    if cmd.invocation != Invocation::Plain || cmd.name.is_none() {
        return false;
    }
    let inert = cmd
        .elements
        .iter()
        .all(|element| element.node().is_none_or(ps_value_is_inert));
    if !inert {
        return false;
    }
    cmd.is_named(WRITE_CMDLETS) || patterns.iter().any(|p| p.is_match(&cmd.flat_text()))
}

fn ps_value_is_inert(node: &PsNode) -> bool {
    match node {
        PsNode::Expression { children, .. } => children.iter().all(ps_value_is_inert),
        _ => false,
    }
}

/// Targets written as `\"...\"` inside a double-quoted wrapper script, for
/// hosts where the script itself could not be parsed.
pub fn escaped_quote_targets(command: &str) -> WriteTargets {
    let paths: Vec<String> = ESCAPED_QUOTE_TARGET
        .captures_iter(command)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    let eligible = !paths.is_empty() && !command.contains(FALLBACK_UNSAFE);
    WriteTargets { paths, eligible }
}

/// Locations where safe mode still permits writes.
#[derive(Clone, Debug)]
pub struct FolderException<'a> {
    folders: Vec<String>,
    globs: &'a [CompiledGlob],
    cwd: Option<&'a str>,
    platform: Platform,
}

impl<'a> FolderException<'a> {
    pub fn new<I, S>(folders: I, globs: &'a [CompiledGlob], cwd: Option<&'a str>, platform: Platform) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let folders = folders
            .into_iter()
            .filter(|f| !f.as_ref().trim().is_empty())
            .map(|f| normalize_path_for_comparison(f.as_ref(), cwd, platform))
            .collect();
        Self {
            folders,
            globs,
            cwd,
            platform,
        }
    }

    /// `path` is inside a plans/data folder (compared case-insensitively)
    /// or matches an allowed-write glob.
    pub fn permits(&self, path: &str) -> bool {
        let normalized = normalize_path_for_comparison(path, self.cwd, self.platform);
        self.folders.iter().any(|f| is_within(&normalized, f, true))
            || self.globs.iter().any(|g| g.matches(path, self.cwd))
    }

    /// Every target is permitted; an empty list never is.
    pub fn permits_all(&self, paths: &[String]) -> bool {
        !paths.is_empty() && paths.iter().all(|p| self.permits(p))
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.globs.is_empty()
    }
}
