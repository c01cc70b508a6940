//! Files a PowerShell command writes to.

use super::ast::{PsCommand, PsElement, PsNode, PsRedirect};

const WRITE_CMDLETS: &[&str] = &["Set-Content", "Out-File"];
const PATH_PARAMETERS: &[&str] = &["Path", "LiteralPath", "FilePath"];

/// Whether any command in the tree is one of the content-writing cmdlets.
pub fn is_write_cmdlet(tree: &PsNode) -> bool {
    tree.commands().iter().any(|cmd| cmd.is_named(WRITE_CMDLETS))
}

/// Paths written by `Set-Content`/`Out-File` and by file redirects, in
/// source order. Targets that are not string literals are returned as
/// written; they will not match any allowed folder.
pub fn powershell_write_targets(tree: &PsNode) -> Vec<String> {
    let mut targets = Vec::new();
    for cmd in tree.commands() {
        if cmd.is_named(WRITE_CMDLETS)
            && let Some(path) = cmdlet_path(cmd)
        {
            targets.push(path);
        }
        targets.extend(cmd.redirects.iter().filter_map(|r| match r {
            PsRedirect::File { target, .. } if !r.is_safe() => Some(target.clone()),
            _ => None,
        }));
    }
    targets
}

fn cmdlet_path(cmd: &PsCommand) -> Option<String> {
    let mut elements = cmd.elements.iter().peekable();
    let mut first_positional = None;
    let mut after_parameter = false;

    while let Some(element) = elements.next() {
        match element {
            PsElement::Parameter { name, argument } => {
                let is_path = PATH_PARAMETERS
                    .iter()
                    .any(|p| p.eq_ignore_ascii_case(name));
                if is_path {
                    if let Some(arg) = argument {
                        return Some(arg.text());
                    }
                    if let Some(PsElement::Value { text, .. }) = elements.peek() {
                        return Some(text.clone());
                    }
                }
                after_parameter = argument.is_none();
            }
            PsElement::Value { text, .. } => {
                if !after_parameter && first_positional.is_none() {
                    first_positional = Some(text.clone());
                }
                after_parameter = false;
            }
        }
    }
    first_positional
}
