//! Bash command validation over a tree-sitter syntax tree.

mod ast;
mod hazards;
mod parser;
mod validator;
mod windows_path;

pub use ast::{
    Expansion, ExpansionKind, LogicalOp, Redirect, RedirectOp, ShellNode, SimpleCommand, Word,
};
pub use parser::{ShellParser, TreeSitterBashParser};
pub use validator::{BashValidator, UnknownNodePolicy, get_bash_rejection_reason, validate_bash_command};
pub use hazards::unsafe_argument;
pub(crate) use validator::{allowlist_text, promote_partial_fail};
pub use windows_path::normalize_windows_paths;
