//! PowerShell command validation.
//!
//! Parsing is delegated to the host's PowerShell engine through
//! [`PowerShellParser`]. Hosts without one get [`UnavailablePowerShellParser`],
//! and callers fall back to the bash validator.

mod ast;
mod detect;
mod parser;
mod targets;
mod validator;

pub use ast::{Invocation, PsCommand, PsElement, PsNode, PsRedirect};
pub use detect::{
    launches_powershell, looks_like_powershell, needs_powershell_parser, unwrap_powershell_command,
};
pub use parser::{
    PowerShellParser, PwshParser, RawPsAst, UnavailablePowerShellParser, parse_ast_json,
};
pub use targets::{is_write_cmdlet, powershell_write_targets};
pub use validator::PowerShellValidator;
