//! Command safety analysis for read-only mode.
//!
//! This module provides the validation layer behind safe mode:
//! - AST-based bash command validation (tree-sitter)
//! - PowerShell validation through the host's own parser
//! - Allowlist pattern compilation with a ReDoS guard
//! - Write-path globs and cross-platform path normalization
//! - Mismatch diagnostics for rejected commands

pub mod bash;
pub mod diagnostics;
pub mod path;
pub mod pattern;
pub mod powershell;
pub mod verdict;

mod error;

pub use bash::{
    BashValidator, ShellParser, TreeSitterBashParser, UnknownNodePolicy, get_bash_rejection_reason,
    normalize_windows_paths, validate_bash_command,
};
pub use diagnostics::analyze_mismatch;
pub use error::ParseError;
pub use path::{Platform, normalize_path_for_comparison};
pub use pattern::{CompiledGlob, CompiledPattern, PatternError, detect_redos};
pub use powershell::{PowerShellParser, PowerShellValidator, PwshParser, UnavailablePowerShellParser};
pub use verdict::{
    MismatchAnalysis, OperatorKind, PatternSummary, RejectionReason, SubcommandResult,
    SubstitutionKind, Verdict,
};
