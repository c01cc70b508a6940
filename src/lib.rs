//! # agent-safe-mode
//!
//! Read-only permission gate for LLM coding agents.
//!
//! In safe mode ("Explore") an agent may inspect a workspace but not change
//! it. Shell commands are parsed into a syntax tree and rejected unless every
//! simple command matches a read-only allowlist and no construct can write,
//! execute hidden code or escape the check. File-editing tools are blocked
//! except inside the session's plans and data folders.
//!
//! ## Quick Start
//!
//! ```rust
//! use agent_safe_mode::{PermissionConfig, PermissionMode, ToolCheckOptions, should_allow_tool_in_mode};
//! use serde_json::json;
//!
//! let config = PermissionConfig::default();
//! let options = ToolCheckOptions::default();
//!
//! let status = should_allow_tool_in_mode(
//!     "Bash",
//!     &json!({ "command": "git status && git log --oneline -5" }),
//!     PermissionMode::Safe,
//!     &config,
//!     &options,
//! );
//! assert!(status.is_allowed());
//!
//! let push = should_allow_tool_in_mode(
//!     "Bash",
//!     &json!({ "command": "git push origin main" }),
//!     PermissionMode::Safe,
//!     &config,
//!     &options,
//! );
//! assert!(push.is_denied());
//! ```
//!
//! ## Running commands
//!
//! ```rust,no_run
//! use agent_safe_mode::{ExecuteOptions, PermissionMode, execute_command};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = ExecuteOptions::new(PermissionMode::Safe).timeout(Duration::from_secs(10));
//!     let result = execute_command("ls -la", options).await;
//!     println!("{}", result.stdout);
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod permissions;
pub mod security;
pub mod tools;

use std::path::Path;

pub use permissions::{
    CompiledConfig, ConfigError, PermissionConfig, PermissionConfigResolver, PermissionMode,
    PermissionResult, PermissionStatus, PermissionsContext, RawPermissionConfig,
    SessionModeStore, StaticConfigResolver, ToolCheckOptions, format_bash_rejection_message,
    should_allow_tool_in_mode,
};
pub use security::{
    BashValidator, ParseError, PatternError, Platform, PowerShellValidator, RejectionReason,
    UnknownNodePolicy, Verdict, get_bash_rejection_reason, normalize_path_for_comparison,
    validate_bash_command,
};
pub use tools::{ExecuteOptions, ExecuteResult, execute_command};

/// Error type for agent-safe-mode operations.
///
/// Validation never fails with an error: denials are values. These variants
/// cover loading configuration and driving the parsers directly.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Permission configuration could not be read or compiled.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An allowlist pattern or write glob was rejected.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    /// A shell grammar parser failed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration content or allowlist patterns are wrong
    Configuration,
    /// A parser could not handle the input or is missing on this host
    Parsing,
    /// IO and serialization failures
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::Pattern(_) => ErrorCategory::Configuration,
            Error::Parse(_) => ErrorCategory::Parsing,
            Error::Json(_) | Error::Io(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reads and compiles a JSON permission configuration file.
///
/// Invalid entries are skipped and reported in [`CompiledConfig::errors`];
/// only unreadable files and malformed JSON fail.
pub fn load_permission_config(path: impl AsRef<Path>) -> Result<CompiledConfig> {
    let json = std::fs::read_to_string(path)?;
    Ok(RawPermissionConfig::from_json(&json)?.compile())
}

/// Like [`load_permission_config`], but any invalid entry is an error.
pub fn load_permission_config_strict(path: impl AsRef<Path>) -> Result<PermissionConfig> {
    let CompiledConfig { config, mut errors } = load_permission_config(path)?;
    if errors.is_empty() {
        Ok(config)
    } else {
        Err(errors.remove(0).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_error_display() {
        let err: Error = PatternError::Empty.into();
        assert!(err.to_string().starts_with("Invalid pattern"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(Error::from(ParseError::Unavailable).category(), ErrorCategory::Parsing);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(Error::from(io).category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_load_permission_config() {
        let file = write_config(
            r#"{
                "readOnlyBashPatterns": [
                    { "pattern": "^make\\s+check\\b", "comment": "dry checks" },
                    "(a+)+"
                ],
                "displayName": "Review"
            }"#,
        );

        let compiled = load_permission_config(file.path()).unwrap();
        assert_eq!(compiled.errors.len(), 1);
        assert_eq!(compiled.config.display_name, "Review");
        assert_eq!(compiled.config.read_only_bash_patterns.len(), 1);

        let err = load_permission_config_strict(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Pattern { index: 1, .. })));
    }

    #[test]
    fn test_load_permission_config_failures() {
        let missing = load_permission_config("/nonexistent/agent-safe-mode.json").unwrap_err();
        assert!(matches!(missing, Error::Io(_)));

        let file = write_config("{ not json");
        let malformed = load_permission_config(file.path()).unwrap_err();
        assert!(matches!(malformed, Error::Config(ConfigError::Json(_))));
    }
}
