//! Permission configuration: raw user JSON and its compiled form.
//!
//! Raw configuration is deserialized from camelCase JSON:
//!
//! ```json
//! {
//!   "readOnlyBashPatterns": [
//!     "^ls\\b",
//!     { "pattern": "^git\\s+(status|log)\\b", "comment": "git: status, log" }
//!   ],
//!   "readOnlyMcpPatterns": ["^(list|get)_"],
//!   "allowedApiEndpoints": [{ "method": "POST", "path": "^/search$" }],
//!   "allowedWritePaths": ["~/notes/**"],
//!   "displayName": "Explore",
//!   "shortcutHint": "SHIFT+TAB"
//! }
//! ```
//!
//! Compilation never fails as a whole: each invalid entry is skipped, logged
//! and reported, so one bad pattern cannot disable the rest of the allowlist.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::security::bash::UnknownNodePolicy;
use crate::security::path::Platform;
use crate::security::pattern::{CompiledGlob, CompiledPattern, PatternError};

/// Tools that mutate files and are blocked in safe mode outside the
/// plans/data folders and allowed write paths.
pub const BLOCKED_TOOL_NAMES: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

const DEFAULT_DISPLAY_NAME: &str = "Explore";
const DEFAULT_SHORTCUT_HINT: &str = "SHIFT+TAB";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid permission config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{field}[{index}]: {source}")]
    Pattern {
        field: &'static str,
        index: usize,
        #[source]
        source: PatternError,
    },
}

/// Allowlist entry: a bare regex or a regex with an explanatory comment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternEntry {
    Bare(String),
    Annotated {
        pattern: String,
        #[serde(default)]
        comment: Option<String>,
    },
}

impl PatternEntry {
    pub fn annotated(pattern: &str, comment: &str) -> Self {
        Self::Annotated {
            pattern: pattern.to_string(),
            comment: Some(comment.to_string()),
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            Self::Bare(p) | Self::Annotated { pattern: p, .. } => p,
        }
    }

    pub fn comment(&self) -> Option<&str> {
        match self {
            Self::Bare(_) => None,
            Self::Annotated { comment, .. } => comment.as_deref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiEndpointEntry {
    pub method: String,
    /// Regex over the request path.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPermissionConfig {
    #[serde(default)]
    pub read_only_bash_patterns: Vec<PatternEntry>,

    #[serde(default)]
    pub read_only_mcp_patterns: Vec<PatternEntry>,

    #[serde(default)]
    pub allowed_api_endpoints: Vec<ApiEndpointEntry>,

    #[serde(default)]
    pub allowed_write_paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut_hint: Option<String>,

    /// Where the user edits this configuration; shown in rejection messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_path: Option<String>,

    #[serde(default)]
    pub unknown_nodes: UnknownNodePolicy,
}

impl RawPermissionConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Built-in read-only allowlist.
    pub fn builtin() -> Self {
        Self {
            read_only_bash_patterns: BUILTIN_BASH_PATTERNS
                .iter()
                .map(|(p, c)| PatternEntry::annotated(p, c))
                .collect(),
            read_only_mcp_patterns: vec![PatternEntry::annotated(
                r"^(list|get|search|read|describe|query|fetch|find|view|show)[_-]",
                "Read-only tool names: list_, get_, search_, read_, describe_, query_, fetch_, find_, view_, show_",
            )],
            ..Default::default()
        }
    }

    pub fn compile(&self) -> CompiledConfig {
        self.compile_for(Platform::current())
    }

    pub fn compile_for(&self, platform: Platform) -> CompiledConfig {
        let mut errors = Vec::new();

        let read_only_bash_patterns =
            compile_entries("readOnlyBashPatterns", &self.read_only_bash_patterns, &mut errors);
        let read_only_mcp_patterns =
            compile_entries("readOnlyMcpPatterns", &self.read_only_mcp_patterns, &mut errors);

        let mut allowed_api_endpoints = Vec::new();
        for (index, entry) in self.allowed_api_endpoints.iter().enumerate() {
            match CompiledPattern::compile(&entry.path, entry.comment.as_deref()) {
                Ok(path) => allowed_api_endpoints.push(CompiledEndpoint {
                    method: entry.method.trim().to_ascii_uppercase(),
                    path,
                }),
                Err(source) => record(&mut errors, "allowedApiEndpoints", index, source),
            }
        }

        let mut allowed_write_paths = Vec::new();
        for (index, glob) in self.allowed_write_paths.iter().enumerate() {
            match CompiledGlob::compile(glob, platform) {
                Ok(glob) => allowed_write_paths.push(glob),
                Err(source) => record(&mut errors, "allowedWritePaths", index, source),
            }
        }

        let config = PermissionConfig {
            read_only_bash_patterns,
            read_only_mcp_patterns,
            allowed_api_endpoints,
            allowed_write_paths,
            display_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
            shortcut_hint: self
                .shortcut_hint
                .clone()
                .unwrap_or_else(|| DEFAULT_SHORTCUT_HINT.to_string()),
            guidance: GuidancePaths {
                config_file: self.config_file.clone(),
                docs_path: self.docs_path.clone(),
            },
            unknown_nodes: self.unknown_nodes,
            platform,
        };
        CompiledConfig { config, errors }
    }
}

fn record(errors: &mut Vec<ConfigError>, field: &'static str, index: usize, source: PatternError) {
    tracing::warn!(field, index, error = %source, "skipping invalid permission pattern");
    errors.push(ConfigError::Pattern {
        field,
        index,
        source,
    });
}

fn compile_entries(
    field: &'static str,
    entries: &[PatternEntry],
    errors: &mut Vec<ConfigError>,
) -> Vec<CompiledPattern> {
    let mut compiled = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match CompiledPattern::compile(entry.pattern(), entry.comment()) {
            Ok(pattern) => compiled.push(pattern),
            Err(source) => record(errors, field, index, source),
        }
    }
    compiled
}

/// Non-GET API call permitted in safe mode.
#[derive(Clone, Debug)]
pub struct CompiledEndpoint {
    pub method: String,
    pub path: CompiledPattern,
}

impl CompiledEndpoint {
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.method.eq_ignore_ascii_case(method) && self.path.is_match(path)
    }
}

/// Pointers appended to allowlist-miss messages, shown only when set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuidancePaths {
    pub config_file: Option<String>,
    pub docs_path: Option<String>,
}

/// Compiled, immutable permission configuration.
#[derive(Clone, Debug)]
pub struct PermissionConfig {
    pub read_only_bash_patterns: Vec<CompiledPattern>,
    pub read_only_mcp_patterns: Vec<CompiledPattern>,
    pub allowed_api_endpoints: Vec<CompiledEndpoint>,
    pub allowed_write_paths: Vec<CompiledGlob>,
    pub display_name: String,
    pub shortcut_hint: String,
    pub guidance: GuidancePaths,
    pub unknown_nodes: UnknownNodePolicy,
    /// Path semantics the write globs were compiled for.
    pub platform: Platform,
}

impl PermissionConfig {
    pub fn blocked_tool_names(&self) -> &'static [&'static str] {
        BLOCKED_TOOL_NAMES
    }

    pub fn is_blocked_tool(&self, tool_name: &str) -> bool {
        BLOCKED_TOOL_NAMES.contains(&tool_name)
    }

    pub fn allows_endpoint(&self, method: &str, path: &str) -> bool {
        self.allowed_api_endpoints
            .iter()
            .any(|e| e.matches(method, path))
    }
}

impl Default for PermissionConfig {
    fn default() -> Self {
        let compiled = RawPermissionConfig::builtin().compile();
        compiled.config
    }
}

/// Result of compiling a raw configuration.
#[derive(Debug)]
pub struct CompiledConfig {
    pub config: PermissionConfig,
    pub errors: Vec<ConfigError>,
}

impl CompiledConfig {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// What a resolver may use to pick a configuration.
#[derive(Clone, Debug, Default)]
pub struct PermissionsContext {
    pub session_id: Option<String>,
    pub workspace_root: Option<PathBuf>,
}

impl PermissionsContext {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            workspace_root: None,
        }
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }
}

/// Supplies the already-compiled configuration for a context.
pub trait PermissionConfigResolver: Send + Sync {
    fn resolve(&self, context: &PermissionsContext) -> Arc<PermissionConfig>;
}

/// Resolver that hands out the same configuration to everyone.
#[derive(Clone, Debug, Default)]
pub struct StaticConfigResolver {
    config: Arc<PermissionConfig>,
}

impl StaticConfigResolver {
    pub fn new(config: PermissionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl PermissionConfigResolver for StaticConfigResolver {
    fn resolve(&self, _context: &PermissionsContext) -> Arc<PermissionConfig> {
        Arc::clone(&self.config)
    }
}

const BUILTIN_BASH_PATTERNS: &[(&str, &str)] = &[
    (
        r"^(ls|tree|pwd|whoami|hostname|uname|date|id|groups|which|whereis|type|file|stat|du|df|free|uptime|ps|printenv|echo|printf|true|false|basename|dirname|realpath|readlink)\b",
        "Inspect files and the system: ls, tree, pwd, whoami, hostname, uname, date, id, which, type, file, stat, du, df, ps, printenv, echo, printf, basename, dirname, realpath",
    ),
    (
        r"^(cat|head|tail|less|more|wc|cut|nl|tac|rev|column|fold|diff|cmp|comm|strings|od|hexdump|md5sum|sha1sum|sha256sum|jq)\b",
        "Read file contents: cat, head, tail, less, more, wc, cut, nl, tac, diff, cmp, comm, strings, od, hexdump, md5sum, sha256sum, jq",
    ),
    (
        r"^(grep|egrep|fgrep|rg|ag|ack)\b",
        "Search: grep, egrep, fgrep, rg, ag, ack",
    ),
    (
        r"^git\s+(status|log|diff|show|blame|shortlog|describe|rev-parse|ls-files|ls-tree|reflog|grep|cat-file)\b",
        "Read-only git: status, log, diff, show, blame, shortlog, describe, rev-parse, ls-files, ls-tree, reflog, grep, cat-file",
    ),
    (
        r"^git\s+(branch|tag|remote)(\s+(-a|-r|-v|-vv|--list|--show-current))?\s*$",
        "Listing git refs: branch, tag, remote (with -a, -r, -v, --list, --show-current)",
    ),
    (
        r"^git\s+stash\s+(list|show)\b",
        "Read-only git stash: list, show",
    ),
    (
        r"^cargo\s+(metadata|tree|search|version|--version|-V)\b",
        "Read-only cargo: metadata, tree, search, version",
    ),
    (
        r"^(npm|pnpm|yarn)\s+(ls|list|view|info|outdated|why|--version|-v)\b",
        "Read-only package queries: ls, list, view, info, outdated, why",
    ),
    (
        r"^(node|python|python3|ruby|go|rustc|java|deno|bun)\s+(--version|-V|version)\s*$",
        "Toolchain version checks: --version, version",
    ),
    (
        r"(?i)^(Get-ChildItem|Get-Content|Get-Item|Get-ItemProperty|Get-Location|Get-Process|Get-Service|Get-Command|Get-Help|Get-Date|Get-FileHash|Get-Member|Select-String|Select-Object|Where-Object|Sort-Object|Measure-Object|Format-List|Format-Table|Test-Path|Resolve-Path|Split-Path|Join-Path|ConvertTo-Json|ConvertFrom-Json|Write-Output|Out-String|gci|gc|dir|type)\b",
        "Read-only PowerShell cmdlets: Get-ChildItem, Get-Content, Get-Item, Get-Location, Get-Process, Select-String, Select-Object, Where-Object, Sort-Object, Measure-Object, Test-Path, Resolve-Path",
    ),
];
