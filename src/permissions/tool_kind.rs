//! Classification of a tool call into the policy class that governs it.
//!
//! Tool names are inspected once, here. Everything downstream matches on
//! [`ToolKind`], so adding a class forces every policy decision to handle it.

use serde_json::Value;

use super::config::BLOCKED_TOOL_NAMES;

/// Tools that never change anything.
pub const READ_ONLY_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "LS",
    "WebFetch",
    "WebSearch",
    "TodoWrite",
    "NotebookRead",
    "TaskOutput",
];

pub const SHELL_TOOLS: &[&str] = &["Bash"];

/// MCP servers that manage the agent itself; always reachable so the user
/// can change settings while in safe mode.
pub const ADMIN_NAMESPACES: &[&str] = &["agent-admin", "preferences"];

pub const SESSION_NAMESPACE: &str = "session";

/// Session tools that only read. Every other session tool mutates.
pub const SESSION_READ_ONLY_TOOLS: &[&str] = &[
    "get_session",
    "get_session_info",
    "list_sessions",
    "search_sessions",
    "get_messages",
    "list_labels",
    "get_permission_mode",
];

const MCP_PREFIX: &str = "mcp__";
const API_PREFIX: &str = "api_";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolKind<'a> {
    ReadOnly,
    Shell {
        command: Option<&'a str>,
    },
    /// Whole-file write or edit with a declared target path.
    StructuredWrite {
        path: Option<&'a str>,
    },
    Admin,
    Session {
        tool: &'a str,
    },
    /// API-shaped call, namespaced or bare. A missing method means GET.
    Api {
        method: &'a str,
        path: Option<&'a str>,
    },
    /// Any other namespaced tool; judged by its name.
    Namespaced {
        tool: &'a str,
    },
    Unrecognized,
}

impl<'a> ToolKind<'a> {
    pub fn classify(tool_name: &'a str, input: &'a Value) -> Self {
        if is_read_only_tool(tool_name) {
            return Self::ReadOnly;
        }
        if SHELL_TOOLS.contains(&tool_name) {
            return Self::Shell {
                command: str_field(input, "command"),
            };
        }
        if BLOCKED_TOOL_NAMES.contains(&tool_name) {
            let field = if tool_name == "NotebookEdit" {
                "notebook_path"
            } else {
                "file_path"
            };
            return Self::StructuredWrite {
                path: str_field(input, field),
            };
        }

        if let Some((namespace, tool)) = split_namespace(tool_name) {
            if ADMIN_NAMESPACES.contains(&namespace) {
                return Self::Admin;
            }
            if namespace == SESSION_NAMESPACE {
                return Self::Session { tool };
            }
            if tool.starts_with(API_PREFIX) {
                return Self::api(input);
            }
            return Self::Namespaced { tool };
        }

        if tool_name.starts_with(API_PREFIX) {
            return Self::api(input);
        }
        Self::Unrecognized
    }

    fn api(input: &'a Value) -> Self {
        Self::Api {
            method: str_field(input, "method").unwrap_or("GET"),
            path: str_field(input, "path"),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::Shell { .. } => "shell",
            Self::StructuredWrite { .. } => "structured_write",
            Self::Admin => "admin",
            Self::Session { .. } => "session",
            Self::Api { .. } => "api",
            Self::Namespaced { .. } => "namespaced",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// `Read`, or any namespaced variant ending in `__Read`.
pub fn is_read_only_tool(tool_name: &str) -> bool {
    let base = tool_name
        .rsplit_once("__")
        .map_or(tool_name, |(_, base)| base);
    READ_ONLY_TOOLS.contains(&base)
}

/// `mcp__<namespace>__<tool>` split into its parts.
pub fn split_namespace(tool_name: &str) -> Option<(&str, &str)> {
    tool_name
        .strip_prefix(MCP_PREFIX)?
        .split_once("__")
        .filter(|(ns, tool)| !ns.is_empty() && !tool.is_empty())
}

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_read_only_tools() {
        let input = json!({});
        assert_eq!(ToolKind::classify("Read", &input), ToolKind::ReadOnly);
        assert_eq!(ToolKind::classify("mcp__fs__Grep", &input), ToolKind::ReadOnly);
        assert!(!is_read_only_tool("Write"));
        assert!(!is_read_only_tool("mcp__fs__Readme"));
    }

    #[test]
    fn test_shell_and_structured_writes() {
        let input = json!({ "command": "ls", "file_path": "/tmp/a", "notebook_path": "/tmp/n.ipynb" });
        assert_eq!(
            ToolKind::classify("Bash", &input),
            ToolKind::Shell { command: Some("ls") }
        );
        assert_eq!(
            ToolKind::classify("Edit", &input),
            ToolKind::StructuredWrite { path: Some("/tmp/a") }
        );
        assert_eq!(
            ToolKind::classify("NotebookEdit", &input),
            ToolKind::StructuredWrite {
                path: Some("/tmp/n.ipynb")
            }
        );
        assert_eq!(
            ToolKind::classify("Write", &json!({})),
            ToolKind::StructuredWrite { path: None }
        );
    }

    #[test]
    fn test_namespaced_tools() {
        let input = json!({ "method": "POST", "path": "/v1/items" });
        assert_eq!(
            ToolKind::classify("mcp__preferences__set_theme", &input),
            ToolKind::Admin
        );
        assert_eq!(
            ToolKind::classify("mcp__session__rename_session", &input),
            ToolKind::Session {
                tool: "rename_session"
            }
        );
        assert_eq!(
            ToolKind::classify("mcp__github__api_request", &input),
            ToolKind::Api {
                method: "POST",
                path: Some("/v1/items")
            }
        );
        assert_eq!(
            ToolKind::classify("mcp__github__list_issues", &input),
            ToolKind::Namespaced {
                tool: "list_issues"
            }
        );
    }

    #[test]
    fn test_bare_api_and_unknown() {
        assert_eq!(
            ToolKind::classify("api_linear", &json!({ "path": "/issues" })),
            ToolKind::Api {
                method: "GET",
                path: Some("/issues")
            }
        );
        assert_eq!(ToolKind::classify("Frobnicate", &json!({})), ToolKind::Unrecognized);
        assert_eq!(ToolKind::classify("mcp__", &json!({})), ToolKind::Unrecognized);
    }
}
