//! Permission modes and the safe-mode policy for tool calls.

mod config;
mod decision;
mod format;
mod modes;
mod policy;
mod session;
mod tool_kind;
mod write_target;

pub use config::{
    ApiEndpointEntry, BLOCKED_TOOL_NAMES, CompiledConfig, CompiledEndpoint, ConfigError,
    GuidancePaths, PatternEntry, PermissionConfig, PermissionConfigResolver, PermissionsContext,
    RawPermissionConfig, StaticConfigResolver,
};
pub use decision::{PermissionResult, PermissionStatus};
pub use format::{
    format_ambiguous_write_message, format_api_message, format_bash_rejection_message,
    format_blocked_tool_message, format_namespaced_tool_message, format_session_tool_message,
};
pub use modes::PermissionMode;
pub use policy::{ToolCheckOptions, should_allow_tool_in_mode};
pub use session::{ModeListener, SessionModeState, SessionModeStore, SubscriptionId};
pub use tool_kind::{
    ADMIN_NAMESPACES, READ_ONLY_TOOLS, SESSION_READ_ONLY_TOOLS, SHELL_TOOLS, ToolKind,
    is_read_only_tool, split_namespace,
};
pub use write_target::{
    FolderException, WriteTargets, bash_write_targets, escaped_quote_targets, looks_like_write,
    powershell_targets,
};
