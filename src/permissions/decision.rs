//! Outcome of a safe-mode permission check.

use crate::security::verdict::RejectionReason;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionStatus {
    Allowed,
    Denied,
}

/// Allow/deny decision for one tool call.
///
/// `reason` is a short note for allowed calls and the full user-facing
/// explanation for denied ones.
#[derive(Clone, Debug)]
pub struct PermissionResult {
    pub status: PermissionStatus,
    pub reason: String,
    pub tool_name: Option<String>,
    /// Structured cause of a shell denial.
    pub rejection: Option<RejectionReason>,
}

impl PermissionResult {
    pub fn allowed(reason: impl Into<String>) -> Self {
        Self {
            status: PermissionStatus::Allowed,
            reason: reason.into(),
            tool_name: None,
            rejection: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            status: PermissionStatus::Denied,
            reason: reason.into(),
            tool_name: None,
            rejection: None,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_rejection(mut self, rejection: RejectionReason) -> Self {
        self.rejection = Some(rejection);
        self
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self.status, PermissionStatus::Allowed)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self.status, PermissionStatus::Denied)
    }

    /// The denial message, `None` when allowed.
    pub fn denial_message(&self) -> Option<&str> {
        self.is_denied().then_some(self.reason.as_str())
    }
}
