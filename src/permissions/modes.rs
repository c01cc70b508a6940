//! Permission modes for controlling how much an agent may do unattended.

use serde::{Deserialize, Serialize};

/// Operating mode of one session.
///
/// # Modes
///
/// - **Safe** (shown as *Explore*): read-only. Shell commands must pass the
///   AST validator and allowlist, file-mutating tools are blocked except
///   inside the plans/data folders and allowed write paths.
///
/// - **Ask**: every check passes at this layer; confirmation happens in the
///   caller's approval flow.
///
/// - **AllowAll** (shown as *Auto*): no checks at all.
///   ⚠️ Only for fully trusted environments.
///
/// # Example
///
/// ```rust
/// use agent_safe_mode::permissions::PermissionMode;
///
/// let mode: PermissionMode = "explore".parse().unwrap();
/// assert!(mode.is_read_only());
/// assert_eq!(mode.next(), PermissionMode::Ask);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// Read-only mode.
    Safe,

    /// Checks pass here, the caller asks the user.
    #[default]
    Ask,

    /// No permission checks.
    AllowAll,
}

impl PermissionMode {
    pub const ALL: [PermissionMode; 3] = [Self::Safe, Self::Ask, Self::AllowAll];

    pub fn allows_all(&self) -> bool {
        matches!(self, PermissionMode::AllowAll)
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, PermissionMode::Safe)
    }

    pub fn is_default(&self) -> bool {
        matches!(self, PermissionMode::Ask)
    }

    /// Next mode in the safe → ask → allow-all cycle.
    pub fn next(&self) -> Self {
        match self {
            PermissionMode::Safe => PermissionMode::Ask,
            PermissionMode::Ask => PermissionMode::AllowAll,
            PermissionMode::AllowAll => PermissionMode::Safe,
        }
    }

    /// User-facing name.
    pub fn display_name(&self) -> &'static str {
        match self {
            PermissionMode::Safe => "Explore",
            PermissionMode::Ask => "Ask",
            PermissionMode::AllowAll => "Auto",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PermissionMode::Safe => "Read-only: only allowlisted, non-mutating operations run",
            PermissionMode::Ask => "Ask before running anything that changes the system",
            PermissionMode::AllowAll => "Run everything without checks (dangerous)",
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionMode::Safe => write!(f, "safe"),
            PermissionMode::Ask => write!(f, "ask"),
            PermissionMode::AllowAll => write!(f, "allow-all"),
        }
    }
}

impl std::str::FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "safe" | "explore" | "plan" | "readonly" | "read-only" | "read_only" => {
                Ok(PermissionMode::Safe)
            }
            "ask" | "default" => Ok(PermissionMode::Ask),
            "allow-all" | "allow_all" | "allowall" | "auto" | "bypass" => {
                Ok(PermissionMode::AllowAll)
            }
            _ => Err(format!("Unknown permission mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        let mode = PermissionMode::default();
        assert!(mode.is_default());
        assert!(!mode.allows_all());
        assert!(!mode.is_read_only());
    }

    #[test]
    fn test_safe_mode() {
        let mode = PermissionMode::Safe;
        assert!(mode.is_read_only());
        assert!(!mode.allows_all());
        assert_eq!(mode.display_name(), "Explore");
    }

    #[test]
    fn test_allow_all_mode() {
        let mode = PermissionMode::AllowAll;
        assert!(mode.allows_all());
        assert!(!mode.is_read_only());
        assert_eq!(mode.display_name(), "Auto");
    }

    #[test]
    fn test_cycle_visits_every_mode() {
        let mut mode = PermissionMode::Safe;
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(mode);
            mode = mode.next();
        }
        assert_eq!(mode, PermissionMode::Safe);
        assert_eq!(seen, PermissionMode::ALL.to_vec());
    }

    #[test]
    fn test_display() {
        assert_eq!(PermissionMode::Safe.to_string(), "safe");
        assert_eq!(PermissionMode::Ask.to_string(), "ask");
        assert_eq!(PermissionMode::AllowAll.to_string(), "allow-all");
    }

    #[test]
    fn test_from_str() {
        assert_eq!("safe".parse::<PermissionMode>().unwrap(), PermissionMode::Safe);
        assert_eq!("Explore".parse::<PermissionMode>().unwrap(), PermissionMode::Safe);
        assert_eq!("plan".parse::<PermissionMode>().unwrap(), PermissionMode::Safe);
        assert_eq!("default".parse::<PermissionMode>().unwrap(), PermissionMode::Ask);
        assert_eq!("auto".parse::<PermissionMode>().unwrap(), PermissionMode::AllowAll);
        assert_eq!("allow-all".parse::<PermissionMode>().unwrap(), PermissionMode::AllowAll);
        assert!("yolo".parse::<PermissionMode>().is_err());
    }

    #[test]
    fn test_serde() {
        let json = serde_json::to_string(&PermissionMode::AllowAll).unwrap();
        assert_eq!(json, "\"allow-all\"");

        let parsed: PermissionMode = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, PermissionMode::AllowAll);
    }
}
