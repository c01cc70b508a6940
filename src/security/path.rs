//! Cross-platform path canonicalization for write-target comparisons.
//!
//! Paths here are compared as strings: nothing touches the filesystem, so a
//! target that does not exist yet (the usual case for a write) normalizes the
//! same way as one that does.

use std::path::PathBuf;

/// Path semantics used when comparing and parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    Posix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }

    /// Windows paths compare case-insensitively, everything else exactly.
    pub fn case_insensitive(&self) -> bool {
        self.is_windows()
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Replace a leading `~` with the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if path == "~" || path.starts_with("~/") || path.starts_with("~\\") {
        if let Some(home) = home_dir() {
            let home = home.to_string_lossy().replace('\\', "/");
            return format!("{}{}", home.trim_end_matches('/'), &path[1..]);
        }
    }
    path.to_string()
}

fn strip_quotes(path: &str) -> &str {
    let trimmed = path.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return inner;
        }
    }
    trimmed
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || has_drive_prefix(path)
}

/// Canonical string form of `path`: `~` expanded, forward slashes, absolute
/// (joined onto `cwd` when relative), `.`/`..` resolved, no trailing slash,
/// and lowercased on Windows.
pub fn normalize_path_for_comparison(path: &str, cwd: Option<&str>, platform: Platform) -> String {
    let expanded = expand_tilde(strip_quotes(path)).replace('\\', "/");

    let joined = match cwd {
        Some(cwd) if !is_absolute(&expanded) => {
            let base = expand_tilde(strip_quotes(cwd)).replace('\\', "/");
            format!("{}/{}", base.trim_end_matches('/'), expanded)
        }
        _ => expanded,
    };

    let (root, rest) = if has_drive_prefix(&joined) {
        let (drive, rest) = joined.split_at(2);
        (format!("{}/", drive), rest.to_string())
    } else if joined.starts_with('/') {
        ("/".to_string(), joined)
    } else {
        (String::new(), joined)
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if root.is_empty() {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let normalized = format!("{}{}", root, segments.join("/"));
    if platform.case_insensitive() {
        normalized.to_lowercase()
    } else {
        normalized
    }
}

/// `path` equals `folder` or lies below it. Both sides must already be
/// normalized.
pub fn is_within(path: &str, folder: &str, case_insensitive: bool) -> bool {
    let (path, folder) = if case_insensitive {
        (path.to_lowercase(), folder.to_lowercase())
    } else {
        (path.to_string(), folder.to_string())
    };
    if folder.is_empty() {
        return false;
    }
    if path == folder {
        return true;
    }
    let prefix = if folder.ends_with('/') {
        folder
    } else {
        format!("{}/", folder)
    };
    path.starts_with(&prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posix_relative_joined_and_resolved() {
        let p = normalize_path_for_comparison("./plans/../plans/a.md", Some("/work"), Platform::Posix);
        assert_eq!(p, "/work/plans/a.md");
    }

    #[test]
    fn test_windows_backslashes_and_case() {
        let p = normalize_path_for_comparison(r"C:\Users\Me\Plans\", None, Platform::Windows);
        assert_eq!(p, "c:/users/me/plans");
    }

    #[test]
    fn test_quotes_stripped() {
        let p = normalize_path_for_comparison("\"/tmp/a b.txt\"", None, Platform::Posix);
        assert_eq!(p, "/tmp/a b.txt");
    }

    #[test]
    fn test_parent_cannot_escape_root() {
        let p = normalize_path_for_comparison("/../../etc", None, Platform::Posix);
        assert_eq!(p, "/etc");
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/a/plans/x.md", "/a/plans", false));
        assert!(is_within("/a/plans", "/a/plans", false));
        assert!(!is_within("/a/plans-evil/x.md", "/a/plans", false));
        assert!(!is_within("/a/x.md", "/a/plans", false));
        assert!(is_within("/A/Plans/x.md", "/a/plans", true));
        assert!(!is_within("/A/Plans/x.md", "/a/plans", false));
    }

    #[test]
    fn test_tilde_expansion() {
        if let Some(home) = home_dir() {
            let home = home.to_string_lossy().replace('\\', "/");
            assert_eq!(expand_tilde("~/notes"), format!("{}/notes", home.trim_end_matches('/')));
        }
        assert_eq!(expand_tilde("a~b"), "a~b");
    }
}
