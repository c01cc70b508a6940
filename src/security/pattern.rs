//! Compilation of user-authored allowlist patterns and write-path globs.
//!
//! Allowlist patterns are regular expressions taken straight from user
//! configuration. Besides syntax and length checks, a conservative static
//! scan rejects the classic catastrophic-backtracking shapes so the same
//! configuration stays safe if it is ever evaluated by a backtracking engine.

use std::fmt;

use regex::Regex;
use thiserror::Error;

use super::path::{Platform, expand_tilde};

pub const MAX_PATTERN_LENGTH: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedosShape {
    /// `(a+)+`
    NestedQuantifier,
    /// `.*.*`
    RepeatedWildcard,
    /// `(a|a)+`
    QuantifiedAlternation,
}

impl fmt::Display for RedosShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NestedQuantifier => write!(f, "nested quantified group such as (a+)+"),
            Self::RepeatedWildcard => write!(f, "repeated greedy wildcard such as .*.*"),
            Self::QuantifiedAlternation => {
                write!(f, "quantified alternation group such as (a|b)+")
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,

    #[error("pattern is {len} characters long (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("invalid regex `{pattern}`: {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("pattern `{pattern}` risks catastrophic backtracking: {shape}")]
    Redos { pattern: String, shape: RedosShape },

    #[error("invalid glob `{glob}`: {message}")]
    InvalidGlob { glob: String, message: String },
}

/// A validated allowlist pattern. Immutable once compiled.
#[derive(Clone, Debug)]
pub struct CompiledPattern {
    regex: Regex,
    source: String,
    comment: Option<String>,
}

impl CompiledPattern {
    pub fn compile(source: &str, comment: Option<&str>) -> Result<Self, PatternError> {
        if source.trim().is_empty() {
            return Err(PatternError::Empty);
        }
        let len = source.chars().count();
        if len > MAX_PATTERN_LENGTH {
            return Err(PatternError::TooLong {
                len,
                max: MAX_PATTERN_LENGTH,
            });
        }
        let regex = Regex::new(source).map_err(|e| PatternError::InvalidRegex {
            pattern: source.to_string(),
            message: e.to_string(),
        })?;
        if let Some(shape) = detect_redos(source) {
            return Err(PatternError::Redos {
                pattern: source.to_string(),
                shape,
            });
        }
        Ok(Self {
            regex,
            source: source.to_string(),
            comment: comment
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from),
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

#[derive(Default)]
struct GroupScan {
    has_quantifier: bool,
    has_alternation: bool,
}

/// Returns `(is_repetition, index_after_quantifier)` for a quantifier at `i`.
fn quantifier_at(chars: &[char], i: usize) -> (bool, usize) {
    let skip_lazy = |j: usize| {
        if chars.get(j) == Some(&'?') {
            j + 1
        } else {
            j
        }
    };
    match chars.get(i) {
        Some('*') | Some('+') => (true, skip_lazy(i + 1)),
        Some('?') => (false, skip_lazy(i + 1)),
        Some('{') => {
            let Some(close) = chars[i..].iter().position(|c| *c == '}') else {
                return (false, i);
            };
            let body: String = chars[i + 1..i + close].iter().collect();
            let repeating = match body.split_once(',') {
                Some((_, max)) => max.trim().parse::<u32>().map_or(true, |m| m > 1),
                None => body.trim().parse::<u32>().is_ok_and(|n| n > 1),
            };
            (repeating, skip_lazy(i + close + 1))
        }
        _ => (false, i),
    }
}

fn skip_class(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    if chars.get(i) == Some(&'^') {
        i += 1;
    }
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ']' => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Static scan for catastrophic-backtracking shapes. Conservative, not
/// exhaustive.
pub fn detect_redos(source: &str) -> Option<RedosShape> {
    let chars: Vec<char> = source.chars().collect();
    let mut stack = vec![GroupScan::default()];
    let mut prev_wildcard = false;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '(' => {
                stack.push(GroupScan::default());
                prev_wildcard = false;
                i += 1;
            }
            ')' => {
                let group = stack.pop().unwrap_or_default();
                if stack.is_empty() {
                    stack.push(GroupScan::default());
                }
                let (repeats, next) = quantifier_at(&chars, i + 1);
                if repeats {
                    if group.has_quantifier {
                        return Some(RedosShape::NestedQuantifier);
                    }
                    if group.has_alternation {
                        return Some(RedosShape::QuantifiedAlternation);
                    }
                }
                if let Some(parent) = stack.last_mut()
                    && (repeats || group.has_quantifier)
                {
                    parent.has_quantifier = true;
                }
                prev_wildcard = false;
                i = next;
            }
            '|' => {
                if let Some(top) = stack.last_mut() {
                    top.has_alternation = true;
                }
                prev_wildcard = false;
                i += 1;
            }
            '^' | '$' => i += 1,
            c => {
                let atom_end = match c {
                    '\\' => (i + 2).min(chars.len()),
                    '[' => skip_class(&chars, i),
                    _ => i + 1,
                };
                let (repeats, next) = quantifier_at(&chars, atom_end);
                if repeats {
                    let wildcard = c == '.';
                    if wildcard && prev_wildcard {
                        return Some(RedosShape::RepeatedWildcard);
                    }
                    if let Some(top) = stack.last_mut() {
                        top.has_quantifier = true;
                    }
                    prev_wildcard = wildcard;
                } else {
                    prev_wildcard = false;
                }
                i = next;
            }
        }
    }
    None
}

/// A write-path glob compiled to an anchored regex.
///
/// `**` spans directories, `*` stays within one segment and `?` is one
/// character. Relative globs are matched against the part of the target
/// below the working directory.
#[derive(Clone, Debug)]
pub struct CompiledGlob {
    regex: Regex,
    source: String,
    absolute: bool,
}

impl CompiledGlob {
    pub fn compile(glob: &str, platform: Platform) -> Result<Self, PatternError> {
        let trimmed = glob.trim();
        if trimmed.is_empty() {
            return Err(PatternError::Empty);
        }
        if trimmed.chars().count() > MAX_PATTERN_LENGTH {
            return Err(PatternError::TooLong {
                len: trimmed.chars().count(),
                max: MAX_PATTERN_LENGTH,
            });
        }

        let expanded = expand_tilde(trimmed).replace('\\', "/");
        let absolute = expanded.starts_with('/')
            || (expanded.len() >= 2
                && expanded.as_bytes()[0].is_ascii_alphabetic()
                && expanded.as_bytes()[1] == b':');

        let chars: Vec<char> = expanded.chars().collect();
        let mut regex = String::from(if platform.case_insensitive() {
            "(?i)^"
        } else {
            "^"
        });
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '*' if chars.get(i + 1) == Some(&'*') => {
                    if chars.get(i + 2) == Some(&'/') {
                        regex.push_str("(?:.*/)?");
                        i += 3;
                    } else {
                        regex.push_str(".*");
                        i += 2;
                    }
                }
                '*' => {
                    regex.push_str("[^/]*");
                    i += 1;
                }
                '?' => {
                    regex.push_str("[^/]");
                    i += 1;
                }
                c => {
                    regex.push_str(&regex::escape(&c.to_string()));
                    i += 1;
                }
            }
        }
        regex.push('$');

        let regex = Regex::new(&regex).map_err(|e| PatternError::InvalidGlob {
            glob: glob.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            regex,
            source: glob.to_string(),
            absolute,
        })
    }

    /// `path` and `cwd` must already be normalized with the same platform.
    pub fn matches(&self, path: &str, cwd: Option<&str>) -> bool {
        if self.absolute {
            return self.regex.is_match(path);
        }
        match cwd {
            Some(cwd) => {
                let prefix = format!("{}/", cwd.trim_end_matches('/'));
                path.strip_prefix(&prefix)
                    .is_some_and(|rel| self.regex.is_match(rel))
            }
            None => self.regex.is_match(path),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_valid_pattern() {
        let p = CompiledPattern::compile(r"^git\s+(status|log|diff)\b", Some("git: status, log, diff"))
            .unwrap();
        assert!(p.is_match("git status"));
        assert!(!p.is_match("git push"));
        assert_eq!(p.comment(), Some("git: status, log, diff"));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = CompiledPattern::compile("^git (", None).unwrap_err();
        assert!(matches!(err, PatternError::InvalidRegex { .. }));
    }

    #[test]
    fn test_length_cap() {
        let long = "a".repeat(MAX_PATTERN_LENGTH + 1);
        assert!(matches!(
            CompiledPattern::compile(&long, None),
            Err(PatternError::TooLong { .. })
        ));
    }

    #[test]
    fn test_redos_shapes_rejected() {
        assert_eq!(detect_redos("(a+)+"), Some(RedosShape::NestedQuantifier));
        assert_eq!(detect_redos("^(\\w*)*$"), Some(RedosShape::NestedQuantifier));
        assert_eq!(detect_redos("(a|a)+"), Some(RedosShape::QuantifiedAlternation));
        assert_eq!(detect_redos(".*.*"), Some(RedosShape::RepeatedWildcard));
        assert_eq!(detect_redos("^a.+?.*b"), Some(RedosShape::RepeatedWildcard));
        assert_eq!(detect_redos("((ab)+)*"), Some(RedosShape::NestedQuantifier));

        let err = CompiledPattern::compile("(a+)+", None).unwrap_err();
        assert!(err.to_string().contains("(a+)+"));
    }

    #[test]
    fn test_safe_shapes_accepted() {
        assert_eq!(detect_redos(r"^git\s+(status|log|diff)\b"), None);
        assert_eq!(detect_redos(r"^ls\b.*"), None);
        assert_eq!(detect_redos(r"^cat [^|]*"), None);
        assert_eq!(detect_redos(r"^(ab){1}"), None);
        assert_eq!(detect_redos(r"^[(]+\)"), None);
        assert_eq!(detect_redos(r"^\(a+\)+"), None);
    }

    #[test]
    fn test_glob_single_and_recursive_segments() {
        let glob = CompiledGlob::compile("/work/docs/*.md", Platform::Posix).unwrap();
        assert!(glob.matches("/work/docs/a.md", None));
        assert!(!glob.matches("/work/docs/sub/a.md", None));

        let glob = CompiledGlob::compile("/work/docs/**", Platform::Posix).unwrap();
        assert!(glob.matches("/work/docs/sub/a.md", None));

        let glob = CompiledGlob::compile("/work/**/notes.txt", Platform::Posix).unwrap();
        assert!(glob.matches("/work/notes.txt", None));
        assert!(glob.matches("/work/a/b/notes.txt", None));

        let glob = CompiledGlob::compile("/work/file?.txt", Platform::Posix).unwrap();
        assert!(glob.matches("/work/file1.txt", None));
        assert!(!glob.matches("/work/file12.txt", None));
    }

    #[test]
    fn test_glob_escapes_metacharacters() {
        let glob = CompiledGlob::compile("/work/a+b(1).txt", Platform::Posix).unwrap();
        assert!(glob.matches("/work/a+b(1).txt", None));
        assert!(!glob.matches("/work/aab1.txt", None));
    }

    #[test]
    fn test_relative_glob_uses_cwd() {
        let glob = CompiledGlob::compile("out/**", Platform::Posix).unwrap();
        assert!(glob.matches("/repo/out/x.json", Some("/repo")));
        assert!(!glob.matches("/other/out/x.json", Some("/repo")));
    }

    #[test]
    fn test_glob_case_follows_platform() {
        let glob = CompiledGlob::compile("c:/Work/**", Platform::Windows).unwrap();
        assert!(glob.matches("c:/work/x.txt", None));
        let glob = CompiledGlob::compile("/Work/**", Platform::Posix).unwrap();
        assert!(!glob.matches("/work/x.txt", None));
    }
}
