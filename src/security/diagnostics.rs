//! Mismatch diagnostics for commands that miss every allowlist pattern.
//!
//! Finds the pattern that consumed the longest prefix of the command and
//! explains where and why it stopped. Purely advisory: nothing here can
//! change a verdict.

use regex_automata::hybrid::dfa::DFA;
use regex_automata::{Anchored, Input};

use super::pattern::CompiledPattern;
use super::verdict::{MismatchAnalysis, PatternSummary};

/// CLIs whose first argument is a subcommand.
const SUBCOMMAND_CLIS: &[&str] = &[
    "git", "npm", "pnpm", "yarn", "bun", "cargo", "go", "docker", "kubectl", "helm", "gh",
    "pip", "brew", "dotnet", "terraform", "aws", "az", "gcloud",
];

const MAX_SUGGESTION_DISTANCE: usize = 2;

/// Lazy-DFA matcher that reports how far into a string a pattern can get.
pub struct PrefixMatcher {
    dfa: DFA,
}

impl PrefixMatcher {
    pub fn new(pattern: &str) -> Option<Self> {
        let dfa = DFA::builder()
            .configure(DFA::config().unicode_word_boundary(true))
            .build(pattern)
            .ok()?;
        Some(Self { dfa })
    }

    /// Bytes of `text` consumed before the pattern could no longer match.
    /// Equals `text.len()` when the whole text is a viable prefix.
    pub fn consumed(&self, text: &str) -> usize {
        let mut cache = self.dfa.create_cache();
        let input = Input::new(text).anchored(Anchored::Yes);
        let Ok(mut state) = self.dfa.start_state_forward(&mut cache, &input) else {
            return 0;
        };
        for (i, byte) in text.bytes().enumerate() {
            state = match self.dfa.next_state(&mut cache, state, byte) {
                Ok(next) => next,
                Err(_) => return i,
            };
            if state.is_dead() || state.is_quit() {
                return i;
            }
        }
        text.len()
    }
}

/// Patterns whose source mentions the command's leading token.
pub fn relevant_patterns<'a>(
    command: &str,
    patterns: &'a [CompiledPattern],
) -> Vec<&'a CompiledPattern> {
    let Some(leading) = command.split_whitespace().next() else {
        return Vec::new();
    };
    patterns
        .iter()
        .filter(|p| p.source().contains(leading))
        .collect()
}

pub fn summarize(patterns: &[&CompiledPattern]) -> Vec<PatternSummary> {
    patterns
        .iter()
        .map(|p| PatternSummary {
            source: p.source().to_string(),
            comment: p.comment().map(String::from),
        })
        .collect()
}

/// Explain the best partial match of `command` against `candidates`.
pub fn analyze_mismatch(command: &str, candidates: &[&CompiledPattern]) -> Option<MismatchAnalysis> {
    let (best, consumed) = candidates
        .iter()
        .filter_map(|p| PrefixMatcher::new(p.source()).map(|m| (*p, m.consumed(command))))
        .fold(None::<(&CompiledPattern, usize)>, |best, (p, n)| match best {
            Some((_, best_n)) if best_n >= n => best,
            _ => Some((p, n)),
        })?;

    if consumed == 0 {
        return None;
    }

    let position = floor_char_boundary(command, consumed);
    let failed_token = token_at(command, position);
    let suggestion = suggest(command, position, &failed_token, best.comment());

    Some(MismatchAnalysis {
        matched_prefix: command[..position].to_string(),
        failed_at_position: position,
        failed_token,
        best_match_pattern: best.source().to_string(),
        pattern_comment: best.comment().map(String::from),
        suggestion,
    })
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Whitespace-delimited token containing `position`.
fn token_at(command: &str, position: usize) -> String {
    let start = command[..position]
        .rfind(char::is_whitespace)
        .map_or(0, |i| i + 1);
    let start = if command[position..].starts_with(char::is_whitespace) {
        position
    } else {
        start
    };
    let rest = command[start..].trim_start();
    rest.split_whitespace().next().unwrap_or("").to_string()
}

fn suggest(command: &str, position: usize, failed_token: &str, comment: Option<&str>) -> Option<String> {
    let mut tokens = command.split_whitespace();
    let leading = tokens.next()?;

    if failed_token.is_empty() || position >= command.trim_end().len() {
        return Some(format!(
            "The command ends before the pattern is satisfied after `{}`.",
            command[..position].trim_end()
        ));
    }

    let second = tokens.next();
    if SUBCOMMAND_CLIS.contains(&leading)
        && failed_token.starts_with('-')
        && second == Some(failed_token)
    {
        return Some(format!(
            "Flag `{failed_token}` appears where a `{leading}` subcommand was expected; \
             put the subcommand first (e.g. `{leading} <subcommand> {failed_token}`)."
        ));
    }

    let names = comment.map(subcommand_names).unwrap_or_default();
    let needle = failed_token.to_lowercase();
    names
        .iter()
        .map(|name| (name, levenshtein(&needle, name)))
        .filter(|(_, dist)| *dist > 0 && *dist <= MAX_SUGGESTION_DISTANCE)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| format!("Did you mean `{name}` instead of `{failed_token}`?"))
}

fn subcommand_names(comment: &str) -> Vec<String> {
    let mut names: Vec<String> = comment
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .filter(|w| w.len() >= 2)
        .map(str::to_lowercase)
        .collect();
    names.dedup();
    names
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}
