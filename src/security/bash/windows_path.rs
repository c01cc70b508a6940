//! Rewrites Windows paths so the POSIX grammar can parse them.
//!
//! A backslash right before a closing double quote (`"C:\dir\"`) would read
//! as an escaped quote and leave the string unterminated, and bare
//! `C:\dir\file` tokens lose their separators to escape processing. Both are
//! turned into forward slashes; everything else is left alone.

const TOKEN_END: &[char] = &[';', '|', '&', ')', '<', '>'];
const TOKEN_START: &[char] = &[';', '|', '&', '(', '=', '<', '>'];

fn ends_token(c: char) -> bool {
    c.is_whitespace() || TOKEN_END.contains(&c)
}

fn starts_drive_path(chars: &[char], i: usize) -> bool {
    let boundary = i == 0 || chars[i - 1].is_whitespace() || TOKEN_START.contains(&chars[i - 1]);
    boundary
        && chars[i].is_ascii_alphabetic()
        && chars.get(i + 1) == Some(&':')
        && chars.get(i + 2) == Some(&'\\')
}

pub fn normalize_windows_paths(command: &str) -> String {
    let chars: Vec<char> = command.chars().collect();
    let mut out = String::with_capacity(command.len());
    let mut in_path = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' => {
                in_path = false;
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == '\'')
                    .map_or(chars.len(), |p| i + p + 2);
                out.extend(&chars[i..end]);
                i = end;
            }
            '"' => {
                in_path = false;
                i = copy_double_quoted(&chars, i, &mut out);
            }
            '\\' if in_path => {
                out.push('/');
                i += 1;
            }
            '\\' => {
                out.push('\\');
                if let Some(next) = chars.get(i + 1) {
                    out.push(*next);
                }
                i += 2;
            }
            c if in_path && ends_token(c) => {
                in_path = false;
                out.push(c);
                i += 1;
            }
            c => {
                if !in_path && starts_drive_path(&chars, i) {
                    in_path = true;
                }
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Copies the double-quoted region opening at `start` and returns the index
/// just past it.
fn copy_double_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    let closes_at = |j: usize| chars.get(j).is_none_or(|&c| ends_token(c));

    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => match chars.get(i + 1) {
                Some('\\') => {
                    out.push_str("//");
                    i += 2;
                }
                Some('"') if closes_at(i + 2) => {
                    out.push('/');
                    i += 1;
                }
                Some(&next) => {
                    out.push('\\');
                    out.push(next);
                    i += 2;
                }
                None => {
                    out.push('\\');
                    i += 1;
                }
            },
            '"' => {
                out.push('"');
                return i + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_drive_paths() {
        assert_eq!(
            normalize_windows_paths(r"type C:\Users\me\notes.txt | findstr todo"),
            "type C:/Users/me/notes.txt | findstr todo"
        );
        assert_eq!(normalize_windows_paths(r"cd D:\work&&dir"), "cd D:/work&&dir");
        assert_eq!(normalize_windows_paths(r"x=C:\a\b"), "x=C:/a/b");
    }

    #[test]
    fn test_single_quotes_untouched() {
        let cmd = r"echo 'C:\keep\me\'";
        assert_eq!(normalize_windows_paths(cmd), cmd);
    }

    #[test]
    fn test_trailing_backslash_before_closing_quote() {
        assert_eq!(normalize_windows_paths(r#"dir "C:\path\""#), r#"dir "C:\path/""#);
        assert_eq!(
            normalize_windows_paths(r#"dir "C:\path\" > out"#),
            r#"dir "C:\path/" > out"#
        );
    }

    #[test]
    fn test_double_backslash_in_quotes() {
        assert_eq!(normalize_windows_paths(r#"echo "a\\b""#), r#"echo "a//b""#);
    }

    #[test]
    fn test_inner_escaped_quote_kept() {
        let cmd = r#"echo "say \"hi""#;
        assert_eq!(normalize_windows_paths(cmd), cmd);
    }

    #[test]
    fn test_non_drive_backslashes_untouched() {
        let cmd = r"grep foo\ bar file";
        assert_eq!(normalize_windows_paths(cmd), cmd);
    }
}
