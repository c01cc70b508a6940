//! Recognizing PowerShell text and unwrapping `powershell -Command` launches.

use std::sync::LazyLock;

use regex::Regex;

static VERB_NOUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)(?:^|[|;]\s*)
        (get|set|new|remove|add|clear|copy|move|rename|select|where|foreach|sort|group|measure
        |format|out|write|read|test|invoke|start|stop|restart|import|export|convertto|convertfrom
        |resolve|split|join|compare|update|push|pop|enable|disable|expand|compress|wait|show
        |find|install|uninstall|register|unregister|send|receive|tee|trace|use|enter|exit)
        -[a-z][a-z0-9]*(?:\s|$|\|)",
    )
    .expect("valid regex")
});

static ENV_DRIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\$env:[a-z_]").expect("valid regex"));

/// PowerShell syntax the bash grammar reads as something else: script
/// blocks, subexpressions, array and hash literals, type literals, static
/// members, statement separators, the call operator and dot-sourcing.
static BASH_OPAQUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[{}\[;&]|[$@]\(|::|(?:^|[\s;|(])\.\s").expect("valid regex")
});

const HOSTS: &[&str] = &["powershell", "powershell.exe", "pwsh", "pwsh.exe"];

/// Host flags that consume the following token.
const VALUED_FLAGS: &[&str] = &[
    "-executionpolicy",
    "-ep",
    "-ex",
    "-windowstyle",
    "-w",
    "-inputformat",
    "-outputformat",
    "-workingdirectory",
    "-wd",
];

fn first_token(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

fn is_host(token: &str) -> bool {
    let token = token.trim_matches(['"', '\'']);
    let name = token.rsplit(['/', '\\']).next().unwrap_or(token);
    HOSTS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Syntax sniffing used to route a shell command to the PowerShell validator.
pub fn looks_like_powershell(command: &str) -> bool {
    let trimmed = command.trim_start();
    is_host(first_token(trimmed)) || VERB_NOUN.is_match(trimmed) || ENV_DRIVE.is_match(trimmed)
}

/// Whether a PowerShell script uses syntax that only a PowerShell parser
/// can check. Such scripts are never validated with the bash grammar.
pub fn needs_powershell_parser(script: &str) -> bool {
    BASH_OPAQUE.is_match(script)
}

/// Whether `command` starts a PowerShell host process.
pub fn launches_powershell(command: &str) -> bool {
    is_host(first_token(command.trim_start()))
}

/// The script passed to `powershell [flags] -Command <script>`, with one
/// level of quoting removed. `None` when `command` is not such a launch or
/// uses a form whose script cannot be read (`-EncodedCommand`, `-File`).
pub fn unwrap_powershell_command(command: &str) -> Option<String> {
    let trimmed = command.trim();
    let host = first_token(trimmed);
    if !is_host(host) {
        return None;
    }

    let mut rest = trimmed[host.len()..].trim_start();
    loop {
        let token = first_token(rest);
        if token.is_empty() {
            return None;
        }
        let lower = token.to_ascii_lowercase();
        if !lower.starts_with('-') {
            // Bare script text is treated as -Command.
            return Some(unquote_script(rest));
        }
        rest = rest[token.len()..].trim_start();
        match lower.as_str() {
            "-command" | "-c" => return Some(unquote_script(rest)).filter(|s| !s.is_empty()),
            "-encodedcommand" | "-enc" | "-e" | "-file" | "-f" => return None,
            flag if VALUED_FLAGS.contains(&flag) => {
                let value = first_token(rest);
                rest = rest[value.len()..].trim_start();
            }
            _ => {}
        }
    }
}

fn unquote_script(script: &str) -> String {
    let script = script.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = script
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return if quote == '"' {
                inner.replace("\\\"", "\"")
            } else {
                inner.replace("''", "'")
            };
        }
    }
    script.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniffing() {
        assert!(looks_like_powershell("Get-ChildItem -Recurse"));
        assert!(looks_like_powershell("get-content README.md | select-string todo"));
        assert!(looks_like_powershell("echo $env:PATH"));
        assert!(looks_like_powershell("pwsh -c Get-Date"));
        assert!(looks_like_powershell(r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe -c x"));
        assert!(!looks_like_powershell("git status"));
        assert!(!looks_like_powershell("ls -la"));
        assert!(!looks_like_powershell("get-pip.py"));
        assert!(looks_like_powershell("ls | Where-Object {Remove-Item $_}"));
        assert!(looks_like_powershell("ls; Remove-Item x"));
        assert!(!looks_like_powershell("git log | grep get-started"));
        assert!(launches_powershell("pwsh.exe -File x.ps1"));
        assert!(!launches_powershell("Get-Date"));
    }

    #[test]
    fn test_syntax_needing_parser() {
        for script in [
            "Get-ChildItem | Where-Object {Remove-Item -Recurse -Force $_.FullName}",
            "Get-ChildItem -Path $(Remove-Item x)",
            "Get-ChildItem @(1, 2)",
            "Get-Date; Remove-Item x",
            "& $tool",
            ". ./setup.ps1",
            "Get-Date | . ./setup.ps1",
            "[IO.File]::Delete('x')",
            "Get-Item @{ Path = 'x' }",
        ] {
            assert!(needs_powershell_parser(script), "{script}");
        }
        for script in [
            "Get-ChildItem -Recurse src",
            "Get-Content README.md | Select-String TODO",
            "Get-ChildItem ./src",
            "Get-Content ../notes.md",
        ] {
            assert!(!needs_powershell_parser(script), "{script}");
        }
    }

    #[test]
    fn test_unwrap_command() {
        assert_eq!(
            unwrap_powershell_command(r#"powershell -NoProfile -Command "Get-ChildItem -Path \"src\"""#)
                .as_deref(),
            Some(r#"Get-ChildItem -Path "src""#)
        );
        assert_eq!(
            unwrap_powershell_command("pwsh -ExecutionPolicy Bypass -c 'Get-Date'").as_deref(),
            Some("Get-Date")
        );
        assert_eq!(unwrap_powershell_command("pwsh -EncodedCommand ZQBjAGgAbwA="), None);
        assert_eq!(unwrap_powershell_command("git status"), None);
    }
}
