//! Options that turn an otherwise read-only command into a writer or a
//! launcher of other programs.
//!
//! Allowlist patterns usually match a command by its name and leading
//! words, so `git diff` also admits `git diff --output=~/.bashrc`. The
//! table below is consulted after a pattern has matched.

use super::ast::SimpleCommand;

struct Hazard {
    command: &'static str,
    /// First positional argument the entry is limited to (`git grep`).
    subcommand: Option<&'static str>,
    /// `--long` options match exactly, with `=value`, or as an unambiguous
    /// abbreviation. `-x` matches anywhere in a short-option bundle.
    /// `-long` (single dash, several letters) only matches exactly.
    options: &'static [&'static str],
    /// Short options whose value is glued to the rest of the bundle.
    takes_value: &'static str,
}

const HAZARDS: &[Hazard] = &[
    Hazard {
        command: "git",
        subcommand: None,
        options: &["--output", "--ext-diff"],
        takes_value: "",
    },
    Hazard {
        command: "git",
        subcommand: Some("grep"),
        options: &["-O", "--open-files-in-pager"],
        takes_value: "efABCm",
    },
    Hazard {
        command: "rg",
        subcommand: None,
        options: &["--pre", "--hostname-bin", "--search-zip", "-z"],
        takes_value: "efgtTmABCjMrE",
    },
    Hazard {
        command: "ag",
        subcommand: None,
        options: &["--pager"],
        takes_value: "",
    },
    Hazard {
        command: "ack",
        subcommand: None,
        options: &["--pager"],
        takes_value: "",
    },
    Hazard {
        command: "tree",
        subcommand: None,
        options: &["-o"],
        takes_value: "",
    },
    Hazard {
        command: "sort",
        subcommand: None,
        options: &["-o", "--output", "--compress-program"],
        takes_value: "ktST",
    },
    Hazard {
        command: "less",
        subcommand: None,
        options: &["-o", "-O", "--log-file", "--LOG-FILE"],
        takes_value: "bhjkpPtTxyzD#",
    },
    Hazard {
        command: "date",
        subcommand: None,
        options: &["-s", "--set"],
        takes_value: "dfIr",
    },
    Hazard {
        command: "file",
        subcommand: None,
        options: &["-C", "--compile"],
        takes_value: "eFfmMP",
    },
    Hazard {
        command: "hostname",
        subcommand: None,
        options: &["-F", "-b", "--file", "--boot"],
        takes_value: "",
    },
    Hazard {
        command: "find",
        subcommand: None,
        options: &[
            "-exec", "-execdir", "-ok", "-okdir", "-delete", "-fprint", "-fprint0", "-fprintf",
            "-fls",
        ],
        takes_value: "",
    },
];

/// Argument that lets `cmd` write files or run another program, if any.
pub fn unsafe_argument(cmd: &SimpleCommand) -> Option<String> {
    let name = cmd.name_text()?;
    let command = name.rsplit('/').next().unwrap_or(name);
    let args: Vec<&str> = cmd.args.iter().map(|w| w.text.as_str()).collect();
    let subcommand = args.iter().copied().find(|a| !a.starts_with('-'));

    match command {
        // `hostname NAME` sets the host name.
        "hostname" => {
            if let Some(name) = positionals(&args).next() {
                return Some(name.to_string());
            }
        }
        "git" if subcommand == Some("reflog") => {
            let action = positionals(&args).nth(1);
            if let Some(action @ ("expire" | "delete")) = action {
                return Some(format!("reflog {action}"));
            }
        }
        _ => {}
    }

    HAZARDS
        .iter()
        .filter(|h| h.command == command)
        .filter(|h| h.subcommand.is_none() || h.subcommand == subcommand)
        .find_map(|h| {
            options(&args)
                .find(|arg| h.options.iter().any(|opt| option_matches(arg, opt, h.takes_value)))
                .map(String::from)
        })
}

/// Arguments before `--`.
fn options<'a>(args: &'a [&'a str]) -> impl Iterator<Item = &'a str> + 'a {
    args.iter().copied().take_while(|a| *a != "--")
}

fn positionals<'a>(args: &'a [&'a str]) -> impl Iterator<Item = &'a str> + 'a {
    let mut after_dashes = false;
    args.iter().copied().filter(move |a| {
        if after_dashes {
            return true;
        }
        if *a == "--" {
            after_dashes = true;
            return false;
        }
        !a.starts_with('-')
    })
}

fn option_matches(arg: &str, option: &str, takes_value: &str) -> bool {
    if let Some(long) = option.strip_prefix("--") {
        let Some(given) = arg.strip_prefix("--") else {
            return false;
        };
        let given = given.split_once('=').map_or(given, |(name, _)| name);
        return given == long || (given.len() >= 2 && long.starts_with(given));
    }

    if option.len() > 2 {
        return arg == option;
    }

    let Some(letter) = option.chars().nth(1) else {
        return false;
    };
    let Some(bundle) = arg.strip_prefix('-').filter(|b| !b.starts_with('-')) else {
        return false;
    };
    for c in bundle.chars() {
        if c == letter {
            return true;
        }
        if takes_value.contains(c) {
            break;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::bash::BashValidator;

    fn hazard(command: &str) -> Option<String> {
        let tree = BashValidator::new().parse(command).unwrap();
        let commands = tree.commands();
        unsafe_argument(commands[0])
    }

    #[test]
    fn test_writing_options_found() {
        for (command, argument) in [
            ("git diff --output=/home/u/.bashrc", "--output=/home/u/.bashrc"),
            ("git log -p --outp=notes.txt", "--outp=notes.txt"),
            ("git show --ext-diff HEAD", "--ext-diff"),
            ("git grep --open-files-in-pager=sh x", "--open-files-in-pager=sh"),
            ("git grep -iO x", "-iO"),
            ("git reflog expire --all", "reflog expire"),
            ("rg --pre=/tmp/evil.sh x .", "--pre=/tmp/evil.sh"),
            ("rg --pre /tmp/evil.sh x .", "--pre"),
            ("rg -iz x logs", "-iz"),
            ("ag --pager=sh x", "--pager=sh"),
            ("tree -o /home/u/.bashrc", "-o"),
            ("tree -ao out.txt", "-ao"),
            ("sort -o out.txt in.txt", "-o"),
            ("sort --out=x in.txt", "--out=x"),
            ("less -O log.txt file", "-O"),
            ("date -us 2020-01-01", "-us"),
            ("date --set=2020-01-01", "--set=2020-01-01"),
            ("file -C -m magic", "-C"),
            ("hostname evil", "evil"),
            ("hostname -b", "-b"),
            ("find . -name x -delete", "-delete"),
            (r"find . -exec rm -f x \;", "-exec"),
            ("/usr/bin/tree -o out", "-o"),
        ] {
            assert_eq!(hazard(command).as_deref(), Some(argument), "{command}");
        }
    }

    #[test]
    fn test_read_only_options_pass() {
        for command in [
            "git diff --stat",
            "git log -O order.txt",
            "git grep -e Options",
            "git reflog show",
            "git log --no-ext-diff",
            "rg --pre-glob '*.gz' x",
            "rg -o x",
            "rg -e zip x",
            "tree -L 2",
            "sort -t o -k2 in.txt",
            "date -Iseconds",
            "date +%s",
            "hostname",
            "hostname -f",
            "find . -name '*.rs'",
            "ls -o",
            "cat -- -o",
        ] {
            assert_eq!(hazard(command), None, "{command}");
        }
    }
}
