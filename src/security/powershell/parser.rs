//! PowerShell grammar capability.
//!
//! PowerShell has no Rust grammar worth trusting, so the host's own parser
//! (`System.Management.Automation.Language.Parser`) is asked for the AST,
//! which comes back as JSON and is lowered into [`PsNode`].

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::Deserialize;

use super::ast::{Invocation, PsCommand, PsElement, PsNode, PsRedirect};
use crate::security::error::ParseError;

/// Consumed capability: PowerShell text in, syntax tree out.
pub trait PowerShellParser: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    fn parse(&self, source: &str) -> Result<PsNode, ParseError>;
}

/// Host without PowerShell. Every parse reports [`ParseError::Unavailable`].
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailablePowerShellParser;

impl PowerShellParser for UnavailablePowerShellParser {
    fn is_available(&self) -> bool {
        false
    }

    fn parse(&self, _source: &str) -> Result<PsNode, ParseError> {
        Err(ParseError::Unavailable)
    }
}

const INPUT_VAR: &str = "AGENT_SAFE_MODE_PS_INPUT";

// Kept free of double quotes so it survives Windows argument quoting.
const AST_DUMP_SCRIPT: &str = r#"
$ErrorActionPreference = 'Stop'
$tokens = $null
$errors = $null
$ast = [System.Management.Automation.Language.Parser]::ParseInput($env:AGENT_SAFE_MODE_PS_INPUT, [ref]$tokens, [ref]$errors)
if ($errors.Count -gt 0) {
  @{ error = $errors[0].Message; offset = $errors[0].Extent.StartOffset } | ConvertTo-Json -Compress
  exit 0
}
function Convert-Node($node) {
  $props = @{}
  foreach ($name in 'InvocationOperator', 'ParameterName', 'Value', 'Append', 'Background') {
    $p = $node.PSObject.Properties[$name]
    if ($p -and $null -ne $p.Value) { $props[$name] = [string]$p.Value }
  }
  $parent = $node
  $kids = @($node.FindAll({ param($n) [object]::ReferenceEquals($n.Parent, $parent) }.GetNewClosure(), $true) |
    Sort-Object { $_.Extent.StartOffset } |
    ForEach-Object { Convert-Node $_ })
  @{ type = $node.GetType().Name; text = $node.Extent.Text; props = $props; children = $kids }
}
@{ ast = (Convert-Node $ast) } | ConvertTo-Json -Depth 100 -Compress
"#;

/// Parser backed by a local `pwsh` or `powershell` executable.
#[derive(Clone, Debug)]
pub struct PwshParser {
    program: PathBuf,
    timeout: Duration,
}

impl PwshParser {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Finds `pwsh` (preferred) or Windows PowerShell on `PATH`.
    pub fn detect() -> Option<Self> {
        let path = std::env::var_os("PATH")?;
        let dirs: Vec<PathBuf> = std::env::split_paths(&path).collect();
        ["pwsh", "powershell"].iter().find_map(|name| {
            dirs.iter().find_map(|dir| {
                ["", ".exe"]
                    .iter()
                    .map(|ext| dir.join(format!("{name}{ext}")))
                    .find(|candidate| candidate.is_file())
            })
        })
        .map(Self::new)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, source: &str) -> Result<String, ParseError> {
        let mut child = Command::new(&self.program)
            .args(["-NoProfile", "-NonInteractive", "-Command", AST_DUMP_SCRIPT])
            .env(INPUT_VAR, source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ParseError::Failed(format!("failed to start {}: {e}", self.program.display()))
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ParseError::Failed("PowerShell stdout not captured".into()))?;
        let reader = std::thread::spawn(move || {
            let mut buf = String::new();
            stdout.read_to_string(&mut buf).map(|_| buf)
        });

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ParseError::Failed(format!(
                        "PowerShell parser timed out after {:?}",
                        self.timeout
                    )));
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(10)),
                Err(e) => return Err(ParseError::Failed(e.to_string())),
            }
        }

        reader
            .join()
            .map_err(|_| ParseError::Failed("PowerShell output reader panicked".into()))?
            .map_err(|e| ParseError::Failed(e.to_string()))
    }
}

impl PowerShellParser for PwshParser {
    fn parse(&self, source: &str) -> Result<PsNode, ParseError> {
        if source.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        let json = self.run(source)?;
        parse_ast_json(&json, source)
    }
}

#[derive(Debug, Deserialize)]
struct DumpReply {
    #[serde(default)]
    ast: Option<RawPsAst>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    offset: Option<usize>,
}

/// AST node exactly as the host dumps it.
#[derive(Debug, Deserialize)]
pub struct RawPsAst {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    props: HashMap<String, String>,
    #[serde(default)]
    children: Vec<RawPsAst>,
}

impl RawPsAst {
    fn prop(&self, name: &str) -> Option<&str> {
        self.props.get(name).map(String::as_str)
    }

    fn flag(&self, name: &str) -> bool {
        self.prop(name).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    fn literal(&self) -> String {
        match self.kind.as_str() {
            "StringConstantExpressionAst" => self.prop("Value").unwrap_or(&self.text).to_string(),
            _ => self.text.clone(),
        }
    }
}

/// Decodes the dump produced by the host script.
pub fn parse_ast_json(json: &str, source: &str) -> Result<PsNode, ParseError> {
    let reply: DumpReply = serde_json::from_str(json.trim())
        .map_err(|e| ParseError::Failed(format!("invalid PowerShell AST dump: {e}")))?;

    if let Some(message) = reply.error {
        let offset = reply.offset.unwrap_or(0);
        let snippet = source
            .get(offset..)
            .map(|rest| rest.chars().take(40).collect::<String>())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(message);
        return Err(ParseError::Syntax { offset, snippet });
    }

    reply.ast.map(|raw| lower(&raw)).ok_or(ParseError::NoTree)
}

fn lower_all(nodes: &[RawPsAst]) -> Vec<PsNode> {
    nodes.iter().map(lower).collect()
}

fn lower(raw: &RawPsAst) -> PsNode {
    let text = raw.text.clone();
    match raw.kind.as_str() {
        "ScriptBlockAst" | "NamedBlockAst" | "StatementBlockAst" | "PipelineChainAst" => {
            PsNode::Script(lower_all(&raw.children))
        }
        "PipelineAst" => PsNode::Pipeline {
            elements: lower_all(&raw.children),
            background: raw.flag("Background"),
        },
        "CommandAst" => PsNode::Command(lower_command(raw)),
        "AssignmentStatementAst" => PsNode::Assignment { text },
        "ScriptBlockExpressionAst" => PsNode::ScriptBlock { text },
        "SubExpressionAst" => PsNode::SubExpression { text },
        "InvokeMemberExpressionAst" | "BaseCtorInvokeMemberExpressionAst" => {
            PsNode::MemberInvocation { text }
        }
        kind if kind.ends_with("ExpressionAst")
            || matches!(kind, "ArrayLiteralAst" | "HashtableAst" | "ParamBlockAst") =>
        {
            PsNode::Expression {
                text,
                children: lower_all(&raw.children),
            }
        }
        kind => PsNode::Unknown {
            kind: kind.to_string(),
            text,
            children: lower_all(&raw.children),
        },
    }
}

fn lower_command(raw: &RawPsAst) -> PsCommand {
    let mut cmd = PsCommand {
        invocation: match raw.prop("InvocationOperator") {
            Some("Dot") => Invocation::DotSource,
            Some("Ampersand") => Invocation::Call,
            _ => Invocation::Plain,
        },
        text: raw.text.clone(),
        ..Default::default()
    };

    let mut saw_name = false;
    for child in &raw.children {
        match child.kind.as_str() {
            "FileRedirectionAst" => cmd.redirects.push(PsRedirect::File {
                append: child.flag("Append"),
                target: child.children.first().map(RawPsAst::literal).unwrap_or_default(),
                text: child.text.clone(),
            }),
            "MergingRedirectionAst" => cmd.redirects.push(PsRedirect::Merging {
                text: child.text.clone(),
            }),
            "CommandParameterAst" => {
                saw_name = true;
                cmd.elements.push(PsElement::Parameter {
                    name: child.prop("ParameterName").unwrap_or_default().to_string(),
                    argument: child.children.first().map(|arg| {
                        Box::new(PsElement::Value {
                            text: arg.literal(),
                            node: lower(arg),
                        })
                    }),
                });
            }
            "StringConstantExpressionAst" if !saw_name => {
                saw_name = true;
                cmd.name = Some(child.literal());
            }
            _ => {
                saw_name = true;
                cmd.elements.push(PsElement::Value {
                    text: child.literal(),
                    node: lower(child),
                });
            }
        }
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump(ast: serde_json::Value) -> String {
        serde_json::json!({ "ast": ast }).to_string()
    }

    fn string(value: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "StringConstantExpressionAst",
            "text": value,
            "props": { "Value": value },
            "children": []
        })
    }

    fn wrap_pipeline(command: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "type": "ScriptBlockAst", "text": "", "props": {},
            "children": [{
                "type": "NamedBlockAst", "text": "", "props": {},
                "children": [{
                    "type": "PipelineAst", "text": "", "props": { "Background": "False" },
                    "children": [command]
                }]
            }]
        })
    }

    #[test]
    fn test_lower_plain_command() {
        let json = dump(wrap_pipeline(serde_json::json!({
            "type": "CommandAst",
            "text": "Get-ChildItem -Path src",
            "props": { "InvocationOperator": "Unknown" },
            "children": [
                string("Get-ChildItem"),
                { "type": "CommandParameterAst", "text": "-Path", "props": { "ParameterName": "Path" }, "children": [] },
                string("src")
            ]
        })));
        let tree = parse_ast_json(&json, "Get-ChildItem -Path src").unwrap();
        let cmds = tree.commands();
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].name.as_deref(), Some("Get-ChildItem"));
        assert_eq!(cmds[0].flat_text(), "Get-ChildItem -Path src");
        assert_eq!(cmds[0].invocation, Invocation::Plain);
    }

    #[test]
    fn test_lower_colon_bound_subexpression() {
        let source = r"Get-ChildItem -Path:$(Remove-Item -Recurse C:\)";
        let json = dump(wrap_pipeline(serde_json::json!({
            "type": "CommandAst",
            "text": source,
            "props": { "InvocationOperator": "Unknown" },
            "children": [
                string("Get-ChildItem"),
                {
                    "type": "CommandParameterAst",
                    "text": r"-Path:$(Remove-Item -Recurse C:\)",
                    "props": { "ParameterName": "Path" },
                    "children": [{
                        "type": "SubExpressionAst",
                        "text": r"$(Remove-Item -Recurse C:\)",
                        "props": {},
                        "children": []
                    }]
                }
            ]
        })));
        let tree = parse_ast_json(&json, source).unwrap();
        let cmds = tree.commands();
        let PsElement::Parameter { name, argument } = &cmds[0].elements[0] else {
            panic!("expected parameter, got {:?}", cmds[0].elements[0]);
        };
        assert_eq!(name, "Path");
        let argument = argument.as_deref().unwrap();
        assert!(matches!(argument.node(), Some(PsNode::SubExpression { .. })));
        assert_eq!(argument.text(), r"$(Remove-Item -Recurse C:\)");
    }

    #[test]
    fn test_lower_dot_source_and_redirect() {
        let json = dump(wrap_pipeline(serde_json::json!({
            "type": "CommandAst",
            "text": ". ./setup.ps1 > $null",
            "props": { "InvocationOperator": "Dot" },
            "children": [
                string("./setup.ps1"),
                {
                    "type": "FileRedirectionAst", "text": "> $null", "props": { "Append": "False" },
                    "children": [{ "type": "VariableExpressionAst", "text": "$null", "props": {}, "children": [] }]
                }
            ]
        })));
        let tree = parse_ast_json(&json, ". ./setup.ps1 > $null").unwrap();
        let cmd = tree.commands()[0].clone();
        assert_eq!(cmd.invocation, Invocation::DotSource);
        assert_eq!(cmd.redirects.len(), 1);
        assert!(cmd.redirects[0].is_safe());
    }

    #[test]
    fn test_syntax_error_reply() {
        let json = r#"{"error":"Missing closing '}'","offset":4}"#;
        let err = parse_ast_json(json, "if ({").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { offset: 4, .. }));
    }

    #[test]
    fn test_garbage_reply() {
        assert!(matches!(
            parse_ast_json("not json", "ls"),
            Err(ParseError::Failed(_))
        ));
    }

    #[test]
    fn test_unavailable_parser() {
        let parser = UnavailablePowerShellParser;
        assert!(!parser.is_available());
        assert_eq!(parser.parse("Get-Date"), Err(ParseError::Unavailable));
    }
}
