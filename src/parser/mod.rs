//! Turns one input line (interactive mode) or an `argv` tail (sudo-compat
//! mode) into a [`Pipeline`], in five stages: alias/history expansion,
//! operator scanning, segmentation, tokenization, and a length budget check.
use std::collections::HashMap;

use crate::command::{Command, Pipeline, Redirect};
use crate::common::{Error, Result};

/// Per-session alias table and command history, used only in interactive
/// mode. Aliases are intentionally non-recursive: expanding `ll` to `ls -la`
/// never re-expands the result.
#[derive(Default)]
pub(crate) struct InteractiveContext {
    aliases: HashMap<String, String>,
    history: Vec<String>,
}

impl InteractiveContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn define_alias(&mut self, name: impl Into<String>, expansion: impl Into<String>) {
        self.aliases.insert(name.into(), expansion.into());
    }

    pub(crate) fn record_history(&mut self, line: &str) {
        self.history.push(line.to_string());
    }

    pub(crate) fn history(&self) -> &[String] {
        &self.history
    }

    /// Expand a leading `!N` (absolute index, 1-based) or `!prefix` (most
    /// recent history entry starting with `prefix`) reference.
    fn expand_history(&self, line: &str) -> Result<String> {
        let Some(rest) = line.strip_prefix('!') else {
            return Ok(line.to_string());
        };

        if let Ok(n) = rest.parse::<usize>() {
            return self
                .history
                .get(n.wrapping_sub(1))
                .cloned()
                .ok_or_else(|| Error::Input(format!("no such history entry: !{n}")));
        }

        self.history
            .iter()
            .rev()
            .find(|entry| entry.starts_with(rest))
            .cloned()
            .ok_or_else(|| Error::Input(format!("no history entry matching '!{rest}'")))
    }

    /// Expand any whitespace-delimited token that matches a defined alias.
    /// Aliases only ever expand once per token, even if the expansion itself
    /// looks like another alias name.
    fn expand_aliases(&self, line: &str) -> String {
        line.split_whitespace()
            .map(|token| self.aliases.get(token).map(String::as_str).unwrap_or(token))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Top-level shell operators that are never permitted: they either chain
/// multiple commands (`;`, `&`, `&&`, `||`) or invoke a nested shell
/// (backticks, `$(`).
const REJECTED_OPERATORS: &[&str] = &["&&", "||", ";", "&", "`", "$("];

/// Scan `line` for rejected operators outside of single/double quotes.
/// Allowed structural operators (`|`, `>`, `>>`, `<`) are left in place for
/// the segmentation stage.
fn reject_disallowed_operators(line: &str) -> Result<()> {
    let mut in_single = false;
    let mut in_double = false;
    let chars: Vec<char> = line.chars().collect();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ if in_single || in_double => {}
            '&' | ';' | '`' => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let found = REJECTED_OPERATORS
                    .iter()
                    .find(|op| two.starts_with(**op) || chars[i..=i].iter().collect::<String>() == **op);
                if let Some(op) = found {
                    return Err(Error::Input(format!("operator '{op}' is not permitted")));
                }
            }
            '$' if i + 1 < chars.len() && chars[i + 1] == '(' => {
                return Err(Error::Input("command substitution '$(' is not permitted".to_string()));
            }
            _ => {}
        }
        i += 1;
    }

    Ok(())
}

/// Split `line` on top-level `|` characters (outside quotes), returning the
/// raw text of each pipeline stage.
fn split_pipeline_stages(line: &str) -> Vec<String> {
    let mut stages = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;

    for c in line.chars() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            '|' if !in_single && !in_double => {
                stages.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    stages.push(current);

    stages.into_iter().map(|s| s.trim().to_string()).collect()
}

/// Quote-aware whitespace tokenizer, also responsible for peeling off a
/// trailing redirection operator (`>`, `>>`, `<`) plus its path token.
fn tokenize_stage(stage: &str) -> Result<(Vec<String>, Redirect, Redirect)> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = stage.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            c if c.is_whitespace() && !in_single && !in_double => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            '>' if !in_single && !in_double => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                let append = chars.peek() == Some(&'>');
                if append {
                    chars.next();
                }
                tokens.push(if append { ">>".to_string() } else { ">".to_string() });
            }
            '<' if !in_single && !in_double => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push("<".to_string());
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    if in_single || in_double {
        return Err(Error::Input("unterminated quote".to_string()));
    }

    let mut argv = Vec::new();
    let mut redirect_in = Redirect::None;
    let mut redirect_out = Redirect::None;

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i].as_str() {
            ">" | ">>" => {
                let path = tokens
                    .get(i + 1)
                    .ok_or_else(|| Error::Input("redirection operator missing a target".to_string()))?;
                redirect_out = if tokens[i] == ">>" {
                    Redirect::Append(path.into())
                } else {
                    Redirect::Out(path.into())
                };
                i += 2;
            }
            "<" => {
                let path = tokens
                    .get(i + 1)
                    .ok_or_else(|| Error::Input("redirection operator missing a target".to_string()))?;
                redirect_in = Redirect::In(path.into());
                i += 2;
            }
            token => {
                argv.push(expand_equals_cmd(token));
                i += 1;
            }
        }
    }

    Ok((argv, redirect_in, redirect_out))
}

/// `=cmd` tokens expand to the PATH-resolved absolute path of `cmd`. A
/// token that cannot be resolved is left exactly as written.
fn expand_equals_cmd(token: &str) -> String {
    let Some(name) = token.strip_prefix('=') else {
        return token.to_string();
    };

    let Some(path_var) = std::env::var_os("PATH") else {
        return token.to_string();
    };

    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return candidate.to_string_lossy().into_owned();
        }
    }

    token.to_string()
}

pub(crate) struct Parser {
    max_command_length: usize,
}

impl Parser {
    pub(crate) fn new(max_command_length: usize) -> Self {
        Self { max_command_length }
    }

    /// Parse a raw sudo-compat `argv` tail (no shell operators are ever
    /// recognized here: every element is already a separate argument).
    pub(crate) fn parse_argv(&self, argv: Vec<String>, runas_user: &str) -> Result<Pipeline> {
        let joined = argv.join(" ");
        if joined.len() > self.max_command_length {
            return Err(Error::Input(format!(
                "command exceeds the {}-byte limit",
                self.max_command_length
            )));
        }
        Ok(Pipeline::single(Command::new(argv, runas_user)))
    }

    /// Parse one interactive line through all five stages.
    pub(crate) fn parse_line(
        &self,
        line: &str,
        runas_user: &str,
        ctx: Option<&InteractiveContext>,
    ) -> Result<Pipeline> {
        let mut expanded = line.to_string();
        if let Some(ctx) = ctx {
            expanded = ctx.expand_history(&expanded)?;
            expanded = ctx.expand_aliases(&expanded);
        }

        reject_disallowed_operators(&expanded)?;

        let stage_texts = split_pipeline_stages(&expanded);
        if stage_texts.iter().any(|s| s.is_empty()) {
            return Err(Error::Input("empty pipeline stage".to_string()));
        }

        let mut stages = Vec::with_capacity(stage_texts.len());
        for stage_text in &stage_texts {
            let (argv, redirect_in, redirect_out) = tokenize_stage(stage_text)?;
            if argv.is_empty() {
                return Err(Error::Input("empty command".to_string()));
            }
            let mut command = Command::new(argv, runas_user);
            command.redirect_in = redirect_in;
            command.redirect_out = redirect_out;
            stages.push(command);
        }

        if expanded.len() > self.max_command_length {
            return Err(Error::Input(format!(
                "command exceeds the {}-byte limit",
                self.max_command_length
            )));
        }

        Ok(Pipeline { stages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> Parser {
        Parser::new(4096)
    }

    #[test]
    fn rejects_semicolon_chaining() {
        let err = parser()
            .parse_line("echo a; rm -rf /", "root", None)
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn rejects_command_substitution() {
        assert!(parser().parse_line("echo $(whoami)", "root", None).is_err());
        assert!(parser().parse_line("echo `whoami`", "root", None).is_err());
    }

    #[test]
    fn parses_two_stage_pipeline_with_terminal_redirect() {
        let pipeline = parser()
            .parse_line("cat /etc/passwd | grep root > /tmp/foo", "root", None)
            .unwrap();
        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.stages[0].argv, vec!["cat", "/etc/passwd"]);
        assert_eq!(pipeline.stages[1].argv, vec!["grep", "root"]);
        assert_eq!(
            pipeline.stages[1].redirect_out,
            Redirect::Out("/tmp/foo".into())
        );
    }

    #[test]
    fn append_redirect_is_recognized() {
        let pipeline = parser().parse_line("echo hi >> /tmp/out", "root", None).unwrap();
        assert_eq!(
            pipeline.stages[0].redirect_out,
            Redirect::Append("/tmp/out".into())
        );
    }

    #[test]
    fn quoted_pipe_is_not_a_stage_separator() {
        let pipeline = parser().parse_line("echo 'a|b'", "root", None).unwrap();
        assert_eq!(pipeline.stages.len(), 1);
        assert_eq!(pipeline.stages[0].argv, vec!["echo", "a|b"]);
    }

    #[test]
    fn rejects_overlong_command() {
        let parser = Parser::new(10);
        assert!(parser.parse_line("echo this is way too long", "root", None).is_err());
    }

    #[test]
    fn history_expansion_by_index() {
        let mut ctx = InteractiveContext::new();
        ctx.record_history("echo first");
        ctx.record_history("echo second");
        let pipeline = parser().parse_line("!1", "root", Some(&ctx)).unwrap();
        assert_eq!(pipeline.stages[0].argv, vec!["echo", "first"]);
    }

    #[test]
    fn alias_expansion_is_not_recursive() {
        let mut ctx = InteractiveContext::new();
        ctx.define_alias("ll", "ls");
        ctx.define_alias("ls", "should-not-expand-again");
        let pipeline = parser().parse_line("ll -la", "root", Some(&ctx)).unwrap();
        assert_eq!(pipeline.stages[0].argv, vec!["ls", "-la"]);
    }
}
