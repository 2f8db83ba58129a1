use super::block::parse_signature;
use super::prefix::parse_prefix_change;
use anyhow::{bail, Result};
use std::collections::BTreeMap;

/// How a command receives the rest of its line.
pub enum Handler<T> {
    /// Whitespace-separated arguments.
    Parsed(fn(&mut T, &[&str]) -> Result<()>),
    /// The unparsed remainder, usable as a block target.
    Raw(fn(&mut T, &str) -> Result<()>),
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handler<T> {}

pub struct CommandSpec<T> {
    pub name: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub handler: Handler<T>,
}

impl<T> CommandSpec<T> {
    pub fn parsed(
        name: &'static str,
        usage: &'static str,
        summary: &'static str,
        args: (usize, Option<usize>),
        handler: fn(&mut T, &[&str]) -> Result<()>,
    ) -> Self {
        Self {
            name,
            usage,
            summary,
            min_args: args.0,
            max_args: args.1,
            handler: Handler::Parsed(handler),
        }
    }

    pub fn raw(
        name: &'static str,
        usage: &'static str,
        summary: &'static str,
        handler: fn(&mut T, &str) -> Result<()>,
    ) -> Self {
        Self {
            name,
            usage,
            summary,
            min_args: 0,
            max_args: None,
            handler: Handler::Raw(handler),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.handler, Handler::Raw(_))
    }

    fn check_arity(&self, count: usize) -> Result<()> {
        if count < self.min_args {
            bail!(
                "{} expects at least {} argument(s), got {count}; usage: {}",
                self.name,
                self.min_args,
                self.usage
            );
        }
        if let Some(max) = self.max_args {
            if count > max {
                bail!(
                    "{} expects at most {max} argument(s), got {count}; usage: {}",
                    self.name,
                    self.usage
                );
            }
        }
        Ok(())
    }
}

/// Arguments extracted from a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation<'a> {
    Parsed(Vec<&'a str>),
    Raw(&'a str),
}

/// The outcome of resolving one command line; nothing is executed yet.
pub enum Resolution<'r, 'a, T> {
    ChangePrefix(char),
    Invoke {
        spec: &'r CommandSpec<T>,
        invocation: Invocation<'a>,
    },
    OpenBlock {
        command: &'static str,
        signature: &'a str,
    },
    Rejected(String),
    Unknown(String),
}

/// Canonical form of a command word: inner hyphens become underscores, a
/// leading hyphen (the reset form) is kept.
pub fn normalize_command_name(word: &str) -> String {
    match word.strip_prefix('-') {
        Some(rest) => format!("-{}", rest.replace('-', "_")),
        None => word.replace('-', "_"),
    }
}

pub struct CommandRegistry<T> {
    commands: BTreeMap<&'static str, CommandSpec<T>>,
    aliases: BTreeMap<&'static str, &'static str>,
}

impl<T> Default for CommandRegistry<T> {
    fn default() -> Self {
        Self {
            commands: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }
}

impl<T> CommandRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: CommandSpec<T>) {
        self.commands.insert(spec.name, spec);
    }

    pub fn alias(&mut self, alias: &'static str, target: &'static str) {
        self.aliases.insert(alias, target);
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec<T>> {
        let normalized = normalize_command_name(name);
        let key = self
            .aliases
            .get(normalized.as_str())
            .copied()
            .unwrap_or(normalized.as_str());
        self.commands.get(key)
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandSpec<T>> {
        self.commands.values()
    }

    /// Resolves a command line with the prefix already removed.
    pub fn resolve<'r, 'a>(&'r self, line: &'a str, prefix: char) -> Resolution<'r, 'a, T> {
        let line = line.trim_start();
        let word_end = line.find(char::is_whitespace).unwrap_or(line.len());
        let (word, rest) = line.split_at(word_end);
        if word.is_empty() {
            return Resolution::Unknown(String::new());
        }

        if let Some(change) = parse_prefix_change(word) {
            return match change {
                Ok(_) if !rest.trim().is_empty() => {
                    Resolution::Rejected("prefix change takes no arguments".to_string())
                }
                Ok(c) => Resolution::ChangePrefix(c),
                Err(error) => Resolution::Rejected(error.to_string()),
            };
        }

        if let Some(spec) = self.get(word) {
            let invocation = match spec.handler {
                Handler::Raw(_) => Invocation::Raw(rest.trim_start()),
                Handler::Parsed(_) => Invocation::Parsed(rest.split_whitespace().collect()),
            };
            if let Invocation::Parsed(args) = &invocation {
                if let Err(error) = spec.check_arity(args.len()) {
                    return Resolution::Rejected(error.to_string());
                }
            }
            return Resolution::Invoke { spec, invocation };
        }

        if let Some((name, tail)) = word.split_once("<<") {
            if let Some(spec) = self.get(name).filter(|spec| spec.is_raw()) {
                let opener = &word[name.len()..];
                return match parse_signature(opener, prefix) {
                    Some(_) if !rest.trim().is_empty() => Resolution::Rejected(format!(
                        "unexpected text after block opener '{word}'"
                    )),
                    Some(_) => Resolution::OpenBlock {
                        command: spec.name,
                        signature: tail,
                    },
                    None => Resolution::Rejected(format!("invalid block signature in '{word}'")),
                };
            }
        }

        Resolution::Unknown(word.to_string())
    }
}

/// Runs a resolved command against its target.
pub fn execute<T>(target: &mut T, spec: &CommandSpec<T>, invocation: Invocation<'_>) -> Result<()> {
    match (spec.handler, invocation) {
        (Handler::Parsed(handler), Invocation::Parsed(args)) => handler(target, &args),
        (Handler::Raw(handler), Invocation::Raw(text)) => handler(target, text),
        (Handler::Parsed(handler), Invocation::Raw(text)) => {
            let args: Vec<&str> = text.split_whitespace().collect();
            spec.check_arity(args.len())?;
            handler(target, &args)
        }
        (Handler::Raw(handler), Invocation::Parsed(args)) => handler(target, &args.join(" ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    fn record_parsed(target: &mut Recorder, args: &[&str]) -> Result<()> {
        target.calls.push(format!("parsed:{}", args.join(",")));
        Ok(())
    }

    fn record_raw(target: &mut Recorder, text: &str) -> Result<()> {
        target.calls.push(format!("raw:{text}"));
        Ok(())
    }

    fn registry() -> CommandRegistry<Recorder> {
        let mut registry = CommandRegistry::new();
        registry.register(CommandSpec::parsed(
            "frequency_penalty",
            "frequency_penalty <value>",
            "",
            (1, Some(1)),
            record_parsed,
        ));
        registry.register(CommandSpec::parsed(
            "-frequency_penalty",
            "-frequency_penalty",
            "",
            (0, Some(0)),
            record_parsed,
        ));
        registry.register(CommandSpec::raw("prompt", "prompt <text>", "", record_raw));
        registry.alias("frequence_penalty", "frequency_penalty");
        registry
    }

    #[test]
    fn normalization_keeps_leading_reset_hyphen() {
        assert_eq!(normalize_command_name("top-p"), "top_p");
        assert_eq!(normalize_command_name("-top-p"), "-top_p");
    }

    #[test]
    fn hyphenated_and_aliased_names_resolve() {
        let registry = registry();
        let mut target = Recorder::default();
        for line in ["frequency-penalty 0.5", "frequence_penalty 0.5", "-frequency-penalty"] {
            match registry.resolve(line, ':') {
                Resolution::Invoke { spec, invocation } => {
                    execute(&mut target, spec, invocation).unwrap()
                }
                _ => panic!("expected invocation for {line}"),
            }
        }
        assert_eq!(target.calls, vec!["parsed:0.5", "parsed:0.5", "parsed:"]);
    }

    #[test]
    fn raw_commands_receive_trimmed_remainder() {
        let registry = registry();
        match registry.resolve("prompt    be brief  ", ':') {
            Resolution::Invoke { invocation, .. } => {
                assert_eq!(invocation, Invocation::Raw("be brief  "))
            }
            _ => panic!("expected raw invocation"),
        }
    }

    #[test]
    fn block_opener_only_for_raw_commands() {
        let registry = registry();
        assert!(matches!(
            registry.resolve("prompt<<EOF", ':'),
            Resolution::OpenBlock { command: "prompt", signature: "EOF" }
        ));
        assert!(matches!(
            registry.resolve("prompt<<<EOF", ':'),
            Resolution::Rejected(_)
        ));
        assert!(matches!(
            registry.resolve("frequency_penalty<<EOF", ':'),
            Resolution::Unknown(_)
        ));
    }

    #[test]
    fn prefix_change_wins_over_commands() {
        let registry = registry();
        assert!(matches!(registry.resolve("->/", ':'), Resolution::ChangePrefix('/')));
        assert!(matches!(registry.resolve("->a", ':'), Resolution::Rejected(_)));
    }

    #[test]
    fn arity_errors_are_rejected_before_execution() {
        let registry = registry();
        assert!(matches!(
            registry.resolve("frequency_penalty", ':'),
            Resolution::Rejected(_)
        ));
        assert!(matches!(registry.resolve("nope", ':'), Resolution::Unknown(_)));
    }
}
