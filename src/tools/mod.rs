mod files;
mod taskbox;
mod web;

pub use files::FileTools;
pub use taskbox::{DockerTaskbox, ShellTools, Taskbox};
pub use web::{parse_web_url, HttpWebAccess, WebAccess};

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One callable function as advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }

    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A named group of functions the model may call. Calls run on a blocking
/// thread, so implementations may do synchronous I/O.
pub trait ToolSet: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn definitions(&self) -> Vec<ToolDefinition>;
    fn call(&self, function: &str, args: &Value) -> Result<String>;
}

/// Available tool sets and the subset currently exposed to the model.
#[derive(Default)]
pub struct ToolRegistry {
    sets: BTreeMap<String, Arc<dyn ToolSet>>,
    /// Active set name -> allowed functions (`None` means all).
    active: BTreeMap<String, Option<BTreeSet<String>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a set; activation state is kept across replacement.
    pub fn register(&mut self, set: Arc<dyn ToolSet>) {
        self.sets.insert(set.name().to_string(), set);
    }

    pub fn available(&self) -> impl Iterator<Item = &Arc<dyn ToolSet>> {
        self.sets.values()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolSet>> {
        self.sets.get(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }

    /// Applies `set`, `set:fn1,fn2` or `none`.
    pub fn activate(&mut self, spec: &str) -> Result<()> {
        let spec = spec.trim();
        if spec.is_empty() {
            bail!("expected a tool set name, `set:fn1,fn2`, or `none`");
        }
        if spec == "none" {
            self.active.clear();
            return Ok(());
        }

        let (set_name, functions) = match spec.split_once(':') {
            Some((set_name, functions)) => (set_name.trim(), Some(functions)),
            None => (spec, None),
        };
        let set = self
            .sets
            .get(set_name)
            .ok_or_else(|| anyhow!("unknown tool set '{set_name}'"))?;

        let selected = match functions {
            None => None,
            Some(list) => {
                let wanted: BTreeSet<String> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect();
                if wanted.is_empty() {
                    bail!("no functions listed after '{set_name}:'");
                }
                let known: BTreeSet<String> =
                    set.definitions().into_iter().map(|def| def.name).collect();
                if let Some(missing) = wanted.iter().find(|name| !known.contains(*name)) {
                    bail!("tool set '{set_name}' has no function '{missing}'");
                }
                Some(wanted)
            }
        };
        self.active.insert(set_name.to_string(), selected);
        Ok(())
    }

    pub fn active_definitions(&self) -> Vec<ToolDefinition> {
        self.active
            .iter()
            .filter_map(|(name, filter)| Some((self.sets.get(name)?, filter)))
            .flat_map(|(set, filter)| {
                set.definitions().into_iter().filter(move |def| {
                    filter
                        .as_ref()
                        .map_or(true, |allowed| allowed.contains(&def.name))
                })
            })
            .collect()
    }

    /// The active set exposing `function`, if any.
    pub fn resolve(&self, function: &str) -> Option<Arc<dyn ToolSet>> {
        self.active.iter().find_map(|(name, filter)| {
            let set = self.sets.get(name)?;
            let allowed = filter
                .as_ref()
                .map_or(true, |allowed| allowed.contains(function));
            let defines = set.definitions().iter().any(|def| def.name == function);
            (allowed && defines).then(|| Arc::clone(set))
        })
    }

    /// One line per available set, marking active ones.
    pub fn summary(&self) -> Vec<String> {
        self.sets
            .values()
            .map(|set| {
                let marker = if self.is_active(set.name()) { "*" } else { " " };
                format!("{marker} {} - {}", set.name(), set.description())
            })
            .collect()
    }

    pub fn describe(&self, name: &str) -> Result<String> {
        let set = self
            .sets
            .get(name)
            .ok_or_else(|| anyhow!("unknown tool set '{name}'"))?;
        let filter = self.active.get(name);
        let mut out = format!("{}: {}\n", set.name(), set.description());
        for def in set.definitions() {
            let enabled = match filter {
                Some(Some(allowed)) => allowed.contains(&def.name),
                Some(None) => true,
                None => false,
            };
            let marker = if enabled { "*" } else { " " };
            out.push_str(&format!("  {marker} {} - {}\n", def.name, def.description));
        }
        Ok(out.trim_end().to_string())
    }
}

pub(crate) fn first_tool_string<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| input.get(*key).and_then(|v| v.as_str()))
}

pub(crate) fn required_tool_string<'a>(
    input: &'a Value,
    tool: &str,
    canonical_key: &str,
    keys: &[&str],
) -> Result<&'a str> {
    let value = first_tool_string(input, keys).map(str::trim).unwrap_or("");
    if value.is_empty() {
        bail!("{tool} requires a non-empty '{canonical_key}' string argument");
    }
    Ok(value)
}

pub(crate) fn tool_usize(input: &Value, key: &str, default: usize) -> usize {
    input
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}
