use crate::config::{DEFAULT_API_KEY_NAME, DEFAULT_BASE_URL, DEFAULT_MODEL};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TalkMode {
    /// Full multi-turn history is sent.
    #[default]
    Chain,
    /// Only the trailing run of user messages is sent.
    Instant,
}

impl TalkMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chain" => Some(Self::Chain),
            "instant" => Some(Self::Instant),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chain => "chain",
            Self::Instant => "instant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionKind {
    Text,
    Float { min: f64, max: f64 },
    Int { min: i64, max: i64 },
    Mode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Text(String),
    Float(f64),
    Int(i64),
    Mode(TalkMode),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Float(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Mode(mode) => f.write_str(mode.as_str()),
        }
    }
}

pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub help: &'static str,
}

pub const OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        name: "model",
        kind: OptionKind::Text,
        help: "model name, or an index into the active profile's models",
    },
    OptionSpec {
        name: "temperature",
        kind: OptionKind::Float { min: 0.0, max: 2.0 },
        help: "sampling temperature",
    },
    OptionSpec {
        name: "top_p",
        kind: OptionKind::Float { min: 0.0, max: 1.0 },
        help: "nucleus sampling mass",
    },
    OptionSpec {
        name: "presence_penalty",
        kind: OptionKind::Float { min: -2.0, max: 2.0 },
        help: "penalty for tokens already present",
    },
    OptionSpec {
        name: "frequency_penalty",
        kind: OptionKind::Float { min: -2.0, max: 2.0 },
        help: "penalty proportional to token frequency",
    },
    OptionSpec {
        name: "max_tokens",
        kind: OptionKind::Int { min: 1, max: 1 << 20 },
        help: "maximum tokens to generate",
    },
    OptionSpec {
        name: "logprobs",
        kind: OptionKind::Int { min: 0, max: 20 },
        help: "number of top log-probabilities per token",
    },
    OptionSpec {
        name: "talk_mode",
        kind: OptionKind::Mode,
        help: "chain (full history) or instant (latest user turn only)",
    },
    OptionSpec {
        name: "complete_type",
        kind: OptionKind::Text,
        help: "language tag that switches to code completion",
    },
    OptionSpec {
        name: "prefix",
        kind: OptionKind::Text,
        help: "text the completion continues from",
    },
    OptionSpec {
        name: "suffix",
        kind: OptionKind::Text,
        help: "fill-in-the-middle suffix, consumed by the next request",
    },
    OptionSpec {
        name: "prompt",
        kind: OptionKind::Text,
        help: "system prompt",
    },
    OptionSpec {
        name: "base_url",
        kind: OptionKind::Text,
        help: "API endpoint",
    },
    OptionSpec {
        name: "api_key_name",
        kind: OptionKind::Text,
        help: "environment variable holding the API key",
    },
    OptionSpec {
        name: "sandbox",
        kind: OptionKind::Text,
        help: "directory exposed to tools",
    },
];

pub fn option_spec(name: &str) -> Option<&'static OptionSpec> {
    let name = canonical_option_name(name);
    OPTIONS.iter().find(|spec| spec.name == name)
}

/// Maps spelling variants onto the canonical option name.
pub fn canonical_option_name(name: &str) -> &str {
    match name {
        "frequence_penalty" => "frequency_penalty",
        other => other,
    }
}

pub fn default_system_prompt() -> &'static str {
    let locale = ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_default();
    if locale.to_ascii_lowercase().starts_with("zh") {
        "你是一个乐于助人的助手。"
    } else {
        "You are a helpful assistant."
    }
}

/// Typed, validated per-session options. Unset options fall back to defaults.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    values: BTreeMap<&'static str, OptionValue>,
    defaults: BTreeMap<&'static str, OptionValue>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::with_defaults(DEFAULT_BASE_URL, DEFAULT_API_KEY_NAME, DEFAULT_MODEL)
    }
}

impl SessionConfig {
    pub fn with_defaults(base_url: &str, api_key_name: &str, model: &str) -> Self {
        let defaults = BTreeMap::from([
            ("model", OptionValue::Text(model.to_string())),
            ("base_url", OptionValue::Text(base_url.to_string())),
            ("api_key_name", OptionValue::Text(api_key_name.to_string())),
            ("talk_mode", OptionValue::Mode(TalkMode::Chain)),
            (
                "prompt",
                OptionValue::Text(default_system_prompt().to_string()),
            ),
        ]);
        Self {
            values: BTreeMap::new(),
            defaults,
        }
    }

    /// Coerces `raw` to the option's type and stores it. Leaves the config
    /// untouched on failure.
    pub fn set(&mut self, name: &str, raw: &str) -> Result<&OptionValue> {
        let spec = option_spec(name).ok_or_else(|| anyhow!("unknown option '{name}'"))?;
        let value = coerce(spec, raw)?;
        Ok(self.store(spec.name, value))
    }

    /// Stores a JSON value, as found in assistant profile parameters.
    pub fn set_json(&mut self, name: &str, value: &Value) -> Result<&OptionValue> {
        let raw = match value {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => {
                bail!("unsupported value for option '{name}': {value}")
            }
        };
        self.set(name, &raw)
    }

    fn store(&mut self, name: &'static str, value: OptionValue) -> &OptionValue {
        self.values.insert(name, value);
        &self.values[name]
    }

    /// Removes an override. Returns whether one was present.
    pub fn reset(&mut self, name: &str) -> Result<bool> {
        let spec = option_spec(name).ok_or_else(|| anyhow!("unknown option '{name}'"))?;
        Ok(self.values.remove(spec.name).is_some())
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.values.contains_key(canonical_option_name(name))
    }

    /// Effective value: the override, else the default.
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        let name = canonical_option_name(name);
        self.values.get(name).or_else(|| self.defaults.get(name))
    }

    pub fn take(&mut self, name: &str) -> Option<OptionValue> {
        self.values.remove(canonical_option_name(name))
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(OptionValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(OptionValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(OptionValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn model(&self) -> &str {
        self.text("model").unwrap_or(DEFAULT_MODEL)
    }

    pub fn base_url(&self) -> &str {
        self.text("base_url").unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn api_key_name(&self) -> &str {
        self.text("api_key_name").unwrap_or(DEFAULT_API_KEY_NAME)
    }

    pub fn system_prompt(&self) -> &str {
        self.text("prompt").unwrap_or_default()
    }

    pub fn talk_mode(&self) -> TalkMode {
        match self.get("talk_mode") {
            Some(OptionValue::Mode(mode)) => *mode,
            _ => TalkMode::Chain,
        }
    }

    /// `name = value` lines for every option, marking unset ones.
    pub fn describe_all(&self) -> Vec<String> {
        OPTIONS
            .iter()
            .map(|spec| self.describe(spec.name))
            .collect()
    }

    pub fn describe(&self, name: &str) -> String {
        let name = canonical_option_name(name);
        match self.get(name) {
            Some(value) if self.is_set(name) => format!("{name} = {value}"),
            Some(value) => format!("{name} = {value} (default)"),
            None => format!("{name} = (unset)"),
        }
    }
}

fn coerce(spec: &OptionSpec, raw: &str) -> Result<OptionValue> {
    let trimmed = raw.trim();
    match spec.kind {
        OptionKind::Text => {
            let keep_verbatim = matches!(spec.name, "prompt" | "prefix" | "suffix");
            let text = if keep_verbatim { raw } else { trimmed };
            if text.trim().is_empty() {
                bail!("{} needs a non-empty value", spec.name);
            }
            Ok(OptionValue::Text(text.to_string()))
        }
        OptionKind::Float { min, max } => {
            let value: f64 = trimmed
                .parse()
                .with_context(|| format!("{} expects a number, got '{trimmed}'", spec.name))?;
            if !value.is_finite() || value < min || value > max {
                bail!("{} must be between {min} and {max}, got {value}", spec.name);
            }
            Ok(OptionValue::Float(value))
        }
        OptionKind::Int { min, max } => {
            let value: i64 = trimmed
                .parse()
                .with_context(|| format!("{} expects an integer, got '{trimmed}'", spec.name))?;
            if value < min || value > max {
                bail!("{} must be between {min} and {max}, got {value}", spec.name);
            }
            Ok(OptionValue::Int(value))
        }
        OptionKind::Mode => TalkMode::parse(trimmed)
            .map(OptionValue::Mode)
            .ok_or_else(|| anyhow!("talk_mode must be 'chain' or 'instant', got '{trimmed}'")),
    }
}
