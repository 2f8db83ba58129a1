use crate::config::{DEFAULT_API_KEY_NAME, DEFAULT_BASE_URL};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "ModelEntryRepr")]
pub struct ModelEntry {
    pub name: String,
    pub context_window: Option<usize>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelEntryRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        context_window: Option<usize>,
    },
}

impl From<ModelEntryRepr> for ModelEntry {
    fn from(repr: ModelEntryRepr) -> Self {
        match repr {
            ModelEntryRepr::Name(name) => Self {
                name,
                context_window: None,
            },
            ModelEntryRepr::Full {
                name,
                context_window,
            } => Self {
                name,
                context_window,
            },
        }
    }
}

/// Provider endpoint, key reference, model list and default parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantProfile {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_api_key_name")]
    pub api_key_name: String,
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

fn default_api_key_name() -> String {
    DEFAULT_API_KEY_NAME.to_string()
}

impl AssistantProfile {
    /// Resolves a model by list index or by name.
    pub fn resolve_model(&self, selector: &str) -> Option<&ModelEntry> {
        let selector = selector.trim();
        match selector.parse::<usize>() {
            Ok(index) => self.models.get(index),
            Err(_) => self.models.iter().find(|model| model.name == selector),
        }
    }

    pub fn describe(&self) -> String {
        let mut out = format!(
            "{}\n  base_url: {}\n  api_key_name: {}\n  models:",
            self.name, self.base_url, self.api_key_name
        );
        for (idx, model) in self.models.iter().enumerate() {
            match model.context_window {
                Some(window) => out.push_str(&format!("\n    [{idx}] {} ({window} tokens)", model.name)),
                None => out.push_str(&format!("\n    [{idx}] {}", model.name)),
            }
        }
        if !self.params.is_empty() {
            out.push_str("\n  params:");
            for (key, value) in &self.params {
                out.push_str(&format!("\n    {key} = {value}"));
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantCatalog {
    profiles: Vec<AssistantProfile>,
}

impl AssistantCatalog {
    pub fn builtin() -> Self {
        Self {
            profiles: vec![AssistantProfile {
                name: "deepseek".to_string(),
                base_url: DEFAULT_BASE_URL.to_string(),
                api_key_name: DEFAULT_API_KEY_NAME.to_string(),
                models: vec![
                    ModelEntry {
                        name: "deepseek-chat".to_string(),
                        context_window: Some(65_536),
                    },
                    ModelEntry {
                        name: "deepseek-reasoner".to_string(),
                        context_window: Some(65_536),
                    },
                ],
                params: BTreeMap::new(),
            }],
        }
    }

    /// Reads the catalog file, falling back to the built-in catalog when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no assistant catalog, using built-in");
            return Ok(Self::builtin());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid catalog {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let profiles: Vec<AssistantProfile> =
            serde_json::from_str(text).context("expected a JSON list of assistant profiles")?;
        for profile in &profiles {
            if profile.name.trim().is_empty() {
                bail!("assistant profile with empty name");
            }
            if profile.models.is_empty() {
                bail!("assistant profile '{}' lists no models", profile.name);
            }
        }
        Ok(Self { profiles })
    }

    pub fn profiles(&self) -> &[AssistantProfile] {
        &self.profiles
    }

    /// Resolves a profile by list index or by name.
    pub fn resolve(&self, selector: &str) -> Option<(usize, &AssistantProfile)> {
        let selector = selector.trim();
        if let Ok(index) = selector.parse::<usize>() {
            return self.profiles.get(index).map(|profile| (index, profile));
        }
        self.profiles
            .iter()
            .enumerate()
            .find(|(_, profile)| profile.name == selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {
            "name": "local",
            "base_url": "http://localhost:8000/v1",
            "api_key_name": "LOCAL_KEY",
            "models": ["qwen", {"name": "llama", "context_window": 8192}],
            "params": {"temperature": 0.2}
        }
    ]"#;

    #[test]
    fn parses_short_and_full_model_entries() {
        let catalog = AssistantCatalog::from_json(CATALOG).unwrap();
        let (index, profile) = catalog.resolve("local").unwrap();
        assert_eq!(index, 0);
        assert_eq!(profile.models[0].name, "qwen");
        assert_eq!(profile.models[1].context_window, Some(8192));
        assert_eq!(profile.resolve_model("1").unwrap().name, "llama");
        assert_eq!(profile.resolve_model("qwen").unwrap().name, "qwen");
        assert!(profile.resolve_model("5").is_none());
    }

    #[test]
    fn resolves_profiles_by_index() {
        let catalog = AssistantCatalog::builtin();
        assert_eq!(catalog.resolve("0").unwrap().1.name, "deepseek");
        assert!(catalog.resolve("1").is_none());
        assert!(catalog.resolve("nope").is_none());
    }

    #[test]
    fn missing_file_uses_builtin() {
        let temp = tempfile::TempDir::new().unwrap();
        let catalog = AssistantCatalog::load(&temp.path().join("absent.json")).unwrap();
        assert_eq!(catalog, AssistantCatalog::builtin());
    }

    #[test]
    fn profiles_without_models_are_rejected() {
        let error = AssistantCatalog::from_json(r#"[{"name":"x","base_url":"http://a","models":[]}]"#)
            .unwrap_err();
        assert!(error.to_string().contains("no models"));
    }
}
