//! Provider profiles (§6): named bundles of env-var overrides and a
//! tier → concrete model id mapping.
//!
//! Grounded on the original `provider_config.py`'s `DEFAULT_PROVIDERS`
//! table and `mask_credentials`/`has_credentials` helpers. Reshaped
//! from a module-level JSON-file-with-globals pattern into a value
//! (`ProviderCatalog`) loaded once and handed to the orchestrator,
//! consistent with the "no module-level globals" redesign note.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::worker::ModelTier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub description: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub model_tiers: ModelTierMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTierMap {
    pub opus: String,
    pub sonnet: String,
    pub haiku: String,
}

impl ProviderProfile {
    pub fn env_overrides(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter(|(_, v)| !v.is_empty()).map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn model_for(&self, tier: ModelTier) -> Option<&str> {
        let model = match tier {
            ModelTier::Initializer => &self.model_tiers.opus,
            ModelTier::Coding => &self.model_tiers.sonnet,
            ModelTier::Testing => &self.model_tiers.haiku,
        };
        if model.is_empty() {
            None
        } else {
            Some(model.as_str())
        }
    }

    /// A profile has usable credentials if it declares no auth-shaped
    /// env vars at all, or every auth-shaped var it declares is
    /// non-empty.
    pub fn has_credentials(&self) -> bool {
        let auth_keys: Vec<&String> = self.env.keys().filter(|k| is_auth_key(k)).collect();
        if auth_keys.is_empty() {
            return true;
        }
        auth_keys.into_iter().all(|k| !self.env[k].is_empty())
    }

    /// Env vars with auth-shaped keys masked to their first 8 chars, for
    /// safe display/logging. Never returns the raw value.
    pub fn masked_env(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| {
                let display = if is_auth_key(k) && !v.is_empty() {
                    if v.len() > 8 {
                        format!("{}...", &v[..8])
                    } else {
                        "***".to_string()
                    }
                } else {
                    v.clone()
                };
                (k.clone(), display)
            })
            .collect()
    }
}

fn is_auth_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    upper.contains("TOKEN") || upper.contains("KEY") || upper.contains("SECRET")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCatalog {
    pub profiles: HashMap<String, ProviderProfile>,
    pub active: Option<String>,
}

impl ProviderCatalog {
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            let defaults = Self::defaults();
            defaults.save(path)?;
            return Ok(defaults);
        }
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| EngineError::Config { message: format!("invalid providers.json: {e}") })
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| EngineError::Config { message: e.to_string() })?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn active_profile(&self) -> EngineResult<&ProviderProfile> {
        let name = self
            .active
            .as_ref()
            .ok_or_else(|| EngineError::Config { message: "no active provider configured".into() })?;
        self.profiles
            .get(name)
            .ok_or_else(|| EngineError::Config { message: format!("active provider '{name}' not found") })
    }

    fn defaults() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "claude-sub".to_string(),
            ProviderProfile {
                description: "Claude subscription (native CLI auth)".into(),
                env: HashMap::new(),
                model_tiers: ModelTierMap {
                    opus: "claude-opus-4-5".into(),
                    sonnet: "claude-sonnet-4-5".into(),
                    haiku: "claude-haiku-4-5".into(),
                },
            },
        );
        profiles.insert(
            "claude-api".to_string(),
            ProviderProfile {
                description: "Anthropic API (pay-per-use)".into(),
                env: HashMap::from([("ANTHROPIC_AUTH_TOKEN".to_string(), String::new())]),
                model_tiers: ModelTierMap {
                    opus: "claude-opus-4-5".into(),
                    sonnet: "claude-sonnet-4-5".into(),
                    haiku: "claude-haiku-4-5".into(),
                },
            },
        );
        Self { profiles, active: Some("claude-sub".to_string()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with(env: HashMap<String, String>) -> ProviderProfile {
        ProviderProfile {
            description: "test".into(),
            env,
            model_tiers: ModelTierMap { opus: "o".into(), sonnet: "s".into(), haiku: "h".into() },
        }
    }

    #[test]
    fn masks_token_but_not_plain_vars() {
        let profile = profile_with(HashMap::from([
            ("ANTHROPIC_AUTH_TOKEN".to_string(), "sk-ant-0123456789".to_string()),
            ("ANTHROPIC_BASE_URL".to_string(), "https://example.com".to_string()),
        ]));
        let masked = profile.masked_env();
        assert_eq!(masked["ANTHROPIC_AUTH_TOKEN"], "sk-ant-0...");
        assert_eq!(masked["ANTHROPIC_BASE_URL"], "https://example.com");
    }

    #[test]
    fn empty_env_has_credentials() {
        let profile = profile_with(HashMap::new());
        assert!(profile.has_credentials());
    }

    #[test]
    fn missing_token_value_lacks_credentials() {
        let profile = profile_with(HashMap::from([("ANTHROPIC_AUTH_TOKEN".to_string(), String::new())]));
        assert!(!profile.has_credentials());
    }

    #[test]
    fn model_for_tier_resolves_from_map() {
        let profile = profile_with(HashMap::new());
        assert_eq!(profile.model_for(ModelTier::Initializer), Some("o"));
        assert_eq!(profile.model_for(ModelTier::Testing), Some("h"));
    }
}
