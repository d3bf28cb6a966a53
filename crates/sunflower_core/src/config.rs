use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = concat!("Sunflower/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SunflowerConfig {
    #[serde(default)]
    pub wiki: WikiSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    /// Wiki host or Wikimedia shorthand such as `b:pl`.
    pub url: Option<String>,
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub summary: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl SunflowerConfig {
    /// Resolve the wiki URL: env WIKI_URL > config > None.
    pub fn wiki_url(&self) -> Option<String> {
        env_override("WIKI_URL").or_else(|| self.wiki.url.clone())
    }

    /// Resolve the API endpoint: env WIKI_API_URL > config > None.
    pub fn api_url(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn summary(&self) -> Option<String> {
        env_override("WIKI_SUMMARY").or_else(|| self.wiki.summary.clone())
    }

    /// Username and password, both required. Env values win per field.
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = env_override("WIKI_USERNAME").or_else(|| self.wiki.username.clone())?;
        let password = env_override("WIKI_PASSWORD").or_else(|| self.wiki.password.clone())?;
        if username.trim().is_empty() || password.is_empty() {
            return None;
        }
        Some((username.trim().to_string(), password))
    }

    pub fn timeout_ms(&self) -> u64 {
        env_override("WIKI_HTTP_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .or(self.wiki.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }
}

/// Load and parse a SunflowerConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SunflowerConfig> {
    if !config_path.exists() {
        return Ok(SunflowerConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SunflowerConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
