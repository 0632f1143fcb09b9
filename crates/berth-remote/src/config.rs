use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SEARCH_URL: &str = "https://search.berth.dev";
pub const DEFAULT_CACHE_URL: &str = "https://cache.nixos.org";
pub const DEFAULT_RELEASES_API_URL: &str = "https://api.github.com";

/// Endpoints of the remote collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_cache_url")]
    pub cache_url: String,
    #[serde(default = "default_releases_url")]
    pub releases_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_search_url() -> String {
    DEFAULT_SEARCH_URL.to_owned()
}

fn default_cache_url() -> String {
    DEFAULT_CACHE_URL.to_owned()
}

fn default_releases_url() -> String {
    DEFAULT_RELEASES_API_URL.to_owned()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            cache_url: default_cache_url(),
            releases_url: default_releases_url(),
            auth_token: None,
        }
    }
}

impl RemoteConfig {
    pub fn new(search_url: &str, cache_url: &str) -> Self {
        Self {
            search_url: search_url.trim_end_matches('/').to_owned(),
            cache_url: cache_url.trim_end_matches('/').to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_overrides(mut self, search_url: Option<String>, cache_url: Option<String>) -> Self {
        if let Some(url) = search_url.filter(|u| !u.is_empty()) {
            self.search_url = url.trim_end_matches('/').to_owned();
        }
        if let Some(url) = cache_url.filter(|u| !u.is_empty()) {
            self.cache_url = url.trim_end_matches('/').to_owned();
        }
        self
    }

    /// Load `~/.config/berth/remote.json` (defaults when absent), then apply
    /// `BERTH_SEARCH_URL` and `BERTH_CACHE_URL`.
    pub fn load_default() -> Result<Self, RemoteError> {
        let base = match default_config_path() {
            Ok(path) if path.exists() => Self::load(&path)?,
            _ => Self::default(),
        };
        Ok(base.with_overrides(
            std::env::var("BERTH_SEARCH_URL").ok(),
            std::env::var("BERTH_CACHE_URL").ok(),
        ))
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid remote config: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/berth/remote.json"))
}
