//! Layered configuration: compiled defaults → optional TOML
//! file → a process-global settings registry set once at startup →
//! environment variables, which always win. `serde` derive with
//! per-field defaults and `anyhow::Context` for read/parse errors, with
//! embedding/thermal/server sections in place of any connector-specific
//! ones.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::embedding::factory::FactorySettings;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Root directory `file://` resources are resolved against. Falls
    /// back to the process's current directory if unset.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Caller-supplied backend preference (`mlx`, `ollama`, `static`), used
    /// whenever the `EMBEDDER` environment variable is not set. Defaults
    /// to the local runner backend, independent of `model`'s shape.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_mlx_url")]
    pub mlx_base_url: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_base_url: String,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_sub_batch_size")]
    pub sub_batch_size: usize,
    #[serde(default)]
    pub inter_batch_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            provider: default_provider(),
            mlx_base_url: default_mlx_url(),
            ollama_base_url: default_ollama_url(),
            cache_enabled: true,
            cache_capacity: default_cache_capacity(),
            max_retries: default_max_retries(),
            sub_batch_size: default_sub_batch_size(),
            inter_batch_delay_ms: 0,
        }
    }
}

fn default_model() -> String {
    "llama".to_string()
}
fn default_provider() -> String {
    "local-runner".to_string()
}
fn default_mlx_url() -> String {
    "http://localhost:9000".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_true() -> bool {
    true
}
fn default_cache_capacity() -> usize {
    1_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_sub_batch_size() -> usize {
    crate::embedding::remote::DEFAULT_SUB_BATCH
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default)]
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
            log_json: false,
        }
    }
}

fn default_flush_interval_secs() -> u64 {
    60
}

/// Process-wide overrides set once, typically from CLI flags, before
/// environment variables are consulted. Set-once: a second call to
/// [`set_overrides`] is a no-op and returns the value that was rejected.
static OVERRIDES: OnceLock<ConfigOverrides> = OnceLock::new();

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub cache_enabled: Option<bool>,
}

pub fn set_overrides(overrides: ConfigOverrides) -> Result<(), ConfigOverrides> {
    OVERRIDES.set(overrides)
}

fn registry_overrides() -> Option<&'static ConfigOverrides> {
    OVERRIDES.get()
}

/// Load configuration for a TOML file that may not exist (falling back
/// to compiled defaults) and apply the settings registry and environment
/// overrides, in that precedence order.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) if p.exists() => {
            let content = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read config file: {}", p.display()))?;
            toml::from_str(&content).with_context(|| "failed to parse config file")?
        }
        _ => Config::default(),
    };

    if let Some(overrides) = registry_overrides() {
        if let Some(model) = &overrides.model {
            config.embedding.model = model.clone();
        }
        if let Some(cache_enabled) = overrides.cache_enabled {
            config.embedding.cache_enabled = cache_enabled;
        }
    }

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(model) = std::env::var("CODESIFT_MODEL") {
        if !model.trim().is_empty() {
            config.embedding.model = model;
        }
    }
    if let Ok(provider) = std::env::var("CODESIFT_PROVIDER") {
        if !provider.trim().is_empty() {
            config.embedding.provider = provider;
        }
    }
    if let Ok(url) = std::env::var("CODESIFT_MLX_URL") {
        if !url.trim().is_empty() {
            config.embedding.mlx_base_url = url;
        }
    }
    if let Ok(url) = std::env::var("CODESIFT_OLLAMA_URL") {
        if !url.trim().is_empty() {
            config.embedding.ollama_base_url = url;
        }
    }
    if let Ok(root) = std::env::var("CODESIFT_WORKSPACE_ROOT") {
        if !root.trim().is_empty() {
            config.workspace_root = Some(PathBuf::from(root));
        }
    }
    // `EMBEDDER`/`EMBED_CACHE` are read directly by
    // `embedding::factory::build`, which always takes precedence over
    // whatever is configured here — they are not mirrored into `Config`.
}

fn validate(config: &Config) -> Result<()> {
    if config.embedding.cache_capacity == 0 {
        anyhow::bail!("embedding.cache_capacity must be > 0");
    }
    if config.embedding.sub_batch_size == 0 {
        anyhow::bail!("embedding.sub_batch_size must be > 0");
    }
    if config.embedding.model.trim().is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }
    if crate::embedding::factory::Backend::parse(&config.embedding.provider).is_err() {
        anyhow::bail!("embedding.provider must be one of: mlx, ollama, static");
    }
    Ok(())
}

impl Config {
    pub fn to_factory_settings(&self) -> FactorySettings {
        FactorySettings {
            model: self.embedding.model.clone(),
            preferred_backend: crate::embedding::factory::Backend::parse(&self.embedding.provider)
                .unwrap_or(crate::embedding::factory::Backend::LocalRunner),
            mlx_base_url: self.embedding.mlx_base_url.clone(),
            ollama_base_url: self.embedding.ollama_base_url.clone(),
            cache_enabled: self.embedding.cache_enabled,
            cache_capacity: self.embedding.cache_capacity,
            max_retries: self.embedding.max_retries,
            sub_batch_size: self.embedding.sub_batch_size.clamp(1, crate::embedding::remote::MAX_SUB_BATCH),
            inter_batch_delay_ms: self.embedding.inter_batch_delay_ms,
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/path/codesift.toml"))).unwrap();
        assert_eq!(config.embedding.model, "llama");
    }

    #[test]
    fn parses_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codesift.toml");
        std::fs::write(
            &path,
            "[embedding]\nmodel = \"llama3:8b\"\ncache_capacity = 500\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.embedding.model, "llama3:8b");
        assert_eq!(config.embedding.cache_capacity, 500);
    }

    #[test]
    fn env_var_overrides_toml_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codesift.toml");
        std::fs::write(&path, "[embedding]\nmodel = \"from-toml\"\n").unwrap();

        std::env::set_var("CODESIFT_MODEL", "from-env");
        let config = load_config(Some(&path)).unwrap();
        std::env::remove_var("CODESIFT_MODEL");

        assert_eq!(config.embedding.model, "from-env");
    }

    #[test]
    fn default_provider_yields_local_runner_backend() {
        let config = Config::default();
        let settings = config.to_factory_settings();
        assert_eq!(
            settings.preferred_backend,
            crate::embedding::factory::Backend::LocalRunner
        );
    }

    #[test]
    fn provider_toml_override_selects_mlx_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codesift.toml");
        std::fs::write(&path, "[embedding]\nprovider = \"mlx\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        let settings = config.to_factory_settings();
        assert_eq!(settings.preferred_backend, crate::embedding::factory::Backend::Mlx);
    }

    #[test]
    fn rejects_unrecognized_provider() {
        let mut config = Config::default();
        config.embedding.provider = "not-a-backend".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_cache_capacity() {
        let mut config = Config::default();
        config.embedding.cache_capacity = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn to_factory_settings_clamps_sub_batch_size() {
        let mut config = Config::default();
        config.embedding.sub_batch_size = 10_000;
        let settings = config.to_factory_settings();
        assert_eq!(settings.sub_batch_size, crate::embedding::remote::MAX_SUB_BATCH);
    }
}
