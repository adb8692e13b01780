//! Embedder selection: turns a small settings struct and
//! the `EMBEDDER` / `EMBED_CACHE` environment overrides into a concrete,
//! ready-to-use [`Embedder`] via a match-and-construct factory. The
//! remaining environment variables (`OLLAMA_HOST`/`OLLAMA_MODEL`/`OLLAMA_TIMEOUT`,
//! `MLX_ENDPOINT`/`MLX_MODEL`, `INTER_BATCH_DELAY`, `TIMEOUT_PROGRESSION`,
//! `RETRY_TIMEOUT_MULTIPLIER`) are applied in [`construct`], each clamped
//! to a documented bound.
//!
//! Backend selection happens in exactly two places, and they don't mix:
//! an explicit `EMBEDDER` value always wins; short of that, [`build`]
//! uses [`FactorySettings::preferred_backend`] (default: the local
//! runner) without looking at `model` at all. [`classify_model_name`] is
//! a third, unrelated thing — once a backend is already chosen, it shapes
//! a backend-local detail (whether the local runner needs a default tag
//! appended to a bare model name).

use std::env;
use std::time::Duration;

use crate::errors::EmbedError;

use super::cached::CachedEmbedder;
use super::remote::{MlxWireFormat, OllamaWireFormat, RemoteEmbedder, RemoteEmbedderConfig};
use super::static_embedder::StaticEmbedder;
use super::thermal::ThermalConfig;
use super::Embedder;

const ENV_BACKEND: &str = "EMBEDDER";
const ENV_CACHE: &str = "EMBED_CACHE";
const DISABLE_VALUES: &[&str] = &["false", "0", "off", "disabled"];

const ENV_OLLAMA_HOST: &str = "OLLAMA_HOST";
const ENV_OLLAMA_MODEL: &str = "OLLAMA_MODEL";
const ENV_OLLAMA_TIMEOUT: &str = "OLLAMA_TIMEOUT";
const ENV_MLX_ENDPOINT: &str = "MLX_ENDPOINT";
const ENV_MLX_MODEL: &str = "MLX_MODEL";
const ENV_INTER_BATCH_DELAY: &str = "INTER_BATCH_DELAY";
const ENV_TIMEOUT_PROGRESSION: &str = "TIMEOUT_PROGRESSION";
const ENV_RETRY_TIMEOUT_MULTIPLIER: &str = "RETRY_TIMEOUT_MULTIPLIER";

const MAX_INTER_BATCH_DELAY: Duration = Duration::from_secs(5);
const MIN_TIMEOUT_PROGRESSION: f64 = 1.0;
const MAX_TIMEOUT_PROGRESSION: f64 = 3.0;
const MIN_RETRY_TIMEOUT_MULTIPLIER: f64 = 1.0;
const MAX_RETRY_TIMEOUT_MULTIPLIER: f64 = 2.0;

fn env_nonempty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_duration(name: &str) -> Option<Duration> {
    env_nonempty(name).and_then(|v| humantime::parse_duration(&v).ok())
}

fn env_f64(name: &str) -> Option<f64> {
    env_nonempty(name).and_then(|v| v.parse::<f64>().ok())
}

/// Apply `INTER_BATCH_DELAY` / `TIMEOUT_PROGRESSION` / `RETRY_TIMEOUT_MULTIPLIER`
/// on top of whatever `settings` carries;
/// each is clamped the same way a config-file value would be.
fn apply_shared_env_overrides(inter_batch_delay: Duration, thermal: &mut ThermalConfig) -> Duration {
    if let Some(p) = env_f64(ENV_TIMEOUT_PROGRESSION) {
        thermal.progression_cap = p.clamp(MIN_TIMEOUT_PROGRESSION, MAX_TIMEOUT_PROGRESSION);
    }
    if let Some(m) = env_f64(ENV_RETRY_TIMEOUT_MULTIPLIER) {
        thermal.retry_multiplier = m.clamp(MIN_RETRY_TIMEOUT_MULTIPLIER, MAX_RETRY_TIMEOUT_MULTIPLIER);
    }
    match env_duration(ENV_INTER_BATCH_DELAY) {
        Some(d) => d.min(MAX_INTER_BATCH_DELAY),
        None => inter_batch_delay,
    }
}

/// Which concrete backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Mlx,
    LocalRunner,
    Static,
}

impl Backend {
    pub fn parse(raw: &str) -> Result<Self, EmbedError> {
        match raw.trim().to_lowercase().as_str() {
            "mlx" | "gpu" => Ok(Backend::Mlx),
            "ollama" | "local" | "local-runner" | "llama" => Ok(Backend::LocalRunner),
            "static" | "hash" | "static-hash" => Ok(Backend::Static),
            other => Err(EmbedError::config(
                format!("unrecognized EMBEDDER value '{other}'"),
                Some("use one of: mlx, ollama, static".to_string()),
            )),
        }
    }
}

/// Layered settings a caller assembles from compiled defaults, a config
/// file, and environment overrides.
/// Environment variables read directly in [`build`] take precedence over
/// whatever is set here.
#[derive(Debug, Clone)]
pub struct FactorySettings {
    pub model: String,
    /// Caller-supplied backend preference, used whenever `EMBEDDER` is not
    /// set explicitly (step 2 of the decision order: default is the local
    /// runner backend, independent of what `model` looks like).
    pub preferred_backend: Backend,
    pub mlx_base_url: String,
    pub ollama_base_url: String,
    pub cache_enabled: bool,
    pub cache_capacity: usize,
    pub max_retries: u32,
    pub sub_batch_size: usize,
    pub inter_batch_delay_ms: u64,
}

impl Default for FactorySettings {
    fn default() -> Self {
        Self {
            model: "llama".to_string(),
            preferred_backend: Backend::LocalRunner,
            mlx_base_url: "http://localhost:9000".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            cache_enabled: true,
            cache_capacity: 1_000,
            max_retries: 3,
            sub_batch_size: super::remote::DEFAULT_SUB_BATCH,
            inter_batch_delay_ms: 0,
        }
    }
}

/// Which naming convention a bare model string looks like it follows.
/// This never selects the top-level backend (that's `EMBEDDER` or
/// [`FactorySettings::preferred_backend`]); it only shapes a backend-local
/// config field once a backend has already been chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelNameStyle {
    /// Carries an explicit runner tag, e.g. `llama3:8b`.
    RunnerTag,
    /// Looks like a GPU-server-hosted checkpoint file or version suffix,
    /// e.g. `weights.gguf` or `codebert-v2`.
    Checkpoint,
    /// Neither: a bare name like `embedding-model` or `llama`. Spec treats
    /// these as non-runner-tagged.
    Ambiguous,
}

/// Classify a bare model name's naming convention.
///
/// - A tag separator (`llama3:8b`) is a local-runner naming convention.
/// - A file extension or version suffix (`model-v2`, `weights.gguf`)
///   reads as a GPU-server-hosted checkpoint, not a runner tag.
/// - Anything else, including the bare `"llama"` alias, is ambiguous and
///   treated as non-runner.
pub fn classify_model_name(model: &str) -> ModelNameStyle {
    if model.contains(':') {
        return ModelNameStyle::RunnerTag;
    }

    let looks_like_file = model
        .rsplit_once('.')
        .map(|(_, ext)| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(false);

    let looks_versioned = model
        .rsplit_once('-')
        .map(|(_, suffix)| {
            suffix.len() > 1
                && suffix.starts_with('v')
                && suffix[1..].chars().all(|c| c.is_ascii_digit())
        })
        .unwrap_or(false);

    if looks_like_file || looks_versioned {
        return ModelNameStyle::Checkpoint;
    }

    ModelNameStyle::Ambiguous
}

fn cache_enabled_from_env(default: bool) -> bool {
    match env::var(ENV_CACHE) {
        Ok(v) if DISABLE_VALUES.contains(&v.trim().to_lowercase().as_str()) => false,
        Ok(_) => true,
        Err(_) => default,
    }
}

/// Construct the embedder named by `EMBEDDER` if set (no fallback on
/// failure — an explicit choice that can't be honored is an error, not a
/// silent downgrade), otherwise construct `settings.preferred_backend`
/// (defaulting to the local runner) and fall back further to
/// [`StaticEmbedder`] only if that backend's health probe fails.
pub async fn build(settings: &FactorySettings) -> Result<Box<dyn Embedder>, EmbedError> {
    let explicit = env::var(ENV_BACKEND).ok();
    let cache_enabled = cache_enabled_from_env(settings.cache_enabled);

    let embedder: Box<dyn Embedder> = match explicit {
        Some(raw) => {
            let backend = Backend::parse(&raw)?;
            construct(backend, settings).await?
        }
        None => match construct(settings.preferred_backend, settings).await {
            Ok(e) => e,
            Err(_) => Box::new(StaticEmbedder::new_256()),
        },
    };

    if cache_enabled {
        Ok(Box::new(CachedEmbedder::with_capacity(
            embedder,
            settings.cache_capacity,
        )))
    } else {
        Ok(embedder)
    }
}

async fn construct(
    backend: Backend,
    settings: &FactorySettings,
) -> Result<Box<dyn Embedder>, EmbedError> {
    match backend {
        Backend::Static => Ok(Box::new(StaticEmbedder::new_256())),
        Backend::Mlx => {
            let mut thermal = ThermalConfig::mlx();
            let inter_batch_delay = apply_shared_env_overrides(
                Duration::from_millis(settings.inter_batch_delay_ms),
                &mut thermal,
            );
            let config = RemoteEmbedderConfig {
                base_url: env_nonempty(ENV_MLX_ENDPOINT).unwrap_or_else(|| settings.mlx_base_url.clone()),
                model: env_nonempty(ENV_MLX_MODEL).unwrap_or_else(|| settings.model.clone()),
                max_retries: settings.max_retries,
                sub_batch_size: settings.sub_batch_size,
                inter_batch_delay,
                thermal,
            };
            let embedder = RemoteEmbedder::connect(MlxWireFormat, config).await?;
            Ok(Box::new(embedder))
        }
        Backend::LocalRunner => {
            let mut thermal = ThermalConfig::ollama();
            let inter_batch_delay = apply_shared_env_overrides(
                Duration::from_millis(settings.inter_batch_delay_ms),
                &mut thermal,
            );
            if let Some(timeout) = env_duration(ENV_OLLAMA_TIMEOUT) {
                thermal.warm_timeout = timeout;
                thermal.cold_timeout = timeout;
            }
            let model = env_nonempty(ENV_OLLAMA_MODEL).unwrap_or_else(|| settings.model.clone());
            // The local runner expects `name:tag`. A name that already
            // carries a tag or reads as a checkpoint file/version is left
            // untouched; an ambiguous bare name gets the runner's default
            // tag appended.
            let model = match classify_model_name(&model) {
                ModelNameStyle::Ambiguous => format!("{model}:latest"),
                ModelNameStyle::RunnerTag | ModelNameStyle::Checkpoint => model,
            };
            let config = RemoteEmbedderConfig {
                base_url: env_nonempty(ENV_OLLAMA_HOST).unwrap_or_else(|| settings.ollama_base_url.clone()),
                model,
                max_retries: settings.max_retries,
                sub_batch_size: settings.sub_batch_size,
                inter_batch_delay,
                thermal,
            };
            let embedder = RemoteEmbedder::connect(OllamaWireFormat, config).await?;
            Ok(Box::new(embedder))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate process environment variables, since
    /// `std::env::set_var`/`remove_var` race across threads otherwise.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn timeout_progression_env_is_clamped_to_spec_bounds() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_TIMEOUT_PROGRESSION, "99");
        let mut thermal = ThermalConfig::mlx();
        apply_shared_env_overrides(Duration::from_millis(0), &mut thermal);
        env::remove_var(ENV_TIMEOUT_PROGRESSION);
        assert_eq!(thermal.progression_cap, MAX_TIMEOUT_PROGRESSION);
    }

    #[test]
    fn retry_timeout_multiplier_env_is_clamped_to_spec_bounds() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_RETRY_TIMEOUT_MULTIPLIER, "0.1");
        let mut thermal = ThermalConfig::ollama();
        apply_shared_env_overrides(Duration::from_millis(0), &mut thermal);
        env::remove_var(ENV_RETRY_TIMEOUT_MULTIPLIER);
        assert_eq!(thermal.retry_multiplier, MIN_RETRY_TIMEOUT_MULTIPLIER);
    }

    #[test]
    fn inter_batch_delay_env_overrides_and_caps_at_five_seconds() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_INTER_BATCH_DELAY, "1h");
        let mut thermal = ThermalConfig::mlx();
        let delay = apply_shared_env_overrides(Duration::from_millis(0), &mut thermal);
        env::remove_var(ENV_INTER_BATCH_DELAY);
        assert_eq!(delay, MAX_INTER_BATCH_DELAY);
    }

    #[test]
    fn inter_batch_delay_env_absent_keeps_configured_value() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var(ENV_INTER_BATCH_DELAY);
        let mut thermal = ThermalConfig::mlx();
        let delay = apply_shared_env_overrides(Duration::from_millis(250), &mut thermal);
        assert_eq!(delay, Duration::from_millis(250));
    }

    #[test]
    fn tagged_model_name_is_runner_tag_style() {
        assert_eq!(classify_model_name("llama3:8b"), ModelNameStyle::RunnerTag);
    }

    #[test]
    fn bare_llama_alias_is_ambiguous() {
        assert_eq!(classify_model_name("llama"), ModelNameStyle::Ambiguous);
    }

    #[test]
    fn file_extension_is_checkpoint_style() {
        assert_eq!(classify_model_name("weights.gguf"), ModelNameStyle::Checkpoint);
    }

    #[test]
    fn version_suffix_is_checkpoint_style() {
        assert_eq!(classify_model_name("codebert-v2"), ModelNameStyle::Checkpoint);
    }

    #[test]
    fn ambiguous_name_is_non_runner() {
        assert_eq!(classify_model_name("embedding-model"), ModelNameStyle::Ambiguous);
    }

    #[test]
    fn default_factory_settings_prefer_local_runner_backend() {
        assert_eq!(FactorySettings::default().preferred_backend, Backend::LocalRunner);
    }

    #[test]
    fn backend_parse_rejects_unknown_value() {
        assert!(Backend::parse("not-a-backend").is_err());
    }

    #[test]
    fn backend_parse_accepts_aliases() {
        assert_eq!(Backend::parse("local").unwrap(), Backend::LocalRunner);
        assert_eq!(Backend::parse("gpu").unwrap(), Backend::Mlx);
        assert_eq!(Backend::parse("hash").unwrap(), Backend::Static);
    }
}
