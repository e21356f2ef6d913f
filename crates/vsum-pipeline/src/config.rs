//! Pipeline configuration.
//!
//! Built once at startup from the environment (after `.env` is loaded) and
//! passed into every component. Nothing below this module reads the
//! environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use vsum_models::{Language, ModelName, Provider};

use crate::optimizer::ProviderLimits;

/// Per-provider or per-model frame budgets.
///
/// Keys are lowercase provider names (`gemini`) or exact model names
/// (`gemini-2.5-pro`); a model entry wins over its provider entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameBudgets {
    budgets: HashMap<String, u32>,
}

impl FrameBudgets {
    /// Parse `gemini=200,claude=80`. Malformed pairs are skipped.
    pub fn parse(spec: &str) -> Self {
        let mut budgets = HashMap::new();
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) => match value.trim().parse::<u32>() {
                    Ok(budget) if budget > 0 => {
                        budgets.insert(key.trim().to_ascii_lowercase(), budget);
                    }
                    _ => warn!(entry = %pair, "Ignoring invalid frame budget"),
                },
                None => warn!(entry = %pair, "Ignoring invalid frame budget"),
            }
        }
        Self { budgets }
    }

    pub fn with(mut self, key: impl Into<String>, budget: u32) -> Self {
        self.budgets.insert(key.into().to_ascii_lowercase(), budget);
        self
    }

    /// Budget for a provider/model pair, falling back to the provider's recommended count.
    pub fn budget_for(&self, provider: Provider, model: &ModelName) -> u32 {
        if let Some(name) = model.explicit() {
            if let Some(budget) = self.budgets.get(&name.to_ascii_lowercase()) {
                return *budget;
            }
        }
        self.budgets
            .get(provider.as_str())
            .copied()
            .unwrap_or_else(|| ProviderLimits::for_provider(provider).recommended_images)
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root for history, cache and downloads
    pub data_dir: PathBuf,
    pub default_provider: Provider,
    pub default_model: ModelName,
    pub default_language: Language,
    /// Fixed sampling interval in seconds, `None` for automatic planning
    pub default_interval: Option<u32>,
    /// Providers tried in order after the primary exhausts its retries
    pub fallback_providers: Vec<Provider>,
    /// Evict a run's frames after a successful analysis
    pub auto_cleanup: bool,
    /// Ceiling for extracted-frame storage
    pub max_cache_bytes: u64,
    /// Retention used by `cache clean-old`
    pub cache_max_age: Duration,
    pub ai_timeout: Duration,
    pub ai_max_retries: u32,
    pub ai_retry_base_delay: Duration,
    pub ai_retry_max_delay: Duration,
    /// Provider exit codes treated as transient
    pub ai_transient_exit_codes: Vec<i32>,
    pub extract_timeout: Duration,
    pub download_timeout: Duration,
    pub probe_timeout: Duration,
    pub frame_budgets: FrameBudgets,
    /// Expected seconds between keyframes, used to estimate keyframe counts
    pub average_keyframe_period: f64,
    /// Extracted frames are scaled down to at most this width
    pub max_frame_width: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_provider: Provider::Gemini,
            default_model: ModelName::auto(),
            default_language: Language::English,
            default_interval: None,
            fallback_providers: Vec::new(),
            auto_cleanup: true,
            max_cache_bytes: 1024 * 1024 * 1024,
            cache_max_age: Duration::from_secs(7 * 24 * 3600),
            ai_timeout: Duration::from_secs(600),
            ai_max_retries: 3,
            ai_retry_base_delay: Duration::from_millis(1000),
            ai_retry_max_delay: Duration::from_secs(30),
            ai_transient_exit_codes: Vec::new(),
            extract_timeout: Duration::from_secs(1800),
            download_timeout: Duration::from_secs(1800),
            probe_timeout: Duration::from_secs(60),
            frame_budgets: FrameBudgets::parse("gemini=200,claude=80"),
            average_keyframe_period: 1.5,
            max_frame_width: 1280,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let default_interval = match get("DEFAULT_INTERVAL") {
            None => defaults.default_interval,
            Some(v) if v.eq_ignore_ascii_case("auto") => None,
            Some(v) => match v.parse::<u32>() {
                Ok(secs) if secs > 0 => Some(secs),
                _ => {
                    warn!(key = "DEFAULT_INTERVAL", value = %v, "Ignoring invalid configuration value");
                    None
                }
            },
        };

        let fallback_providers = get("FALLBACK_PROVIDERS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .filter_map(|p| match p.parse::<Provider>() {
                        Ok(provider) => Some(provider),
                        Err(_) => {
                            warn!(key = "FALLBACK_PROVIDERS", value = %p, "Ignoring unknown provider");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let ai_transient_exit_codes = get("AI_TRANSIENT_EXIT_CODES")
            .map(|list| {
                list.split(',')
                    .filter_map(|c| c.trim().parse::<i32>().ok())
                    .collect()
            })
            .unwrap_or(defaults.ai_transient_exit_codes);

        Self {
            data_dir: get("VSUM_DATA_DIR")
                .map(|d| expand_home(&d))
                .unwrap_or(defaults.data_dir),
            default_provider: parse_or(&get, "DEFAULT_PROVIDER", defaults.default_provider),
            default_model: get("DEFAULT_MODEL")
                .map(ModelName::new)
                .unwrap_or(defaults.default_model),
            default_language: parse_or(&get, "DEFAULT_LANGUAGE", defaults.default_language),
            default_interval,
            fallback_providers,
            auto_cleanup: get("AUTO_CLEANUP")
                .map(|v| parse_bool(&v, defaults.auto_cleanup))
                .unwrap_or(defaults.auto_cleanup),
            max_cache_bytes: parse_or(&get, "MAX_CACHE_MB", defaults.max_cache_bytes / (1024 * 1024))
                .saturating_mul(1024 * 1024),
            cache_max_age: Duration::from_secs(
                parse_or(&get, "CACHE_MAX_AGE_DAYS", 7u64).saturating_mul(24 * 3600),
            ),
            ai_timeout: Duration::from_secs(parse_or(&get, "AI_TIMEOUT_SECS", 600)),
            ai_max_retries: parse_or(&get, "AI_MAX_RETRIES", defaults.ai_max_retries),
            ai_retry_base_delay: Duration::from_millis(parse_or(&get, "AI_RETRY_BASE_MS", 1000)),
            ai_retry_max_delay: defaults.ai_retry_max_delay,
            ai_transient_exit_codes,
            extract_timeout: Duration::from_secs(parse_or(&get, "EXTRACT_TIMEOUT_SECS", 1800)),
            download_timeout: Duration::from_secs(parse_or(&get, "DOWNLOAD_TIMEOUT_SECS", 1800)),
            probe_timeout: defaults.probe_timeout,
            frame_budgets: get("FRAME_BUDGETS")
                .map(|v| FrameBudgets::parse(&v))
                .unwrap_or(defaults.frame_budgets),
            average_keyframe_period: defaults.average_keyframe_period,
            max_frame_width: defaults.max_frame_width,
        }
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_max_cache_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_bytes = bytes;
        self
    }

    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = enabled;
        self
    }

    pub fn with_retry(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.ai_max_retries = max_retries;
        self.ai_retry_base_delay = base_delay;
        self
    }

    pub fn with_fallback_providers(mut self, providers: Vec<Provider>) -> Self {
        self.fallback_providers = providers;
        self
    }

    pub fn with_frame_budgets(mut self, budgets: FrameBudgets) -> Self {
        self.frame_budgets = budgets;
        self
    }

    pub fn with_default_provider(mut self, provider: Provider) -> Self {
        self.default_provider = provider;
        self
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("analysis_history.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    /// Longest a run can keep a cache reservation, pin or extraction lock.
    ///
    /// Claims older than this are treated as left behind by a dead process.
    pub fn cache_stale_after(&self) -> Duration {
        let providers = 1 + self.fallback_providers.len() as u32;
        let ai = self
            .ai_timeout
            .saturating_mul(self.ai_max_retries.saturating_add(1))
            .saturating_mul(providers);
        self.download_timeout
            .saturating_add(self.extract_timeout)
            .saturating_add(ai)
            .saturating_add(STALE_MARGIN)
    }
}

const STALE_MARGIN: Duration = Duration::from_secs(600);

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => match value.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(key = %key, value = %value, "Ignoring invalid configuration value");
                default
            }
        },
        None => default,
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(value = %value, "Ignoring invalid boolean configuration value");
            default
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

fn default_data_dir() -> PathBuf {
    home_dir()
        .map(|home| home.join(".vsum"))
        .unwrap_or_else(|| PathBuf::from(".vsum"))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
