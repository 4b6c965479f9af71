/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: trove.toml (in working directory)
/// 3. Environment variables: prefixed TROVE_ (e.g., TROVE_LOG_LEVEL=debug)

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};
use crate::errors::DiscoveryError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    /// PostgreSQL connection URL for the catalog and discovery tables.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Base culture for i18n lookups and language-detection fallback.
    #[serde(default = "default_culture")]
    pub culture: String,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub learning: LearningConfig,
}

/// Candidate caps and dedup tuning for the retrieval strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Max candidates from the keyword/browse strategy
    #[serde(default = "default_keyword_limit")]
    pub keyword_limit: i64,
    /// Max candidates per detected entity
    #[serde(default = "default_entity_limit")]
    pub entity_limit: i64,
    /// Max candidates from the date-range strategy
    #[serde(default = "default_date_limit")]
    pub date_limit: i64,
    /// Max candidates from the expanded-term strategy
    #[serde(default = "default_expanded_limit")]
    pub expanded_limit: i64,
    /// Title similarity above which two results collapse into one
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,
}

/// Windows and minimums for the behavioral-learning batch jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Trailing window for suggestion aggregation, in days
    #[serde(default = "default_suggestion_window_days")]
    pub suggestion_window_days: i64,
    /// Minimum search_count for a query to become a suggestion
    #[serde(default = "default_suggestion_min_searches")]
    pub suggestion_min_searches: i64,
    /// Minimum avg_results for a query to become a suggestion
    #[serde(default = "default_suggestion_min_results")]
    pub suggestion_min_results: f64,
    /// Minimum co-occurring clicks for a synonym pair
    #[serde(default = "default_synonym_min_co_occurrence")]
    pub synonym_min_co_occurrence: i64,
    /// Minimum confidence below which a mined synonym is discarded
    #[serde(default = "default_synonym_min_confidence")]
    pub synonym_min_confidence: f64,
    /// Retention for search/click logs, in days
    #[serde(default = "default_cleanup_keep_days")]
    pub cleanup_keep_days: i64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost/trove".to_string()
}

fn default_culture() -> String {
    "en".to_string()
}

fn default_keyword_limit() -> i64 {
    500
}

fn default_entity_limit() -> i64 {
    200
}

fn default_date_limit() -> i64 {
    200
}

fn default_expanded_limit() -> i64 {
    100
}

fn default_dedup_threshold() -> f64 {
    0.9
}

fn default_suggestion_window_days() -> i64 {
    90
}

fn default_suggestion_min_searches() -> i64 {
    3
}

fn default_suggestion_min_results() -> f64 {
    1.0
}

fn default_synonym_min_co_occurrence() -> i64 {
    3
}

fn default_synonym_min_confidence() -> f64 {
    0.6
}

fn default_cleanup_keep_days() -> i64 {
    90
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            keyword_limit: default_keyword_limit(),
            entity_limit: default_entity_limit(),
            date_limit: default_date_limit(),
            expanded_limit: default_expanded_limit(),
            dedup_threshold: default_dedup_threshold(),
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        LearningConfig {
            suggestion_window_days: default_suggestion_window_days(),
            suggestion_min_searches: default_suggestion_min_searches(),
            suggestion_min_results: default_suggestion_min_results(),
            synonym_min_co_occurrence: default_synonym_min_co_occurrence(),
            synonym_min_confidence: default_synonym_min_confidence(),
            cleanup_keep_days: default_cleanup_keep_days(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            database_url: default_database_url(),
            culture: default_culture(),
            search: SearchConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: TROVE_LOG_LEVEL=debug overrides log_level in trove.toml
    pub fn load() -> Result<Config, DiscoveryError> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("trove.toml"))
            .merge(Env::prefixed("TROVE_").split("__"))
            .extract()
            .map_err(|e| DiscoveryError::Config(format!("Failed to load config: {}", e)))
    }
}
