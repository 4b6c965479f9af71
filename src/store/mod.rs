/// Store abstraction layer
///
/// Two seams: CatalogStore is the read-only view over the host platform's
/// archival catalog (items, authorities, taxonomy terms, events), and
/// TelemetryStore owns the discovery tables (search/click logs, suggestions,
/// learned terms, ranking config). PgDiscoveryStore implements both over one
/// connection pool.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DiscoveryError;
use crate::filters::{DateRange, FilterCondition};
use crate::query::{Entity, Intent};

pub mod postgres;

/// One catalog item as selected by the discovery base query.
///
/// The primary event dates and the level-of-description label are resolved
/// by the store so downstream scoring and presentation stay free of I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub slug: String,
    pub identifier: Option<String>,
    pub title: Option<String>,
    pub scope_and_content: Option<String>,
    pub extent_and_medium: Option<String>,
    pub level_of_description: Option<String>,
    pub repository_id: Option<i64>,
    pub repository_name: Option<String>,
    pub thumbnail_path: Option<String>,
    pub thumbnail_name: Option<String>,
    pub mime_type: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub has_subjects: bool,
    pub view_count: i64,
    pub download_count: i64,
    pub is_featured: bool,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A matched authority or taxonomy record used to resolve entity ids.
#[derive(Debug, Clone)]
pub struct AuthorityRef {
    pub id: i64,
    pub name: String,
}

/// Read-only retrieval interface over the archival catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Keyword/phrase match across title, content, identifier, and alternate
    /// fields — OR'd across fields, AND'd across keywords.
    async fn keyword_search(
        &self,
        keywords: &[String],
        phrases: &[String],
        conditions: &[FilterCondition],
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError>;

    /// Browse mode: recency-ordered listing under the given predicates.
    async fn browse_recent(
        &self,
        conditions: &[FilterCondition],
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError>;

    /// Items related to a person/organization entity via creator relations.
    async fn search_by_creator(
        &self,
        entity: &Entity,
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError>;

    /// Items tagged with a place access point matching the entity.
    async fn search_by_place(
        &self,
        entity: &Entity,
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError>;

    /// Items tagged with a subject access point matching the entity.
    async fn search_by_subject(
        &self,
        entity: &Entity,
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError>;

    /// Items whose media-type term matches the entity value.
    async fn search_by_format(
        &self,
        entity: &Entity,
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError>;

    /// Items with an event start date inside any of the given ranges.
    async fn search_by_date_ranges(
        &self,
        ranges: &[DateRange],
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError>;

    /// Items matching any expanded synonym term in title or content.
    async fn search_by_expanded_terms(
        &self,
        terms: &[String],
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError>;

    /// Authority records whose name contains any of the candidate words.
    async fn match_actors(
        &self,
        candidates: &[String],
        culture: &str,
        limit: i64,
    ) -> Result<Vec<AuthorityRef>, DiscoveryError>;

    /// Place access-point terms containing the query text.
    async fn match_place_terms(
        &self,
        text: &str,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<AuthorityRef>, DiscoveryError>;

    /// Subject access-point terms containing any of the keywords.
    async fn match_subject_terms(
        &self,
        keywords: &[String],
        culture: &str,
        limit: i64,
    ) -> Result<Vec<AuthorityRef>, DiscoveryError>;

    /// Distinct item titles sharing a prefix, for autocomplete padding.
    async fn titles_with_prefix(
        &self,
        prefix: &str,
        culture: &str,
        exclude: &[String],
        limit: i64,
    ) -> Result<Vec<String>, DiscoveryError>;
}

/// Ranking weights, boosts, and penalties used by result fusion.
///
/// Persisted per institution (or globally) in discovery_ranking_config;
/// a missing row falls back to these built-in defaults. The orchestrator
/// snapshots this at construction — build a new orchestrator to pick up
/// config changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub weight_title_match: f64,
    pub weight_content_match: f64,
    pub weight_identifier_match: f64,
    pub weight_subject_match: f64,
    pub weight_creator_match: f64,
    pub weight_has_digital_object: f64,
    pub weight_description_length: f64,
    pub weight_has_dates: f64,
    pub weight_has_subjects: f64,
    pub weight_view_count: f64,
    pub weight_download_count: f64,
    pub weight_citation_count: f64,
    pub boost_featured: f64,
    pub boost_recent: f64,
    pub penalty_incomplete: f64,
    pub freshness_decay_days: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        RankingConfig {
            weight_title_match: 1.0,
            weight_content_match: 0.7,
            weight_identifier_match: 0.9,
            weight_subject_match: 0.8,
            weight_creator_match: 0.8,
            weight_has_digital_object: 0.3,
            weight_description_length: 0.2,
            weight_has_dates: 0.15,
            weight_has_subjects: 0.15,
            weight_view_count: 0.1,
            weight_download_count: 0.15,
            weight_citation_count: 0.2,
            boost_featured: 1.5,
            boost_recent: 1.1,
            penalty_incomplete: 0.8,
            freshness_decay_days: 365.0,
        }
    }
}

/// Input for creating a search log row. Created exactly once per search call.
#[derive(Debug, Clone)]
pub struct NewSearchLog {
    pub institution_id: Option<i64>,
    /// None for pure browse requests (empty query text)
    pub query_text: Option<String>,
    pub detected_language: String,
    pub intent: Intent,
    pub entities: Option<serde_json::Value>,
    pub expanded_terms: Option<serde_json::Value>,
    pub filters: Option<serde_json::Value>,
    pub result_count: i64,
    pub duration_ms: i64,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
}

/// A persisted search log row, as read back for click accounting.
#[derive(Debug, Clone)]
pub struct SearchLogRow {
    pub id: i64,
    pub institution_id: Option<i64>,
    pub query_text: Option<String>,
    pub click_count: i64,
    pub first_click_position: Option<i32>,
}

/// Input for creating a click log row (append-only).
#[derive(Debug, Clone)]
pub struct NewClickLog {
    pub search_log_id: i64,
    pub item_id: i64,
    /// 1-indexed result position
    pub position: i32,
    pub time_to_click_ms: Option<i64>,
    pub session_id: Option<String>,
}

/// Aggregated stats for one query text over the suggestion window.
#[derive(Debug, Clone)]
pub struct QueryStats {
    pub query_text: String,
    pub search_count: i64,
    pub avg_results: f64,
    pub total_clicks: i64,
}

/// Upsert payload for the suggestion table.
#[derive(Debug, Clone)]
pub struct SuggestionUpsert {
    pub institution_id: Option<i64>,
    pub suggestion_text: String,
    pub suggestion_type: String,
    pub search_count: i64,
    pub click_count: i64,
    pub success_rate: f64,
    pub avg_results: i64,
}

/// A pair of distinct query texts whose clicks landed on the same item.
#[derive(Debug, Clone)]
pub struct CoClickPair {
    pub term: String,
    pub related_term: String,
    pub co_occurrence: i64,
}

/// A behaviorally mined term relationship used for query expansion.
#[derive(Debug, Clone)]
pub struct LearnedTerm {
    pub term: String,
    pub related_term: String,
    pub relationship_type: String,
    pub confidence: f64,
}

/// Overall analytics aggregates for a trailing window.
#[derive(Debug, Clone, Default)]
pub struct OverallStats {
    pub total_searches: i64,
    pub unique_sessions: i64,
    pub avg_results: f64,
    pub avg_duration_ms: f64,
    pub zero_result_searches: i64,
    pub total_clicks: i64,
}

/// Per-query frequency row for analytics breakdowns.
#[derive(Debug, Clone, Serialize)]
pub struct QueryCount {
    pub query_text: String,
    pub count: i64,
    pub avg_results: f64,
}

/// Counts of deleted rows from a retention cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupCounts {
    pub clicks_deleted: u64,
    pub logs_deleted: u64,
}

/// Write/read interface over the discovery telemetry tables.
///
/// Callers treat every method as best-effort: failures are logged and
/// swallowed so that telemetry can never fail a search.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Ranking config for the institution scope, None when unconfigured.
    async fn ranking_config(
        &self,
        institution_id: Option<i64>,
    ) -> Result<Option<RankingConfig>, DiscoveryError>;

    async fn insert_search_log(&self, log: NewSearchLog) -> Result<i64, DiscoveryError>;

    async fn get_search_log(&self, id: i64) -> Result<Option<SearchLogRow>, DiscoveryError>;

    async fn insert_click_log(&self, click: NewClickLog) -> Result<i64, DiscoveryError>;

    /// Apply click accounting to a search log: the new click_count, and the
    /// first_click_position only when this is the first click.
    async fn update_search_log_clicks(
        &self,
        log_id: i64,
        click_count: i64,
        first_click_position: Option<i32>,
    ) -> Result<(), DiscoveryError>;

    async fn set_dwell_time(
        &self,
        click_id: i64,
        dwell_seconds: i64,
    ) -> Result<(), DiscoveryError>;

    /// Increment a suggestion's click_count and recompute its success_rate
    /// as min(1, (click_count+1)/max(1, search_count)).
    async fn bump_suggestion_click(
        &self,
        query_text: &str,
        institution_id: Option<i64>,
    ) -> Result<(), DiscoveryError>;

    /// Enabled suggestion texts sharing a prefix, ordered curated-first,
    /// then success_rate, then search volume.
    async fn suggestions_with_prefix(
        &self,
        prefix: &str,
        institution_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<String>, DiscoveryError>;

    /// Aggregate query stats over a trailing window, keeping queries with
    /// search_count >= min_searches and avg_results >= min_avg_results,
    /// top `cap` by frequency.
    async fn aggregate_query_stats(
        &self,
        institution_id: Option<i64>,
        window_days: i64,
        min_searches: i64,
        min_avg_results: f64,
        cap: i64,
    ) -> Result<Vec<QueryStats>, DiscoveryError>;

    async fn upsert_suggestion(&self, s: SuggestionUpsert) -> Result<(), DiscoveryError>;

    /// Pairs of distinct query texts whose clicks landed on the same item
    /// at least min_co_occurrence times.
    async fn co_clicked_query_pairs(
        &self,
        institution_id: Option<i64>,
        min_co_occurrence: i64,
        cap: i64,
    ) -> Result<Vec<CoClickPair>, DiscoveryError>;

    /// Insert or reinforce a learned term relationship: existing rows take
    /// max(confidence) and an incremented usage_count.
    async fn upsert_learned_term(
        &self,
        term: &str,
        related_term: &str,
        relationship_type: &str,
        confidence: f64,
        institution_id: Option<i64>,
    ) -> Result<(), DiscoveryError>;

    /// Enabled learned terms for a source term, ordered by confidence.
    async fn related_terms(
        &self,
        term: &str,
        limit: i64,
    ) -> Result<Vec<LearnedTerm>, DiscoveryError>;

    async fn overall_stats(
        &self,
        institution_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<OverallStats, DiscoveryError>;

    async fn top_queries(
        &self,
        institution_id: Option<i64>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueryCount>, DiscoveryError>;

    async fn zero_result_queries(
        &self,
        institution_id: Option<i64>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueryCount>, DiscoveryError>;

    async fn searches_by_intent(
        &self,
        institution_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, i64)>, DiscoveryError>;

    async fn searches_by_day(
        &self,
        institution_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<Vec<(NaiveDate, i64)>, DiscoveryError>;

    /// Delete clicks and logs older than the cutoff.
    async fn delete_logs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<CleanupCounts, DiscoveryError>;
}
