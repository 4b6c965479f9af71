/// Behavioral learning loop
///
/// Records search and click telemetry, serves learned autocomplete
/// suggestions, and runs the batch jobs that mine them: suggestion
/// aggregation from successful searches, synonym mining from co-clicked
/// queries, analytics summaries, and retention cleanup.
///
/// Telemetry writes on the search path are best-effort. The batch jobs
/// return errors to their CLI callers.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::LearningConfig;
use crate::errors::DiscoveryError;
use crate::query::ParsedQuery;
use crate::store::{
    CatalogStore, CleanupCounts, NewClickLog, NewSearchLog, QueryCount, SuggestionUpsert,
    TelemetryStore,
};

/// Analytics summary for a trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub period_days: i64,
    pub total_searches: i64,
    pub unique_sessions: i64,
    pub avg_results: f64,
    pub avg_duration_ms: f64,
    /// Percentage of searches returning nothing, one decimal
    pub zero_result_rate: f64,
    /// Clicks per hundred searches, one decimal
    pub click_through_rate: f64,
    pub top_queries: Vec<QueryCount>,
    pub zero_result_queries: Vec<QueryCount>,
    pub by_intent: Vec<(String, i64)>,
    pub by_day: Vec<(chrono::NaiveDate, i64)>,
}

pub struct LearningService {
    catalog: Arc<dyn CatalogStore>,
    telemetry: Arc<dyn TelemetryStore>,
    config: LearningConfig,
    culture: String,
}

impl LearningService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        telemetry: Arc<dyn TelemetryStore>,
        config: LearningConfig,
        culture: String,
    ) -> Self {
        LearningService {
            catalog,
            telemetry,
            config,
            culture,
        }
    }

    /// Record one search. Best-effort: a failed write returns None and the
    /// search proceeds without an id.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_search(
        &self,
        query: &str,
        parsed: &ParsedQuery,
        result_count: i64,
        duration_ms: i64,
        institution_id: Option<i64>,
        session_id: Option<String>,
        user_agent: Option<String>,
    ) -> Option<i64> {
        let log = NewSearchLog {
            institution_id,
            query_text: if query.trim().is_empty() {
                None
            } else {
                Some(query.to_string())
            },
            detected_language: parsed.language.clone(),
            intent: parsed.intent,
            entities: if parsed.entities.is_empty() {
                None
            } else {
                serde_json::to_value(&parsed.entities).ok()
            },
            expanded_terms: if parsed.expanded_terms.is_empty() {
                None
            } else {
                serde_json::to_value(&parsed.expanded_terms).ok()
            },
            filters: if parsed.filters.is_empty() {
                None
            } else {
                serde_json::to_value(&parsed.filters).ok()
            },
            result_count,
            duration_ms,
            session_id,
            // Truncated defensively; the column is varchar(500)
            user_agent: user_agent.map(|ua| ua.chars().take(500).collect()),
        };

        match self.telemetry.insert_search_log(log).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Search logging failed, continuing without search_id");
                None
            }
        }
    }

    /// Record a click. The click row insert is the operation proper; the
    /// search-log accounting and suggestion bump are best-effort follow-ups.
    pub async fn log_click(
        &self,
        search_log_id: i64,
        item_id: i64,
        position: i32,
        time_to_click_ms: Option<i64>,
        session_id: Option<String>,
    ) -> Result<i64, DiscoveryError> {
        let click_id = self
            .telemetry
            .insert_click_log(NewClickLog {
                search_log_id,
                item_id,
                position,
                time_to_click_ms,
                session_id,
            })
            .await?;

        match self.telemetry.get_search_log(search_log_id).await {
            Ok(Some(log)) => {
                // first_click_position is written once and never overwritten
                let first_click = if log.first_click_position.is_none() {
                    Some(position)
                } else {
                    None
                };
                if let Err(e) = self
                    .telemetry
                    .update_search_log_clicks(log.id, log.click_count + 1, first_click)
                    .await
                {
                    warn!(error = %e, "Click accounting update failed, continuing");
                }

                if let Some(query_text) = log.query_text.filter(|q| !q.is_empty()) {
                    if let Err(e) = self
                        .telemetry
                        .bump_suggestion_click(&query_text.to_lowercase(), log.institution_id)
                        .await
                    {
                        warn!(error = %e, "Suggestion click bump failed, continuing");
                    }
                }
            }
            Ok(None) => {
                warn!(search_log_id, "Click references an unknown search log");
            }
            Err(e) => {
                warn!(error = %e, "Search log lookup failed, click accounting skipped");
            }
        }

        Ok(click_id)
    }

    /// Record how long a clicked item was viewed.
    pub async fn update_dwell_time(
        &self,
        click_id: i64,
        dwell_seconds: i64,
    ) -> Result<(), DiscoveryError> {
        if dwell_seconds < 0 {
            return Err(DiscoveryError::validation(
                "dwell_seconds",
                "must be non-negative",
            ));
        }
        self.telemetry.set_dwell_time(click_id, dwell_seconds).await
    }

    /// Autocomplete suggestions for a prefix: learned suggestions first,
    /// padded with distinct catalog titles when there are too few. Prefixes
    /// under 2 characters return nothing.
    pub async fn get_query_suggestions(
        &self,
        prefix: &str,
        institution_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<String>, DiscoveryError> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.chars().count() < 2 {
            return Ok(Vec::new());
        }

        let mut suggestions = self
            .telemetry
            .suggestions_with_prefix(&prefix, institution_id, limit)
            .await?;

        if (suggestions.len() as i64) < limit {
            let needed = limit - suggestions.len() as i64;
            match self
                .catalog
                .titles_with_prefix(&prefix, &self.culture, &suggestions, needed)
                .await
            {
                Ok(titles) => suggestions.extend(titles),
                Err(e) => warn!(error = %e, "Title padding failed, returning learned only"),
            }
        }

        suggestions.truncate(limit as usize);
        Ok(suggestions)
    }

    /// Rebuild the suggestion index from recent successful searches.
    /// Returns the number of suggestions upserted.
    pub async fn update_suggestions(
        &self,
        institution_id: Option<i64>,
    ) -> Result<usize, DiscoveryError> {
        let stats = self
            .telemetry
            .aggregate_query_stats(
                institution_id,
                self.config.suggestion_window_days,
                self.config.suggestion_min_searches,
                self.config.suggestion_min_results,
                1000,
            )
            .await?;

        let mut upserted = 0;
        for row in stats {
            let success_rate = suggestion_success_rate(row.total_clicks, row.search_count);
            self.telemetry
                .upsert_suggestion(SuggestionUpsert {
                    institution_id,
                    suggestion_text: row.query_text.to_lowercase(),
                    suggestion_type: "query".to_string(),
                    search_count: row.search_count,
                    click_count: row.total_clicks,
                    success_rate,
                    avg_results: row.avg_results as i64,
                })
                .await?;
            upserted += 1;
        }

        info!(upserted, "Suggestion index updated");
        Ok(upserted)
    }

    /// Mine synonym relationships from queries whose clicks landed on the
    /// same items. Stores both directions of each accepted pair. Returns
    /// the number of pairs stored.
    pub async fn learn_synonyms(
        &self,
        institution_id: Option<i64>,
    ) -> Result<usize, DiscoveryError> {
        let pairs = self
            .telemetry
            .co_clicked_query_pairs(institution_id, self.config.synonym_min_co_occurrence, 500)
            .await?;

        let mut stored = 0;
        for pair in pairs {
            let confidence = synonym_confidence(pair.co_occurrence);
            if confidence < self.config.synonym_min_confidence {
                continue;
            }

            let term = pair.term.to_lowercase();
            let related = pair.related_term.to_lowercase();

            self.telemetry
                .upsert_learned_term(&term, &related, "related", confidence, institution_id)
                .await?;
            self.telemetry
                .upsert_learned_term(&related, &term, "related", confidence, institution_id)
                .await?;
            stored += 1;
        }

        info!(stored, "Synonym mining complete");
        Ok(stored)
    }

    /// Analytics summary over the trailing `days`.
    pub async fn analytics(
        &self,
        institution_id: Option<i64>,
        days: i64,
    ) -> Result<AnalyticsSummary, DiscoveryError> {
        let since = Utc::now() - Duration::days(days);

        let stats = self.telemetry.overall_stats(institution_id, since).await?;
        let top_queries = self.telemetry.top_queries(institution_id, since, 20).await?;
        let zero_result_queries = self
            .telemetry
            .zero_result_queries(institution_id, since, 20)
            .await?;
        let by_intent = self.telemetry.searches_by_intent(institution_id, since).await?;
        let by_day = self.telemetry.searches_by_day(institution_id, since).await?;

        let zero_result_rate = if stats.total_searches > 0 {
            round1(stats.zero_result_searches as f64 / stats.total_searches as f64 * 100.0)
        } else {
            0.0
        };
        let click_through_rate = if stats.total_searches > 0 {
            round1(stats.total_clicks as f64 / stats.total_searches as f64 * 100.0)
        } else {
            0.0
        };

        Ok(AnalyticsSummary {
            period_days: days,
            total_searches: stats.total_searches,
            unique_sessions: stats.unique_sessions,
            avg_results: round1(stats.avg_results),
            avg_duration_ms: stats.avg_duration_ms.round(),
            zero_result_rate,
            click_through_rate,
            top_queries,
            zero_result_queries,
            by_intent,
            by_day,
        })
    }

    /// Delete telemetry older than the retention window. `keep_days`
    /// overrides the configured retention when given.
    pub async fn cleanup(
        &self,
        keep_days: Option<i64>,
    ) -> Result<CleanupCounts, DiscoveryError> {
        let keep_days = keep_days.unwrap_or(self.config.cleanup_keep_days);
        let cutoff = Utc::now() - Duration::days(keep_days);

        let counts = self.telemetry.delete_logs_older_than(cutoff).await?;
        info!(
            clicks_deleted = counts.clicks_deleted,
            logs_deleted = counts.logs_deleted,
            keep_days,
            "Telemetry cleanup complete"
        );
        Ok(counts)
    }
}

/// Confidence for a mined synonym pair: 0.5 base plus 0.05 per co-occurring
/// click, capped at 0.95.
pub(crate) fn synonym_confidence(co_occurrence: i64) -> f64 {
    (0.5 + co_occurrence as f64 * 0.05).min(0.95)
}

/// Fraction of searches for a query that led to at least one click.
pub(crate) fn suggestion_success_rate(total_clicks: i64, search_count: i64) -> f64 {
    if total_clicks > 0 {
        (total_clicks as f64 / search_count.max(1) as f64).min(1.0)
    } else {
        0.0
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synonym_confidence_formula() {
        assert!((synonym_confidence(3) - 0.65).abs() < 1e-9);
        assert!((synonym_confidence(5) - 0.75).abs() < 1e-9);
        // Caps at 0.95 regardless of volume
        assert_eq!(synonym_confidence(100), 0.95);
    }

    #[test]
    fn test_synonym_confidence_below_threshold() {
        // Two co-occurrences give 0.6, the default acceptance minimum;
        // one gives 0.55 and would be discarded
        assert!((synonym_confidence(2) - 0.6).abs() < 1e-9);
        assert!((synonym_confidence(1) - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_suggestion_success_rate() {
        assert_eq!(suggestion_success_rate(0, 10), 0.0);
        assert!((suggestion_success_rate(5, 10) - 0.5).abs() < 1e-9);
        // Clamped: more clicks than searches still reads 1.0
        assert_eq!(suggestion_success_rate(20, 10), 1.0);
        // Zero searches guarded
        assert_eq!(suggestion_success_rate(2, 0), 1.0);
    }

    #[test]
    fn test_round1() {
        assert_eq!(round1(33.333), 33.3);
        assert_eq!(round1(66.666), 66.7);
    }
}
