/// Discovery search orchestration
///
/// One search call runs the full pipeline: parse the query, translate user
/// facet selections, fan the retrieval strategies out concurrently, merge and
/// rank the candidates, collapse near-duplicates, paginate, and present.
/// The keyword strategy is the primary path and its failure fails the search;
/// every other strategy and all telemetry degrade to warnings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::DiscoveryError;
use crate::filters::{FilterCondition, FilterService};
use crate::learning::LearningService;
use crate::query::{Entity, EntityType, Intent, ParsedQuery, QueryUnderstanding, TimeReference};
use crate::search::fusion::{ResultFusion, ScoredResult, Viewer};
use crate::search::presenter::ResultCard;
use crate::store::{CatalogItem, CatalogStore, RankingConfig, TelemetryStore};

pub mod fusion;
pub mod presenter;

/// One discovery search call.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Facet code -> selected values, as sent by the facet UI
    pub filters: HashMap<String, Vec<String>>,
    pub page: i64,
    pub limit: i64,
    pub institution_id: Option<i64>,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub viewer: Viewer,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            query: String::new(),
            filters: HashMap::new(),
            page: 1,
            limit: 20,
            institution_id: None,
            session_id: None,
            user_agent: None,
            viewer: Viewer::Anonymous,
        }
    }
}

/// The slice of the parse surfaced to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedQuerySummary {
    pub intent: Intent,
    pub entities: Vec<Entity>,
    pub time_references: Vec<TimeReference>,
}

/// One facet group offered for refinement. Values are computed separately
/// for performance; `selected` echoes the caller's current selection.
#[derive(Debug, Clone, Serialize)]
pub struct FacetView {
    pub code: String,
    pub label: String,
    pub icon: Option<String>,
    pub values: Vec<serde_json::Value>,
    pub selected: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub pages: i64,
    pub results: Vec<ResultCard>,
    pub facets: Vec<FacetView>,
    pub suggestions: Vec<String>,
    pub query: String,
    pub parsed_query: ParsedQuerySummary,
    pub filters_applied: HashMap<String, Vec<String>>,
    pub duration_ms: i64,
    /// None when best-effort search logging failed
    pub search_id: Option<i64>,
}

pub struct SearchOrchestrator {
    catalog: Arc<dyn CatalogStore>,
    filter_service: Arc<dyn FilterService>,
    understanding: QueryUnderstanding,
    fusion: ResultFusion,
    learning: LearningService,
    config: Config,
}

impl SearchOrchestrator {
    /// Build an orchestrator with a snapshot of the ranking config. Config
    /// changes require a new orchestrator.
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        telemetry: Arc<dyn TelemetryStore>,
        filter_service: Arc<dyn FilterService>,
        ranking: RankingConfig,
        config: Config,
    ) -> Self {
        let understanding = QueryUnderstanding::new(
            Arc::clone(&catalog),
            Arc::clone(&telemetry),
            config.culture.clone(),
        );
        let learning = LearningService::new(
            Arc::clone(&catalog),
            telemetry,
            config.learning.clone(),
            config.culture.clone(),
        );

        SearchOrchestrator {
            catalog,
            filter_service,
            understanding,
            fusion: ResultFusion::new(ranking),
            learning,
            config,
        }
    }

    /// Execute a discovery search end to end.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, DiscoveryError> {
        let start = Instant::now();

        let page = clamp_page(request.page);
        let limit = clamp_limit(request.limit);
        let culture = &self.config.culture;

        let parsed = self.understanding.parse(&request.query).await;

        // Auto-detected entity filters boost via the entity strategy; only
        // the user's explicit facet selections restrict the result set
        let conditions = self
            .filter_service
            .build_conditions(&request.filters, request.institution_id)
            .await?;

        let (keyword, entity, date, expanded) = tokio::join!(
            self.keyword_strategy(&parsed, &conditions, request.institution_id, culture),
            self.entity_strategy(&parsed, request.institution_id, culture),
            self.date_strategy(&parsed, request.institution_id, culture),
            self.expanded_strategy(&parsed, request.institution_id, culture),
        );

        // Keyword is the primary strategy; its failure is the search's
        let keyword = keyword?;
        let merged = merge_by_id(vec![keyword, entity, date, expanded]);

        let ranked = self.fusion.fuse(merged, &parsed, Utc::now());
        let visible = fusion::apply_access_filter(ranked, request.viewer);
        let unique = fusion::deduplicate(visible, self.config.search.dedup_threshold);

        let total = unique.len() as i64;
        let pages = if total > 0 {
            (total + limit - 1) / limit
        } else {
            0
        };

        // Saturating: an absurd page lands past the end instead of overflowing
        let offset = (page - 1).saturating_mul(limit) as usize;
        let results: Vec<ResultCard> = unique
            .iter()
            .skip(offset)
            .take(limit as usize)
            .map(|r: &ScoredResult| presenter::format_result(&r.item))
            .collect();

        let facets = self.build_facets(&request).await;

        let duration_ms = start.elapsed().as_millis() as i64;

        let search_id = self
            .learning
            .log_search(
                &request.query,
                &parsed,
                total,
                duration_ms,
                request.institution_id,
                request.session_id.clone(),
                request.user_agent.clone(),
            )
            .await;

        let suggestions = if total < 5 && !request.query.trim().is_empty() {
            self.low_result_suggestions(&request, &parsed).await
        } else {
            Vec::new()
        };

        info!(
            query = request.query,
            intent = %parsed.intent,
            total,
            duration_ms,
            "Discovery search complete"
        );

        Ok(SearchResponse {
            total,
            page,
            limit,
            pages,
            results,
            facets,
            suggestions,
            query: request.query.clone(),
            parsed_query: ParsedQuerySummary {
                intent: parsed.intent,
                entities: parsed.entities,
                time_references: parsed.time_references,
            },
            filters_applied: request.filters,
            duration_ms,
            search_id,
        })
    }

    /// Autocomplete from learned suggestions, padded with catalog titles.
    pub async fn autocomplete(
        &self,
        prefix: &str,
        institution_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<String>, DiscoveryError> {
        self.learning
            .get_query_suggestions(prefix, institution_id, clamp_limit(limit))
            .await
    }

    /// Record a click on a search result.
    pub async fn log_click(
        &self,
        search_id: i64,
        item_id: i64,
        position: i32,
        time_to_click_ms: Option<i64>,
        session_id: Option<String>,
    ) -> Result<i64, DiscoveryError> {
        self.learning
            .log_click(search_id, item_id, position, time_to_click_ms, session_id)
            .await
    }

    /// Record how long a clicked item was viewed.
    pub async fn update_dwell_time(
        &self,
        click_id: i64,
        dwell_seconds: i64,
    ) -> Result<(), DiscoveryError> {
        self.learning.update_dwell_time(click_id, dwell_seconds).await
    }

    pub fn learning(&self) -> &LearningService {
        &self.learning
    }

    /// Keyword search, or a recency browse when there is nothing to match.
    async fn keyword_strategy(
        &self,
        parsed: &ParsedQuery,
        conditions: &[FilterCondition],
        institution_id: Option<i64>,
        culture: &str,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        let limit = self.config.search.keyword_limit;

        if parsed.keywords.is_empty() && parsed.phrases.is_empty() {
            self.catalog
                .browse_recent(conditions, institution_id, culture, limit)
                .await
        } else {
            self.catalog
                .keyword_search(
                    &parsed.keywords,
                    &parsed.phrases,
                    conditions,
                    institution_id,
                    culture,
                    limit,
                )
                .await
        }
    }

    /// Per-entity retrieval. A failing entity lookup narrows recall and is
    /// logged; it never fails the search.
    async fn entity_strategy(
        &self,
        parsed: &ParsedQuery,
        institution_id: Option<i64>,
        culture: &str,
    ) -> Vec<CatalogItem> {
        let limit = self.config.search.entity_limit;
        let mut results = Vec::new();

        for entity in &parsed.entities {
            let fetched = match entity.entity_type {
                EntityType::Person | EntityType::Organization => {
                    self.catalog
                        .search_by_creator(entity, institution_id, culture, limit)
                        .await
                }
                EntityType::Place => {
                    self.catalog
                        .search_by_place(entity, institution_id, culture, limit)
                        .await
                }
                EntityType::Subject => {
                    self.catalog
                        .search_by_subject(entity, institution_id, culture, limit)
                        .await
                }
                EntityType::Format => {
                    self.catalog
                        .search_by_format(entity, institution_id, culture, limit)
                        .await
                }
            };

            match fetched {
                Ok(items) => results.extend(items),
                Err(e) => warn!(
                    entity = entity.value,
                    error = %e,
                    "Entity strategy failed for one entity, continuing"
                ),
            }
        }

        results
    }

    async fn date_strategy(
        &self,
        parsed: &ParsedQuery,
        institution_id: Option<i64>,
        culture: &str,
    ) -> Vec<CatalogItem> {
        if parsed.filters.time_ranges.is_empty() {
            return Vec::new();
        }

        match self
            .catalog
            .search_by_date_ranges(
                &parsed.filters.time_ranges,
                institution_id,
                culture,
                self.config.search.date_limit,
            )
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Date strategy failed, continuing");
                Vec::new()
            }
        }
    }

    async fn expanded_strategy(
        &self,
        parsed: &ParsedQuery,
        institution_id: Option<i64>,
        culture: &str,
    ) -> Vec<CatalogItem> {
        if parsed.expanded_terms.is_empty() {
            return Vec::new();
        }

        let terms: Vec<String> = parsed
            .expanded_terms
            .iter()
            .map(|t| t.term.clone())
            .collect();

        match self
            .catalog
            .search_by_expanded_terms(
                &terms,
                institution_id,
                culture,
                self.config.search.expanded_limit,
            )
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Expanded-term strategy failed, continuing");
                Vec::new()
            }
        }
    }

    async fn build_facets(&self, request: &SearchRequest) -> Vec<FacetView> {
        let definitions = match self
            .filter_service
            .enabled_facets(request.institution_id)
            .await
        {
            Ok(definitions) => definitions,
            Err(e) => {
                warn!(error = %e, "Facet definitions unavailable, omitting facets");
                return Vec::new();
            }
        };

        definitions
            .into_iter()
            .filter(|d| d.show_in_search)
            .map(|d| FacetView {
                selected: request.filters.get(&d.code).cloned().unwrap_or_default(),
                code: d.code,
                label: d.label,
                icon: d.icon,
                values: Vec::new(),
            })
            .collect()
    }

    /// Up to 3 learned suggestions plus high-confidence entity values,
    /// deduplicated, capped at 5.
    async fn low_result_suggestions(
        &self,
        request: &SearchRequest,
        parsed: &ParsedQuery,
    ) -> Vec<String> {
        let mut suggestions = match self
            .learning
            .get_query_suggestions(&request.query, request.institution_id, 3)
            .await
        {
            Ok(learned) => learned,
            Err(e) => {
                warn!(error = %e, "Suggestion lookup failed, continuing without");
                Vec::new()
            }
        };

        for entity in &parsed.entities {
            if entity.confidence > 0.8 && !suggestions.contains(&entity.value) {
                suggestions.push(entity.value.clone());
            }
        }

        suggestions.truncate(5);
        suggestions
    }
}

fn clamp_page(page: i64) -> i64 {
    page.max(1)
}

fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, 100)
}

/// Merge strategy outputs preserving strategy order; the first occurrence of
/// each catalog id wins.
fn merge_by_id(result_sets: Vec<Vec<CatalogItem>>) -> Vec<CatalogItem> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();

    for set in result_sets {
        for item in set {
            if seen.insert(item.id) {
                merged.push(item);
            }
        }
    }

    merged
}
