//! End-to-end pipeline tests over in-memory stores: query parsing feeds the
//! retrieval strategies, fusion ranks and filters, and click telemetry flows
//! back through the learning service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use trove::config::Config;
use trove::errors::DiscoveryError;
use trove::filters::{BasicFilterService, DateRange, FilterCondition};
use trove::query::{Entity, EntityType, Intent, TimeRefKind};
use trove::search::fusion::Viewer;
use trove::search::{SearchOrchestrator, SearchRequest};
use trove::store::{
    AuthorityRef, CatalogItem, CatalogStore, CleanupCounts, CoClickPair, LearnedTerm,
    NewClickLog, NewSearchLog, OverallStats, QueryCount, QueryStats, RankingConfig,
    SearchLogRow, SuggestionUpsert, TelemetryStore,
};

fn item(id: i64, title: &str, content: &str) -> CatalogItem {
    CatalogItem {
        id,
        slug: format!("item-{}", id),
        identifier: None,
        title: Some(title.to_string()),
        scope_and_content: if content.is_empty() {
            None
        } else {
            Some(content.to_string())
        },
        extent_and_medium: None,
        level_of_description: Some("Item".to_string()),
        repository_id: None,
        repository_name: None,
        thumbnail_path: None,
        thumbnail_name: None,
        mime_type: None,
        start_date: None,
        end_date: None,
        has_subjects: false,
        view_count: 0,
        download_count: 0,
        is_featured: false,
        is_published: true,
        created_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        updated_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
    }
}

/// Catalog over a fixed item list. Keyword search requires every keyword in
/// the title or content; the entity and date strategies return configured
/// lists.
#[derive(Default)]
struct MemoryCatalog {
    items: Vec<CatalogItem>,
    places: Vec<AuthorityRef>,
    format_results: Vec<CatalogItem>,
    titles: Vec<String>,
}

impl MemoryCatalog {
    fn matches_keywords(item: &CatalogItem, keywords: &[String]) -> bool {
        let haystack = format!(
            "{} {}",
            item.title.as_deref().unwrap_or(""),
            item.scope_and_content.as_deref().unwrap_or("")
        )
        .to_lowercase();
        keywords.iter().all(|kw| haystack.contains(&kw.to_lowercase()))
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn keyword_search(
        &self,
        keywords: &[String],
        _phrases: &[String],
        _conditions: &[FilterCondition],
        _institution_id: Option<i64>,
        _culture: &str,
        _limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        Ok(self
            .items
            .iter()
            .filter(|i| Self::matches_keywords(i, keywords))
            .cloned()
            .collect())
    }

    async fn browse_recent(
        &self,
        _conditions: &[FilterCondition],
        _institution_id: Option<i64>,
        _culture: &str,
        _limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        let mut items = self.items.clone();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(items)
    }

    async fn search_by_creator(
        &self,
        _entity: &Entity,
        _institution_id: Option<i64>,
        _culture: &str,
        _limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn search_by_place(
        &self,
        _entity: &Entity,
        _institution_id: Option<i64>,
        _culture: &str,
        _limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn search_by_subject(
        &self,
        _entity: &Entity,
        _institution_id: Option<i64>,
        _culture: &str,
        _limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn search_by_format(
        &self,
        _entity: &Entity,
        _institution_id: Option<i64>,
        _culture: &str,
        _limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        Ok(self.format_results.clone())
    }

    async fn search_by_date_ranges(
        &self,
        ranges: &[DateRange],
        _institution_id: Option<i64>,
        _culture: &str,
        _limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        Ok(self
            .items
            .iter()
            .filter(|i| {
                i.start_date
                    .map(|d| ranges.iter().any(|r| d >= r.start && d <= r.end))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn search_by_expanded_terms(
        &self,
        _terms: &[String],
        _institution_id: Option<i64>,
        _culture: &str,
        _limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn match_actors(
        &self,
        _candidates: &[String],
        _culture: &str,
        _limit: i64,
    ) -> Result<Vec<AuthorityRef>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn match_place_terms(
        &self,
        text: &str,
        _culture: &str,
        _limit: i64,
    ) -> Result<Vec<AuthorityRef>, DiscoveryError> {
        let lower = text.to_lowercase();
        Ok(self
            .places
            .iter()
            .filter(|p| lower.contains(&p.name.to_lowercase()))
            .cloned()
            .collect())
    }

    async fn match_subject_terms(
        &self,
        _keywords: &[String],
        _culture: &str,
        _limit: i64,
    ) -> Result<Vec<AuthorityRef>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn titles_with_prefix(
        &self,
        prefix: &str,
        _culture: &str,
        exclude: &[String],
        limit: i64,
    ) -> Result<Vec<String>, DiscoveryError> {
        let lower = prefix.to_lowercase();
        Ok(self
            .titles
            .iter()
            .filter(|t| t.to_lowercase().starts_with(&lower) && !exclude.contains(t))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct TelemetryState {
    next_id: i64,
    search_logs: Vec<(SearchLogRow, NewSearchLog)>,
    clicks: Vec<(i64, NewClickLog, Option<i64>)>,
    suggestions: Vec<String>,
}

/// Telemetry over mutexed vectors. Only the paths the pipeline exercises are
/// stateful; the batch and analytics queries return empty aggregates.
#[derive(Default)]
struct MemoryTelemetry {
    state: Mutex<TelemetryState>,
}

impl MemoryTelemetry {
    fn search_log(&self, id: i64) -> Option<SearchLogRow> {
        self.state
            .lock()
            .unwrap()
            .search_logs
            .iter()
            .find(|(row, _)| row.id == id)
            .map(|(row, _)| row.clone())
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetry {
    async fn ranking_config(
        &self,
        _institution_id: Option<i64>,
    ) -> Result<Option<RankingConfig>, DiscoveryError> {
        Ok(None)
    }

    async fn insert_search_log(&self, log: NewSearchLog) -> Result<i64, DiscoveryError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let row = SearchLogRow {
            id,
            institution_id: log.institution_id,
            query_text: log.query_text.clone(),
            click_count: 0,
            first_click_position: None,
        };
        state.search_logs.push((row, log));
        Ok(id)
    }

    async fn get_search_log(&self, id: i64) -> Result<Option<SearchLogRow>, DiscoveryError> {
        Ok(self.search_log(id))
    }

    async fn insert_click_log(&self, click: NewClickLog) -> Result<i64, DiscoveryError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.clicks.push((id, click, None));
        Ok(id)
    }

    async fn update_search_log_clicks(
        &self,
        log_id: i64,
        click_count: i64,
        first_click_position: Option<i32>,
    ) -> Result<(), DiscoveryError> {
        let mut state = self.state.lock().unwrap();
        if let Some((row, _)) = state.search_logs.iter_mut().find(|(row, _)| row.id == log_id) {
            row.click_count = click_count;
            if row.first_click_position.is_none() {
                row.first_click_position = first_click_position;
            }
        }
        Ok(())
    }

    async fn set_dwell_time(
        &self,
        click_id: i64,
        dwell_seconds: i64,
    ) -> Result<(), DiscoveryError> {
        let mut state = self.state.lock().unwrap();
        match state.clicks.iter_mut().find(|(id, _, _)| *id == click_id) {
            Some((_, _, dwell)) => {
                *dwell = Some(dwell_seconds);
                Ok(())
            }
            None => Err(DiscoveryError::NotFound {
                what: "click",
                id: click_id,
            }),
        }
    }

    async fn bump_suggestion_click(
        &self,
        _query_text: &str,
        _institution_id: Option<i64>,
    ) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn suggestions_with_prefix(
        &self,
        prefix: &str,
        _institution_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<String>, DiscoveryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .suggestions
            .iter()
            .filter(|s| s.starts_with(prefix))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn aggregate_query_stats(
        &self,
        _institution_id: Option<i64>,
        _window_days: i64,
        _min_searches: i64,
        _min_avg_results: f64,
        _cap: i64,
    ) -> Result<Vec<QueryStats>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn upsert_suggestion(&self, _s: SuggestionUpsert) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn co_clicked_query_pairs(
        &self,
        _institution_id: Option<i64>,
        _min_co_occurrence: i64,
        _cap: i64,
    ) -> Result<Vec<CoClickPair>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn upsert_learned_term(
        &self,
        _term: &str,
        _related_term: &str,
        _relationship_type: &str,
        _confidence: f64,
        _institution_id: Option<i64>,
    ) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn related_terms(
        &self,
        _term: &str,
        _limit: i64,
    ) -> Result<Vec<LearnedTerm>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn overall_stats(
        &self,
        _institution_id: Option<i64>,
        _since: DateTime<Utc>,
    ) -> Result<OverallStats, DiscoveryError> {
        Ok(OverallStats::default())
    }

    async fn top_queries(
        &self,
        _institution_id: Option<i64>,
        _since: DateTime<Utc>,
        _limit: i64,
    ) -> Result<Vec<QueryCount>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn zero_result_queries(
        &self,
        _institution_id: Option<i64>,
        _since: DateTime<Utc>,
        _limit: i64,
    ) -> Result<Vec<QueryCount>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn searches_by_intent(
        &self,
        _institution_id: Option<i64>,
        _since: DateTime<Utc>,
    ) -> Result<Vec<(String, i64)>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn searches_by_day(
        &self,
        _institution_id: Option<i64>,
        _since: DateTime<Utc>,
    ) -> Result<Vec<(NaiveDate, i64)>, DiscoveryError> {
        Ok(Vec::new())
    }

    async fn delete_logs_older_than(
        &self,
        _cutoff: DateTime<Utc>,
    ) -> Result<CleanupCounts, DiscoveryError> {
        Ok(CleanupCounts {
            clicks_deleted: 0,
            logs_deleted: 0,
        })
    }
}

fn orchestrator(
    catalog: MemoryCatalog,
    telemetry: Arc<MemoryTelemetry>,
) -> SearchOrchestrator {
    SearchOrchestrator::new(
        Arc::new(catalog),
        telemetry,
        Arc::new(BasicFilterService),
        RankingConfig::default(),
        Config::default(),
    )
}

fn harbour_catalog() -> MemoryCatalog {
    MemoryCatalog {
        items: vec![
            item(1, "Photographs of Cape Town harbour", "Album of harbour views"),
            item(2, "Minutes of the town council", "Proceedings, Cape Town"),
            {
                let mut draft = item(
                    3,
                    "Photographs of Cape Town station",
                    "Unprocessed photographs accession",
                );
                draft.is_published = false;
                draft
            },
        ],
        places: vec![AuthorityRef {
            id: 9001,
            name: "Cape Town".to_string(),
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_search_pipeline_end_to_end() {
    let telemetry = Arc::new(MemoryTelemetry::default());
    let orch = orchestrator(harbour_catalog(), telemetry.clone());

    let response = orch
        .search(SearchRequest {
            query: "1950s photographs Cape Town".to_string(),
            session_id: Some("s-1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    // Item 1 matches all keywords; item 2 lacks "photographs"; item 3 is an
    // unpublished draft hidden from anonymous viewers
    assert_eq!(response.total, 1);
    assert_eq!(response.results[0].id, 1);
    assert_eq!(response.results[0].title, "Photographs of Cape Town harbour");

    // The parse surfaced the decade and the detected entities
    assert_eq!(response.parsed_query.intent, Intent::Find);
    assert_eq!(response.parsed_query.time_references.len(), 1);
    assert_eq!(response.parsed_query.time_references[0].kind, TimeRefKind::Decade);
    assert_eq!(
        response.parsed_query.time_references[0].start,
        NaiveDate::from_ymd_opt(1950, 1, 1).unwrap()
    );
    assert!(response
        .parsed_query
        .entities
        .iter()
        .any(|e| e.entity_type == EntityType::Format && e.value == "Photograph"));
    assert!(response
        .parsed_query
        .entities
        .iter()
        .any(|e| e.entity_type == EntityType::Place && e.value == "Cape Town"));

    // Few results: high-confidence entity values become suggestions
    assert!(response.suggestions.contains(&"Photograph".to_string()));
    assert!(response.suggestions.contains(&"Cape Town".to_string()));

    // The search was logged and its id surfaced for click telemetry
    let search_id = response.search_id.expect("search should be logged");
    let row = telemetry.search_log(search_id).unwrap();
    assert_eq!(row.query_text.as_deref(), Some("1950s photographs Cape Town"));
    assert_eq!(row.click_count, 0);
}

#[tokio::test]
async fn test_empty_query_browses_recent() {
    let telemetry = Arc::new(MemoryTelemetry::default());
    let orch = orchestrator(harbour_catalog(), telemetry);

    let mut filters = HashMap::new();
    filters.insert("content_type".to_string(), vec!["Photograph".to_string()]);

    let response = orch
        .search(SearchRequest {
            query: String::new(),
            filters,
            ..Default::default()
        })
        .await
        .unwrap();

    // Browse mode: published items only, explore intent, no suggestions
    assert_eq!(response.parsed_query.intent, Intent::Explore);
    assert_eq!(response.total, 2);
    assert!(response.suggestions.is_empty());

    // All four standard facets come back, with the applied selection echoed
    assert_eq!(response.facets.len(), 4);
    let content_type = response
        .facets
        .iter()
        .find(|f| f.code == "content_type")
        .unwrap();
    assert_eq!(content_type.selected, vec!["Photograph".to_string()]);
}

#[tokio::test]
async fn test_pagination_clamps_and_pages() {
    let telemetry = Arc::new(MemoryTelemetry::default());
    let orch = orchestrator(harbour_catalog(), telemetry);

    let response = orch
        .search(SearchRequest {
            query: String::new(),
            page: 0,
            limit: 1000,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.page, 1);
    assert_eq!(response.limit, 100);
    assert_eq!(response.pages, 1);

    // A page past the end is empty but keeps the totals
    let past_end = orch
        .search(SearchRequest {
            query: String::new(),
            page: 5,
            limit: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(past_end.total, 2);
    assert_eq!(past_end.pages, 1);
    assert!(past_end.results.is_empty());
}

#[tokio::test]
async fn test_extreme_page_number_is_an_empty_page() {
    let telemetry = Arc::new(MemoryTelemetry::default());
    let orch = orchestrator(harbour_catalog(), telemetry);

    let response = orch
        .search(SearchRequest {
            query: String::new(),
            page: i64::MAX,
            limit: 100,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.total, 2);
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn test_possessive_person_and_format_entities() {
    let telemetry = Arc::new(MemoryTelemetry::default());
    let orch = orchestrator(MemoryCatalog::default(), telemetry);

    let response = orch
        .search(SearchRequest {
            query: "John Smith's letters".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    // The possessive yields a person; "letters" maps to Correspondence
    let person = response
        .parsed_query
        .entities
        .iter()
        .find(|e| e.entity_type == EntityType::Person)
        .expect("possessive should yield a person entity");
    assert_eq!(person.value, "John Smith");
    assert_eq!(person.confidence, 0.7);

    let format = response
        .parsed_query
        .entities
        .iter()
        .find(|e| e.entity_type == EntityType::Format)
        .expect("\"letters\" should yield a format entity");
    assert_eq!(format.value, "Correspondence");
    assert_eq!(format.confidence, 0.9);

    // "by [Name]" carries more weight than a possessive
    let by_response = orch
        .search(SearchRequest {
            query: "letters by John Smith".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let person = by_response
        .parsed_query
        .entities
        .iter()
        .find(|e| e.entity_type == EntityType::Person)
        .unwrap();
    assert_eq!(person.value, "John Smith");
    assert_eq!(person.confidence, 0.8);
}

#[tokio::test]
async fn test_near_duplicate_titles_collapse() {
    let catalog = MemoryCatalog {
        items: vec![
            item(1, "Cape Town Harbour", "Views of the harbour"),
            item(2, "Cape Town Harbor", "Views of the harbour"),
        ],
        ..Default::default()
    };
    let telemetry = Arc::new(MemoryTelemetry::default());
    let orch = orchestrator(catalog, telemetry);

    let response = orch
        .search(SearchRequest {
            query: "harbour".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    // "Cape Town Harbour" vs "Cape Town Harbor" is above the 0.9 similarity
    // threshold, so the lower-ranked one collapses away
    assert_eq!(response.total, 1);
}

#[tokio::test]
async fn test_administrator_sees_unpublished_drafts() {
    let telemetry = Arc::new(MemoryTelemetry::default());
    let orch = orchestrator(harbour_catalog(), telemetry);

    let request = SearchRequest {
        query: "photographs cape town".to_string(),
        viewer: Viewer::Administrator,
        ..Default::default()
    };
    let admin = orch.search(request.clone()).await.unwrap();
    assert_eq!(admin.total, 2);

    let anon = orch
        .search(SearchRequest {
            viewer: Viewer::Anonymous,
            ..request
        })
        .await
        .unwrap();
    assert_eq!(anon.total, 1);
}

#[tokio::test]
async fn test_click_flow_keeps_first_position() {
    let telemetry = Arc::new(MemoryTelemetry::default());
    let orch = orchestrator(harbour_catalog(), telemetry.clone());

    let response = orch
        .search(SearchRequest {
            query: "photographs cape town".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let search_id = response.search_id.unwrap();

    let click_id = orch
        .log_click(search_id, 1, 3, Some(1200), None)
        .await
        .unwrap();
    orch.log_click(search_id, 1, 1, None, None).await.unwrap();

    let row = telemetry.search_log(search_id).unwrap();
    assert_eq!(row.click_count, 2);
    // The first click's position sticks; later clicks only bump the count
    assert_eq!(row.first_click_position, Some(3));

    orch.update_dwell_time(click_id, 45).await.unwrap();
}

#[tokio::test]
async fn test_dwell_time_rejects_negative_values() {
    let telemetry = Arc::new(MemoryTelemetry::default());
    let orch = orchestrator(MemoryCatalog::default(), telemetry);

    let err = orch.update_dwell_time(1, -5).await.unwrap_err();
    match err {
        DiscoveryError::Validation { field, .. } => {
            assert_eq!(field.as_deref(), Some("dwell_seconds"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_dwell_time_for_unknown_click_is_not_found() {
    let telemetry = Arc::new(MemoryTelemetry::default());
    let orch = orchestrator(MemoryCatalog::default(), telemetry);

    let err = orch.update_dwell_time(999, 30).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::NotFound { id: 999, .. }));
}

#[tokio::test]
async fn test_autocomplete_pads_with_catalog_titles() {
    let catalog = MemoryCatalog {
        titles: vec![
            "Cape Colony records".to_string(),
            "Cape Town street scenes".to_string(),
        ],
        ..Default::default()
    };
    let telemetry = Arc::new(MemoryTelemetry::default());
    telemetry
        .state
        .lock()
        .unwrap()
        .suggestions
        .push("cape town harbour".to_string());
    let orch = orchestrator(catalog, telemetry);

    let suggestions = orch.autocomplete("cape", None, 5).await.unwrap();
    assert_eq!(suggestions[0], "cape town harbour");
    assert!(suggestions.contains(&"Cape Colony records".to_string()));
    assert_eq!(suggestions.len(), 3);

    // Prefixes under two characters never hit the stores
    let short = orch.autocomplete("c", None, 5).await.unwrap();
    assert!(short.is_empty());

    // Out-of-range limits clamp instead of reaching the store
    let clamped = orch.autocomplete("cape", None, 0).await.unwrap();
    assert_eq!(clamped.len(), 1);
    let clamped = orch.autocomplete("cape", None, -7).await.unwrap();
    assert_eq!(clamped.len(), 1);
}
