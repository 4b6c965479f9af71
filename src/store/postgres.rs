/// PostgreSQL implementation of CatalogStore and TelemetryStore
///
/// Uses sqlx with PgPool for connection pooling. The catalog side reads the
/// host platform's archival tables (information_object and friends); the
/// telemetry side owns the discovery_* tables created by this crate's
/// migrations. Supports optional migration execution on startup.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    postgres::{PgPool, PgPoolOptions, PgRow},
    Row,
};
use std::time::Duration;

use crate::errors::DiscoveryError;
use crate::filters::{DateRange, FilterCondition, FilterField, TaxonomyKind, TermSelector};
use crate::query::Entity;
use crate::store::{
    AuthorityRef, CatalogItem, CatalogStore, CleanupCounts, CoClickPair, LearnedTerm,
    NewClickLog, NewSearchLog, OverallStats, QueryCount, QueryStats, RankingConfig,
    SearchLogRow, SuggestionUpsert, TelemetryStore,
};

// AtoM taxonomy ids for the access-point vocabularies
const TAXONOMY_PLACE: i64 = 42;
const TAXONOMY_SUBJECT: i64 = 35;
const TAXONOMY_MEDIA_TYPE: i64 = 52;

// status.type_id for publication status, and the published status value
const STATUS_TYPE_PUBLICATION: i64 = 158;
const STATUS_PUBLISHED: i64 = 160;

/// Shared SELECT over the catalog. $1 is always the culture. The primary
/// event dates, level-of-description label, publication flag, and engagement
/// counters are resolved here so the rest of the pipeline stays I/O-free.
const BASE_SELECT: &str = "\
SELECT io.id, sl.slug, io.identifier, io.repository_id, \
       ioi.title, ioi.scope_and_content, ioi.extent_and_medium, \
       lod.name AS level_of_description, \
       repo_ai.authorized_form_of_name AS repository_name, \
       dob.path AS thumbnail_path, dob.name AS thumbnail_name, dob.mime_type, \
       ev.start_date, ev.end_date, \
       EXISTS (SELECT 1 FROM object_term_relation sub_otr \
               JOIN term sub_t ON sub_otr.term_id = sub_t.id \
               WHERE sub_otr.object_id = io.id AND sub_t.taxonomy_id = 35) AS has_subjects, \
       COALESCE(st.view_count, 0) AS view_count, \
       COALESCE(st.download_count, 0) AS download_count, \
       COALESCE(st.is_featured, FALSE) AS is_featured, \
       EXISTS (SELECT 1 FROM status ps WHERE ps.object_id = io.id \
               AND ps.type_id = 158 AND ps.status_id = 160) AS is_published, \
       o.created_at, o.updated_at \
FROM information_object io \
JOIN object o ON io.id = o.id \
JOIN slug sl ON io.id = sl.object_id \
LEFT JOIN information_object_i18n ioi ON io.id = ioi.id AND ioi.culture = $1 \
LEFT JOIN term_i18n lod ON io.level_of_description_id = lod.id AND lod.culture = $1 \
LEFT JOIN digital_object dob ON io.id = dob.object_id \
LEFT JOIN actor_i18n repo_ai ON io.repository_id = repo_ai.id AND repo_ai.culture = $1 \
LEFT JOIN discovery_item_stats st ON io.id = st.item_id \
LEFT JOIN LATERAL (SELECT e.start_date, e.end_date FROM event e \
                   WHERE e.object_id = io.id AND e.start_date IS NOT NULL \
                   ORDER BY e.id LIMIT 1) ev ON TRUE \
WHERE io.parent_id IS NOT NULL";

/// PostgreSQL-backed discovery store.
pub struct PgDiscoveryStore {
    pool: PgPool,
}

impl PgDiscoveryStore {
    /// Connect to the database at database_url with a production-ready pool.
    /// If run_migrations is true, pending discovery_* migrations run first.
    pub async fn new(database_url: &str, run_migrations: bool) -> Result<Self, DiscoveryError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| DiscoveryError::Storage(format!("Failed to connect to database: {}", e)))?;

        if run_migrations {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| DiscoveryError::Storage(format!("Migration failed: {}", e)))?;
        }

        Ok(PgDiscoveryStore { pool })
    }

    /// Cheap connectivity probe for health checks.
    pub async fn ping(&self) -> Result<(), DiscoveryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Owned bind values for dynamically assembled queries, bound in the order
/// their placeholders were emitted.
enum Bind {
    I64(i64),
    Str(String),
    I64List(Vec<i64>),
    StrList(Vec<String>),
    Date(NaiveDate),
}

struct QueryParts {
    clauses: Vec<String>,
    binds: Vec<Bind>,
    // $1 is the culture; dynamic params start at $2
    next_param: u32,
}

impl QueryParts {
    fn new() -> Self {
        QueryParts {
            clauses: Vec::new(),
            binds: Vec::new(),
            next_param: 2,
        }
    }

    fn param(&mut self, bind: Bind) -> u32 {
        let idx = self.next_param;
        self.binds.push(bind);
        self.next_param += 1;
        idx
    }

    fn push_clause(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    /// Translate one facet condition into an EXISTS/ANY predicate.
    fn push_condition(&mut self, condition: &FilterCondition) {
        match condition {
            FilterCondition::Taxonomy { kind, terms } => {
                let taxonomy_id = match kind {
                    TaxonomyKind::MediaType => TAXONOMY_MEDIA_TYPE,
                    TaxonomyKind::Subject => TAXONOMY_SUBJECT,
                    TaxonomyKind::Place => TAXONOMY_PLACE,
                };

                let mut ids = Vec::new();
                let mut names = Vec::new();
                for term in terms {
                    match term {
                        TermSelector::Id(id) => ids.push(*id),
                        TermSelector::Name(name) => names.push(name.clone()),
                    }
                }
                if ids.is_empty() && names.is_empty() {
                    return;
                }

                let mut matchers = Vec::new();
                if !ids.is_empty() {
                    let p = self.param(Bind::I64List(ids));
                    matchers.push(format!("otr.term_id = ANY(${})", p));
                }
                if !names.is_empty() {
                    let p = self.param(Bind::StrList(names));
                    matchers.push(format!("ti.name = ANY(${})", p));
                }

                self.push_clause(format!(
                    "EXISTS (SELECT 1 FROM object_term_relation otr \
                     JOIN term t ON otr.term_id = t.id \
                     LEFT JOIN term_i18n ti ON ti.id = t.id AND ti.culture = $1 \
                     WHERE otr.object_id = io.id AND t.taxonomy_id = {} AND ({}))",
                    taxonomy_id,
                    matchers.join(" OR ")
                ));
            }
            FilterCondition::Field { field, values } => {
                if values.is_empty() {
                    return;
                }
                let column = match field {
                    FilterField::Repository => "io.repository_id",
                    FilterField::LevelOfDescription => "io.level_of_description_id",
                };
                let p = self.param(Bind::I64List(values.clone()));
                self.push_clause(format!("{} = ANY(${})", column, p));
            }
            FilterCondition::DateRange { ranges } => {
                if ranges.is_empty() {
                    return;
                }
                let mut spans = Vec::new();
                for range in ranges {
                    let start = self.param(Bind::Date(range.start));
                    let end = self.param(Bind::Date(range.end));
                    spans.push(format!("e.start_date BETWEEN ${} AND ${}", start, end));
                }
                self.push_clause(format!(
                    "EXISTS (SELECT 1 FROM event e WHERE e.object_id = io.id AND ({}))",
                    spans.join(" OR ")
                ));
            }
        }
    }

    fn push_institution(&mut self, institution_id: Option<i64>) {
        if let Some(id) = institution_id {
            let p = self.param(Bind::I64(id));
            self.push_clause(format!("io.repository_id = ${}", p));
        }
    }

    /// Assemble the final SQL and run it against the catalog base query.
    async fn fetch_items(
        self,
        pool: &PgPool,
        culture: &str,
        order_by: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        let mut sql = String::from(BASE_SELECT);
        for clause in &self.clauses {
            sql.push_str(" AND ");
            sql.push_str(clause);
        }
        sql.push_str(&format!(" {} LIMIT ${}", order_by, self.next_param));

        let mut q = sqlx::query(&sql).bind(culture);
        for bind in self.binds {
            q = match bind {
                Bind::I64(v) => q.bind(v),
                Bind::Str(v) => q.bind(v),
                Bind::I64List(v) => q.bind(v),
                Bind::StrList(v) => q.bind(v),
                Bind::Date(v) => q.bind(v),
            };
        }
        q = q.bind(limit);

        let rows = q.fetch_all(pool).await?;
        rows.iter().map(row_to_item).collect()
    }
}

/// Escape LIKE wildcards and wrap in %...% for a contains match.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn row_to_item(row: &PgRow) -> Result<CatalogItem, DiscoveryError> {
    Ok(CatalogItem {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        identifier: row.try_get("identifier")?,
        title: row.try_get("title")?,
        scope_and_content: row.try_get("scope_and_content")?,
        extent_and_medium: row.try_get("extent_and_medium")?,
        level_of_description: row.try_get("level_of_description")?,
        repository_id: row.try_get("repository_id")?,
        repository_name: row.try_get("repository_name")?,
        thumbnail_path: row.try_get("thumbnail_path")?,
        thumbnail_name: row.try_get("thumbnail_name")?,
        mime_type: row.try_get("mime_type")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        has_subjects: row.try_get("has_subjects")?,
        view_count: row.try_get("view_count")?,
        download_count: row.try_get("download_count")?,
        is_featured: row.try_get("is_featured")?,
        is_published: row.try_get("is_published")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_ranking(row: &PgRow) -> Result<RankingConfig, DiscoveryError> {
    Ok(RankingConfig {
        weight_title_match: row.try_get("weight_title_match")?,
        weight_content_match: row.try_get("weight_content_match")?,
        weight_identifier_match: row.try_get("weight_identifier_match")?,
        weight_subject_match: row.try_get("weight_subject_match")?,
        weight_creator_match: row.try_get("weight_creator_match")?,
        weight_has_digital_object: row.try_get("weight_has_digital_object")?,
        weight_description_length: row.try_get("weight_description_length")?,
        weight_has_dates: row.try_get("weight_has_dates")?,
        weight_has_subjects: row.try_get("weight_has_subjects")?,
        weight_view_count: row.try_get("weight_view_count")?,
        weight_download_count: row.try_get("weight_download_count")?,
        weight_citation_count: row.try_get("weight_citation_count")?,
        boost_featured: row.try_get("boost_featured")?,
        boost_recent: row.try_get("boost_recent")?,
        penalty_incomplete: row.try_get("penalty_incomplete")?,
        freshness_decay_days: row.try_get("freshness_decay_days")?,
    })
}

#[async_trait]
impl CatalogStore for PgDiscoveryStore {
    async fn keyword_search(
        &self,
        keywords: &[String],
        phrases: &[String],
        conditions: &[FilterCondition],
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        let mut parts = QueryParts::new();

        // Every keyword must match at least one field; exact phrases widen
        // the match as an OR on title/content
        let mut keyword_clauses = Vec::new();
        for kw in keywords {
            let p = parts.param(Bind::Str(like_pattern(kw)));
            keyword_clauses.push(format!(
                "(ioi.title ILIKE ${p} OR ioi.scope_and_content ILIKE ${p} \
                 OR io.identifier ILIKE ${p} OR ioi.alternate_title ILIKE ${p} \
                 OR ioi.archival_history ILIKE ${p} OR ioi.arrangement ILIKE ${p})",
                p = p
            ));
        }
        let mut phrase_clauses = Vec::new();
        for phrase in phrases {
            let p = parts.param(Bind::Str(like_pattern(phrase)));
            phrase_clauses.push(format!(
                "ioi.title ILIKE ${p} OR ioi.scope_and_content ILIKE ${p}",
                p = p
            ));
        }

        let text_clause = match (keyword_clauses.is_empty(), phrase_clauses.is_empty()) {
            (false, false) => format!(
                "(({}) OR {})",
                keyword_clauses.join(" AND "),
                phrase_clauses.join(" OR ")
            ),
            (false, true) => format!("({})", keyword_clauses.join(" AND ")),
            (true, false) => format!("({})", phrase_clauses.join(" OR ")),
            (true, true) => {
                return Err(DiscoveryError::Internal(
                    "keyword_search called without keywords or phrases".to_string(),
                ))
            }
        };
        parts.push_clause(text_clause);

        for condition in conditions {
            parts.push_condition(condition);
        }
        parts.push_institution(institution_id);

        parts
            .fetch_items(&self.pool, culture, "ORDER BY io.id", limit)
            .await
    }

    async fn browse_recent(
        &self,
        conditions: &[FilterCondition],
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        let mut parts = QueryParts::new();
        for condition in conditions {
            parts.push_condition(condition);
        }
        parts.push_institution(institution_id);

        parts
            .fetch_items(&self.pool, culture, "ORDER BY o.updated_at DESC", limit)
            .await
    }

    async fn search_by_creator(
        &self,
        entity: &Entity,
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        let mut parts = QueryParts::new();

        match entity.id {
            Some(actor_id) => {
                let p = parts.param(Bind::I64(actor_id));
                parts.push_clause(format!(
                    "EXISTS (SELECT 1 FROM relation rel \
                     WHERE rel.subject_id = io.id AND rel.object_id = ${})",
                    p
                ));
            }
            None => {
                let p = parts.param(Bind::Str(like_pattern(&entity.value)));
                parts.push_clause(format!(
                    "EXISTS (SELECT 1 FROM relation rel \
                     JOIN actor_i18n ai ON rel.object_id = ai.id AND ai.culture = $1 \
                     WHERE rel.subject_id = io.id \
                     AND ai.authorized_form_of_name ILIKE ${})",
                    p
                ));
            }
        }
        parts.push_institution(institution_id);

        parts
            .fetch_items(&self.pool, culture, "ORDER BY io.id", limit)
            .await
    }

    async fn search_by_place(
        &self,
        entity: &Entity,
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        self.search_by_access_point(entity, TAXONOMY_PLACE, institution_id, culture, limit)
            .await
    }

    async fn search_by_subject(
        &self,
        entity: &Entity,
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        self.search_by_access_point(entity, TAXONOMY_SUBJECT, institution_id, culture, limit)
            .await
    }

    async fn search_by_format(
        &self,
        entity: &Entity,
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        // Formats always match by canonical term name, never by id
        let mut parts = QueryParts::new();
        let p = parts.param(Bind::Str(like_pattern(&entity.value)));
        parts.push_clause(format!(
            "EXISTS (SELECT 1 FROM object_term_relation otr \
             JOIN term t ON otr.term_id = t.id \
             JOIN term_i18n ti ON ti.id = t.id AND ti.culture = $1 \
             WHERE otr.object_id = io.id AND t.taxonomy_id = {} \
             AND ti.name ILIKE ${})",
            TAXONOMY_MEDIA_TYPE, p
        ));
        parts.push_institution(institution_id);

        parts
            .fetch_items(&self.pool, culture, "ORDER BY io.id", limit)
            .await
    }

    async fn search_by_date_ranges(
        &self,
        ranges: &[DateRange],
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        let mut parts = QueryParts::new();
        parts.push_condition(&FilterCondition::DateRange {
            ranges: ranges.to_vec(),
        });
        parts.push_institution(institution_id);

        parts
            .fetch_items(&self.pool, culture, "ORDER BY io.id", limit)
            .await
    }

    async fn search_by_expanded_terms(
        &self,
        terms: &[String],
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut parts = QueryParts::new();
        let mut clauses = Vec::new();
        for term in terms {
            let p = parts.param(Bind::Str(like_pattern(term)));
            clauses.push(format!(
                "ioi.title ILIKE ${p} OR ioi.scope_and_content ILIKE ${p}",
                p = p
            ));
        }
        parts.push_clause(format!("({})", clauses.join(" OR ")));
        parts.push_institution(institution_id);

        parts
            .fetch_items(&self.pool, culture, "ORDER BY io.id", limit)
            .await
    }

    async fn match_actors(
        &self,
        candidates: &[String],
        culture: &str,
        limit: i64,
    ) -> Result<Vec<AuthorityRef>, DiscoveryError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let patterns: Vec<String> = candidates.iter().map(|c| like_pattern(c)).collect();
        let rows = sqlx::query(
            "SELECT id, authorized_form_of_name AS name FROM actor_i18n \
             WHERE culture = $1 AND authorized_form_of_name ILIKE ANY($2) \
             ORDER BY id LIMIT $3",
        )
        .bind(culture)
        .bind(&patterns)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AuthorityRef {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn match_place_terms(
        &self,
        text: &str,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<AuthorityRef>, DiscoveryError> {
        // The query text contains the place name, not the other way around:
        // "photographs Cape Town" should match the term "Cape Town"
        let rows = sqlx::query(
            "SELECT t.id, ti.name FROM term_i18n ti \
             JOIN term t ON ti.id = t.id \
             WHERE t.taxonomy_id = $1 AND ti.culture = $2 \
             AND $3 ILIKE '%' || ti.name || '%' \
             ORDER BY t.id LIMIT $4",
        )
        .bind(TAXONOMY_PLACE)
        .bind(culture)
        .bind(text)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AuthorityRef {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn match_subject_terms(
        &self,
        keywords: &[String],
        culture: &str,
        limit: i64,
    ) -> Result<Vec<AuthorityRef>, DiscoveryError> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let patterns: Vec<String> = keywords.iter().map(|k| like_pattern(k)).collect();
        let rows = sqlx::query(
            "SELECT t.id, ti.name FROM term_i18n ti \
             JOIN term t ON ti.id = t.id \
             WHERE t.taxonomy_id = $1 AND ti.culture = $2 AND ti.name ILIKE ANY($3) \
             ORDER BY t.id LIMIT $4",
        )
        .bind(TAXONOMY_SUBJECT)
        .bind(culture)
        .bind(&patterns)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AuthorityRef {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn titles_with_prefix(
        &self,
        prefix: &str,
        culture: &str,
        exclude: &[String],
        limit: i64,
    ) -> Result<Vec<String>, DiscoveryError> {
        let pattern = format!(
            "{}%",
            prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let rows = sqlx::query(
            "SELECT DISTINCT title FROM information_object_i18n \
             WHERE culture = $1 AND title ILIKE $2 AND title <> ALL($3) \
             ORDER BY title LIMIT $4",
        )
        .bind(culture)
        .bind(pattern)
        .bind(exclude)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(row.try_get::<String, _>("title")?))
            .collect()
    }
}

impl PgDiscoveryStore {
    /// Shared id-or-name access-point lookup for place and subject entities.
    async fn search_by_access_point(
        &self,
        entity: &Entity,
        taxonomy_id: i64,
        institution_id: Option<i64>,
        culture: &str,
        limit: i64,
    ) -> Result<Vec<CatalogItem>, DiscoveryError> {
        let mut parts = QueryParts::new();

        match entity.id {
            Some(term_id) => {
                let p = parts.param(Bind::I64(term_id));
                parts.push_clause(format!(
                    "EXISTS (SELECT 1 FROM object_term_relation otr \
                     WHERE otr.object_id = io.id AND otr.term_id = ${})",
                    p
                ));
            }
            None => {
                let p = parts.param(Bind::Str(like_pattern(&entity.value)));
                parts.push_clause(format!(
                    "EXISTS (SELECT 1 FROM object_term_relation otr \
                     JOIN term t ON otr.term_id = t.id \
                     JOIN term_i18n ti ON ti.id = t.id AND ti.culture = $1 \
                     WHERE otr.object_id = io.id AND t.taxonomy_id = {} \
                     AND ti.name ILIKE ${})",
                    taxonomy_id, p
                ));
            }
        }
        parts.push_institution(institution_id);

        parts
            .fetch_items(&self.pool, culture, "ORDER BY io.id", limit)
            .await
    }
}

#[async_trait]
impl TelemetryStore for PgDiscoveryStore {
    async fn ranking_config(
        &self,
        institution_id: Option<i64>,
    ) -> Result<Option<RankingConfig>, DiscoveryError> {
        let row = sqlx::query(
            "SELECT * FROM discovery_ranking_config \
             WHERE institution_id IS NOT DISTINCT FROM $1",
        )
        .bind(institution_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Some(row_to_ranking(&row)?));
        }

        // Institution without its own config falls back to the global row
        if institution_id.is_some() {
            let row = sqlx::query(
                "SELECT * FROM discovery_ranking_config WHERE institution_id IS NULL",
            )
            .fetch_optional(&self.pool)
            .await?;
            return row.map(|r| row_to_ranking(&r)).transpose();
        }

        Ok(None)
    }

    async fn insert_search_log(&self, log: NewSearchLog) -> Result<i64, DiscoveryError> {
        let row = sqlx::query(
            "INSERT INTO discovery_search_log \
             (institution_id, query_text, detected_language, query_intent, \
              parsed_entities, expanded_terms, filters_applied, result_count, \
              search_duration_ms, session_id, user_agent, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING id",
        )
        .bind(log.institution_id)
        .bind(&log.query_text)
        .bind(&log.detected_language)
        .bind(log.intent.as_str())
        .bind(&log.entities)
        .bind(&log.expanded_terms)
        .bind(&log.filters)
        .bind(log.result_count)
        .bind(log.duration_ms)
        .bind(&log.session_id)
        .bind(&log.user_agent)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn get_search_log(&self, id: i64) -> Result<Option<SearchLogRow>, DiscoveryError> {
        let row = sqlx::query(
            "SELECT id, institution_id, query_text, click_count, first_click_position \
             FROM discovery_search_log WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(SearchLogRow {
                id: row.try_get("id")?,
                institution_id: row.try_get("institution_id")?,
                query_text: row.try_get("query_text")?,
                click_count: row.try_get("click_count")?,
                first_click_position: row.try_get("first_click_position")?,
            })
        })
        .transpose()
    }

    async fn insert_click_log(&self, click: NewClickLog) -> Result<i64, DiscoveryError> {
        let row = sqlx::query(
            "INSERT INTO discovery_click_log \
             (search_log_id, item_id, position, time_to_click_ms, session_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(click.search_log_id)
        .bind(click.item_id)
        .bind(click.position)
        .bind(click.time_to_click_ms)
        .bind(&click.session_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn update_search_log_clicks(
        &self,
        log_id: i64,
        click_count: i64,
        first_click_position: Option<i32>,
    ) -> Result<(), DiscoveryError> {
        // COALESCE keeps the existing first_click_position when None is passed
        sqlx::query(
            "UPDATE discovery_search_log \
             SET click_count = $2, first_click_position = COALESCE($3, first_click_position) \
             WHERE id = $1",
        )
        .bind(log_id)
        .bind(click_count)
        .bind(first_click_position)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_dwell_time(
        &self,
        click_id: i64,
        dwell_seconds: i64,
    ) -> Result<(), DiscoveryError> {
        let result = sqlx::query(
            "UPDATE discovery_click_log SET dwell_time_seconds = $2 WHERE id = $1",
        )
        .bind(click_id)
        .bind(dwell_seconds)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DiscoveryError::NotFound {
                what: "click",
                id: click_id,
            });
        }

        Ok(())
    }

    async fn bump_suggestion_click(
        &self,
        query_text: &str,
        institution_id: Option<i64>,
    ) -> Result<(), DiscoveryError> {
        sqlx::query(
            "UPDATE discovery_suggestion \
             SET click_count = click_count + 1, \
                 success_rate = LEAST(1.0, (click_count + 1)::double precision \
                                          / GREATEST(1, search_count)), \
                 updated_at = $3 \
             WHERE suggestion_text = $1 AND institution_id IS NOT DISTINCT FROM $2",
        )
        .bind(query_text)
        .bind(institution_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn suggestions_with_prefix(
        &self,
        prefix: &str,
        institution_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<String>, DiscoveryError> {
        let pattern = format!(
            "{}%",
            prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let rows = sqlx::query(
            "SELECT suggestion_text FROM discovery_suggestion \
             WHERE is_enabled AND suggestion_text LIKE $1 \
             AND institution_id IS NOT DISTINCT FROM $2 AND avg_results > 0 \
             ORDER BY is_curated DESC, success_rate DESC, search_count DESC \
             LIMIT $3",
        )
        .bind(pattern)
        .bind(institution_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(row.try_get::<String, _>("suggestion_text")?))
            .collect()
    }

    async fn aggregate_query_stats(
        &self,
        institution_id: Option<i64>,
        window_days: i64,
        min_searches: i64,
        min_avg_results: f64,
        cap: i64,
    ) -> Result<Vec<QueryStats>, DiscoveryError> {
        let since = Utc::now() - chrono::Duration::days(window_days);
        let rows = sqlx::query(
            "SELECT query_text, COUNT(*) AS search_count, \
                    AVG(result_count)::double precision AS avg_results, \
                    COALESCE(SUM(click_count), 0)::bigint AS total_clicks \
             FROM discovery_search_log \
             WHERE query_text IS NOT NULL AND query_text <> '' \
             AND created_at >= $1 \
             AND ($2::bigint IS NULL OR institution_id = $2) \
             GROUP BY query_text \
             HAVING COUNT(*) >= $3 AND AVG(result_count) >= $4 \
             ORDER BY COUNT(*) DESC LIMIT $5",
        )
        .bind(since)
        .bind(institution_id)
        .bind(min_searches)
        .bind(min_avg_results)
        .bind(cap)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(QueryStats {
                    query_text: row.try_get("query_text")?,
                    search_count: row.try_get("search_count")?,
                    avg_results: row.try_get("avg_results")?,
                    total_clicks: row.try_get("total_clicks")?,
                })
            })
            .collect()
    }

    async fn upsert_suggestion(&self, s: SuggestionUpsert) -> Result<(), DiscoveryError> {
        let now = Utc::now();
        let existing = sqlx::query(
            "SELECT id FROM discovery_suggestion \
             WHERE institution_id IS NOT DISTINCT FROM $1 \
             AND suggestion_text = $2 AND suggestion_type = $3",
        )
        .bind(s.institution_id)
        .bind(&s.suggestion_text)
        .bind(&s.suggestion_type)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                sqlx::query(
                    "UPDATE discovery_suggestion \
                     SET search_count = $2, click_count = $3, success_rate = $4, \
                         avg_results = $5, last_searched_at = $6, updated_at = $6 \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(s.search_count)
                .bind(s.click_count)
                .bind(s.success_rate)
                .bind(s.avg_results)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO discovery_suggestion \
                     (institution_id, suggestion_text, suggestion_type, search_count, \
                      click_count, success_rate, avg_results, is_curated, is_enabled, \
                      last_searched_at, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, TRUE, $8, $8, $8)",
                )
                .bind(s.institution_id)
                .bind(&s.suggestion_text)
                .bind(&s.suggestion_type)
                .bind(s.search_count)
                .bind(s.click_count)
                .bind(s.success_rate)
                .bind(s.avg_results)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn co_clicked_query_pairs(
        &self,
        institution_id: Option<i64>,
        min_co_occurrence: i64,
        cap: i64,
    ) -> Result<Vec<CoClickPair>, DiscoveryError> {
        let rows = sqlx::query(
            "SELECT l1.query_text AS term, l2.query_text AS related_term, \
                    COUNT(*) AS co_occurrence \
             FROM discovery_search_log l1 \
             JOIN discovery_click_log c1 ON l1.id = c1.search_log_id \
             JOIN discovery_click_log c2 ON c1.item_id = c2.item_id \
             JOIN discovery_search_log l2 ON c2.search_log_id = l2.id \
             WHERE l1.query_text IS NOT NULL AND l2.query_text IS NOT NULL \
             AND l1.query_text <> l2.query_text AND l1.id < l2.id \
             AND ($1::bigint IS NULL OR (l1.institution_id = $1 AND l2.institution_id = $1)) \
             GROUP BY l1.query_text, l2.query_text \
             HAVING COUNT(*) >= $2 \
             ORDER BY COUNT(*) DESC LIMIT $3",
        )
        .bind(institution_id)
        .bind(min_co_occurrence)
        .bind(cap)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CoClickPair {
                    term: row.try_get("term")?,
                    related_term: row.try_get("related_term")?,
                    co_occurrence: row.try_get("co_occurrence")?,
                })
            })
            .collect()
    }

    async fn upsert_learned_term(
        &self,
        term: &str,
        related_term: &str,
        relationship_type: &str,
        confidence: f64,
        institution_id: Option<i64>,
    ) -> Result<(), DiscoveryError> {
        let now = Utc::now();
        let existing = sqlx::query(
            "SELECT id FROM discovery_learned_term \
             WHERE term = $1 AND related_term = $2 \
             AND institution_id IS NOT DISTINCT FROM $3",
        )
        .bind(term)
        .bind(related_term)
        .bind(institution_id)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                // Re-learning reinforces: keep the highest confidence seen
                sqlx::query(
                    "UPDATE discovery_learned_term \
                     SET confidence_score = GREATEST(confidence_score, $2), \
                         usage_count = usage_count + 1, updated_at = $3 \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(confidence)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO discovery_learned_term \
                     (institution_id, term, related_term, relationship_type, \
                      confidence_score, usage_count, source, is_verified, is_enabled, \
                      created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, 1, 'user_behavior', FALSE, TRUE, $6, $6)",
                )
                .bind(institution_id)
                .bind(term)
                .bind(related_term)
                .bind(relationship_type)
                .bind(confidence)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn related_terms(
        &self,
        term: &str,
        limit: i64,
    ) -> Result<Vec<LearnedTerm>, DiscoveryError> {
        let rows = sqlx::query(
            "SELECT term, related_term, relationship_type, confidence_score \
             FROM discovery_learned_term \
             WHERE term = $1 AND is_enabled \
             ORDER BY confidence_score DESC LIMIT $2",
        )
        .bind(term)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LearnedTerm {
                    term: row.try_get("term")?,
                    related_term: row.try_get("related_term")?,
                    relationship_type: row.try_get("relationship_type")?,
                    confidence: row.try_get("confidence_score")?,
                })
            })
            .collect()
    }

    async fn overall_stats(
        &self,
        institution_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<OverallStats, DiscoveryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total_searches, \
                    COUNT(DISTINCT session_id) AS unique_sessions, \
                    COALESCE(AVG(result_count), 0)::double precision AS avg_results, \
                    COALESCE(AVG(search_duration_ms), 0)::double precision AS avg_duration_ms, \
                    COALESCE(SUM(CASE WHEN result_count = 0 THEN 1 ELSE 0 END), 0)::bigint \
                        AS zero_result_searches, \
                    COALESCE(SUM(click_count), 0)::bigint AS total_clicks \
             FROM discovery_search_log \
             WHERE created_at >= $1 \
             AND ($2::bigint IS NULL OR institution_id = $2)",
        )
        .bind(since)
        .bind(institution_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(OverallStats {
            total_searches: row.try_get("total_searches")?,
            unique_sessions: row.try_get("unique_sessions")?,
            avg_results: row.try_get("avg_results")?,
            avg_duration_ms: row.try_get("avg_duration_ms")?,
            zero_result_searches: row.try_get("zero_result_searches")?,
            total_clicks: row.try_get("total_clicks")?,
        })
    }

    async fn top_queries(
        &self,
        institution_id: Option<i64>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueryCount>, DiscoveryError> {
        let rows = sqlx::query(
            "SELECT query_text, COUNT(*) AS count, \
                    AVG(result_count)::double precision AS avg_results \
             FROM discovery_search_log \
             WHERE query_text IS NOT NULL AND created_at >= $1 \
             AND ($2::bigint IS NULL OR institution_id = $2) \
             GROUP BY query_text ORDER BY COUNT(*) DESC LIMIT $3",
        )
        .bind(since)
        .bind(institution_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(QueryCount {
                    query_text: row.try_get("query_text")?,
                    count: row.try_get("count")?,
                    avg_results: row.try_get("avg_results")?,
                })
            })
            .collect()
    }

    async fn zero_result_queries(
        &self,
        institution_id: Option<i64>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueryCount>, DiscoveryError> {
        let rows = sqlx::query(
            "SELECT query_text, COUNT(*) AS count, 0.0::double precision AS avg_results \
             FROM discovery_search_log \
             WHERE query_text IS NOT NULL AND result_count = 0 AND created_at >= $1 \
             AND ($2::bigint IS NULL OR institution_id = $2) \
             GROUP BY query_text ORDER BY COUNT(*) DESC LIMIT $3",
        )
        .bind(since)
        .bind(institution_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(QueryCount {
                    query_text: row.try_get("query_text")?,
                    count: row.try_get("count")?,
                    avg_results: row.try_get("avg_results")?,
                })
            })
            .collect()
    }

    async fn searches_by_intent(
        &self,
        institution_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, i64)>, DiscoveryError> {
        let rows = sqlx::query(
            "SELECT query_intent, COUNT(*) AS count \
             FROM discovery_search_log \
             WHERE query_intent IS NOT NULL AND created_at >= $1 \
             AND ($2::bigint IS NULL OR institution_id = $2) \
             GROUP BY query_intent ORDER BY COUNT(*) DESC",
        )
        .bind(since)
        .bind(institution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("query_intent")?, row.try_get("count")?)))
            .collect()
    }

    async fn searches_by_day(
        &self,
        institution_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<Vec<(NaiveDate, i64)>, DiscoveryError> {
        let rows = sqlx::query(
            "SELECT created_at::date AS day, COUNT(*) AS count \
             FROM discovery_search_log \
             WHERE created_at >= $1 \
             AND ($2::bigint IS NULL OR institution_id = $2) \
             GROUP BY created_at::date ORDER BY day",
        )
        .bind(since)
        .bind(institution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("day")?, row.try_get("count")?)))
            .collect()
    }

    async fn delete_logs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<CleanupCounts, DiscoveryError> {
        let clicks = sqlx::query("DELETE FROM discovery_click_log WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let logs = sqlx::query("DELETE FROM discovery_search_log WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(CleanupCounts {
            clicks_deleted: clicks.rows_affected(),
            logs_deleted: logs.rows_affected(),
        })
    }
}
