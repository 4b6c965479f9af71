/// Query understanding pipeline
///
/// Turns free-text user queries into a structured ParsedQuery: detected
/// language, classified intent, extracted entities, resolved time references,
/// stop-word-filtered keywords, quoted phrases, behavioral term expansions,
/// and filters derived from the entities. Pattern passes are deterministic;
/// only entity resolution and term expansion touch the stores, and both
/// degrade to empty on failure.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::filters::DateRange;
use crate::store::{CatalogStore, TelemetryStore};

pub mod entities;
pub mod intent;
pub mod temporal;

/// What the user is trying to do, classified from query phrasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Find,
    Explore,
    Identify,
    Compare,
    Trace,
    Locate,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Find => "find",
            Intent::Explore => "explore",
            Intent::Identify => "identify",
            Intent::Compare => "compare",
            Intent::Trace => "trace",
            Intent::Locate => "locate",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of thing an extracted entity names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Organization,
    Place,
    Subject,
    Format,
}

/// One extracted entity. `id` is set when the value resolved against an
/// authority or taxonomy record; `matched_term` records the query spelling
/// that triggered a format mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_term: Option<String>,
}

/// Granularity of a parsed time reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRefKind {
    Year,
    Decade,
    Range,
    Century,
    Era,
}

/// A time expression resolved to an inclusive date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeReference {
    pub kind: TimeRefKind,
    /// The surface form as it appeared (or its canonical lexicon key)
    pub value: String,
    pub start: chrono::NaiveDate,
    pub end: chrono::NaiveDate,
}

/// One behaviorally learned expansion of a query term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandedTerm {
    pub term: String,
    pub relationship: String,
    pub confidence: f64,
    pub source_term: String,
}

/// Filters derived from extracted entities and time references. Entity kinds
/// without a resolved id contribute nothing except formats, which filter by
/// canonical name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedFilters {
    pub content_type: Vec<String>,
    pub creator: Vec<i64>,
    pub place: Vec<i64>,
    pub subject: Vec<i64>,
    pub time_ranges: Vec<DateRange>,
}

impl DerivedFilters {
    pub fn is_empty(&self) -> bool {
        self.content_type.is_empty()
            && self.creator.is_empty()
            && self.place.is_empty()
            && self.subject.is_empty()
            && self.time_ranges.is_empty()
    }
}

/// The full structured understanding of one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub original_query: String,
    pub normalized_query: String,
    pub language: String,
    pub intent: Intent,
    pub entities: Vec<Entity>,
    pub time_references: Vec<TimeReference>,
    pub keywords: Vec<String>,
    pub phrases: Vec<String>,
    pub expanded_terms: Vec<ExpandedTerm>,
    pub filters: DerivedFilters,
}

/// Stop words removed from the keyword list. Includes search-speak
/// ("show", "find", "looking") on top of the usual function words.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
    "dare", "ought", "used", "this", "that", "these", "those", "i", "you", "he", "she", "it",
    "we", "they", "what", "which", "who", "whom", "show", "me", "find", "search", "looking",
    "want", "see", "about", "any", "all", "some", "no", "not", "only", "own", "same", "so",
    "than", "too", "very", "just", "also", "now", "here", "there",
];

/// Query understanding service. Pattern passes need no I/O; the stores are
/// consulted for authority resolution and learned-term expansion.
pub struct QueryUnderstanding {
    catalog: Arc<dyn CatalogStore>,
    telemetry: Arc<dyn TelemetryStore>,
    culture: String,
}

impl QueryUnderstanding {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        telemetry: Arc<dyn TelemetryStore>,
        culture: String,
    ) -> Self {
        QueryUnderstanding {
            catalog,
            telemetry,
            culture,
        }
    }

    /// Parse a raw user query into its structured form.
    pub async fn parse(&self, query: &str) -> ParsedQuery {
        let query = query.trim();

        if query.is_empty() {
            return self.empty_result();
        }

        let keywords = extract_keywords(query);
        let entities =
            entities::extract_entities(self.catalog.as_ref(), query, &keywords, &self.culture)
                .await;
        let time_references = temporal::parse_time_references(query);
        let expanded_terms = self.expand_terms(&keywords, &entities).await;
        let filters = derive_filters(&entities, &time_references);

        let parsed = ParsedQuery {
            original_query: query.to_string(),
            normalized_query: normalize_query(query),
            language: self.detect_language(query),
            intent: intent::classify_intent(query),
            entities,
            time_references,
            keywords,
            phrases: extract_phrases(query),
            expanded_terms,
            filters,
        };

        debug!(
            query = parsed.original_query,
            intent = %parsed.intent,
            entities = parsed.entities.len(),
            keywords = parsed.keywords.len(),
            expansions = parsed.expanded_terms.len(),
            "Parsed query"
        );

        parsed
    }

    /// Structured form of the empty query: a browse request.
    fn empty_result(&self) -> ParsedQuery {
        ParsedQuery {
            original_query: String::new(),
            normalized_query: String::new(),
            language: self.culture.clone(),
            intent: Intent::Explore,
            entities: Vec::new(),
            time_references: Vec::new(),
            keywords: Vec::new(),
            phrases: Vec::new(),
            expanded_terms: Vec::new(),
            filters: DerivedFilters::default(),
        }
    }

    /// Heuristic language detection: Afrikaans function/content words flip
    /// the result to "af", anything else falls back to the base culture.
    fn detect_language(&self, query: &str) -> String {
        let patterns = [
            r"(?i)\b(van|die|en|met|vir|nie|het|sal|was|kan|deur)\b",
            r"(?i)\b(foto|dokument|ou|nuwe)\b",
        ];

        for pattern in patterns {
            if let Ok(re) = Regex::new(pattern) {
                if re.is_match(query) {
                    return "af".to_string();
                }
            }
        }

        self.culture.clone()
    }

    /// Expand keywords and entity values through the learned vocabulary.
    /// Deduplicated by expansion term, first position kept, latest source
    /// wins. Store failures skip the term.
    async fn expand_terms(&self, keywords: &[String], entities: &[Entity]) -> Vec<ExpandedTerm> {
        let mut expanded: Vec<ExpandedTerm> = Vec::new();

        let terms = keywords
            .iter()
            .cloned()
            .chain(entities.iter().map(|e| e.value.clone()));

        for term in terms {
            let related = match self.telemetry.related_terms(&term.to_lowercase(), 5).await {
                Ok(related) => related,
                Err(e) => {
                    warn!(term, error = %e, "Term expansion lookup failed, skipping");
                    continue;
                }
            };

            for rel in related {
                let entry = ExpandedTerm {
                    term: rel.related_term,
                    relationship: rel.relationship_type,
                    confidence: rel.confidence,
                    source_term: term.clone(),
                };
                match expanded.iter_mut().find(|e| e.term == entry.term) {
                    Some(existing) => *existing = entry,
                    None => expanded.push(entry),
                }
            }
        }

        expanded
    }
}

/// Lowercase, collapse whitespace, strip special characters except quotes,
/// hyphens, and dots.
pub fn normalize_query(query: &str) -> String {
    let lower = query.to_lowercase();

    let collapsed = match Regex::new(r"\s+") {
        Ok(re) => re.replace_all(&lower, " ").into_owned(),
        Err(_) => lower,
    };

    let cleaned = match Regex::new(r#"[^\w\s'".-]"#) {
        Ok(re) => re.replace_all(&collapsed, "").into_owned(),
        Err(_) => collapsed,
    };

    cleaned.trim().to_string()
}

/// Split on whitespace/punctuation, drop stop words, single characters,
/// and numeric tokens.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();

    let splitter = match Regex::new(r#"[\s,.;:!?'"()\[\]{}]+"#) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    splitter
        .split(&lower)
        .filter(|word| {
            word.len() > 1 && !STOP_WORDS.contains(word) && !is_numeric_token(word)
        })
        .map(|word| word.to_string())
        .collect()
}

/// Years and decade tokens ("1950", "1950s", "50s") are dropped from the
/// keyword list; the temporal pass owns them.
fn is_numeric_token(word: &str) -> bool {
    let digits = word.strip_suffix('s').unwrap_or(word);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Quoted phrases (double or single quotes), in order of appearance.
pub fn extract_phrases(query: &str) -> Vec<String> {
    let re = match Regex::new(r#""([^"]+)"|'([^']+)'"#) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    re.captures_iter(query)
        .filter_map(|cap| {
            cap.get(1)
                .or_else(|| cap.get(2))
                .map(|m| m.as_str().to_string())
        })
        .filter(|p| !p.is_empty())
        .collect()
}

/// Map entities and time references to typed filters. Persons, places, and
/// subjects require a resolved id; organizations never derive filters.
fn derive_filters(entities: &[Entity], time_refs: &[TimeReference]) -> DerivedFilters {
    let mut filters = DerivedFilters::default();

    for entity in entities {
        match entity.entity_type {
            EntityType::Format => filters.content_type.push(entity.value.clone()),
            EntityType::Person => {
                if let Some(id) = entity.id {
                    filters.creator.push(id);
                }
            }
            EntityType::Place => {
                if let Some(id) = entity.id {
                    filters.place.push(id);
                }
            }
            EntityType::Subject => {
                if let Some(id) = entity.id {
                    filters.subject.push(id);
                }
            }
            EntityType::Organization => {}
        }
    }

    filters.time_ranges = time_refs
        .iter()
        .map(|r| DateRange {
            start: r.start,
            end: r.end,
        })
        .collect();

    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_normalize_query() {
        assert_eq!(
            normalize_query("  Cape   Town  PHOTOS! "),
            "cape town photos"
        );
        assert_eq!(normalize_query(r#""Table Bay" c.1900"#), r#""table bay" c.1900"#);
    }

    #[test]
    fn test_extract_keywords_drops_stop_words() {
        assert_eq!(
            extract_keywords("show me all the photographs of Cape Town"),
            vec!["photographs", "cape", "town"]
        );
    }

    #[test]
    fn test_extract_keywords_drops_time_tokens() {
        // Years and decades belong to the temporal pass
        assert_eq!(
            extract_keywords("1950s photographs Cape Town"),
            vec!["photographs", "cape", "town"]
        );
        assert_eq!(extract_keywords("records from 1923"), vec!["records"]);
        assert_eq!(extract_keywords("music of the 60s"), vec!["music"]);
    }

    #[test]
    fn test_extract_keywords_drops_single_characters() {
        assert_eq!(extract_keywords("x harbour y"), vec!["harbour"]);
    }

    #[test]
    fn test_extract_phrases_in_order() {
        assert_eq!(
            extract_phrases(r#"maps of "Table Bay" near 'Robben Island'"#),
            vec!["Table Bay", "Robben Island"]
        );
    }

    #[test]
    fn test_extract_phrases_none() {
        assert!(extract_phrases("no quotes here").is_empty());
    }

    #[test]
    fn test_derive_filters_requires_ids_except_format() {
        let entities = vec![
            Entity {
                entity_type: EntityType::Format,
                value: "Photograph".to_string(),
                id: None,
                confidence: 0.9,
                matched_term: Some("photographs".to_string()),
            },
            Entity {
                entity_type: EntityType::Person,
                value: "John Smith".to_string(),
                id: None,
                confidence: 0.7,
                matched_term: None,
            },
            Entity {
                entity_type: EntityType::Person,
                value: "John Smith".to_string(),
                id: Some(42),
                confidence: 0.9,
                matched_term: None,
            },
            Entity {
                entity_type: EntityType::Place,
                value: "Cape Town".to_string(),
                id: Some(7),
                confidence: 0.85,
                matched_term: None,
            },
            Entity {
                entity_type: EntityType::Organization,
                value: "Standard Bank Company".to_string(),
                id: None,
                confidence: 0.75,
                matched_term: None,
            },
        ];
        let time_refs = vec![TimeReference {
            kind: TimeRefKind::Decade,
            value: "1950s".to_string(),
            start: NaiveDate::from_ymd_opt(1950, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(1959, 12, 31).unwrap(),
        }];

        let filters = derive_filters(&entities, &time_refs);
        assert_eq!(filters.content_type, vec!["Photograph"]);
        assert_eq!(filters.creator, vec![42]);
        assert_eq!(filters.place, vec![7]);
        assert!(filters.subject.is_empty());
        assert_eq!(filters.time_ranges.len(), 1);
        assert_eq!(
            filters.time_ranges[0].start,
            NaiveDate::from_ymd_opt(1950, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_is_numeric_token() {
        assert!(is_numeric_token("1950"));
        assert!(is_numeric_token("1950s"));
        assert!(is_numeric_token("50s"));
        assert!(!is_numeric_token("s"));
        assert!(!is_numeric_token("v2"));
        assert!(!is_numeric_token("harbour"));
    }
}
