/// Entity extraction: persons, organizations, places, formats, subjects
///
/// Pattern-based extractors are pure; persons, places, and subjects are also
/// resolved against the catalog's authority and taxonomy tables. Catalog
/// lookup failures degrade the entity list, never the parse: errors are
/// logged at warn and the failing extractor contributes nothing.

use regex::Regex;
use tracing::warn;

use super::{Entity, EntityType};
use crate::store::CatalogStore;

/// Query-term spellings mapped to canonical media-type term names.
const FORMAT_MAP: &[(&str, &str)] = &[
    ("photo", "Photograph"),
    ("photos", "Photograph"),
    ("photograph", "Photograph"),
    ("photographs", "Photograph"),
    ("picture", "Photograph"),
    ("pictures", "Photograph"),
    ("image", "Photograph"),
    ("images", "Photograph"),
    ("map", "Map"),
    ("maps", "Map"),
    ("letter", "Correspondence"),
    ("letters", "Correspondence"),
    ("document", "Textual record"),
    ("documents", "Textual record"),
    ("video", "Moving image"),
    ("videos", "Moving image"),
    ("film", "Moving image"),
    ("films", "Moving image"),
    ("audio", "Sound recording"),
    ("recording", "Sound recording"),
    ("recordings", "Sound recording"),
    ("newspaper", "Newspaper"),
    ("newspapers", "Newspaper"),
    ("poster", "Graphic material"),
    ("posters", "Graphic material"),
    ("drawing", "Graphic material"),
    ("drawings", "Graphic material"),
    ("painting", "Graphic material"),
    ("artifact", "Object"),
    ("artefact", "Object"),
    ("object", "Object"),
];

/// Extract all entities from the raw (un-normalized) query text.
///
/// The raw text is required because person/place patterns key off
/// capitalization. `keywords` feed the subject lookup.
pub async fn extract_entities(
    catalog: &dyn CatalogStore,
    query: &str,
    keywords: &[String],
    culture: &str,
) -> Vec<Entity> {
    let mut entities = Vec::new();

    entities.extend(extract_persons(catalog, query, culture).await);
    entities.extend(extract_organizations(query));
    entities.extend(extract_places(catalog, query, culture).await);
    entities.extend(extract_formats(query));
    entities.extend(extract_subjects(catalog, keywords, culture).await);

    entities
}

async fn extract_persons(catalog: &dyn CatalogStore, query: &str, culture: &str) -> Vec<Entity> {
    let mut entities = Vec::new();

    // "by [Name]"
    if let Ok(re) = Regex::new(r"\bby\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)") {
        if let Some(cap) = re.captures(query) {
            entities.push(Entity {
                entity_type: EntityType::Person,
                value: cap[1].to_string(),
                id: None,
                confidence: 0.8,
                matched_term: None,
            });
        }
    }

    // Possessive: "[Name]'s"
    if let Ok(re) = Regex::new(r"([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)'s?\b") {
        if let Some(cap) = re.captures(query) {
            entities.push(Entity {
                entity_type: EntityType::Person,
                value: cap[1].to_string(),
                id: None,
                confidence: 0.7,
                matched_term: None,
            });
        }
    }

    // Authority-file matches on capitalized words
    let proper_nouns = proper_nouns(query);
    if !proper_nouns.is_empty() {
        match catalog.match_actors(&proper_nouns, culture, 5).await {
            Ok(actors) => {
                for actor in actors {
                    entities.push(Entity {
                        entity_type: EntityType::Person,
                        value: actor.name,
                        id: Some(actor.id),
                        confidence: 0.9,
                        matched_term: None,
                    });
                }
            }
            Err(e) => warn!(error = %e, "Actor lookup failed, skipping"),
        }
    }

    entities
}

fn extract_organizations(query: &str) -> Vec<Entity> {
    let mut entities = Vec::new();

    let keyword_re = Regex::new(
        r"(?i)\b(company|corporation|corp|inc|ltd|limited|association|society|institute|university|college|school|museum|library|archive|department|ministry|government)\b",
    );
    let capture_re = Regex::new(
        r"(?i)([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\s+(?:company|corporation|corp|inc|ltd|limited|association|society|institute|university|college|school|museum|library|archive))",
    );

    if let (Ok(keyword_re), Ok(capture_re)) = (keyword_re, capture_re) {
        if keyword_re.is_match(query) {
            if let Some(cap) = capture_re.captures(query) {
                entities.push(Entity {
                    entity_type: EntityType::Organization,
                    value: cap[1].to_string(),
                    id: None,
                    confidence: 0.75,
                    matched_term: None,
                });
            }
        }
    }

    entities
}

async fn extract_places(catalog: &dyn CatalogStore, query: &str, culture: &str) -> Vec<Entity> {
    let mut entities = Vec::new();

    // "in/from/at/near [Place]"
    if let Ok(re) = Regex::new(r"\b(?:in|from|at|near)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)") {
        if let Some(cap) = re.captures(query) {
            entities.push(Entity {
                entity_type: EntityType::Place,
                value: cap[1].to_string(),
                id: None,
                confidence: 0.75,
                matched_term: None,
            });
        }
    }

    match catalog.match_place_terms(query, culture, 5).await {
        Ok(places) => {
            for place in places {
                entities.push(Entity {
                    entity_type: EntityType::Place,
                    value: place.name,
                    id: Some(place.id),
                    confidence: 0.85,
                    matched_term: None,
                });
            }
        }
        Err(e) => warn!(error = %e, "Place lookup failed, skipping"),
    }

    entities
}

fn extract_formats(query: &str) -> Vec<Entity> {
    let lower = query.to_lowercase();

    for (term, format) in FORMAT_MAP {
        let pattern = format!(r"\b{}\b", term);
        if let Ok(re) = Regex::new(&pattern) {
            if re.is_match(&lower) {
                // First match only; the map's own order breaks ties
                return vec![Entity {
                    entity_type: EntityType::Format,
                    value: format.to_string(),
                    id: None,
                    confidence: 0.9,
                    matched_term: Some(term.to_string()),
                }];
            }
        }
    }

    Vec::new()
}

async fn extract_subjects(
    catalog: &dyn CatalogStore,
    keywords: &[String],
    culture: &str,
) -> Vec<Entity> {
    if keywords.is_empty() {
        return Vec::new();
    }

    match catalog.match_subject_terms(keywords, culture, 10).await {
        Ok(subjects) => subjects
            .into_iter()
            .map(|subject| Entity {
                entity_type: EntityType::Subject,
                value: subject.name,
                id: Some(subject.id),
                confidence: 0.85,
                matched_term: None,
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "Subject lookup failed, skipping");
            Vec::new()
        }
    }
}

/// Whitespace-split words of the form Capitalized-then-lowercase.
fn proper_nouns(query: &str) -> Vec<String> {
    let re = match Regex::new(r"^[A-Z][a-z]+$") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    query
        .split_whitespace()
        .filter(|w| re.is_match(w))
        .map(|w| w.to_string())
        .collect()
}
