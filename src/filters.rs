/// Facet filter translation layer
///
/// The facet UI sends a map of facet-code -> selected values. A FilterService
/// turns that map into typed store-level conditions. The production facet
/// layer lives in the host platform; this module defines the seam plus a
/// small built-in implementation covering the standard facet codes.
///
/// Unknown facet codes and malformed values are skipped, never errors — a
/// bad filter payload must degrade to a broader search, not a failure.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::errors::DiscoveryError;

/// An inclusive date range resolved from a time reference or date facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Which taxonomy a taxonomy condition joins against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxonomyKind {
    MediaType,
    Subject,
    Place,
}

/// A selected taxonomy term: either a resolved id or a display name that the
/// store resolves at query time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermSelector {
    Id(i64),
    Name(String),
}

/// Scalar catalog fields addressable by field conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Repository,
    LevelOfDescription,
}

/// A single store-level predicate derived from one applied facet.
#[derive(Debug, Clone)]
pub enum FilterCondition {
    /// Join on the term-relation table and restrict to the selected terms.
    Taxonomy {
        kind: TaxonomyKind,
        terms: Vec<TermSelector>,
    },
    /// Restrict a scalar catalog field to the selected values.
    Field {
        field: FilterField,
        values: Vec<i64>,
    },
    /// Join on the event table and match any of the ranges.
    DateRange { ranges: Vec<DateRange> },
}

/// Display metadata for one facet, surfaced alongside search results.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FacetDefinition {
    pub code: String,
    pub label: String,
    pub icon: Option<String>,
    pub show_in_search: bool,
}

/// Seam between the discovery pipeline and the host platform's facet layer.
#[async_trait]
pub trait FilterService: Send + Sync {
    /// Translate applied facet selections into store-level conditions.
    async fn build_conditions(
        &self,
        applied: &HashMap<String, Vec<String>>,
        institution_id: Option<i64>,
    ) -> Result<Vec<FilterCondition>, DiscoveryError>;

    /// Facet definitions enabled for the given institution scope.
    async fn enabled_facets(
        &self,
        institution_id: Option<i64>,
    ) -> Result<Vec<FacetDefinition>, DiscoveryError>;
}

/// Built-in FilterService wiring the standard facet codes.
///
/// Deployments with institution-configurable facets supply their own
/// implementation; this one covers content_type, subject, place, and
/// repository with fixed labels.
pub struct BasicFilterService;

impl BasicFilterService {
    fn parse_terms(values: &[String]) -> Vec<TermSelector> {
        values
            .iter()
            .filter(|v| !v.trim().is_empty())
            .map(|v| match v.trim().parse::<i64>() {
                Ok(id) => TermSelector::Id(id),
                Err(_) => TermSelector::Name(v.trim().to_string()),
            })
            .collect()
    }

    fn parse_ids(values: &[String]) -> Vec<i64> {
        // Non-numeric values for an id-valued facet are dropped
        values.iter().filter_map(|v| v.trim().parse().ok()).collect()
    }
}

#[async_trait]
impl FilterService for BasicFilterService {
    async fn build_conditions(
        &self,
        applied: &HashMap<String, Vec<String>>,
        _institution_id: Option<i64>,
    ) -> Result<Vec<FilterCondition>, DiscoveryError> {
        let mut conditions = Vec::new();

        for (code, values) in applied {
            if values.is_empty() {
                continue;
            }
            match code.as_str() {
                "content_type" => conditions.push(FilterCondition::Taxonomy {
                    kind: TaxonomyKind::MediaType,
                    terms: Self::parse_terms(values),
                }),
                "subject" => conditions.push(FilterCondition::Taxonomy {
                    kind: TaxonomyKind::Subject,
                    terms: Self::parse_terms(values),
                }),
                "place" => conditions.push(FilterCondition::Taxonomy {
                    kind: TaxonomyKind::Place,
                    terms: Self::parse_terms(values),
                }),
                "repository" => {
                    let ids = Self::parse_ids(values);
                    if !ids.is_empty() {
                        conditions.push(FilterCondition::Field {
                            field: FilterField::Repository,
                            values: ids,
                        });
                    }
                }
                other => {
                    tracing::debug!(code = other, "Skipping unknown facet code");
                }
            }
        }

        Ok(conditions)
    }

    async fn enabled_facets(
        &self,
        _institution_id: Option<i64>,
    ) -> Result<Vec<FacetDefinition>, DiscoveryError> {
        Ok(vec![
            FacetDefinition {
                code: "content_type".to_string(),
                label: "Content type".to_string(),
                icon: Some("category".to_string()),
                show_in_search: true,
            },
            FacetDefinition {
                code: "subject".to_string(),
                label: "Subject".to_string(),
                icon: Some("tag".to_string()),
                show_in_search: true,
            },
            FacetDefinition {
                code: "place".to_string(),
                label: "Place".to_string(),
                icon: Some("map-pin".to_string()),
                show_in_search: true,
            },
            FacetDefinition {
                code: "repository".to_string(),
                label: "Institution".to_string(),
                icon: Some("building".to_string()),
                show_in_search: true,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, vs)| {
                (
                    k.to_string(),
                    vs.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_content_type_by_name_and_id() {
        let svc = BasicFilterService;
        let conditions = svc
            .build_conditions(&applied(&[("content_type", &["Map", "52"])]), None)
            .await
            .unwrap();

        assert_eq!(conditions.len(), 1);
        match &conditions[0] {
            FilterCondition::Taxonomy { kind, terms } => {
                assert_eq!(*kind, TaxonomyKind::MediaType);
                assert_eq!(terms.len(), 2);
                assert_eq!(terms[0], TermSelector::Name("Map".to_string()));
                assert_eq!(terms[1], TermSelector::Id(52));
            }
            other => panic!("unexpected condition: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_code_is_skipped() {
        let svc = BasicFilterService;
        let conditions = svc
            .build_conditions(&applied(&[("no_such_facet", &["x"])]), None)
            .await
            .unwrap();
        assert!(conditions.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_repository_ids_are_dropped() {
        let svc = BasicFilterService;
        let conditions = svc
            .build_conditions(&applied(&[("repository", &["7", "not-a-number"])]), None)
            .await
            .unwrap();
        assert_eq!(conditions.len(), 1);
        match &conditions[0] {
            FilterCondition::Field { field, values } => {
                assert_eq!(*field, FilterField::Repository);
                assert_eq!(values, &vec![7]);
            }
            other => panic!("unexpected condition: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_malformed_repository_values_yield_no_condition() {
        let svc = BasicFilterService;
        let conditions = svc
            .build_conditions(&applied(&[("repository", &["abc"])]), None)
            .await
            .unwrap();
        assert!(conditions.is_empty());
    }
}
