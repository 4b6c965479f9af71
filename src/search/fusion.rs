/// Result fusion and ranking
///
/// Scores merged candidates on three axes — relevance (query match), quality
/// (record completeness), engagement (usage and freshness) — blends them
/// 0.6/0.25/0.15, applies the featured boost, and ranks descending. Also owns
/// near-duplicate title collapsing and the publication access filter.
///
/// All scoring is pure: the ranking config is snapshotted at construction and
/// the clock is passed in, so identical inputs always rank identically.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::query::ParsedQuery;
use crate::store::{CatalogItem, RankingConfig};

/// A candidate with its per-axis and blended scores attached.
#[derive(Debug, Clone)]
pub struct ScoredResult {
    pub item: CatalogItem,
    pub relevance: f64,
    pub quality: f64,
    pub engagement: f64,
    pub final_score: f64,
}

/// Who is looking at the results, for publication filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    Authenticated,
    Administrator,
}

pub struct ResultFusion {
    config: RankingConfig,
}

impl ResultFusion {
    pub fn new(config: RankingConfig) -> Self {
        ResultFusion { config }
    }

    /// Score and rank candidates descending by blended score. Input is
    /// already id-deduplicated by the orchestrator's merge.
    pub fn fuse(
        &self,
        items: Vec<CatalogItem>,
        parsed: &ParsedQuery,
        now: DateTime<Utc>,
    ) -> Vec<ScoredResult> {
        let mut scored: Vec<ScoredResult> = items
            .into_iter()
            .map(|item| {
                let relevance = self.relevance_score(&item, parsed);
                let quality = self.quality_score(&item);
                let engagement = self.engagement_score(&item, now);
                let final_score = self.final_score(relevance, quality, engagement, item.is_featured);
                ScoredResult {
                    item,
                    relevance,
                    quality,
                    engagement,
                    final_score,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(Ordering::Equal)
        });

        scored
    }

    /// Query-match score in [0, 1]. Browse queries (no keywords, no phrases)
    /// score a neutral 0.5 so quality and engagement decide the order.
    pub fn relevance_score(&self, item: &CatalogItem, parsed: &ParsedQuery) -> f64 {
        let keywords = &parsed.keywords;
        let phrases = &parsed.phrases;

        if keywords.is_empty() && phrases.is_empty() {
            return 0.5;
        }

        let title = item.title.as_deref().unwrap_or("").to_lowercase();
        let content = item.scope_and_content.as_deref().unwrap_or("").to_lowercase();
        let identifier = item.identifier.as_deref().unwrap_or("").to_lowercase();

        let mut score = 0.0;

        for kw in keywords {
            let kw = kw.to_lowercase();
            if title.contains(&kw) {
                score += self.config.weight_title_match;
            }
            if content.contains(&kw) {
                score += self.config.weight_content_match;
            }
            if identifier.contains(&kw) {
                score += self.config.weight_identifier_match;
            }
        }

        for phrase in phrases {
            let phrase = phrase.to_lowercase();
            if title.contains(&phrase) {
                score += 1.5;
            }
            if content.contains(&phrase) {
                score += 1.0;
            }
        }

        // Normalization denominators assume default field weights; kept
        // stable so stored ranking configs stay comparable across releases
        let max_possible = keywords.len() as f64 * 2.6 + phrases.len() as f64 * 2.5;

        if max_possible > 0.0 {
            (score / max_possible).min(1.0)
        } else {
            0.5
        }
    }

    /// Record-completeness score in [0, 1].
    pub fn quality_score(&self, item: &CatalogItem) -> f64 {
        let mut score = 0.0;

        if item.thumbnail_path.as_deref().is_some_and(|p| !p.is_empty()) {
            score += self.config.weight_has_digital_object;
        }

        let desc_length = item.scope_and_content.as_deref().unwrap_or("").len();
        if desc_length > 500 {
            score += self.config.weight_description_length;
        } else if desc_length > 100 {
            score += self.config.weight_description_length * 0.5;
        }

        if item.start_date.is_some() {
            score += self.config.weight_has_dates;
        }

        if item.has_subjects {
            score += self.config.weight_has_subjects;
        }

        // Missing or trivially short titles mark an incomplete record
        if item.title.as_deref().unwrap_or("").len() < 5 {
            score *= self.config.penalty_incomplete;
        }

        score.min(1.0)
    }

    /// Usage-and-freshness score in [0, 1].
    pub fn engagement_score(&self, item: &CatalogItem, now: DateTime<Utc>) -> f64 {
        let mut score = 0.0;

        if item.view_count > 100 {
            score += self.config.weight_view_count;
        } else if item.view_count > 10 {
            score += self.config.weight_view_count * 0.5;
        }

        if item.download_count > 10 {
            score += self.config.weight_download_count;
        }

        let days_old = (now - item.updated_at).num_seconds() as f64 / 86_400.0;
        let decay_days = self.config.freshness_decay_days;
        let recent_bonus = self.config.boost_recent - 1.0;
        if days_old < 30.0 {
            score += recent_bonus;
        } else if days_old < decay_days {
            score += recent_bonus * (1.0 - days_old / decay_days);
        }

        score.min(1.0)
    }

    fn final_score(&self, relevance: f64, quality: f64, engagement: f64, is_featured: bool) -> f64 {
        let mut score = relevance * 0.6 + quality * 0.25 + engagement * 0.15;

        if is_featured {
            score *= self.config.boost_featured;
        }

        score
    }
}

/// Collapse near-duplicate titles: a result whose lowercased title is more
/// than `threshold` similar to any earlier (higher-ranked) title is dropped.
pub fn deduplicate(results: Vec<ScoredResult>, threshold: f64) -> Vec<ScoredResult> {
    let mut seen: Vec<String> = Vec::new();
    let mut unique = Vec::new();

    for result in results {
        let title = result.item.title.as_deref().unwrap_or("").to_lowercase();

        let is_duplicate = seen.iter().any(|s| text_similarity(&title, s) > threshold);

        if !is_duplicate {
            seen.push(title);
            unique.push(result);
        }
    }

    unique
}

/// Drop results the viewer may not see. Published items are always visible;
/// administrators see everything; unpublished items are hidden from
/// anonymous viewers only.
pub fn apply_access_filter(results: Vec<ScoredResult>, viewer: Viewer) -> Vec<ScoredResult> {
    results
        .into_iter()
        .filter(|r| {
            if r.item.is_published {
                return true;
            }
            match viewer {
                Viewer::Administrator => true,
                Viewer::Authenticated => true,
                Viewer::Anonymous => false,
            }
        })
        .collect()
}

/// Percentage similarity of two strings in [0, 1]:
/// 2 × matched / (len(a) + len(b)), where matched counts the longest common
/// substring plus the recursively matched chars on either side of it.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let matched = similar_chars(a.as_bytes(), b.as_bytes());
    2.0 * matched as f64 / (a.len() + b.len()) as f64
}

fn similar_chars(a: &[u8], b: &[u8]) -> usize {
    let mut max = 0;
    let mut pos_a = 0;
    let mut pos_b = 0;

    for i in 0..a.len() {
        for j in 0..b.len() {
            let mut k = 0;
            while i + k < a.len() && j + k < b.len() && a[i + k] == b[j + k] {
                k += 1;
            }
            if k > max {
                max = k;
                pos_a = i;
                pos_b = j;
            }
        }
    }

    if max == 0 {
        return 0;
    }

    max + similar_chars(&a[..pos_a], &b[..pos_b])
        + similar_chars(&a[pos_a + max..], &b[pos_b + max..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{DerivedFilters, Intent, ParsedQuery};
    use chrono::TimeZone;

    fn item(id: i64, title: &str) -> CatalogItem {
        CatalogItem {
            id,
            slug: format!("item-{}", id),
            identifier: None,
            title: if title.is_empty() {
                None
            } else {
                Some(title.to_string())
            },
            scope_and_content: None,
            extent_and_medium: None,
            level_of_description: None,
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

    fn parsed(keywords: &[&str], phrases: &[&str]) -> ParsedQuery {
        ParsedQuery {
            original_query: keywords.join(" "),
            normalized_query: keywords.join(" "),
            language: "en".to_string(),
            intent: Intent::Find,
            entities: Vec::new(),
            time_references: Vec::new(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
            expanded_terms: Vec::new(),
            filters: DerivedFilters::default(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_browse_relevance_is_neutral() {
        let fusion = ResultFusion::new(RankingConfig::default());
        let score = fusion.relevance_score(&item(1, "Harbour works"), &parsed(&[], &[]));
        assert_eq!(score, 0.5);
    }

    #[test]
    fn test_relevance_title_beats_content() {
        let fusion = ResultFusion::new(RankingConfig::default());
        let query = parsed(&["harbour"], &[]);

        let title_hit = item(1, "Cape Town harbour");
        let mut content_hit = item(2, "Dock improvements");
        content_hit.scope_and_content = Some("Plans for the harbour extension".to_string());

        assert!(
            fusion.relevance_score(&title_hit, &query)
                > fusion.relevance_score(&content_hit, &query)
        );
    }

    #[test]
    fn test_relevance_clamped_to_one() {
        let fusion = ResultFusion::new(RankingConfig::default());
        // Keyword hits title, content, and identifier plus a title+content
        // phrase hit: raw score exceeds the normalization ceiling
        let mut it = item(1, "harbour");
        it.scope_and_content = Some("the harbour".to_string());
        it.identifier = Some("HARBOUR-1".to_string());
        let query = parsed(&["harbour"], &["harbour"]);
        assert_eq!(fusion.relevance_score(&it, &query), 1.0);
    }

    #[test]
    fn test_quality_incomplete_penalty() {
        let fusion = ResultFusion::new(RankingConfig::default());

        let mut complete = item(1, "Harbour engineering drawings");
        complete.has_subjects = true;
        let mut incomplete = item(2, "Map");
        incomplete.has_subjects = true;

        let q_complete = fusion.quality_score(&complete);
        let q_incomplete = fusion.quality_score(&incomplete);
        assert!((q_incomplete - q_complete * 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_quality_description_length_tiers() {
        let fusion = ResultFusion::new(RankingConfig::default());

        let mut long = item(1, "Harbour records");
        long.scope_and_content = Some("x".repeat(501));
        let mut medium = item(2, "Harbour records");
        medium.scope_and_content = Some("x".repeat(200));
        let short = item(3, "Harbour records");

        assert!((fusion.quality_score(&long) - 0.2).abs() < 1e-9);
        assert!((fusion.quality_score(&medium) - 0.1).abs() < 1e-9);
        assert_eq!(fusion.quality_score(&short), 0.0);
    }

    #[test]
    fn test_engagement_freshness_decay() {
        let fusion = ResultFusion::new(RankingConfig::default());
        let now = now();

        let mut fresh = item(1, "Harbour records");
        fresh.updated_at = now - chrono::Duration::days(10);
        let mut mid = item(2, "Harbour records");
        mid.updated_at = now - chrono::Duration::days(180);
        let mut stale = item(3, "Harbour records");
        stale.updated_at = now - chrono::Duration::days(400);

        let e_fresh = fusion.engagement_score(&fresh, now);
        let e_mid = fusion.engagement_score(&mid, now);
        let e_stale = fusion.engagement_score(&stale, now);

        // boost_recent 1.1 -> full bonus 0.1 under 30 days
        assert!((e_fresh - 0.1).abs() < 1e-9);
        assert!(e_mid > 0.0 && e_mid < e_fresh);
        assert_eq!(e_stale, 0.0);
    }

    #[test]
    fn test_featured_boost_reorders() {
        let fusion = ResultFusion::new(RankingConfig::default());

        let plain = item(1, "Cape Town harbour photographs");
        let mut featured = item(2, "Harbour view");
        featured.is_featured = true;

        let ranked = fusion.fuse(vec![plain, featured], &parsed(&[], &[]), now());
        assert_eq!(ranked[0].item.id, 2);
    }

    #[test]
    fn test_fuse_orders_descending() {
        let fusion = ResultFusion::new(RankingConfig::default());
        let query = parsed(&["harbour"], &[]);

        let miss = item(1, "Railway timetables");
        let hit = item(2, "Harbour board minutes");

        let ranked = fusion.fuse(vec![miss, hit], &query, now());
        assert_eq!(ranked[0].item.id, 2);
        assert!(ranked[0].final_score > ranked[1].final_score);
    }

    #[test]
    fn test_text_similarity_known_values() {
        assert_eq!(text_similarity("harbour", "harbour"), 1.0);
        assert_eq!(text_similarity("", "harbour"), 0.0);
        // "world"/"word": common chars "wor" + "d" = 4, 2*4/10
        assert!((text_similarity("world", "word") - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_deduplicate_threshold_is_strict() {
        let scored: Vec<ScoredResult> = [
            item(1, "Cape Town harbour 1905"),
            item(2, "Cape Town harbour 1906"), // near-duplicate of 1
            item(3, "Johannesburg gold mines"),
        ]
        .into_iter()
        .map(|item| ScoredResult {
            item,
            relevance: 0.5,
            quality: 0.0,
            engagement: 0.0,
            final_score: 0.3,
        })
        .collect();

        let unique = deduplicate(scored, 0.9);
        let ids: Vec<i64> = unique.iter().map(|r| r.item.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_deduplicate_identical_at_threshold_one_survives() {
        // With threshold 1.0 even identical titles survive: dedup requires
        // similarity strictly greater than the threshold
        let scored: Vec<ScoredResult> = [item(1, "Harbour"), item(2, "Harbour")]
            .into_iter()
            .map(|item| ScoredResult {
                item,
                relevance: 0.5,
                quality: 0.0,
                engagement: 0.0,
                final_score: 0.3,
            })
            .collect();
        assert_eq!(deduplicate(scored, 1.0).len(), 2);
    }

    #[test]
    fn test_access_filter() {
        let mut unpublished = item(1, "Draft finding aid");
        unpublished.is_published = false;
        let published = item(2, "Published finding aid");

        let scored: Vec<ScoredResult> = [unpublished, published]
            .into_iter()
            .map(|item| ScoredResult {
                item,
                relevance: 0.5,
                quality: 0.0,
                engagement: 0.0,
                final_score: 0.3,
            })
            .collect();

        let anon = apply_access_filter(scored.clone(), Viewer::Anonymous);
        assert_eq!(anon.len(), 1);
        assert_eq!(anon[0].item.id, 2);

        assert_eq!(apply_access_filter(scored.clone(), Viewer::Authenticated).len(), 2);
        assert_eq!(apply_access_filter(scored, Viewer::Administrator).len(), 2);
    }
}
