/// Deterministic regex/lexicon time-reference parser
///
/// Extracts explicit years, decades, year ranges, named centuries, and named
/// eras from query text, each resolved to an inclusive calendar date range.
/// Passes are not mutually exclusive: "1950-1960" yields two year references
/// plus one range reference, and a query can match both a decade and an era.

use chrono::NaiveDate;
use regex::Regex;

use super::{TimeRefKind, TimeReference};

/// Named centuries with their resolved ranges.
const CENTURIES: &[(&str, (i32, i32))] = &[
    ("19th century", (1800, 1899)),
    ("nineteenth century", (1800, 1899)),
    ("20th century", (1900, 1999)),
    ("twentieth century", (1900, 1999)),
    ("21st century", (2000, 2099)),
    ("twenty-first century", (2000, 2099)),
];

/// Named eras/periods with their resolved ranges (month-day precise).
const ERAS: &[(&str, (i32, u32, u32), (i32, u32, u32))] = &[
    ("victorian", (1837, 1, 1), (1901, 12, 31)),
    ("edwardian", (1901, 1, 1), (1910, 12, 31)),
    ("pre-war", (1900, 1, 1), (1913, 12, 31)),
    ("inter-war", (1918, 1, 1), (1939, 12, 31)),
    ("post-war", (1945, 1, 1), (1960, 12, 31)),
    ("world war i", (1914, 1, 1), (1918, 12, 31)),
    ("world war ii", (1939, 1, 1), (1945, 12, 31)),
    ("wwi", (1914, 1, 1), (1918, 12, 31)),
    ("wwii", (1939, 1, 1), (1945, 12, 31)),
    ("apartheid", (1948, 1, 1), (1994, 12, 31)),
    ("colonial", (1652, 1, 1), (1910, 12, 31)),
];

fn year_span(start_year: i32, end_year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(start_year, 1, 1)?,
        NaiveDate::from_ymd_opt(end_year, 12, 31)?,
    ))
}

/// Parse all time references in the query text.
pub fn parse_time_references(query: &str) -> Vec<TimeReference> {
    let mut references = Vec::new();
    let lower = query.to_lowercase();

    // Explicit years (1000-2029)
    if let Ok(re) = Regex::new(r"\b(1[0-9]{3}|20[0-2][0-9])\b") {
        for cap in re.captures_iter(query) {
            if let Ok(year) = cap[1].parse::<i32>() {
                if let Some((start, end)) = year_span(year, year) {
                    references.push(TimeReference {
                        kind: TimeRefKind::Year,
                        value: cap[1].to_string(),
                        start,
                        end,
                    });
                }
            }
        }
    }

    // Four-digit decades (1950s)
    if let Ok(re) = Regex::new(r"\b(1[0-9])([0-9])0s\b") {
        for cap in re.captures_iter(&lower) {
            if let Ok(decade) = format!("{}{}0", &cap[1], &cap[2]).parse::<i32>() {
                if let Some((start, end)) = year_span(decade, decade + 9) {
                    references.push(TimeReference {
                        kind: TimeRefKind::Decade,
                        value: format!("{}s", decade),
                        start,
                        end,
                    });
                }
            }
        }
    }

    // Short decades (50s, 60s) — assumed 19xx
    if let Ok(re) = Regex::new(r"\b([2-9])0s\b") {
        for cap in re.captures_iter(&lower) {
            if let Ok(d) = cap[1].parse::<i32>() {
                let decade = 1900 + d * 10;
                if let Some((start, end)) = year_span(decade, decade + 9) {
                    references.push(TimeReference {
                        kind: TimeRefKind::Decade,
                        value: format!("{}0s", d),
                        start,
                        end,
                    });
                }
            }
        }
    }

    // Year ranges (1950-1960, 1950 to 1960)
    if let Ok(re) = Regex::new(r"\b(1[0-9]{3}|20[0-2][0-9])\s*[-–to]+\s*(1[0-9]{3}|20[0-2][0-9])\b")
    {
        for cap in re.captures_iter(query) {
            if let (Ok(from), Ok(to)) = (cap[1].parse::<i32>(), cap[2].parse::<i32>()) {
                if let Some((start, end)) = year_span(from, to) {
                    references.push(TimeReference {
                        kind: TimeRefKind::Range,
                        value: format!("{}-{}", &cap[1], &cap[2]),
                        start,
                        end,
                    });
                }
            }
        }
    }

    // Named centuries
    for (term, (from, to)) in CENTURIES {
        if lower.contains(term) {
            if let Some((start, end)) = year_span(*from, *to) {
                references.push(TimeReference {
                    kind: TimeRefKind::Century,
                    value: term.to_string(),
                    start,
                    end,
                });
            }
        }
    }

    // Named eras/periods. Boundary-matched so "wwi" does not fire inside
    // "wwii" (and "world war i" inside "world war ii")
    for (term, (sy, sm, sd), (ey, em, ed)) in ERAS {
        let matched = match Regex::new(&format!(r"\b{}\b", regex::escape(term))) {
            Ok(re) => re.is_match(&lower),
            Err(_) => false,
        };
        if matched {
            let start = NaiveDate::from_ymd_opt(*sy, *sm, *sd);
            let end = NaiveDate::from_ymd_opt(*ey, *em, *ed);
            if let (Some(start), Some(end)) = (start, end) {
                references.push(TimeReference {
                    kind: TimeRefKind::Era,
                    value: term.to_string(),
                    start,
                    end,
                });
            }
        }
    }

    references
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_no_match_returns_empty() {
        assert!(parse_time_references("photographs of ships").is_empty());
    }

    #[test]
    fn test_explicit_year() {
        let refs = parse_time_references("letters from 1923");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, TimeRefKind::Year);
        assert_eq!(refs[0].value, "1923");
        assert_eq!(refs[0].start, date(1923, 1, 1));
        assert_eq!(refs[0].end, date(1923, 12, 31));
    }

    #[test]
    fn test_decade() {
        let refs = parse_time_references("1950s photographs Cape Town");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, TimeRefKind::Decade);
        assert_eq!(refs[0].value, "1950s");
        assert_eq!(refs[0].start, date(1950, 1, 1));
        assert_eq!(refs[0].end, date(1959, 12, 31));
    }

    #[test]
    fn test_short_decade_assumes_1900s() {
        let refs = parse_time_references("music of the 60s");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, TimeRefKind::Decade);
        assert_eq!(refs[0].start, date(1960, 1, 1));
        assert_eq!(refs[0].end, date(1969, 12, 31));
    }

    #[test]
    fn test_year_range_overlaps_with_years() {
        // Range pass is not exclusive with the year pass
        let refs = parse_time_references("records 1950-1960");
        let years: Vec<_> = refs
            .iter()
            .filter(|r| r.kind == TimeRefKind::Year)
            .collect();
        let ranges: Vec<_> = refs
            .iter()
            .filter(|r| r.kind == TimeRefKind::Range)
            .collect();
        assert_eq!(years.len(), 2);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, date(1950, 1, 1));
        assert_eq!(ranges[0].end, date(1960, 12, 31));
    }

    #[test]
    fn test_century() {
        let refs = parse_time_references("19th century maps");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, TimeRefKind::Century);
        assert_eq!(refs[0].start, date(1800, 1, 1));
        assert_eq!(refs[0].end, date(1899, 12, 31));
    }

    #[test]
    fn test_era_apartheid() {
        let refs = parse_time_references("apartheid resistance posters");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, TimeRefKind::Era);
        assert_eq!(refs[0].start, date(1948, 1, 1));
        assert_eq!(refs[0].end, date(1994, 12, 31));
    }

    #[test]
    fn test_decade_and_era_coexist() {
        let refs = parse_time_references("1950s apartheid photographs");
        assert!(refs.iter().any(|r| r.kind == TimeRefKind::Decade));
        assert!(refs.iter().any(|r| r.kind == TimeRefKind::Era));
    }

    #[test]
    fn test_wwii() {
        let refs = parse_time_references("wwii aircraft");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].start, date(1939, 1, 1));
        assert_eq!(refs[0].end, date(1945, 12, 31));
    }
}
