/// Search intent classification
///
/// First-match-wins over the pattern families below, checked in a fixed
/// priority order. The order is load-bearing: "where can I find similar maps"
/// matches both the Compare and Locate families and must classify as Compare.

use regex::Regex;

use super::Intent;

/// Pattern families in classification priority order.
const INTENT_PATTERNS: &[(Intent, &[&str])] = &[
    (
        Intent::Explore,
        &[
            r"^(show|browse|explore|discover|see|view)\b",
            r"^(what|which)\s+(types?|kinds?|categories)",
            r"\b(overview|collection|all)\b",
        ],
    ),
    (
        Intent::Identify,
        &[
            r"^(what|who)\s+(is|was|are|were)\b",
            r"\b(identify|recognize|tell me about)\b",
        ],
    ),
    (
        Intent::Compare,
        &[
            r"\b(compare|versus|vs|difference|between)\b",
            r"\b(similar|like|related to)\b",
        ],
    ),
    (
        Intent::Trace,
        &[
            r"\b(history|origin|provenance|came from|belonged to)\b",
            r"\b(related|connected|linked)\b",
        ],
    ),
    (
        Intent::Locate,
        &[
            r"\b(where|location|located|stored|kept|find)\b",
            r"\b(shelf|box|folder|repository)\b",
        ],
    ),
];

/// Classify the dominant intent of a query. Falls back to Find.
pub fn classify_intent(query: &str) -> Intent {
    let lower = query.to_lowercase();

    for (intent, patterns) in INTENT_PATTERNS {
        for pattern in *patterns {
            if let Ok(re) = Regex::new(pattern) {
                if re.is_match(&lower) {
                    return *intent;
                }
            }
        }
    }

    Intent::Find
}
