/// Result presentation
///
/// Turns ranked catalog items into display-ready cards: title fallback and
/// truncation, HTML-stripped snippets cut at word boundaries, derived
/// thumbnail URLs, MIME-to-media-type labels, and year/year-range date
/// display. Everything here is pure string work — the store resolves event
/// dates and level-of-description labels up front.

use regex::Regex;
use serde::Serialize;

use crate::store::CatalogItem;

const SNIPPET_LENGTH: usize = 200;
const TITLE_MAX_LENGTH: usize = 100;

/// A single display-ready search result.
#[derive(Debug, Clone, Serialize)]
pub struct ResultCard {
    pub id: i64,
    pub slug: String,
    pub identifier: Option<String>,
    pub title: String,
    pub snippet: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub media_type: Option<String>,
    pub date: Option<String>,
    pub collection: Option<String>,
    pub extent: Option<String>,
    pub url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Format one ranked item as a display card.
pub fn format_result(item: &CatalogItem) -> ResultCard {
    ResultCard {
        id: item.id,
        slug: item.slug.clone(),
        identifier: item.identifier.clone(),
        title: format_title(item.title.as_deref(), item.identifier.as_deref()),
        snippet: create_snippet(item.scope_and_content.as_deref()),
        thumbnail: thumbnail_url(item.thumbnail_path.as_deref(), item.thumbnail_name.as_deref()),
        item_type: item.level_of_description.clone(),
        media_type: media_type(item.mime_type.as_deref()),
        date: date_display(item),
        collection: item.repository_name.clone(),
        extent: item.extent_and_medium.clone(),
        url: format!("/{}", item.slug),
        created_at: item.created_at,
        updated_at: item.updated_at,
    }
}

/// Display title: title, else identifier, else "Untitled"; truncated to 100
/// characters with a trailing ellipsis.
pub fn format_title(title: Option<&str>, identifier: Option<&str>) -> String {
    let display = title.or(identifier).unwrap_or("Untitled");

    if display.chars().count() > TITLE_MAX_LENGTH {
        let truncated: String = display.chars().take(TITLE_MAX_LENGTH - 3).collect();
        format!("{}...", truncated)
    } else {
        display.to_string()
    }
}

/// HTML-stripped, whitespace-collapsed snippet of at most 200 characters.
/// Long text is cut at the last word boundary when one falls within the
/// final 50 characters, with a trailing ellipsis.
pub fn create_snippet(content: Option<&str>) -> Option<String> {
    let content = content?;
    if content.is_empty() {
        return None;
    }

    let stripped = match Regex::new(r"<[^>]*>") {
        Ok(re) => re.replace_all(content, "").into_owned(),
        Err(_) => content.to_string(),
    };
    let collapsed = match Regex::new(r"\s+") {
        Ok(re) => re.replace_all(&stripped, " ").into_owned(),
        Err(_) => stripped,
    };
    let text = collapsed.trim();

    if text.chars().count() <= SNIPPET_LENGTH {
        return Some(text.to_string());
    }

    let snippet: String = text.chars().take(SNIPPET_LENGTH).collect();
    match snippet.rfind(' ') {
        Some(pos) if pos > SNIPPET_LENGTH - 50 => Some(format!("{}...", &snippet[..pos])),
        _ => Some(format!("{}...", snippet)),
    }
}

/// Thumbnail URL: the digitization pipeline stores a 142px rendition next to
/// the master as `<basename>_142.jpg`.
pub fn thumbnail_url(path: Option<&str>, name: Option<&str>) -> Option<String> {
    let path = path.filter(|p| !p.is_empty())?;
    let name = name.filter(|n| !n.is_empty())?;

    let path = path.trim_end_matches('/');
    let basename = match name.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => name,
    };

    Some(format!("{}/{}_142.jpg", path, basename))
}

/// Coarse media-type label from a MIME type.
pub fn media_type(mime: Option<&str>) -> Option<String> {
    let mime = mime?;
    if mime.is_empty() {
        return None;
    }

    let label = if mime.starts_with("image/") {
        "image"
    } else if mime.starts_with("video/") {
        "video"
    } else if mime.starts_with("audio/") {
        "audio"
    } else if mime.contains("pdf") {
        "document"
    } else if mime.contains("text") {
        "text"
    } else {
        "other"
    };

    Some(label.to_string())
}

/// Date display from the item's primary event: a single year, or
/// "start-end" when the years differ.
pub fn date_display(item: &CatalogItem) -> Option<String> {
    use chrono::Datelike;

    let start = item.start_date?;
    let start_year = start.year();

    if let Some(end) = item.end_date {
        let end_year = end.year();
        if end != start && end_year != start_year {
            return Some(format!("{}-{}", start_year, end_year));
        }
    }

    Some(start_year.to_string())
}

/// Wrap query terms in `<mark>` tags, case-insensitively, on word
/// boundaries. Terms shorter than 2 characters are skipped.
pub fn highlight_terms(text: &str, query: &str) -> String {
    if query.is_empty() {
        return text.to_string();
    }

    let mut highlighted = text.to_string();

    for term in query.split_whitespace() {
        if term.chars().count() < 2 {
            continue;
        }

        let pattern = format!(r"(?i)\b({})\b", regex::escape(term));
        if let Ok(re) = Regex::new(&pattern) {
            highlighted = re.replace_all(&highlighted, "<mark>${1}</mark>").into_owned();
        }
    }

    highlighted
}
