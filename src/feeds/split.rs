//! Splitting a feed document into per-article blocks.
//!
//! RSS (0.9x, 1.0 and 2.0) wraps articles in `<item>`, Atom in `<entry>`.
//! The splitter tries `<item>` first and falls back to `<entry>`; a document
//! with neither yields no blocks.

use crate::feeds::extract::extract_text;
use once_cell::sync::Lazy;
use regex::Regex;

static ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<item(?:\s[^>]*)?>(.*?)</item\s*>").unwrap());
static ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<entry(?:\s[^>]*)?>(.*?)</entry\s*>").unwrap());
static FIRST_ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<(?:item|entry)[\s>]").unwrap());
static FEED_ROOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(?:rss|feed|rdf:rdf)[\s>]").unwrap());

fn blocks<'a>(re: &Regex, document: &'a str) -> Vec<&'a str> {
    re.captures_iter(document)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// The inner markup of every article in `document`, in document order.
pub fn split_entries(document: &str) -> Vec<&str> {
    let items = blocks(&ITEM, document);
    if !items.is_empty() {
        return items;
    }
    blocks(&ENTRY, document)
}

/// The channel or feed `<title>`, read from the part of the document before
/// the first article.
pub fn feed_title(document: &str) -> Option<String> {
    let head = FIRST_ENTRY
        .find(document)
        .map_or(document, |m| &document[..m.start()]);
    let title = extract_text(head, "title");
    (!title.is_empty()).then_some(title)
}

/// Whether `body` carries an RSS, RDF or Atom root element.
pub fn looks_like_feed(body: &str) -> bool {
    FEED_ROOT.is_match(body)
}
