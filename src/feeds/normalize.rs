//! Turning one raw entry block into an [`ArticleRecord`].
//!
//! RSS and Atom name the same facts differently, and real feeds mix the two
//! vocabularies freely. Each field that has alternatives is resolved by an
//! ordered list of pure strategies; the first one that yields something
//! wins.
//!
//! | Field | Tried in order |
//! |-------|----------------|
//! | link | `<link>` text, Atom `<link href>`, permalink `<guid>` |
//! | date | `pubDate`, `dc:date`, `published`, `updated`, `issued`, `modified` |
//! | summary | `description`, `summary`, `content:encoded`, `content` |
//! | image | enclosure, `media:content`, Atom enclosure link, thumbnails, first `<img>` in the body |

use crate::config::FeedSource;
use crate::feeds::extract::{
    attr_value, extract_attr, extract_markup, extract_text, first_text, start_tags,
};
use crate::models::ArticleRecord;
use crate::translate::Translator;
use crate::utils::truncate_chars;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use url::Url;

/// A field-resolution step: look at the entry block, maybe find a value.
pub type Strategy = fn(&str) -> Option<String>;

pub const LINK_STRATEGIES: &[Strategy] = &[link_text, atom_link_href, guid_permalink];

pub const IMAGE_STRATEGIES: &[Strategy] = &[
    enclosure_image,
    media_content_image,
    atom_enclosure_image,
    thumbnail_image,
    inline_image,
];

pub const DATE_FIELDS: &[&str] = &["pubDate", "dc:date", "published", "updated", "issued", "modified"];

pub const SUMMARY_FIELDS: &[&str] = &["description", "summary", "content:encoded", "content"];

static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").unwrap());

/// Why an entry was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedEntry {
    #[error("entry has no title")]
    MissingTitle,
    #[error("entry has no link")]
    MissingLink,
}

/// Everything the normalizer needs besides the entry itself.
pub struct EntryContext<'a> {
    pub source: &'a FeedSource,
    /// Configured tag keywords.
    pub keywords: &'a [String],
    pub summary_max_chars: usize,
    pub max_tags: usize,
    pub translator: &'a dyn Translator,
    /// Stands in for missing or unparsable dates.
    pub ingested_at: DateTime<Utc>,
}

fn resolve(block: &str, strategies: &[Strategy]) -> Option<String> {
    strategies.iter().find_map(|strategy| strategy(block))
}

fn non_empty(s: String) -> Option<String> {
    let s = s.trim().to_string();
    (!s.is_empty()).then_some(s)
}

/// RSS `<link>https://…</link>`.
pub fn link_text(block: &str) -> Option<String> {
    non_empty(extract_text(block, "link"))
}

/// Atom `<link href="…"/>`, preferring `rel="alternate"` (or no `rel`).
pub fn atom_link_href(block: &str) -> Option<String> {
    let links = start_tags(block, "link");
    let alternate = links.iter().find_map(|attrs| {
        let rel = attr_value(attrs, "rel");
        match rel.as_deref() {
            None | Some("alternate") => attr_value(attrs, "href"),
            _ => None,
        }
    });
    alternate.or_else(|| links.iter().find_map(|attrs| attr_value(attrs, "href")))
}

/// `<guid>` when it holds an absolute web URL.
pub fn guid_permalink(block: &str) -> Option<String> {
    let guid = extract_text(block, "guid");
    let parsed = Url::parse(&guid).ok()?;
    matches!(parsed.scheme(), "http" | "https").then_some(guid)
}

fn is_image_type(mime: Option<&str>) -> bool {
    mime.is_none_or(|m| m.trim().to_ascii_lowercase().starts_with("image/"))
}

/// `<enclosure url="…" type="image/…"/>`.
pub fn enclosure_image(block: &str) -> Option<String> {
    start_tags(block, "enclosure").into_iter().find_map(|attrs| {
        let mime = attr_value(attrs, "type");
        if is_image_type(mime.as_deref()) {
            attr_value(attrs, "url")
        } else {
            None
        }
    })
}

/// `<media:content url="…" medium="image"/>`; untyped content counts.
pub fn media_content_image(block: &str) -> Option<String> {
    start_tags(block, "media:content").into_iter().find_map(|attrs| {
        let medium = attr_value(attrs, "medium");
        let mime = attr_value(attrs, "type");
        let is_image = match medium.as_deref() {
            Some(m) => m.eq_ignore_ascii_case("image"),
            None => is_image_type(mime.as_deref()),
        };
        if is_image { attr_value(attrs, "url") } else { None }
    })
}

/// Atom `<link rel="enclosure" type="image/…" href="…"/>`.
pub fn atom_enclosure_image(block: &str) -> Option<String> {
    start_tags(block, "link").into_iter().find_map(|attrs| {
        let rel = attr_value(attrs, "rel")?;
        let mime = attr_value(attrs, "type")?;
        if rel.eq_ignore_ascii_case("enclosure") && is_image_type(Some(mime.as_str())) {
            attr_value(attrs, "href")
        } else {
            None
        }
    })
}

/// `<media:thumbnail url="…"/>`, `<itunes:image href="…"/>` or a plain
/// `<thumbnail>` element.
pub fn thumbnail_image(block: &str) -> Option<String> {
    extract_attr(block, "media:thumbnail", "url")
        .or_else(|| extract_attr(block, "itunes:image", "href"))
        .or_else(|| non_empty(extract_text(block, "thumbnail")))
}

/// The first `<img src>` inside the entry's summary or content markup.
pub fn inline_image(block: &str) -> Option<String> {
    SUMMARY_FIELDS.iter().find_map(|field| {
        let markup = extract_markup(block, field)?;
        let fragment = Html::parse_fragment(&markup);
        fragment
            .select(&IMG_SELECTOR)
            .filter_map(|img| img.value().attr("src"))
            .map(str::trim)
            .find(|src| !src.is_empty() && !src.starts_with("data:"))
            .map(str::to_string)
    })
}

/// Parse the date formats seen in feeds into a UTC instant.
///
/// RFC 2822 (RSS) and RFC 3339 (Atom) cover nearly everything; a few
/// near-misses (no colon in the offset, no offset, date only) are accepted
/// too, with missing offsets taken as UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f %z", "%a, %d %b %Y %H:%M %z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// The entry's publication instant, or `fallback` when it has none we can
/// read.
pub fn resolve_date(block: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DATE_FIELDS
        .iter()
        .map(|field| extract_text(block, field))
        .find(|text| !text.is_empty())
        .and_then(|text| parse_date(&text))
        .unwrap_or(fallback)
}

/// Resolve a possibly relative link against the feed URL.
pub fn absolutize(link: &str, feed_url: &str) -> String {
    if Url::parse(link).is_ok() {
        return link.to_string();
    }
    Url::parse(feed_url)
        .and_then(|base| base.join(link))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| link.to_string())
}

/// Deduplication key: SHA-256 of the link, or of title and date when the
/// link is empty.
pub fn article_id(link: &str, title: &str, date: &DateTime<Utc>) -> String {
    let digest = if link.is_empty() {
        Sha256::digest(format!("{title}{}", date.to_rfc3339()).as_bytes())
    } else {
        Sha256::digest(link.as_bytes())
    };
    format!("{digest:x}")
}

/// Configured keywords found, case-insensitively, in the title or summary.
///
/// Keywords keep their configured spelling and order; duplicates differing
/// only in case count once.
pub fn infer_tags(title: &str, summary: &str, keywords: &[String], max_tags: usize) -> Vec<String> {
    let haystack = format!("{title} {summary}").to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
        .unique_by(|k| k.to_lowercase())
        .take(max_tags)
        .map(str::to_string)
        .collect()
}

/// Build the canonical record for one entry.
///
/// # Arguments
///
/// * `block` - Inner markup of one `<item>` or `<entry>`
/// * `ctx` - Feed source, tag keywords, limits and the ingestion instant
///
/// # Returns
///
/// The record, with its title and summary run through `ctx.translator`,
/// the summary capped, relative links resolved and tags inferred.
///
/// # Errors
///
/// [`MalformedEntry`] when the entry has no title or no link; only that
/// entry is dropped.
pub fn normalize(block: &str, ctx: &EntryContext<'_>) -> Result<ArticleRecord, MalformedEntry> {
    let source = ctx.source;

    let title = extract_text(block, "title");
    if title.is_empty() {
        return Err(MalformedEntry::MissingTitle);
    }

    let link = resolve(block, LINK_STRATEGIES)
        .map(|l| absolutize(&l, &source.url))
        .ok_or(MalformedEntry::MissingLink)?;

    let date = resolve_date(block, ctx.ingested_at);

    let summary = first_text(block, SUMMARY_FIELDS);
    let title = ctx.translator.translate(&title, &source.language);
    let summary = ctx.translator.translate(&summary, &source.language);
    let summary = truncate_chars(&summary, ctx.summary_max_chars);

    let image = resolve(block, IMAGE_STRATEGIES)
        .map(|img| absolutize(&img, &link))
        .unwrap_or_default();

    let tags = infer_tags(&title, &summary, ctx.keywords, ctx.max_tags);

    Ok(ArticleRecord {
        id: article_id(&link, &title, &date),
        title,
        link,
        date,
        summary,
        image,
        source: source.name.clone(),
        lang: source.language.clone(),
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::PassThrough;
    use chrono::TimeZone;

    fn source() -> FeedSource {
        FeedSource {
            name: "Example".to_string(),
            url: "https://example.com/feed.xml".to_string(),
            language: "en".to_string(),
            named_in_config: true,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 6, 12, 0, 0).unwrap()
    }

    fn normalize_with(block: &str, keywords: &[String]) -> Result<ArticleRecord, MalformedEntry> {
        let source = source();
        let ctx = EntryContext {
            source: &source,
            keywords,
            summary_max_chars: 300,
            max_tags: 8,
            translator: &PassThrough,
            ingested_at: now(),
        };
        normalize(block, &ctx)
    }

    #[test]
    fn test_normalize_rss_item() {
        let block = r#"
            <title>Rust 1.80 released</title>
            <link>https://blog.example.com/rust-1-80</link>
            <pubDate>Tue, 06 May 2025 09:30:00 GMT</pubDate>
            <description><![CDATA[<p>The <b>Rust</b> team is happy to announce...</p>]]></description>
            <enclosure url="https://cdn.example.com/r.png" type="image/png" length="1"/>
        "#;
        let keywords = vec!["rust".to_string(), "python".to_string()];

        let rec = normalize_with(block, &keywords).unwrap();
        assert_eq!(rec.title, "Rust 1.80 released");
        assert_eq!(rec.link, "https://blog.example.com/rust-1-80");
        assert_eq!(rec.date, Utc.with_ymd_and_hms(2025, 5, 6, 9, 30, 0).unwrap());
        assert_eq!(rec.summary, "The Rust team is happy to announce...");
        assert_eq!(rec.image, "https://cdn.example.com/r.png");
        assert_eq!(rec.source, "Example");
        assert_eq!(rec.lang, "en");
        assert_eq!(rec.tags, vec!["rust"]);
        assert_eq!(rec.id, article_id(&rec.link, "", &now()));
    }

    #[test]
    fn test_normalize_atom_entry() {
        let block = r#"
            <title type="html">Atom &amp; Eve</title>
            <link rel="replies" href="https://example.com/a/comments"/>
            <link rel="alternate" type="text/html" href="https://example.com/a"/>
            <updated>2025-05-01T10:00:00+02:00</updated>
            <summary>Short summary</summary>
            <content type="html">&lt;p&gt;Long &lt;img src="/img/a.jpg"&gt;&lt;/p&gt;</content>
        "#;

        let rec = normalize_with(block, &[]).unwrap();
        assert_eq!(rec.title, "Atom & Eve");
        assert_eq!(rec.link, "https://example.com/a");
        assert_eq!(rec.date, Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap());
        assert_eq!(rec.summary, "Short summary");
        assert_eq!(rec.image, "https://example.com/img/a.jpg");
        assert!(rec.tags.is_empty());
    }

    #[test]
    fn test_escaped_title_text_survives() {
        let block = r#"
            <title>Understanding Option&lt;T&gt; and Vec&lt;u8&gt;</title>
            <link>https://x.test/generics</link>
            <description>&lt;p&gt;Generic &lt;b&gt;types&lt;/b&gt;&lt;/p&gt;</description>
        "#;
        let rec = normalize_with(block, &[]).unwrap();
        assert_eq!(rec.title, "Understanding Option<T> and Vec<u8>");
        assert_eq!(rec.summary, "Generic types");
    }

    #[test]
    fn test_missing_title_or_link_is_malformed() {
        assert_eq!(
            normalize_with("<link>https://x.test/a</link>", &[]).unwrap_err(),
            MalformedEntry::MissingTitle
        );
        assert_eq!(
            normalize_with("<title>  </title><link>https://x.test/a</link>", &[]).unwrap_err(),
            MalformedEntry::MissingTitle
        );
        assert_eq!(
            normalize_with("<title>No link</title>", &[]).unwrap_err(),
            MalformedEntry::MissingLink
        );
    }

    #[test]
    fn test_bad_or_missing_date_falls_back_to_ingestion_time() {
        let base = "<title>T</title><link>https://x.test/a</link>";
        let rec = normalize_with(base, &[]).unwrap();
        assert_eq!(rec.date, now());

        let garbled = format!("{base}<pubDate>sometime last week</pubDate>");
        let rec = normalize_with(&garbled, &[]).unwrap();
        assert_eq!(rec.date, now());

        let empty = format!("{base}<pubDate></pubDate><dc:date>2024-12-31</dc:date>");
        let rec = normalize_with(&empty, &[]).unwrap();
        assert_eq!(rec.date, Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_summary_is_capped() {
        let long = "word ".repeat(200);
        let block = format!("<title>T</title><link>https://x.test/a</link><description>{long}</description>");
        let rec = normalize_with(&block, &[]).unwrap();
        assert!(rec.summary.chars().count() <= 300);
        assert!(rec.summary.starts_with("word word"));
    }

    #[test]
    fn test_relative_link_is_resolved_against_feed() {
        let rec = normalize_with("<title>T</title><link>/posts/1</link>", &[]).unwrap();
        assert_eq!(rec.link, "https://example.com/posts/1");
    }

    #[test]
    fn test_link_strategies() {
        assert_eq!(link_text("<link> https://a.test </link>").as_deref(), Some("https://a.test"));
        assert_eq!(link_text(r#"<link href="https://a.test"/>"#), None);
        assert_eq!(
            atom_link_href(r#"<link rel="self" href="https://a.test/self"/>"#).as_deref(),
            Some("https://a.test/self")
        );
        assert_eq!(
            atom_link_href(r#"<link rel="self" href="s"/><link href="https://a.test/p"/>"#).as_deref(),
            Some("https://a.test/p")
        );
        assert_eq!(
            guid_permalink(r#"<guid isPermaLink="true">https://a.test/g</guid>"#).as_deref(),
            Some("https://a.test/g")
        );
        assert_eq!(guid_permalink("<guid>tag:a.test,2025:1</guid>"), None);
    }

    #[test]
    fn test_image_strategies_in_order() {
        let audio_then_media = r#"
            <enclosure url="https://a.test/ep.mp3" type="audio/mpeg"/>
            <media:content url="https://a.test/m.jpg" medium="image"/>
            <media:thumbnail url="https://a.test/t.jpg"/>"#;
        assert_eq!(enclosure_image(audio_then_media), None);
        assert_eq!(resolve(audio_then_media, IMAGE_STRATEGIES).as_deref(), Some("https://a.test/m.jpg"));

        let video = r#"<media:content url="https://a.test/v.mp4" medium="video"/>
            <media:thumbnail url="https://a.test/t.jpg"/>"#;
        assert_eq!(media_content_image(video), None);
        assert_eq!(resolve(video, IMAGE_STRATEGIES).as_deref(), Some("https://a.test/t.jpg"));

        let atom = r#"<link rel="enclosure" type="image/jpeg" href="https://a.test/e.jpg"/>"#;
        assert_eq!(atom_enclosure_image(atom).as_deref(), Some("https://a.test/e.jpg"));

        let inline = r#"<description><![CDATA[<p><img src="data:x"><img src="https://a.test/i.gif"></p>]]></description>"#;
        assert_eq!(inline_image(inline).as_deref(), Some("https://a.test/i.gif"));

        assert_eq!(resolve("<title>none</title>", IMAGE_STRATEGIES), None);
    }

    #[test]
    fn test_thumbnail_fallbacks() {
        let itunes = r#"<itunes:image href="https://a.test/cover.jpg"/>"#;
        assert_eq!(thumbnail_image(itunes).as_deref(), Some("https://a.test/cover.jpg"));

        let plain = "<thumbnail> https://a.test/thumb.png </thumbnail>";
        assert_eq!(thumbnail_image(plain).as_deref(), Some("https://a.test/thumb.png"));

        let both = r#"<media:thumbnail url="https://a.test/m.jpg"/><itunes:image href="https://a.test/i.jpg"/>"#;
        assert_eq!(thumbnail_image(both).as_deref(), Some("https://a.test/m.jpg"));

        assert_eq!(thumbnail_image("<thumbnail></thumbnail>"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 5, 6, 9, 30, 0).unwrap();
        assert_eq!(parse_date("Tue, 06 May 2025 09:30:00 GMT"), Some(expected));
        assert_eq!(parse_date("06 May 2025 10:30:00 +0100"), Some(expected));
        assert_eq!(parse_date("2025-05-06T09:30:00Z"), Some(expected));
        assert_eq!(parse_date("2025-05-06T11:30:00+02:00"), Some(expected));
        assert_eq!(parse_date("2025-05-06T09:30:00.000+0000"), Some(expected));
        assert_eq!(parse_date("2025-05-06 09:30:00"), Some(expected));
        assert_eq!(parse_date("Tue, 06 May 2025 11:30 +0200"), Some(expected));
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_article_id_is_deterministic() {
        let date = now();
        let a = article_id("https://x.test/a", "T", &date);
        assert_eq!(a, article_id("https://x.test/a", "Other title", &date));
        assert_eq!(a.len(), 64);
        assert_ne!(a, article_id("https://x.test/b", "T", &date));

        let no_link = article_id("", "T", &date);
        assert_eq!(no_link, article_id("", "T", &date));
        assert_ne!(no_link, article_id("", "T2", &date));
    }

    #[test]
    fn test_infer_tags() {
        let keywords: Vec<String> = ["Rust", "rust", "Linux", "go", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        // plain substring match, so "go" is found inside "cargo"
        let tags = infer_tags("RUST on linux", "a summary about cargo", &keywords, 8);
        assert_eq!(tags, vec!["Rust", "Linux", "go"]);

        let capped = infer_tags("rust linux", "", &keywords, 1);
        assert_eq!(capped, vec!["Rust"]);
    }
}
