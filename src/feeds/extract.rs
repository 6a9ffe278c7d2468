//! Field extraction from raw feed markup.
//!
//! Feeds are searched with regular expressions rather than parsed into a
//! tree: plenty of real feeds are not well-formed XML, and the fields we need
//! are shallow. Every function here is pure and total; a missing element is
//! an empty result, never an error.
//!
//! Element names are matched case-insensitively and may carry a namespace
//! prefix (`content:encoded`, `media:thumbnail`). Attributes are ignored when
//! looking for text, and self-closing elements have no text.

use once_cell::sync::Lazy;
use quick_xml::escape::resolve_html5_entity;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Mutex;

static CDATA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").unwrap());
static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]{1,6}|#[0-9]{1,7}|[A-Za-z][A-Za-z0-9]{1,31});").unwrap()
});
static SCRIPT_OR_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(?:script|style)\b[^>]*>.*?</(?:script|style)\s*>").unwrap()
});
static MARKUP_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[A-Za-z/!?][^>]*>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Element patterns are built per tag name; feeds ask for the same dozen
/// names over and over.
fn cached_regex(pattern: String) -> Option<Regex> {
    static CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

    let mut cache = CACHE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(re) = cache.get(&pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(&pattern).ok()?;
    cache.insert(pattern, re.clone());
    Some(re)
}

fn element_regex(tag: &str) -> Option<Regex> {
    let tag = regex::escape(tag);
    // The optional attribute run must not end in '/', so `<link href="x"/>`
    // is never taken as an opening tag.
    cached_regex(format!(
        r"(?is)<{tag}(?:\s[^>]*[^/>])?\s*>(.*?)</{tag}\s*>"
    ))
}

fn start_tag_regex(tag: &str) -> Option<Regex> {
    let tag = regex::escape(tag);
    cached_regex(format!(r"(?is)<{tag}(\s[^>]*)?/?>"))
}

fn attr_regex(attr: &str) -> Option<Regex> {
    let attr = regex::escape(attr);
    cached_regex(format!(
        r#"(?is)(?:^|\s){attr}\s*=\s*(?:"([^"]*)"|'([^']*)')"#
    ))
}

/// Decode character references and HTML entities.
///
/// Unknown entities are left as they are rather than failing the whole
/// string, since stray `&` and made-up entities are common in feeds.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    ENTITY.replace_all(text, |caps: &Captures| {
        let body = &caps[1];
        let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
            u32::from_str_radix(hex, 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
        } else if let Some(dec) = body.strip_prefix('#') {
            dec.parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
        } else {
            resolve_html5_entity(body).map(str::to_string)
        };
        decoded.unwrap_or_else(|| caps[0].to_string())
    })
}

/// Replace every CDATA section with its literal content.
pub fn unwrap_cdata(text: &str) -> Cow<'_, str> {
    CDATA.replace_all(text, "${1}")
}

/// Collapse runs of whitespace to single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Turn feed markup into plain text.
///
/// CDATA wrappers are unwrapped and entities decoded before tags are
/// removed, so escaped HTML (`&lt;p&gt;`) and HTML inside CDATA both lose
/// their markup. A second decoding pass handles double-escaped entities.
pub fn strip_markup(text: &str) -> String {
    let unwrapped = unwrap_cdata(text);
    let decoded = decode_entities(&unwrapped);
    let no_scripts = SCRIPT_OR_STYLE.replace_all(&decoded, " ");
    let no_tags = MARKUP_TAG.replace_all(&no_scripts, " ");
    collapse_whitespace(&decode_entities(&no_tags))
}

/// Turn a plain-text field (title, link, date) into text.
///
/// Tags are removed before entities are decoded, and entities are decoded
/// exactly once, so escaped angle brackets (`Option&lt;T&gt;`) survive as
/// literal text.
pub fn plain_text(text: &str) -> String {
    let unwrapped = unwrap_cdata(text);
    let no_scripts = SCRIPT_OR_STYLE.replace_all(&unwrapped, " ");
    let no_tags = MARKUP_TAG.replace_all(&no_scripts, " ");
    collapse_whitespace(&decode_entities(&no_tags))
}

/// Inner content of the first `tag` element, CDATA unwrapped and entities
/// decoded but markup kept. `None` when the element is missing or blank.
pub fn extract_markup(block: &str, tag: &str) -> Option<String> {
    let re = element_regex(tag)?;
    let inner = re.captures(block)?.get(1)?.as_str();
    let unwrapped = unwrap_cdata(inner);
    let decoded = decode_entities(&unwrapped).trim().to_string();
    (!decoded.is_empty()).then_some(decoded)
}

/// Plain text of the first `tag` element, or an empty string.
pub fn extract_tag(block: &str, tag: &str) -> String {
    element_regex(tag)
        .and_then(|re| re.captures(block))
        .and_then(|caps| caps.get(1))
        .map(|inner| strip_markup(inner.as_str()))
        .unwrap_or_default()
}

/// Text of the first `tag` element read as a plain-text field, or an empty
/// string. See [`plain_text`].
pub fn extract_text(block: &str, tag: &str) -> String {
    element_regex(tag)
        .and_then(|re| re.captures(block))
        .and_then(|caps| caps.get(1))
        .map(|inner| plain_text(inner.as_str()))
        .unwrap_or_default()
}

/// Plain text of the first element in `tags` that has any.
pub fn first_text(block: &str, tags: &[&str]) -> String {
    tags.iter()
        .map(|tag| extract_tag(block, tag))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// Attribute runs of every `tag` start tag (or self-closing tag), in
/// document order.
pub fn start_tags<'a>(block: &'a str, tag: &str) -> Vec<&'a str> {
    let Some(re) = start_tag_regex(tag) else {
        return Vec::new();
    };
    re.captures_iter(block)
        .map(|caps| caps.get(1).map_or("", |m| m.as_str()))
        .collect()
}

/// Value of `name` inside an attribute run, entity-decoded and trimmed.
pub fn attr_value(attrs: &str, name: &str) -> Option<String> {
    let caps = attr_regex(name)?.captures(attrs)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let value = decode_entities(raw).trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Value of `attr` on the first `tag` element that carries it.
pub fn extract_attr(block: &str, tag: &str, attr: &str) -> Option<String> {
    start_tags(block, tag)
        .into_iter()
        .find_map(|attrs| attr_value(attrs, attr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tag_plain() {
        let block = "<title>Hello   world</title><link>https://x.test/a</link>";
        assert_eq!(extract_tag(block, "title"), "Hello world");
        assert_eq!(extract_tag(block, "link"), "https://x.test/a");
    }

    #[test]
    fn test_extract_tag_is_case_insensitive_and_ignores_attributes() {
        let block = r#"<TITLE type="html">Loud</TITLE>"#;
        assert_eq!(extract_tag(block, "title"), "Loud");
    }

    #[test]
    fn test_extract_tag_missing_is_empty() {
        assert_eq!(extract_tag("<title>x</title>", "description"), "");
        assert_eq!(extract_tag("", "title"), "");
    }

    #[test]
    fn test_extract_tag_takes_first_occurrence() {
        let block = "<title>First</title><title>Second</title>";
        assert_eq!(extract_tag(block, "title"), "First");
    }

    #[test]
    fn test_extract_tag_does_not_match_prefixed_names() {
        let block = "<media:title>Media</media:title><content:encoded>Body</content:encoded>";
        assert_eq!(extract_tag(block, "title"), "");
        assert_eq!(extract_tag(block, "content"), "");
        assert_eq!(extract_tag(block, "content:encoded"), "Body");
    }

    #[test]
    fn test_cdata_markup_does_not_leak() {
        let block = "<description><![CDATA[<p>Kernel <b>6.9</b> released</p><img src=\"a.png\">]]></description>";
        assert_eq!(extract_tag(block, "description"), "Kernel 6.9 released");
    }

    #[test]
    fn test_escaped_markup_is_stripped() {
        let block = "<description>&lt;p&gt;Fish &amp;amp; chips&lt;/p&gt;</description>";
        assert_eq!(extract_tag(block, "description"), "Fish & chips");
    }

    #[test]
    fn test_plain_text_keeps_escaped_angle_brackets() {
        let block = "<title>Understanding Option&lt;T&gt; and Vec&lt;u8&gt;</title>";
        assert_eq!(extract_text(block, "title"), "Understanding Option<T> and Vec<u8>");

        let block = "<title>&lt;script&gt; tags considered harmful</title>";
        assert_eq!(extract_text(block, "title"), "<script> tags considered harmful");
    }

    #[test]
    fn test_plain_text_decodes_once_and_drops_raw_tags() {
        assert_eq!(plain_text("Fish &amp;amp; chips"), "Fish &amp; chips");
        assert_eq!(plain_text("<![CDATA[Kernel <b>6.9</b>]]> out"), "Kernel 6.9 out");
        assert_eq!(extract_text("<link> https://x.test/?a=1&amp;b=2 </link>", "link"), "https://x.test/?a=1&b=2");
    }

    #[test]
    fn test_self_closing_element_has_no_text() {
        let block = r#"<link href="https://x.test/a"/><title>T</title>"#;
        assert_eq!(extract_tag(block, "link"), "");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("AT&amp;T &#8217; &#x2014; &nbsp;"), "AT&T ’ — \u{a0}");
        assert_eq!(decode_entities("R&D &bogus; a & b"), "R&D &bogus; a & b");
    }

    #[test]
    fn test_strip_markup_drops_scripts_and_keeps_comparisons() {
        assert_eq!(
            strip_markup("<script>alert(1)</script>a < b and c > d"),
            "a < b and c > d"
        );
    }

    #[test]
    fn test_extract_markup_keeps_html() {
        let block = "<content:encoded><![CDATA[<p><img src='x.jpg'/></p>]]></content:encoded>";
        assert_eq!(
            extract_markup(block, "content:encoded").as_deref(),
            Some("<p><img src='x.jpg'/></p>")
        );
        assert_eq!(extract_markup("<summary>  </summary>", "summary"), None);
    }

    #[test]
    fn test_first_text() {
        let block = "<description></description><summary>Short</summary>";
        assert_eq!(first_text(block, &["description", "summary"]), "Short");
        assert_eq!(first_text(block, &["content"]), "");
    }

    #[test]
    fn test_attributes() {
        let block = r#"<link rel="self" href="https://x.test/feed"/>
            <link rel='alternate' href='https://x.test/post?a=1&amp;b=2' />"#;
        let tags = start_tags(block, "link");
        assert_eq!(tags.len(), 2);
        assert_eq!(attr_value(tags[0], "rel").as_deref(), Some("self"));
        assert_eq!(
            attr_value(tags[1], "href").as_deref(),
            Some("https://x.test/post?a=1&b=2")
        );
        assert_eq!(
            extract_attr(block, "link", "href").as_deref(),
            Some("https://x.test/feed")
        );
        assert_eq!(extract_attr(block, "enclosure", "url"), None);
    }

    #[test]
    fn test_attr_value_does_not_match_suffixes() {
        assert_eq!(attr_value(r#" data-url="nope" url="yes""#, "url").as_deref(), Some("yes"));
    }
}
