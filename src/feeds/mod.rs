//! Feed retrieval and parsing.
//!
//! Each feed moves through the submodules in order:
//!
//! 1. [`fetch`]: download the document, reject anything that is not a feed
//! 2. [`split`]: cut the document into per-article blocks
//! 3. [`normalize`]: turn each block into an [`ArticleRecord`](crate::models::ArticleRecord)
//!
//! [`extract`] holds the text helpers the last two steps share.
//!
//! | Format | Entry element | Link | Date |
//! |--------|---------------|------|------|
//! | RSS 2.0 | `<item>` | `<link>` text | `<pubDate>` (RFC 2822) |
//! | RSS 1.0 | `<item rdf:about>` | `<link>` text | `<dc:date>` |
//! | Atom | `<entry>` | `<link href>` | `<published>` / `<updated>` (RFC 3339) |

pub mod extract;
pub mod fetch;
pub mod normalize;
pub mod split;
