//! Feed collection.
//!
//! Fetches configured RSS/Atom sources over HTTP and reduces each to its
//! newest entries. A source that fails to fetch or parse is logged and
//! contributes an empty entry list under its configured name; one broken
//! feed never sinks the digest.

use std::collections::BTreeMap;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use crate::errors::{DispatchError, DispatchErrorKind, DispatchResult};

/// Timeout for a single feed request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

fn default_limit() -> usize {
    3
}

/// A configured feed source.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSource {
    /// Display name, used when the feed does not announce a title.
    pub name: String,
    /// Feed URL.
    pub url: String,
    /// Newest entries to keep.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// One entry of a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Entry title.
    pub title: String,
    /// Entry link.
    pub link: String,
    /// Publication timestamp as the feed stated it.
    pub published: Option<String>,
}

/// The collected entries of one source.
#[derive(Debug, Clone)]
pub struct SourceDigest {
    /// Title the feed announced, or the configured source name.
    pub source_title: String,
    /// Newest entries, capped at the source limit.
    pub entries: Vec<FeedEntry>,
}

/// All collected sources of one topic.
#[derive(Debug, Clone)]
pub struct TopicDigest {
    /// Topic key from the configuration.
    pub topic: String,
    /// Collected sources in configuration order.
    pub sources: Vec<SourceDigest>,
}

/// Collects configured feeds into per-topic digests.
#[derive(Debug)]
pub struct FeedCollector {
    http: reqwest::Client,
}

impl FeedCollector {
    /// Creates a collector with the given User-Agent.
    pub fn new(user_agent: &str) -> DispatchResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| {
                DispatchError::new(DispatchErrorKind::FeedFetch, "Cannot build HTTP client")
                    .with_cause(e)
            })?;
        Ok(Self { http })
    }

    /// Collects every topic, fetching the sources of a topic concurrently.
    pub async fn collect(&self, feeds: &BTreeMap<String, Vec<FeedSource>>) -> Vec<TopicDigest> {
        let mut topics = Vec::with_capacity(feeds.len());

        for (topic, sources) in feeds {
            if sources.is_empty() {
                continue;
            }
            let fetches = sources.iter().map(|source| self.fetch_source(source));
            let collected = futures::future::join_all(fetches).await;
            topics.push(TopicDigest {
                topic: topic.clone(),
                sources: collected,
            });
        }

        topics
    }

    /// Fetches one source, degrading to an empty digest on failure.
    async fn fetch_source(&self, source: &FeedSource) -> SourceDigest {
        match self.try_fetch(source).await {
            Ok(digest) => digest,
            Err(e) => {
                tracing::warn!(url = %source.url, error = %e, "feed skipped");
                SourceDigest {
                    source_title: source.name.clone(),
                    entries: Vec::new(),
                }
            }
        }
    }

    async fn try_fetch(&self, source: &FeedSource) -> DispatchResult<SourceDigest> {
        let response = self.http.get(&source.url).send().await.map_err(|e| {
            DispatchError::new(
                DispatchErrorKind::FeedFetch,
                format!("Request failed: {}", source.url),
            )
            .with_cause(e)
        })?;

        if !response.status().is_success() {
            return Err(DispatchError::new(
                DispatchErrorKind::FeedFetch,
                format!("HTTP {} from {}", response.status().as_u16(), source.url),
            ));
        }

        let body = response.text().await.map_err(|e| {
            DispatchError::new(
                DispatchErrorKind::FeedFetch,
                format!("Cannot read body from {}", source.url),
            )
            .with_cause(e)
        })?;

        let parsed = parse_feed(&body, source.limit)?;
        Ok(SourceDigest {
            source_title: parsed.title.unwrap_or_else(|| source.name.clone()),
            entries: parsed.entries,
        })
    }
}

/// Parsed feed document: announced title plus the newest entries.
#[derive(Debug, Default)]
pub struct ParsedFeed {
    /// Feed-level title, when announced.
    pub title: Option<String>,
    /// Entries in document order, capped at the limit.
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Default)]
struct EntryDraft {
    title: Option<String>,
    link: Option<String>,
    published: Option<String>,
}

/// Parses an RSS 2.0 or Atom document into its newest `limit` entries.
pub fn parse_feed(xml: &str, limit: usize) -> DispatchResult<ParsedFeed> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ParsedFeed::default();
    let mut in_entry = false;
    let mut current_element = String::new();
    let mut draft = EntryDraft::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "item" || name == "entry" {
                    in_entry = true;
                    draft = EntryDraft::default();
                } else if in_entry && name == "link" && draft.link.is_none() {
                    if let Some(href) = attribute_value(&e, b"href") {
                        draft.link = Some(href);
                    }
                }
                current_element = name;
            }
            Ok(Event::Empty(e)) => {
                // Atom links are self-closing with an href attribute.
                if in_entry
                    && e.local_name().as_ref() == b"link"
                    && draft.link.is_none()
                {
                    if let Some(href) = attribute_value(&e, b"href") {
                        draft.link = Some(href);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().trim().to_string();
                if text.is_empty() {
                    continue;
                }
                apply_text(&mut feed, &mut draft, in_entry, &current_element, text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).trim().to_string();
                if text.is_empty() {
                    continue;
                }
                apply_text(&mut feed, &mut draft, in_entry, &current_element, text);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if in_entry && (name.as_ref() == b"item" || name.as_ref() == b"entry") {
                    in_entry = false;
                    feed.entries.push(FeedEntry {
                        title: draft.title.take().unwrap_or_else(|| "(untitled)".to_string()),
                        link: draft.link.take().unwrap_or_else(|| "#".to_string()),
                        published: draft.published.take(),
                    });
                    if feed.entries.len() >= limit {
                        break;
                    }
                }
                current_element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DispatchError::new(
                    DispatchErrorKind::FeedParse,
                    format!("Malformed feed document: {}", e),
                ));
            }
            _ => {}
        }
    }

    Ok(feed)
}

fn apply_text(
    feed: &mut ParsedFeed,
    draft: &mut EntryDraft,
    in_entry: bool,
    element: &str,
    text: String,
) {
    if in_entry {
        match element {
            "title" if draft.title.is_none() => draft.title = Some(text),
            "link" if draft.link.is_none() => draft.link = Some(text),
            "pubDate" | "published" | "updated" | "date" if draft.published.is_none() => {
                draft.published = Some(text)
            }
            _ => {}
        }
    } else if element == "title" && feed.title.is_none() {
        feed.title = Some(text);
    }
}

fn attribute_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
        <rss version="2.0">
          <channel>
            <title>Example Blog</title>
            <link>https://example.com</link>
            <item>
              <title><![CDATA[First post]]></title>
              <link>https://example.com/1</link>
              <pubDate>Mon, 04 Aug 2025 10:00:00 +0000</pubDate>
            </item>
            <item>
              <title>Second post</title>
              <link>https://example.com/2</link>
            </item>
            <item>
              <title>Third post</title>
              <link>https://example.com/3</link>
            </item>
          </channel>
        </rss>"#;

    const ATOM: &str = r#"<?xml version="1.0"?>
        <feed xmlns="http://www.w3.org/2005/Atom">
          <title>Example Feed</title>
          <entry>
            <title>Atom entry</title>
            <link href="https://example.com/atom/1"/>
            <updated>2025-08-04T10:00:00Z</updated>
          </entry>
        </feed>"#;

    #[test]
    fn test_parse_rss() {
        let feed = parse_feed(RSS, 10).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Example Blog"));
        assert_eq!(feed.entries.len(), 3);
        assert_eq!(feed.entries[0].title, "First post");
        assert_eq!(feed.entries[0].link, "https://example.com/1");
        assert_eq!(
            feed.entries[0].published.as_deref(),
            Some("Mon, 04 Aug 2025 10:00:00 +0000")
        );
        // No date on the second item.
        assert!(feed.entries[1].published.is_none());
    }

    #[test]
    fn test_parse_rss_respects_limit() {
        let feed = parse_feed(RSS, 2).unwrap();
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[1].title, "Second post");
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse_feed(ATOM, 10).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Example Feed"));
        assert_eq!(feed.entries.len(), 1);
        assert_eq!(feed.entries[0].link, "https://example.com/atom/1");
        assert_eq!(
            feed.entries[0].published.as_deref(),
            Some("2025-08-04T10:00:00Z")
        );
    }

    #[test]
    fn test_parse_entry_defaults() {
        let xml = r#"<rss><channel><item></item></channel></rss>"#;
        let feed = parse_feed(xml, 10).unwrap();
        assert_eq!(feed.entries.len(), 1);
        assert_eq!(feed.entries[0].title, "(untitled)");
        assert_eq!(feed.entries[0].link, "#");
    }

    #[test]
    fn test_parse_non_feed_document() {
        let feed = parse_feed("<html><body>nope</body></html>", 10).unwrap();
        assert!(feed.entries.is_empty());
    }

    #[test]
    fn test_source_limit_default() {
        let source: FeedSource =
            toml::from_str("name = \"Example\"\nurl = \"https://example.com/feed\"").unwrap();
        assert_eq!(source.limit, 3);
    }
}
