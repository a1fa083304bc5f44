//! RSS and Atom feed retrieval.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use tracing::debug;

use placetime_core::{Error, FeedEntry, FeedSource, ParsedFeed, Result};

/// [`FeedSource`] fetching over HTTP.
#[derive(Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("{} returned {}", url, status)));
        }
        let body = response.text().await?;
        debug!(
            subsystem = "feeds",
            url,
            bytes = body.len(),
            "Fetched feed document"
        );
        parse_feed(&body, Utc::now())
    }
}

/// Parse an RSS 2.0, RSS 1.0 or Atom document.
///
/// Entries without a usable native id are skipped. Entries without a
/// parseable date are stamped with `fetched_at`.
pub fn parse_feed(body: &str, fetched_at: DateTime<Utc>) -> Result<ParsedFeed> {
    match root_element(body)?.as_str() {
        "rss" => {
            let doc: RssDocument = from_xml(body)?;
            Ok(ParsedFeed {
                title: doc.channel.title,
                entries: rss_entries(doc.channel.items, fetched_at),
            })
        }
        "RDF" => {
            let doc: RdfDocument = from_xml(body)?;
            Ok(ParsedFeed {
                title: doc.channel.and_then(|c| c.title),
                entries: rss_entries(doc.items, fetched_at),
            })
        }
        "feed" => {
            let doc: AtomFeed = from_xml(body)?;
            Ok(ParsedFeed {
                title: doc.title.map(|t| t.value),
                entries: doc
                    .entries
                    .into_iter()
                    .filter_map(|entry| entry.into_feed_entry(fetched_at))
                    .collect(),
            })
        }
        other => Err(Error::Parse(format!("unsupported document root <{}>", other))),
    }
}

fn from_xml<'de, T: Deserialize<'de>>(body: &'de str) -> Result<T> {
    quick_xml::de::from_str(body).map_err(|e| Error::Parse(e.to_string()))
}

/// Local name of the first element in the document.
fn root_element(body: &str) -> Result<String> {
    let mut reader = Reader::from_str(body);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                return Ok(String::from_utf8_lossy(name.as_ref()).into_owned());
            }
            Ok(Event::Eof) => return Err(Error::Parse("empty document".into())),
            Ok(_) => {}
            Err(e) => return Err(Error::Parse(e.to_string())),
        }
    }
}

fn rss_entries(items: Vec<RssItem>, fetched_at: DateTime<Utc>) -> Vec<FeedEntry> {
    items
        .into_iter()
        .filter_map(|item| item.into_feed_entry(fetched_at))
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// RSS
// =============================================================================

#[derive(Debug, Deserialize)]
struct RssDocument {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    title: Option<String>,
    #[serde(default, rename = "item")]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RdfDocument {
    channel: Option<RssChannel>,
    #[serde(default, rename = "item")]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    #[serde(rename = "@about", alias = "@rdf:about")]
    about: Option<String>,
    title: Option<String>,
    link: Option<String>,
    guid: Option<TextNode>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "dc:date")]
    dc_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

impl RssItem {
    fn into_feed_entry(self, fetched_at: DateTime<Utc>) -> Option<FeedEntry> {
        let title = non_empty(self.title);
        let link = non_empty(self.link);
        let native_id = non_empty(self.guid.map(|g| g.value))
            .or_else(|| non_empty(self.about))
            .or_else(|| link.clone())
            .or_else(|| title.clone())?;

        let published = self
            .pub_date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
            .or_else(|| {
                self.dc_date
                    .as_deref()
                    .and_then(|d| DateTime::parse_from_rfc3339(d.trim()).ok())
            })
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(fetched_at);

        Some(FeedEntry {
            native_id,
            title: title.unwrap_or_default(),
            link: link.unwrap_or_default(),
            published,
        })
    }
}

// =============================================================================
// ATOM
// =============================================================================

#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<TextNode>,
    #[serde(default, rename = "entry")]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<TextNode>,
    #[serde(default, rename = "link")]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl AtomEntry {
    fn into_feed_entry(self, fetched_at: DateTime<Utc>) -> Option<FeedEntry> {
        // A link without rel is an alternate link.
        let link = self
            .links
            .into_iter()
            .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
            .and_then(|l| non_empty(l.href));
        let native_id = non_empty(self.id).or_else(|| link.clone())?;

        let published = self
            .published
            .as_deref()
            .or(self.updated.as_deref())
            .and_then(|d| DateTime::parse_from_rfc3339(d.trim()).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(fetched_at);

        Some(FeedEntry {
            native_id,
            title: non_empty(self.title.map(|t| t.value)).unwrap_or_default(),
            link: link.unwrap_or_default(),
            published,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Example News</title>
    <atom:link href="https://news.example/rss" rel="self"/>
    <item>
      <title>First story</title>
      <link>https://news.example/1</link>
      <guid isPermaLink="false">story-1</guid>
      <pubDate>Tue, 14 Nov 2023 22:13:20 GMT</pubDate>
    </item>
    <description>Latest headlines</description>
    <item>
      <title>Second story</title>
      <link>https://news.example/2</link>
    </item>
    <item>
      <description>No id at all</description>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="text">Example Blog</title>
  <entry>
    <title type="html">Hello</title>
    <id>urn:uuid:1225c695</id>
    <link rel="self" href="https://blog.example/self/1"/>
    <link href="https://blog.example/1"/>
    <updated>2023-11-14T22:13:20Z</updated>
  </entry>
  <entry>
    <title>No id</title>
    <link rel="alternate" href="https://blog.example/2"/>
  </entry>
</feed>"#;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_rss() {
        let feed = parse_feed(RSS, fetched_at()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Example News"));
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(first.native_id, "story-1");
        assert_eq!(first.title, "First story");
        assert_eq!(first.link, "https://news.example/1");
        assert_eq!(first.published, Utc.timestamp_opt(1_700_000_000, 0).unwrap());

        let second = &feed.entries[1];
        assert_eq!(second.native_id, "https://news.example/2");
        assert_eq!(second.published, fetched_at());
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse_feed(ATOM, fetched_at()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Example Blog"));
        assert_eq!(feed.entries.len(), 2);

        assert_eq!(feed.entries[0].native_id, "urn:uuid:1225c695");
        assert_eq!(feed.entries[0].link, "https://blog.example/1");
        assert_eq!(feed.entries[0].title, "Hello");
        assert_eq!(
            feed.entries[0].published,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap()
        );
        assert_eq!(feed.entries[1].native_id, "https://blog.example/2");
    }

    #[test]
    fn test_parse_rejects_non_feed() {
        let err = parse_feed("<html><body>hi</body></html>", fetched_at()).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        let err = parse_feed("not xml at all", fetched_at()).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn test_fetch_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;

        let source = HttpFeedSource::new(reqwest::Client::new());
        let feed = source.fetch(&format!("{}/rss", server.uri())).await.unwrap();
        assert_eq!(feed.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_non_success_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = HttpFeedSource::new(reqwest::Client::new());
        let err = source
            .fetch(&format!("{}/rss", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
