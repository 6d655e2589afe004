use std::time::Duration;

use feed_rs::model::Entry;
use newsrelay_db::Timestamp;
use reqwest::Client;
use serde::Serialize;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, info};

use crate::USER_AGENT;

const LOG_TARGET: &str = "newsrelay::feed";

#[derive(Debug, Snafu)]
pub enum FeedError {
    #[snafu(display("Failed to build HTTP client: {source}"))]
    Client { source: reqwest::Error },
    #[snafu(display("Failed to download feed {url}: {source}"))]
    Download { url: String, source: reqwest::Error },
    #[snafu(display("Failed to parse feed {url}: {source}"))]
    Parse {
        url: String,
        source: feed_rs::parser::ParseFeedError,
    },
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;

/// A candidate article as announced by a feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedArticle {
    pub link: String,
    pub title: String,
    /// Feed-supplied body (summary or content), possibly HTML
    pub body: Option<String>,
    /// Feed-supplied image, used when the page has none
    pub image: Option<String>,
    pub published_at: Option<Timestamp>,
}

impl FeedArticle {
    pub fn new(link: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: title.into(),
            body: None,
            image: None,
            published_at: None,
        }
    }
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the current entries of one feed, in feed order
    async fn fetch(&self, feed_url: &str) -> FeedResult<Vec<FeedArticle>>;
}

pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration) -> FeedResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context(ClientSnafu)?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, feed_url: &str) -> FeedResult<Vec<FeedArticle>> {
        debug!(target: LOG_TARGET, url = %feed_url, "Downloading feed");

        let bytes = self
            .client
            .get(feed_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context(DownloadSnafu { url: feed_url })?
            .bytes()
            .await
            .context(DownloadSnafu { url: feed_url })?;

        let articles = parse_feed(&bytes, feed_url)?;
        info!(target: LOG_TARGET, url = %feed_url, count = articles.len(), "Fetched feed");
        Ok(articles)
    }
}

/// Parse RSS/Atom bytes into candidate articles
///
/// Entries without a link or a title are skipped. Relative links are resolved
/// against `feed_url`.
pub fn parse_feed(bytes: &[u8], feed_url: &str) -> FeedResult<Vec<FeedArticle>> {
    let feed = feed_rs::parser::parse(bytes).context(ParseSnafu { url: feed_url })?;
    let base = url::Url::parse(feed_url).ok();

    Ok(feed
        .entries
        .iter()
        .filter_map(|entry| {
            let article = entry_to_article(entry, base.as_ref());
            if article.is_none() {
                debug!(target: LOG_TARGET, id = %entry.id, "Skipping entry without link or title");
            }
            article
        })
        .collect())
}

fn entry_to_article(entry: &Entry, base: Option<&url::Url>) -> Option<FeedArticle> {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_owned())
        .filter(|t| !t.is_empty())?;
    let link = resolve(select_link(entry)?, base);

    let body = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
        .filter(|b| !b.trim().is_empty());

    Some(FeedArticle {
        link,
        title,
        body,
        image: select_image(entry).map(|img| resolve(img, base)),
        published_at: entry
            .published
            .or(entry.updated)
            .and_then(|dt| u64::try_from(dt.timestamp()).ok())
            .map(Timestamp::from),
    })
}

fn select_link(entry: &Entry) -> Option<&str> {
    let mut fallback = None;
    for link in &entry.links {
        let href = link.href.trim();
        if href.is_empty() {
            continue;
        }
        match link.rel.as_deref() {
            None | Some("alternate") => return Some(href),
            Some(_) => fallback = fallback.or(Some(href)),
        }
    }
    if fallback.is_some() {
        return fallback;
    }

    // RSS `<guid isPermaLink="true">` ends up as the id
    let id = entry.id.trim();
    (id.starts_with("http://") || id.starts_with("https://")).then_some(id)
}

fn select_image(entry: &Entry) -> Option<&str> {
    for media in &entry.media {
        for content in &media.content {
            let is_image = content
                .content_type
                .as_ref()
                .is_some_and(|m| m.type_() == "image");
            if let (true, Some(url)) = (is_image, content.url.as_ref()) {
                return Some(url.as_str());
            }
        }
        if let Some(thumbnail) = media.thumbnails.first() {
            return Some(thumbnail.image.uri.as_str());
        }
    }

    entry
        .links
        .iter()
        .find(|link| {
            link.rel.as_deref() == Some("enclosure")
                && link
                    .media_type
                    .as_deref()
                    .is_some_and(|m| m.starts_with("image/"))
        })
        .map(|link| link.href.as_str())
}

fn resolve(href: &str, base: Option<&url::Url>) -> String {
    match base.map(|base| base.join(href)) {
        Some(Ok(url)) => url.to_string(),
        _ => href.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example</title>
    <link>https://news.example/</link>
    <description>Example news</description>
    <item>
      <title>Foo launches v2</title>
      <link>https://news.example/foo-v2</link>
      <description>&lt;p&gt;Foo shipped &lt;b&gt;v2&lt;/b&gt;.&lt;/p&gt;</description>
      <pubDate>Tue, 14 Nov 2023 22:13:20 GMT</pubDate>
      <media:content url="https://cdn.example/foo.jpg" type="image/jpeg" />
    </item>
    <item>
      <title>Relative link</title>
      <link>/bar</link>
    </item>
    <item>
      <description>No title here</description>
      <link>https://news.example/untitled</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom example</title>
  <id>urn:uuid:feed</id>
  <updated>2023-11-14T22:13:20Z</updated>
  <entry>
    <title>Atom entry</title>
    <id>urn:uuid:entry-1</id>
    <updated>2023-11-14T22:13:20Z</updated>
    <link rel="alternate" href="https://atom.example/entry-1"/>
    <link rel="enclosure" type="image/png" href="https://atom.example/entry-1.png"/>
    <content type="html">&lt;p&gt;Body&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items() {
        let articles = parse_feed(RSS.as_bytes(), "https://news.example/rss").unwrap();

        assert_eq!(articles.len(), 2);
        let first = &articles[0];
        assert_eq!(first.link, "https://news.example/foo-v2");
        assert_eq!(first.title, "Foo launches v2");
        assert_eq!(first.image.as_deref(), Some("https://cdn.example/foo.jpg"));
        assert_eq!(first.published_at, Some(Timestamp::from(1_700_000_000)));
        assert!(first.body.as_deref().unwrap().contains("Foo shipped"));

        assert_eq!(articles[1].link, "https://news.example/bar");
        assert_eq!(articles[1].body, None);
    }

    #[test]
    fn parses_atom_entries() {
        let articles = parse_feed(ATOM.as_bytes(), "https://atom.example/feed").unwrap();

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].link, "https://atom.example/entry-1");
        assert_eq!(
            articles[0].image.as_deref(),
            Some("https://atom.example/entry-1.png")
        );
        assert_eq!(articles[0].body.as_deref(), Some("<p>Body</p>"));
    }

    #[test]
    fn malformed_feed_is_an_error() {
        let err = parse_feed(b"<html>not a feed</html>", "https://x/rss").unwrap_err();
        assert!(matches!(err, FeedError::Parse { .. }));
    }
}
