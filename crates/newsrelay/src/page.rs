use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, warn};

use crate::USER_AGENT;

const LOG_TARGET: &str = "newsrelay::page";

/// Upper bound on the time spent turning page markup into text
pub const HTML_CLEAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Elements whose contents never count as article text
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "meta", "template"];

#[derive(Debug, Snafu)]
pub enum PageError {
    #[snafu(display("Failed to build HTTP client: {source}"))]
    Client { source: reqwest::Error },
    #[snafu(display("Failed to download page {url}: {source}"))]
    Download { url: String, source: reqwest::Error },
}

pub type PageResult<T> = std::result::Result<T, PageError>;

#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    /// Download the markup of an article page
    async fn fetch_html(&self, url: &str) -> PageResult<String>;
}

pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> PageResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context(ClientSnafu)?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_html(&self, url: &str) -> PageResult<String> {
        debug!(target: LOG_TARGET, %url, "Downloading page");
        self.client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context(DownloadSnafu { url })?
            .text()
            .await
            .context(DownloadSnafu { url })
    }
}

/// Convert markup to plain text: one trimmed line per text node, blank lines
/// dropped, non-content elements skipped.
pub fn clean_html(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut lines = vec![];
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
        });
        if skipped {
            continue;
        }
        lines.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned),
        );
    }
    lines.join("\n")
}

/// [`clean_html`] off the async runtime, giving up after `limit`
///
/// Returns `None` on timeout or if the result is empty.
pub async fn clean_html_bounded(html: String, limit: Duration) -> Option<String> {
    let task = tokio::task::spawn_blocking(move || clean_html(&html));
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(text)) => Some(text).filter(|t| !t.is_empty()),
        Ok(Err(err)) => {
            warn!(target: LOG_TARGET, err = %err, "HTML cleaning task failed");
            None
        }
        Err(_) => {
            warn!(target: LOG_TARGET, ?limit, "HTML cleaning timed out");
            None
        }
    }
}

/// The `og:image` of a page, resolved against the page URL
pub fn extract_og_image(html: &str, page_url: &str) -> Option<String> {
    let selector = Selector::parse(r#"meta[property="og:image"]"#).ok()?;
    let document = Html::parse_document(html);

    let content = document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())?;

    match url::Url::parse(page_url).and_then(|base| base.join(content)) {
        Ok(url) => Some(url.to_string()),
        Err(_) => url::Url::parse(content).ok().map(|u| u.to_string()),
    }
}
