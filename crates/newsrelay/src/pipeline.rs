use std::sync::Arc;

use newsrelay_db::{ArticleRecord, DEFAULT_RECENT_WINDOW, Database, DbError, Timestamp};
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, info, instrument, warn};

use crate::ai::{ContentClassifier, SimilarityOracle, Summarizer};
use crate::channel::{OutboundPost, PublishChannel};
use crate::dedup::{DuplicateDetector, DuplicateMatch, DuplicateVerdict};
use crate::feed::FeedArticle;
use crate::image::ImageProbe;
use crate::page::{HTML_CLEAN_TIMEOUT, PageFetcher, clean_html_bounded, extract_og_image};

const LOG_TARGET: &str = "newsrelay::pipeline";

#[derive(Debug, Snafu)]
pub enum PipelineError {
    #[snafu(display("Record store error: {source}"))]
    Store { source: DbError },
    #[snafu(display("Published as {reference} but failed to record: {source}"))]
    Record { reference: String, source: DbError },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// How a single candidate article ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleOutcome {
    Published { reference: String },
    /// Link already recorded
    AlreadySeen,
    /// Neither the page nor the feed had any text
    EmptyText,
    Irrelevant,
    /// Same story as a recently published article
    Duplicate {
        existing_title: String,
        matched_by: DuplicateMatch,
    },
    SummarizeFailed,
    PublishFailed,
}

/// Hashtags of a post, without the `#`, in order of appearance
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = vec![];
    for word in text.split_whitespace() {
        let Some(tag) = word.strip_prefix('#') else {
            continue;
        };
        let tag: String = tag
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Runs one candidate article through every stage, from the seen check to
/// the store write
pub struct ArticlePipeline {
    db: Arc<Database>,
    pages: Arc<dyn PageFetcher>,
    images: Arc<dyn ImageProbe>,
    classifier: Arc<dyn ContentClassifier>,
    summarizer: Arc<dyn Summarizer>,
    channel: Arc<dyn PublishChannel>,
    detector: DuplicateDetector,
}

#[bon::bon]
impl ArticlePipeline {
    #[builder(finish_fn(name = "build"))]
    pub fn new(
        db: Arc<Database>,
        pages: Arc<dyn PageFetcher>,
        images: Arc<dyn ImageProbe>,
        classifier: Arc<dyn ContentClassifier>,
        summarizer: Arc<dyn Summarizer>,
        oracle: Arc<dyn SimilarityOracle>,
        channel: Arc<dyn PublishChannel>,
        #[builder(default = DEFAULT_RECENT_WINDOW)] similarity_window: usize,
    ) -> Self {
        Self {
            detector: DuplicateDetector::new(db.clone(), oracle, similarity_window),
            db,
            pages,
            images,
            classifier,
            summarizer,
            channel,
        }
    }

    #[instrument(skip_all, fields(link = %article.link))]
    pub async fn process(&self, article: &FeedArticle) -> PipelineResult<ArticleOutcome> {
        if self.db.exists(&article.link).await.context(StoreSnafu)? {
            debug!(target: LOG_TARGET, "Already processed");
            return Ok(ArticleOutcome::AlreadySeen);
        }

        let (text, page_image) = self.load_text(article).await;
        let Some(text) = text else {
            info!(target: LOG_TARGET, "No article text, skipping");
            return Ok(ArticleOutcome::EmptyText);
        };

        match self.classifier.is_relevant(&text, &article.link).await {
            Ok(true) => {}
            Ok(false) => {
                info!(target: LOG_TARGET, title = %article.title, "Not relevant, skipping");
                return Ok(ArticleOutcome::Irrelevant);
            }
            Err(err) => {
                warn!(target: LOG_TARGET, err = %err, "Relevance check failed, treating as relevant");
            }
        }

        match self.detector.check(article).await.context(StoreSnafu)? {
            DuplicateVerdict::Unique => {}
            DuplicateVerdict::SeenLink => return Ok(ArticleOutcome::AlreadySeen),
            DuplicateVerdict::SimilarTitle {
                existing_title,
                matched_by,
            } => {
                return Ok(ArticleOutcome::Duplicate {
                    existing_title,
                    matched_by,
                });
            }
        }

        let summary = match self.summarizer.summarize(&text, &article.link).await {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_owned(),
            Ok(_) => {
                warn!(target: LOG_TARGET, "Empty summary, skipping");
                return Ok(ArticleOutcome::SummarizeFailed);
            }
            Err(err) => {
                warn!(target: LOG_TARGET, err = %err, "Summarization failed, skipping");
                return Ok(ArticleOutcome::SummarizeFailed);
            }
        };

        let post = OutboundPost {
            image_url: self.pick_image(page_image, article).await,
            text: summary,
        };

        let reference = match self.channel.publish(&post).await {
            Ok(reference) => reference,
            Err(err) => {
                warn!(target: LOG_TARGET, err = %err, "Publishing failed, will retry next cycle");
                return Ok(ArticleOutcome::PublishFailed);
            }
        };

        let record = ArticleRecord {
            link: article.link.clone(),
            title: article.title.clone(),
            keywords: extract_hashtags(&post.text),
            published_reference: reference.clone(),
            processed_at: Timestamp::now(),
        };
        match self.db.insert(&record).await {
            Ok(()) => {}
            Err(err) if err.is_constraint_violation() => {
                info!(target: LOG_TARGET, "Article was already recorded");
            }
            Err(source) => return Err(PipelineError::Record { reference, source }),
        }

        Ok(ArticleOutcome::Published { reference })
    }

    /// Cleaned page text, falling back to the feed body, and the page's
    /// `og:image`
    async fn load_text(&self, article: &FeedArticle) -> (Option<String>, Option<String>) {
        let mut page_image = None;
        let mut text = None;

        match self.pages.fetch_html(&article.link).await {
            Ok(html) => {
                page_image = extract_og_image(&html, &article.link);
                text = clean_html_bounded(html, HTML_CLEAN_TIMEOUT).await;
            }
            Err(err) => {
                warn!(target: LOG_TARGET, err = %err, "Failed to load page, using feed body");
            }
        }

        if text.is_none() {
            if let Some(body) = article.body.clone() {
                text = clean_html_bounded(body, HTML_CLEAN_TIMEOUT).await;
            }
        }

        (text, page_image)
    }

    async fn pick_image(&self, page_image: Option<String>, article: &FeedArticle) -> Option<String> {
        for candidate in [page_image, article.image.clone()].into_iter().flatten() {
            if self.images.is_usable(&candidate).await {
                return Some(candidate);
            }
            debug!(target: LOG_TARGET, url = %candidate, "Image rejected");
        }
        None
    }
}
