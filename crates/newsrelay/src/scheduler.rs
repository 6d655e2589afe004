use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use newsrelay_db::Database;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::RetentionPolicy;
use crate::dedup::DuplicateMatch;
use crate::feed::FeedSource;
use crate::pipeline::{ArticleOutcome, ArticlePipeline};

const LOG_TARGET: &str = "newsrelay::scheduler";

/// Counters of one cycle
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub feeds_ok: usize,
    pub feeds_failed: usize,
    pub candidates: usize,
    pub published: usize,
    pub already_seen: usize,
    pub empty_text: usize,
    pub irrelevant: usize,
    pub duplicates: usize,
    /// Duplicates decided by title overlap alone, without the oracle
    pub title_overlaps: usize,
    pub summarize_failed: usize,
    pub publish_failed: usize,
    pub store_errors: usize,
    pub purged: usize,
    /// Shutdown was requested before all candidates were processed
    pub interrupted: bool,
}

impl CycleReport {
    fn count(&mut self, outcome: &ArticleOutcome) {
        let counter = match outcome {
            ArticleOutcome::Published { .. } => &mut self.published,
            ArticleOutcome::AlreadySeen => &mut self.already_seen,
            ArticleOutcome::EmptyText => &mut self.empty_text,
            ArticleOutcome::Irrelevant => &mut self.irrelevant,
            ArticleOutcome::Duplicate { matched_by, .. } => {
                if *matched_by == DuplicateMatch::TitleOverlap {
                    self.title_overlaps += 1;
                }
                &mut self.duplicates
            }
            ArticleOutcome::SummarizeFailed => &mut self.summarize_failed,
            ArticleOutcome::PublishFailed => &mut self.publish_failed,
        };
        *counter += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was still running
    Skipped,
}

/// Time from `now` until the next multiple of `interval` since the epoch
pub fn delay_until_next_boundary(now: SystemTime, interval: Duration) -> Duration {
    let interval_secs = interval.as_secs().max(1);
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    let into_interval = Duration::from_secs(since_epoch.as_secs() % interval_secs)
        + Duration::from_nanos(u64::from(since_epoch.subsec_nanos()));

    if into_interval.is_zero() {
        Duration::ZERO
    } else {
        Duration::from_secs(interval_secs) - into_interval
    }
}

/// Drives fetch → pipeline → purge passes, one at a time
pub struct CycleScheduler {
    feeds: Arc<dyn FeedSource>,
    feed_urls: Vec<String>,
    pipeline: ArticlePipeline,
    db: Arc<Database>,
    retention: RetentionPolicy,
    interval: Duration,
    align_to_interval: bool,
    cycle_lock: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
}

#[bon::bon]
impl CycleScheduler {
    #[builder(finish_fn(name = "build"))]
    pub fn new(
        feeds: Arc<dyn FeedSource>,
        feed_urls: Vec<String>,
        pipeline: ArticlePipeline,
        db: Arc<Database>,
        retention: RetentionPolicy,
        #[builder(default = Duration::from_secs(60 * 60))] interval: Duration,
        #[builder(default = true)] align_to_interval: bool,
    ) -> Self {
        Self {
            feeds,
            feed_urls,
            pipeline,
            db,
            retention,
            interval,
            align_to_interval,
            cycle_lock: Mutex::new(()),
            shutdown_tx: watch::channel(false).0,
        }
    }

    /// Ask [`Self::run_forever`] and any running cycle to stop
    ///
    /// The article being processed is finished first.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// One full pass over all feeds, followed by a store purge
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!(target: LOG_TARGET, "Previous cycle still running, skipping");
            return CycleOutcome::Skipped;
        };

        info!(target: LOG_TARGET, feeds = self.feed_urls.len(), "Starting cycle");
        let mut report = CycleReport::default();

        'feeds: for feed_url in &self.feed_urls {
            let articles = match self.feeds.fetch(feed_url).await {
                Ok(articles) => {
                    report.feeds_ok += 1;
                    articles
                }
                Err(err) => {
                    report.feeds_failed += 1;
                    warn!(target: LOG_TARGET, err = %err, url = %feed_url, "Failed to fetch feed");
                    continue;
                }
            };
            info!(target: LOG_TARGET, url = %feed_url, count = articles.len(), "Processing feed");

            for article in &articles {
                if self.is_shutdown_requested() {
                    report.interrupted = true;
                    break 'feeds;
                }
                report.candidates += 1;

                match self.pipeline.process(article).await {
                    Ok(outcome) => report.count(&outcome),
                    Err(err) => {
                        report.store_errors += 1;
                        error!(target: LOG_TARGET, err = %err, link = %article.link, "Failed to process article");
                    }
                }
            }
        }

        let purged = self.purge(&mut report).await;
        report.purged = purged;

        info!(target: LOG_TARGET, ?report, "Cycle complete");
        CycleOutcome::Completed(report)
    }

    async fn purge(&self, report: &mut CycleReport) -> usize {
        let mut purged = 0;

        match self.db.purge_older_than(self.retention.max_age).await {
            Ok(count) => purged += count,
            Err(err) => {
                report.store_errors += 1;
                error!(target: LOG_TARGET, err = %err, "Failed to purge old records");
            }
        }

        if let Some(max_records) = self.retention.max_records {
            match self.db.retain_most_recent(max_records).await {
                Ok(count) => purged += count,
                Err(err) => {
                    report.store_errors += 1;
                    error!(target: LOG_TARGET, err = %err, "Failed to trim records");
                }
            }
        }

        purged
    }

    /// Run cycles on a fixed interval until shutdown is requested
    pub async fn run_forever(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let first_delay = if self.align_to_interval {
            delay_until_next_boundary(SystemTime::now(), self.interval)
        } else {
            Duration::ZERO
        };
        info!(
            target: LOG_TARGET,
            first_run_in_secs = first_delay.as_secs(),
            interval_mins = self.interval.as_secs() / 60,
            "Scheduler started"
        );

        let mut interval = tokio::time::interval_at(Instant::now() + first_delay, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    break;
                }
            }

            if let CycleOutcome::Completed(report) = self.run_cycle().await {
                if report.interrupted {
                    break;
                }
            }

            if self.is_shutdown_requested() {
                break;
            }
            info!(
                target: LOG_TARGET,
                next_run_in_minutes = self.interval.as_secs() / 60,
                "Waiting for next run"
            );
        }

        info!(target: LOG_TARGET, "Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn delay_to_next_hour() {
        // 1_700_000_000 is 22:13:20 UTC
        assert_eq!(
            delay_until_next_boundary(at(1_700_000_000), HOUR),
            Duration::from_secs(46 * 60 + 40)
        );
        assert_eq!(
            delay_until_next_boundary(at(1_699_999_200), HOUR),
            Duration::ZERO
        );
    }

    #[test]
    fn delay_accounts_for_subsecond_time() {
        let now = at(1_699_999_200) + Duration::from_millis(250);
        assert_eq!(
            delay_until_next_boundary(now, HOUR),
            HOUR - Duration::from_millis(250)
        );
    }

    #[test]
    fn delay_for_short_intervals() {
        assert_eq!(
            delay_until_next_boundary(at(1_700_000_000), Duration::from_secs(15 * 60)),
            Duration::from_secs(15 * 60 - 13 * 60 - 20)
        );
    }

    #[test]
    fn report_counts_outcomes() {
        let mut report = CycleReport::default();
        report.count(&ArticleOutcome::Published {
            reference: "https://t.me/ch/1".into(),
        });
        report.count(&ArticleOutcome::AlreadySeen);
        report.count(&ArticleOutcome::AlreadySeen);
        report.count(&ArticleOutcome::Duplicate {
            existing_title: "x".into(),
            matched_by: DuplicateMatch::TitleOverlap,
        });

        assert_eq!(report.published, 1);
        assert_eq!(report.already_seen, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.title_overlaps, 1);
        assert_eq!(report.irrelevant, 0);
    }
}
