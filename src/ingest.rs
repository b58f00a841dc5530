//! Fetch → parse → reconcile, for one feed or a whole batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{Database, DedupScope, Feed};
use crate::error::IngestError;
use crate::favicon::resolve_favicon;
use crate::fetcher::Fetcher;
use crate::parser::ParsedFeed;
use crate::reconcile::{reconcile_entries, ReconcileStats};

/// Result of one feed within a batch.
#[derive(Debug)]
pub struct FeedOutcome {
    pub feed_id: i64,
    pub result: Result<ReconcileStats, IngestError>,
}

pub struct Ingestor {
    db: Arc<Database>,
    fetcher: Fetcher,
    scope: DedupScope,
    max_concurrent: usize,
    refreshing: Arc<RwLock<bool>>,
}

impl Ingestor {
    pub fn new(db: Arc<Database>, fetcher: Fetcher, scope: DedupScope, max_concurrent: usize) -> Self {
        Self {
            db,
            fetcher,
            scope,
            max_concurrent,
            refreshing: Arc::new(RwLock::new(false)),
        }
    }

    pub fn from_config(db: Arc<Database>, config: &Config) -> anyhow::Result<Self> {
        let fetcher = Fetcher::new(config.fetch.timeout(), &config.fetch.user_agent)?;
        Ok(Self::new(
            db,
            fetcher,
            config.ingest.dedup_scope,
            config.fetch.max_concurrent,
        ))
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    /// Ingest one feed and record the outcome on the feed row.
    pub async fn ingest(&self, feed: &Feed) -> Result<ReconcileStats, IngestError> {
        let result = self.ingest_document(feed, None).await;

        let error = result.as_ref().err().map(|e| e.to_string());
        if let Err(e) = self.db.record_fetch(feed.id, error.as_deref()).await {
            warn!(feed_id = feed.id, error = %e, "Failed to record fetch outcome");
        }

        result
    }

    /// Parse and reconcile a document. Without one, the feed URL is fetched.
    pub async fn ingest_document(
        &self,
        feed: &Feed,
        document: Option<Vec<u8>>,
    ) -> Result<ReconcileStats, IngestError> {
        let bytes = match document {
            Some(bytes) => bytes,
            None => self.fetcher.fetch(&feed.feed_url).await?,
        };

        let parsed = ParsedFeed::parse(&bytes)?;
        if parsed.is_empty() {
            debug!(feed_id = feed.id, "Document has no entries");
        }
        debug!(feed_id = feed.id, entries = parsed.len(), "Document parsed");

        let stats = reconcile_entries(&self.db, feed.id, parsed.entries(Utc::now()), self.scope)
            .await
            .map_err(IngestError::storage)?;

        info!(
            feed_id = feed.id,
            title = %feed.title,
            created = stats.created,
            updated = stats.updated,
            "Feed ingested"
        );
        Ok(stats)
    }

    /// Ingest every feed concurrently and wait for all of them.
    ///
    /// A failing feed never aborts its siblings. Once `cancel` reads `true`,
    /// feeds that have not started yet report [`IngestError::Cancelled`];
    /// fetches already in flight run to completion or to their timeout.
    pub async fn ingest_batch(
        &self,
        feeds: Vec<Feed>,
        cancel: watch::Receiver<bool>,
    ) -> Vec<FeedOutcome> {
        let limit = match self.max_concurrent {
            0 => feeds.len().max(1),
            n => n,
        };

        stream::iter(feeds)
            .map(|feed| {
                let cancel = cancel.clone();
                async move {
                    let cancelled = *cancel.borrow();
                    let result = if cancelled {
                        Err(IngestError::Cancelled)
                    } else {
                        self.ingest(&feed).await
                    };

                    match &result {
                        Err(IngestError::Cancelled) => {
                            debug!(feed_id = feed.id, "Feed not fetched, run cancelled")
                        }
                        Err(e) => warn!(
                            feed_id = feed.id,
                            url = %feed.feed_url,
                            kind = e.kind(),
                            error = %e,
                            "Feed skipped this cycle"
                        ),
                        Ok(_) => {}
                    }

                    FeedOutcome {
                        feed_id: feed.id,
                        result,
                    }
                }
            })
            .buffered(limit)
            .collect()
            .await
    }

    /// One ingestion run over every live feed in a live (or no) category.
    pub async fn ingest_all(&self, cancel: watch::Receiver<bool>) -> anyhow::Result<Vec<FeedOutcome>> {
        let feeds = self.db.list_ingestable_feeds().await?;
        info!("Refreshing {} feeds", feeds.len());

        let outcomes = self.ingest_batch(feeds, cancel).await;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        let created: usize = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|s| s.created)
            .sum();
        info!(
            feeds = outcomes.len(),
            failed,
            created,
            "Feed refresh complete"
        );
        Ok(outcomes)
    }

    /// [`Ingestor::ingest_all`] unless a run is already in progress.
    pub async fn refresh_all_feeds(&self, cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return Ok(());
            }
            *refreshing = true;
        }

        let result = self.ingest_all(cancel).await;

        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        result.map(|_| ())
    }

    /// Subscribe to a new feed: fetch it, store its metadata, then its entries.
    pub async fn create_feed(
        &self,
        feed_url: &str,
        category_id: Option<i64>,
    ) -> Result<(Feed, ReconcileStats), IngestError> {
        let bytes = self.fetcher.fetch(feed_url).await?;
        let parsed = ParsedFeed::parse(&bytes)?;

        let mut meta = parsed.meta();
        if meta.title.is_empty() {
            meta.title = feed_url.to_string();
        }
        let favicon = match meta.site_url.as_deref() {
            Some(site) => resolve_favicon(&self.fetcher, site).await,
            None => None,
        };

        let feed = self
            .db
            .create_feed(feed_url, category_id, &meta.into_details(favicon))
            .await
            .map_err(IngestError::storage)?;
        info!(feed_id = feed.id, url = %feed_url, "Feed created");

        let stats = reconcile_entries(&self.db, feed.id, parsed.entries(Utc::now()), self.scope)
            .await
            .map_err(IngestError::storage)?;
        if let Err(e) = self.db.record_fetch(feed.id, None).await {
            warn!(feed_id = feed.id, error = %e, "Failed to record fetch outcome");
        }

        Ok((feed, stats))
    }

    /// Re-read a feed's own title, image, subtitle, site and favicon, then its entries.
    pub async fn refresh_feed_metadata(&self, feed: &Feed) -> Result<ReconcileStats, IngestError> {
        let bytes = self.fetcher.fetch(&feed.feed_url).await?;
        let parsed = ParsedFeed::parse(&bytes)?;

        let mut meta = parsed.meta();
        if meta.title.is_empty() {
            meta.title = feed.title.clone();
        }
        let favicon = match meta.site_url.as_deref() {
            Some(site) => resolve_favicon(&self.fetcher, site).await,
            None => None,
        };

        self.db
            .update_feed_metadata(feed.id, &meta.into_details(favicon))
            .await
            .map_err(IngestError::storage)?;

        let stats = reconcile_entries(&self.db, feed.id, parsed.entries(Utc::now()), self.scope)
            .await
            .map_err(IngestError::storage)?;
        if let Err(e) = self.db.record_fetch(feed.id, None).await {
            warn!(feed_id = feed.id, error = %e, "Failed to record fetch outcome");
        }

        Ok(stats)
    }
}

/// Run ingestion now and then every `interval_minutes` until `shutdown` fires.
pub async fn start_background_refresh(
    ingestor: Arc<Ingestor>,
    interval_minutes: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = Duration::from_secs(interval_minutes * 60);

    info!("Starting initial feed fetch");
    if let Err(e) = ingestor.refresh_all_feeds(shutdown.clone()).await {
        error!("Initial feed fetch failed: {}", e);
    }

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Background refresh stopped");
                    return;
                }
                continue;
            }
        }

        info!("Starting scheduled feed refresh");
        if let Err(e) = ingestor.refresh_all_feeds(shutdown.clone()).await {
            error!("Scheduled feed refresh failed: {}", e);
        }
    }
}
