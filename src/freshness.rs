//! Per-feed unread counts and "has new entries" flags.
//!
//! The newest `published_at` per feed comes from one aggregate query whose
//! result is kept as a snapshot for a short window. The snapshot is replaced
//! wholesale when it expires; writes never invalidate it, so a reader may see
//! data up to one window old.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::db::{Database, Feed};

pub type MaxPublished = HashMap<i64, Option<DateTime<Utc>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    pub un_read: i64,
    pub new_entries: bool,
}

struct Snapshot {
    taken_at: Instant,
    max_published: Arc<MaxPublished>,
}

/// Time-bounded cache of the max-published aggregate.
pub struct FreshnessCache {
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
}

impl FreshnessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            snapshot: RwLock::new(None),
        }
    }

    /// The cached mapping, if it is younger than the TTL.
    pub fn get(&self) -> Option<Arc<MaxPublished>> {
        let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|s| s.taken_at.elapsed() < self.ttl)
            .map(|s| Arc::clone(&s.max_published))
    }

    pub fn store(&self, max_published: MaxPublished) -> Arc<MaxPublished> {
        let max_published = Arc::new(max_published);
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Snapshot {
            taken_at: Instant::now(),
            max_published: Arc::clone(&max_published),
        });
        max_published
    }

    pub fn clear(&self) {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}

/// Decide whether a feed has entries the user has not seen.
///
/// With a known newest entry the feed is fresh when it was last read before
/// that entry was published. Without one (no entries, or a feed the snapshot
/// does not know about yet) any unread entry counts.
pub fn has_new_entries(
    last_read_at: Option<DateTime<Utc>>,
    max_published: Option<DateTime<Utc>>,
    un_read: i64,
) -> bool {
    match max_published {
        Some(newest) => last_read_at.map_or(true, |read| read < newest),
        None => un_read > 0,
    }
}

pub struct FreshnessTracker {
    db: Arc<Database>,
    cache: FreshnessCache,
}

impl FreshnessTracker {
    pub fn new(db: Arc<Database>, cache: FreshnessCache) -> Self {
        Self { db, cache }
    }

    pub fn cache(&self) -> &FreshnessCache {
        &self.cache
    }

    pub async fn max_published(&self) -> anyhow::Result<Arc<MaxPublished>> {
        if let Some(cached) = self.cache.get() {
            return Ok(cached);
        }
        debug!("Freshness snapshot expired, recomputing");
        let fresh = self.db.max_published_by_feed().await?;
        Ok(self.cache.store(fresh))
    }

    /// Status for already loaded feeds.
    pub async fn status_for_feeds(&self, feeds: &[Feed]) -> anyhow::Result<HashMap<i64, FeedStatus>> {
        let unread = self.db.unread_counts().await?;
        let max_published = self.max_published().await?;

        Ok(feeds
            .iter()
            .map(|feed| {
                let un_read = unread.get(&feed.id).copied().unwrap_or(0);
                let newest = max_published.get(&feed.id).copied().flatten();
                let status = FeedStatus {
                    un_read,
                    new_entries: has_new_entries(feed.last_read_at, newest, un_read),
                };
                (feed.id, status)
            })
            .collect())
    }

    /// Status for the given feed ids. Unknown or deleted feeds are omitted.
    pub async fn unread_status(&self, feed_ids: &[i64]) -> anyhow::Result<HashMap<i64, FeedStatus>> {
        let feeds: Vec<Feed> = self
            .db
            .list_feeds()
            .await?
            .into_iter()
            .filter(|f| feed_ids.contains(&f.id))
            .collect();
        self.status_for_feeds(&feeds).await
    }
}
