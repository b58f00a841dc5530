//! Merges parsed entries into storage.
//!
//! The merge is an upsert keyed on link: a known link has its content
//! overwritten in place (id, `read_at` and `deleted_at` survive), an unknown
//! link becomes a new entry owned by the feed. Nothing is ever removed, since
//! a feed document only carries its most recent items.

use serde::Serialize;
use tracing::debug;

use crate::db::{Database, DedupScope, EntryContent};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub created: usize,
    pub updated: usize,
}

pub async fn reconcile_entries<I>(
    db: &Database,
    feed_id: i64,
    entries: I,
    scope: DedupScope,
) -> anyhow::Result<ReconcileStats>
where
    I: IntoIterator<Item = EntryContent>,
{
    let mut stats = ReconcileStats::default();

    for content in entries {
        match db.find_entry_by_link(&content.link, scope, feed_id).await? {
            Some(existing) => {
                if existing.feed_id != feed_id {
                    debug!(
                        entry_id = existing.id,
                        from_feed = existing.feed_id,
                        to_feed = feed_id,
                        link = %content.link,
                        "Entry link already stored under another feed, reassigning"
                    );
                }
                db.update_entry_content(existing.id, feed_id, &content).await?;
                stats.updated += 1;
            }
            None => {
                db.insert_entry(feed_id, &content).await?;
                stats.created += 1;
            }
        }
    }

    Ok(stats)
}
