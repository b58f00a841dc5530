use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{Database, DedupScope, Entry};

/// Mutable entry fields as produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryContent {
    pub title: String,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub link: String,
    pub published_at: DateTime<Utc>,
}

impl Database {
    /// Look up a stored entry by link.
    ///
    /// Soft-deleted rows are included so that re-ingesting them updates in
    /// place instead of resurrecting a duplicate. The oldest row wins when
    /// several share a link.
    pub async fn find_entry_by_link(
        &self,
        link: &str,
        scope: DedupScope,
        feed_id: i64,
    ) -> anyhow::Result<Option<Entry>> {
        let entry = match scope {
            DedupScope::Global => {
                sqlx::query_as::<_, Entry>(
                    "SELECT * FROM entries WHERE link = ? ORDER BY id ASC LIMIT 1",
                )
                .bind(link)
                .fetch_optional(&self.pool)
                .await?
            }
            DedupScope::Feed => {
                sqlx::query_as::<_, Entry>(
                    "SELECT * FROM entries WHERE feed_id = ? AND link = ? ORDER BY id ASC LIMIT 1",
                )
                .bind(feed_id)
                .bind(link)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(entry)
    }

    pub async fn insert_entry(&self, feed_id: i64, content: &EntryContent) -> anyhow::Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO entries (feed_id, title, author, summary, link, published_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(feed_id)
        .bind(&content.title)
        .bind(&content.author)
        .bind(&content.summary)
        .bind(&content.link)
        .bind(content.published_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Overwrite content fields and owner, leaving `read_at` and `deleted_at` alone.
    pub async fn update_entry_content(
        &self,
        entry_id: i64,
        feed_id: i64,
        content: &EntryContent,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE entries
            SET title = ?, author = ?, summary = ?, link = ?, published_at = ?,
                feed_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&content.title)
        .bind(&content.author)
        .bind(&content.summary)
        .bind(&content.link)
        .bind(content.published_at)
        .bind(feed_id)
        .bind(Utc::now())
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_entry(&self, entry_id: i64) -> anyhow::Result<Option<Entry>> {
        let entry = sqlx::query_as::<_, Entry>("SELECT * FROM live_entries WHERE id = ?")
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    /// Set `read_at` unless the entry was already read.
    pub async fn mark_entry_read(&self, entry_id: i64, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE entries SET read_at = ? WHERE id = ? AND read_at IS NULL AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// One page of a feed's entries, newest first. Pages start at 1.
    pub async fn list_entries_for_feed(
        &self,
        feed_id: i64,
        offset: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<Entry>> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT * FROM live_entries
            WHERE feed_id = ?
            ORDER BY published_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(feed_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    pub async fn count_entries_for_feed(&self, feed_id: i64) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM live_entries WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Case-insensitive substring match on title and summary.
    pub async fn search_entries(
        &self,
        phrase: &str,
        offset: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<Entry>> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT e.* FROM live_entries e
            JOIN live_feeds f ON f.id = e.feed_id
            WHERE instr(lower(e.title), lower(?1)) > 0
               OR instr(lower(COALESCE(e.summary, '')), lower(?1)) > 0
            ORDER BY e.published_at DESC, e.id DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(phrase)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Unread, non-deleted entry counts keyed by feed. Feeds with none are absent.
    pub async fn unread_counts(&self) -> anyhow::Result<HashMap<i64, i64>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT feed_id, COUNT(*) FROM live_entries WHERE read_at IS NULL GROUP BY feed_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Newest `published_at` per live feed, `None` for feeds without entries.
    pub async fn max_published_by_feed(
        &self,
    ) -> anyhow::Result<HashMap<i64, Option<DateTime<Utc>>>> {
        let rows: Vec<(i64, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"
            SELECT f.id, MAX(e.published_at)
            FROM live_feeds f
            LEFT JOIN live_entries e ON e.feed_id = f.id
            GROUP BY f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}
