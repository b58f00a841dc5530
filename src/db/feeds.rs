use chrono::{DateTime, Utc};

use super::{Database, Feed};

/// Feed fields taken from the parsed document and favicon lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedDetails {
    pub title: String,
    pub feed_image: Option<String>,
    pub feed_subtitle: Option<String>,
    pub site_url: Option<String>,
    pub site_favicon_url: Option<String>,
}

impl Database {
    pub async fn list_feeds(&self) -> anyhow::Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(
            "SELECT * FROM live_feeds ORDER BY title COLLATE NOCASE ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Live feeds that are either uncategorized or sit in a live category.
    pub async fn list_ingestable_feeds(&self) -> anyhow::Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT * FROM live_feeds
            WHERE category_id IS NULL
               OR category_id IN (SELECT id FROM live_categories)
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> anyhow::Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM live_feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn create_feed(
        &self,
        feed_url: &str,
        category_id: Option<i64>,
        details: &FeedDetails,
    ) -> anyhow::Result<Feed> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (title, feed_url, feed_image, feed_subtitle, site_url,
                               site_favicon_url, category_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&details.title)
        .bind(feed_url)
        .bind(&details.feed_image)
        .bind(&details.feed_subtitle)
        .bind(&details.site_url)
        .bind(&details.site_favicon_url)
        .bind(category_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(feed)
    }

    /// User-editable fields.
    pub async fn update_feed(
        &self,
        feed_id: i64,
        feed_url: &str,
        title: &str,
        category_id: Option<i64>,
        site_favicon_url: Option<&str>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET feed_url = ?, title = ?, category_id = ?, site_favicon_url = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(feed_url)
        .bind(title)
        .bind(category_id)
        .bind(site_favicon_url)
        .bind(Utc::now())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the fields that come from the feed document itself.
    pub async fn update_feed_metadata(
        &self,
        feed_id: i64,
        details: &FeedDetails,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET title = ?, feed_image = ?, feed_subtitle = ?, site_url = ?,
                site_favicon_url = COALESCE(?, site_favicon_url), updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&details.title)
        .bind(&details.feed_image)
        .bind(&details.feed_subtitle)
        .bind(&details.site_url)
        .bind(&details.site_favicon_url)
        .bind(Utc::now())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_feed(&self, feed_id: i64) -> anyhow::Result<bool> {
        let result =
            sqlx::query("UPDATE feeds SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(Utc::now())
                .bind(feed_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_feed_read(&self, feed_id: i64, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE feeds SET last_read_at = ? WHERE id = ?")
            .bind(at)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the outcome of the latest fetch; a successful one clears the error.
    pub async fn record_fetch(&self, feed_id: i64, error: Option<&str>) -> anyhow::Result<()> {
        sqlx::query("UPDATE feeds SET last_fetched_at = ?, last_error = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;

    mod create_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_feed() {
            let db = create_test_db().await;
            let details = FeedDetails {
                title: "Blog".to_string(),
                feed_image: Some("https://blog.example.com/logo.png".to_string()),
                feed_subtitle: Some("Posts".to_string()),
                site_url: Some("https://blog.example.com".to_string()),
                site_favicon_url: None,
            };

            let feed = db
                .create_feed("https://blog.example.com/rss", None, &details)
                .await
                .unwrap();

            assert_eq!(feed.title, "Blog");
            assert_eq!(feed.feed_url, "https://blog.example.com/rss");
            assert_eq!(feed.feed_subtitle.as_deref(), Some("Posts"));
            assert!(feed.category_id.is_none());
            assert!(feed.last_read_at.is_none());
        }

        #[tokio::test]
        async fn test_get_nonexistent_feed() {
            let db = create_test_db().await;
            assert!(db.get_feed(999).await.unwrap().is_none());
        }
    }

    mod listing_tests {
        use super::*;

        #[tokio::test]
        async fn test_deleted_feed_hidden() {
            let db = create_test_db().await;
            let a = create_feed(&db, "Alpha", None).await;
            create_feed(&db, "Beta", None).await;

            assert!(db.delete_feed(a.id).await.unwrap());

            let feeds = db.list_feeds().await.unwrap();
            assert_eq!(feeds.len(), 1);
            assert_eq!(feeds[0].title, "Beta");
            assert!(db.get_feed(a.id).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_ingestable_feeds_skip_deleted_categories() {
            let db = create_test_db().await;
            let live = db.create_category("Live").await.unwrap();
            let gone = db.create_category("Gone").await.unwrap();

            let in_live = create_feed(&db, "In Live", Some(live.id)).await;
            create_feed(&db, "In Gone", Some(gone.id)).await;
            let loose = create_feed(&db, "Loose", None).await;
            let deleted = create_feed(&db, "Deleted", Some(live.id)).await;
            db.delete_feed(deleted.id).await.unwrap();
            db.delete_category(gone.id).await.unwrap();

            let ids: Vec<i64> = db
                .list_ingestable_feeds()
                .await
                .unwrap()
                .iter()
                .map(|f| f.id)
                .collect();
            assert_eq!(ids, vec![in_live.id, loose.id]);
        }
    }

    mod update_tests {
        use super::*;

        #[tokio::test]
        async fn test_update_feed() {
            let db = create_test_db().await;
            let category = db.create_category("Tech").await.unwrap();
            let feed = create_feed(&db, "Old", None).await;

            let updated = db
                .update_feed(
                    feed.id,
                    "https://new.example.com/rss",
                    "New",
                    Some(category.id),
                    Some("https://new.example.com/favicon.ico"),
                )
                .await
                .unwrap();
            assert!(updated);

            let feed = db.get_feed(feed.id).await.unwrap().unwrap();
            assert_eq!(feed.title, "New");
            assert_eq!(feed.feed_url, "https://new.example.com/rss");
            assert_eq!(feed.category_id, Some(category.id));
            assert!(feed.updated_at.is_some());
        }

        #[tokio::test]
        async fn test_update_metadata_keeps_favicon_when_unresolved() {
            let db = create_test_db().await;
            let details = FeedDetails {
                title: "Blog".to_string(),
                site_favicon_url: Some("https://blog.example.com/favicon.ico".to_string()),
                ..Default::default()
            };
            let feed = db
                .create_feed("https://blog.example.com/rss", None, &details)
                .await
                .unwrap();

            let refreshed = FeedDetails {
                title: "Blog Renamed".to_string(),
                feed_subtitle: Some("Now with subtitle".to_string()),
                ..Default::default()
            };
            db.update_feed_metadata(feed.id, &refreshed).await.unwrap();

            let feed = db.get_feed(feed.id).await.unwrap().unwrap();
            assert_eq!(feed.title, "Blog Renamed");
            assert_eq!(feed.feed_subtitle.as_deref(), Some("Now with subtitle"));
            assert_eq!(
                feed.site_favicon_url.as_deref(),
                Some("https://blog.example.com/favicon.ico")
            );
        }

        #[tokio::test]
        async fn test_touch_feed_read() {
            let db = create_test_db().await;
            let feed = create_feed(&db, "Blog", None).await;
            let now = Utc::now();

            db.touch_feed_read(feed.id, now).await.unwrap();

            let feed = db.get_feed(feed.id).await.unwrap().unwrap();
            let stored = feed.last_read_at.unwrap();
            assert!((stored - now).num_milliseconds().abs() < 1);
        }

        #[tokio::test]
        async fn test_record_fetch_clears_previous_error() {
            let db = create_test_db().await;
            let feed = create_feed(&db, "Blog", None).await;

            db.record_fetch(feed.id, Some("Connection timeout")).await.unwrap();
            let failed = db.get_feed(feed.id).await.unwrap().unwrap();
            assert_eq!(failed.last_error.as_deref(), Some("Connection timeout"));
            assert!(failed.last_fetched_at.is_some());

            db.record_fetch(feed.id, None).await.unwrap();
            let ok = db.get_feed(feed.id).await.unwrap().unwrap();
            assert!(ok.last_error.is_none());
        }
    }
}
