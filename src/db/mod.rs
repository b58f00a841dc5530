//! SQLite persistence for categories, feeds and entries.
//!
//! Rows are never hard-deleted. Every table has a `deleted_at` column and a
//! matching `live_*` view that hides soft-deleted rows; reads go through the
//! views and writes target the base tables.

mod categories;
mod entries;
mod feeds;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

pub use categories::Direction;
pub use entries::EntryContent;
pub use feeds::FeedDetails;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Category {
    pub id: i64,
    pub title: String,
    #[sqlx(rename = "sort_order")]
    pub order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub feed_url: String,
    pub feed_image: Option<String>,
    pub feed_subtitle: Option<String>,
    pub site_url: Option<String>,
    pub site_favicon_url: Option<String>,
    pub category_id: Option<i64>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// How an incoming entry is matched against stored ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupScope {
    /// Match on link alone, across every feed
    #[default]
    Global,
    /// Match on (feed, link)
    Feed,
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        sort_order INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT,
        deleted_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feeds (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        feed_url TEXT NOT NULL,
        feed_image TEXT,
        feed_subtitle TEXT,
        site_url TEXT,
        site_favicon_url TEXT,
        category_id INTEGER REFERENCES categories(id),
        last_read_at TEXT,
        last_fetched_at TEXT,
        last_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT,
        deleted_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entries (
        id INTEGER PRIMARY KEY,
        feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        author TEXT,
        summary TEXT,
        link TEXT NOT NULL,
        published_at TEXT NOT NULL,
        read_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT,
        deleted_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_entries_link ON entries(link)",
    "CREATE INDEX IF NOT EXISTS idx_entries_feed_published ON entries(feed_id, published_at DESC)",
    "CREATE VIEW IF NOT EXISTS live_categories AS SELECT * FROM categories WHERE deleted_at IS NULL",
    "CREATE VIEW IF NOT EXISTS live_feeds AS SELECT * FROM feeds WHERE deleted_at IS NULL",
    "CREATE VIEW IF NOT EXISTS live_entries AS SELECT * FROM entries WHERE deleted_at IS NULL",
];

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Each connection to `:memory:` is its own database, so keep exactly one alive.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(database_url)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?
        };

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}
