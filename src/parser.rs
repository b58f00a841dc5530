//! Normalizes RSS/Atom/JSON Feed documents into feed metadata and entry records.

use chrono::{DateTime, Utc};
use feed_rs::model;
use feed_rs::parser;
use tracing::debug;

use crate::db::{EntryContent, FeedDetails};
use crate::error::IngestError;

/// Feed-level fields of a parsed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMeta {
    pub title: String,
    pub image: Option<String>,
    pub subtitle: Option<String>,
    pub site_url: Option<String>,
}

impl FeedMeta {
    /// Storage form, with the favicon resolved separately.
    pub fn into_details(self, site_favicon_url: Option<String>) -> FeedDetails {
        FeedDetails {
            title: self.title,
            feed_image: self.image,
            feed_subtitle: self.subtitle,
            site_url: self.site_url,
            site_favicon_url,
        }
    }
}

pub struct ParsedFeed {
    feed: model::Feed,
}

impl ParsedFeed {
    pub fn parse(bytes: &[u8]) -> Result<Self, IngestError> {
        let feed = parser::parse(bytes).map_err(|e| IngestError::Parse(e.to_string()))?;
        Ok(Self { feed })
    }

    pub fn meta(&self) -> FeedMeta {
        let title = self
            .feed
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default();

        let image = self
            .feed
            .logo
            .as_ref()
            .or(self.feed.icon.as_ref())
            .map(|i| i.uri.clone())
            .filter(|uri| !uri.is_empty());

        let subtitle = self
            .feed
            .description
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .filter(|s| !s.is_empty());

        // RSS <link> carries no rel, Atom marks the site as "alternate"
        let site_url = self
            .feed
            .links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .map(|l| l.href.clone());

        FeedMeta {
            title,
            image,
            subtitle,
            site_url,
        }
    }

    pub fn len(&self) -> usize {
        self.feed.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feed.entries.is_empty()
    }

    /// Lazily normalize entries. Entries without a link are skipped; entries
    /// with no date get `now`.
    pub fn entries(&self, now: DateTime<Utc>) -> impl Iterator<Item = EntryContent> + '_ {
        self.feed
            .entries
            .iter()
            .filter_map(move |entry| normalize_entry(entry, now))
    }
}

fn normalize_entry(entry: &model::Entry, now: DateTime<Utc>) -> Option<EntryContent> {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let link = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default();

    if link.is_empty() {
        debug!(title = %title, "Skipping entry with no link");
        return None;
    }

    let author = entry
        .authors
        .iter()
        .map(|p| p.name.trim())
        .find(|name| !name.is_empty())
        .map(str::to_string);

    let summary = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .filter(|s| !s.trim().is_empty());

    let published_at = entry.published.or(entry.updated).unwrap_or(now);

    Some(EntryContent {
        title,
        author,
        summary,
        link,
        published_at,
    })
}
