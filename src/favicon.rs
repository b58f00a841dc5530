//! Site icon lookup used when a feed is created or its metadata refreshed.

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::fetcher::Fetcher;

/// Resolve the icon URL for a site.
///
/// The site's home page is scanned for `<link rel="icon">` (or
/// `rel="shortcut icon"`); the last such tag wins and relative hrefs are
/// joined onto the page URL. Without a usable tag, `/favicon.ico` at the
/// site root is used when it answers with a success status.
pub async fn resolve_favicon(fetcher: &Fetcher, site_url: &str) -> Option<String> {
    let base = Url::parse(site_url).ok()?;
    if !matches!(base.scheme(), "http" | "https") {
        return None;
    }

    match fetcher.fetch(base.as_str()).await {
        Ok(body) => {
            let html = String::from_utf8_lossy(&body);
            if let Some(icon) = find_icon_link(&html, &base) {
                return Some(icon);
            }
        }
        Err(e) => debug!(url = %base, error = %e, "Site page unavailable for favicon lookup"),
    }

    let fallback = base.join("/favicon.ico").ok()?;
    match fetcher.client().head(fallback.as_str()).send().await {
        Ok(response) if response.status().is_success() => Some(fallback.to_string()),
        Ok(response) => {
            debug!(url = %fallback, status = %response.status(), "No favicon.ico");
            None
        }
        Err(e) => {
            debug!(url = %fallback, error = %e, "favicon.ico request failed");
            None
        }
    }
}

/// Extract the icon href from an HTML page.
pub fn find_icon_link(html: &str, base: &Url) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("link[rel][href]").ok()?;

    document
        .select(&selector)
        .filter(|el| {
            el.value()
                .attr("rel")
                .map(|rel| {
                    let rel = rel.trim().to_ascii_lowercase();
                    rel == "icon" || rel == "shortcut icon"
                })
                .unwrap_or(false)
        })
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| !href.trim().is_empty())
        .last()
        .and_then(|href| base.join(href.trim()).ok())
        .map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> Fetcher {
        Fetcher::new(Duration::from_secs(5), "feedroll-test/1.0").unwrap()
    }

    mod find_icon_link_tests {
        use super::*;

        fn base() -> Url {
            Url::parse("https://blog.example.com/").unwrap()
        }

        #[test]
        fn test_relative_href_is_joined() {
            let html = r#"<html><head><link rel="icon" href="/static/icon.png"></head></html>"#;
            assert_eq!(
                find_icon_link(html, &base()).as_deref(),
                Some("https://blog.example.com/static/icon.png")
            );
        }

        #[test]
        fn test_shortcut_icon_and_last_wins() {
            let html = r#"<html><head>
                <link rel="shortcut icon" href="https://cdn.example.com/a.ico">
                <link rel="stylesheet" href="/style.css">
                <link rel="icon" href="b.png">
            </head></html>"#;
            assert_eq!(
                find_icon_link(html, &base()).as_deref(),
                Some("https://blog.example.com/b.png")
            );
        }

        #[test]
        fn test_no_icon_link() {
            let html = r#"<html><head><link rel="stylesheet" href="/s.css"></head></html>"#;
            assert!(find_icon_link(html, &base()).is_none());
        }
    }

    mod resolve_tests {
        use super::*;

        #[tokio::test]
        async fn test_uses_link_tag() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/"))
                .respond_with(ResponseTemplate::new(200).set_body_string(
                    r#"<html><head><link rel="icon" href="/i.png"></head></html>"#,
                ))
                .mount(&mock_server)
                .await;

            let icon = resolve_favicon(&fetcher(), &format!("{}/", mock_server.uri())).await;
            assert_eq!(icon, Some(format!("{}/i.png", mock_server.uri())));
        }

        #[tokio::test]
        async fn test_falls_back_to_favicon_ico() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/"))
                .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
                .mount(&mock_server)
                .await;
            Mock::given(method("HEAD"))
                .and(path("/favicon.ico"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&mock_server)
                .await;

            let icon = resolve_favicon(&fetcher(), &format!("{}/", mock_server.uri())).await;
            assert_eq!(icon, Some(format!("{}/favicon.ico", mock_server.uri())));
        }

        #[tokio::test]
        async fn test_nothing_found() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&mock_server)
                .await;
            Mock::given(method("HEAD"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&mock_server)
                .await;

            let icon = resolve_favicon(&fetcher(), &format!("{}/", mock_server.uri())).await;
            assert!(icon.is_none());
        }

        #[tokio::test]
        async fn test_invalid_site_url() {
            assert!(resolve_favicon(&fetcher(), "not a url").await.is_none());
            assert!(resolve_favicon(&fetcher(), "ftp://example.com").await.is_none());
        }
    }
}
