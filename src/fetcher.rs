use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::error::IngestError;

/// HTTP GET with a fixed user agent and a hard per-request deadline.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client, timeout })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Download a document. Covers connect, headers and body under one deadline.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, IngestError> {
        debug!(url = %url, "Fetching document");

        let request = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(IngestError::HttpStatus(status.as_u16()));
            }
            let bytes = response.bytes().await?;
            Ok::<_, IngestError>(bytes.to_vec())
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Err(IngestError::Network(e))) if e.is_timeout() => {
                Err(IngestError::Timeout(self.timeout))
            }
            Ok(result) => result,
            Err(_) => Err(IngestError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(timeout: Duration) -> Fetcher {
        Fetcher::new(timeout, "feedroll-test/1.0").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success_sends_user_agent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("user-agent", "feedroll-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let bytes = fetcher(Duration::from_secs(5))
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, b"<rss/>");
    }

    #[tokio::test]
    async fn test_fetch_http_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let result = fetcher(Duration::from_secs(5))
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        match result {
            Err(IngestError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other.map(|b| b.len())),
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss/>")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let result = fetcher(Duration::from_millis(200))
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(IngestError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // Nothing listens on port 9 (discard) in the test environment
        let result = fetcher(Duration::from_secs(2))
            .fetch("http://127.0.0.1:9/feed")
            .await;
        assert!(matches!(
            result,
            Err(IngestError::Network(_)) | Err(IngestError::Timeout(_))
        ));
    }
}
