use crate::config::SiteConfig;
use crate::error::{Result, UpdaterError};
use backoff::ExponentialBackoffBuilder;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Response};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_USER_AGENT: &str = "LibraryUpdater/1.0 (Manga Library Update Service)";

/// Per-site HTTP client: every request waits on the site's quota and transient
/// failures are retried with exponential backoff.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    headers: HeaderMap,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry_window: Duration,
}

impl HttpClient {
    pub fn new(config: &SiteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let mut headers = HeaderMap::new();
        let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        headers.insert(USER_AGENT, header_value(user_agent)?);
        if let Some(extra) = &config.headers {
            for (key, value) in extra {
                let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| invalid_header(key))?;
                headers.insert(name, header_value(value)?);
            }
        }

        let period = Duration::from_millis(config.rate_limit_ms.max(1));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);

        Ok(Self {
            client,
            headers,
            limiter: Arc::new(RateLimiter::direct(quota)),
            retry_window: Duration::from_secs(60),
        })
    }

    /// Caps how long transient failures are retried before giving up.
    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        let response = self.send(url).await?;
        Ok(response.text().await?)
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(url).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn send(&self, url: &str) -> Result<Response> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(self.retry_window))
            .build();

        backoff::future::retry(policy, || async move {
            self.limiter.until_ready().await;
            debug!("GET {}", url);

            let response = self
                .client
                .get(url)
                .headers(self.headers.clone())
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() || e.is_connect() {
                        backoff::Error::transient(UpdaterError::from(e))
                    } else {
                        backoff::Error::permanent(UpdaterError::from(e))
                    }
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let err = UpdaterError::Status { status: status.as_u16(), url: url.to_string() };
            if status.is_server_error() || status.as_u16() == 429 {
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            }
        })
        .await
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| invalid_header(value))
}

fn invalid_header(value: &str) -> UpdaterError {
    UpdaterError::Config(config::ConfigError::Message(format!("invalid header: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn site(base_url: &str) -> SiteConfig {
        let mut site = Config::default().sites.remove("madara").unwrap();
        site.base_url = base_url.to_string();
        site.rate_limit_ms = 1;
        site
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/manga/a/")
            .match_header("x-test", "1")
            .with_body("<html>ok</html>")
            .create_async()
            .await;

        let mut config = site(&server.url());
        config.headers = Some([("x-test".to_string(), "1".to_string())].into_iter().collect());
        let client = HttpClient::new(&config).unwrap();

        let body = client.get(&format!("{}/manga/a/", server.url())).await.unwrap();
        assert_eq!(body, "<html>ok</html>");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let client = HttpClient::new(&site(&server.url())).unwrap();
        let err = client.get(&format!("{}/missing", server.url())).await.unwrap_err();

        assert!(matches!(err, UpdaterError::Status { status: 404, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_the_window_closes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect_at_least(2)
            .create_async()
            .await;

        let client = HttpClient::new(&site(&server.url()))
            .unwrap()
            .with_retry_window(Duration::from_millis(1500));
        let err = client.get(&format!("{}/flaky", server.url())).await.unwrap_err();

        assert!(matches!(err, UpdaterError::Status { status: 503, .. }));
        mock.assert_async().await;
    }
}
