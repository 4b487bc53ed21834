use crate::fetcher::{
    decode::process_response,
    errors::FetchError,
    pacer::Pacer,
    types::{AssetResponse, FetchSettings, PageResponse},
};
use reqwest::{Client, ClientBuilder, Response, header};
use std::future::Future;
use tokio::time::sleep;
use tracing::{instrument, warn};
use url::Url;

const MAX_PAGE_SIZE: u64 = 5 * 1024 * 1024; // 5MB
const MAX_ASSET_SIZE: u64 = 20 * 1024 * 1024; // 20MB

/// HTTP client with bounded retry and shared request pacing.
#[derive(Debug)]
pub struct Fetcher {
    client: Client,
    settings: FetchSettings,
    pacer: Pacer,
}

impl Fetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        let pacer = Pacer::new(settings.request_interval, settings.max_in_flight);

        Ok(Self {
            client,
            settings,
            pacer,
        })
    }

    /// Fetches and decodes an HTML document.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_html(&self, url: &Url) -> Result<PageResponse, FetchError> {
        self.with_retry(|| self.fetch_html_once(url)).await
    }

    /// Fetches a binary resource on behalf of the page at `referer`.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_asset(&self, url: &Url, referer: &Url) -> Result<AssetResponse, FetchError> {
        self.with_retry(|| self.fetch_asset_once(url, referer)).await
    }

    /// Runs `op` up to `max_attempts` times with a fixed delay between
    /// attempts. Exhausted transport failures become `Unreachable`.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, FetchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.should_retry() && attempt < max_attempts => {
                    warn!(
                        "Attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, max_attempts, err, self.settings.retry_delay
                    );
                    sleep(self.settings.retry_delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transport() => {
                    return Err(FetchError::Unreachable {
                        attempts: attempt,
                        last: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_html_once(&self, url: &Url) -> Result<PageResponse, FetchError> {
        let _permit = self.pacer.acquire().await;

        let response = self
            .client
            .get(url.clone())
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(FetchError::from_reqwest_error)?;

        let response = check_response(response, MAX_PAGE_SIZE)?;

        let final_url = response.url().clone();
        let status = response.status();
        let headers = response.headers().clone();

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        if !content_type.contains("text/html") && !content_type.contains("application/xhtml") {
            return Err(FetchError::UnsupportedContentType(content_type));
        }

        let body_bytes = response
            .bytes()
            .await
            .map_err(FetchError::from_reqwest_error)?;

        // Content-Length may be missing or wrong
        if body_bytes.len() as u64 > MAX_PAGE_SIZE {
            return Err(FetchError::BodyTooLarge(body_bytes.len() as u64));
        }

        Ok(process_response(
            final_url,
            status,
            headers,
            body_bytes,
            &content_type,
        ))
    }

    async fn fetch_asset_once(&self, url: &Url, referer: &Url) -> Result<AssetResponse, FetchError> {
        let _permit = self.pacer.acquire().await;

        let response = self
            .client
            .get(url.clone())
            .header(header::REFERER, referer.as_str())
            .send()
            .await
            .map_err(FetchError::from_reqwest_error)?;

        let response = check_response(response, MAX_ASSET_SIZE)?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(FetchError::from_reqwest_error)?;

        if body.len() as u64 > MAX_ASSET_SIZE {
            return Err(FetchError::BodyTooLarge(body.len() as u64));
        }

        Ok(AssetResponse {
            content_type,
            body,
        })
    }
}

fn check_response(response: Response, max_size: u64) -> Result<Response, FetchError> {
    if let Some(content_length) = response.content_length()
        && content_length > max_size
    {
        return Err(FetchError::BodyTooLarge(content_length));
    }

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http {
            status,
            retriable: status.is_server_error(),
        });
    }

    Ok(response)
}
