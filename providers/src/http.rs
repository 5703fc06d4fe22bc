//! Shared HTTP plumbing for the backends.

use crate::ProviderError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use std::time::Duration;

/// Default bound on a single HTTP exchange.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Default ceiling for downloaded images.
pub(crate) const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;

pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Map a transport failure onto the provider taxonomy.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::unavailable(provider, "request timed out")
    } else if err.is_decode() {
        ProviderError::invalid_response(provider, err.to_string())
    } else {
        ProviderError::unavailable(provider, err.to_string())
    }
}

/// Pass successful responses through; turn error statuses into typed errors.
pub(crate) async fn check_status(
    provider: &str,
    response: Response,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    Err(status_error(provider, status, body, retry_after))
}

pub(crate) fn status_error(
    provider: &str,
    status: StatusCode,
    body: String,
    retry_after: Option<Duration>,
) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::auth(provider, format!("status {status}: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimit {
            provider: provider.to_string(),
            retry_after,
        },
        s if s.is_server_error() => {
            ProviderError::unavailable(provider, format!("status {status}: {body}"))
        }
        _ => ProviderError::invalid_response(provider, format!("status {status}: {body}")),
    }
}

/// Fetch an image the backend only returned a link to.
pub(crate) async fn download_image(
    client: &reqwest::Client,
    provider: &str,
    url: &str,
    max_bytes: usize,
) -> Result<Vec<u8>, ProviderError> {
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(ProviderError::invalid_response(
            provider,
            format!("refusing to download non-http url: {url}"),
        ));
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;
    let mut response = check_status(provider, response).await?;

    if let Some(length) = response.content_length() {
        if length as usize > max_bytes {
            return Err(ProviderError::invalid_response(
                provider,
                format!("image of {length} bytes exceeds limit of {max_bytes}"),
            ));
        }
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| transport_error(provider, e))?
    {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(ProviderError::invalid_response(
                provider,
                format!("image download exceeded {max_bytes} bytes"),
            ));
        }
        bytes.extend_from_slice(&chunk);
    }

    non_empty_image(provider, bytes)
}

pub(crate) fn non_empty_image(provider: &str, bytes: Vec<u8>) -> Result<Vec<u8>, ProviderError> {
    if bytes.is_empty() {
        Err(ProviderError::invalid_response(provider, "empty image body"))
    } else {
        Ok(bytes)
    }
}

/// Reject blank completions instead of handing them to the pipeline.
pub(crate) fn non_empty_text(provider: &str, text: String) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        Err(ProviderError::invalid_response(provider, "empty completion"))
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = status_error("openai", StatusCode::UNAUTHORIZED, String::new(), None);
        assert!(matches!(err, ProviderError::Auth { .. }));

        let err = status_error(
            "openai",
            StatusCode::TOO_MANY_REQUESTS,
            String::new(),
            Some(Duration::from_secs(30)),
        );
        assert_eq!(
            err,
            ProviderError::RateLimit {
                provider: "openai".to_string(),
                retry_after: Some(Duration::from_secs(30)),
            }
        );

        let err = status_error("groq", StatusCode::BAD_GATEWAY, "down".into(), None);
        assert!(matches!(err, ProviderError::Unavailable { .. }));

        let err = status_error("groq", StatusCode::BAD_REQUEST, "bad".into(), None);
        assert!(matches!(err, ProviderError::InvalidResponse { .. }));
    }

    #[test]
    fn test_non_empty_text() {
        assert!(non_empty_text("fal", "  \n".to_string()).is_err());
        assert_eq!(non_empty_text("fal", "ok".to_string()).unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_download_rejects_non_http() {
        let client = client();
        let err = download_image(&client, "fal", "file:///etc/passwd", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse { .. }));
    }
}
