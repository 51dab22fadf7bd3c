//! Response handling shared by the provider adapters.
//!
//! Each adapter builds its own request, then hands the response to
//! [`read_json`], which maps HTTP status codes onto [`ProviderError`]
//! kinds and decodes the body. Requests are sent exactly once: a failed
//! attempt falls through to the next provider instead of being retried.

use reqwest::StatusCode;

use crate::ProviderError;

/// Maximum length of the response body preview included in errors.
const BODY_PREVIEW_LEN: usize = 200;

/// Maps a non-success HTTP status to the provider error it represents.
///
/// Returns `None` for 2xx statuses.
#[must_use]
pub fn classify_status(status: StatusCode) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(ProviderError::RateLimited);
    }

    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return Some(ProviderError::Timeout);
    }

    Some(ProviderError::Malformed {
        message: format!("HTTP {status}"),
    })
}

/// Checks the status of `response` and decodes its body as JSON.
///
/// # Errors
///
/// Returns the error from [`classify_status`] for non-2xx responses and
/// [`ProviderError::Malformed`] when the body is not valid JSON.
pub async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, ProviderError> {
    if let Some(err) = classify_status(response.status()) {
        return Err(err);
    }

    let text = response.text().await?;
    decode_body(&text)
}

/// Decodes a response body, keeping a short preview on failure.
fn decode_body(text: &str) -> Result<serde_json::Value, ProviderError> {
    serde_json::from_str(text).map_err(|e| {
        let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
        ProviderError::Malformed {
            message: format!("invalid JSON: {e} (body: {preview})"),
        }
    })
}
