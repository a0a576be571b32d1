pub mod cams;
pub mod pvgis;

pub use cams::{CamsAdapter, CamsSettings};
pub use pvgis::{PvgisAdapter, PvgisDatabase};

use std::time::Duration;

use tracing::debug;

use crate::data_source::SourceError;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::retry::RetryPolicy;
use crate::ProviderId;

/// How long an upstream 429 keeps us away when it sends no hint.
const UPSTREAM_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// Send a request, retrying transport failures and transient statuses.
///
/// Any response that is not retried is returned as-is so the caller can
/// decide what a non-success status means for its provider.
pub(crate) async fn send_with_retry(
    http_client: &dyn HttpClient,
    request: HttpRequest,
    retry: &RetryPolicy,
    provider: ProviderId,
) -> Result<HttpResponse, SourceError> {
    let mut attempt = 0;
    loop {
        let retries_left = attempt < retry.max_retries;
        match http_client.execute(request.clone()).await {
            Ok(response) if retries_left && retry.should_retry_status(response.status) => {
                debug!(
                    provider = %provider,
                    status = response.status,
                    attempt,
                    "transient upstream status; retrying"
                );
            }
            Ok(response) => return Ok(response),
            Err(error) if retries_left => {
                debug!(provider = %provider, attempt, error = %error, "transport error; retrying");
            }
            Err(error) if error.timed_out() => {
                return Err(SourceError::timeout(format!(
                    "{provider} request timed out: {}",
                    error.message()
                )));
            }
            Err(error) => {
                return Err(SourceError::unavailable(format!(
                    "{provider} transport error: {}",
                    error.message()
                )));
            }
        }

        tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
        attempt += 1;
    }
}

/// Map a non-success status to the matching provider failure.
pub(crate) fn status_error(provider: ProviderId, response: &HttpResponse) -> SourceError {
    let snippet: String = response.body.chars().take(200).collect();
    match response.status {
        429 => SourceError::rate_limited(
            format!("{provider} upstream rate limit: {snippet}"),
            UPSTREAM_RATE_LIMIT_BACKOFF,
        ),
        400..=499 => SourceError::invalid_request(format!(
            "{provider} rejected the request with status {}: {snippet}",
            response.status
        )),
        status => SourceError::unavailable(format!(
            "{provider} upstream returned status {status}"
        )),
    }
}
