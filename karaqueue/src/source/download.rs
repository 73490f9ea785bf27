//! HTTP status mapping and streaming downloads.

use std::path::Path;

use futures::StreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Map a non-success HTTP status to the error taxonomy.
///
/// 401/403 mean missing credentials, 408/429/5xx are worth retrying, the rest
/// are permanent.
pub fn map_status(status: StatusCode, url: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(Error::AccessDenied(format!("{} returned {}", url, status)))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Err(Error::Fetch(format!("{} returned {}", url, status)))
        }
        s if s.is_server_error() => Err(Error::Fetch(format!("{} returned {}", url, status))),
        _ => Err(Error::SourceUnavailable(format!(
            "{} returned {}",
            url, status
        ))),
    }
}

/// Send `request` and stream the body into `dest`. Aborts once more than
/// `max_bytes` have been received.
pub async fn download_to_file(
    request: reqwest::RequestBuilder,
    dest: &Path,
    max_bytes: u64,
) -> Result<u64> {
    let response = request.send().await?;
    map_status(response.status(), response.url().as_str())?;
    write_response(response, dest, max_bytes).await
}

/// Stream an already checked response body into `dest`.
pub(crate) async fn write_response(
    response: reqwest::Response,
    dest: &Path,
    max_bytes: u64,
) -> Result<u64> {
    let url = response.url().to_string();
    if let Some(len) = response.content_length()
        && len > max_bytes
    {
        return Err(Error::SourceUnavailable(format!(
            "media is {} MB, the limit is {} MB",
            len / (1024 * 1024),
            max_bytes / (1024 * 1024)
        )));
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| io_error("creating", dest, e))?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(Error::SourceUnavailable(format!(
                "media exceeds the {} MB limit",
                max_bytes / (1024 * 1024)
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| io_error("writing", dest, e))?;
    }
    file.flush().await.map_err(|e| io_error("writing", dest, e))?;

    debug!(url = %url, bytes = written, dest = %dest.display(), "Download finished");
    Ok(written)
}
