use crate::errors::{RelayError, Result};
use crate::extractor::SelectedFile;
use crate::metrics_defs::UPSTREAM_DURATION;
use crate::params::RelayParameters;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use reqwest::multipart::{Form, Part};
use shared::histogram;
use std::time::{Duration, Instant};
use tokio_util::io::ReaderStream;
use url::Url;

const DEFAULT_FILE_NAME: &str = "upload.jpg";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A completed exchange with the inference service, captured verbatim.
///
/// A non-2xx status is still a completed exchange: the service reported an
/// error and its body is kept for the caller.
#[derive(Clone, Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_exchange_failure(&self) -> bool {
        !self.status.is_success()
    }
}

/// Forwards the selected upload to the inference service
pub struct Dispatcher {
    client: reqwest::Client,
    detect_url: Url,
    forward_field: String,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        client: reqwest::Client,
        detect_url: Url,
        forward_field: String,
        timeout: Duration,
    ) -> Self {
        Dispatcher {
            client,
            detect_url,
            forward_field,
            timeout,
        }
    }

    /// Full URL of the forwarding request.
    pub fn request_url(&self, params: &RelayParameters) -> Url {
        let mut url = self.detect_url.clone();
        params.apply(&mut url);
        url
    }

    /// Streams the file from its temp path as a fresh multipart request.
    ///
    /// The timeout covers the whole exchange, including reading the response
    /// body. Errors are transport failures only: no complete response was
    /// received. A body that breaks off or times out after the status line
    /// counts as well, since a truncated body cannot be passed on as is.
    pub async fn forward(
        &self,
        selected: &SelectedFile,
        params: &RelayParameters,
    ) -> Result<UpstreamResponse> {
        let url = self.request_url(params);

        let file = tokio::fs::File::open(&selected.file.path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, selected.file.size)
            .file_name(
                selected
                    .file
                    .original_filename
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
            )
            .mime_str(
                selected
                    .file
                    .content_type
                    .as_deref()
                    .unwrap_or(DEFAULT_CONTENT_TYPE),
            )?;
        let form = Form::new().part(self.forward_field.clone(), part);

        tracing::debug!(
            url = %url,
            field = %selected.field,
            size = selected.file.size,
            "forwarding upload"
        );

        let started = Instant::now();
        let response = self
            .client
            .post(url)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        histogram!(UPSTREAM_DURATION).record(started.elapsed().as_secs_f64());

        if !status.is_success() {
            tracing::warn!(status = %status, "inference service reported an error");
        }

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> RelayError {
        // Use host as identifier for error messages
        let upstream_identifier = self
            .detect_url
            .host_str()
            .unwrap_or(self.detect_url.as_str())
            .to_string();

        if e.is_timeout() {
            RelayError::UpstreamTimeout(upstream_identifier)
        } else {
            RelayError::UpstreamRequestFailed(upstream_identifier, e.to_string())
        }
    }
}
