use crate::config::{Config, ParameterDefaults, UploadConfig};
use crate::dispatcher::{Dispatcher, UpstreamResponse};
use crate::errors::{RelayError, Result};
use crate::extractor::parse_upload;
use crate::metrics_defs::REQUESTS;
use crate::normalizer::{RelayReply, normalize};
use crate::params::RelayParameters;
use crate::probe::{AlwaysReady, Readiness, ReadinessProber};
use crate::temp_files::TempFiles;
use bytes::Bytes;
use http::{Method, Request};
use shared::counter;
use std::sync::Arc;

/// Relays one upload at a time to the inference service.
///
/// Requests share nothing but this read-only value and the pooled client
/// inside it, so any number of them can run concurrently.
pub struct Relay {
    readiness: Arc<dyn Readiness>,
    dispatcher: Dispatcher,
    upload: UploadConfig,
    defaults: ParameterDefaults,
}

impl Relay {
    pub fn new(config: &Config, client: reqwest::Client) -> Result<Self> {
        let readiness: Arc<dyn Readiness> = if config.readiness.enabled {
            Arc::new(ReadinessProber::new(
                client.clone(),
                config.upstream.health_url()?,
                &config.readiness,
            ))
        } else {
            Arc::new(AlwaysReady)
        };

        let dispatcher = Dispatcher::new(
            client,
            config.upstream.detect_url()?,
            config.upload.forward_field.clone(),
            config.upstream.forward_timeout(),
        );

        Ok(Relay {
            readiness,
            dispatcher,
            upload: config.upload.clone(),
            defaults: config.defaults.clone(),
        })
    }

    /// Replaces the readiness gate.
    pub fn with_readiness(mut self, readiness: Arc<dyn Readiness>) -> Self {
        self.readiness = readiness;
        self
    }

    /// Handles one upload from start to finish and shapes the reply.
    ///
    /// Every temp file created while parsing is removed before this returns,
    /// or when the future is dropped part way through.
    pub async fn handle<B>(&self, request: Request<B>) -> RelayReply
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let mut temp = TempFiles::new(self.upload.temp_dir());

        let outcome = self.relay(request, &mut temp).await;

        let label = match &outcome {
            Ok(response) if response.is_exchange_failure() => "upstream_error",
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        counter!(REQUESTS, "outcome" => label).increment(1);

        let reply = normalize(outcome);
        temp.cleanup();
        reply
    }

    // Stages run in order and stop at the first failure.
    async fn relay<B>(&self, request: Request<B>, temp: &mut TempFiles) -> Result<UpstreamResponse>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        if request.method() != Method::POST {
            return Err(RelayError::MethodNotAllowed);
        }

        let query = request.uri().query().map(str::to_string);
        let upload = parse_upload(request, self.upload.max_bytes, temp).await?;
        let selected = upload.select_file(&self.upload.preferred_fields)?;
        let params = RelayParameters::resolve(&upload, query.as_deref(), &self.defaults);

        tracing::debug!(
            field = %selected.field,
            size = selected.file.size,
            temp_files = temp.len(),
            received_fields = ?upload.received_fields(),
            "selected upload"
        );

        if !self.readiness.wait_until_ready().await {
            return Err(RelayError::UpstreamUnavailable);
        }

        self.dispatcher.forward(&selected, &params).await
    }
}
