use crate::dispatcher::UpstreamResponse;
use crate::errors::RelayError;
use http::StatusCode;
use serde_json::{Value, json};

/// Key wrapping a downstream body that is not JSON
pub const RAW_KEY: &str = "raw";

const TRANSPORT_FAILURE_MESSAGE: &str = "failed to reach inference service";
const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Status and JSON body sent back to the caller
#[derive(Clone, Debug, PartialEq)]
pub struct RelayReply {
    pub status: StatusCode,
    pub body: Value,
}

/// Shapes the outcome of a relay request into the single reply contract.
pub fn normalize(outcome: Result<UpstreamResponse, RelayError>) -> RelayReply {
    match outcome {
        Ok(response) => from_upstream(response),
        Err(error) => from_error(&error),
    }
}

fn from_upstream(response: UpstreamResponse) -> RelayReply {
    let body = serde_json::from_slice::<Value>(&response.body).unwrap_or_else(|_| {
        tracing::debug!(
            status = %response.status,
            content_type = ?response.content_type,
            "inference service replied with a non-JSON body"
        );
        json!({ RAW_KEY: String::from_utf8_lossy(&response.body) })
    });

    RelayReply {
        status: response.status,
        body,
    }
}

fn from_error(error: &RelayError) -> RelayReply {
    let status = error.status();

    let body = match error {
        RelayError::NoFileProvided { received_fields } => json!({
            "error": error.to_string(),
            "received_fields": received_fields,
        }),
        _ if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE => {
            // The cause stays in the logs
            tracing::error!(error = %error, "relay request failed");
            let message = if error.is_transport_failure() {
                TRANSPORT_FAILURE_MESSAGE
            } else {
                INTERNAL_ERROR_MESSAGE
            };
            json!({ "error": message })
        }
        _ => json!({ "error": error.to_string() }),
    };

    RelayReply { status, body }
}
