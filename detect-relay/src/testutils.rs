use crate::config::Config;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

pub const BOUNDARY: &str = "relay-test-boundary";

/// Builds a multipart/form-data body by hand
pub struct MultipartBody {
    buf: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        MultipartBody { buf: Vec::new() }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, contents: &[u8]) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.buf.extend_from_slice(contents);
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    pub fn build(mut self) -> Bytes {
        self.buf
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Bytes::from(self.buf)
    }
}

/// POST request carrying a multipart body built with [`MultipartBody`]
pub fn upload_request(body: Bytes) -> Request<Full<Bytes>> {
    Request::builder()
        .method("POST")
        .uri("http://relay.test/api/detect")
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(CONTENT_LENGTH, body.len())
        .body(Full::new(body))
        .unwrap()
}

/// Relay config pointing at `upstream`, spooling uploads into `temp_dir`
pub fn test_config(upstream: &Url, temp_dir: &Path) -> Config {
    let mut config: Config = serde_yaml::from_str(&format!(
        r#"
listener: {{host: "127.0.0.1", port: 3000}}
upstream: {{base_url: "{upstream}", forward_timeout_secs: 10}}
"#
    ))
    .unwrap();
    config.upload.temp_dir = Some(temp_dir.to_path_buf());
    config
}

/// URL of a port nothing listens on
pub async fn refused_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{port}")).unwrap()
}

#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

struct MockState {
    detect_status: StatusCode,
    detect_content_type: &'static str,
    detect_body: &'static str,
    detect_delay: Duration,
    health_status: StatusCode,
    healthy_after: Option<usize>,
    detect_calls: AtomicUsize,
    health_calls: AtomicUsize,
    received: Mutex<Vec<ReceivedRequest>>,
}

pub struct MockUpstreamBuilder {
    detect_status: StatusCode,
    detect_content_type: &'static str,
    detect_body: &'static str,
    detect_delay: Duration,
    health_status: StatusCode,
    healthy_after: Option<usize>,
}

impl MockUpstreamBuilder {
    pub fn detect_response(
        mut self,
        status: StatusCode,
        content_type: &'static str,
        body: &'static str,
    ) -> Self {
        self.detect_status = status;
        self.detect_content_type = content_type;
        self.detect_body = body;
        self
    }

    pub fn detect_delay(mut self, delay: Duration) -> Self {
        self.detect_delay = delay;
        self
    }

    pub fn health_status(mut self, status: StatusCode) -> Self {
        self.health_status = status;
        self
    }

    /// Health checks answer 200 once this many checks have failed
    pub fn healthy_after(mut self, failures: usize) -> Self {
        self.healthy_after = Some(failures);
        self
    }

    pub async fn start(self) -> MockUpstream {
        let state = Arc::new(MockState {
            detect_status: self.detect_status,
            detect_content_type: self.detect_content_type,
            detect_body: self.detect_body,
            detect_delay: self.detect_delay,
            health_status: self.health_status,
            healthy_after: self.healthy_after,
            detect_calls: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");
        let port = listener.local_addr().unwrap().port();

        let server_state = state.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let state = server_state.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(state.clone(), req));
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockUpstream {
            base_url: Url::parse(&format!("http://127.0.0.1:{port}")).unwrap(),
            state,
        }
    }
}

/// Inference service stand-in recording every detect request it receives
pub struct MockUpstream {
    pub base_url: Url,
    state: Arc<MockState>,
}

impl MockUpstream {
    pub fn builder() -> MockUpstreamBuilder {
        MockUpstreamBuilder {
            detect_status: StatusCode::OK,
            detect_content_type: "application/json",
            detect_body: r#"{"detections": []}"#,
            detect_delay: Duration::ZERO,
            health_status: StatusCode::OK,
            healthy_after: None,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path).unwrap()
    }

    pub fn detect_calls(&self) -> usize {
        self.state.detect_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.state.health_calls.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.state.received.lock().unwrap().clone()
    }
}

async fn handle(
    state: Arc<MockState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();

    let response = match parts.uri.path() {
        "/health" => {
            let previous = state.health_calls.fetch_add(1, Ordering::SeqCst);
            let status = match state.healthy_after {
                Some(failures) if previous >= failures => StatusCode::OK,
                _ => state.health_status,
            };
            respond(status, "application/json", r#"{"status": "ok"}"#)
        }
        "/api/detect" => {
            let body = body
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_else(|_| Bytes::new());

            state.received.lock().unwrap().push(ReceivedRequest {
                path: parts.uri.path().to_string(),
                query: parts.uri.query().map(String::from),
                content_type: parts
                    .headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from),
                body,
            });
            state.detect_calls.fetch_add(1, Ordering::SeqCst);

            tokio::time::sleep(state.detect_delay).await;
            respond(
                state.detect_status,
                state.detect_content_type,
                state.detect_body,
            )
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    };

    Ok(response)
}

fn respond(status: StatusCode, content_type: &str, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, content_type.parse().unwrap());
    response
}
