use crate::errors::RelayError;
use crate::relay::Relay;
use bytes::Bytes;
use http::header::ACCESS_CONTROL_REQUEST_HEADERS;
use http::{HeaderValue, Method, StatusCode};
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response};
use serde_json::json;
use shared::http::{add_cors_headers, make_empty_response, make_json_response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Public listener: the relay route, a health check and CORS preflight.
pub struct RelayService {
    relay: Arc<Relay>,
    route_path: Arc<str>,
}

impl RelayService {
    pub fn new(relay: Relay, route_path: &str) -> Self {
        RelayService {
            relay: Arc::new(relay),
            route_path: Arc::from(route_path),
        }
    }
}

impl Service<Request<Incoming>> for RelayService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let relay = self.relay.clone();
        let route_path = self.route_path.clone();

        Box::pin(async move { Ok(route(&relay, &route_path, req).await) })
    }
}

async fn route<B>(
    relay: &Relay,
    route_path: &str,
    req: Request<B>,
) -> Response<BoxBody<Bytes, RelayError>>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    if req.method() == Method::OPTIONS {
        let requested = req
            .headers()
            .get(ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or(HeaderValue::from_static("*"));
        let mut response = make_empty_response();
        add_cors_headers(response.headers_mut(), Some(&requested));
        return response;
    }

    let mut response = if req.uri().path() == route_path {
        let reply = relay.handle(req).await;
        make_json_response(reply.status, &reply.body)
    } else if req.uri().path() == "/health" && req.method() == Method::GET {
        make_json_response(StatusCode::OK, &json!({"ok": true}))
    } else {
        make_json_response(StatusCode::NOT_FOUND, &json!({"error": "not found"}))
    };

    add_cors_headers(response.headers_mut(), None);
    response
}
