//! Upstream HTTP client.
//!
//! # Responsibilities
//! - Build the forwarded request (rewritten URI, gateway headers)
//! - Strip hop-by-hop headers in both directions
//! - Send one attempt under a timeout and classify its failure

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{
    header::{CONNECTION, CONTENT_LENGTH, HOST},
    request, HeaderMap, HeaderName, HeaderValue, Request, Response, Uri,
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time;
use url::Url;

use crate::error::{GatewayError, NetworkErrorCode};
use crate::proxy::context::ProxyRequestContext;
use crate::resilience::AttemptFailure;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_GATEWAY_SERVICE: &str = "x-gateway-service";
pub const X_TARGET_SERVICE: &str = "x-target-service";
pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_ROLE: &str = "x-user-role";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => tracing::debug!(header = name, "Skipping header with invalid value"),
    }
}

/// Build the request for one attempt against `base`.
pub fn build_request(
    parts: &request::Parts,
    body: &Bytes,
    base: &Url,
    path_and_query: &str,
    ctx: &ProxyRequestContext,
    gateway: &str,
) -> Result<Request<Body>, GatewayError> {
    let target = format!("{}{}", base.as_str().trim_end_matches('/'), path_and_query);
    let uri: Uri = target
        .parse()
        .map_err(|_| GatewayError::InvalidRequest("request path cannot be forwarded".to_string()))?;

    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
    // Identity is only ever taken from the trusted context.
    headers.remove(X_USER_ID);
    headers.remove(X_USER_ROLE);

    set_header(&mut headers, X_REQUEST_ID, &ctx.request_id);
    set_header(&mut headers, X_GATEWAY_SERVICE, gateway);
    set_header(&mut headers, X_TARGET_SERVICE, &ctx.target_service);
    if let Some(caller) = &ctx.caller {
        set_header(&mut headers, X_USER_ID, &caller.user_id);
        if let Some(role) = &caller.role {
            set_header(&mut headers, X_USER_ROLE, role);
        }
    }
    if let Some(addr) = ctx.client_addr {
        let forwarded = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{}, {}", prior, addr.ip()),
            None => addr.ip().to_string(),
        };
        set_header(&mut headers, X_FORWARDED_FOR, &forwarded);
    }

    let mut request = Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .body(Body::from(body.clone()))
        .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
    *request.headers_mut() = headers;
    Ok(request)
}

/// Map a client error to a stable network code plus log detail.
pub fn classify_error(err: &(dyn StdError + 'static)) -> (NetworkErrorCode, String) {
    let mut detail = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }

    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return (NetworkErrorCode::ConnectionRefused, detail),
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => return (NetworkErrorCode::ConnectionReset, detail),
                io::ErrorKind::TimedOut => return (NetworkErrorCode::TimedOut, detail),
                _ => {}
            }
        }
        if let Some(hyper_err) = e.downcast_ref::<hyper::Error>() {
            if hyper_err.is_timeout() {
                return (NetworkErrorCode::TimedOut, detail);
            }
            if hyper_err.is_incomplete_message() || hyper_err.is_closed() || hyper_err.is_canceled() {
                return (NetworkErrorCode::ConnectionReset, detail);
            }
        }
        current = e.source();
    }

    if detail.contains("dns error") || detail.contains("failed to lookup address") {
        (NetworkErrorCode::DnsFailure, detail)
    } else {
        (NetworkErrorCode::Other, detail)
    }
}

/// Pooled HTTP/1.1 client shared by all dispatches.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
}

impl UpstreamClient {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }

    /// Send one attempt. Only the response head is bounded by `timeout`.
    pub async fn send(&self, request: Request<Body>, timeout: Duration) -> Result<Response<Body>, AttemptFailure> {
        if timeout.is_zero() {
            return Err(AttemptFailure::Timeout);
        }
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => Ok(into_client_response(response)),
            Ok(Err(e)) => {
                let (code, detail) = classify_error(&e);
                Err(AttemptFailure::Network { code, detail })
            }
            Err(_) => Err(AttemptFailure::Timeout),
        }
    }
}

fn into_client_response(response: Response<Incoming>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}
