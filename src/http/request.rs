//! Request handling: HTTP parts into a transport-neutral ingress request.
//!
//! # Design Decisions
//! - The request id (set by `SetRequestIdLayer` when the caller sent none)
//!   becomes the ingress invocation id
//! - Bodies are taken as bytes and decoded lossily; the stage decides what an
//!   unusable body means

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};

use crate::stages::{IngressRequest, InvocationContext};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Request id assigned by the request-id layer, if present.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn ingress_request(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> IngressRequest {
    IngressRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body: (!body.is_empty()).then(|| String::from_utf8_lossy(&body).into_owned()),
    }
}

pub fn invocation_context(headers: &HeaderMap, function_name: &str) -> InvocationContext {
    match request_id(headers) {
        Some(id) => InvocationContext::new(id, function_name),
        None => InvocationContext::generate(function_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_converts_parts() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", HeaderValue::from_static("00-abc"));
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("req-1"));

        let request = ingress_request(
            &Method::POST,
            &"/trace?x=1".parse().unwrap(),
            &headers,
            Bytes::from_static(b"{\"message\":\"hi\"}"),
        );

        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/trace");
        assert_eq!(request.body.as_deref(), Some("{\"message\":\"hi\"}"));
        assert!(request
            .headers
            .contains(&("traceparent".to_string(), "00-abc".to_string())));

        assert_eq!(invocation_context(&headers, "ingress").invocation_id, "req-1");
    }

    #[test]
    fn test_empty_body_is_none() {
        let request = ingress_request(
            &Method::POST,
            &"/".parse().unwrap(),
            &HeaderMap::new(),
            Bytes::new(),
        );
        assert!(request.body.is_none());
    }
}
