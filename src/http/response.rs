//! Response relay.
//!
//! # Responsibilities
//! - Carry the upstream status and headers back unchanged
//! - Stream the upstream body to the client without buffering it
//!
//! # Design Decisions
//! - The gateway adds, removes and renames nothing on the way back
//! - Bodies are opaque; binary payloads pass through untouched

use axum::body::Body;
use axum::http::{HeaderMap, Response, StatusCode};
use axum::response::IntoResponse;
use hyper::body::Incoming;

/// The upstream response as relayed to the original caller.
#[derive(Debug)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl From<Response<Incoming>> for ProxiedResponse {
    fn from(response: Response<Incoming>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body: Body::new(body),
        }
    }
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> axum::response::Response {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue};

    #[tokio::test]
    async fn into_response_keeps_status_headers_and_body() {
        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

        let relayed = ProxiedResponse {
            status: StatusCode::IM_A_TEAPOT,
            headers,
            body: Body::from(vec![0u8, 159, 146, 150]),
        }
        .into_response();

        assert_eq!(relayed.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(relayed.headers().get_all(header::SET_COOKIE).iter().count(), 2);
        assert_eq!(relayed.headers()[header::CACHE_CONTROL], "no-store");
        let body = axum::body::to_bytes(relayed.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), &[0u8, 159, 146, 150]);
    }
}
