//! `HttpReply` → axum response.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::domain::response::HttpReply;

impl IntoResponse for HttpReply {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(name), value);
                }
                Err(_) => warn!(header = name, "Dropping header with invalid value"),
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_reply_conversion() {
        let reply = HttpReply {
            status: StatusCode::CREATED,
            headers: vec![
                ("x-coap-message-id", "17".to_string()),
                ("content-type", "application/json".to_string()),
            ],
            body: b"{}".to_vec(),
        };
        let response = reply.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-coap-message-id"], "17");
        assert_eq!(response.headers()["content-type"], "application/json");
    }

    #[test]
    fn test_invalid_header_value_dropped() {
        let reply = HttpReply {
            status: StatusCode::OK,
            headers: vec![("x-coap-response-code", "bad\nvalue".to_string())],
            body: Vec::new(),
        };
        let response = reply.into_response();
        assert!(response.headers().get("x-coap-response-code").is_none());
    }
}
