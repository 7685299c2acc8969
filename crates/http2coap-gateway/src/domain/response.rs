//! CoAP response → HTTP reply translation.

use axum::http::StatusCode;

use crate::domain::error::ExchangeError;
use crate::domain::message::{ContentFormat, CoapResponse, ResponseCode};

pub const HEADER_MESSAGE_ID: &str = "x-coap-message-id";
pub const HEADER_RESPONSE_CODE: &str = "x-coap-response-code";
pub const HEADER_CONTENT_TYPE: &str = "content-type";

/// Content-Type used for formats outside the known table.
pub const UNKNOWN_CONTENT_TYPE: &str = "unknown";

/// Transport-neutral HTTP reply; the HTTP adapter turns it into a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    /// Plain-text error reply. Carries no CoAP headers.
    pub fn error(err: &ExchangeError) -> Self {
        Self {
            status: err.status(),
            headers: vec![(HEADER_CONTENT_TYPE, "text/plain".to_string())],
            body: err.to_string().into_bytes(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Fixed CoAP code → HTTP status table. Codes not listed map to 500.
pub fn status_for(code: ResponseCode) -> StatusCode {
    match code {
        ResponseCode::OK | ResponseCode::CONTENT => StatusCode::OK,
        ResponseCode::CREATED => StatusCode::CREATED,
        ResponseCode::VALID => StatusCode::ACCEPTED,
        ResponseCode::BAD_REQUEST => StatusCode::BAD_REQUEST,
        ResponseCode::NOT_FOUND => StatusCode::NOT_FOUND,
        ResponseCode::METHOD_NOT_ALLOWED => StatusCode::METHOD_NOT_ALLOWED,
        ResponseCode::UNSUPPORTED_CONTENT_FORMAT => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ResponseCode::INTERNAL_SERVER_ERROR => StatusCode::INTERNAL_SERVER_ERROR,
        ResponseCode::NOT_IMPLEMENTED => StatusCode::NOT_IMPLEMENTED,
        ResponseCode::SERVICE_UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
        ResponseCode::GATEWAY_TIMEOUT => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// MIME type for a Content-Format value.
pub fn content_type_for(format: ContentFormat) -> &'static str {
    match format {
        ContentFormat::TextPlain => "text/plain",
        ContentFormat::LinkFormat => "application/link-format",
        ContentFormat::Xml => "application/xml",
        ContentFormat::OctetStream => "application/octet-stream",
        ContentFormat::Exi => "application/exi",
        ContentFormat::Json => "application/json",
        ContentFormat::Cbor => "application/cbor",
        ContentFormat::Unknown(_) => UNKNOWN_CONTENT_TYPE,
    }
}

/// Stateless translator from matched CoAP responses to HTTP replies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseTranslator;

impl ResponseTranslator {
    pub fn translate(&self, response: &CoapResponse) -> Result<HttpReply, ExchangeError> {
        let mut headers = vec![
            (HEADER_MESSAGE_ID, response.message_id.to_string()),
            (HEADER_RESPONSE_CODE, response.code.to_string()),
        ];

        if let Some(value) = response.content_format()? {
            headers.push((
                HEADER_CONTENT_TYPE,
                content_type_for(ContentFormat::from_value(value)).to_string(),
            ));
        }

        Ok(HttpReply {
            status: status_for(response.code),
            headers,
            body: response.payload.clone(),
        })
    }
}
