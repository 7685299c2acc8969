//! CoAP message model used by the gateway core.
//!
//! These types sit between the HTTP side and the wire codec. They carry
//! exactly what the translators and the correlation logic need and nothing
//! about sockets or encodings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::ExchangeError;

/// Well-known CoAP option numbers (RFC 7252 §5.10).
pub mod option_number {
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const URI_QUERY: u16 = 15;
}

/// Maximum length of a Uri-Path / Uri-Query option value.
pub const MAX_URI_OPTION_LEN: usize = 255;

/// Maximum token length allowed by the message format.
pub const MAX_TOKEN_LEN: usize = 8;

/// CoAP request methods the gateway forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoapMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl CoapMethod {
    /// Map an HTTP method token onto a CoAP method.
    ///
    /// Only GET, POST, PUT and DELETE have a CoAP counterpart here; anything
    /// else is refused before any network I/O happens.
    pub fn from_http(method: &str) -> Result<Self, ExchangeError> {
        match method {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            other => Err(ExchangeError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Request code (class 0).
    pub fn code(&self) -> u8 {
        match self {
            Self::Get => 1,
            Self::Post => 2,
            Self::Put => 3,
            Self::Delete => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for CoapMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CoAP message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

/// A single option: numeric key plus opaque value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoapOption {
    pub number: u16,
    pub value: Vec<u8>,
}

impl CoapOption {
    pub fn new(number: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            number,
            value: value.into(),
        }
    }
}

/// 16-bit CoAP message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u16);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-chosen correlator, at most 8 bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Token(Vec<u8>);

impl Token {
    /// Create a token; values longer than 8 bytes are rejected.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        (bytes.len() <= MAX_TOKEN_LEN).then_some(Self(bytes))
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&hex::encode(&self.0))
        }
    }
}

/// A fully formed confirmable request, ready for the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapRequest {
    pub method: CoapMethod,
    /// Sorted ascending by option number, stable on ties.
    pub options: Vec<CoapOption>,
    pub token: Token,
    pub payload: Option<Vec<u8>>,
    pub message_type: MessageType,
    pub message_id: MessageId,
}

impl CoapRequest {
    /// Values of all options with the given number, in transmission order.
    pub fn option_values(&self, number: u16) -> impl Iterator<Item = &[u8]> {
        self.options
            .iter()
            .filter(move |o| o.number == number)
            .map(|o| o.value.as_slice())
    }

    /// Reassembled "/a/b" path, for logging.
    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in self.option_values(option_number::URI_PATH) {
            path.push('/');
            path.push_str(&String::from_utf8_lossy(segment));
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }
}

/// Raw CoAP code byte, `class << 5 | detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseCode(pub u8);

impl ResponseCode {
    pub const EMPTY: Self = Self(0x00);
    pub const OK: Self = Self::new(2, 0);
    pub const CREATED: Self = Self::new(2, 1);
    pub const DELETED: Self = Self::new(2, 2);
    pub const VALID: Self = Self::new(2, 3);
    pub const CHANGED: Self = Self::new(2, 4);
    pub const CONTENT: Self = Self::new(2, 5);
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    pub const NOT_FOUND: Self = Self::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
    pub const UNSUPPORTED_CONTENT_FORMAT: Self = Self::new(4, 15);
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);
    pub const NOT_IMPLEMENTED: Self = Self::new(5, 1);
    pub const BAD_GATEWAY: Self = Self::new(5, 2);
    pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);
    pub const GATEWAY_TIMEOUT: Self = Self::new(5, 4);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self((class << 5) | (detail & 0x1f))
    }

    pub fn class(&self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(&self) -> u8 {
        self.0 & 0x1f
    }

    /// Class 2..=5 codes are responses; 0.00 is the empty message.
    pub fn is_response(&self) -> bool {
        (2..=5).contains(&self.class())
    }

    pub fn is_request(&self) -> bool {
        self.class() == 0 && self.detail() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const METHODS: [&str; 8] = ["0.00", "GET", "POST", "PUT", "DELETE", "FETCH", "PATCH", "iPATCH"];
        match METHODS.get(self.0 as usize) {
            Some(name) => f.write_str(name),
            None => write!(f, "{}.{:02}", self.class(), self.detail()),
        }
    }
}

/// Content-Format registry entries the gateway knows how to name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentFormat {
    TextPlain,
    LinkFormat,
    Xml,
    OctetStream,
    Exi,
    Json,
    Cbor,
    Unknown(u16),
}

impl ContentFormat {
    pub fn from_value(value: u16) -> Self {
        match value {
            0 => Self::TextPlain,
            40 => Self::LinkFormat,
            41 => Self::Xml,
            42 => Self::OctetStream,
            47 => Self::Exi,
            50 => Self::Json,
            60 => Self::Cbor,
            other => Self::Unknown(other),
        }
    }

    pub fn value(&self) -> u16 {
        match self {
            Self::TextPlain => 0,
            Self::LinkFormat => 40,
            Self::Xml => 41,
            Self::OctetStream => 42,
            Self::Exi => 47,
            Self::Json => 50,
            Self::Cbor => 60,
            Self::Unknown(v) => *v,
        }
    }
}

/// A decoded message received from the CoAP peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapResponse {
    pub code: ResponseCode,
    pub message_type: MessageType,
    pub message_id: MessageId,
    pub token: Token,
    pub options: Vec<CoapOption>,
    pub payload: Vec<u8>,
}

impl CoapResponse {
    /// Numeric Content-Format, if the option is present.
    ///
    /// The option is a uint of at most two bytes; anything longer cannot be
    /// read and is reported as a payload read failure.
    pub fn content_format(&self) -> Result<Option<u16>, ExchangeError> {
        let Some(option) = self
            .options
            .iter()
            .find(|o| o.number == option_number::CONTENT_FORMAT)
        else {
            return Ok(None);
        };

        if option.value.len() > 2 {
            return Err(ExchangeError::PayloadRead(format!(
                "content-format option is {} bytes long",
                option.value.len()
            )));
        }

        let value = option
            .value
            .iter()
            .fold(0u16, |acc, byte| (acc << 8) | u16::from(*byte));
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_options(options: Vec<CoapOption>) -> CoapResponse {
        CoapResponse {
            code: ResponseCode::CONTENT,
            message_type: MessageType::Acknowledgement,
            message_id: MessageId(7),
            token: Token::empty(),
            options,
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(CoapMethod::from_http("GET").unwrap().code(), 1);
        assert_eq!(CoapMethod::from_http("POST").unwrap().code(), 2);
        assert_eq!(CoapMethod::from_http("PUT").unwrap().code(), 3);
        assert_eq!(CoapMethod::from_http("DELETE").unwrap().code(), 4);
        assert!(matches!(
            CoapMethod::from_http("PATCH"),
            Err(ExchangeError::UnsupportedMethod(m)) if m == "PATCH"
        ));
        assert!(CoapMethod::from_http("get").is_err());
    }

    #[test]
    fn test_response_code_display() {
        assert_eq!(ResponseCode::CONTENT.to_string(), "2.05");
        assert_eq!(ResponseCode::NOT_FOUND.to_string(), "4.04");
        assert_eq!(ResponseCode::UNSUPPORTED_CONTENT_FORMAT.to_string(), "4.15");
        assert_eq!(ResponseCode(1).to_string(), "GET");
        assert_eq!(ResponseCode::EMPTY.to_string(), "0.00");
        assert_eq!(ResponseCode::new(1, 2).to_string(), "1.02");
    }

    #[test]
    fn test_response_code_classes() {
        assert!(ResponseCode::CONTENT.is_response());
        assert!(ResponseCode::GATEWAY_TIMEOUT.is_response());
        assert!(!ResponseCode::EMPTY.is_response());
        assert!(ResponseCode::EMPTY.is_empty());
        assert!(ResponseCode(2).is_request());
    }

    #[test]
    fn test_token_length_limit() {
        assert!(Token::new(vec![0u8; 8]).is_some());
        assert!(Token::new(vec![0u8; 9]).is_none());
        assert_eq!(Token::new(vec![0xab, 0x01]).unwrap().to_string(), "ab01");
        assert_eq!(Token::empty().to_string(), "-");
    }

    #[test]
    fn test_content_format_parsing() {
        let none = response_with_options(vec![]);
        assert_eq!(none.content_format().unwrap(), None);

        // Zero is encoded as an empty option value
        let text = response_with_options(vec![CoapOption::new(option_number::CONTENT_FORMAT, vec![])]);
        assert_eq!(text.content_format().unwrap(), Some(0));

        let json = response_with_options(vec![CoapOption::new(option_number::CONTENT_FORMAT, vec![50])]);
        assert_eq!(json.content_format().unwrap(), Some(50));

        let wide = response_with_options(vec![CoapOption::new(option_number::CONTENT_FORMAT, vec![0x01, 0x2c])]);
        assert_eq!(wide.content_format().unwrap(), Some(300));

        let broken = response_with_options(vec![CoapOption::new(option_number::CONTENT_FORMAT, vec![1, 2, 3])]);
        assert!(matches!(broken.content_format(), Err(ExchangeError::PayloadRead(_))));
    }

    #[test]
    fn test_content_format_table() {
        for value in [0u16, 40, 41, 42, 47, 50, 60] {
            assert_eq!(ContentFormat::from_value(value).value(), value);
            assert!(!matches!(ContentFormat::from_value(value), ContentFormat::Unknown(_)));
        }
        assert_eq!(ContentFormat::from_value(11542), ContentFormat::Unknown(11542));
    }

    #[test]
    fn test_request_path_rendering() {
        let request = CoapRequest {
            method: CoapMethod::Get,
            options: vec![
                CoapOption::new(option_number::URI_PATH, "sensors"),
                CoapOption::new(option_number::URI_PATH, "temp"),
                CoapOption::new(option_number::URI_QUERY, "unit=c"),
            ],
            token: Token::empty(),
            payload: None,
            message_type: MessageType::Confirmable,
            message_id: MessageId(1),
        };
        assert_eq!(request.path(), "/sensors/temp");
    }
}
