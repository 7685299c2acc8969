//! HTTP request → CoAP request translation.
//!
//! The request target is taken as received on the wire, i.e. still
//! percent-encoded. Every path segment and query argument is decoded on its
//! own before it becomes an option value, so an encoded `/` (`%2F`) stays
//! inside its segment.

use std::sync::atomic::{AtomicU16, Ordering};

use rand::RngCore;

use crate::domain::config::CoapConfig;
use crate::domain::correlation::CorrelationTable;
use crate::domain::error::ExchangeError;
use crate::domain::message::{
    option_number, CoapMethod, CoapOption, CoapRequest, MessageId, MessageType, Token,
    MAX_TOKEN_LEN, MAX_URI_OPTION_LEN,
};

/// Random draws tried before giving up on finding an unused token.
const TOKEN_ATTEMPTS: usize = 64;

/// Hands out message ids: random start, wrapping increment.
#[derive(Debug)]
pub struct MessageIdAllocator {
    next: AtomicU16,
}

impl MessageIdAllocator {
    pub fn new() -> Self {
        Self::starting_at(rand::random())
    }

    pub fn starting_at(first: u16) -> Self {
        Self {
            next: AtomicU16::new(first),
        }
    }

    /// Next id for which `in_use` is false, or `None` once the whole
    /// 16-bit space has been tried.
    pub fn allocate<F>(&self, in_use: F) -> Option<MessageId>
    where
        F: Fn(MessageId) -> bool,
    {
        for _ in 0..=u16::MAX as u32 {
            let id = MessageId(self.next.fetch_add(1, Ordering::Relaxed));
            if !in_use(id) {
                return Some(id);
            }
        }
        None
    }
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds confirmable CoAP requests from HTTP method, target and body.
#[derive(Debug)]
pub struct RequestTranslator {
    token_length: usize,
    max_payload_size: usize,
    ids: MessageIdAllocator,
}

impl RequestTranslator {
    pub fn new(token_length: usize, max_payload_size: usize) -> Self {
        Self {
            token_length: token_length.min(MAX_TOKEN_LEN),
            max_payload_size,
            ids: MessageIdAllocator::new(),
        }
    }

    pub fn from_config(config: &CoapConfig) -> Self {
        Self::new(config.token_length, config.max_payload_size)
    }

    /// Translate one HTTP request.
    ///
    /// `in_use` reports message ids held by live exchanges; those are skipped.
    /// Tokens are not checked against anything.
    /// The method is checked first so unsupported methods never consume an id.
    pub fn translate<F>(
        &self,
        method: &str,
        target: &str,
        body: &[u8],
        in_use: F,
    ) -> Result<CoapRequest, ExchangeError>
    where
        F: Fn(MessageId) -> bool,
    {
        self.build(method, target, body, in_use, |_| false)
    }

    /// Translate one HTTP request whose message id and token must both be
    /// free in `table`.
    pub fn translate_for(
        &self,
        method: &str,
        target: &str,
        body: &[u8],
        table: &CorrelationTable,
    ) -> Result<CoapRequest, ExchangeError> {
        self.build(
            method,
            target,
            body,
            |id| table.contains(id),
            |token| table.token_in_use(token),
        )
    }

    fn build<F, T>(
        &self,
        method: &str,
        target: &str,
        body: &[u8],
        id_in_use: F,
        token_in_use: T,
    ) -> Result<CoapRequest, ExchangeError>
    where
        F: Fn(MessageId) -> bool,
        T: Fn(&Token) -> bool,
    {
        let method = CoapMethod::from_http(method)?;
        let options = build_options(target)?;
        let payload = self.payload(body)?;

        let message_id = self.ids.allocate(id_in_use).ok_or_else(|| {
            ExchangeError::Encoding("no free CoAP message id".to_string())
        })?;
        let token = self.fresh_token(token_in_use).ok_or_else(|| {
            ExchangeError::Encoding("no free CoAP token".to_string())
        })?;

        Ok(CoapRequest {
            method,
            options,
            token,
            payload,
            message_type: MessageType::Confirmable,
            message_id,
        })
    }

    fn payload(&self, body: &[u8]) -> Result<Option<Vec<u8>>, ExchangeError> {
        if body.is_empty() {
            return Ok(None);
        }
        if body.len() > self.max_payload_size {
            return Err(ExchangeError::Encoding(format!(
                "payload of {} bytes exceeds the {} byte datagram budget",
                body.len(),
                self.max_payload_size
            )));
        }
        Ok(Some(body.to_vec()))
    }

    /// Random token of the configured length that `in_use` does not claim.
    fn fresh_token<T>(&self, in_use: T) -> Option<Token>
    where
        T: Fn(&Token) -> bool,
    {
        if self.token_length == 0 {
            return Some(Token::empty());
        }
        let mut rng = rand::thread_rng();
        (0..TOKEN_ATTEMPTS).find_map(|_| {
            let mut bytes = vec![0u8; self.token_length];
            rng.fill_bytes(&mut bytes);
            Token::new(bytes).filter(|token| !in_use(token))
        })
    }
}

/// Uri-Path and Uri-Query options for a request target, sorted by number.
///
/// A target of `/` (or empty) yields no Uri-Path option. Otherwise every
/// segment after the leading slash is one option, empty ones included.
pub fn build_options(target: &str) -> Result<Vec<CoapOption>, ExchangeError> {
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };
    // Drop any fragment a client may have sent along
    let query = query.map(|q| q.split_once('#').map_or(q, |(q, _)| q));
    let path = path.split_once('#').map_or(path, |(p, _)| p);

    let mut options = Vec::new();

    let path = path.strip_prefix('/').unwrap_or(path);
    if !path.is_empty() {
        for segment in path.split('/') {
            options.push(uri_option(option_number::URI_PATH, segment)?);
        }
    }

    if let Some(query) = query.filter(|q| !q.is_empty()) {
        for argument in query.split('&') {
            options.push(uri_option(option_number::URI_QUERY, argument)?);
        }
    }

    // Stable: ties keep insertion order
    options.sort_by_key(|o| o.number);
    Ok(options)
}

fn uri_option(number: u16, raw: &str) -> Result<CoapOption, ExchangeError> {
    let value = percent_decode(raw);
    if value.len() > MAX_URI_OPTION_LEN {
        return Err(ExchangeError::Encoding(format!(
            "option {} value is {} bytes (max {})",
            number,
            value.len(),
            MAX_URI_OPTION_LEN
        )));
    }
    Ok(CoapOption::new(number, value))
}

/// Decode `%XX` escapes. Malformed escapes are copied through verbatim.
pub fn percent_decode(raw: &str) -> Vec<u8> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
