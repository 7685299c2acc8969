//! CoAP wire codec on top of `coap-lite`.
//!
//! `coap_lite::Packet` keeps options in a map keyed by option number, with
//! repeated options in insertion order, so the delta encoding always sees
//! them ascending.

use coap_lite::{CoapOption as WireOption, MessageClass, MessageType as WireType, Packet};

use crate::domain::message::{
    CoapOption, CoapRequest, CoapResponse, MessageId, MessageType, ResponseCode, Token,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("datagram of {size} bytes exceeds {max}")]
    TooLarge { size: usize, max: usize },
}

fn to_wire_type(message_type: MessageType) -> WireType {
    match message_type {
        MessageType::Confirmable => WireType::Confirmable,
        MessageType::NonConfirmable => WireType::NonConfirmable,
        MessageType::Acknowledgement => WireType::Acknowledgement,
        MessageType::Reset => WireType::Reset,
    }
}

fn from_wire_type(message_type: WireType) -> MessageType {
    match message_type {
        WireType::Confirmable => MessageType::Confirmable,
        WireType::NonConfirmable => MessageType::NonConfirmable,
        WireType::Acknowledgement => MessageType::Acknowledgement,
        WireType::Reset => MessageType::Reset,
    }
}

fn packet(
    message_type: MessageType,
    code: u8,
    message_id: MessageId,
    token: &Token,
    options: &[CoapOption],
    payload: &[u8],
) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(to_wire_type(message_type));
    packet.header.code = MessageClass::from(code);
    packet.header.message_id = message_id.0;
    packet.set_token(token.as_bytes().to_vec());
    for option in options {
        packet.add_option(WireOption::from(option.number), option.value.clone());
    }
    packet.payload = payload.to_vec();
    packet
}

fn to_bytes(packet: &Packet, max_datagram: usize) -> Result<Vec<u8>, CodecError> {
    let bytes = packet
        .to_bytes()
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    if bytes.len() > max_datagram {
        return Err(CodecError::TooLarge {
            size: bytes.len(),
            max: max_datagram,
        });
    }
    Ok(bytes)
}

/// Encode a request; fails if the datagram would exceed `max_datagram`.
pub fn encode_request(request: &CoapRequest, max_datagram: usize) -> Result<Vec<u8>, CodecError> {
    let packet = packet(
        request.message_type,
        request.method.code(),
        request.message_id,
        &request.token,
        &request.options,
        request.payload.as_deref().unwrap_or_default(),
    );
    to_bytes(&packet, max_datagram)
}

/// Encode any decoded-message shaped value. Used for ACKs of separate
/// responses and by test peers.
pub fn encode_message(message: &CoapResponse, max_datagram: usize) -> Result<Vec<u8>, CodecError> {
    let packet = packet(
        message.message_type,
        message.code.0,
        message.message_id,
        &message.token,
        &message.options,
        &message.payload,
    );
    to_bytes(&packet, max_datagram)
}

/// Empty ACK (code 0.00, no token) for a confirmable message.
pub fn empty_ack(message_id: MessageId) -> Result<Vec<u8>, CodecError> {
    empty(MessageType::Acknowledgement, message_id)
}

/// Reset for a message the gateway cannot process.
pub fn reset(message_id: MessageId) -> Result<Vec<u8>, CodecError> {
    empty(MessageType::Reset, message_id)
}

fn empty(message_type: MessageType, message_id: MessageId) -> Result<Vec<u8>, CodecError> {
    let packet = packet(message_type, 0, message_id, &Token::empty(), &[], &[]);
    to_bytes(&packet, usize::MAX)
}

/// Decode one inbound datagram.
pub fn decode(datagram: &[u8]) -> Result<CoapResponse, CodecError> {
    let packet = Packet::from_bytes(datagram).map_err(|e| CodecError::Decode(e.to_string()))?;

    let token = Token::new(packet.get_token().to_vec())
        .ok_or_else(|| CodecError::Decode("token longer than 8 bytes".to_string()))?;

    let mut options = Vec::new();
    for (number, values) in packet.options() {
        for value in values {
            options.push(CoapOption::new(*number, value.clone()));
        }
    }

    Ok(CoapResponse {
        code: ResponseCode(u8::from(packet.header.code)),
        message_type: from_wire_type(packet.header.get_type()),
        message_id: MessageId(packet.header.message_id),
        token,
        options,
        payload: packet.payload,
    })
}
