//! Adapters: wire codec, UDP transport, resolution, retransmission and the
//! HTTP reply conversion.

pub mod codec;
pub mod http;
pub mod resolver;
pub mod retransmit;
pub mod udp;

pub use codec::CodecError;
pub use resolver::resolve_destination;
pub use retransmit::{RetransmitQueue, TransmissionParams};
pub use udp::UdpTransport;
