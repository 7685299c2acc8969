//! Ports: the seams between the gateway core and the outside world.

pub mod inbound;
pub mod outbound;

pub use inbound::GatewayApi;
pub use outbound::CoapTransport;
