//! A scripted CoAP server on a loopback UDP socket.
//!
//! Every datagram it receives is recorded so tests can assert what the
//! gateway put on the wire; requests are answered according to a fixed
//! [`Behaviour`].

use std::net::SocketAddr;
use std::time::Duration;

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, ResponseType};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct Reply {
    pub code: ResponseType,
    pub content_format: Option<u16>,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn new(code: ResponseType) -> Self {
        Self {
            code,
            content_format: None,
            payload: Vec::new(),
        }
    }

    pub fn with_content(mut self, format: u16, payload: &[u8]) -> Self {
        self.content_format = Some(format);
        self.payload = payload.to_vec();
        self
    }

    fn packet(&self, kind: MessageType, message_id: u16, token: Vec<u8>) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(kind);
        packet.header.message_id = message_id;
        packet.header.code = MessageClass::Response(self.code);
        packet.set_token(token);
        if let Some(format) = self.content_format {
            packet.add_option(CoapOption::ContentFormat, encode_uint(format));
        }
        packet.payload = self.payload.clone();
        packet
    }
}

#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Answer inside the ACK.
    Piggybacked(Reply),
    /// Empty ACK first, then the response as a new confirmable message.
    Separate(Reply),
    /// Never answer.
    Silent,
}

pub struct FakeCoapServer {
    addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Packet>,
    task: JoinHandle<()>,
}

impl FakeCoapServer {
    pub async fn start(behaviour: Behaviour) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (tx, received) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(socket, behaviour, tx));
        Self {
            addr,
            received,
            task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next datagram from the gateway; panics after two seconds.
    pub async fn next_packet(&mut self) -> Packet {
        tokio::time::timeout(Duration::from_secs(2), self.received.recv())
            .await
            .expect("gateway sent nothing")
            .expect("server task stopped")
    }

    /// Panics if anything arrives within `window`.
    pub async fn assert_silent(&mut self, window: Duration) {
        let arrived = tokio::time::timeout(window, self.received.recv()).await;
        assert!(arrived.is_err(), "unexpected datagram: {:?}", arrived);
    }
}

impl Drop for FakeCoapServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: UdpSocket, behaviour: Behaviour, seen: mpsc::UnboundedSender<Packet>) {
    let mut buf = [0u8; 1500];
    let mut next_id: u16 = 0x4000;

    loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let Ok(packet) = Packet::from_bytes(&buf[..len]) else {
            continue;
        };

        let is_request = matches!(packet.header.code, MessageClass::Request(_));
        let message_id = packet.header.message_id;
        let token = packet.get_token().to_vec();
        let _ = seen.send(packet);
        if !is_request {
            continue;
        }

        match &behaviour {
            Behaviour::Silent => {}
            Behaviour::Piggybacked(reply) => {
                let packet = reply.packet(MessageType::Acknowledgement, message_id, token);
                send(&socket, from, &packet).await;
            }
            Behaviour::Separate(reply) => {
                let mut ack = Packet::new();
                ack.header.set_type(MessageType::Acknowledgement);
                ack.header.message_id = message_id;
                ack.header.code = MessageClass::Empty;
                send(&socket, from, &ack).await;

                tokio::time::sleep(Duration::from_millis(50)).await;
                next_id = next_id.wrapping_add(1);
                let packet = reply.packet(MessageType::Confirmable, next_id, token);
                send(&socket, from, &packet).await;
            }
        }
    }
}

async fn send(socket: &UdpSocket, to: SocketAddr, packet: &Packet) {
    let bytes = packet.to_bytes().unwrap();
    socket.send_to(&bytes, to).await.unwrap();
}

fn encode_uint(value: u16) -> Vec<u8> {
    match value {
        0 => Vec::new(),
        1..=0xff => vec![value as u8],
        _ => value.to_be_bytes().to_vec(),
    }
}

/// The string values of every option numbered `option`.
pub fn option_strings(packet: &Packet, option: CoapOption) -> Vec<String> {
    packet
        .get_option(option)
        .map(|values| {
            values
                .iter()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect()
        })
        .unwrap_or_default()
}
