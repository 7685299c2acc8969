//! Inbound port: what the HTTP side may ask of the gateway.

use async_trait::async_trait;

use crate::domain::response::HttpReply;

#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Forward one HTTP request and produce the reply to send back.
    ///
    /// Never fails: per-request errors come back as error replies.
    async fn forward(&self, method: &str, target: &str, body: &[u8]) -> HttpReply;

    /// Stop accepting new exchanges and wait for in-flight ones to finish.
    async fn shutdown(&self);
}
