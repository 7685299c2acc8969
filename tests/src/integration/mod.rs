//! End-to-end scenarios against a real loopback UDP peer.

#[cfg(test)]
mod e2e_gateway;
#[cfg(test)]
mod fake_server;
