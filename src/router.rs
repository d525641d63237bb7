// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The transport router's contract with the engine (spec.md Section 4.10).
//!
//! The router itself — TCP connect, TLS handshake, ALPN negotiation, falling
//! back to HTTP/1.1 when the peer doesn't negotiate `h2` — is out of this
//! crate's scope; those concerns belong to whatever caller owns the TLS
//! stack (the teacher's own ALPN list lives in `src/main.rs`, picking
//! between `http/1.1`, `h2`, and `h3` on one `rustls::ServerConfig`). This
//! module only fixes the seam: what a router must do to hand a connection to
//! [`crate::ConnectionManager`], and the one retry rule the core requires of
//! it.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::Http2Config;
use crate::error::Http2Error;
use crate::manager::ConnectionManager;
use crate::message::Method;
use crate::Connection;

/// What a transport router must do with a freshly ALPN-negotiated stream
/// before the engine can use it. Implementing this trait is optional — it
/// exists to document the handoff, not to be the only way to call
/// [`ConnectionManager::get_or_create`].
#[async_trait::async_trait]
pub trait TransportRouter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Establishes a duplex byte stream to `(host, port)` and performs ALPN.
    /// Returns `None` if the peer negotiated anything other than `h2` (the
    /// router falls back to its own HTTP/1.1 path in that case rather than
    /// handing the stream to this crate).
    async fn negotiate(&self, host: &str, port: u16) -> Result<Option<(S, Http2Config)>, Http2Error>;
}

/// Retries are only safe on HTTP methods RFC 9110 Section 9.2.2 defines as
/// idempotent (spec.md Section 4.10) — a reused connection can fail after
/// the peer already applied a non-idempotent request's side effect.
pub fn should_retry_after_send_failure(method: &Method) -> bool {
    method.is_idempotent()
}

/// Removes a connection the router observed fail a send against, per the
/// "remove it from the manager" half of the Section 4.10 contract. Disposal
/// of the connection itself is the router's responsibility, since only it
/// knows whether the underlying byte stream is still worth draining
/// gracefully or should be dropped outright.
pub fn evict_after_send_failure<S>(manager: &ConnectionManager<S>, host: &str, port: u16)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    manager.remove(host, port);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_retried_but_post_is_not() {
        assert!(should_retry_after_send_failure(&Method::Get));
        assert!(!should_retry_after_send_failure(&Method::Post));
    }
}
