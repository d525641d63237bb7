// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Caches one live [`Connection`] per `(host, port)` pair (spec.md Section
//! 4.9). Concurrent callers for the same key single-flight onto one
//! connection attempt rather than racing independent connects.
//!
//! The teacher has no analogous cache — `HandlerController`
//! (`examples/usadson-servente/src/handler.rs`, duplicated at
//! `servente/src/handler.rs`) routes inbound requests to handlers, it
//! doesn't pool outbound connections. [`tokio::sync::OnceCell`]
//! gives single-flight semantics directly: every caller for a key awaits the
//! same initializer, so there is never a "losing racer" connection to
//! dispose — see `DESIGN.md`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::OnceCell;

use crate::config::Http2Config;
use crate::connection::Connection;
use crate::error::Http2Error;

type Key = (String, u16);

/// Caches one live connection per `(host, port)`.
pub struct ConnectionManager<S> {
    slots: Mutex<HashMap<Key, std::sync::Arc<OnceCell<Connection<S>>>>>,
}

impl<S> Default for ConnectionManager<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ConnectionManager<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }

    /// Lock-free(-ish) fast path: returns a cached connection without
    /// attempting to create one. Does not check liveness — callers that
    /// care should use [`Connection::is_alive`] or just call
    /// [`Self::get_or_create`], which validates and evicts stale entries.
    pub fn get_if_exists(&self, host: &str, port: u16) -> Option<Connection<S>> {
        let key = (host.to_string(), port);
        let cell = self.slots.lock().unwrap().get(&key)?.clone();
        cell.get().cloned()
    }

    /// Returns the cached connection for `(host, port)` if it's alive, else
    /// runs `stream_factory` to establish a fresh one. Concurrent calls for
    /// the same key single-flight onto whichever caller's factory wins the
    /// race to initialize the slot; the rest await that same result.
    ///
    /// `stream_factory` resolves to the raw byte stream plus the config to
    /// hand it to [`Connection::connect`] — establishing the stream (TCP
    /// connect, TLS handshake, ALPN) is the transport router's job, not this
    /// cache's (spec.md Section 4.10).
    pub async fn get_or_create<F, Fut>(&self, host: &str, port: u16, stream_factory: F) -> Result<Connection<S>, Http2Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(S, Http2Config), Http2Error>>,
    {
        let key = (host.to_string(), port);

        if let Some(conn) = self.get_if_exists(host, port) {
            if conn.is_alive().await {
                return Ok(conn);
            }
            log::debug!("evicting stale connection for {host}:{port}");
            self.slots.lock().unwrap().remove(&key);
        }

        let cell = self.slots.lock().unwrap().entry(key.clone()).or_insert_with(|| std::sync::Arc::new(OnceCell::new())).clone();

        let result = cell
            .get_or_try_init(|| async {
                let (stream, config) = stream_factory().await?;
                Connection::connect(stream, config).await
            })
            .await;

        match result {
            Ok(conn) => Ok(conn.clone()),
            Err(e) => {
                // The leader's attempt failed: clear the slot so the next
                // caller gets a fresh `OnceCell` instead of retrying a cell
                // `tokio::sync::OnceCell` otherwise leaves uninitialized.
                self.slots.lock().unwrap().remove(&key);
                Err(e)
            }
        }
    }

    /// Removes a connection from the cache without disposing it — used by
    /// the transport router when a send against a reused connection fails
    /// (spec.md Section 4.10). The caller is responsible for calling
    /// [`Connection::dispose`].
    pub fn remove(&self, host: &str, port: u16) {
        self.slots.lock().unwrap().remove(&(host.to_string(), port));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_get_or_create_single_flights() {
        let manager: ConnectionManager<tokio::io::DuplexStream> = ConnectionManager::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let make_factory = |attempts: Arc<AtomicUsize>| {
            move || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let (client, server) = tokio::io::duplex(4096);
                    tokio::spawn(async move {
                        let mut server = server;
                        let mut buf = [0u8; 1024];
                        loop {
                            use tokio::io::{AsyncReadExt, AsyncWriteExt};
                            match tokio::io::AsyncReadExt::read(&mut server, &mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(_) => {
                                    let _ = server.write_all(&[0x00, 0x00, 0x00, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00]).await;
                                }
                            }
                        }
                    });
                    Ok::<_, Http2Error>((client, Http2Config::default()))
                }
            }
        };

        let one = manager.get_or_create("example.com", 443, make_factory(attempts.clone()));
        let two = manager.get_or_create("example.com", 443, make_factory(attempts.clone()));
        let (a, b) = tokio::join!(one, two);
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
