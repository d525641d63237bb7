// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Request/response types the engine exchanges with its caller.
//!
//! Adapted from the teacher's server-oriented `http::message` (which modeled
//! an inbound `Request` and an outbound `Response`): here the engine sends a
//! `Request` and resolves a `Response`, the reverse of the teacher's
//! direction. `HeaderName`/`HeaderMap` keep the teacher's small ordered
//! `Vec<(name, value)>` shape rather than a `HashMap`, since header order
//! matters for HPACK indexing decisions and header-list size accounting.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use unicase::UniCase;

/// A header name, stored lowercased. HTTP/2 requires header field names to
/// be lowercase (RFC 9113 Section 8.2); the engine lowercases on construction
/// so comparisons and HPACK table lookups never have to re-normalize.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct HeaderName(Box<str>);

impl HeaderName {
    pub fn from_static(name: &'static str) -> Self {
        debug_assert!(name.bytes().all(|b| !b.is_ascii_uppercase()));
        Self(name.into())
    }

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_ascii_lowercase().into_boxed_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// RFC 9113 Section 8.2.2: these carry connection-specific semantics
    /// in HTTP/1.1 and must never appear on an HTTP/2 wire.
    pub fn is_connection_specific(&self) -> bool {
        matches!(
            self.0.as_ref(),
            "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding" | "upgrade" | "host"
        )
    }
}

impl fmt::Debug for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<&str> for HeaderName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for HeaderName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A header value, stored as raw octets rather than `String`.
///
/// HPACK treats header octets as 8-bit Latin-1-style bytes, not Unicode code
/// points (spec.md Section 9); obs-text in `0x80..=0xFF` must round-trip
/// byte-exact. [`HeaderValue::as_str_lossy`] is only for diagnostics.
#[derive(Clone, Eq, PartialEq)]
pub struct HeaderValue(Bytes);

impl HeaderValue {
    pub fn from_static(value: &'static str) -> Self {
        Self(Bytes::from_static(value.as_bytes()))
    }

    pub fn from_bytes(value: Bytes) -> Self {
        Self(value)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl fmt::Debug for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str_lossy())
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self(Bytes::from(value.into_bytes()))
    }
}

/// An ordered multimap of header fields, preserving insertion order the way
/// the teacher's `HeaderMap` does (`Vec<(HeaderName, String)>`).
#[derive(Clone, Debug, Default)]
pub struct HeaderMap {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<HeaderName>, value: impl Into<HeaderValue>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Looks up by case-insensitive name without allocating a lowercased
    /// copy of `name` on every call, the way `UniCase::eq`'s byte-at-a-time
    /// ASCII comparison lets the teacher's lookups do.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        let name = UniCase::new(name);
        self.headers.iter().find(|(n, _)| UniCase::new(n.as_str()) == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter().map(|(n, v)| (n, v))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// RFC 9110 request methods relevant to the transport router's idempotent
/// retry rule (spec.md Section 4.10); anything else is carried as `Other`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
            Self::Other(value) => value,
        }
    }

    /// RFC 9110 Section 9.2.2 idempotent methods — the only ones the
    /// transport router is allowed to retry on a fresh connection.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Put | Self::Delete | Self::Options | Self::Trace)
    }
}

/// A request the engine sends. `scheme`/`path` become the `:scheme`/`:path`
/// pseudo-headers directly; `host`/`port` are kept apart rather than as a
/// pre-joined `authority` string because building `:authority` (bracketing
/// an IPv6 literal, suppressing the port when it matches the scheme's
/// default) is the engine's job, not the caller's (spec.md Section 4.8.2) —
/// see `build_header_list` in `connection.rs`.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub scheme: Cow<'static, str>,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            method,
            scheme: Cow::Borrowed("https"),
            host: host.into(),
            port,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// The response the engine resolves a request's completion future with.
#[derive(Clone, Debug)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}
