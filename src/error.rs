// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Error taxonomy for the engine, split along RFC 9113 Section 5.4's two
//! axes (connection errors vs. stream errors), plus the surface handed back
//! to callers.
//!
//! The shape mirrors the teacher's `ConnectionError`/`ErrorCode` in
//! `src/http/v2.rs`: plain enums with a manual `impl From`, no `thiserror`
//! (none of the five example repos in the retrieval pack pull it in).

use std::fmt;

use crate::stream::StreamId;

/// The wire `error_code` used by GOAWAY and RST_STREAM.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Reason {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl Reason {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl From<u32> for Reason {
    fn from(value: u32) -> Self {
        match value {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => {
                // RFC 9113 Section 7: unknown error codes MUST NOT trigger
                // special behavior and MAY be treated as INTERNAL_ERROR.
                log::debug!("unknown HTTP/2 error code: {value}");
                Self::InternalError
            }
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A connection-level error: fatal to the whole connection, answered with
/// GOAWAY, and propagated to every active stream.
#[derive(Debug)]
pub struct ProtocolError {
    pub reason: Reason,
    pub debug_data: String,
}

impl ProtocolError {
    pub fn new(reason: Reason, debug_data: impl Into<String>) -> Self {
        Self { reason, debug_data: debug_data.into() }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection error {:?}: {}", self.reason, self.debug_data)
    }
}

impl std::error::Error for ProtocolError {}

/// A stream-level error: answered with RST_STREAM and fails only that
/// stream's completion future.
#[derive(Debug)]
pub struct StreamError {
    pub stream_id: StreamId,
    pub reason: Reason,
}

impl StreamError {
    pub fn new(stream_id: StreamId, reason: Reason) -> Self {
        Self { stream_id, reason }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream {} error {:?}", self.stream_id.0, self.reason)
    }
}

impl std::error::Error for StreamError {}

/// Either kind of protocol failure observed while reading a frame — the
/// read loop's dispatcher is the only place both are produced together.
#[derive(Debug)]
pub enum DispatchError {
    Connection(ProtocolError),
    Stream(StreamError),
}

impl From<ProtocolError> for DispatchError {
    fn from(value: ProtocolError) -> Self {
        Self::Connection(value)
    }
}

impl From<StreamError> for DispatchError {
    fn from(value: StreamError) -> Self {
        Self::Stream(value)
    }
}

/// The error surface handed back to the application (spec.md Section 6).
#[derive(Debug)]
pub enum Http2Error {
    /// The connection closed, was GOAWAY'd, or an I/O error occurred.
    NetworkError(String),

    /// The caller's cancellation token fired before completion.
    Cancelled,

    /// A caller- or config-defined deadline elapsed.
    Timeout,

    /// The peer sent something malformed; carries the classified error.
    ProtocolError(ProtocolError),

    /// Stream-id space exhausted, or the response body exceeded its cap.
    Overflow(String),
}

impl fmt::Display for Http2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkError(msg) => write!(f, "network error: {msg}"),
            Self::Cancelled => write!(f, "request cancelled"),
            Self::Timeout => write!(f, "timed out"),
            Self::ProtocolError(err) => write!(f, "protocol error: {err}"),
            Self::Overflow(msg) => write!(f, "overflow: {msg}"),
        }
    }
}

impl std::error::Error for Http2Error {}

impl From<std::io::Error> for Http2Error {
    fn from(value: std::io::Error) -> Self {
        Self::NetworkError(value.to_string())
    }
}

impl From<ProtocolError> for Http2Error {
    fn from(value: ProtocolError) -> Self {
        Self::ProtocolError(value)
    }
}
