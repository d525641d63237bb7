// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Per-stream state (spec.md Section 3 "Per-stream record").
//!
//! The teacher's `Stream { state: StreamState }` in `src/http/v2.rs` is the
//! starting shape; this adds the two flow-control windows, the header-block
//! accumulation buffer, the response body cap, and the single-shot
//! completion future a client stream needs that a server-side accept loop
//! does not.

use std::sync::atomic::AtomicI64;
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

use crate::error::Http2Error;
use crate::message::{HeaderMap, Response};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StreamId(pub u32);

impl StreamId {
    pub const CONTROL: StreamId = StreamId(0);

    pub fn is_control(self) -> bool {
        self.0 == 0
    }

    pub fn is_client_initiated(self) -> bool {
        self.0 % 2 == 1
    }
}

/// spec.md Section 3 "Stream state": the two branches share `Idle` and
/// `Open`/`Closed`; which branch a stream takes depends on whether END_STREAM
/// arrived on the outbound HEADERS or the inbound side first.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Applies the local (our own) half closing, i.e. we sent END_STREAM.
    pub fn close_local(self) -> Self {
        match self {
            Self::Idle | Self::Open => Self::HalfClosedLocal,
            Self::HalfClosedRemote => Self::Closed,
            other => other,
        }
    }

    /// Applies the remote half closing, i.e. we received END_STREAM.
    pub fn close_remote(self) -> Self {
        match self {
            Self::Idle | Self::Open => Self::HalfClosedRemote,
            Self::HalfClosedLocal => Self::Closed,
            other => other,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// The in-progress state of one stream, owned by the active-stream map.
pub struct Stream {
    pub id: StreamId,
    pub state: Mutex<StreamState>,

    /// Signed so it may briefly go negative when the peer lowers
    /// `SETTINGS_INITIAL_WINDOW_SIZE` below what we've already sent.
    pub send_window: AtomicI64,
    pub recv_window: AtomicI64,
    pub initial_send_window_at_open: i64,
    pub initial_recv_window: i64,

    pub header_block_buffer: Mutex<BytesMut>,
    pub pending_end_stream: std::sync::atomic::AtomicBool,
    pub headers_received: std::sync::atomic::AtomicBool,

    response_status: Mutex<Option<u16>>,
    response_headers: Mutex<HeaderMap>,
    response_body: Mutex<BytesMut>,
    max_response_body_size: u64,

    completion: Mutex<Option<oneshot::Sender<Result<Response, Http2Error>>>>,
}

impl Stream {
    pub fn new(id: StreamId, initial_send_window: i32, initial_recv_window: i32, max_response_body_size: u64) -> (Self, oneshot::Receiver<Result<Response, Http2Error>>) {
        let (tx, rx) = oneshot::channel();
        let stream = Self {
            id,
            state: Mutex::new(StreamState::Idle),
            send_window: AtomicI64::new(initial_send_window as i64),
            recv_window: AtomicI64::new(initial_recv_window as i64),
            initial_send_window_at_open: initial_send_window as i64,
            initial_recv_window: initial_recv_window as i64,
            header_block_buffer: Mutex::new(BytesMut::new()),
            pending_end_stream: std::sync::atomic::AtomicBool::new(false),
            headers_received: std::sync::atomic::AtomicBool::new(false),
            response_status: Mutex::new(None),
            response_headers: Mutex::new(HeaderMap::new()),
            response_body: Mutex::new(BytesMut::new()),
            max_response_body_size,
            completion: Mutex::new(Some(tx)),
        };
        (stream, rx)
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: StreamState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_response_status(&self, status: u16) {
        *self.response_status.lock().unwrap() = Some(status);
    }

    pub fn set_response_headers(&self, headers: HeaderMap) {
        *self.response_headers.lock().unwrap() = headers;
    }

    /// Appends to the response body, enforcing `max_response_body_size`
    /// (`0` disables the cap). Returns `false` on overflow; the caller must
    /// then fail the stream with RST_STREAM(CANCEL) per spec.md Section 9.
    #[must_use]
    pub fn append_body(&self, data: &[u8]) -> bool {
        let mut body = self.response_body.lock().unwrap();
        if self.max_response_body_size != 0 && (body.len() + data.len()) as u64 > self.max_response_body_size {
            return false;
        }
        body.extend_from_slice(data);
        true
    }

    /// Resolves the completion future exactly once. A second call (e.g. a
    /// RST_STREAM racing a completed END_STREAM) is a silent no-op.
    pub fn complete(&self, result: Result<Response, Http2Error>) {
        if let Some(tx) = self.completion.lock().unwrap().take() {
            let _ = tx.send(result);
        }
    }

    pub fn complete_success(&self) {
        let status = self.response_status.lock().unwrap().unwrap_or(0);
        let headers = self.response_headers.lock().unwrap().clone();
        let body = self.response_body.lock().unwrap().clone().freeze();
        self.complete(Ok(Response { status, headers, body }));
    }

    pub fn response_body_snapshot(&self) -> Bytes {
        self.response_body.lock().unwrap().clone().freeze()
    }
}
