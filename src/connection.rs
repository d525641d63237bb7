// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The connection engine: preface + SETTINGS handshake, request sending,
//! and the background read loop that dispatches inbound frames.
//!
//! Grounded on the teacher's `handle_client`/`handle_client_inner` loop in
//! `src/http/v2.rs` (the per-frame `tokio::select!`-free read-then-dispatch
//! shape, and the `ConnectionError`-to-GOAWAY/`RST_STREAM` mapping), turned
//! from a server accept loop into a client send/receive engine: stream ids
//! are client-allocated and odd, a write mutex pairs with the HPACK encoder
//! (the teacher has neither, being single-task per connection), and flow
//! control plus cancellation are new.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::Http2Config;
use crate::error::{DispatchError, Http2Error, ProtocolError, Reason, StreamError};
use crate::frame::{self, FrameType, RawFrame};
use crate::hpack::{self, DecompressionError};
use crate::message::{HeaderMap, HeaderValue, Request, Response};
use crate::settings::{self, PeerSettings, SettingKind};
use crate::stream::{Stream, StreamId, StreamState};

/// RFC 9113 Section 6.5.2: the default initial flow-control window, used
/// for the connection window and every stream's window until a SETTINGS
/// frame changes it.
const DEFAULT_INITIAL_WINDOW: i64 = 65_535;

struct Writer<W> {
    half: W,
    encoder: hpack::Encoder,
}

/// Resolves once the peer's SETTINGS ACK has been observed by the read
/// loop. Uses the enable/check/await pattern to avoid a lost wakeup between
/// the initial check and the `Notified` future being polled.
struct SettingsAck {
    acked: AtomicBool,
    notify: Notify,
}

impl SettingsAck {
    fn new() -> Self {
        Self { acked: AtomicBool::new(false), notify: Notify::new() }
    }

    fn signal(&self) {
        self.acked.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    async fn wait(&self) {
        let notified = self.notify.notified();
        if self.acked.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}

struct Shared<S> {
    config: Http2Config,
    writer: AsyncMutex<Writer<WriteHalf<S>>>,
    streams: StdMutex<HashMap<StreamId, Arc<Stream>>>,
    next_stream_id: AtomicU32,
    conn_send_window: AtomicI64,
    conn_recv_window: AtomicI64,
    initial_conn_recv_window: i64,
    remote_settings: StdMutex<PeerSettings>,
    goaway_received: AtomicBool,
    window_notify: Notify,
    settings_ack: SettingsAck,
    cancellation: CancellationToken,
    read_loop: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<S> Shared<S> {
    fn get_stream(&self, id: StreamId) -> Option<Arc<Stream>> {
        self.streams.lock().unwrap().get(&id).cloned()
    }

    fn remove_stream(&self, id: StreamId) -> Option<Arc<Stream>> {
        self.streams.lock().unwrap().remove(&id)
    }

    fn highest_seen_stream_id(&self) -> u32 {
        self.next_stream_id.load(Ordering::Acquire).saturating_sub(2)
    }

    fn fail_all_streams(&self, make_error: impl Fn() -> Http2Error) {
        let streams: Vec<Arc<Stream>> = self.streams.lock().unwrap().drain().map(|(_, v)| v).collect();
        for stream in streams {
            stream.complete(Err(make_error()));
        }
        self.window_notify.notify_waiters();
    }
}

enum Flow {
    Continue,
}

/// The client side of one HTTP/2 connection over an arbitrary duplex byte
/// stream (post-TLS, ALPN-resolved to `h2` by the caller).
pub struct Connection<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Connection<S> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Performs the preface + SETTINGS handshake (spec Section 4.8.1) and
    /// starts the background read loop. Resolves once the peer's SETTINGS
    /// ACK arrives, or fails after `config.settings_ack_timeout`.
    pub async fn connect(stream: S, config: Http2Config) -> Result<Self, Http2Error> {
        let (read_half, write_half) = tokio::io::split(stream);
        let encoder = hpack::Encoder::new(config.header_table_size);

        let shared = Arc::new(Shared {
            config: config.clone(),
            writer: AsyncMutex::new(Writer { half: write_half, encoder }),
            streams: StdMutex::new(HashMap::new()),
            next_stream_id: AtomicU32::new(1),
            conn_send_window: AtomicI64::new(DEFAULT_INITIAL_WINDOW),
            conn_recv_window: AtomicI64::new(DEFAULT_INITIAL_WINDOW),
            initial_conn_recv_window: DEFAULT_INITIAL_WINDOW,
            remote_settings: StdMutex::new(PeerSettings::default()),
            goaway_received: AtomicBool::new(false),
            window_notify: Notify::new(),
            settings_ack: SettingsAck::new(),
            cancellation: CancellationToken::new(),
            read_loop: AsyncMutex::new(None),
        });

        {
            let mut writer = shared.writer.lock().await;
            frame::write_preface(&mut writer.half).await?;

            let payload = settings::encode_settings_payload(&[
                (SettingKind::EnablePush, 0),
                (SettingKind::MaxConcurrentStreams, config.local_max_concurrent_streams),
                (SettingKind::InitialWindowSize, DEFAULT_INITIAL_WINDOW as u32),
                (SettingKind::MaxFrameSize, config.local_max_frame_size),
                (SettingKind::MaxHeaderListSize, config.local_max_header_list_size),
                (SettingKind::HeaderTableSize, config.header_table_size),
            ]);
            frame::write_frame(&mut writer.half, FrameType::Settings, 0, StreamId::CONTROL, &payload).await?;
        }

        let decoder = hpack::Decoder::new(config.header_table_size, config.local_max_header_list_size);
        let read_loop_shared = shared.clone();
        let handle = tokio::spawn(async move {
            read_loop(read_loop_shared, read_half, decoder).await;
        });
        *shared.read_loop.lock().await = Some(handle);

        tokio::select! {
            _ = shared.settings_ack.wait() => {}
            _ = tokio::time::sleep(config.settings_ack_timeout) => {
                return Err(Http2Error::Timeout);
            }
        }

        log::debug!("HTTP/2 connection established");
        Ok(Self { shared })
    }

    /// `IsAlive` per spec Section 4.9: not GOAWAY'd, not disposed, and the
    /// read loop task is still running.
    pub async fn is_alive(&self) -> bool {
        if self.shared.goaway_received.load(Ordering::Acquire) || self.shared.cancellation.is_cancelled() {
            return false;
        }
        match self.shared.read_loop.lock().await.as_ref() {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    fn allocate_stream_id(&self) -> Result<StreamId, Http2Error> {
        let id = self.shared.next_stream_id.fetch_add(2, Ordering::AcqRel);
        if id > 0x7FFF_FFFF - 2 {
            return Err(Http2Error::Overflow("stream id space exhausted; reopen connection".into()));
        }
        Ok(StreamId(id))
    }

    /// Sends one request and awaits its response (spec Section 4.8.2).
    /// `cancellation` firing at any point aborts the request with
    /// RST_STREAM(CANCEL) and resolves with [`Http2Error::Cancelled`].
    pub async fn send_request(&self, request: Request, cancellation: CancellationToken) -> Result<Response, Http2Error> {
        if self.shared.goaway_received.load(Ordering::Acquire) || self.shared.cancellation.is_cancelled() {
            return Err(Http2Error::NetworkError("connection is going away".into()));
        }

        // Best-effort per spec Section 4.8.2: the peer enforces this for
        // real by RST_STREAM(REFUSED_STREAM)ing the overshoot, but there's
        // no reason to open a stream locally we already know it'll refuse.
        let max_concurrent = self.shared.remote_settings.lock().unwrap().max_concurrent_streams;
        if self.shared.streams.lock().unwrap().len() as u32 >= max_concurrent {
            return Err(Http2Error::Overflow(format!("remote max_concurrent_streams ({max_concurrent}) reached")));
        }

        let stream_id = self.allocate_stream_id()?;

        let initial_send_window = self.shared.remote_settings.lock().unwrap().initial_window_size as i32;
        let (stream, completion_rx) = Stream::new(stream_id, initial_send_window, DEFAULT_INITIAL_WINDOW as i32, self.shared.config.max_response_body_size);
        let stream = Arc::new(stream);
        self.shared.streams.lock().unwrap().insert(stream_id, stream.clone());

        if self.shared.goaway_received.load(Ordering::Acquire) || self.shared.cancellation.is_cancelled() {
            self.shared.remove_stream(stream_id);
            return Err(Http2Error::NetworkError("connection is going away".into()));
        }

        tokio::select! {
            result = self.run_request(stream_id, &stream, completion_rx, request) => result,
            _ = cancellation.cancelled() => {
                self.shared.remove_stream(stream_id);
                send_rst_stream(&self.shared, stream_id, Reason::Cancel).await;
                stream.complete(Err(Http2Error::Cancelled));
                Err(Http2Error::Cancelled)
            }
        }
    }

    async fn run_request(
        &self,
        stream_id: StreamId,
        stream: &Arc<Stream>,
        completion_rx: tokio::sync::oneshot::Receiver<Result<Response, Http2Error>>,
        request: Request,
    ) -> Result<Response, Http2Error> {
        let headers = build_header_list(&request);
        let has_body = request.body.as_ref().is_some_and(|b| !b.is_empty());

        {
            let mut writer = self.shared.writer.lock().await;
            let block = writer.encoder.encode(headers.iter().map(|(n, v)| (n.as_str(), v.as_slice())));
            let max_frame = self.shared.remote_settings.lock().unwrap().max_frame_size as usize;
            write_header_block(&mut writer.half, stream_id, &block, max_frame, !has_body).await?;
        }

        stream.set_state(if has_body { StreamState::Open } else { StreamState::HalfClosedLocal });
        log::trace!("sent HEADERS for stream {}", stream_id.0);

        if let Some(body) = request.body.filter(|b| !b.is_empty()) {
            self.send_body(stream_id, stream, &body).await?;
        }

        completion_rx.await.map_err(|_| Http2Error::NetworkError("connection disposed".into()))?
    }

    async fn send_body(&self, stream_id: StreamId, stream: &Arc<Stream>, body: &[u8]) -> Result<(), Http2Error> {
        let mut sent = 0usize;
        while sent < body.len() {
            if stream.state().is_closed() {
                return Err(Http2Error::Cancelled);
            }

            let max_frame = self.shared.remote_settings.lock().unwrap().max_frame_size as i64;
            let remaining = (body.len() - sent) as i64;

            let notified = self.shared.window_notify.notified();
            let n = self.shared.conn_send_window.load(Ordering::Acquire).min(stream.send_window.load(Ordering::Acquire)).min(max_frame).min(remaining);
            if n <= 0 {
                notified.await;
                continue;
            }

            let mut writer = self.shared.writer.lock().await;
            let n = self.shared.conn_send_window.load(Ordering::Acquire).min(stream.send_window.load(Ordering::Acquire)).min(max_frame).min(remaining);
            if n <= 0 {
                drop(writer);
                continue;
            }
            let n = n as usize;
            self.shared.conn_send_window.fetch_sub(n as i64, Ordering::AcqRel);
            stream.send_window.fetch_sub(n as i64, Ordering::AcqRel);

            let is_last = sent + n == body.len();
            let flags = if is_last { frame::flags::END_STREAM } else { 0 };
            frame::write_frame(&mut writer.half, FrameType::Data, flags, stream_id, &body[sent..sent + n]).await?;
            drop(writer);
            sent += n;
        }

        stream.set_state(stream.state().close_local());
        Ok(())
    }

    /// Graceful shutdown (spec Section 4.8.4): GOAWAY(NO_ERROR), join the
    /// read loop, fail remaining streams, then drop the byte stream.
    pub async fn dispose(&self) {
        self.shared.cancellation.cancel();

        let last_stream_id = self.shared.highest_seen_stream_id();
        let _ = tokio::time::timeout(self.shared.config.goaway_write_timeout, send_goaway(&self.shared, Reason::NoError, last_stream_id)).await;

        let handle = self.shared.read_loop.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(self.shared.config.read_loop_join_timeout, handle).await;
        }

        self.shared.fail_all_streams(|| Http2Error::NetworkError("connection disposed".into()));
    }
}

/// The scheme's default port, suppressed from `:authority` when it matches
/// the request's actual port (spec.md Section 4.8.2).
fn default_port_for_scheme(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Builds the `:authority` pseudo-header value: `host` bracketed if it's an
/// IPv6 literal (a bare hostname never contains `:`, so that's a sufficient
/// test), with `:port` appended only when `port` isn't the scheme's default.
fn build_authority(scheme: &str, host: &str, port: u16) -> String {
    let host = if host.contains(':') && !host.starts_with('[') { format!("[{host}]") } else { host.to_string() };

    if default_port_for_scheme(scheme) == Some(port) {
        host
    } else {
        format!("{host}:{port}")
    }
}

fn build_header_list(request: &Request) -> Vec<(String, Vec<u8>)> {
    let mut headers = Vec::with_capacity(request.headers.len() + 4);
    let authority = build_authority(&request.scheme, &request.host, request.port);
    headers.push((":method".to_string(), request.method.as_str().as_bytes().to_vec()));
    headers.push((":scheme".to_string(), request.scheme.as_bytes().to_vec()));
    headers.push((":authority".to_string(), authority.into_bytes()));
    headers.push((":path".to_string(), request.path.as_bytes().to_vec()));

    for (name, value) in request.headers.iter() {
        if name.is_connection_specific() {
            continue;
        }
        if name.as_str() == "te" && value.as_bytes() != b"trailers" {
            continue;
        }
        headers.push((name.as_str().to_string(), value.as_bytes().to_vec()));
    }

    headers
}

async fn write_header_block<W: AsyncWrite + Unpin>(writer: &mut W, stream_id: StreamId, block: &[u8], max_frame: usize, end_stream: bool) -> std::io::Result<()> {
    let max_frame = max_frame.max(1);
    let mut offset = 0;
    let mut first = true;
    loop {
        let chunk_len = (block.len() - offset).min(max_frame);
        let chunk = &block[offset..offset + chunk_len];
        offset += chunk_len;
        let is_last = offset == block.len();

        let frame_type = if first { FrameType::Headers } else { FrameType::Continuation };
        let mut flags = 0;
        if is_last {
            flags |= frame::flags::END_HEADERS;
        }
        if first && end_stream {
            flags |= frame::flags::END_STREAM;
        }

        frame::write_frame(writer, frame_type, flags, stream_id, chunk).await?;
        first = false;
        if is_last {
            break;
        }
    }
    Ok(())
}

async fn write_simple_frame<S>(shared: &Arc<Shared<S>>, frame_type: FrameType, flags: u8, stream_id: StreamId, payload: &[u8]) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut writer = shared.writer.lock().await;
    frame::write_frame(&mut writer.half, frame_type, flags, stream_id, payload).await
}

async fn send_rst_stream<S>(shared: &Arc<Shared<S>>, stream_id: StreamId, reason: Reason)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let payload = reason.as_u32().to_be_bytes();
    if let Err(e) = write_simple_frame(shared, FrameType::RstStream, 0, stream_id, &payload).await {
        log::debug!("failed to write RST_STREAM: {e}");
    }
}

async fn send_goaway<S>(shared: &Arc<Shared<S>>, reason: Reason, last_stream_id: u32)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut payload = BytesMut::with_capacity(8);
    payload.extend_from_slice(&last_stream_id.to_be_bytes());
    payload.extend_from_slice(&reason.as_u32().to_be_bytes());
    if let Err(e) = write_simple_frame(shared, FrameType::GoAway, 0, StreamId::CONTROL, &payload).await {
        log::debug!("failed to write GOAWAY: {e}");
    }
}

async fn maybe_replenish_connection_window<S>(shared: &Arc<Shared<S>>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let current = shared.conn_recv_window.load(Ordering::Acquire);
    let initial = shared.initial_conn_recv_window;
    if current < initial / 2 {
        let increment = initial - current;
        shared.conn_recv_window.fetch_add(increment, Ordering::AcqRel);
        let payload = (increment as u32 & 0x7FFF_FFFF).to_be_bytes();
        if let Err(e) = write_simple_frame(shared, FrameType::WindowUpdate, 0, StreamId::CONTROL, &payload).await {
            log::debug!("failed to write connection WINDOW_UPDATE: {e}");
        }
    }
}

async fn maybe_replenish_stream_window<S>(shared: &Arc<Shared<S>>, stream: &Arc<Stream>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let current = stream.recv_window.load(Ordering::Acquire);
    let initial = stream.initial_recv_window;
    if current < initial / 2 {
        let increment = initial - current;
        stream.recv_window.fetch_add(increment, Ordering::AcqRel);
        let payload = (increment as u32 & 0x7FFF_FFFF).to_be_bytes();
        if let Err(e) = write_simple_frame(shared, FrameType::WindowUpdate, 0, stream.id, &payload).await {
            log::debug!("failed to write stream WINDOW_UPDATE: {e}");
        }
    }
}

async fn apply_window_delta_to_all_streams<S>(shared: &Arc<Shared<S>>, delta: i64)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let streams: Vec<Arc<Stream>> = shared.streams.lock().unwrap().values().cloned().collect();
    for stream in streams {
        let new_window = stream.send_window.load(Ordering::Acquire) + delta;
        if new_window.unsigned_abs() > i32::MAX as u64 {
            shared.remove_stream(stream.id);
            send_rst_stream(shared, stream.id, Reason::FlowControlError).await;
            stream.complete(Err(Http2Error::ProtocolError(ProtocolError::new(Reason::FlowControlError, "INITIAL_WINDOW_SIZE rebaseline overflowed".into()))));
            continue;
        }
        stream.send_window.store(new_window, Ordering::Release);
    }
    shared.window_notify.notify_waiters();
}

async fn read_loop<S>(shared: Arc<Shared<S>>, mut read_half: ReadHalf<S>, mut decoder: hpack::Decoder)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut continuation_stream: Option<StreamId> = None;

    loop {
        let frame = match frame::read_frame(&mut read_half, shared.config.local_max_frame_size).await {
            Ok(frame) => frame,
            Err(frame::FrameReadError::Io(e)) => {
                if !shared.cancellation.is_cancelled() {
                    log::warn!("read loop I/O error: {e}");
                    shared.fail_all_streams(|| Http2Error::NetworkError("connection closed".into()));
                }
                break;
            }
            Err(frame::FrameReadError::Protocol(e)) => {
                log::warn!("connection error while reading frame: {e}");
                send_goaway(&shared, e.reason, shared.highest_seen_stream_id()).await;
                shared.fail_all_streams(|| Http2Error::ProtocolError(ProtocolError::new(e.reason, e.debug_data.clone())));
                break;
            }
        };

        log::trace!("received frame type={:?} stream={} len={}", frame.frame_type, frame.stream_id.0, frame.payload.len());

        if let Some(active) = continuation_stream {
            let matches = frame.frame_type == Some(FrameType::Continuation) && frame.stream_id == active;
            if !matches {
                log::warn!("expected CONTINUATION for stream {}, got {:?}", active.0, frame.frame_type);
                send_goaway(&shared, Reason::ProtocolError, shared.highest_seen_stream_id()).await;
                shared.fail_all_streams(|| Http2Error::ProtocolError(ProtocolError::new(Reason::ProtocolError, "expected CONTINUATION".into())));
                break;
            }
        }

        match dispatch_frame(&shared, &mut decoder, &mut continuation_stream, frame).await {
            Ok(Flow::Continue) => {}
            Err(DispatchError::Connection(err)) => {
                log::warn!("connection error: {err}");
                send_goaway(&shared, err.reason, shared.highest_seen_stream_id()).await;
                shared.fail_all_streams(|| Http2Error::ProtocolError(ProtocolError::new(err.reason, err.debug_data.clone())));
                break;
            }
            Err(DispatchError::Stream(err)) => {
                log::debug!("stream error: {err}");
                send_rst_stream(&shared, err.stream_id, err.reason).await;
                if let Some(stream) = shared.remove_stream(err.stream_id) {
                    stream.complete(Err(Http2Error::ProtocolError(ProtocolError::new(err.reason, "stream reset".into()))));
                }
            }
        }
    }

    log::debug!("read loop exiting");
}

async fn dispatch_frame<S>(shared: &Arc<Shared<S>>, decoder: &mut hpack::Decoder, continuation_stream: &mut Option<StreamId>, frame: RawFrame) -> Result<Flow, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Some(frame_type) = frame.frame_type else {
        log::trace!("ignoring unknown frame type 0x{:x}", frame.raw_type);
        return Ok(Flow::Continue);
    };

    match frame_type {
        FrameType::Data => handle_data(shared, frame).await,
        FrameType::Headers => handle_headers(shared, decoder, continuation_stream, frame).await,
        FrameType::Continuation => handle_continuation(shared, decoder, continuation_stream, frame).await,
        FrameType::Settings => handle_settings(shared, frame).await,
        FrameType::Ping => handle_ping(shared, frame).await,
        FrameType::GoAway => handle_goaway(shared, frame).await,
        FrameType::WindowUpdate => handle_window_update(shared, frame).await,
        FrameType::RstStream => handle_rst_stream(shared, frame).await,
        FrameType::PushPromise => handle_push_promise(shared, frame).await,
        FrameType::Priority => Ok(Flow::Continue),
    }
}

async fn handle_data<S>(shared: &Arc<Shared<S>>, frame: RawFrame) -> Result<Flow, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if frame.stream_id.is_control() {
        return Err(ProtocolError::new(Reason::ProtocolError, "DATA on stream 0").into());
    }

    let frame_len = frame.payload.len() as i64;

    let Some(stream) = shared.get_stream(frame.stream_id) else {
        return Err(StreamError::new(frame.stream_id, Reason::StreamClosed).into());
    };

    if !stream.headers_received.load(Ordering::Acquire) {
        return Err(StreamError::new(frame.stream_id, Reason::ProtocolError).into());
    }

    let padded = frame.flags & frame::flags::PADDED != 0;
    let (_, data) = frame::split_padding(frame.payload, padded).map_err(|reason| StreamError::new(frame.stream_id, reason))?;

    if frame_len > shared.conn_recv_window.load(Ordering::Acquire) {
        return Err(ProtocolError::new(Reason::FlowControlError, "connection recv window exceeded").into());
    }
    if frame_len > stream.recv_window.load(Ordering::Acquire) {
        return Err(StreamError::new(frame.stream_id, Reason::FlowControlError).into());
    }

    // The peer already debited its own send-window for these bytes the
    // moment it wrote them, regardless of what we do with the payload
    // locally — these two decrements must run even when the body cap
    // below rejects the data, or our view of both windows permanently
    // desyncs from the peer's for the rest of the connection's life.
    shared.conn_recv_window.fetch_sub(frame_len, Ordering::AcqRel);
    stream.recv_window.fetch_sub(frame_len, Ordering::AcqRel);

    if !stream.append_body(&data) {
        return Err(StreamError::new(frame.stream_id, Reason::Cancel).into());
    }

    maybe_replenish_connection_window(shared).await;
    maybe_replenish_stream_window(shared, &stream).await;

    if frame.flags & frame::flags::END_STREAM != 0 {
        stream.set_state(stream.state().close_remote());
        shared.remove_stream(frame.stream_id);
        stream.complete_success();
    }

    Ok(Flow::Continue)
}

fn finish_header_block(decoder: &mut hpack::Decoder, stream: &Arc<Stream>) -> Result<(), DispatchError> {
    let block = std::mem::take(&mut *stream.header_block_buffer.lock().unwrap());

    let decoded = match decoder.decode(&block) {
        Ok(decoded) => decoded,
        Err(DecompressionError::HeaderListTooLarge) => {
            return Err(StreamError::new(stream.id, Reason::EnhanceYourCalm).into());
        }
        Err(e) => {
            return Err(ProtocolError::new(Reason::CompressionError, e.to_string()).into());
        }
    };

    let mut status = None;
    let mut headers = HeaderMap::new();
    for (name, value) in decoded {
        if name.as_ref() == ":status" {
            let parsed = std::str::from_utf8(&value).ok().and_then(|s| s.parse::<u16>().ok());
            match parsed {
                Some(code) if (100..=999).contains(&code) => status = Some(code),
                _ => return Err(StreamError::new(stream.id, Reason::ProtocolError).into()),
            }
            continue;
        }
        headers.insert(name.to_string(), HeaderValue::from_bytes(value));
    }

    let Some(status) = status else {
        return Err(StreamError::new(stream.id, Reason::ProtocolError).into());
    };

    stream.set_response_status(status);
    stream.set_response_headers(headers);
    stream.headers_received.store(true, Ordering::Release);

    Ok(())
}

async fn handle_headers<S>(shared: &Arc<Shared<S>>, decoder: &mut hpack::Decoder, continuation_stream: &mut Option<StreamId>, frame: RawFrame) -> Result<Flow, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if frame.stream_id.is_control() {
        return Err(ProtocolError::new(Reason::ProtocolError, "HEADERS on stream 0").into());
    }

    let Some(stream) = shared.get_stream(frame.stream_id) else {
        // Not a stream we opened (no server push): ignore rather than tear
        // down the connection.
        return Ok(Flow::Continue);
    };

    let padded = frame.flags & frame::flags::PADDED != 0;
    let (_, mut payload) = frame::split_padding(frame.payload, padded).map_err(|reason| StreamError::new(frame.stream_id, reason))?;

    if frame.flags & frame::flags::PRIORITY != 0 {
        if payload.len() < 5 {
            return Err(StreamError::new(frame.stream_id, Reason::FrameSizeError).into());
        }
        payload = payload.split_off(5);
    }

    stream.header_block_buffer.lock().unwrap().extend_from_slice(&payload);

    if frame.flags & frame::flags::END_STREAM != 0 {
        stream.pending_end_stream.store(true, Ordering::Release);
    }

    if frame.flags & frame::flags::END_HEADERS != 0 {
        finish_header_block(decoder, &stream)?;
        if stream.pending_end_stream.load(Ordering::Acquire) {
            stream.set_state(stream.state().close_remote());
            shared.remove_stream(stream.id);
            stream.complete_success();
        }
    } else {
        *continuation_stream = Some(frame.stream_id);
    }

    Ok(Flow::Continue)
}

async fn handle_continuation<S>(shared: &Arc<Shared<S>>, decoder: &mut hpack::Decoder, continuation_stream: &mut Option<StreamId>, frame: RawFrame) -> Result<Flow, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Some(stream) = shared.get_stream(frame.stream_id) else {
        *continuation_stream = None;
        return Ok(Flow::Continue);
    };

    stream.header_block_buffer.lock().unwrap().extend_from_slice(&frame.payload);

    if frame.flags & frame::flags::END_HEADERS != 0 {
        *continuation_stream = None;
        finish_header_block(decoder, &stream)?;
        if stream.pending_end_stream.load(Ordering::Acquire) {
            stream.set_state(stream.state().close_remote());
            shared.remove_stream(stream.id);
            stream.complete_success();
        }
    }

    Ok(Flow::Continue)
}

async fn handle_settings<S>(shared: &Arc<Shared<S>>, frame: RawFrame) -> Result<Flow, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if !frame.stream_id.is_control() {
        return Err(ProtocolError::new(Reason::ProtocolError, "SETTINGS on non-zero stream").into());
    }

    if frame.flags & frame::flags::ACK != 0 {
        if !frame.payload.is_empty() {
            return Err(ProtocolError::new(Reason::FrameSizeError, "SETTINGS ACK must have an empty payload").into());
        }
        shared.settings_ack.signal();
        return Ok(Flow::Continue);
    }

    let parsed = settings::parse_settings_payload(frame.payload)?;

    let mut window_delta = None;
    let mut new_header_table_size = None;
    {
        let mut remote = shared.remote_settings.lock().unwrap();
        for raw in parsed {
            match raw.kind {
                Some(SettingKind::InitialWindowSize) => {
                    window_delta = Some(raw.value as i64 - remote.initial_window_size as i64);
                }
                Some(SettingKind::HeaderTableSize) => {
                    new_header_table_size = Some(raw.value);
                }
                _ => {}
            }
            remote.apply(raw)?;
        }
    }

    if let Some(delta) = window_delta {
        apply_window_delta_to_all_streams(shared, delta).await;
    }
    if let Some(new_size) = new_header_table_size {
        shared.writer.lock().await.encoder.set_peer_max_table_size(new_size);
    }

    log::debug!("applied peer SETTINGS");
    if let Err(e) = write_simple_frame(shared, FrameType::Settings, frame::flags::ACK, StreamId::CONTROL, &[]).await {
        log::debug!("failed to write SETTINGS ACK: {e}");
    }

    Ok(Flow::Continue)
}

async fn handle_ping<S>(shared: &Arc<Shared<S>>, frame: RawFrame) -> Result<Flow, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if !frame.stream_id.is_control() {
        return Err(ProtocolError::new(Reason::ProtocolError, "PING on non-zero stream").into());
    }
    if frame.payload.len() != 8 {
        return Err(ProtocolError::new(Reason::FrameSizeError, "PING payload must be 8 bytes").into());
    }
    if frame.flags & frame::flags::ACK != 0 {
        return Ok(Flow::Continue);
    }
    if let Err(e) = write_simple_frame(shared, FrameType::Ping, frame::flags::ACK, StreamId::CONTROL, &frame.payload).await {
        log::debug!("failed to write PING ack: {e}");
    }
    Ok(Flow::Continue)
}

async fn handle_goaway<S>(shared: &Arc<Shared<S>>, frame: RawFrame) -> Result<Flow, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if frame.payload.len() < 8 {
        return Err(ProtocolError::new(Reason::FrameSizeError, "GOAWAY payload too short").into());
    }
    let last_stream_id = u32::from_be_bytes([frame.payload[0], frame.payload[1], frame.payload[2], frame.payload[3]]) & 0x7FFF_FFFF;

    log::warn!("received GOAWAY, last_stream_id={last_stream_id}");
    shared.goaway_received.store(true, Ordering::Release);

    let streams: Vec<Arc<Stream>> = shared.streams.lock().unwrap().values().cloned().collect();
    for stream in streams {
        if stream.id.0 > last_stream_id {
            shared.remove_stream(stream.id);
            stream.complete(Err(Http2Error::NetworkError("request not processed before GOAWAY".into())));
        }
    }

    Ok(Flow::Continue)
}

async fn handle_window_update<S>(shared: &Arc<Shared<S>>, frame: RawFrame) -> Result<Flow, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if frame.payload.len() != 4 {
        return Err(ProtocolError::new(Reason::FrameSizeError, "WINDOW_UPDATE payload must be 4 bytes").into());
    }
    let increment = u32::from_be_bytes([frame.payload[0], frame.payload[1], frame.payload[2], frame.payload[3]]) & 0x7FFF_FFFF;

    if increment == 0 {
        if frame.stream_id.is_control() {
            return Err(ProtocolError::new(Reason::ProtocolError, "WINDOW_UPDATE increment of 0 on connection").into());
        }
        return Err(StreamError::new(frame.stream_id, Reason::ProtocolError).into());
    }

    if frame.stream_id.is_control() {
        let current = shared.conn_send_window.load(Ordering::Acquire);
        if current + increment as i64 > i32::MAX as i64 {
            return Err(ProtocolError::new(Reason::FlowControlError, "connection send window overflow").into());
        }
        shared.conn_send_window.fetch_add(increment as i64, Ordering::AcqRel);
        shared.window_notify.notify_waiters();
        return Ok(Flow::Continue);
    }

    let Some(stream) = shared.get_stream(frame.stream_id) else {
        return Ok(Flow::Continue);
    };
    let current = stream.send_window.load(Ordering::Acquire);
    if current + increment as i64 > i32::MAX as i64 {
        return Err(StreamError::new(frame.stream_id, Reason::FlowControlError).into());
    }
    stream.send_window.fetch_add(increment as i64, Ordering::AcqRel);
    shared.window_notify.notify_waiters();
    Ok(Flow::Continue)
}

async fn handle_rst_stream<S>(shared: &Arc<Shared<S>>, frame: RawFrame) -> Result<Flow, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if frame.stream_id.is_control() {
        return Err(ProtocolError::new(Reason::ProtocolError, "RST_STREAM on stream 0").into());
    }
    if frame.payload.len() != 4 {
        return Err(ProtocolError::new(Reason::FrameSizeError, "RST_STREAM payload must be 4 bytes").into());
    }
    let code = u32::from_be_bytes([frame.payload[0], frame.payload[1], frame.payload[2], frame.payload[3]]);
    let reason = Reason::from(code);

    if let Some(stream) = shared.remove_stream(frame.stream_id) {
        let error = if reason == Reason::Cancel {
            Http2Error::Cancelled
        } else {
            Http2Error::ProtocolError(ProtocolError::new(reason, "stream reset by peer".into()))
        };
        stream.complete(Err(error));
    }

    Ok(Flow::Continue)
}

async fn handle_push_promise<S>(shared: &Arc<Shared<S>>, frame: RawFrame) -> Result<Flow, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if frame.payload.len() < 4 {
        return Err(ProtocolError::new(Reason::FrameSizeError, "PUSH_PROMISE payload too short").into());
    }
    let promised_id = StreamId(u32::from_be_bytes([frame.payload[0], frame.payload[1], frame.payload[2], frame.payload[3]]) & 0x7FFF_FFFF);
    log::debug!("rejecting PUSH_PROMISE for stream {}", promised_id.0);
    send_rst_stream(shared, promised_id, Reason::RefusedStream).await;
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_suppresses_default_https_port() {
        assert_eq!(build_authority("https", "example.com", 443), "example.com");
    }

    #[test]
    fn authority_keeps_non_default_port() {
        assert_eq!(build_authority("https", "example.com", 8443), "example.com:8443");
    }

    #[test]
    fn authority_brackets_ipv6_literal() {
        assert_eq!(build_authority("https", "::1", 443), "[::1]");
        assert_eq!(build_authority("https", "::1", 9443), "[::1]:9443");
    }

    #[test]
    fn authority_leaves_already_bracketed_host_alone() {
        assert_eq!(build_authority("https", "[::1]", 443), "[::1]");
    }
}
