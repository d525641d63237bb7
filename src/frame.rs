// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The HTTP/2 frame codec: the 9-byte frame header plus bounded payload
//! (RFC 9113 Section 4.1), and the 24-byte connection preface (Section 3.4).
//!
//! This module only serializes/parses the envelope. Per-frame-type payload
//! semantics (DATA padding, HEADERS priority block, SETTINGS pairs, ...) are
//! the connection engine's job (`connection.rs`), matching how the teacher
//! splits `read_frame` (envelope + minimal per-type slicing) from the
//! dispatch loop in `handle_client_inner`.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Reason};
use crate::stream::StreamId;

/// `PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n` — RFC 9113 Section 3.4.
pub const PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

impl FrameType {
    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            _ => return None,
        })
    }
}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// A frame as it sits on the wire: envelope fields plus the raw payload.
/// Unknown frame types (RFC 9113 Section 4.1: "implementations MUST ignore
/// and discard") are kept as `frame_type: None` rather than rejected.
#[derive(Debug)]
pub struct RawFrame {
    pub frame_type: Option<FrameType>,
    pub raw_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
    pub payload: Bytes,
}

/// Write the client connection preface. Must be the very first bytes sent,
/// immediately followed by the client's initial SETTINGS frame.
pub async fn write_preface<W: AsyncWrite + Unpin>(writer: &mut W) -> std::io::Result<()> {
    writer.write_all(PREFACE).await
}

/// Serialize one frame header + payload and write it in a single call so no
/// other writer can interleave bytes between header and payload.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame_type: FrameType,
    flags: u8,
    stream_id: StreamId,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut header = BytesMut::with_capacity(9 + payload.len());
    let length = payload.len() as u32;
    header.extend_from_slice(&length.to_be_bytes()[1..4]);
    header.extend_from_slice(&[frame_type as u8, flags]);
    header.extend_from_slice(&(stream_id.0 & 0x7FFF_FFFF).to_be_bytes());
    header.extend_from_slice(payload);
    writer.write_all(&header).await
}

/// Read exactly one frame: the 9-byte header, then exactly `length` payload
/// bytes. `max_frame_size` is `local_settings.max_frame_size`; a peer
/// exceeding it is a connection-level `FRAME_SIZE_ERROR`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: u32,
) -> Result<RawFrame, FrameReadError> {
    let mut header = [0u8; 9];
    reader.read_exact(&mut header).await?;

    let length = u32::from_be_bytes([0, header[0], header[1], header[2]]);
    let raw_type = header[3];
    let flags = header[4];
    let stream_id = StreamId(u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & 0x7FFF_FFFF);

    if length > max_frame_size {
        return Err(FrameReadError::Protocol(ProtocolError::new(
            Reason::FrameSizeError,
            format!("frame of length {length} exceeds max_frame_size {max_frame_size}"),
        )));
    }

    let mut payload = BytesMut::zeroed(length as usize);
    reader.read_exact(&mut payload).await?;

    Ok(RawFrame {
        frame_type: FrameType::from_u8(raw_type),
        raw_type,
        flags,
        stream_id,
        payload: payload.freeze(),
    })
}

#[derive(Debug)]
pub enum FrameReadError {
    Io(std::io::Error),
    Protocol(ProtocolError),
}

impl From<std::io::Error> for FrameReadError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Strip DATA/HEADERS padding: `PADDED` frames carry a 1-byte pad length
/// followed by the real payload and then that many zero pad bytes.
pub fn split_padding(mut payload: Bytes, padded: bool) -> Result<(Option<u8>, Bytes), Reason> {
    if !padded {
        return Ok((None, payload));
    }
    if payload.is_empty() {
        return Err(Reason::FrameSizeError);
    }
    let pad_len = payload.get_u8();
    if pad_len as usize > payload.len() {
        return Err(Reason::ProtocolError);
    }
    let data_len = payload.len() - pad_len as usize;
    let data = payload.split_to(data_len);
    Ok((Some(pad_len), data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_headers_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, FrameType::Headers, flags::END_HEADERS | flags::END_STREAM, StreamId(1), &[0xDE]).await.unwrap();

        assert_eq!(buf.len(), 10);
        assert_eq!(buf[0..3], [0x00, 0x00, 0x01]);
        assert_eq!(buf[3], FrameType::Headers as u8);
        assert_eq!(buf[4], flags::END_HEADERS | flags::END_STREAM);
        assert_eq!(buf[5..9], [0x00, 0x00, 0x00, 0x01]);
        assert_eq!(buf[9], 0xDE);

        let mut cursor = std::io::Cursor::new(buf);
        let frame = read_frame(&mut cursor, 16384).await.unwrap();
        assert_eq!(frame.frame_type, Some(FrameType::Headers));
        assert_eq!(frame.stream_id, StreamId(1));
        assert_eq!(frame.flags, flags::END_HEADERS | flags::END_STREAM);
        assert_eq!(&frame.payload[..], &[0xDE]);
    }

    #[tokio::test]
    async fn oversized_frame_is_frame_size_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, FrameType::Data, 0, StreamId(1), &[0u8; 20]).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor, 16).await;
        assert!(matches!(result, Err(FrameReadError::Protocol(e)) if e.reason == Reason::FrameSizeError));
    }

    #[test]
    fn unknown_frame_type_is_preserved_as_raw() {
        assert_eq!(FrameType::from_u8(0xff), None);
    }

    #[test]
    fn split_padding_strips_trailing_zero_bytes() {
        let payload = Bytes::from_static(&[0x02, 0xAA, 0xBB, 0x00, 0x00]);
        let (pad_len, data) = split_padding(payload, true).unwrap();
        assert_eq!(pad_len, Some(2));
        assert_eq!(&data[..], &[0xAA, 0xBB]);
    }

    #[test]
    fn split_padding_rejects_pad_longer_than_payload() {
        let payload = Bytes::from_static(&[0xFF, 0xAA]);
        assert_eq!(split_padding(payload, true), Err(Reason::ProtocolError));
    }
}
