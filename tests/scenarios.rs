// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! End-to-end scenarios against an in-memory peer built on
//! `tokio::io::duplex`, the way the teacher's own
//! `servente_http1/tests/integration_tests.rs` drives its server without a
//! real socket.

use std::time::Duration;

use bytes::Bytes;
use h2engine::config::Http2Config;
use h2engine::error::Http2Error;
use h2engine::frame::{self, flags, FrameType};
use h2engine::hpack::{Decoder, Encoder};
use h2engine::message::{Method, Request};
use h2engine::stream::StreamId;
use h2engine::Connection;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio_util::sync::CancellationToken;

fn test_config() -> Http2Config {
    let mut config = Http2Config::default();
    config.settings_ack_timeout = Duration::from_secs(5);
    config
}

async fn read_preface_and_client_settings(server: &mut DuplexStream) {
    let mut preface = [0u8; 24];
    server.read_exact(&mut preface).await.unwrap();
    assert_eq!(&preface, frame::PREFACE);
    let settings = frame::read_frame(server, 16_777_215).await.unwrap();
    assert_eq!(settings.frame_type, Some(FrameType::Settings));
}

async fn ack_settings(server: &mut DuplexStream) {
    frame::write_frame(server, FrameType::Settings, flags::ACK, StreamId::CONTROL, &[]).await.unwrap();
}

async fn reply_status(server: &mut DuplexStream, stream_id: StreamId, status: u16) {
    let mut encoder = Encoder::new(4096);
    let block = encoder.encode([(":status", status.to_string().as_bytes())]);
    frame::write_frame(server, FrameType::Headers, flags::END_HEADERS | flags::END_STREAM, stream_id, &block).await.unwrap();
}

#[tokio::test]
async fn get_without_body_resolves_with_status_200() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);

    let server_task = tokio::spawn(async move {
        read_preface_and_client_settings(&mut server).await;
        ack_settings(&mut server).await;

        let headers = frame::read_frame(&mut server, 16_777_215).await.unwrap();
        assert_eq!(headers.frame_type, Some(FrameType::Headers));
        assert_eq!(headers.stream_id, StreamId(1));
        assert_eq!(headers.flags, flags::END_STREAM | flags::END_HEADERS);

        let mut decoder = Decoder::new(4096, u32::MAX);
        let decoded = decoder.decode(&headers.payload).unwrap();
        assert!(decoded.iter().any(|(n, v)| n.as_ref() == ":path" && &v[..] == b"/x"));

        reply_status(&mut server, StreamId(1), 200).await;
    });

    let conn = Connection::connect(client, test_config()).await.unwrap();
    let response = conn.send_request(Request::new(Method::Get, "h", 443, "/x"), CancellationToken::new()).await.unwrap();

    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
    server_task.await.unwrap();
}

#[tokio::test]
async fn post_40kib_body_splits_into_three_data_frames() {
    let (client, mut server) = tokio::io::duplex(256 * 1024);
    let body = Bytes::from(vec![0x5Au8; 40 * 1024]);

    let server_task = tokio::spawn(async move {
        read_preface_and_client_settings(&mut server).await;
        ack_settings(&mut server).await;

        let headers = frame::read_frame(&mut server, 16_777_215).await.unwrap();
        assert_eq!(headers.frame_type, Some(FrameType::Headers));
        assert_eq!(headers.flags & flags::END_STREAM, 0);

        let mut sizes = Vec::new();
        loop {
            let data = frame::read_frame(&mut server, 16_777_215).await.unwrap();
            assert_eq!(data.frame_type, Some(FrameType::Data));
            assert_eq!(data.stream_id, StreamId(1));
            sizes.push(data.payload.len());
            if data.flags & flags::END_STREAM != 0 {
                break;
            }
        }
        assert_eq!(sizes, vec![16384, 16384, 8192]);

        reply_status(&mut server, StreamId(1), 200).await;
    });

    let conn = Connection::connect(client, test_config()).await.unwrap();
    let request = Request::new(Method::Post, "h", 443, "/upload").with_body(body);
    let response = conn.send_request(request, CancellationToken::new()).await.unwrap();

    assert_eq!(response.status, 200);
    server_task.await.unwrap();
}

#[tokio::test]
async fn oversized_header_block_uses_continuation() {
    let (client, mut server) = tokio::io::duplex(256 * 1024);

    let server_task = tokio::spawn(async move {
        read_preface_and_client_settings(&mut server).await;
        ack_settings(&mut server).await;

        let first = frame::read_frame(&mut server, 16_777_215).await.unwrap();
        assert_eq!(first.frame_type, Some(FrameType::Headers));
        assert_eq!(first.flags & flags::END_HEADERS, 0, "first frame must not end the header block");

        let mut saw_continuation = false;
        loop {
            let frame = frame::read_frame(&mut server, 16_777_215).await.unwrap();
            assert_eq!(frame.frame_type, Some(FrameType::Continuation));
            saw_continuation = true;
            if frame.flags & flags::END_HEADERS != 0 {
                break;
            }
        }
        assert!(saw_continuation);

        reply_status(&mut server, StreamId(1), 200).await;
    });

    // A value diverse enough that Huffman coding won't compress it below
    // the 16 KiB default max_frame_size.
    let huge_value: String = (0..30_000).map(|i| (b'!' + (i % 94) as u8) as char).collect();
    let mut request = Request::new(Method::Get, "h", 443, "/big-headers");
    request.headers.insert("x-huge", huge_value);

    let conn = Connection::connect(client, test_config()).await.unwrap();
    let response = conn.send_request(request, CancellationToken::new()).await.unwrap();
    assert_eq!(response.status, 200);
    server_task.await.unwrap();
}

#[tokio::test]
async fn window_starved_body_resumes_after_window_update() {
    let (client, mut server) = tokio::io::duplex(256 * 1024);
    let body = Bytes::from(vec![0x11u8; 3072]);

    let server_task = tokio::spawn(async move {
        read_preface_and_client_settings(&mut server).await;

        let mut payload = bytes::BytesMut::new();
        payload.extend_from_slice(&0x4u16.to_be_bytes());
        payload.extend_from_slice(&1024u32.to_be_bytes());
        frame::write_frame(&mut server, FrameType::Settings, 0, StreamId::CONTROL, &payload).await.unwrap();
        ack_settings(&mut server).await;

        // The client's read loop auto-ACKs our SETTINGS; drain it before
        // the request headers arrive.
        let ack = frame::read_frame(&mut server, 16_777_215).await.unwrap();
        assert_eq!(ack.frame_type, Some(FrameType::Settings));
        assert_eq!(ack.flags, flags::ACK);

        let headers = frame::read_frame(&mut server, 16_777_215).await.unwrap();
        assert_eq!(headers.frame_type, Some(FrameType::Headers));

        for _ in 0..3 {
            let data = frame::read_frame(&mut server, 16_777_215).await.unwrap();
            assert_eq!(data.frame_type, Some(FrameType::Data));
            assert_eq!(data.payload.len(), 1024);

            if data.flags & flags::END_STREAM == 0 {
                let increment = 1024u32.to_be_bytes();
                frame::write_frame(&mut server, FrameType::WindowUpdate, 0, StreamId(1), &increment).await.unwrap();
                frame::write_frame(&mut server, FrameType::WindowUpdate, 0, StreamId::CONTROL, &increment).await.unwrap();
            }
        }

        reply_status(&mut server, StreamId(1), 200).await;
    });

    let conn = Connection::connect(client, test_config()).await.unwrap();
    let request = Request::new(Method::Post, "h", 443, "/slow").with_body(body);
    let response = conn.send_request(request, CancellationToken::new()).await.unwrap();
    assert_eq!(response.status, 200);
    server_task.await.unwrap();
}

#[tokio::test]
async fn push_promise_is_always_refused() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);

    let server_task = tokio::spawn(async move {
        read_preface_and_client_settings(&mut server).await;
        ack_settings(&mut server).await;

        let headers = frame::read_frame(&mut server, 16_777_215).await.unwrap();
        assert_eq!(headers.frame_type, Some(FrameType::Headers));

        let mut promise_payload = Vec::new();
        promise_payload.extend_from_slice(&2u32.to_be_bytes());
        frame::write_frame(&mut server, FrameType::PushPromise, flags::END_HEADERS, StreamId(1), &promise_payload).await.unwrap();

        let rst = frame::read_frame(&mut server, 16_777_215).await.unwrap();
        assert_eq!(rst.frame_type, Some(FrameType::RstStream));
        assert_eq!(rst.stream_id, StreamId(2));
        assert_eq!(u32::from_be_bytes(rst.payload[..].try_into().unwrap()), 0x7); // REFUSED_STREAM

        reply_status(&mut server, StreamId(1), 200).await;
    });

    let conn = Connection::connect(client, test_config()).await.unwrap();
    let response = conn.send_request(Request::new(Method::Get, "h", 443, "/"), CancellationToken::new()).await.unwrap();
    assert_eq!(response.status, 200);
    server_task.await.unwrap();
}

#[tokio::test]
async fn goaway_fails_unprocessed_streams_and_blocks_new_sends() {
    let (client, mut server) = tokio::io::duplex(256 * 1024);

    let server_task = tokio::spawn(async move {
        read_preface_and_client_settings(&mut server).await;
        ack_settings(&mut server).await;

        for _ in 0..3 {
            let headers = frame::read_frame(&mut server, 16_777_215).await.unwrap();
            assert_eq!(headers.frame_type, Some(FrameType::Headers));
        }

        let mut goaway = bytes::BytesMut::new();
        goaway.extend_from_slice(&3u32.to_be_bytes());
        goaway.extend_from_slice(&0u32.to_be_bytes());
        frame::write_frame(&mut server, FrameType::GoAway, 0, StreamId::CONTROL, &goaway).await.unwrap();

        reply_status(&mut server, StreamId(1), 200).await;
        reply_status(&mut server, StreamId(3), 200).await;
    });

    let conn = Connection::connect(client, test_config()).await.unwrap();

    let r1 = conn.send_request(Request::new(Method::Get, "h", 443, "/1"), CancellationToken::new());
    let r3 = conn.send_request(Request::new(Method::Get, "h", 443, "/3"), CancellationToken::new());
    let r5 = conn.send_request(Request::new(Method::Get, "h", 443, "/5"), CancellationToken::new());

    let (res1, res3, res5) = tokio::join!(r1, r3, r5);
    assert_eq!(res1.unwrap().status, 200);
    assert_eq!(res3.unwrap().status, 200);
    assert!(matches!(res5, Err(Http2Error::NetworkError(_))));

    server_task.await.unwrap();

    let after_goaway = conn.send_request(Request::new(Method::Get, "h", 443, "/late"), CancellationToken::new()).await;
    assert!(matches!(after_goaway, Err(Http2Error::NetworkError(_))));
}
