// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! RFC 7541 Section 5.1: integers with an N-bit prefix.
//!
//! Grounded on the teacher's `WriteExtensions::write_hpack_number` in
//! `servente-http2/src/hpack.rs`, reimplemented against `bytes::Buf`/
//! `BytesMut` instead of `Vec<u8>` push loops.

use bytes::{Buf, BufMut};

use super::DecompressionError;

/// Encodes `value` with an `prefix_bits`-bit prefix, ORing the low bits into
/// `first_byte_high_bits` (the flag bits that share the first octet).
pub fn encode(buf: &mut impl BufMut, prefix_bits: u8, first_byte_high_bits: u8, value: u64) {
    let max_prefix = (1u64 << prefix_bits) - 1;
    if value < max_prefix {
        buf.put_u8(first_byte_high_bits | value as u8);
        return;
    }

    buf.put_u8(first_byte_high_bits | max_prefix as u8);
    let mut remainder = value - max_prefix;
    while remainder >= 128 {
        buf.put_u8(((remainder % 128) as u8) | 0x80);
        remainder /= 128;
    }
    buf.put_u8(remainder as u8);
}

/// Decodes an integer whose prefix occupies the low `prefix_bits` bits of
/// the byte already consumed by the caller (`first_byte`).
pub fn decode(buf: &mut impl Buf, prefix_bits: u8, first_byte: u8) -> Result<u64, DecompressionError> {
    let max_prefix = (1u64 << prefix_bits) - 1;
    let prefix_value = (first_byte as u64) & max_prefix;
    if prefix_value < max_prefix {
        return Ok(prefix_value);
    }

    let mut value = max_prefix;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(DecompressionError::UnexpectedEndOfInput);
        }
        let byte = buf.get_u8();
        value += ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(DecompressionError::IntegerOverflow);
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trips_small_value_in_prefix() {
        let mut buf = BytesMut::new();
        encode(&mut buf, 5, 0, 10);
        assert_eq!(&buf[..], &[10]);
        let first = buf[0];
        let mut rest = buf.split_off(1);
        assert_eq!(decode(&mut rest, 5, first).unwrap(), 10);
    }

    #[test]
    fn round_trips_value_requiring_continuation() {
        let mut buf = BytesMut::new();
        encode(&mut buf, 5, 0, 1337);
        assert_eq!(&buf[..], &[31, 154, 10]);
        let first = buf[0];
        let mut rest = buf.split_off(1);
        assert_eq!(decode(&mut rest, 5, first).unwrap(), 1337);
    }

    #[test]
    fn encodes_with_high_bits_flag() {
        let mut buf = BytesMut::new();
        encode(&mut buf, 7, 0x80, 5);
        assert_eq!(&buf[..], &[0x85]);
    }
}
