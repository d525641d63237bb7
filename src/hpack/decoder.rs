// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The decode side of HPACK: turns a header block back into a header list.
//!
//! Grounded on the teacher's decompression path in
//! `servente-http2/src/hpack.rs` (`DecompressionError`, dynamic table
//! lookups), generalized with the `max_header_list_size` accounting rule
//! (RFC 9113 Section 6.5.2) the teacher's fixed-size server responses never
//! had to enforce against a peer.

use bytes::{Buf, Bytes};

use super::dynamic_table::DynamicTable;
use super::{huffman, integer, static_table, DecompressionError};

/// RFC 7541 Section 4.1: per-header accounting overhead, matching the
/// dynamic table's own entry-size formula.
const HEADER_OVERHEAD: usize = 32;

pub struct Decoder {
    dynamic_table: DynamicTable,
    max_header_list_size: u32,
}

impl Decoder {
    pub fn new(max_dynamic_table_size: u32, max_header_list_size: u32) -> Self {
        Self { dynamic_table: DynamicTable::new(max_dynamic_table_size), max_header_list_size }
    }

    pub fn set_max_header_list_size(&mut self, max: u32) {
        self.max_header_list_size = max;
    }

    fn lookup(&self, index: u64) -> Result<(Box<str>, Bytes), DecompressionError> {
        let index = index as usize;
        if let Some((name, value)) = static_table::lookup(index) {
            return Ok((name.into(), Bytes::copy_from_slice(value.as_bytes())));
        }
        let dynamic_index = index.checked_sub(static_table::STATIC_TABLE_LEN).ok_or(DecompressionError::InvalidIndex(index as u64))?;
        let (name, value) = self.dynamic_table.get(dynamic_index).ok_or(DecompressionError::InvalidIndex(index as u64))?;
        Ok((name.into(), Bytes::copy_from_slice(value)))
    }

    fn lookup_name(&self, index: u64) -> Result<Box<str>, DecompressionError> {
        Ok(self.lookup(index)?.0)
    }

    fn read_string(buf: &mut &[u8]) -> Result<Bytes, DecompressionError> {
        if !buf.has_remaining() {
            return Err(DecompressionError::UnexpectedEndOfInput);
        }
        let first = buf.get_u8();
        let huffman_coded = first & 0x80 != 0;
        let len = integer::decode(buf, 7, first)? as usize;
        if buf.remaining() < len {
            return Err(DecompressionError::UnexpectedEndOfInput);
        }
        let raw = buf.copy_to_bytes(len);
        if huffman_coded {
            huffman::decode(&raw)
        } else {
            Ok(raw)
        }
    }

    /// Decodes one complete header block (already reassembled across any
    /// CONTINUATION frames by the caller) into an ordered header list.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<(Box<str>, Bytes)>, DecompressionError> {
        let mut buf = block;
        let mut headers = Vec::new();
        let mut accumulated_size: u64 = 0;
        // RFC 7541 Section 4.2: a dynamic table size update is only valid at
        // the head of the block, before any other instruction. Once any
        // other instruction has been processed, a later size update is a
        // COMPRESSION_ERROR rather than a legal mid-block adjustment.
        let mut saw_non_update_instruction = false;

        while buf.has_remaining() {
            let first = buf.get_u8();

            if first & 0x80 != 0 {
                let index = integer::decode(&mut buf, 7, first)?;
                if index == 0 {
                    return Err(DecompressionError::InvalidIndex(0));
                }
                let (name, value) = self.lookup(index)?;
                Self::account(&mut accumulated_size, &name, &value, self.max_header_list_size)?;
                headers.push((name, value));
                saw_non_update_instruction = true;
            } else if first & 0x40 != 0 {
                let index = integer::decode(&mut buf, 6, first)?;
                let name = if index == 0 { Self::read_string_as_box_str(&mut buf)? } else { self.lookup_name(index)? };
                let value = Self::read_string(&mut buf)?;
                self.dynamic_table.insert(name.clone(), value.to_vec().into_boxed_slice());
                Self::account(&mut accumulated_size, &name, &value, self.max_header_list_size)?;
                headers.push((name, value));
                saw_non_update_instruction = true;
            } else if first & 0x20 != 0 {
                if saw_non_update_instruction {
                    return Err(DecompressionError::UnexpectedSizeUpdate);
                }
                let new_size = integer::decode(&mut buf, 5, first)?;
                if new_size > u32::MAX as u64 {
                    return Err(DecompressionError::IntegerOverflow);
                }
                self.dynamic_table.set_max_size(new_size as u32);
            } else {
                // Literal Header Field without Indexing (0x00) or Never
                // Indexed (0x10) — both are 4-bit prefixes and decode
                // identically; only the encoder's reuse policy differs.
                let index = integer::decode(&mut buf, 4, first)?;
                let name = if index == 0 { Self::read_string_as_box_str(&mut buf)? } else { self.lookup_name(index)? };
                let value = Self::read_string(&mut buf)?;
                Self::account(&mut accumulated_size, &name, &value, self.max_header_list_size)?;
                headers.push((name, value));
                saw_non_update_instruction = true;
            }
        }

        Ok(headers)
    }

    fn read_string_as_box_str(buf: &mut &[u8]) -> Result<Box<str>, DecompressionError> {
        let raw = Self::read_string(buf)?;
        Ok(String::from_utf8_lossy(&raw).into_owned().into_boxed_str())
    }

    fn account(accumulated: &mut u64, name: &str, value: &[u8], max: u32) -> Result<(), DecompressionError> {
        *accumulated += (name.len() + value.len() + HEADER_OVERHEAD) as u64;
        if max != u32::MAX && *accumulated > max as u64 {
            return Err(DecompressionError::HeaderListTooLarge);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::Encoder;

    #[test]
    fn decodes_indexed_static_field() {
        let mut decoder = Decoder::new(4096, u32::MAX);
        let headers = decoder.decode(&[0x82]).unwrap();
        assert_eq!(headers[0].0.as_ref(), ":method");
        assert_eq!(&headers[0].1[..], b"GET");
    }

    #[test]
    fn rejects_index_zero() {
        let mut decoder = Decoder::new(4096, u32::MAX);
        assert_eq!(decoder.decode(&[0x80]), Err(DecompressionError::InvalidIndex(0)));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let mut decoder = Decoder::new(4096, u32::MAX);
        assert!(matches!(decoder.decode(&[0xFF, 0x00]), Err(DecompressionError::InvalidIndex(_))));
    }

    #[test]
    fn enforces_max_header_list_size() {
        let mut decoder = Decoder::new(4096, 10);
        let mut encoder = Encoder::new(4096);
        let block = encoder.encode([("x-long-header-name", b"a long enough value to overflow".as_slice())]);
        assert_eq!(decoder.decode(&block), Err(DecompressionError::HeaderListTooLarge));
    }

    #[test]
    fn round_trips_rfc7541_c2_1_literal_with_indexing() {
        // RFC 7541 Appendix C.2.1
        let input: &[u8] = &[
            0x40, 0x0a, 0x63, 0x75, 0x73, 0x74, 0x6f, 0x6d, 0x2d, 0x6b, 0x65, 0x79, 0x0d, 0x63, 0x75, 0x73, 0x74, 0x6f, 0x6d, 0x2d, 0x68, 0x65, 0x61, 0x64,
            0x65, 0x72,
        ];
        let mut decoder = Decoder::new(4096, u32::MAX);
        let headers = decoder.decode(input).unwrap();
        assert_eq!(headers[0].0.as_ref(), "custom-key");
        assert_eq!(&headers[0].1[..], b"custom-header");
        assert_eq!(decoder.dynamic_table.len(), 1);
    }

    #[test]
    fn size_update_at_head_of_block_is_accepted() {
        let mut decoder = Decoder::new(4096, u32::MAX);
        // Size update to 0, then the RFC 7541 C.2.1 literal-with-indexing example.
        let input: &[u8] = &[
            0x20, 0x40, 0x0a, 0x63, 0x75, 0x73, 0x74, 0x6f, 0x6d, 0x2d, 0x6b, 0x65, 0x79, 0x0d, 0x63, 0x75, 0x73, 0x74, 0x6f, 0x6d, 0x2d, 0x68, 0x65,
            0x61, 0x64, 0x65, 0x72,
        ];
        let headers = decoder.decode(input).unwrap();
        assert_eq!(headers[0].0.as_ref(), "custom-key");
    }

    #[test]
    fn size_update_after_another_instruction_is_rejected() {
        let mut decoder = Decoder::new(4096, u32::MAX);
        // :method GET (indexed), then a size update — illegal mid-block.
        let input: &[u8] = &[0x82, 0x20];
        assert_eq!(decoder.decode(input), Err(DecompressionError::UnexpectedSizeUpdate));
    }
}
