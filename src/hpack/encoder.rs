// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The encode side of HPACK: turns a header list into a header block.
//!
//! Grounded on the teacher's `Compressor`/`CompressIndexCandidate`/
//! `find_header` in `servente-http2/src/hpack.rs` (the index-candidate
//! search over static-then-dynamic tables, and Huffman-vs-literal length
//! comparison), adapted to the RFC's 1-indexed addressing and to a
//! sensitive-header policy the teacher's server role never had to apply to
//! outbound client headers (RFC 7541 Section 7.1.3).

use bytes::{BufMut, Bytes, BytesMut};

use super::dynamic_table::DynamicTable;
use super::{huffman, integer, static_table};

/// Headers whose values must never be compressed into the dynamic table
/// (RFC 7541 Section 7.1.3): reuse across requests would let an attacker who
/// observes compressed sizes infer byte-exact secret values ("CRIME"-style).
fn is_sensitive(name: &str) -> bool {
    matches!(name, "authorization" | "cookie" | "set-cookie" | "proxy-authorization")
}

pub struct Encoder {
    dynamic_table: DynamicTable,
    pending_size_update: Option<u32>,
}

impl Encoder {
    pub fn new(max_dynamic_table_size: u32) -> Self {
        Self { dynamic_table: DynamicTable::new(max_dynamic_table_size), pending_size_update: None }
    }

    /// Called when the peer's `SETTINGS_HEADER_TABLE_SIZE` changes the
    /// ceiling we're allowed to use for entries we add to our own encoder
    /// table. The next `encode` call emits a Dynamic Table Size Update.
    pub fn set_peer_max_table_size(&mut self, max_size: u32) {
        self.pending_size_update = Some(max_size);
    }

    /// Picks the best indexing candidate: a full match beats a name-only
    /// match beats no match, and the static table wins ties over the
    /// dynamic table. A static name-only hit must not short-circuit before
    /// the dynamic table is checked — many static entries pin a specific
    /// value (`:method`→`GET`, `:path`→`/`, `accept-encoding`→`gzip,
    /// deflate`, ...), so a repeated custom value under one of those names
    /// can only ever become fully indexed via the dynamic table.
    fn find(&self, name: &str, value: &[u8]) -> Option<(usize, bool)> {
        let value_str = std::str::from_utf8(value).ok();
        let static_hit = static_table::find(name, value_str);
        if let Some((_, true)) = static_hit {
            return static_hit;
        }

        let dynamic_hit = self.dynamic_table.find(name, Some(value)).map(|(idx, full)| (static_table::STATIC_TABLE_LEN + idx, full));
        if let Some((_, true)) = dynamic_hit {
            return dynamic_hit;
        }

        static_hit.or(dynamic_hit)
    }

    fn write_string(buf: &mut BytesMut, bytes: &[u8]) {
        let huffman = huffman::encode(bytes);
        if huffman.len() < bytes.len() {
            integer::encode(buf, 7, 0x80, huffman.len() as u64);
            buf.put_slice(&huffman);
        } else {
            integer::encode(buf, 7, 0x00, bytes.len() as u64);
            buf.put_slice(bytes);
        }
    }

    /// Encodes one header block for the given ordered header list. Callers
    /// are responsible for ordering pseudo-headers first and filtering
    /// connection-specific fields before calling this.
    pub fn encode<'a>(&mut self, headers: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Bytes {
        let mut buf = BytesMut::new();

        if let Some(new_size) = self.pending_size_update.take() {
            integer::encode(&mut buf, 5, 0x20, new_size as u64);
            self.dynamic_table.set_max_size(new_size);
        }

        for (name, value) in headers {
            self.encode_one(&mut buf, name, value);
        }

        buf.freeze()
    }

    fn encode_one(&mut self, buf: &mut BytesMut, name: &str, value: &[u8]) {
        if let Some((index, full_match)) = self.find(name, value) {
            if full_match {
                integer::encode(buf, 7, 0x80, index as u64);
                return;
            }
            if is_sensitive(name) {
                integer::encode(buf, 4, 0x10, index as u64);
                Self::write_string(buf, value);
                return;
            }
            integer::encode(buf, 6, 0x40, index as u64);
            Self::write_string(buf, value);
            self.dynamic_table.insert(name, value);
            return;
        }

        if is_sensitive(name) {
            buf.put_u8(0x10);
            Self::write_string(buf, name.as_bytes());
            Self::write_string(buf, value);
            return;
        }

        buf.put_u8(0x40);
        Self::write_string(buf, name.as_bytes());
        Self::write_string(buf, value);
        self.dynamic_table.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::Decoder;

    #[test]
    fn encodes_fully_indexed_static_entry() {
        let mut encoder = Encoder::new(4096);
        let block = encoder.encode([(":method", b"GET".as_slice())]);
        assert_eq!(&block[..], &[0x82]);
    }

    #[test]
    fn repeated_header_becomes_dynamic_indexed() {
        let mut encoder = Encoder::new(4096);
        let mut decoder = Decoder::new(4096, u32::MAX);

        let first = encoder.encode([("x-custom", b"value".as_slice())]);
        let decoded_first = decoder.decode(&first).unwrap();
        assert_eq!(decoded_first[0].0.as_ref(), "x-custom");

        let second = encoder.encode([("x-custom", b"value".as_slice())]);
        assert!(second.len() <= 2);
        let decoded_second = decoder.decode(&second).unwrap();
        assert_eq!(&decoded_second[0].1[..], b"value");
    }

    #[test]
    fn sensitive_header_never_enters_dynamic_table() {
        let mut encoder = Encoder::new(4096);
        encoder.encode([("authorization", b"Bearer secret".as_slice())]);
        assert_eq!(encoder.dynamic_table.len(), 0);
    }
}
