// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! RFC 7541 Appendix B: the static Huffman code used for header string
//! literals. The (code, bit-length) table below is the canonical HPACK
//! Huffman code, same values as the teacher's `HUFFMAN_CODE` table in
//! `servente-http2/src/hpack.rs`; the decode side here builds a
//! bit-length-keyed lookup table once (`OnceLock`) the same way the teacher
//! backs its own Huffman decode table with
//! `hashbrown::HashMap<u8, hashbrown::HashMap<u32, HuffmanValue>>`, instead
//! of a linear scan per symbol.

use std::sync::OnceLock;

use bytes::{BufMut, Bytes, BytesMut};
use hashbrown::HashMap;

use super::DecompressionError;

/// EOS is symbol 256; it is never emitted, only used to pad the last byte.
const EOS: usize = 256;

/// (code, bit_length) pairs for symbols 0..=255, plus EOS (256).
pub(crate) const HUFFMAN_CODES: [(u32, u8); 257] = [
    (0x1ff8, 13),
    (0x7fffd8, 23),
    (0xfffffe2, 28),
    (0xfffffe3, 28),
    (0xfffffe4, 28),
    (0xfffffe5, 28),
    (0xfffffe6, 28),
    (0xfffffe7, 28),
    (0xfffffe8, 28),
    (0xffffea, 24),
    (0x3ffffffc, 30),
    (0xfffffe9, 28),
    (0xfffffea, 28),
    (0x3ffffffd, 30),
    (0xfffffeb, 28),
    (0xfffffec, 28),
    (0xfffffed, 28),
    (0xfffffee, 28),
    (0xfffffef, 28),
    (0xffffff0, 28),
    (0xffffff1, 28),
    (0xffffff2, 28),
    (0x3ffffffe, 30),
    (0xffffff3, 28),
    (0xffffff4, 28),
    (0xffffff5, 28),
    (0xffffff6, 28),
    (0xffffff7, 28),
    (0xffffff8, 28),
    (0xffffff9, 28),
    (0xffffffa, 28),
    (0xffffffb, 28),
    (0x14, 6),
    (0x3f8, 10),
    (0x3f9, 10),
    (0xffa, 12),
    (0x1ff9, 13),
    (0x15, 6),
    (0xf8, 8),
    (0x7fa, 11),
    (0x3fa, 10),
    (0x3fb, 10),
    (0xf9, 8),
    (0x7fb, 11),
    (0xfa, 8),
    (0x16, 6),
    (0x17, 6),
    (0x18, 6),
    (0x0, 5),
    (0x1, 5),
    (0x2, 5),
    (0x19, 6),
    (0x1a, 6),
    (0x1b, 6),
    (0x1c, 6),
    (0x1d, 6),
    (0x1e, 6),
    (0x1f, 6),
    (0x5c, 7),
    (0xfb, 8),
    (0x7ffc, 15),
    (0x20, 6),
    (0xffb, 12),
    (0x3fc, 10),
    (0x1ffa, 13),
    (0x21, 6),
    (0x5d, 7),
    (0x5e, 7),
    (0x5f, 7),
    (0x60, 7),
    (0x61, 7),
    (0x62, 7),
    (0x63, 7),
    (0x64, 7),
    (0x65, 7),
    (0x66, 7),
    (0x67, 7),
    (0x68, 7),
    (0x69, 7),
    (0x6a, 7),
    (0x6b, 7),
    (0x6c, 7),
    (0x6d, 7),
    (0x6e, 7),
    (0x6f, 7),
    (0x70, 7),
    (0x71, 7),
    (0x72, 7),
    (0xfc, 8),
    (0x73, 7),
    (0xfd, 8),
    (0x1ffb, 13),
    (0x7fff0, 19),
    (0x1ffc, 13),
    (0x3ffc, 14),
    (0x22, 6),
    (0x7ffd, 15),
    (0x3, 5),
    (0x23, 6),
    (0x4, 5),
    (0x24, 6),
    (0x5, 5),
    (0x25, 6),
    (0x26, 6),
    (0x27, 6),
    (0x6, 5),
    (0x74, 7),
    (0x75, 7),
    (0x28, 6),
    (0x29, 6),
    (0x2a, 6),
    (0x7, 5),
    (0x2b, 6),
    (0x76, 7),
    (0x2c, 6),
    (0x8, 5),
    (0x9, 5),
    (0x2d, 6),
    (0x77, 7),
    (0x78, 7),
    (0x79, 7),
    (0x7a, 7),
    (0x7b, 7),
    (0x7ffe, 15),
    (0x7fc, 11),
    (0x3ffd, 14),
    (0x1ffd, 13),
    (0xffffffc, 28),
    (0xfffe6, 20),
    (0x3fffd2, 22),
    (0xfffe7, 20),
    (0xfffe8, 20),
    (0x3fffd3, 22),
    (0x3fffd4, 22),
    (0x3fffd5, 22),
    (0x7fffd9, 23),
    (0x3fffd6, 22),
    (0x7fffda, 23),
    (0x7fffdb, 23),
    (0x7fffdc, 23),
    (0x7fffdd, 23),
    (0x7fffde, 23),
    (0xffffeb, 24),
    (0x7fffdf, 23),
    (0xffffec, 24),
    (0xffffed, 24),
    (0x3fffd7, 22),
    (0x7fffe0, 23),
    (0xffffee, 24),
    (0x7fffe1, 23),
    (0x7fffe2, 23),
    (0x7fffe3, 23),
    (0x7fffe4, 23),
    (0x1fffdc, 21),
    (0x3fffd8, 22),
    (0x7fffe5, 23),
    (0x3fffd9, 22),
    (0x7fffe6, 23),
    (0x7fffe7, 23),
    (0xffffef, 24),
    (0x3fffda, 22),
    (0x1fffdd, 21),
    (0xfffe9, 20),
    (0x3fffdb, 22),
    (0x3fffdc, 22),
    (0x7fffe8, 23),
    (0x7fffe9, 23),
    (0x1fffde, 21),
    (0x7fffea, 23),
    (0x3fffdd, 22),
    (0x3fffde, 22),
    (0xfffff0, 24),
    (0x1fffdf, 21),
    (0x3fffdf, 22),
    (0x7fffeb, 23),
    (0x7fffec, 23),
    (0x1fffe0, 21),
    (0x1fffe1, 21),
    (0x3fffe0, 22),
    (0x1fffe2, 21),
    (0x7fffed, 23),
    (0x3fffe1, 22),
    (0x7fffee, 23),
    (0x7fffef, 23),
    (0xfffea, 20),
    (0x3fffe2, 22),
    (0x3fffe3, 22),
    (0x3fffe4, 22),
    (0x7ffff0, 23),
    (0x3fffe5, 22),
    (0x3fffe6, 22),
    (0x7ffff1, 23),
    (0x3ffffe0, 26),
    (0x3ffffe1, 26),
    (0xfffeb, 20),
    (0x7fff1, 19),
    (0x3fffe7, 22),
    (0x7ffff2, 23),
    (0x3fffe8, 22),
    (0x1ffffec, 25),
    (0x3ffffe2, 26),
    (0x3ffffe3, 26),
    (0x3ffffe4, 26),
    (0x7ffffde, 27),
    (0x7ffffdf, 27),
    (0x3ffffe5, 26),
    (0xfffff1, 24),
    (0x1ffffed, 25),
    (0x7fff2, 19),
    (0x1fffe3, 21),
    (0x3ffffe6, 26),
    (0x7ffffe0, 27),
    (0x7ffffe1, 27),
    (0x3ffffe7, 26),
    (0x7ffffe2, 27),
    (0xfffff2, 24),
    (0x1fffe4, 21),
    (0x1fffe5, 21),
    (0x3ffffe8, 26),
    (0x3ffffe9, 26),
    (0xffffffd, 28),
    (0x7ffffe3, 27),
    (0x7ffffe4, 27),
    (0x7ffffe5, 27),
    (0xfffec, 20),
    (0xfffff3, 24),
    (0xfffed, 20),
    (0x1fffe6, 21),
    (0x3fffe9, 22),
    (0x1fffe7, 21),
    (0x1fffe8, 21),
    (0x7ffff3, 23),
    (0x3fffea, 22),
    (0x3fffeb, 22),
    (0x1ffffee, 25),
    (0x1ffffef, 25),
    (0xfffff4, 24),
    (0xfffff5, 24),
    (0x3ffffea, 26),
    (0x7ffff4, 23),
    (0x3ffffeb, 26),
    (0x7ffffe6, 27),
    (0x3ffffec, 26),
    (0x3ffffed, 26),
    (0x7ffffe7, 27),
    (0x7ffffe8, 27),
    (0x7ffffe9, 27),
    (0x7ffffea, 27),
    (0x7ffffeb, 27),
    (0xffffffe, 28),
    (0x7ffffec, 27),
    (0x7ffffed, 27),
    (0x7ffffee, 27),
    (0x7ffffef, 27),
    (0x7fffff0, 27),
    (0x3ffffee, 26),
    (0x3fffffff, 30),
];

/// Encodes `input` octet-for-octet using the canonical HPACK Huffman code,
/// padding the final byte with the high bits of the EOS code (all 1s) per
/// RFC 7541 Section 5.2.
pub fn encode(input: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(input.len());
    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;

    for &byte in input {
        let (code, len) = HUFFMAN_CODES[byte as usize];
        acc = (acc << len) | code as u64;
        acc_bits += len as u32;
        while acc_bits >= 8 {
            acc_bits -= 8;
            out.put_u8((acc >> acc_bits) as u8);
        }
    }

    if acc_bits > 0 {
        // EOS (0x3fffffff) is 30 one-bits, so any run of 1-bits is a valid
        // prefix of it; pad the remaining low bits of the final byte with 1s.
        let pending = acc & ((1u64 << acc_bits) - 1);
        let pad_bits = 8 - acc_bits;
        let padding = (1u64 << pad_bits) - 1;
        out.put_u8((((pending << pad_bits) | padding) & 0xff) as u8);
    }

    out.freeze()
}

/// Returns an upper bound on the encoded length, used to decide whether
/// Huffman-coding a literal is worthwhile (RFC 7541 never requires it).
pub fn encoded_len(input: &[u8]) -> usize {
    let bits: u32 = input.iter().map(|&b| HUFFMAN_CODES[b as usize].1 as u32).sum();
    ((bits + 7) / 8) as usize
}

/// Bit-length -> accumulated code value -> symbol, the same shape the
/// teacher builds its decode table with. Looking up by `(acc_bits, acc)`
/// after each bit is sound because the Huffman code is prefix-free: no
/// codeword is ever a prefix of another, so the first `(length, value)`
/// pair that matches a table entry is the unique valid decode, with no
/// need to walk a tree to confirm it.
fn table() -> &'static HashMap<u8, HashMap<u32, u16>> {
    static TABLE: OnceLock<HashMap<u8, HashMap<u32, u16>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: HashMap<u8, HashMap<u32, u16>> = HashMap::new();
        for (symbol, &(code, len)) in HUFFMAN_CODES.iter().enumerate() {
            table.entry(len).or_default().insert(code, symbol as u16);
        }
        table
    })
}

/// Decodes a Huffman-coded string. Trailing bits that don't complete a
/// symbol must be a prefix of the EOS code (all 1s); anything else is a
/// decoding error (RFC 7541 Section 5.2).
pub fn decode(input: &[u8]) -> Result<Bytes, DecompressionError> {
    let table = table();
    let mut out = BytesMut::with_capacity(input.len() * 2);
    let mut acc: u32 = 0;
    let mut acc_bits: u8 = 0;

    for &byte in input {
        for bit_index in (0..8).rev() {
            let bit = ((byte >> bit_index) & 1) as u32;
            acc = (acc << 1) | bit;
            acc_bits += 1;
            // The longest HPACK Huffman code is 30 bits; a run past that
            // with no match can never resolve to a symbol.
            if acc_bits > 30 {
                return Err(DecompressionError::HuffmanError);
            }

            if let Some(&symbol) = table.get(&acc_bits).and_then(|by_value| by_value.get(&acc)) {
                if symbol as usize == EOS {
                    return Err(DecompressionError::HuffmanError);
                }
                out.put_u8(symbol as u8);
                acc = 0;
                acc_bits = 0;
            }
        }
    }

    if acc_bits > 0 {
        // Leftover bits must all be 1 (a prefix of the EOS code, which is
        // 30 one-bits) and must not exceed 7 bits, or the sender padded
        // wrong.
        if acc_bits > 7 {
            return Err(DecompressionError::HuffmanError);
        }
        let all_ones = (1u32 << acc_bits) - 1;
        if acc != all_ones {
            return Err(DecompressionError::HuffmanError);
        }
    }

    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ascii_string() {
        let input = b"www.example.com";
        let encoded = encode(input);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(&decoded[..], input);
    }

    #[test]
    fn matches_rfc7541_appendix_c_example() {
        // RFC 7541 Appendix C.4.1
        let input = b"www.example.com";
        let encoded = encode(input);
        assert_eq!(&encoded[..], &[0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff]);
    }

    #[test]
    fn round_trips_empty_string() {
        let encoded = encode(b"");
        assert!(encoded.is_empty());
        assert_eq!(&decode(&encoded).unwrap()[..], b"");
    }

    #[test]
    fn rejects_corrupted_padding() {
        // Last byte replaced with all zero bits: not a valid EOS prefix.
        let mut encoded = encode(b"a").to_vec();
        *encoded.last_mut().unwrap() = 0x00;
        assert!(decode(&encoded).is_err());
    }
}
