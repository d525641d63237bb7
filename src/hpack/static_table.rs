// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! RFC 7541 Appendix A: the 61-entry static table, 1-indexed.
//!
//! The teacher's `STATIC_TABLE` in `servente-http2/src/hpack.rs` carries the
//! same 61 (name, value) pairs but addresses them 0-indexed behind an
//! `Illegal` sentinel at slot 0 (a 62-element array). HPACK indices are
//! 1-indexed by the RFC (index 0 is itself a compression error, and dynamic
//! table entries start at `STATIC_LEN + 1`), so this table keeps the
//! teacher's entries but addresses them the RFC's way instead.
//!
//! `find` is consulted on every encoded header, so it's backed by the same
//! `phf` perfect-hash maps the teacher builds its own static lookup tables
//! with (e.g. `servente_http_handling`'s MIME-type table), rather than a
//! linear scan over 61 entries.

use phf::phf_map;

pub const STATIC_TABLE_LEN: usize = 61;

/// Index `i` (1-based) corresponds to `STATIC_TABLE[i - 1]`.
pub const STATIC_TABLE: [(&str, &str); STATIC_TABLE_LEN] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

pub fn lookup(index: usize) -> Option<(&'static str, &'static str)> {
    if index == 0 || index > STATIC_TABLE_LEN {
        return None;
    }
    Some(STATIC_TABLE[index - 1])
}

/// Keyed by `"{name}\0{value}"` — a full (name, value) hit. `phf` needs a
/// single hashable key per entry, and NUL can never occur in a header name
/// or value (RFC 9113 Section 8.2.1 forbids it), so it's a safe separator.
static FULL_MATCH: phf::Map<&'static str, usize> = phf_map! {
    ":authority\0" => 1,
    ":method\0GET" => 2,
    ":method\0POST" => 3,
    ":path\0/" => 4,
    ":path\0/index.html" => 5,
    ":scheme\0http" => 6,
    ":scheme\0https" => 7,
    ":status\0200" => 8,
    ":status\0204" => 9,
    ":status\0206" => 10,
    ":status\0304" => 11,
    ":status\0400" => 12,
    ":status\0404" => 13,
    ":status\0500" => 14,
    "accept-charset\0" => 15,
    "accept-encoding\0gzip, deflate" => 16,
    "accept-language\0" => 17,
    "accept-ranges\0" => 18,
    "accept\0" => 19,
    "access-control-allow-origin\0" => 20,
    "age\0" => 21,
    "allow\0" => 22,
    "authorization\0" => 23,
    "cache-control\0" => 24,
    "content-disposition\0" => 25,
    "content-encoding\0" => 26,
    "content-language\0" => 27,
    "content-length\0" => 28,
    "content-location\0" => 29,
    "content-range\0" => 30,
    "content-type\0" => 31,
    "cookie\0" => 32,
    "date\0" => 33,
    "etag\0" => 34,
    "expect\0" => 35,
    "expires\0" => 36,
    "from\0" => 37,
    "host\0" => 38,
    "if-match\0" => 39,
    "if-modified-since\0" => 40,
    "if-none-match\0" => 41,
    "if-range\0" => 42,
    "if-unmodified-since\0" => 43,
    "last-modified\0" => 44,
    "link\0" => 45,
    "location\0" => 46,
    "max-forwards\0" => 47,
    "proxy-authenticate\0" => 48,
    "proxy-authorization\0" => 49,
    "range\0" => 50,
    "referer\0" => 51,
    "refresh\0" => 52,
    "retry-after\0" => 53,
    "server\0" => 54,
    "set-cookie\0" => 55,
    "strict-transport-security\0" => 56,
    "transfer-encoding\0" => 57,
    "user-agent\0" => 58,
    "vary\0" => 59,
    "via\0" => 60,
    "www-authenticate\0" => 61,
};

/// Name-only lookup, keyed to the lowest index carrying that name (RFC 7541
/// Appendix A lists `:method`/`:path`/`:status`/`:scheme` twice each; the
/// lowest index is the encoder's canonical choice for a name-only hit).
static NAME_ONLY: phf::Map<&'static str, usize> = phf_map! {
    ":authority" => 1,
    ":method" => 2,
    ":path" => 4,
    ":scheme" => 6,
    ":status" => 8,
    "accept-charset" => 15,
    "accept-encoding" => 16,
    "accept-language" => 17,
    "accept-ranges" => 18,
    "accept" => 19,
    "access-control-allow-origin" => 20,
    "age" => 21,
    "allow" => 22,
    "authorization" => 23,
    "cache-control" => 24,
    "content-disposition" => 25,
    "content-encoding" => 26,
    "content-language" => 27,
    "content-length" => 28,
    "content-location" => 29,
    "content-range" => 30,
    "content-type" => 31,
    "cookie" => 32,
    "date" => 33,
    "etag" => 34,
    "expect" => 35,
    "expires" => 36,
    "from" => 37,
    "host" => 38,
    "if-match" => 39,
    "if-modified-since" => 40,
    "if-none-match" => 41,
    "if-range" => 42,
    "if-unmodified-since" => 43,
    "last-modified" => 44,
    "link" => 45,
    "location" => 46,
    "max-forwards" => 47,
    "proxy-authenticate" => 48,
    "proxy-authorization" => 49,
    "range" => 50,
    "referer" => 51,
    "refresh" => 52,
    "retry-after" => 53,
    "server" => 54,
    "set-cookie" => 55,
    "strict-transport-security" => 56,
    "transfer-encoding" => 57,
    "user-agent" => 58,
    "vary" => 59,
    "via" => 60,
    "www-authenticate" => 61,
};

/// Finds an entry by name (and, if present, value) for the encoder's
/// indexing decision: a full (name, value) hit wins over a name-only hit.
pub fn find(name: &str, value: Option<&str>) -> Option<(usize, bool)> {
    if let Some(value) = value {
        let key = format!("{name}\0{value}");
        if let Some(&index) = FULL_MATCH.get(key.as_str()) {
            return Some((index, true));
        }
    }
    NAME_ONLY.get(name).map(|&index| (index, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_one_is_authority() {
        assert_eq!(lookup(1), Some((":authority", "")));
    }

    #[test]
    fn index_zero_is_none() {
        assert_eq!(lookup(0), None);
    }

    #[test]
    fn finds_full_match_for_method_get() {
        assert_eq!(find(":method", Some("GET")), Some((2, true)));
    }

    #[test]
    fn finds_name_only_match_for_unlisted_value() {
        assert_eq!(find(":method", Some("PATCH")), Some((2, false)));
    }
}
