//! The QPACK static table (RFC 9204 Appendix A): 99 canonical (name,
//! value) pairs, 0-indexed exactly as the wire "Index" field on a `T=1`
//! (static) reference names them. This is a distinct numbering from the
//! dynamic table's 1-based absolute ids; do not shift the two to match.
//!
//! Entries are precomputed once at process start, along with the hashes
//! needed for name and name/value lookups.

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::hash::hash_nameval;

/// One static-table entry: a name, a value, and its 1-based index.
#[derive(Debug, Clone, Copy)]
pub struct StaticEntry {
    pub name: &'static [u8],
    pub value: &'static [u8],
    pub name_hash: u32,
    pub nameval_hash: u32,
    pub id: u32,
}

pub const STATIC_TABLE_SIZE: usize = 99;

/// (name, value) pairs exactly as they appear in RFC 9204 Appendix A,
/// in order, 0-indexed.
static STATIC_TABLE_RAW: [(&str, &str); STATIC_TABLE_SIZE] = [
    (":authority", ""),
    (":path", "/"),
    ("age", "0"),
    ("content-disposition", ""),
    ("content-length", "0"),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("referer", ""),
    ("set-cookie", ""),
    (":method", "CONNECT"),
    (":method", "DELETE"),
    (":method", "GET"),
    (":method", "HEAD"),
    (":method", "OPTIONS"),
    (":method", "POST"),
    (":method", "PUT"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "103"),
    (":status", "200"),
    (":status", "304"),
    (":status", "404"),
    (":status", "503"),
    ("accept", "*/*"),
    ("accept", "application/dns-message"),
    ("accept-encoding", "gzip, deflate, br"),
    ("accept-ranges", "bytes"),
    ("access-control-allow-headers", "cache-control"),
    ("access-control-allow-headers", "content-type"),
    ("access-control-allow-origin", "*"),
    ("cache-control", "max-age=0"),
    ("cache-control", "max-age=2592000"),
    ("cache-control", "max-age=604800"),
    ("cache-control", "no-cache"),
    ("cache-control", "no-store"),
    ("cache-control", "public, max-age=31536000"),
    ("content-encoding", "br"),
    ("content-encoding", "gzip"),
    ("content-type", "application/dns-message"),
    ("content-type", "application/javascript"),
    ("content-type", "application/json"),
    ("content-type", "application/x-www-form-urlencoded"),
    ("content-type", "image/gif"),
    ("content-type", "image/jpeg"),
    ("content-type", "image/png"),
    ("content-type", "text/css"),
    ("content-type", "text/html; charset=utf-8"),
    ("content-type", "text/plain"),
    ("content-type", "text/plain;charset=utf-8"),
    ("range", "bytes=0-"),
    ("strict-transport-security", "max-age=31536000"),
    ("strict-transport-security", "max-age=31536000; includesubdomains"),
    ("strict-transport-security", "max-age=31536000; includesubdomains; preload"),
    ("vary", "accept-encoding"),
    ("vary", "origin"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "1; mode=block"),
    (":status", "100"),
    (":status", "204"),
    (":status", "206"),
    (":status", "302"),
    (":status", "400"),
    (":status", "403"),
    (":status", "421"),
    (":status", "425"),
    (":status", "500"),
    ("accept-language", ""),
    ("access-control-allow-credentials", "FALSE"),
    ("access-control-allow-credentials", "TRUE"),
    ("access-control-allow-headers", "*"),
    ("access-control-allow-methods", "get"),
    ("access-control-allow-methods", "get, post, options"),
    ("access-control-allow-methods", "options"),
    ("access-control-expose-headers", "content-length"),
    ("access-control-request-headers", "content-type"),
    ("access-control-request-method", "get"),
    ("access-control-request-method", "post"),
    ("alt-svc", "clear"),
    ("authorization", ""),
    ("content-security-policy", "script-src 'none'; object-src 'none'; base-uri 'none'"),
    ("early-data", "1"),
    ("expect-ct", ""),
    ("forwarded", ""),
    ("if-range", ""),
    ("origin", ""),
    ("purpose", "prefetch"),
    ("server", ""),
    ("timing-allow-origin", "*"),
    ("upgrade-insecure-requests", "1"),
    ("user-agent", ""),
    ("x-forwarded-for", ""),
    ("x-frame-options", "deny"),
    ("x-frame-options", "sameorigin"),
];

lazy_static! {
    pub static ref STATIC_TABLE: Vec<StaticEntry> = {
        STATIC_TABLE_RAW
            .iter()
            .enumerate()
            .map(|(i, &(name, value))| {
                let name = name.as_bytes();
                let value = value.as_bytes();
                StaticEntry {
                    name,
                    value,
                    name_hash: crate::hash::hash_bytes(name),
                    nameval_hash: hash_nameval(name, value),
                    id: i as u32,
                }
            })
            .collect()
    };

    /// name_hash -> ids, lowest id first, used by `find_name`.
    static ref NAME_INDEX: HashMap<u32, Vec<u32>> = {
        let mut m: HashMap<u32, Vec<u32>> = HashMap::new();
        for entry in STATIC_TABLE.iter() {
            m.entry(entry.name_hash).or_default().push(entry.id);
        }
        m
    };

    /// nameval_hash -> id, used by `find_nameval`.
    static ref NAMEVAL_INDEX: HashMap<u32, u32> = {
        let mut m = HashMap::new();
        for entry in STATIC_TABLE.iter() {
            m.entry(entry.nameval_hash).or_insert(entry.id);
        }
        m
    };
}

/// Returns the entry at static id `id` (the RFC 9204 Appendix A row
/// number), or `None` if out of range.
pub fn get(id: u32) -> Option<&'static StaticEntry> {
    STATIC_TABLE.get(id as usize)
}

/// Finds a static entry whose name and value both match. Ties never
/// happen in the static table (no two entries share name+value), but
/// `NAMEVAL_INDEX` is keyed only by hash, so the caller-visible contract
/// still re-checks name/value equality to guard against hash collisions.
pub fn find_nameval(hash: u32, name: &[u8], value: &[u8]) -> Option<u32> {
    let id = *NAMEVAL_INDEX.get(&hash)?;
    let entry = get(id)?;
    if entry.name == name && entry.value == value {
        Some(id)
    } else {
        None
    }
}

/// Finds the lowest static id whose name matches. Ties resolve to the
/// lowest static id, per the lookup contract.
pub fn find_name(hash: u32, name: &[u8]) -> Option<u32> {
    let ids = NAME_INDEX.get(&hash)?;
    ids.iter()
        .filter(|&&id| get(id).map(|e| e.name == name).unwrap_or(false))
        .min()
        .copied()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hash::{hash_bytes, hash_nameval as hnv};

    #[test]
    fn table_has_99_entries() {
        assert_eq!(STATIC_TABLE.len(), STATIC_TABLE_SIZE);
    }

    #[test]
    fn method_get_is_id_17() {
        let id = find_nameval(hnv(b":method", b"GET"), b":method", b"GET").unwrap();
        assert_eq!(id, 17);
    }

    #[test]
    fn method_name_only_ties_to_lowest_id() {
        // `:method` appears at several ids (15, 16, 17...); a name-only
        // lookup must resolve to the lowest one, 15.
        let id = find_name(hash_bytes(b":method"), b":method").unwrap();
        assert_eq!(id, 15);
    }

    #[test]
    fn out_of_range_id_is_none() {
        assert!(get(99).is_none());
        assert!(get(1000).is_none());
    }

    #[test]
    fn id_zero_is_authority() {
        let e = get(0).unwrap();
        assert_eq!(e.name, b":authority");
    }
}
