//! Canonical CBOR encoding of the signed part of a document.
//!
//! This follows RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//!
//! The signed message is `SIGN_DOMAIN || canonical_signing_bytes(doc)`.
//! `signature` and `_localIndex` are not part of it, and neither is raw
//! `content`: the signature covers `contentHash`.

use crate::document::Document;

/// Domain separator prepended to every signed message.
pub const SIGN_DOMAIN: &[u8] = b"tessera-doc-v1:";

/// Field keys (integer keys for compact encoding, all below 24).
mod keys {
    pub const FORMAT: u64 = 0;
    pub const WORKSPACE: u64 = 1;
    pub const PATH: u64 = 2;
    pub const AUTHOR: u64 = 3;
    pub const CONTENT_HASH: u64 = 4;
    pub const TIMESTAMP: u64 = 5;
    pub const DELETE_AFTER: u64 = 6;
}

enum Field<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
    Int(i64),
    Null,
}

/// Encode the signed fields of a document to canonical CBOR bytes.
pub fn canonical_signing_bytes(doc: &Document) -> Vec<u8> {
    let delete_after = match doc.delete_after {
        Some(t) => Field::Int(t),
        None => Field::Null,
    };
    let entries = [
        (keys::FORMAT, Field::Text(&doc.format)),
        (keys::WORKSPACE, Field::Text(doc.workspace.as_str())),
        (keys::PATH, Field::Text(&doc.path)),
        (keys::AUTHOR, Field::Bytes(doc.author.as_bytes())),
        (keys::CONTENT_HASH, Field::Bytes(doc.content_hash.as_bytes())),
        (keys::TIMESTAMP, Field::Int(doc.timestamp)),
        (keys::DELETE_AFTER, delete_after),
    ];

    let mut buf = Vec::with_capacity(128 + doc.path.len());
    encode_map_canonical(&mut buf, &entries);
    buf
}

/// The exact bytes an author signs.
pub fn signed_message(doc: &Document) -> Vec<u8> {
    let mut buf = SIGN_DOMAIN.to_vec();
    buf.extend_from_slice(&canonical_signing_bytes(doc));
    buf
}

fn encode_field(buf: &mut Vec<u8>, field: &Field<'_>) {
    match field {
        Field::Text(s) => encode_text(buf, s),
        Field::Bytes(b) => encode_bytes(buf, b),
        Field::Int(n) => encode_integer(buf, *n),
        Field::Null => buf.push(0xf6),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode a map with unsigned integer keys, sorted by encoded key bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(u64, Field<'_>)]) {
    let mut pairs: Vec<(Vec<u8>, &Field<'_>)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_uint(&mut key_buf, 0, *k);
            (key_buf, v)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_field(buf, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::types::WorkspaceId;
    use ciborium::value::Value;

    fn sample(delete_after: Option<i64>) -> Document {
        Document::unsigned(
            "tes.1",
            WorkspaceId::parse("+club.abc").unwrap(),
            Keypair::from_seed(&[0x42; 32]).public_key(),
            "/a/b.txt",
            "hello",
            1_736_870_400_000_000,
            delete_after,
        )
    }

    #[test]
    fn test_signing_bytes_deterministic() {
        let doc = sample(None);
        assert_eq!(canonical_signing_bytes(&doc), canonical_signing_bytes(&doc));
    }

    #[test]
    fn test_signing_bytes_ignore_unsigned_fields() {
        let doc = sample(None);
        let mut other = doc.clone();
        other.local_index = Some(99);
        other.signature = Keypair::generate().sign(b"x");
        other
            .extra
            .insert("_note".into(), serde_json::json!("local only"));
        assert_eq!(canonical_signing_bytes(&doc), canonical_signing_bytes(&other));
    }

    #[test]
    fn test_signing_bytes_cover_delete_after() {
        assert_ne!(
            canonical_signing_bytes(&sample(None)),
            canonical_signing_bytes(&sample(Some(1_736_870_500_000_000)))
        );
    }

    #[test]
    fn test_signing_bytes_are_valid_cbor() {
        let bytes = canonical_signing_bytes(&sample(Some(1_736_870_500_000_000)));
        let value: Value = ciborium::from_reader(&bytes[..]).unwrap();
        let Value::Map(entries) = value else {
            panic!("expected a map");
        };
        assert_eq!(entries.len(), 7);
        assert_eq!(entries[2].1, Value::Text("/a/b.txt".into()));
        assert_eq!(
            entries[5].1,
            Value::Integer(1_736_870_400_000_000i64.into())
        );
    }

    #[test]
    fn test_integer_encoding() {
        let mut buf = Vec::new();
        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 65535);
        assert_eq!(buf, vec![0x19, 0xff, 0xff]);

        buf.clear();
        encode_integer(&mut buf, -1);
        assert_eq!(buf, vec![0x20]);
    }

    #[test]
    fn test_signed_message_has_domain() {
        let msg = signed_message(&sample(None));
        assert!(msg.starts_with(SIGN_DOMAIN));
    }
}
