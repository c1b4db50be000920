//! Byte-layout codec for the `data` and `index` keyspaces.
//!
//! `keyspace` is the partition's storage prefix — the lowercase hex id
//! produced by `corelib::partitioner::LogicalPartition::keyspace()` — not
//! to be confused with the `data`/`index`/`meta` namespace names; those
//! are kept as separate physical redb tables rather than a literal byte
//! prefix, since a per-table split lets each namespace be scanned on its
//! own without a leading discriminator byte.

use crate::error::{Error, Result};

/// `data_key = keyspace || u16 user_len || user_key || u16 hlc_len || hlc_bytes`.
pub fn data_key(keyspace: &[u8], user_key: &[u8], hlc_bytes: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(keyspace.len() + 4 + user_key.len() + hlc_bytes.len());
    buf.extend_from_slice(keyspace);
    buf.extend_from_slice(&(user_key.len() as u16).to_be_bytes());
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&(hlc_bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(hlc_bytes);
    buf
}

/// `data_prefix(keyspace, key)`: everything up to (not including) the hlc
/// length field, used to scan all versions of one user key.
pub fn data_prefix(keyspace: &[u8], user_key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(keyspace.len() + 2 + user_key.len());
    buf.extend_from_slice(keyspace);
    buf.extend_from_slice(&(user_key.len() as u16).to_be_bytes());
    buf.extend_from_slice(user_key);
    buf
}

/// `(hlc_bytes, user_key)` parsed out of a `data_key`.
pub fn parse_data_key(keyspace: &[u8], key: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut cursor = keyspace.len();
    if key.len() < cursor + 2 {
        return Err(Error::InvalidKey("data key too short".into()));
    }
    if &key[..cursor] != keyspace {
        return Err(Error::InvalidKey("keyspace mismatch".into()));
    }
    let user_len = u16::from_be_bytes(key[cursor..cursor + 2].try_into().unwrap()) as usize;
    cursor += 2;
    if key.len() < cursor + user_len + 2 {
        return Err(Error::InvalidKey("data key truncated (user_key)".into()));
    }
    let user_key = key[cursor..cursor + user_len].to_vec();
    cursor += user_len;
    let hlc_len = u16::from_be_bytes(key[cursor..cursor + 2].try_into().unwrap()) as usize;
    cursor += 2;
    if key.len() != cursor + hlc_len {
        return Err(Error::InvalidKey("data key truncated (hlc)".into()));
    }
    let hlc_bytes = key[cursor..cursor + hlc_len].to_vec();
    Ok((hlc_bytes, user_key))
}

/// `index_key = keyspace || u16 hlc_len || hlc_bytes || u16 user_len || user_key`.
pub fn index_key(keyspace: &[u8], hlc_bytes: &[u8], user_key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(keyspace.len() + 4 + hlc_bytes.len() + user_key.len());
    buf.extend_from_slice(keyspace);
    buf.extend_from_slice(&(hlc_bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(hlc_bytes);
    buf.extend_from_slice(&(user_key.len() as u16).to_be_bytes());
    buf.extend_from_slice(user_key);
    buf
}

/// `index_prefix(keyspace, hlc_bytes)`: scan start for streaming changes
/// from a given point in HLC order. When `hlc_bytes` is empty, this is
/// simply the keyspace prefix (scan from the very beginning).
pub fn index_prefix(keyspace: &[u8], hlc_bytes: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(keyspace.len() + 2 + hlc_bytes.len());
    buf.extend_from_slice(keyspace);
    if !hlc_bytes.is_empty() {
        buf.extend_from_slice(&(hlc_bytes.len() as u16).to_be_bytes());
        buf.extend_from_slice(hlc_bytes);
    }
    buf
}

/// `(hlc_bytes, user_key)` parsed out of an `index_key`.
pub fn parse_index_key(keyspace: &[u8], key: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut cursor = keyspace.len();
    if key.len() < cursor + 2 || &key[..cursor] != keyspace {
        return Err(Error::InvalidKey("index key malformed".into()));
    }
    let hlc_len = u16::from_be_bytes(key[cursor..cursor + 2].try_into().unwrap()) as usize;
    cursor += 2;
    if key.len() < cursor + hlc_len + 2 {
        return Err(Error::InvalidKey("index key truncated (hlc)".into()));
    }
    let hlc_bytes = key[cursor..cursor + hlc_len].to_vec();
    cursor += hlc_len;
    let user_len = u16::from_be_bytes(key[cursor..cursor + 2].try_into().unwrap()) as usize;
    cursor += 2;
    if key.len() != cursor + user_len {
        return Err(Error::InvalidKey("index key truncated (user_key)".into()));
    }
    let user_key = key[cursor..cursor + user_len].to_vec();
    Ok((hlc_bytes, user_key))
}

/// Empty value marking a deleted version; present in `data` so reverse
/// iteration still finds the tombstone, but `get` treats it as absent.
pub const TOMBSTONE: &[u8] = &[];

/// Marker value for `index` entries; the entry's existence is the
/// signal, not its content.
pub const SENTINEL: &[u8] = &[];

/// Smallest byte string strictly greater than every string with `prefix`
/// as a prefix, used as the exclusive upper bound of a prefix range scan.
/// Returns `None` if `prefix` is all `0xff` bytes (no successor exists;
/// the caller should treat the scan as unbounded above).
pub fn successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    for i in (0..out.len()).rev() {
        if out[i] != 0xff {
            out[i] += 1;
            out.truncate(i + 1);
            return Some(out);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_key_round_trips() {
        let ks = b"2a";
        let key = b"user-key";
        let hlc = b"some-hlc-bytes";
        let encoded = data_key(ks, key, hlc);
        let (parsed_hlc, parsed_key) = parse_data_key(ks, &encoded).unwrap();
        assert_eq!(parsed_hlc, hlc);
        assert_eq!(parsed_key, key);
    }

    #[test]
    fn index_key_round_trips() {
        let ks = b"2a";
        let key = b"user-key";
        let hlc = b"some-hlc-bytes";
        let encoded = index_key(ks, hlc, key);
        let (parsed_hlc, parsed_key) = parse_index_key(ks, &encoded).unwrap();
        assert_eq!(parsed_hlc, hlc);
        assert_eq!(parsed_key, key);
    }

    #[test]
    fn data_prefix_is_a_prefix_of_data_key() {
        let ks = b"01";
        let key = b"k";
        let prefix = data_prefix(ks, key);
        let full = data_key(ks, key, b"hlc");
        assert!(full.starts_with(&prefix));
    }

    #[test]
    fn successor_increments_last_non_0xff_byte() {
        assert_eq!(successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(successor(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(successor(&[0xff, 0xff]), None);
    }

    #[test]
    fn parsing_rejects_keys_from_a_different_keyspace() {
        let encoded = data_key(b"2a", b"k", b"h");
        assert!(parse_data_key(b"2b", &encoded).is_err());
    }
}
