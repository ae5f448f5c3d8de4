//! Connection key codec.
//!
//! Layout of an encoded key:
//!
//! ```text
//! [ pid:32 | sport:16 | dport:16 ] u64 LE   (8 bytes)
//! [ netns ]                        u32 LE   (4 bytes)
//! [ source address ]                        (4 or 16 bytes)
//! '|'
//! [ family:4 | type:4 ]                     (1 byte)
//! '|'
//! [ dest address ]                          (4 or 16 bytes)
//! ```
//!
//! The key is a transient in-memory lookup handle. It is not persisted and
//! carries no version. [`beautify_key`] renders it for diagnostics only.

use crate::address::Address;
use crate::connection::ConnectionKey;
use std::fmt;

pub const KEY_DELIMITER: u8 = b'|';

/// pid/ports block plus namespace
pub const KEY_PREFIX_LEN: usize = 12;

/// Encodes `key` into `buf`, clearing it first, and returns the encoded bytes.
///
/// The buffer is reused across calls to avoid an allocation per connection;
/// it must not be shared between concurrent encoders.
pub fn encode_key<'a>(key: &ConnectionKey, buf: &'a mut Vec<u8>) -> &'a [u8] {
    buf.clear();

    let p0 = (key.pid as u64) << 32 | (key.sport as u64) << 16 | key.dport as u64;
    buf.extend_from_slice(&p0.to_le_bytes());
    buf.extend_from_slice(&key.netns.to_le_bytes());

    key.source.write_bytes(buf);
    buf.push(KEY_DELIMITER);
    buf.push(key.family.as_u8() << 4 | key.conn_type.as_u8());
    buf.push(KEY_DELIMITER);
    key.dest.write_bytes(buf);

    &buf[..]
}

/// Best-effort decoded view of an encoded key.
///
/// Family and type stay at zero when the trailing segment cannot be split
/// into exactly three parts; addresses are `None` when their bytes have an
/// unusable length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodedKey {
    pub pid: u32,
    pub netns: u32,
    pub sport: u16,
    pub dport: u16,
    pub source: Option<Address>,
    pub dest: Option<Address>,
    pub family: u8,
    pub conn_type: u8,
}

impl fmt::Display for DecodedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p:{}|src:{}:{}|dst:{}:{}|f:{}|t:{}",
            self.pid,
            display_addr(&self.source),
            self.sport,
            display_addr(&self.dest),
            self.dport,
            self.family,
            self.conn_type
        )
    }
}

fn display_addr(addr: &Option<Address>) -> String {
    match addr {
        Some(a) => a.to_string(),
        None => "?".to_string(),
    }
}

/// Decodes an encoded key. Never panics; malformed input yields partial output.
pub fn decode_key(raw: &[u8]) -> DecodedKey {
    let mut decoded = DecodedKey::default();

    if let Some(head) = raw.get(..8) {
        let mut block = [0u8; 8];
        block.copy_from_slice(head);
        let h = u64::from_le_bytes(block);
        decoded.pid = (h >> 32) as u32;
        decoded.sport = ((h >> 16) & 0xffff) as u16;
        decoded.dport = (h & 0xffff) as u16;
    }

    if let Some(ns) = raw.get(8..KEY_PREFIX_LEN) {
        let mut block = [0u8; 4];
        block.copy_from_slice(ns);
        decoded.netns = u32::from_le_bytes(block);
    }

    let rest = raw.get(KEY_PREFIX_LEN..).unwrap_or(&[]);
    if let Some((source, tag, dest)) = split_segments(rest) {
        decoded.source = Address::from_bytes(source);
        decoded.dest = Address::from_bytes(dest);
        if let &[packed] = tag {
            decoded.family = (packed >> 4) & 0xf;
            decoded.conn_type = packed & 0xf;
        }
    }

    decoded
}

/// Renders an encoded key as `p:<pid>|src:<addr>:<port>|dst:<addr>:<port>|f:<family>|t:<type>`.
pub fn beautify_key(raw: &[u8]) -> String {
    decode_key(raw).to_string()
}

/// Splits the trailing segment into (source, family/type, dest).
///
/// Address bytes may themselves equal the delimiter (e.g. 124.0.0.1), so a
/// segment whose length matches the v4 or v6 layout with delimiters in place
/// is split by position. Anything else must split into exactly three parts.
fn split_segments(rest: &[u8]) -> Option<(&[u8], &[u8], &[u8])> {
    for addr_len in [4usize, 16] {
        if rest.len() == 2 * addr_len + 3
            && rest[addr_len] == KEY_DELIMITER
            && rest[addr_len + 2] == KEY_DELIMITER
        {
            return Some((
                &rest[..addr_len],
                &rest[addr_len + 1..addr_len + 2],
                &rest[addr_len + 3..],
            ));
        }
    }

    let parts: Vec<&[u8]> = rest.split(|b| *b == KEY_DELIMITER).collect();
    match parts.as_slice() {
        [source, tag, dest] => Some((*source, *tag, *dest)),
        _ => None,
    }
}
