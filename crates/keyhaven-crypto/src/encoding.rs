//! Portable text encoding for shares
//!
//! `khs1.<base64url(body || checksum)>` where `body` is
//!
//! | bytes | field |
//! |---|---|
//! | 1 | format version (1) |
//! | 1 | index |
//! | 1 | threshold |
//! | 1 | total shares |
//! | 8 | created_at_ms, big endian |
//! | 2 | key id length, big endian |
//! | .. | key id, UTF-8 |
//! | 4 | payload length, big endian |
//! | .. | payload |
//!
//! and `checksum` is the first 4 bytes of SHA-256(body). Decoding fails closed: any
//! deviation is [`KeyhavenError::InvalidShareEncoding`], never a truncated share.

use crate::shamir::SecretShare;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use keyhaven_core::{hash, KeyId, KeyhavenError, KeyhavenResult};
use zeroize::Zeroizing;

/// Text prefix of encoded shares
pub const SHARE_PREFIX: &str = "khs1.";

const FORMAT_VERSION: u8 = 1;
const CHECKSUM_LEN: usize = 4;

/// Encode a share as portable text
///
/// Fails with [`KeyhavenError::InvalidParameters`] when the key id or payload is too
/// long for its length field.
pub fn encode_share(share: &SecretShare) -> KeyhavenResult<String> {
    let key_id = share.key_id().as_str().as_bytes();
    let payload = share.payload();
    let key_len = u16::try_from(key_id.len()).map_err(|_| {
        KeyhavenError::invalid(format!("key id of {} bytes exceeds {}", key_id.len(), u16::MAX))
    })?;
    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        KeyhavenError::invalid(format!("payload of {} bytes exceeds {}", payload.len(), u32::MAX))
    })?;
    let mut raw = Zeroizing::new(Vec::with_capacity(
        18 + key_id.len() + payload.len() + CHECKSUM_LEN,
    ));
    raw.push(FORMAT_VERSION);
    raw.push(share.index());
    raw.push(share.threshold());
    raw.push(share.total_shares());
    raw.extend_from_slice(&share.created_at_ms().to_be_bytes());
    raw.extend_from_slice(&key_len.to_be_bytes());
    raw.extend_from_slice(key_id);
    raw.extend_from_slice(&payload_len.to_be_bytes());
    raw.extend_from_slice(payload);
    let checksum = hash(&raw);
    raw.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    Ok(format!("{SHARE_PREFIX}{}", URL_SAFE_NO_PAD.encode(raw.as_slice())))
}

/// Decode a share produced by [`encode_share`]
pub fn decode_share(text: &str) -> KeyhavenResult<SecretShare> {
    let body = text
        .trim()
        .strip_prefix(SHARE_PREFIX)
        .ok_or_else(|| KeyhavenError::invalid_encoding("missing khs1 prefix"))?;
    let raw = Zeroizing::new(
        URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| KeyhavenError::invalid_encoding(format!("base64: {e}")))?,
    );
    if raw.len() < CHECKSUM_LEN {
        return Err(KeyhavenError::invalid_encoding("truncated"));
    }
    let (content, checksum) = raw.split_at(raw.len() - CHECKSUM_LEN);
    if hash(content)[..CHECKSUM_LEN] != *checksum {
        return Err(KeyhavenError::invalid_encoding("checksum mismatch"));
    }

    let mut reader = Reader::new(content);
    let version = reader.u8()?;
    if version != FORMAT_VERSION {
        return Err(KeyhavenError::invalid_encoding(format!(
            "unsupported version {version}"
        )));
    }
    let index = reader.u8()?;
    let threshold = reader.u8()?;
    let total_shares = reader.u8()?;
    let created_at_ms = u64::from_be_bytes(reader.array::<8>()?);
    let key_len = u16::from_be_bytes(reader.array::<2>()?) as usize;
    let key_id = std::str::from_utf8(reader.take(key_len)?)
        .map_err(|_| KeyhavenError::invalid_encoding("key id is not UTF-8"))?
        .to_string();
    let payload_len = u32::from_be_bytes(reader.array::<4>()?) as usize;
    let payload = reader.take(payload_len)?.to_vec();
    if !reader.is_empty() {
        return Err(KeyhavenError::invalid_encoding("trailing bytes"));
    }

    SecretShare::from_parts(
        index,
        payload,
        threshold,
        total_shares,
        KeyId::new(key_id),
        created_at_ms,
    )
    .map_err(|e| KeyhavenError::invalid_encoding(e.to_string()))
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> KeyhavenResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(KeyhavenError::invalid_encoding("truncated"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> KeyhavenResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> KeyhavenResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
