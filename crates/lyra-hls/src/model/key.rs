use bytes::Bytes;
use url::Url;

/// `#EXT-X-KEY` METHOD values that require decryption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncryptionMethod {
    Aes128,
    SampleAes,
    SampleAesCenc,
}

/// Decryption key of a fragment.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelKey {
    pub method: EncryptionMethod,
    pub uri: Option<Url>,
    /// Explicit IV from the playlist.
    pub iv: Option<[u8; 16]>,
    pub key_format: Option<String>,
    /// Key bytes once loaded.
    pub key: Option<Bytes>,
}

impl LevelKey {
    pub fn new(method: EncryptionMethod, uri: Option<Url>) -> Self {
        Self {
            method,
            uri,
            iv: None,
            key_format: None,
            key: None,
        }
    }

    pub fn with_iv(mut self, iv: [u8; 16]) -> Self {
        self.iv = Some(iv);
        self
    }

    /// IV for the fragment `sn`: the explicit one, or the sequence number
    /// as a big-endian 128-bit integer.
    pub fn iv_for(&self, sn: u64) -> [u8; 16] {
        self.iv.unwrap_or_else(|| sn_to_iv(sn))
    }
}

pub(crate) fn sn_to_iv(sn: u64) -> [u8; 16] {
    let mut iv = [0_u8; 16];
    // Sequence numbers are 32-bit in practice; only the low word is encoded.
    #[expect(clippy::cast_possible_truncation)]
    let low = sn as u32;
    iv[12..16].copy_from_slice(&low.to_be_bytes());
    iv
}

/// Parse `0x`-prefixed hex IV.
pub(crate) fn parse_iv(value: &str) -> Option<[u8; 16]> {
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if hex.is_empty() || hex.len() > 32 {
        return None;
    }
    let padded = format!("{hex:0>32}");
    let mut iv = [0_u8; 16];
    for (i, byte) in iv.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&padded[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(iv)
}
