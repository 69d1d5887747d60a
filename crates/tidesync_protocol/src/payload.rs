//! Opaque ciphertext bundles.
//!
//! An [`EncryptedSyncData`] is the only form in which entity payloads cross
//! the adapter boundary. It carries the AES-GCM nonce, the detached
//! authentication tag and the ciphertext. String-oriented transports carry it
//! as `iv:authTag:ciphertext` with every part lower-case hex; the serde
//! implementation uses the same string so JSON and CBOR bodies stay compact.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Size of the AES-GCM nonce in bytes.
pub const IV_SIZE: usize = 12;
/// Size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Separator between the three hex fields of the wire string.
const FIELD_SEPARATOR: char = ':';

/// An encrypted entity payload.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedSyncData {
    iv: [u8; IV_SIZE],
    auth_tag: [u8; TAG_SIZE],
    ciphertext: Vec<u8>,
}

impl EncryptedSyncData {
    /// Creates a bundle from its parts.
    pub fn new(iv: [u8; IV_SIZE], auth_tag: [u8; TAG_SIZE], ciphertext: Vec<u8>) -> Self {
        Self {
            iv,
            auth_tag,
            ciphertext,
        }
    }

    /// Creates a bundle from untrusted slices, checking the IV and tag lengths.
    pub fn from_parts(iv: &[u8], auth_tag: &[u8], ciphertext: Vec<u8>) -> ProtocolResult<Self> {
        let iv: [u8; IV_SIZE] = iv.try_into().map_err(|_| {
            ProtocolError::malformed(format!("iv must be {} bytes, got {}", IV_SIZE, iv.len()))
        })?;
        let auth_tag: [u8; TAG_SIZE] = auth_tag.try_into().map_err(|_| {
            ProtocolError::malformed(format!(
                "auth tag must be {} bytes, got {}",
                TAG_SIZE,
                auth_tag.len()
            ))
        })?;
        Ok(Self::new(iv, auth_tag, ciphertext))
    }

    /// Returns the nonce.
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Returns the authentication tag.
    pub fn auth_tag(&self) -> &[u8; TAG_SIZE] {
        &self.auth_tag
    }

    /// Returns the ciphertext (without tag).
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Number of bytes this payload occupies in backend storage.
    pub fn stored_size(&self) -> u64 {
        (IV_SIZE + TAG_SIZE + self.ciphertext.len()) as u64
    }

    /// Formats the bundle as `iv:authTag:ciphertext`.
    pub fn to_wire(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            hex::encode(self.iv),
            hex::encode(self.auth_tag),
            hex::encode(&self.ciphertext),
            sep = FIELD_SEPARATOR
        )
    }

    /// Parses the `iv:authTag:ciphertext` form.
    pub fn from_wire(wire: &str) -> ProtocolResult<Self> {
        let fields: Vec<&str> = wire.split(FIELD_SEPARATOR).collect();
        if fields.len() != 3 {
            return Err(ProtocolError::malformed(format!(
                "expected 3 fields, got {}",
                fields.len()
            )));
        }

        let decode = |name: &str, field: &str| {
            hex::decode(field)
                .map_err(|e| ProtocolError::malformed(format!("{} is not valid hex: {}", name, e)))
        };

        let iv = decode("iv", fields[0])?;
        let tag = decode("auth tag", fields[1])?;
        let ciphertext = decode("ciphertext", fields[2])?;

        Self::from_parts(&iv, &tag, ciphertext)
    }
}

impl fmt::Debug for EncryptedSyncData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSyncData")
            .field("iv", &hex::encode(self.iv))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

impl fmt::Display for EncryptedSyncData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl FromStr for EncryptedSyncData {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s)
    }
}

impl Serialize for EncryptedSyncData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire())
    }
}

impl<'de> Deserialize<'de> for EncryptedSyncData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = String::deserialize(deserializer)?;
        Self::from_wire(&wire).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncryptedSyncData {
        EncryptedSyncData::new([1u8; IV_SIZE], [2u8; TAG_SIZE], vec![0xde, 0xad, 0xbe, 0xef])
    }

    #[test]
    fn wire_format_layout() {
        let wire = sample().to_wire();
        let parts: Vec<_> = wire.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "01".repeat(IV_SIZE));
        assert_eq!(parts[1], "02".repeat(TAG_SIZE));
        assert_eq!(parts[2], "deadbeef");
    }

    #[test]
    fn wire_parse_inverts_format() {
        let data = sample();
        let parsed: EncryptedSyncData = data.to_wire().parse().unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn wrong_field_count_rejected() {
        assert!(matches!(
            EncryptedSyncData::from_wire("aa:bb"),
            Err(ProtocolError::MalformedPayload(_))
        ));
        assert!(EncryptedSyncData::from_wire("aa:bb:cc:dd").is_err());
    }

    #[test]
    fn bad_hex_rejected() {
        let wire = format!("{}:{}:zz", "00".repeat(IV_SIZE), "00".repeat(TAG_SIZE));
        assert!(EncryptedSyncData::from_wire(&wire).is_err());
    }

    #[test]
    fn short_iv_rejected() {
        let wire = format!("0001:{}:00", "00".repeat(TAG_SIZE));
        let err = EncryptedSyncData::from_wire(&wire).unwrap_err();
        assert!(err.to_string().contains("iv must be 12 bytes"));
    }

    #[test]
    fn empty_ciphertext_allowed() {
        let wire = format!("{}:{}:", "00".repeat(IV_SIZE), "00".repeat(TAG_SIZE));
        let data = EncryptedSyncData::from_wire(&wire).unwrap();
        assert!(data.ciphertext().is_empty());
        assert_eq!(data.stored_size(), (IV_SIZE + TAG_SIZE) as u64);
    }

    #[test]
    fn serde_uses_wire_string() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.starts_with('"'));
        assert!(json.ends_with("deadbeef\""));

        let back: EncryptedSyncData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn debug_does_not_dump_ciphertext() {
        let debug = format!("{:?}", sample());
        assert!(debug.contains("ciphertext_len"));
        assert!(!debug.contains("deadbeef"));
    }
}
