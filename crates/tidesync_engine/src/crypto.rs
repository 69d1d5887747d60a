//! Client-side payload encryption.
//!
//! ## Security Model
//!
//! - The payload key is derived once per session: Argon2id stretches the
//!   password, HKDF-SHA256 expands the result under a fixed context string
//! - Every payload is sealed with AES-256-GCM under a fresh random 96-bit IV
//! - The 128-bit tag is kept detached so the wire form is
//!   `iv:authTag:ciphertext`
//! - Keys are zeroized on drop and never printed
//!
//! Nothing in this module touches the network; the backend only ever sees
//! [`EncryptedSyncData`].

use crate::error::{SyncError, SyncResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tidesync_protocol::{EncryptedSyncData, IV_SIZE, TAG_SIZE};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the payload key in bytes.
pub const KEY_SIZE: usize = 32;

/// Minimum accepted salt length.
pub const MIN_SALT_LEN: usize = 8;

const KEY_CONTEXT: &[u8] = b"tidesync-payload-key-v1";

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub mem_cost_kib: u32,
    /// Number of passes.
    pub time_cost: u32,
    /// Lanes.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 64 * 1024,
            time_cost: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal parameters for tests. Never use these for real passwords.
    pub fn fast() -> Self {
        Self {
            mem_cost_kib: 8,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Symmetric payload key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SyncKey {
    bytes: [u8; KEY_SIZE],
}

impl SyncKey {
    /// Derives a key from a password and salt.
    ///
    /// This is deliberately slow with the default parameters; run it on a
    /// blocking thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::KeyDerivation`] if the salt is shorter than
    /// [`MIN_SALT_LEN`] or the parameters are rejected.
    pub fn derive(password: &[u8], salt: &[u8], params: &KdfParams) -> SyncResult<Self> {
        if salt.len() < MIN_SALT_LEN {
            return Err(SyncError::KeyDerivation(format!(
                "salt must be at least {} bytes, got {}",
                MIN_SALT_LEN,
                salt.len()
            )));
        }

        let argon_params = Params::new(
            params.mem_cost_kib,
            params.time_cost,
            params.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| SyncError::KeyDerivation(format!("invalid parameters: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

        let mut stretched = Zeroizing::new([0u8; KEY_SIZE]);
        argon2
            .hash_password_into(password, salt, &mut stretched[..])
            .map_err(|e| SyncError::KeyDerivation(e.to_string()))?;

        let hk = Hkdf::<Sha256>::new(Some(salt), &stretched[..]);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(KEY_CONTEXT, &mut bytes)
            .map_err(|_| SyncError::KeyDerivation("HKDF expand failed".into()))?;

        Ok(Self { bytes })
    }

    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly [`KEY_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            SyncError::KeyDerivation(format!(
                "key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts and decrypts entity payloads.
///
/// Stateless apart from the key; share it behind an `Arc` across
/// concurrent cycles.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Creates a service for the given key.
    #[must_use]
    pub fn new(key: &SyncKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Derives the key and creates a service in one step.
    ///
    /// # Errors
    ///
    /// See [`SyncKey::derive`].
    pub fn from_password(password: &[u8], salt: &[u8], params: &KdfParams) -> SyncResult<Self> {
        Ok(Self::new(&SyncKey::derive(password, salt, params)?))
    }

    /// Encrypts `plaintext` under a fresh IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> SyncResult<EncryptedSyncData> {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| SyncError::Encryption("AES-GCM encryption failed".into()))?;

        // aes-gcm appends the tag; split it off to keep it detached.
        let tag_start = sealed.len().saturating_sub(TAG_SIZE);
        let tag = sealed.split_off(tag_start);
        EncryptedSyncData::from_parts(&iv, &tag, sealed)
            .map_err(|e| SyncError::Encryption(e.to_string()))
    }

    /// Decrypts and authenticates a payload.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Decryption`] if the tag does not verify
    /// (tampering, corruption or a different key).
    pub fn decrypt(&self, data: &EncryptedSyncData) -> SyncResult<Vec<u8>> {
        let mut sealed = Vec::with_capacity(data.ciphertext().len() + TAG_SIZE);
        sealed.extend_from_slice(data.ciphertext());
        sealed.extend_from_slice(data.auth_tag());

        self.cipher
            .decrypt(Nonce::from_slice(data.iv()), sealed.as_slice())
            .map_err(|_| SyncError::Decryption("authentication tag mismatch".into()))
    }

    /// Parses an `iv:authTag:ciphertext` string and decrypts it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Decryption`] for malformed strings (wrong field
    /// count, bad hex, wrong IV or tag length) and for failed authentication.
    pub fn decrypt_wire(&self, wire: &str) -> SyncResult<Vec<u8>> {
        let data = EncryptedSyncData::from_wire(wire)
            .map_err(|e| SyncError::Decryption(e.to_string()))?;
        self.decrypt(&data)
    }

    /// Serializes `value` as JSON and encrypts it.
    pub fn encrypt_json<T: Serialize + ?Sized>(&self, value: &T) -> SyncResult<EncryptedSyncData> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| SyncError::Encryption(e.to_string()))?,
        );
        self.encrypt(&plaintext)
    }

    /// Decrypts a payload and parses it as JSON.
    pub fn decrypt_json<T: DeserializeOwned>(&self, data: &EncryptedSyncData) -> SyncResult<T> {
        let plaintext = Zeroizing::new(self.decrypt(data)?);
        serde_json::from_slice(&plaintext).map_err(|e| SyncError::Decryption(e.to_string()))
    }
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn service() -> EncryptionService {
        EncryptionService::new(&SyncKey::generate())
    }

    #[test]
    fn roundtrip() {
        let service = service();
        let sealed = service.encrypt(b"buy milk").unwrap();
        assert_eq!(sealed.ciphertext().len(), 8);
        assert_eq!(service.decrypt(&sealed).unwrap(), b"buy milk");
    }

    #[test]
    fn fresh_iv_per_call() {
        let service = service();
        let a = service.encrypt(b"same").unwrap();
        let b = service.encrypt(b"same").unwrap();
        assert_ne!(a.iv(), b.iv());
        assert_ne!(a.to_wire(), b.to_wire());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let service = service();
        let sealed = service.encrypt(b"secret goal").unwrap();
        let mut bytes = sealed.ciphertext().to_vec();
        bytes[0] ^= 0x01;
        let tampered = EncryptedSyncData::new(*sealed.iv(), *sealed.auth_tag(), bytes);

        assert!(matches!(
            service.decrypt(&tampered),
            Err(SyncError::Decryption(_))
        ));
    }

    #[test]
    fn tampered_tag_fails() {
        let service = service();
        let sealed = service.encrypt(b"secret goal").unwrap();
        let mut tag = *sealed.auth_tag();
        tag[15] ^= 0x80;
        let tampered = EncryptedSyncData::new(*sealed.iv(), tag, sealed.ciphertext().to_vec());
        assert!(service.decrypt(&tampered).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = service().encrypt(b"private").unwrap();
        assert!(matches!(
            service().decrypt(&sealed),
            Err(SyncError::Decryption(_))
        ));
    }

    #[test]
    fn malformed_wire_fails() {
        let service = service();
        for wire in ["", "aa:bb", "zz:00:00", "00:00:00:00"] {
            assert!(
                matches!(service.decrypt_wire(wire), Err(SyncError::Decryption(_))),
                "{wire:?} should be rejected"
            );
        }

        let sealed = service.encrypt(b"ok").unwrap();
        assert_eq!(service.decrypt_wire(&sealed.to_wire()).unwrap(), b"ok");
    }

    #[test]
    fn json_roundtrip() {
        let service = service();
        let value = json!({"title": "Run 5k", "progress": 3});
        let sealed = service.encrypt_json(&value).unwrap();
        let back: serde_json::Value = service.decrypt_json(&sealed).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn derived_keys_are_deterministic() {
        let params = KdfParams::fast();
        let a = EncryptionService::from_password(b"hunter2", b"account-salt", &params).unwrap();
        let b = EncryptionService::from_password(b"hunter2", b"account-salt", &params).unwrap();
        let c = EncryptionService::from_password(b"hunter3", b"account-salt", &params).unwrap();

        let sealed = a.encrypt(b"shared").unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap(), b"shared");
        assert!(c.decrypt(&sealed).is_err());
    }

    #[test]
    fn short_salt_rejected() {
        let err = SyncKey::derive(b"pw", b"short", &KdfParams::fast()).unwrap_err();
        assert!(matches!(err, SyncError::KeyDerivation(_)));
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = SyncKey::from_bytes(&[7u8; KEY_SIZE]).unwrap();
        assert!(format!("{:?}", key).contains("REDACTED"));
        assert!(SyncKey::from_bytes(&[1u8; 3]).is_err());
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary(plaintext in prop::collection::vec(any::<u8>(), 0..512)) {
            let service = service();
            let sealed = service.encrypt(&plaintext).unwrap();
            prop_assert_eq!(service.decrypt(&sealed).unwrap(), plaintext);
        }
    }
}
