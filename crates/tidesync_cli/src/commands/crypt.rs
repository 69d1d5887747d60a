//! Encrypt and decrypt commands.
//!
//! Useful for checking that a password and salt open a device's data, and
//! for producing payloads by hand. Ciphertext uses the wire form
//! `iv:authTag:ciphertext` in hex.

use super::{encryption_service, read_input};
use std::path::Path;
use tidesync_engine::KdfParams;
use tracing::debug;

/// Encrypts `input` and returns the wire string.
pub fn encrypt(
    password: &str,
    salt_hex: &str,
    input: &Path,
    kdf: &KdfParams,
) -> Result<String, Box<dyn std::error::Error>> {
    let service = encryption_service(password, salt_hex, kdf)?;
    let plaintext = read_input(input)?;
    let data = service.encrypt(&plaintext)?;
    debug!(bytes = plaintext.len(), "encrypted input");
    Ok(data.to_wire())
}

/// Decrypts a wire string read from `input`.
pub fn decrypt(
    password: &str,
    salt_hex: &str,
    input: &Path,
    kdf: &KdfParams,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let service = encryption_service(password, salt_hex, kdf)?;
    let wire = String::from_utf8(read_input(input)?)
        .map_err(|_| "Input is not a wire string")?;
    let plaintext = service.decrypt_wire(wire.trim())?;
    debug!(bytes = plaintext.len(), "decrypted input");
    Ok(plaintext)
}

/// Runs the encrypt command.
pub fn run_encrypt(
    password: &str,
    salt_hex: &str,
    input: &Path,
    kdf: &KdfParams,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", encrypt(password, salt_hex, input, kdf)?);
    Ok(())
}

/// Runs the decrypt command.
pub fn run_decrypt(
    password: &str,
    salt_hex: &str,
    input: &Path,
    kdf: &KdfParams,
) -> Result<(), Box<dyn std::error::Error>> {
    let plaintext = decrypt(password, salt_hex, input, kdf)?;
    match String::from_utf8(plaintext) {
        Ok(text) => println!("{}", text),
        Err(e) => println!("{}", hex::encode(e.into_bytes())),
    }
    Ok(())
}
