//! CLI command implementations.

pub mod crypt;
pub mod inspect;
pub mod verify;

use std::path::Path;
use tidesync_engine::{EncryptionService, KdfParams};

/// Derives the payload key the same way a sync session does.
pub(crate) fn encryption_service(
    password: &str,
    salt_hex: &str,
    kdf: &KdfParams,
) -> Result<EncryptionService, Box<dyn std::error::Error>> {
    let salt = hex::decode(salt_hex.trim()).map_err(|e| format!("Invalid salt hex: {}", e))?;
    Ok(EncryptionService::from_password(
        password.as_bytes(),
        &salt,
        kdf,
    )?)
}

/// Reads `input`, or stdin when it is `-`.
pub(crate) fn read_input(input: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if input == Path::new("-") {
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut std::io::stdin(), &mut buf)?;
        Ok(buf)
    } else {
        std::fs::read(input).map_err(|e| format!("Cannot read {:?}: {}", input, e).into())
    }
}
