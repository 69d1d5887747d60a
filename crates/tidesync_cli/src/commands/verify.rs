//! Verify command implementation.

use super::encryption_service;
use std::collections::HashSet;
use std::path::Path;
use tidesync_engine::KdfParams;
use tidesync_protocol::ExportBundle;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of items checked.
    pub items_checked: usize,
    /// Number of payloads that decrypted (when a password was given).
    pub decrypted: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Password and salt for checking that every live payload opens.
#[derive(Debug, Clone)]
pub struct KeyCheck {
    /// Password.
    pub password: String,
    /// Salt in hex.
    pub salt_hex: String,
    /// KDF cost.
    pub kdf: KdfParams,
}

/// Checks format version, checksum, metadata and keys of a bundle, and
/// optionally that every live payload decrypts.
pub fn verify(
    bundle: &ExportBundle,
    key: Option<&KeyCheck>,
) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();

    if let Err(e) = bundle.verify() {
        result.errors.push(e.to_string());
    }
    if bundle.metadata.item_count != bundle.items.len() as u64 {
        result.errors.push(format!(
            "metadata lists {} items, bundle holds {}",
            bundle.metadata.item_count,
            bundle.items.len()
        ));
    }

    let service = key
        .map(|k| encryption_service(&k.password, &k.salt_hex, &k.kdf))
        .transpose()?;

    let mut seen = HashSet::new();
    for item in &bundle.items {
        result.items_checked += 1;
        if item.entity_type.is_empty() || item.entity_id.is_empty() {
            result
                .errors
                .push(format!("item with empty key at version {}", item.version));
        }
        if !seen.insert(item.key()) {
            result.errors.push(format!(
                "duplicate item {}/{}",
                item.entity_type, item.entity_id
            ));
        }
        if item.version == 0 {
            result.errors.push(format!(
                "{}/{} has version 0",
                item.entity_type, item.entity_id
            ));
        }
        if let (Some(service), false) = (&service, item.deleted) {
            match service.decrypt(&item.data) {
                Ok(_) => result.decrypted += 1,
                Err(e) => result.errors.push(format!(
                    "{}/{} v{} does not decrypt: {}",
                    item.entity_type, item.entity_id, item.version, e
                )),
            }
        }
    }
    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path, key: Option<&KeyCheck>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying bundle at {:?}", path);
    println!();

    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read bundle {:?}: {}", path, e))?;
    let bundle = ExportBundle::from_json(&json)?;
    let result = verify(&bundle, key)?;

    println!("  Items checked: {}", result.items_checked);
    if key.is_some() {
        println!("  Decrypted:     {}", result.decrypted);
    }
    for error in &result.errors {
        println!("    - {}", error);
    }

    println!();
    if result.is_ok() {
        println!("✓ Bundle verification passed");
        Ok(())
    } else {
        println!("✗ Bundle verification failed ({} errors)", result.errors.len());
        Err("Verification failed".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidesync_engine::EncryptionService;
    use tidesync_protocol::SyncItem;

    const SALT: &str = "0011223344556677";

    fn sealed(payload_password: &str) -> ExportBundle {
        let salt = hex::decode(SALT).unwrap();
        let service =
            EncryptionService::from_password(payload_password.as_bytes(), &salt, &KdfParams::fast())
                .unwrap();
        let items = vec![SyncItem {
            entity_type: "goal".into(),
            entity_id: "g1".into(),
            data: service.encrypt(b"{}").unwrap(),
            version: 1,
            timestamp: 10,
            modified_at: 10,
            deleted: false,
        }];
        ExportBundle::seal(items, 1_000, None).unwrap()
    }

    fn key(password: &str) -> KeyCheck {
        KeyCheck {
            password: password.into(),
            salt_hex: SALT.into(),
            kdf: KdfParams::fast(),
        }
    }

    #[test]
    fn clean_bundle_passes() {
        let result = verify(&sealed("pw"), Some(&key("pw"))).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.decrypted, 1);
    }

    #[test]
    fn wrong_password_is_reported() {
        let result = verify(&sealed("pw"), Some(&key("nope"))).unwrap();
        assert_eq!(result.decrypted, 0);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn duplicates_and_tampering_are_reported() {
        let mut bundle = sealed("pw");
        let copy = bundle.items[0].clone();
        bundle.items.push(copy);

        let result = verify(&bundle, None).unwrap();
        assert!(result.errors.iter().any(|e| e.contains("checksum")));
        assert!(result.errors.iter().any(|e| e.contains("duplicate")));
        assert!(result.errors.iter().any(|e| e.contains("metadata")));
    }
}
