//! Active-key singleton: a capability surfaced by the catalog, not
//! process-wide state (spec §9). The raw key file is a derived cache,
//! idempotently rewritten from whatever the catalog currently considers
//! active.

use std::path::Path;

use tracing::info;

use crate::catalog::Catalog;
use crate::catalog::models::EncryptionKey;
use crate::error::CryptoError;

/// Fetches (or creates) the active key and rewrites the raw binary key
/// file FFmpeg reads for HLS segment encryption. Returns the key's raw
/// 16 bytes for in-process use by the file encryptor.
pub async fn ensure_active_key(
    catalog: &Catalog,
    raw_key_path: &Path,
) -> Result<([u8; 16], EncryptionKey), CryptoError> {
    let key = catalog
        .get_or_create_active_key()
        .await
        .map_err(|e| CryptoError::KeyManagement(e.to_string()))?;

    let key_bytes = hex_to_16_bytes(&key.key_value)
        .ok_or_else(|| CryptoError::KeyManagement("active key is not 16 bytes".to_string()))?;

    if let Some(parent) = raw_key_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CryptoError::WriteFailed {
            path: raw_key_path.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(raw_key_path, key_bytes).map_err(|e| CryptoError::WriteFailed {
        path: raw_key_path.to_path_buf(),
        source: e,
    })?;
    info!(key_id = %key.id, path = %raw_key_path.display(), "active key file refreshed");

    Ok((key_bytes, key))
}

fn hex_to_16_bytes(hex_str: &str) -> Option<[u8; 16]> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_decode_rejects_wrong_length() {
        assert!(hex_to_16_bytes("abcd").is_none());
        assert!(hex_to_16_bytes(&"00".repeat(16)).is_some());
    }
}
