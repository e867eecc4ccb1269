//! AES-128-CBC file encryption (spec §4.7).
//!
//! The fallback path is a direct emission of the placeholder artifact — no
//! recursion, no synthetic "non-existent" sentinel path, per the design
//! note in spec §9 calling out the source's recursive fallback as a smell
//! to fix.

pub mod keystore;

use std::path::{Path, PathBuf};

use aes::Aes128;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use tracing::{error, info, warn};

use crate::error::CryptoError;

type Encryptor = cbc::Encryptor<Aes128>;

/// A canonical 1x1 black WebP, used whenever a real artifact can't be
/// produced. Keeps every `MediaAsset` row pointing at a readable `.enc`
/// file (spec §4.7 edge case).
pub(crate) const PLACEHOLDER_WEBP: &[u8] = &[
    0x52, 0x49, 0x46, 0x46, 0x24, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50, 0x56, 0x50, 0x38,
    0x20, 0x18, 0x00, 0x00, 0x00, 0x30, 0x01, 0x00, 0x9d, 0x01, 0x2a, 0x01, 0x00, 0x01, 0x00,
    0x01, 0x40, 0x25, 0xa4, 0x00, 0x03, 0x70, 0x00, 0xfe, 0xfb, 0x94, 0x00, 0x00,
];

/// Encrypts the plaintext file at `input_path` and writes `IV || ciphertext`
/// to `{input_path}.enc`, then removes the plaintext. If the plaintext is
/// missing, empty, or encryption fails, emits the placeholder artifact
/// instead — the `.enc` output always exists on return.
pub fn encrypt_file(input_path: &Path, key: &[u8; 16]) -> Result<PathBuf, CryptoError> {
    let encrypted_path = append_extension(input_path, "enc");

    let plaintext = match std::fs::read(input_path) {
        Ok(bytes) if bytes.is_empty() => {
            error!(path = %input_path.display(), "file to encrypt is empty");
            let _ = std::fs::remove_file(input_path);
            None
        }
        Ok(bytes) => Some(bytes),
        Err(e) => {
            error!(path = %input_path.display(), error = %e, "file to encrypt does not exist");
            None
        }
    };

    let plaintext = match plaintext {
        Some(bytes) => bytes,
        None => {
            write_placeholder(&encrypted_path, key)?;
            warn!(path = %encrypted_path.display(), "wrote placeholder encrypted artifact");
            return Ok(encrypted_path);
        }
    };

    if plaintext.len() < 100 {
        warn!(
            path = %input_path.display(),
            bytes = plaintext.len(),
            "file to encrypt is suspiciously small"
        );
    }

    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = encrypt_cbc_pkcs7(&plaintext, key, &iv);

    if let Err(e) = write_encrypted(&encrypted_path, &iv, &ciphertext) {
        error!(path = %encrypted_path.display(), error = %e, "encryption write failed");
        write_placeholder(&encrypted_path, key)?;
        return Ok(encrypted_path);
    }

    let encrypted_size = 16 + ciphertext.len();
    if encrypted_size < 32 {
        error!(path = %encrypted_path.display(), size = encrypted_size, "encrypted file too small");
    }
    info!(path = %encrypted_path.display(), size = encrypted_size, "encrypted file created");

    let _ = std::fs::remove_file(input_path);
    Ok(encrypted_path)
}

fn write_placeholder(encrypted_path: &Path, key: &[u8; 16]) -> Result<(), CryptoError> {
    let iv = [0u8; 16];
    let ciphertext = encrypt_cbc_pkcs7(PLACEHOLDER_WEBP, key, &iv);
    write_encrypted(encrypted_path, &iv, &ciphertext)
}

fn write_encrypted(path: &Path, iv: &[u8; 16], ciphertext: &[u8]) -> Result<(), CryptoError> {
    let mut out = Vec::with_capacity(16 + ciphertext.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(ciphertext);
    std::fs::write(path, out).map_err(|e| CryptoError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// PKCS#7-pads `plaintext` to a 16-byte boundary and encrypts it with
/// AES-128-CBC under `key`/`iv`.
fn encrypt_cbc_pkcs7(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    let encryptor = Encryptor::new(key.into(), iv.into());
    encryptor.encrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(plaintext)
}

/// Decrypts `IV || ciphertext` produced by [`encrypt_file`], stripping
/// PKCS#7 padding. Used by tests and by any future consumer verifying the
/// round-trip property from spec §8.
pub fn decrypt(blob: &[u8], key: &[u8; 16]) -> Result<Vec<u8>, CryptoError> {
    use cbc::cipher::BlockDecryptMut;

    if blob.len() < 16 {
        return Err(CryptoError::KeyManagement("ciphertext shorter than IV".into()));
    }
    let (iv, ciphertext) = blob.split_at(16);
    let iv: [u8; 16] = iv.try_into().unwrap();

    let decryptor = cbc::Decryptor::<Aes128>::new(key.into(), &iv.into());
    decryptor
        .decrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(ciphertext)
        .map_err(|e| CryptoError::KeyManagement(format!("padding error: {e}")))
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// The path [`encrypt_file`] writes its output to for a given plaintext
/// path, without performing any encryption. Callers that need to confirm
/// an artifact exists after encryption (spec §5) use this to derive the
/// expected path.
pub fn encrypted_path(plaintext_path: &Path) -> PathBuf {
    append_extension(plaintext_path, "enc")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_key() -> [u8; 16] {
        [0x42; 16]
    }

    #[test]
    fn round_trip_arbitrary_lengths() {
        let key = test_key();
        for len in [0usize, 1, 15, 16, 17, 1000, 4096] {
            let plaintext = vec![0xab; len];
            let mut iv = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut iv);
            let ciphertext = encrypt_cbc_pkcs7(&plaintext, &key, &iv);

            let mut blob = iv.to_vec();
            blob.extend_from_slice(&ciphertext);
            let decrypted = decrypt(&blob, &key).unwrap();
            assert_eq!(decrypted, plaintext, "len={len}");
        }
    }

    #[test]
    fn encrypt_file_writes_iv_and_deletes_plaintext() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("a.webp");
        std::fs::write(&input, b"some webp bytes").unwrap();

        let key = test_key();
        let encrypted_path = encrypt_file(&input, &key).unwrap();

        assert!(!input.exists());
        assert!(encrypted_path.exists());
        let blob = std::fs::read(&encrypted_path).unwrap();
        assert!(blob.len() >= 32);
        let decrypted = decrypt(&blob, &key).unwrap();
        assert_eq!(decrypted, b"some webp bytes");
    }

    #[test]
    fn missing_plaintext_yields_placeholder() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("missing.webp");
        let key = test_key();

        let encrypted_path = encrypt_file(&input, &key).unwrap();
        assert!(encrypted_path.exists());

        let blob = std::fs::read(&encrypted_path).unwrap();
        let iv = &blob[..16];
        assert_eq!(iv, &[0u8; 16]);
        let decrypted = decrypt(&blob, &key).unwrap();
        assert_eq!(decrypted, PLACEHOLDER_WEBP);
    }

    #[test]
    fn empty_plaintext_yields_placeholder() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("empty.webp");
        std::fs::write(&input, b"").unwrap();
        let key = test_key();

        let encrypted_path = encrypt_file(&input, &key).unwrap();
        assert!(!input.exists());
        let blob = std::fs::read(&encrypted_path).unwrap();
        let decrypted = decrypt(&blob, &key).unwrap();
        assert_eq!(decrypted, PLACEHOLDER_WEBP);
    }
}
