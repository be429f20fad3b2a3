//! Crypto utilities for alternate settlement rails and key handling
//!
//! Settlement addresses and transaction hashes follow the 0x-prefixed hex
//! convention of the EVM-style rails the platform settles on. Opaque blob
//! encryption uses ChaCha20-Poly1305 with a caller-provided 32-byte key and
//! a random per-blob nonce, packed into a self-describing `enc:v1` envelope.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Envelope prefix for encrypted blobs.
const ENVELOPE_PREFIX: &str = "enc:v1:";

/// Prefix of live-mode API keys.
pub const API_KEY_LIVE_PREFIX: &str = "dk_live_";
/// Prefix of test-mode API keys.
pub const API_KEY_TEST_PREFIX: &str = "dk_test_";

/// Generate a fresh settlement address for `currency` on `network`.
///
/// Addresses are derived from a salted digest so repeated calls never
/// collide; the remote side binds them to the merchant on first use.
pub fn generate_address(currency: &str, network: &str) -> Result<String> {
    if currency.trim().is_empty() || network.trim().is_empty() {
        return Err(Error::Validation("currency and network are required".into()));
    }

    let salt: [u8; 16] = rand::rng().random();
    let mut hasher = Sha256::new();
    hasher.update(currency.as_bytes());
    hasher.update(network.as_bytes());
    hasher.update(salt);
    let digest = hasher.finalize();
    Ok(format!("0x{}", hex::encode(&digest[..20])))
}

/// Whether `address` is a structurally valid settlement address.
pub fn validate_address(address: &str) -> bool {
    is_prefixed_hex(address, 40)
}

/// Whether `tx_hash` is a structurally valid transaction hash.
pub fn validate_transaction_hash(tx_hash: &str) -> bool {
    is_prefixed_hex(tx_hash, 64)
}

fn is_prefixed_hex(value: &str, hex_len: usize) -> bool {
    value
        .strip_prefix("0x")
        .map(|rest| rest.len() == hex_len && rest.bytes().all(|b| b.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// Encrypt an opaque blob with a caller-provided 32-byte key.
///
/// Output envelope: `enc:v1:<nonce b64>:<ciphertext b64>`.
pub fn encrypt_blob(key: &[u8], plaintext: &[u8]) -> Result<String> {
    let aead = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| Error::Crypto("encryption key must be exactly 32 bytes".into()))?;

    let nonce_bytes: [u8; 12] = rand::rng().random();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = aead
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

    Ok(format!(
        "{ENVELOPE_PREFIX}{}:{}",
        URL_SAFE_NO_PAD.encode(nonce_bytes),
        URL_SAFE_NO_PAD.encode(ciphertext)
    ))
}

/// Decrypt a blob produced by [`encrypt_blob`] with the same key.
pub fn decrypt_blob(key: &[u8], envelope: &str) -> Result<Vec<u8>> {
    let rest = envelope
        .strip_prefix(ENVELOPE_PREFIX)
        .ok_or_else(|| Error::Crypto("blob is not an enc:v1 envelope".into()))?;
    let (nonce_b64, ciphertext_b64) = rest
        .split_once(':')
        .ok_or_else(|| Error::Crypto("envelope is missing its ciphertext part".into()))?;

    let nonce_bytes = URL_SAFE_NO_PAD
        .decode(nonce_b64)
        .map_err(|e| Error::Crypto(format!("bad nonce encoding: {e}")))?;
    if nonce_bytes.len() != 12 {
        return Err(Error::Crypto("nonce must be 12 bytes".into()));
    }
    let ciphertext = URL_SAFE_NO_PAD
        .decode(ciphertext_b64)
        .map_err(|e| Error::Crypto(format!("bad ciphertext encoding: {e}")))?;

    let aead = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| Error::Crypto("decryption key must be exactly 32 bytes".into()))?;
    aead.decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|_| Error::Crypto("decryption failed: wrong key or tampered blob".into()))
}

/// Generate a fresh API key for the given mode.
pub fn generate_api_key(live: bool) -> String {
    let prefix = if live { API_KEY_LIVE_PREFIX } else { API_KEY_TEST_PREFIX };
    let material: [u8; 24] = rand::rng().random();
    format!("{prefix}{}", hex::encode(material))
}

/// Structural validation of an API key. Whether the key is active is the
/// remote side's decision; this only catches keys that cannot be valid.
pub fn validate_api_key_format(key: &str) -> bool {
    let rest = key
        .strip_prefix(API_KEY_LIVE_PREFIX)
        .or_else(|| key.strip_prefix(API_KEY_TEST_PREFIX));
    match rest {
        Some(material) => material.len() == 48 && material.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8; 32] = b"an example very very secret key.";

    #[test]
    fn generated_addresses_validate_and_differ() {
        let a = generate_address("ETH", "mainnet").unwrap();
        let b = generate_address("ETH", "mainnet").unwrap();
        assert!(validate_address(&a));
        assert!(validate_address(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn address_validation_rejects_malformed_input() {
        assert!(!validate_address(""));
        assert!(!validate_address("0x1234"));
        assert!(!validate_address("1234567890123456789012345678901234567890"));
        assert!(!validate_address("0xZZ34567890123456789012345678901234567890"));
    }

    #[test]
    fn transaction_hash_validation() {
        let valid = format!("0x{}", "ab".repeat(32));
        assert!(validate_transaction_hash(&valid));
        assert!(!validate_transaction_hash(&valid[..valid.len() - 2]));
        assert!(!validate_transaction_hash("0x"));
    }

    #[test]
    fn encrypt_decrypt_round_trips() {
        let blob = encrypt_blob(KEY, b"card token 4242").unwrap();
        assert!(blob.starts_with("enc:v1:"));
        assert_eq!(decrypt_blob(KEY, &blob).unwrap(), b"card token 4242");
    }

    #[test]
    fn decrypt_rejects_wrong_key_and_tampering() {
        let blob = encrypt_blob(KEY, b"secret").unwrap();

        let wrong_key = [7u8; 32];
        assert!(decrypt_blob(&wrong_key, &blob).is_err());

        let mut tampered = blob.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        assert!(decrypt_blob(KEY, &tampered).is_err());
    }

    #[test]
    fn encrypt_rejects_bad_key_length() {
        assert!(encrypt_blob(b"short", b"data").is_err());
        assert!(decrypt_blob(b"short", "enc:v1:x:y").is_err());
    }

    #[test]
    fn nonces_are_unique_per_blob() {
        let a = encrypt_blob(KEY, b"same plaintext").unwrap();
        let b = encrypt_blob(KEY, b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn api_keys_generate_and_validate() {
        let live = generate_api_key(true);
        let test = generate_api_key(false);
        assert!(live.starts_with(API_KEY_LIVE_PREFIX));
        assert!(test.starts_with(API_KEY_TEST_PREFIX));
        assert!(validate_api_key_format(&live));
        assert!(validate_api_key_format(&test));

        assert!(!validate_api_key_format("sk_live_abc"));
        assert!(!validate_api_key_format("dk_live_tooshort"));
        assert!(!validate_api_key_format(&format!("dk_live_{}", "g".repeat(48))));
    }
}
