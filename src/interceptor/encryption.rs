//! Encrypted-response detection and decryption pipeline
//!
//! Responses that look encrypted can be decrypted for inspection without
//! touching the recorded bytes. Detection is heuristic (high byte entropy,
//! JSON short-circuit); the actual cipher work is pluggable: hosts register
//! URL-pattern-keyed keys, per-pattern custom decryptors, and the keyed
//! cipher primitive itself.

use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

/// Entropy (bits per byte) above which a payload is considered encrypted
const ENTROPY_THRESHOLD: f64 = 7.0;

/// Bytes sampled from the head of a payload for the entropy estimate
const ENTROPY_SAMPLE_BYTES: usize = 1024;

/// Detection and decryption capability consumed by the record store
pub trait EncryptionDetector: Send + Sync {
    /// Heuristic check: do these bytes look encrypted?
    fn is_encrypted(&self, data: &[u8]) -> bool;
    /// Decrypt with an explicit key, if a cipher primitive is installed
    fn decrypt(&self, data: &[u8], key: &[u8]) -> Option<Vec<u8>>;
    /// Run a caller-registered decryptor matched by URL pattern
    fn custom_decrypt(&self, data: &[u8], url: &str) -> Option<Vec<u8>>;
    /// Look up a registered key matched by URL pattern
    fn decryption_key(&self, url: &str) -> Option<Vec<u8>>;
}

pub type CustomDecryptor = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;
pub type KeyedCipher = Arc<dyn Fn(&[u8], &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Default detector with URL-pattern registries
pub struct EncryptionService {
    keys: RwLock<Vec<(String, Vec<u8>)>>,
    custom_decryptors: RwLock<Vec<(String, CustomDecryptor)>>,
    cipher: RwLock<Option<KeyedCipher>>,
}

static SHARED: Lazy<Arc<EncryptionService>> = Lazy::new(|| Arc::new(EncryptionService::new()));

impl EncryptionService {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(Vec::new()),
            custom_decryptors: RwLock::new(Vec::new()),
            cipher: RwLock::new(None),
        }
    }

    /// Process-wide instance used by the default engine wiring
    pub fn shared() -> Arc<EncryptionService> {
        Arc::clone(&SHARED)
    }

    /// Register a decryption key for URLs containing `url_pattern`
    pub fn register_decryption_key(&self, url_pattern: &str, key: Vec<u8>) {
        let mut keys = self.keys.write().expect("key registry poisoned");
        keys.retain(|(pattern, _)| pattern != url_pattern);
        keys.push((url_pattern.to_string(), key));
    }

    /// Register a custom decryptor for URLs containing `url_pattern`
    pub fn register_custom_decryptor(
        &self,
        url_pattern: &str,
        decryptor: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) {
        let mut decryptors = self
            .custom_decryptors
            .write()
            .expect("decryptor registry poisoned");
        decryptors.retain(|(pattern, _)| pattern != url_pattern);
        decryptors.push((url_pattern.to_string(), Arc::new(decryptor)));
    }

    /// Install the keyed cipher primitive used by [`EncryptionDetector::decrypt`]
    pub fn set_cipher(
        &self,
        cipher: impl Fn(&[u8], &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) {
        *self.cipher.write().expect("cipher poisoned") = Some(Arc::new(cipher));
    }

    /// Drop all registrations
    pub fn reset(&self) {
        self.keys.write().expect("key registry poisoned").clear();
        self.custom_decryptors
            .write()
            .expect("decryptor registry poisoned")
            .clear();
        *self.cipher.write().expect("cipher poisoned") = None;
    }
}

impl Default for EncryptionService {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptionDetector for EncryptionService {
    fn is_encrypted(&self, data: &[u8]) -> bool {
        if data.len() <= 16 {
            return false;
        }
        if serde_json::from_slice::<serde::de::IgnoredAny>(data).is_ok() {
            return false;
        }
        let sample = &data[..data.len().min(ENTROPY_SAMPLE_BYTES)];
        shannon_entropy(sample) > ENTROPY_THRESHOLD
    }

    fn decrypt(&self, data: &[u8], key: &[u8]) -> Option<Vec<u8>> {
        let cipher = self.cipher.read().expect("cipher poisoned").clone()?;
        cipher(data, key)
    }

    fn custom_decrypt(&self, data: &[u8], url: &str) -> Option<Vec<u8>> {
        let lowered = url.to_lowercase();
        let decryptor = {
            let decryptors = self
                .custom_decryptors
                .read()
                .expect("decryptor registry poisoned");
            decryptors
                .iter()
                .find(|(pattern, _)| lowered.contains(&pattern.to_lowercase()))
                .map(|(_, decryptor)| Arc::clone(decryptor))
        };
        decryptor.and_then(|d| d(data))
    }

    fn decryption_key(&self, url: &str) -> Option<Vec<u8>> {
        let lowered = url.to_lowercase();
        let keys = self.keys.read().expect("key registry poisoned");
        keys.iter()
            .find(|(pattern, _)| lowered.contains(&pattern.to_lowercase()))
            .map(|(_, key)| key.clone())
    }
}

/// Shannon entropy in bits per byte
fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut frequencies = [0usize; 256];
    for &byte in data {
        frequencies[byte as usize] += 1;
    }
    let length = data.len() as f64;
    frequencies
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / length;
            -p * p.log2()
        })
        .sum()
}
