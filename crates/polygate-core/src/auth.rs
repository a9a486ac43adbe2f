use rand::RngCore;
use sha2::{Digest, Sha256};

use polygate_storage::{GatewayStore, entities};

const KEY_PREFIX: &str = "sk-gw-";
const KEY_RANDOM_BYTES: usize = 24;
const DISPLAY_PREFIX_LEN: usize = 12;

pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Extract the token from an `Authorization` header value. The scheme
/// prefix is matched exactly (`Bearer `, capital B).
pub fn extract_bearer(header: &str) -> Option<String> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// A freshly minted caller credential. `raw` is shown exactly once; only
/// the hash and display prefix are persisted.
#[derive(Debug, Clone)]
pub struct ApiKeyMaterial {
    pub raw: String,
    pub key_hash: String,
    pub key_prefix: String,
}

impl ApiKeyMaterial {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_RANDOM_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
        let raw = format!("{KEY_PREFIX}{hex}");
        Self {
            key_hash: sha256_hex(&raw),
            key_prefix: format!("{}…", &raw[..DISPLAY_PREFIX_LEN]),
            raw,
        }
    }
}

/// Validates caller API keys against their stored SHA-256 hashes.
#[derive(Clone)]
pub struct ApiKeyAuthenticator {
    store: GatewayStore,
}

impl ApiKeyAuthenticator {
    pub fn new(store: GatewayStore) -> Self {
        Self { store }
    }

    /// Returns the key row iff the raw key is known and active.
    pub async fn validate(&self, raw: &str) -> Option<entities::api_keys::Model> {
        let hash = sha256_hex(raw);
        let row = self.store.find_api_key_by_hash(&hash).await.ok()??;
        row.is_active.then_some(row)
    }
}
