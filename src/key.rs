use core::fmt;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ark_bls12_381::{Fr, G2Affine};
use tracing::{debug, info};

use crate::utils::hex;
use crate::Error;

/// Identifies a distributed key across committee reconfigurations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyId(pub [u8; 32]);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

/// The outcome of a DKG round as seen by one player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributedKeyData {
    /// `s.g2` for the shared secret `s`.
    pub public_key: Option<G2Affine>,
    /// `s_j.g2`, in the order of the players.
    pub public_shares: Vec<G2Affine>,
    /// `s_i`, this player's share.
    pub secret_share: Option<Fr>,
    /// Any `t + 1` shares determine the secret.
    pub threshold: usize,
    /// Whether the data is current, `false` after the key was invalidated.
    pub present: bool,
}

impl DistributedKeyData {
    pub fn absent() -> Self {
        Self {
            public_key: None,
            public_shares: Vec::new(),
            secret_share: None,
            threshold: 0,
            present: false,
        }
    }

    /// The public key and the secret share, failing if the key isn't usable for signing.
    pub fn signing_material(&self, key_id: &KeyId) -> Result<(G2Affine, Fr), Error> {
        match (self.present, self.public_key, self.secret_share) {
            (true, Some(pk), Some(sk)) => Ok((pk, sk)),
            _ => Err(Error::KeyUnavailable(key_id.to_string())),
        }
    }
}

/// Notified by the DKG plugin when a key is rotated.
pub trait KeyConsumer: Send + Sync {
    /// Called when a new DKG round for the key starts, the old material must not be used anymore.
    fn key_invalidated(&self, key_id: KeyId);

    /// Called once the round reaches quorum.
    fn new_key(&self, key_id: KeyId, key: DistributedKeyData);
}

/// Read-only view of the distributed keys for the signing plugins.
pub trait KeyProvider: Send + Sync {
    /// Never fails, an unknown or invalidated key is reported as absent.
    fn key_lookup(&self, key_id: &KeyId) -> DistributedKeyData;
}

/// In-memory key storage shared between the DKG plugin (writer) and the signing plugins (readers).
#[derive(Clone, Default)]
pub struct KeyStore {
    keys: Arc<RwLock<HashMap<KeyId, DistributedKeyData>>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyConsumer for KeyStore {
    fn key_invalidated(&self, key_id: KeyId) {
        // a poisoned lock is still consistent: every write replaces an entry whole
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(key_id, DistributedKeyData::absent());
        debug!(key_id = %key_id, "key invalidated");
    }

    fn new_key(&self, key_id: KeyId, key: DistributedKeyData) {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        info!(key_id = %key_id, present = key.present, threshold = key.threshold, "new key");
        keys.insert(key_id, key);
    }
}

impl KeyProvider for KeyStore {
    fn key_lookup(&self, key_id: &KeyId) -> DistributedKeyData {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.get(key_id)
            .cloned()
            .unwrap_or_else(DistributedKeyData::absent)
    }
}

#[cfg(test)]
mod tests {
    use ark_ec::AffineRepr;

    use super::*;

    #[test]
    fn invalidated_key_is_absent() {
        let store = KeyStore::new();
        let key_id = KeyId([3; 32]);
        assert!(!store.key_lookup(&key_id).present);

        let key = DistributedKeyData {
            public_key: Some(G2Affine::generator()),
            public_shares: vec![G2Affine::generator()],
            secret_share: Some(Fr::from(1u64)),
            threshold: 0,
            present: true,
        };
        store.new_key(key_id, key.clone());
        assert_eq!(store.key_lookup(&key_id), key);
        assert!(store.key_lookup(&key_id).signing_material(&key_id).is_ok());

        let reader = store.clone();
        store.key_invalidated(key_id);
        let looked_up = reader.key_lookup(&key_id);
        assert!(!looked_up.present);
        assert!(looked_up.public_key.is_none());
        assert!(looked_up.secret_share.is_none());
        assert!(matches!(looked_up.signing_material(&key_id), Err(Error::KeyUnavailable(_))));
    }
}
