use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::key::KeyId;
use crate::plugin::{ConfigDigest, Context};
use crate::Error;

/// A marshalled share record together with its hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedShareRecord {
    pub hash: [u8; 32],
    pub marshalled: Vec<u8>,
}

/// Durable storage of the share records of a round, so that a restarted node can still
/// re-attest the records the on-chain key was built from.
pub trait DkgSharePersistence: Send + Sync {
    /// Idempotent, records already stored are skipped.
    fn write_share_records(
        &self,
        ctx: &Context,
        config_digest: &ConfigDigest,
        key_id: &KeyId,
        records: &[PersistedShareRecord],
    ) -> Result<(), Error>;

    fn read_share_records(&self, config_digest: &ConfigDigest, key_id: &KeyId) -> Result<Vec<PersistedShareRecord>, Error>;
}

/// Keeps the records for the lifetime of the process.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    records: Arc<Mutex<HashMap<(ConfigDigest, KeyId), Vec<PersistedShareRecord>>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DkgSharePersistence for InMemoryPersistence {
    fn write_share_records(
        &self,
        ctx: &Context,
        config_digest: &ConfigDigest,
        key_id: &KeyId,
        records: &[PersistedShareRecord],
    ) -> Result<(), Error> {
        ctx.check()?;
        let mut stored = self.records.lock()
            .map_err(|_| Error::Persistence("poisoned lock".to_string()))?;
        let entry = stored.entry((*config_digest, *key_id)).or_default();
        for record in records {
            if entry.iter().all(|r| r.hash != record.hash) {
                entry.push(record.clone());
            }
        }
        Ok(())
    }

    fn read_share_records(&self, config_digest: &ConfigDigest, key_id: &KeyId) -> Result<Vec<PersistedShareRecord>, Error> {
        let stored = self.records.lock()
            .map_err(|_| Error::Persistence("poisoned lock".to_string()))?;
        Ok(stored.get(&(*config_digest, *key_id)).cloned().unwrap_or_default())
    }
}
