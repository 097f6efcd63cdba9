use ark_bls12_381::G2Affine;

use crate::key::KeyId;
use crate::plugin::{ConfigDigest, Context, ReportTimestamp};
use crate::Error;

/// What the contract recorded for a key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OnchainKeyData {
    /// `None` until a DKG report for the config digest landed.
    pub public_key: Option<G2Affine>,
    /// Hashes of the share records the key was built from.
    pub hashes: Vec<[u8; 32]>,
}

/// The DKG contract. The plugins only read keys, transmission belongs to the transport.
pub trait OnchainContract: Send + Sync {
    fn get_key(&self, ctx: &Context, key_id: &KeyId, config_digest: &ConfigDigest) -> Result<OnchainKeyData, Error>;

    fn add_client(&self, ctx: &Context, key_id: &KeyId, client: [u8; 20]) -> Result<(), Error>;

    fn remove_client(&self, ctx: &Context, key_id: &KeyId, client: [u8; 20]) -> Result<(), Error>;

    fn set_config(&self, ctx: &Context, config_digest: ConfigDigest, onchain_config: &[u8], offchain_config: &[u8]) -> Result<(), Error>;

    fn transmit(&self, ctx: &Context, ts: ReportTimestamp, report: &[u8], signatures: &[Vec<u8>]) -> Result<(), Error>;
}
