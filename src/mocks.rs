//! In-memory collaborators of the plugins.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use ark_bls12_381::{Fr, G2Projective};
use ark_ec::CurveGroup;
use ark_std::rand::rngs::StdRng;
use ark_std::rand::{Rng, SeedableRng};
use ark_std::UniformRand;

use crate::bls::vanilla::BlsSigner;
use crate::config::{OffchainConfig, OnchainConfig};
use crate::contract::{OnchainContract, OnchainKeyData};
use crate::dkg::factory::{DkgFactory, RoundGuard};
use crate::dkg::{DkgKeys, DkgPlugin, DkgReport};
use crate::key::{DistributedKeyData, KeyConsumer, KeyId, KeyStore};
use crate::persistence::InMemoryPersistence;
use crate::player_idx::player_idxs;
use crate::plugin::{ConfigDigest, Context, ReportTimestamp, ReportingPluginConfig, ReportingPluginFactory};
use crate::poly::{eval, random_secret, PublicPoly};
use crate::pvss::encryption::{EncryptionGroup, Translator};
use crate::signing::recovery::{RecoveryCoordinator, RecoveryRequest};
use crate::signing::report::AbstractReport;
use crate::signing::vrf::{Coordinator, ReportBlocks};
use crate::Error;

/// The DKG contract, a transmitted report lands on-chain immediately.
#[derive(Default)]
pub struct MockContract {
    keys: Mutex<HashMap<(KeyId, ConfigDigest), OnchainKeyData>>,
    clients: Mutex<HashMap<KeyId, HashSet<[u8; 20]>>>,
}

impl MockContract {
    pub fn set_key(&self, key_id: KeyId, config_digest: ConfigDigest, key: OnchainKeyData) {
        self.keys.lock().unwrap().insert((key_id, config_digest), key);
    }

    pub fn clients(&self, key_id: &KeyId) -> HashSet<[u8; 20]> {
        self.clients.lock().unwrap().get(key_id).cloned().unwrap_or_default()
    }
}

impl OnchainContract for MockContract {
    fn get_key(&self, ctx: &Context, key_id: &KeyId, config_digest: &ConfigDigest) -> Result<OnchainKeyData, Error> {
        ctx.check()?;
        Ok(self.keys.lock().unwrap().get(&(*key_id, *config_digest)).cloned().unwrap_or_default())
    }

    fn add_client(&self, ctx: &Context, key_id: &KeyId, client: [u8; 20]) -> Result<(), Error> {
        ctx.check()?;
        self.clients.lock().unwrap().entry(*key_id).or_default().insert(client);
        Ok(())
    }

    fn remove_client(&self, ctx: &Context, key_id: &KeyId, client: [u8; 20]) -> Result<(), Error> {
        ctx.check()?;
        if !self.clients.lock().unwrap().entry(*key_id).or_default().remove(&client) {
            return Err(Error::Contract(format!("unknown client of key {key_id}")));
        }
        Ok(())
    }

    fn set_config(&self, ctx: &Context, _config_digest: ConfigDigest, _onchain_config: &[u8], _offchain_config: &[u8]) -> Result<(), Error> {
        ctx.check()
    }

    fn transmit(&self, ctx: &Context, ts: ReportTimestamp, report: &[u8], _signatures: &[Vec<u8>]) -> Result<(), Error> {
        ctx.check()?;
        let report = DkgReport::decode(report)?;
        self.set_key(KeyId(report.key_id), ts.config_digest, OnchainKeyData {
            public_key: Some(report.public_key),
            hashes: report.hashes,
        });
        Ok(())
    }
}

/// A committee of DKG nodes sharing a contract, each with its own keys, key store and persistence.
pub struct DkgCommittee {
    pub key_id: KeyId,
    pub config_digest: ConfigDigest,
    pub n: usize,
    pub t: usize,
    pub keys: Vec<DkgKeys>,
    pub key_stores: Vec<KeyStore>,
    pub contract: Arc<MockContract>,
    pub persistences: Vec<InMemoryPersistence>,
    pub factories: Vec<DkgFactory>,
    onchain_config: Vec<u8>,
    offchain_config: Vec<u8>,
}

pub fn dkg_committee(n: usize, t: usize, group: EncryptionGroup, translator: Translator) -> DkgCommittee {
    let rng = &mut StdRng::seed_from_u64(n as u64);
    let keys: Vec<DkgKeys> = (0..n)
        .map(|_| DkgKeys { encryption_sk: Fr::rand(rng), signer: BlsSigner::new(rng) })
        .collect();
    let offchain = OffchainConfig {
        group,
        encryption_pks: keys.iter().map(|k| group.mul_generator(k.encryption_sk)).collect(),
        signing_pks: keys.iter().map(|k| k.signer.bls_pk_g2).collect(),
        translator,
    };
    let key_id = KeyId([7; 32]);
    let key_stores: Vec<KeyStore> = (0..n).map(|_| KeyStore::new()).collect();
    let persistences: Vec<InMemoryPersistence> = (0..n).map(|_| InMemoryPersistence::new()).collect();
    let contract = Arc::new(MockContract::default());
    let factories = (0..n)
        .map(|i| DkgFactory::new(
            keys[i].clone(),
            Arc::new(key_stores[i].clone()),
            contract.clone(),
            Arc::new(persistences[i].clone()),
            RoundGuard::new(),
            StdRng::seed_from_u64(rng.gen()),
        ))
        .collect();
    DkgCommittee {
        key_id,
        config_digest: ConfigDigest([1; 32]),
        n,
        t,
        keys,
        key_stores,
        contract,
        persistences,
        factories,
        onchain_config: OnchainConfig { key_id }.encode(),
        offchain_config: offchain.encode().unwrap(),
    }
}

impl DkgCommittee {
    pub fn plugin_config(&self, i: usize) -> ReportingPluginConfig {
        ReportingPluginConfig {
            config_digest: self.config_digest,
            oracle_id: i as u8,
            n: self.n,
            f: self.t,
            onchain_config: self.onchain_config.clone(),
            offchain_config: self.offchain_config.clone(),
        }
    }

    /// Starts a round on every node.
    pub fn plugins(&self) -> Vec<DkgPlugin> {
        self.factories.iter().enumerate()
            .map(|(i, f)| f.new_reporting_plugin(self.plugin_config(i)).unwrap().0)
            .collect()
    }
}

/// Trusted dealer: the key stores of `n` players holding a `t`-out-of-`n` sharing of a random key.
pub fn dummy_dkg<R: Rng>(n: usize, t: usize, key_id: KeyId, rng: &mut R) -> Vec<KeyStore> {
    let secret = random_secret::<Fr, _>(t, rng);
    let commitment = PublicPoly::<G2Projective>::commit(&secret);
    let idxs = player_idxs(n).unwrap();
    let public_shares = G2Projective::normalize_batch(&idxs.iter().map(|&j| commitment.evaluate(j)).collect::<Vec<_>>());
    let public_key = commitment.constant().into_affine();
    idxs.iter()
        .map(|&j| {
            let store = KeyStore::new();
            store.new_key(key_id, DistributedKeyData {
                public_key: Some(public_key),
                public_shares: public_shares.clone(),
                secret_share: Some(eval(&secret, j)),
                threshold: t,
                present: true,
            });
            store
        })
        .collect()
}

#[derive(Default)]
struct VrfChain {
    pending: ReportBlocks,
    current_height: u64,
    onchain: HashSet<(u32, u8)>,
    transmitted: Vec<AbstractReport>,
}

pub struct MockVrfCoordinator {
    chain: Mutex<VrfChain>,
}

impl MockVrfCoordinator {
    pub fn new(current_height: u64) -> Self {
        Self { chain: Mutex::new(VrfChain { current_height, ..VrfChain::default() }) }
    }

    pub fn set_pending(&self, pending: ReportBlocks) {
        self.chain.lock().unwrap().pending = pending;
    }

    pub fn mark_onchain(&self, epoch: u32, round: u8) {
        self.chain.lock().unwrap().onchain.insert((epoch, round));
    }

    pub fn set_current_height(&self, current_height: u64) {
        self.chain.lock().unwrap().current_height = current_height;
    }

    pub fn transmitted(&self) -> Vec<AbstractReport> {
        self.chain.lock().unwrap().transmitted.clone()
    }
}

impl Coordinator for MockVrfCoordinator {
    fn report_blocks(
        &self,
        ctx: &Context,
        _period: u64,
        _confirmation_delays: &[u32],
        _lookback_blocks: u64,
        max_blocks: usize,
        max_callbacks: usize,
    ) -> Result<ReportBlocks, Error> {
        ctx.check()?;
        let mut pending = self.chain.lock().unwrap().pending.clone();
        pending.blocks.truncate(max_blocks);
        pending.callbacks.truncate(max_callbacks);
        Ok(pending)
    }

    fn report_will_be_transmitted(&self, ctx: &Context, report: &AbstractReport) -> Result<(), Error> {
        ctx.check()?;
        self.chain.lock().unwrap().transmitted.push(report.clone());
        Ok(())
    }

    fn report_is_onchain(&self, ctx: &Context, epoch: u32, round: u8) -> Result<bool, Error> {
        ctx.check()?;
        Ok(self.chain.lock().unwrap().onchain.contains(&(epoch, round)))
    }

    fn current_height(&self, ctx: &Context) -> Result<u64, Error> {
        ctx.check()?;
        Ok(self.chain.lock().unwrap().current_height)
    }

    fn juels_per_fee_coin(&self, ctx: &Context) -> Result<u64, Error> {
        ctx.check()?;
        Ok(1_000)
    }

    fn reasonable_gas_price(&self, ctx: &Context) -> Result<u64, Error> {
        ctx.check()?;
        Ok(30)
    }
}

#[derive(Default)]
pub struct MockRecoveryCoordinator {
    pending: Mutex<Vec<RecoveryRequest>>,
    onchain: Mutex<HashSet<(u32, u8)>>,
}

impl MockRecoveryCoordinator {
    pub fn set_pending(&self, pending: Vec<RecoveryRequest>) {
        *self.pending.lock().unwrap() = pending;
    }

    pub fn mark_onchain(&self, epoch: u32, round: u8) {
        self.onchain.lock().unwrap().insert((epoch, round));
    }
}

impl RecoveryCoordinator for MockRecoveryCoordinator {
    fn pending_requests(&self, ctx: &Context) -> Result<Vec<RecoveryRequest>, Error> {
        ctx.check()?;
        Ok(self.pending.lock().unwrap().clone())
    }

    fn report_is_onchain(&self, ctx: &Context, epoch: u32, round: u8) -> Result<bool, Error> {
        ctx.check()?;
        Ok(self.onchain.lock().unwrap().contains(&(epoch, round)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_clients() {
        let contract = MockContract::default();
        let ctx = Context::new();
        let key_id = KeyId([1; 32]);
        contract.add_client(&ctx, &key_id, [5; 20]).unwrap();
        assert!(contract.clients(&key_id).contains(&[5; 20]));
        contract.remove_client(&ctx, &key_id, [5; 20]).unwrap();
        assert!(matches!(contract.remove_client(&ctx, &key_id, [5; 20]), Err(Error::Contract(_))));
        assert_eq!(contract.get_key(&ctx, &key_id, &ConfigDigest::default()).unwrap(), OnchainKeyData::default());
    }
}
