//! Distributed key generation as a reporting plugin.
//!
//! Every oracle deals a share set to the committee when the plugin is created and keeps observing
//! its signed record until the key lands on-chain. Any `t + 1` valid records with distinct dealers
//! determine the key: its public key is the sum of the dealers' public contributions and every
//! player's share is the sum of the shares it received. The report carries the public key and the
//! hashes of the records it was built from, so that once it's on-chain every oracle can rebuild its
//! share from the same records, which the oracles keep re-attesting to.

use std::sync::{Arc, Mutex, MutexGuard};

use ark_bls12_381::{Bls12_381, Fr, G2Affine};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::rngs::StdRng;
use ark_std::rand::Rng;
use tracing::{debug, info, warn};

use crate::bls::vanilla::BlsSigner;
use crate::config::OffchainConfig;
use crate::contract::{OnchainContract, OnchainKeyData};
use crate::dkg::factory::RoundPermit;
use crate::dkg::record::{ShareRecord, ShareRecords, ValidShareRecords};
use crate::key::{KeyConsumer, KeyId};
use crate::persistence::{DkgSharePersistence, PersistedShareRecord};
use crate::player_idx::PlayerIdx;
use crate::plugin::{AttributedObservation, ConfigDigest, Context, ReportTimestamp, ReportingPlugin};
use crate::pvss::Ceremony;
use crate::utils::hex;
use crate::Error;

pub mod factory;
pub mod record;

/// The local secrets of an oracle, matching its entry in the offchain config.
#[derive(Clone)]
pub struct DkgKeys {
    pub encryption_sk: Fr,
    pub signer: BlsSigner<Bls12_381>,
}

/// The payload of the DKG report.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct DkgReport {
    pub key_id: [u8; 32],
    pub public_key: G2Affine,
    /// Hashes of the share records the key was built from.
    pub hashes: Vec<[u8; 32]>,
}

impl DkgReport {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::with_capacity(self.compressed_size());
        self.serialize_compressed(&mut bytes)?;
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self::deserialize_compressed(bytes)?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DkgPhase {
    AwaitingShares,
    QuorumReached,
    KeyReportedOnchain,
}

struct DkgState {
    phase: DkgPhase,
    /// Own, received and persisted records, to answer re-attestation requests.
    share_records: ShareRecords,
    /// The hashes the key handed to the key consumer was built from.
    key_hashes: Option<Vec<[u8; 32]>>,
}

pub struct DkgPlugin {
    config_digest: ConfigDigest,
    key_id: KeyId,
    self_idx: PlayerIdx,
    t: usize,
    offchain_config: OffchainConfig,
    keys: DkgKeys,
    own_record: ShareRecord,
    key_consumer: Arc<dyn KeyConsumer>,
    contract: Arc<dyn OnchainContract>,
    persistence: Arc<dyn DkgSharePersistence>,
    state: Mutex<DkgState>,
    rng: Mutex<StdRng>,
    permit: Mutex<Option<RoundPermit>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, Error> {
    mutex.lock()
        .map_err(|_| Error::InvariantViolation("DKG plugin state lock poisoned"))
}

impl DkgPlugin {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config_digest: ConfigDigest,
        key_id: KeyId,
        self_idx: PlayerIdx,
        t: usize,
        offchain_config: OffchainConfig,
        keys: DkgKeys,
        key_consumer: Arc<dyn KeyConsumer>,
        contract: Arc<dyn OnchainContract>,
        persistence: Arc<dyn DkgSharePersistence>,
        mut rng: StdRng,
        permit: RoundPermit,
    ) -> Result<Self, Error> {
        let ceremony = Ceremony::setup(t, offchain_config.group, offchain_config.translator, &offchain_config.encryption_pks)?;

        // later writes supersede earlier records of the same dealer
        let mut share_records = ShareRecords::new();
        for persisted in persistence.read_share_records(&config_digest, &key_id)? {
            match ShareRecord::unmarshal(&persisted.marshalled) {
                Ok(r) => {
                    share_records.replace(r);
                }
                Err(e) => warn!(hash = %hex(&persisted.hash), error = %e, "dropping persisted share record"),
            }
        }
        let persisted = share_records.len();

        // a restarted node resumes with its persisted record, the key may already be built from it
        let own_record = match share_records.by_dealer(self_idx) {
            Some(record) => {
                info!(
                    config_digest = %config_digest,
                    key_id = %key_id,
                    dealer = %self_idx,
                    hash = %hex(record.hash()),
                    persisted,
                    "resuming with the persisted share record"
                );
                record.clone()
            }
            None => {
                let share_set = ceremony.deal(config_digest, self_idx, &mut rng)?;
                let record = ShareRecord::new(&share_set, &keys.signer)?;
                share_records.replace(record.clone());
                info!(
                    config_digest = %config_digest,
                    key_id = %key_id,
                    dealer = %self_idx,
                    hash = %hex(record.hash()),
                    persisted,
                    "dealt share set"
                );
                record
            }
        };

        Ok(Self {
            config_digest,
            key_id,
            self_idx,
            t,
            offchain_config,
            keys,
            own_record,
            key_consumer,
            contract,
            persistence,
            state: Mutex::new(DkgState {
                phase: DkgPhase::AwaitingShares,
                share_records,
                key_hashes: None,
            }),
            rng: Mutex::new(rng),
            permit: Mutex::new(Some(permit)),
        })
    }

    pub fn phase(&self) -> Result<DkgPhase, Error> {
        Ok(lock(&self.state)?.phase)
    }

    pub fn own_record(&self) -> &ShareRecord {
        &self.own_record
    }

    fn ceremony(&self) -> Result<Ceremony<'_>, Error> {
        let offchain = &self.offchain_config;
        Ceremony::setup(self.t, offchain.group, offchain.translator, &offchain.encryption_pks)
    }

    fn onchain_key(&self, ctx: &Context) -> Result<OnchainKeyData, Error> {
        ctx.check()?;
        let key = self.contract.get_key(ctx, &self.key_id, &self.config_digest)?;
        if key.public_key.is_some() {
            lock(&self.state)?.phase = DkgPhase::KeyReportedOnchain;
        }
        Ok(key)
    }

    /// Re-attests to a random record the on-chain key was built from.
    fn reattest(&self, onchain: &OnchainKeyData) -> Result<Vec<u8>, Error> {
        if onchain.hashes.is_empty() {
            return Err(Error::EmptyOnchainKey);
        }
        let i = lock(&self.rng)?.gen_range(0..onchain.hashes.len());
        let hash = &onchain.hashes[i];
        let state = lock(&self.state)?;
        let record = state.share_records.get(hash)
            .ok_or_else(|| Error::MissingShareRecord(hex(hash)))?;
        debug!(hash = %hex(hash), dealer = %record.dealer, "re-attesting share record");
        record.marshal()
    }

    fn validate_observations(&self, observations: &[AttributedObservation]) -> Result<ValidShareRecords, Error> {
        let ceremony = self.ceremony()?;
        let mut valid = ValidShareRecords::new();
        for o in observations {
            let result = ShareRecord::unmarshal(&o.observation)
                .and_then(|record| valid.process_share_set(
                    record,
                    &ceremony,
                    &self.offchain_config.signing_pks,
                    &self.config_digest,
                ));
            if let Err(e) = result {
                warn!(observer = o.observer, error = %e, "dropping share record");
            }
        }
        Ok(valid)
    }

    /// Hands the key built from the records to the key consumer and persists the records.
    fn publish_key(&self, ctx: &Context, valid: &ValidShareRecords) -> Result<G2Affine, Error> {
        let n = self.offchain_config.n();
        let key = valid.aggregate(n, self.t, self.self_idx, self.keys.encryption_sk)?;
        let public_key = key.public_key
            .ok_or(Error::InvariantViolation("aggregated key has no public key"))?;
        let hashes = valid.hashes();

        let mut state = lock(&self.state)?;
        if state.key_hashes.as_ref() != Some(&hashes) {
            self.key_consumer.new_key(self.key_id, key);
            state.key_hashes = Some(hashes);
        }
        for r in valid.iter() {
            if let Some(old) = state.share_records.replace(r.record.clone()) {
                debug!(dealer = %old.dealer, hash = %hex(old.hash()), "superseded the known record of the dealer");
            }
        }
        drop(state);

        let persisted = valid.iter()
            .map(|r| -> Result<PersistedShareRecord, Error> {
                Ok(PersistedShareRecord { hash: *r.record.hash(), marshalled: r.record.marshal()? })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        self.persistence.write_share_records(ctx, &self.config_digest, &self.key_id, &persisted)?;
        Ok(public_key)
    }

    /// Rebuilds the key from the records listed on-chain,
    /// if all of them have been observed in the round or are held locally.
    fn repair(&self, ctx: &Context, valid: &ValidShareRecords, onchain: &OnchainKeyData) -> Result<(), Error> {
        let onchain_pk = onchain.public_key.ok_or(Error::EmptyOnchainKey)?;
        let known = {
            let state = lock(&self.state)?;
            if state.key_hashes.as_ref() == Some(&onchain.hashes) {
                return Ok(());
            }
            state.share_records.clone()
        };
        let ceremony = self.ceremony()?;
        let restricted = valid.restrict_to(
            &onchain.hashes,
            &known,
            &ceremony,
            &self.offchain_config.signing_pks,
            &self.config_digest,
        );
        let restricted = match restricted {
            Ok(restricted) => restricted,
            Err(e) => {
                debug!(error = %e, observed = valid.valid_share_count(), "not all on-chain records observed yet");
                return Ok(());
            }
        };
        let n = self.offchain_config.n();
        let key = restricted.aggregate(n, self.t, self.self_idx, self.keys.encryption_sk)?;
        if key.public_key != Some(onchain_pk) {
            warn!(key_id = %self.key_id, "key rebuilt from the on-chain records differs from the on-chain key");
            return Ok(());
        }
        self.publish_key(ctx, &restricted)?;
        Ok(())
    }
}

impl ReportingPlugin for DkgPlugin {
    fn query(&self, _ctx: &Context, _ts: ReportTimestamp) -> Result<Vec<u8>, Error> {
        Ok(Vec::new())
    }

    fn observation(&self, ctx: &Context, _ts: ReportTimestamp, _query: &[u8]) -> Result<Vec<u8>, Error> {
        let onchain = self.onchain_key(ctx)?;
        if onchain.public_key.is_none() {
            return self.own_record.marshal();
        }
        self.reattest(&onchain)
    }

    fn report(
        &self,
        ctx: &Context,
        ts: ReportTimestamp,
        _query: &[u8],
        observations: &[AttributedObservation],
    ) -> Result<(bool, Vec<u8>), Error> {
        let valid = self.validate_observations(observations)?;
        let onchain = self.onchain_key(ctx)?;
        if onchain.public_key.is_some() {
            self.repair(ctx, &valid, &onchain)?;
            return Ok((false, Vec::new()));
        }

        let count = valid.valid_share_count();
        if count <= self.t {
            info!(epoch = ts.epoch, round = ts.round, valid = count, needed = self.t + 1, "not enough share records");
            return Ok((false, Vec::new()));
        }

        let public_key = self.publish_key(ctx, &valid)?;
        lock(&self.state)?.phase = DkgPhase::QuorumReached;
        let report = DkgReport {
            key_id: self.key_id.0,
            public_key,
            hashes: valid.hashes(),
        };
        info!(epoch = ts.epoch, round = ts.round, dealers = count, key_id = %self.key_id, "DKG quorum reached");
        Ok((true, report.encode()?))
    }

    fn should_accept_finalized_report(&self, _ctx: &Context, _ts: ReportTimestamp, _report: &[u8]) -> Result<bool, Error> {
        Ok(true)
    }

    fn should_transmit_accepted_report(&self, ctx: &Context, _ts: ReportTimestamp, _report: &[u8]) -> Result<bool, Error> {
        Ok(self.onchain_key(ctx)?.public_key.is_none())
    }

    /// Ends the round, another DKG plugin may be created afterwards.
    fn close(&self) -> Result<(), Error> {
        lock(&self.permit)?.take();
        Ok(())
    }
}
