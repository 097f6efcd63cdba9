//! Verifiable randomness beacon: the threshold signature on a block is its beacon output.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use ark_bls12_381::{Bls12_381, G1Affine, G2Affine};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use tracing::{debug, info, warn};

use crate::bls::threshold::PartialSig;
use crate::key::{KeyId, KeyProvider};
use crate::player_idx::PlayerIdx;
use crate::plugin::{
    AttributedObservation, ConfigDigest, Context, ReportTimestamp, ReportingPlugin, ReportingPluginConfig,
    ReportingPluginFactory, ReportingPluginInfo,
};
use crate::signing::report::{AbstractReport, Callback, ReportSerializer, VrfOutput};
use crate::signing::{aggregate, consensus_block, median_of, SigningKey};
use crate::Error;

const MAX_OBSERVATION_LEN: usize = 1 << 16;

#[derive(Clone, Debug)]
pub struct VrfBeaconArgs {
    pub key_id: KeyId,
    /// Blocks at heights divisible by the period get a beacon output.
    pub period: u64,
    /// The confirmation delays requesters may choose from.
    pub confirmation_delays: Vec<u32>,
    pub lookback_blocks: u64,
    pub max_blocks_per_report: usize,
    pub max_callbacks_per_report: usize,
}

impl VrfBeaconArgs {
    pub fn validate(&self) -> Result<(), Error> {
        if self.period == 0 {
            return Err(Error::InvariantViolation("beacon period must be positive"));
        }
        let distinct: BTreeSet<u32> = self.confirmation_delays.iter().copied().collect();
        if distinct.is_empty() || distinct.len() != self.confirmation_delays.len() {
            return Err(Error::InvariantViolation("confirmation delays must be distinct and non-empty"));
        }
        Ok(())
    }
}

/// A block awaiting its beacon output, at `height + confirmation_delay` it becomes signable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, CanonicalSerialize, CanonicalDeserialize)]
pub struct Block {
    pub height: u64,
    pub confirmation_delay: u32,
    pub hash: [u8; 32],
}

impl Block {
    /// The signed item, `height || confirmation_delay || hash`, big-endian.
    pub fn item(&self) -> [u8; 44] {
        let mut item = [0u8; 44];
        item[..8].copy_from_slice(&self.height.to_be_bytes());
        item[8..12].copy_from_slice(&self.confirmation_delay.to_be_bytes());
        item[12..].copy_from_slice(&self.hash);
        item
    }
}

/// What the coordinator contract is waiting for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportBlocks {
    pub blocks: Vec<Block>,
    pub callbacks: Vec<Callback>,
    pub recent_height: u64,
    pub recent_hash: [u8; 32],
}

/// The beacon coordinator contract and the chain it lives on.
pub trait Coordinator: Send + Sync {
    fn report_blocks(
        &self,
        ctx: &Context,
        period: u64,
        confirmation_delays: &[u32],
        lookback_blocks: u64,
        max_blocks: usize,
        max_callbacks: usize,
    ) -> Result<ReportBlocks, Error>;

    /// Called once the report is accepted, so that the coordinator stops offering its blocks and callbacks.
    fn report_will_be_transmitted(&self, ctx: &Context, report: &AbstractReport) -> Result<(), Error>;

    fn report_is_onchain(&self, ctx: &Context, epoch: u32, round: u8) -> Result<bool, Error>;

    fn current_height(&self, ctx: &Context) -> Result<u64, Error>;

    fn juels_per_fee_coin(&self, ctx: &Context) -> Result<u64, Error>;

    fn reasonable_gas_price(&self, ctx: &Context) -> Result<u64, Error>;
}

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct BlockProof {
    pub block: Block,
    pub partial: G1Affine,
}

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct VrfObservation {
    pub proofs: Vec<BlockProof>,
    pub callbacks: Vec<Callback>,
    pub juels_per_fee_coin: u64,
    pub reasonable_gas_price: u64,
    pub recent_height: u64,
    pub recent_hash: [u8; 32],
}

/// Own partial signatures by block, valid while the key doesn't change.
#[derive(Default)]
struct BlockwiseProofCache {
    public_key: Option<G2Affine>,
    proofs: HashMap<Block, G1Affine>,
}

pub struct VrfBeaconPlugin {
    config_digest: ConfigDigest,
    self_idx: PlayerIdx,
    n: usize,
    args: VrfBeaconArgs,
    key_provider: Arc<dyn KeyProvider>,
    coordinator: Arc<dyn Coordinator>,
    serializer: Arc<dyn ReportSerializer<AbstractReport>>,
    proof_cache: RwLock<BlockwiseProofCache>,
    /// Reports built in `report`, by round, until they're accepted.
    pending: RwLock<HashMap<ReportTimestamp, AbstractReport>>,
}

impl VrfBeaconPlugin {
    fn key(&self) -> Result<SigningKey, Error> {
        SigningKey::lookup(self.key_provider.as_ref(), &self.args.key_id, self.self_idx)
    }

    /// Whether the block is due an output under the plugin's configuration.
    fn is_beacon_block(&self, block: &Block) -> bool {
        block.height % self.args.period == 0
            && self.args.confirmation_delays.contains(&block.confirmation_delay)
    }

    fn own_partial(&self, key: &SigningKey, block: &Block) -> Result<G1Affine, Error> {
        {
            let cache = self.proof_cache.read()
                .map_err(|_| Error::InvariantViolation("proof cache lock poisoned"))?;
            if cache.public_key == Some(key.public_key) {
                if let Some(partial) = cache.proofs.get(block) {
                    return Ok(*partial);
                }
            }
        }
        let partial = key.partial_sign(key.message(&self.config_digest, &block.item())?)?;
        let mut cache = self.proof_cache.write()
            .map_err(|_| Error::InvariantViolation("proof cache lock poisoned"))?;
        if cache.public_key != Some(key.public_key) {
            *cache = BlockwiseProofCache { public_key: Some(key.public_key), proofs: HashMap::new() };
        }
        cache.proofs.insert(*block, partial.sig);
        Ok(partial.sig)
    }

    /// Forgets the partials on blocks below `min_height`, the coordinator doesn't ask for them anymore.
    fn evict_proofs(&self, min_height: u64) -> Result<(), Error> {
        let mut cache = self.proof_cache.write()
            .map_err(|_| Error::InvariantViolation("proof cache lock poisoned"))?;
        let before = cache.proofs.len();
        cache.proofs.retain(|block, _| block.height >= min_height);
        if cache.proofs.len() < before {
            debug!(evicted = before - cache.proofs.len(), min_height, "evicted cached partials");
        }
        Ok(())
    }

    /// The decoded observations by signer, the first one of each oracle.
    fn decode_observations(&self, observations: &[AttributedObservation]) -> BTreeMap<PlayerIdx, VrfObservation> {
        let mut decoded = BTreeMap::new();
        for o in observations {
            let signer = match PlayerIdx::from_ordinal(o.observer as usize, self.n) {
                Ok(signer) => signer,
                Err(e) => {
                    warn!(observer = o.observer, error = %e, "observation from a stranger");
                    continue;
                }
            };
            if o.observation.len() > MAX_OBSERVATION_LEN {
                warn!(observer = o.observer, len = o.observation.len(), "observation too long");
                continue;
            }
            match VrfObservation::deserialize_compressed(&o.observation[..]) {
                Ok(obs) => {
                    decoded.entry(signer).or_insert(obs);
                }
                Err(e) => warn!(observer = o.observer, error = %e, "malformed observation"),
            }
        }
        decoded
    }
}

impl ReportingPlugin for VrfBeaconPlugin {
    fn query(&self, _ctx: &Context, _ts: ReportTimestamp) -> Result<Vec<u8>, Error> {
        Ok(Vec::new())
    }

    fn observation(&self, ctx: &Context, ts: ReportTimestamp, _query: &[u8]) -> Result<Vec<u8>, Error> {
        let key = self.key()?;
        ctx.check()?;
        let pending = self.coordinator.report_blocks(
            ctx,
            self.args.period,
            &self.args.confirmation_delays,
            self.args.lookback_blocks,
            self.args.max_blocks_per_report,
            self.args.max_callbacks_per_report,
        )?;
        ctx.check()?;
        let current_height = self.coordinator.current_height(ctx)?;
        self.evict_proofs(current_height.saturating_sub(self.args.lookback_blocks))?;

        let mut proofs = Vec::with_capacity(pending.blocks.len());
        for block in pending.blocks {
            if !self.is_beacon_block(&block) {
                debug!(height = block.height, delay = block.confirmation_delay, "skipping block, not a beacon block");
                continue;
            }
            if block.height.saturating_add(block.confirmation_delay as u64) > current_height {
                debug!(height = block.height, delay = block.confirmation_delay, current_height, "skipping unconfirmed block");
                continue;
            }
            let partial = self.own_partial(&key, &block)?;
            proofs.push(BlockProof { block, partial });
        }
        let signed: HashSet<(u64, u32)> = proofs.iter()
            .map(|p| (p.block.height, p.block.confirmation_delay))
            .collect();
        let callbacks: Vec<Callback> = pending.callbacks.into_iter()
            .filter(|c| signed.contains(&(c.beacon_height, c.confirmation_delay)))
            .collect();

        ctx.check()?;
        let juels_per_fee_coin = self.coordinator.juels_per_fee_coin(ctx)?;
        ctx.check()?;
        let reasonable_gas_price = self.coordinator.reasonable_gas_price(ctx)?;
        debug!(epoch = ts.epoch, round = ts.round, blocks = proofs.len(), callbacks = callbacks.len(), "observed");

        let observation = VrfObservation {
            proofs,
            callbacks,
            juels_per_fee_coin,
            reasonable_gas_price,
            recent_height: pending.recent_height,
            recent_hash: pending.recent_hash,
        };
        let mut bytes = Vec::with_capacity(observation.compressed_size());
        observation.serialize_compressed(&mut bytes)?;
        Ok(bytes)
    }

    fn report(
        &self,
        ctx: &Context,
        ts: ReportTimestamp,
        _query: &[u8],
        observations: &[AttributedObservation],
    ) -> Result<(bool, Vec<u8>), Error> {
        ctx.check()?;
        let key = self.key()?;
        let decoded = self.decode_observations(observations);

        // only blocks claimed by enough oracles are worth the pairings
        let mut claims: BTreeMap<Block, usize> = BTreeMap::new();
        for obs in decoded.values() {
            let blocks: BTreeSet<Block> = obs.proofs.iter().map(|p| p.block).collect();
            for block in blocks {
                *claims.entry(block).or_default() += 1;
            }
        }
        let messages = claims.into_iter()
            .filter(|(block, count)| *count > key.t && self.is_beacon_block(block))
            .map(|(block, _)| -> Result<(Block, G1Affine), Error> { Ok((block, key.message(&self.config_digest, &block.item())?)) })
            .collect::<Result<BTreeMap<Block, G1Affine>, Error>>()?;
        let partials = decoded.iter()
            .flat_map(|(&signer, obs)| obs.proofs.iter()
                .map(move |p| (p.block, PartialSig::<Bls12_381> { signer, sig: p.partial })));
        let proofs = aggregate(&key, &messages, partials);

        // callbacks observed by more than `t` oracles
        let mut callback_votes: BTreeMap<&Callback, usize> = BTreeMap::new();
        for obs in decoded.values() {
            let callbacks: BTreeSet<&Callback> = obs.callbacks.iter().collect();
            for c in callbacks {
                *callback_votes.entry(c).or_default() += 1;
            }
        }
        let mut outputs: BTreeMap<(u64, u32), VrfOutput> = BTreeMap::new();
        // at most `max_blocks_per_report` of the verified outputs
        for (block, proof) in proofs {
            if outputs.len() >= self.args.max_blocks_per_report {
                debug!(height = block.height, delay = block.confirmation_delay, "report full, block left for later");
                continue;
            }
            if outputs.contains_key(&(block.height, block.confirmation_delay)) {
                warn!(height = block.height, delay = block.confirmation_delay, "conflicting block hashes, keeping one");
                continue;
            }
            outputs.insert((block.height, block.confirmation_delay), VrfOutput {
                beacon_height: block.height,
                confirmation_delay: block.confirmation_delay,
                proof,
                callbacks: Vec::new(),
            });
        }
        let mut included = 0;
        for (c, votes) in callback_votes {
            if votes <= key.t || included >= self.args.max_callbacks_per_report {
                continue;
            }
            if let Some(output) = outputs.get_mut(&(c.beacon_height, c.confirmation_delay)) {
                output.callbacks.push(c.clone());
                included += 1;
            }
        }

        let juels: Vec<u64> = decoded.values().map(|o| o.juels_per_fee_coin).collect();
        let gas: Vec<u64> = decoded.values().map(|o| o.reasonable_gas_price).collect();
        let recent = consensus_block(decoded.values().map(|o| (o.recent_height, o.recent_hash)), key.t);
        let (Some(juels_per_fee_coin), Some(reasonable_gas_price), Some((recent_block_height, recent_block_hash))) =
            (median_of(&juels, key.t), median_of(&gas, key.t), recent) else {
            info!(epoch = ts.epoch, round = ts.round, observations = decoded.len(), "no consensus on the chain state");
            return Ok((false, Vec::new()));
        };
        if outputs.is_empty() {
            debug!(epoch = ts.epoch, round = ts.round, "nothing to report");
            return Ok((false, Vec::new()));
        }

        let report = AbstractReport {
            outputs: outputs.into_values().collect(),
            juels_per_fee_coin,
            reasonable_gas_price,
            recent_block_height,
            recent_block_hash,
        };
        let bytes = self.serializer.serialize_report(&report)?;
        info!(epoch = ts.epoch, round = ts.round, outputs = report.outputs.len(), callbacks = included, "beacon report");
        let mut pending = self.pending.write()
            .map_err(|_| Error::InvariantViolation("pending reports lock poisoned"))?;
        // reports of earlier rounds that never got accepted
        pending.retain(|earlier, _| *earlier >= ts);
        pending.insert(ts, report);
        Ok((true, bytes))
    }

    fn should_accept_finalized_report(&self, ctx: &Context, ts: ReportTimestamp, report: &[u8]) -> Result<bool, Error> {
        let cached = self.pending.write()
            .map_err(|_| Error::InvariantViolation("pending reports lock poisoned"))?
            .remove(&ts);
        let report = match cached {
            Some(r) => r,
            None => self.serializer.deserialize_report(report)?,
        };
        if report.outputs.is_empty() {
            return Ok(false);
        }
        ctx.check()?;
        if self.coordinator.report_is_onchain(ctx, ts.epoch, ts.round)? {
            debug!(epoch = ts.epoch, round = ts.round, "report already on-chain");
            return Ok(false);
        }
        ctx.check()?;
        self.coordinator.report_will_be_transmitted(ctx, &report)?;
        Ok(true)
    }

    fn should_transmit_accepted_report(&self, ctx: &Context, ts: ReportTimestamp, _report: &[u8]) -> Result<bool, Error> {
        ctx.check()?;
        Ok(!self.coordinator.report_is_onchain(ctx, ts.epoch, ts.round)?)
    }

    fn close(&self) -> Result<(), Error> {
        if let Ok(mut pending) = self.pending.write() {
            pending.clear();
        }
        Ok(())
    }
}

pub struct VrfBeaconFactory {
    pub args: VrfBeaconArgs,
    pub key_provider: Arc<dyn KeyProvider>,
    pub coordinator: Arc<dyn Coordinator>,
    pub serializer: Arc<dyn ReportSerializer<AbstractReport>>,
}

impl ReportingPluginFactory for VrfBeaconFactory {
    type Plugin = VrfBeaconPlugin;

    fn new_reporting_plugin(&self, config: ReportingPluginConfig) -> Result<(VrfBeaconPlugin, ReportingPluginInfo), Error> {
        config.validate()?;
        self.args.validate()?;
        let plugin = VrfBeaconPlugin {
            config_digest: config.config_digest,
            self_idx: config.self_idx()?,
            n: config.n,
            args: self.args.clone(),
            key_provider: self.key_provider.clone(),
            coordinator: self.coordinator.clone(),
            serializer: self.serializer.clone(),
            proof_cache: RwLock::new(BlockwiseProofCache::default()),
            pending: RwLock::new(HashMap::new()),
        };
        let info = ReportingPluginInfo {
            name: "vrf-beacon",
            max_query_len: 0,
            max_observation_len: MAX_OBSERVATION_LEN,
            max_report_len: self.serializer.max_report_length(),
        };
        Ok((plugin, info))
    }
}
