//! Recovery attestations: the committee threshold-signs pending account recovery requests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

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
use crate::signing::report::ReportSerializer;
use crate::signing::{aggregate, SigningKey};
use crate::Error;

const MAX_OBSERVATION_LEN: usize = 1 << 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, CanonicalSerialize, CanonicalDeserialize)]
pub struct RecoveryRequest {
    pub account: [u8; 20],
    pub recoverer: [u8; 20],
    pub nonce: u64,
}

impl RecoveryRequest {
    /// `account || recoverer || nonce`, big-endian.
    pub fn item(&self) -> [u8; 48] {
        let mut item = [0u8; 48];
        item[..20].copy_from_slice(&self.account);
        item[20..40].copy_from_slice(&self.recoverer);
        item[40..].copy_from_slice(&self.nonce.to_be_bytes());
        item
    }
}

pub trait RecoveryCoordinator: Send + Sync {
    fn pending_requests(&self, ctx: &Context) -> Result<Vec<RecoveryRequest>, Error>;

    fn report_is_onchain(&self, ctx: &Context, epoch: u32, round: u8) -> Result<bool, Error>;
}

#[derive(Clone, Debug)]
pub struct RecoveryArgs {
    pub key_id: KeyId,
    pub max_requests_per_report: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct RecoveryAttestation {
    pub request: RecoveryRequest,
    /// Threshold signature on the request if it's in a report, a partial signature in an observation.
    pub signature: G1Affine,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct RecoveryObservation {
    pub attestations: Vec<RecoveryAttestation>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct RecoveryReport {
    pub attestations: Vec<RecoveryAttestation>,
}

/// Requests this instance has seen through, owned by the plugin.
#[derive(Default)]
struct RecoveryState {
    /// Own partial signatures, valid for the key they were made with.
    signed: HashMap<RecoveryRequest, G1Affine>,
    signed_with: Option<G2Affine>,
    /// Requests in accepted reports, not to be signed again.
    reported: HashSet<RecoveryRequest>,
}

pub struct RecoveryPlugin {
    config_digest: ConfigDigest,
    self_idx: PlayerIdx,
    n: usize,
    args: RecoveryArgs,
    key_provider: Arc<dyn KeyProvider>,
    coordinator: Arc<dyn RecoveryCoordinator>,
    serializer: Arc<dyn ReportSerializer<RecoveryReport>>,
    state: Mutex<RecoveryState>,
}

impl RecoveryPlugin {
    fn state(&self) -> Result<MutexGuard<'_, RecoveryState>, Error> {
        self.state.lock()
            .map_err(|_| Error::InvariantViolation("recovery state lock poisoned"))
    }

    fn own_partial(&self, key: &SigningKey, request: &RecoveryRequest) -> Result<G1Affine, Error> {
        let mut state = self.state()?;
        if state.signed_with != Some(key.public_key) {
            state.signed.clear();
            state.signed_with = Some(key.public_key);
        }
        if let Some(partial) = state.signed.get(request) {
            return Ok(*partial);
        }
        let partial = key.partial_sign(key.message(&self.config_digest, &request.item())?)?.sig;
        state.signed.insert(*request, partial);
        Ok(partial)
    }
}

impl ReportingPlugin for RecoveryPlugin {
    fn query(&self, _ctx: &Context, _ts: ReportTimestamp) -> Result<Vec<u8>, Error> {
        Ok(Vec::new())
    }

    fn observation(&self, ctx: &Context, ts: ReportTimestamp, _query: &[u8]) -> Result<Vec<u8>, Error> {
        let key = SigningKey::lookup(self.key_provider.as_ref(), &self.args.key_id, self.self_idx)?;
        ctx.check()?;
        let pending: BTreeSet<RecoveryRequest> = self.coordinator.pending_requests(ctx)?.into_iter().collect();
        let requests: Vec<RecoveryRequest> = {
            let mut state = self.state()?;
            // requests the coordinator is done with
            state.signed.retain(|r, _| pending.contains(r));
            state.reported.retain(|r| pending.contains(r));
            pending.iter()
                .filter(|r| !state.reported.contains(r))
                .take(self.args.max_requests_per_report)
                .copied()
                .collect()
        };
        let attestations = requests.iter()
            .map(|request| -> Result<RecoveryAttestation, Error> {
                Ok(RecoveryAttestation { request: *request, signature: self.own_partial(&key, request)? })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        debug!(epoch = ts.epoch, round = ts.round, requests = attestations.len(), "observed recovery requests");
        let observation = RecoveryObservation { attestations };
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
        let key = SigningKey::lookup(self.key_provider.as_ref(), &self.args.key_id, self.self_idx)?;

        let mut decoded: BTreeMap<PlayerIdx, RecoveryObservation> = BTreeMap::new();
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
            match RecoveryObservation::deserialize_compressed(&o.observation[..]) {
                Ok(obs) => {
                    decoded.entry(signer).or_insert(obs);
                }
                Err(e) => warn!(observer = o.observer, error = %e, "malformed observation"),
            }
        }

        let mut claims: BTreeMap<RecoveryRequest, usize> = BTreeMap::new();
        for obs in decoded.values() {
            let requests: BTreeSet<RecoveryRequest> = obs.attestations.iter().map(|a| a.request).collect();
            for r in requests {
                *claims.entry(r).or_default() += 1;
            }
        }
        let reported = self.state()?.reported.clone();
        let messages = claims.into_iter()
            .filter(|(r, count)| *count > key.t && !reported.contains(r))
            .map(|(r, _)| -> Result<(RecoveryRequest, G1Affine), Error> { Ok((r, key.message(&self.config_digest, &r.item())?)) })
            .collect::<Result<BTreeMap<RecoveryRequest, G1Affine>, Error>>()?;
        let partials = decoded.iter()
            .flat_map(|(&signer, obs)| obs.attestations.iter()
                .map(move |a| (a.request, PartialSig::<Bls12_381> { signer, sig: a.signature })));
        let attestations: Vec<RecoveryAttestation> = aggregate(&key, &messages, partials).into_iter()
            .take(self.args.max_requests_per_report)
            .map(|(request, signature)| RecoveryAttestation { request, signature })
            .collect();
        if attestations.is_empty() {
            debug!(epoch = ts.epoch, round = ts.round, "no recovery request reached a quorum");
            return Ok((false, Vec::new()));
        }
        info!(epoch = ts.epoch, round = ts.round, attestations = attestations.len(), "recovery report");
        let bytes = self.serializer.serialize_report(&RecoveryReport { attestations })?;
        Ok((true, bytes))
    }

    fn should_accept_finalized_report(&self, ctx: &Context, ts: ReportTimestamp, report: &[u8]) -> Result<bool, Error> {
        let report = self.serializer.deserialize_report(report)?;
        if report.attestations.is_empty() {
            return Ok(false);
        }
        ctx.check()?;
        if self.coordinator.report_is_onchain(ctx, ts.epoch, ts.round)? {
            return Ok(false);
        }
        let mut state = self.state()?;
        for a in &report.attestations {
            state.reported.insert(a.request);
            state.signed.remove(&a.request);
        }
        Ok(true)
    }

    fn should_transmit_accepted_report(&self, ctx: &Context, ts: ReportTimestamp, _report: &[u8]) -> Result<bool, Error> {
        ctx.check()?;
        Ok(!self.coordinator.report_is_onchain(ctx, ts.epoch, ts.round)?)
    }

    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

pub struct RecoveryFactory {
    pub args: RecoveryArgs,
    pub key_provider: Arc<dyn KeyProvider>,
    pub coordinator: Arc<dyn RecoveryCoordinator>,
    pub serializer: Arc<dyn ReportSerializer<RecoveryReport>>,
}

impl ReportingPluginFactory for RecoveryFactory {
    type Plugin = RecoveryPlugin;

    fn new_reporting_plugin(&self, config: ReportingPluginConfig) -> Result<(RecoveryPlugin, ReportingPluginInfo), Error> {
        config.validate()?;
        let plugin = RecoveryPlugin {
            config_digest: config.config_digest,
            self_idx: config.self_idx()?,
            n: config.n,
            args: self.args.clone(),
            key_provider: self.key_provider.clone(),
            coordinator: self.coordinator.clone(),
            serializer: self.serializer.clone(),
            state: Mutex::new(RecoveryState::default()),
        };
        let info = ReportingPluginInfo {
            name: "recovery",
            max_query_len: 0,
            max_observation_len: MAX_OBSERVATION_LEN,
            max_report_len: self.serializer.max_report_length(),
        };
        Ok((plugin, info))
    }
}

#[cfg(test)]
mod tests {
    use ark_std::test_rng;

    use super::*;
    use crate::bls::vanilla;
    use crate::mocks::{dummy_dkg, MockRecoveryCoordinator};
    use crate::signing::report::CanonicalReportSerializer;

    const KEY_ID: KeyId = KeyId([3; 32]);

    fn request(nonce: u64) -> RecoveryRequest {
        RecoveryRequest { account: [1; 20], recoverer: [2; 20], nonce }
    }

    fn plugins(n: usize, coordinator: &Arc<MockRecoveryCoordinator>) -> Vec<RecoveryPlugin> {
        let stores = dummy_dkg(n, 1, KEY_ID, &mut test_rng());
        stores.into_iter().enumerate()
            .map(|(i, store)| {
                let factory = RecoveryFactory {
                    args: RecoveryArgs { key_id: KEY_ID, max_requests_per_report: 2 },
                    key_provider: Arc::new(store),
                    coordinator: coordinator.clone(),
                    serializer: Arc::new(CanonicalReportSerializer::<RecoveryReport>::new(1 << 12)),
                };
                let config = ReportingPluginConfig {
                    config_digest: ConfigDigest([4; 32]),
                    oracle_id: i as u8,
                    n,
                    f: 1,
                    onchain_config: vec![],
                    offchain_config: vec![],
                };
                factory.new_reporting_plugin(config).unwrap().0
            })
            .collect()
    }

    #[test]
    fn requests_are_attested_once() {
        let coordinator = Arc::new(MockRecoveryCoordinator::default());
        coordinator.set_pending(vec![request(3), request(1), request(2)]);
        let plugins = plugins(4, &coordinator);
        let ctx = Context::new();
        let ts = ReportTimestamp { config_digest: ConfigDigest([4; 32]), epoch: 1, round: 1 };

        let observations: Vec<AttributedObservation> = plugins.iter().enumerate()
            .map(|(i, p)| AttributedObservation { observation: p.observation(&ctx, ts, &[]).unwrap(), observer: i as u8 })
            .collect();
        let (should_report, bytes) = plugins[0].report(&ctx, ts, &[], &observations[..2]).unwrap();
        assert!(should_report);
        let report = CanonicalReportSerializer::<RecoveryReport>::new(1 << 12).deserialize_report(&bytes).unwrap();
        // capped at 2 requests per report, in order
        let requests: Vec<_> = report.attestations.iter().map(|a| a.request).collect();
        assert_eq!(requests, vec![request(1), request(2)]);
        let key = SigningKey::lookup(plugins[0].key_provider.as_ref(), &KEY_ID, plugins[0].self_idx).unwrap();
        for a in &report.attestations {
            let m = key.message(&ConfigDigest([4; 32]), &a.request.item()).unwrap();
            assert!(vanilla::verify::<Bls12_381>(key.public_key, m, a.signature));
        }

        assert!(plugins[0].should_accept_finalized_report(&ctx, ts, &bytes).unwrap());
        assert!(plugins[0].should_transmit_accepted_report(&ctx, ts, &bytes).unwrap());
        // the accepted requests are left out of the next observation of the instance, not of the others
        let next = RecoveryObservation::deserialize_compressed(&plugins[0].observation(&ctx, ts, &[]).unwrap()[..]).unwrap();
        assert_eq!(next.attestations.iter().map(|a| a.request).collect::<Vec<_>>(), vec![request(3)]);
        let other = RecoveryObservation::deserialize_compressed(&plugins[1].observation(&ctx, ts, &[]).unwrap()[..]).unwrap();
        assert_eq!(other.attestations.len(), 2);

        coordinator.mark_onchain(ts.epoch, ts.round);
        assert!(!plugins[1].should_accept_finalized_report(&ctx, ts, &bytes).unwrap());
        assert!(!plugins[1].should_transmit_accepted_report(&ctx, ts, &bytes).unwrap());
    }

    #[test]
    fn forged_partials_dont_count() {
        let coordinator = Arc::new(MockRecoveryCoordinator::default());
        coordinator.set_pending(vec![request(1)]);
        let plugins = plugins(4, &coordinator);
        let ctx = Context::new();
        let ts = ReportTimestamp { config_digest: ConfigDigest([4; 32]), epoch: 1, round: 1 };

        let honest = plugins[0].observation(&ctx, ts, &[]).unwrap();
        let mut forged = RecoveryObservation::deserialize_compressed(&plugins[1].observation(&ctx, ts, &[]).unwrap()[..]).unwrap();
        forged.attestations[0].signature = RecoveryObservation::deserialize_compressed(&honest[..]).unwrap().attestations[0].signature;
        let mut forged_bytes = Vec::new();
        forged.serialize_compressed(&mut forged_bytes).unwrap();

        let observations = vec![
            AttributedObservation { observation: honest.clone(), observer: 0 },
            AttributedObservation { observation: forged_bytes, observer: 1 },
        ];
        assert_eq!(plugins[2].report(&ctx, ts, &[], &observations).unwrap(), (false, Vec::new()));
        // the same observation under another oracle's name doesn't count either
        let replayed = vec![
            AttributedObservation { observation: honest.clone(), observer: 0 },
            AttributedObservation { observation: honest, observer: 2 },
        ];
        assert!(!plugins[2].report(&ctx, ts, &[], &replayed).unwrap().0);
    }

    #[test]
    fn state_follows_the_pending_requests() {
        let coordinator = Arc::new(MockRecoveryCoordinator::default());
        coordinator.set_pending(vec![request(1), request(2)]);
        let plugins = plugins(4, &coordinator);
        let ctx = Context::new();
        let ts = ReportTimestamp { config_digest: ConfigDigest([4; 32]), epoch: 1, round: 1 };

        let observations: Vec<AttributedObservation> = plugins.iter().enumerate()
            .map(|(i, p)| AttributedObservation { observation: p.observation(&ctx, ts, &[]).unwrap(), observer: i as u8 })
            .collect();
        let (_, bytes) = plugins[0].report(&ctx, ts, &[], &observations).unwrap();
        assert!(plugins[0].should_accept_finalized_report(&ctx, ts, &bytes).unwrap());
        assert_eq!(plugins[0].state().unwrap().reported.len(), 2);
        assert_eq!(plugins[1].state().unwrap().signed.len(), 2);

        // both requests are served, a new one comes in
        coordinator.set_pending(vec![request(3)]);
        for p in &plugins[..2] {
            let next = RecoveryObservation::deserialize_compressed(&p.observation(&ctx, ts, &[]).unwrap()[..]).unwrap();
            assert_eq!(next.attestations.iter().map(|a| a.request).collect::<Vec<_>>(), vec![request(3)]);
            let state = p.state().unwrap();
            assert!(state.reported.is_empty());
            assert_eq!(state.signed.keys().copied().collect::<Vec<_>>(), vec![request(3)]);
        }
    }

    #[test]
    fn report_cap_applies_to_signed_requests() {
        let coordinator = Arc::new(MockRecoveryCoordinator::default());
        coordinator.set_pending(vec![request(1), request(2), request(3)]);
        let plugins = plugins(4, &coordinator);
        let ctx = Context::new();
        let ts = ReportTimestamp { config_digest: ConfigDigest([4; 32]), epoch: 1, round: 1 };

        // oracles observe requests 1 and 2, request 3 is attested to out of band,
        // oracles 0 and 1 claim request 1 with their partial on request 2
        let observations: Vec<AttributedObservation> = plugins.iter().enumerate()
            .map(|(i, p)| {
                let mut obs = RecoveryObservation::deserialize_compressed(&p.observation(&ctx, ts, &[]).unwrap()[..]).unwrap();
                if i < 2 {
                    obs.attestations[0].signature = obs.attestations[1].signature;
                }
                let key = SigningKey::lookup(p.key_provider.as_ref(), &KEY_ID, p.self_idx).unwrap();
                obs.attestations.push(RecoveryAttestation { request: request(3), signature: p.own_partial(&key, &request(3)).unwrap() });
                let mut observation = Vec::new();
                obs.serialize_compressed(&mut observation).unwrap();
                AttributedObservation { observation, observer: i as u8 }
            })
            .collect();
        let (should_report, bytes) = plugins[3].report(&ctx, ts, &[], &observations[..3]).unwrap();
        assert!(should_report);
        let report = CanonicalReportSerializer::<RecoveryReport>::new(1 << 12).deserialize_report(&bytes).unwrap();
        // request 1 has no quorum of valid partials, it doesn't take a slot
        assert_eq!(report.attestations.iter().map(|a| a.request).collect::<Vec<_>>(), vec![request(2), request(3)]);
    }
}
