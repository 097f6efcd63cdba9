use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ark_std::rand::rngs::StdRng;
use ark_std::rand::SeedableRng;
use tracing::info;

use crate::config::{OffchainConfig, OnchainConfig};
use crate::contract::OnchainContract;
use crate::dkg::{DkgKeys, DkgPlugin};
use crate::key::KeyConsumer;
use crate::persistence::DkgSharePersistence;
use crate::plugin::{ReportingPluginConfig, ReportingPluginFactory, ReportingPluginInfo};
use crate::pvss::encryption::Point;
use crate::Error;

/// Admits a single DKG round at a time.
///
/// Clones share the flag, so one guard can be handed to every factory of the process.
#[derive(Clone, Debug, Default)]
pub struct RoundGuard {
    in_progress: Arc<AtomicBool>,
}

/// Held by the running round, releases the guard when dropped.
#[derive(Debug)]
pub struct RoundPermit {
    in_progress: Arc<AtomicBool>,
}

impl RoundGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails immediately with `Error::DkgInProgress` if a round is running.
    pub fn try_acquire(&self) -> Result<RoundPermit, Error> {
        self.in_progress.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::DkgInProgress)?;
        Ok(RoundPermit { in_progress: self.in_progress.clone() })
    }

    pub fn is_held(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }
}

impl Drop for RoundPermit {
    fn drop(&mut self) {
        self.in_progress.store(false, Ordering::Release);
    }
}

const MAX_REPORT_LEN: usize = 32 + 96 + 8 + 32 * crate::player_idx::MAX_PLAYERS;
const MAX_OBSERVATION_LEN: usize = 1 << 20;

pub struct DkgFactory {
    keys: DkgKeys,
    key_consumer: Arc<dyn KeyConsumer>,
    contract: Arc<dyn OnchainContract>,
    persistence: Arc<dyn DkgSharePersistence>,
    guard: RoundGuard,
    /// Seeds the plugins' randomness.
    rng: Mutex<StdRng>,
}

impl DkgFactory {
    pub fn new(
        keys: DkgKeys,
        key_consumer: Arc<dyn KeyConsumer>,
        contract: Arc<dyn OnchainContract>,
        persistence: Arc<dyn DkgSharePersistence>,
        guard: RoundGuard,
        rng: StdRng,
    ) -> Self {
        Self {
            keys,
            key_consumer,
            contract,
            persistence,
            guard,
            rng: Mutex::new(rng),
        }
    }

    /// The local keys must be the ones the config lists for this oracle.
    fn check_keys(&self, offchain: &OffchainConfig, config: &ReportingPluginConfig) -> Result<(), Error> {
        let idx = config.self_idx()?;
        let encryption_pk: Point = offchain.group.mul_generator(self.keys.encryption_sk);
        if *offchain.encryption_pk(idx)? != encryption_pk || *offchain.signing_pk(idx)? != self.keys.signer.bls_pk_g2 {
            return Err(Error::KeyMismatch);
        }
        Ok(())
    }
}

impl ReportingPluginFactory for DkgFactory {
    type Plugin = DkgPlugin;

    /// Starts a new DKG round, invalidating the key it replaces.
    fn new_reporting_plugin(&self, config: ReportingPluginConfig) -> Result<(DkgPlugin, ReportingPluginInfo), Error> {
        let permit = self.guard.try_acquire()?;
        config.validate()?;
        let onchain = OnchainConfig::decode(&config.onchain_config)?;
        let offchain = OffchainConfig::decode(&config.offchain_config)?;
        if offchain.n() != config.n {
            return Err(Error::LengthMismatch { what: "offchain config keys", expected: config.n, got: offchain.n() });
        }
        self.check_keys(&offchain, &config)?;

        self.key_consumer.key_invalidated(onchain.key_id);
        let rng = {
            let mut seeder = self.rng.lock()
                .map_err(|_| Error::InvariantViolation("DKG factory rng lock poisoned"))?;
            StdRng::from_rng(&mut *seeder)
                .map_err(|_| Error::InvariantViolation("unable to seed the plugin rng"))?
        };
        info!(
            config_digest = %config.config_digest,
            key_id = %onchain.key_id,
            n = config.n,
            t = config.threshold(),
            group = %offchain.group,
            translator = %offchain.translator,
            "starting DKG round"
        );
        let plugin = DkgPlugin::new(
            config.config_digest,
            onchain.key_id,
            config.self_idx()?,
            config.threshold(),
            offchain,
            self.keys.clone(),
            self.key_consumer.clone(),
            self.contract.clone(),
            self.persistence.clone(),
            rng,
            permit,
        )?;
        let info = ReportingPluginInfo {
            name: "dkg",
            max_query_len: 0,
            max_observation_len: MAX_OBSERVATION_LEN,
            max_report_len: MAX_REPORT_LEN,
        };
        Ok((plugin, info))
    }
}
