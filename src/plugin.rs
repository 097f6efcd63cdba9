//! The callback contract of the round runtime.
//!
//! For every round the runtime calls `query` on the leader, `observation` on every oracle,
//! `report` on the leader with the attributed observations, then `should_accept_finalized_report`
//! and `should_transmit_accepted_report` on every oracle. Plugins only implement the callbacks,
//! scheduling and transport stay with the runtime.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::player_idx::{PlayerIdx, MAX_PLAYERS};
use crate::utils::hex;
use crate::Error;

/// Binds a committee membership and its parameters, all round state is scoped by it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigDigest(pub [u8; 32]);

impl fmt::Display for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

/// Ordinal of an oracle in the committee, `0..n`.
pub type OracleId = u8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportTimestamp {
    pub config_digest: ConfigDigest,
    pub epoch: u32,
    pub round: u8,
}

/// Cancellation handle passed to every callback.
///
/// Clones share the flag, the runtime keeps one to cancel the in-flight callback.
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with `Error::Cancelled` once the context is cancelled.
    /// Called before every external request.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributedObservation {
    pub observation: Vec<u8>,
    pub observer: OracleId,
}

/// What the runtime hands to a factory when a new committee configuration takes effect.
#[derive(Clone, Debug)]
pub struct ReportingPluginConfig {
    pub config_digest: ConfigDigest,
    /// This oracle's ordinal.
    pub oracle_id: OracleId,
    /// The committee size.
    pub n: usize,
    /// The maximal number of faulty oracles, the threshold of the shared key.
    pub f: usize,
    pub onchain_config: Vec<u8>,
    pub offchain_config: Vec<u8>,
}

impl ReportingPluginConfig {
    /// Checks `0 <= f < n <= MAX_PLAYERS`, so that `f + 1` honest contributions are always attainable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.n > MAX_PLAYERS {
            return Err(Error::TooManyPlayers { n: self.n, max: MAX_PLAYERS });
        }
        if self.f >= self.n {
            return Err(Error::InvalidThreshold { t: self.f, n: self.n });
        }
        Ok(())
    }

    pub fn threshold(&self) -> usize {
        self.f
    }

    pub fn self_idx(&self) -> Result<PlayerIdx, Error> {
        PlayerIdx::from_ordinal(self.oracle_id as usize, self.n)
    }
}

/// Limits the runtime enforces on the plugin's messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportingPluginInfo {
    pub name: &'static str,
    pub max_query_len: usize,
    pub max_observation_len: usize,
    pub max_report_len: usize,
}

/// The per-round callbacks.
///
/// The runtime may call into the plugin from several threads, implementations guard their state internally.
pub trait ReportingPlugin: Send + Sync {
    fn query(&self, ctx: &Context, ts: ReportTimestamp) -> Result<Vec<u8>, Error>;

    fn observation(&self, ctx: &Context, ts: ReportTimestamp, query: &[u8]) -> Result<Vec<u8>, Error>;

    /// Returns whether a report should be produced and its payload.
    fn report(
        &self,
        ctx: &Context,
        ts: ReportTimestamp,
        query: &[u8],
        observations: &[AttributedObservation],
    ) -> Result<(bool, Vec<u8>), Error>;

    fn should_accept_finalized_report(&self, ctx: &Context, ts: ReportTimestamp, report: &[u8]) -> Result<bool, Error>;

    fn should_transmit_accepted_report(&self, ctx: &Context, ts: ReportTimestamp, report: &[u8]) -> Result<bool, Error>;

    fn close(&self) -> Result<(), Error>;
}

pub trait ReportingPluginFactory {
    type Plugin: ReportingPlugin;

    fn new_reporting_plugin(&self, config: ReportingPluginConfig) -> Result<(Self::Plugin, ReportingPluginInfo), Error>;
}
