//! Threshold signing of per-round items with a distributed key.
//!
//! An item is signed on the point `H(config digest || public key || item)` in G1. Every oracle
//! observes its partial signatures, the report interpolates the partials of more than `t`
//! distinct oracles and keeps only the signatures that verify against the distributed key.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use ark_bls12_381::{Bls12_381, Fr, G1Affine, G2Affine};
use ark_serialize::CanonicalSerialize;
use tracing::{debug, warn};

use crate::bls::agg::{Session, SignatureAggregator};
use crate::bls::threshold::{partial_sign, verify_partial, PartialSig};
use crate::hash::{hash_to_g1, THRESHOLD_MESSAGE_DST};
use crate::key::{KeyId, KeyProvider};
use crate::player_idx::PlayerIdx;
use crate::plugin::ConfigDigest;
use crate::utils::median;
use crate::Error;

pub mod recovery;
pub mod report;
pub mod vrf;

/// The distributed key material of this oracle, looked up before every observation and report.
#[derive(Clone, Debug)]
pub struct SigningKey {
    pub key_id: KeyId,
    pub self_idx: PlayerIdx,
    pub t: usize,
    pub public_key: G2Affine,
    pub public_shares: Vec<G2Affine>,
    secret_share: Fr,
}

impl SigningKey {
    /// Fails with `Error::KeyUnavailable` while there's no current key.
    pub fn lookup(provider: &dyn KeyProvider, key_id: &KeyId, self_idx: PlayerIdx) -> Result<Self, Error> {
        let key = provider.key_lookup(key_id);
        let (public_key, secret_share) = key.signing_material(key_id)?;
        self_idx.index(&key.public_shares)?;
        Ok(Self {
            key_id: *key_id,
            self_idx,
            t: key.threshold,
            public_key,
            public_shares: key.public_shares,
            secret_share,
        })
    }

    /// The point the committee signs for the item.
    pub fn message(&self, config_digest: &ConfigDigest, item: &[u8]) -> Result<G1Affine, Error> {
        let mut input = Vec::with_capacity(32 + 96 + item.len());
        input.extend_from_slice(&config_digest.0);
        self.public_key.serialize_compressed(&mut input)?;
        input.extend_from_slice(item);
        hash_to_g1(THRESHOLD_MESSAGE_DST, &input)
    }

    /// Signs the message with the secret share, checking the result before it leaves the node.
    pub fn partial_sign(&self, message: G1Affine) -> Result<PartialSig<Bls12_381>, Error> {
        let partial = partial_sign::<Bls12_381>(self.self_idx, self.secret_share, message);
        let public_share = *self.self_idx.index(&self.public_shares)?;
        verify_partial(message, public_share, &partial)
            .map_err(|_| Error::InvariantViolation("own partial signature failed the pairing check"))?;
        Ok(partial)
    }

    pub fn aggregator(&self) -> SignatureAggregator<'_, Bls12_381> {
        SignatureAggregator::new(self.t, self.public_key, &self.public_shares)
    }
}

/// Recovers the signatures on the items from the observed partials.
///
/// Partials from unknown or repeated signers, and partials that don't verify, are dropped.
/// An item is signed only if more than `t` valid partials were observed for it and
/// the recovered signature verifies, the other items are left out.
pub fn aggregate<K: Ord + Clone + Debug>(
    key: &SigningKey,
    messages: &BTreeMap<K, G1Affine>,
    partials: impl IntoIterator<Item=(K, PartialSig<Bls12_381>)>,
) -> BTreeMap<K, G1Affine> {
    let aggregator = key.aggregator();
    let mut sessions: BTreeMap<K, Session<'_, Bls12_381>> = messages.iter()
        .map(|(item, &m)| (item.clone(), aggregator.start_session(m)))
        .collect();
    for (item, partial) in partials {
        let Some(session) = sessions.get_mut(&item) else {
            debug!(item = ?item, signer = %partial.signer, "partial signature on an unknown item");
            continue;
        };
        if let Err(e) = session.append_verify_sig(partial) {
            warn!(item = ?item, signer = %partial.signer, error = %e, "dropping partial signature");
        }
    }
    sessions.into_iter()
        .filter_map(|(item, session)| {
            let count = session.count();
            if count <= key.t {
                debug!(item = ?item, partials = count, needed = key.t + 1, "not enough partial signatures");
                return None;
            }
            match session.finalize() {
                Ok(sig) => Some((item, sig)),
                Err(e) => {
                    warn!(item = ?item, error = %e, "dropping unverifiable signature");
                    None
                }
            }
        })
        .collect()
}

/// The most recent block most of the oracles agree on.
///
/// The pair observed the most times wins if it's observed more than `t` times,
/// ties go to the greater height, then to the numerically greater hash.
pub fn consensus_block<I: IntoIterator<Item=(u64, [u8; 32])>>(observed: I, t: usize) -> Option<(u64, [u8; 32])> {
    let mut counts: HashMap<(u64, [u8; 32]), usize> = HashMap::new();
    for block in observed {
        *counts.entry(block).or_default() += 1;
    }
    counts.into_iter()
        .filter(|(_, count)| *count > t)
        .max_by_key(|&((height, hash), count)| (count, height, hash))
        .map(|(block, _)| block)
}

/// The median of the values reported by the oracles, `None` unless more than `t` reported.
pub fn median_of(values: &[u64], t: usize) -> Option<u64> {
    if values.len() <= t {
        return None;
    }
    median(values)
}
