use ark_ec::pairing::Pairing;

use crate::bls::threshold::{recover, verify_partial, PartialSig, ThresholdVk};
use crate::player_idx::PlayerIdx;
use crate::Error;

/// Public material of a distributed key needed to aggregate signatures with it.
pub struct SignatureAggregator<'a, C: Pairing> {
    /// The threshold, `t + 1` partial signatures make a signature.
    pub(crate) t: usize,
    pub(crate) vk: ThresholdVk<C>,
    /// `pk_j = s_j.g2`, in the order of the players.
    pub(crate) public_shares: &'a [C::G2Affine],
}

impl<'a, C: Pairing> SignatureAggregator<'a, C> {
    pub fn new(t: usize, pk: C::G2Affine, public_shares: &'a [C::G2Affine]) -> Self {
        Self {
            t,
            vk: ThresholdVk::new(pk),
            public_shares,
        }
    }

    pub fn start_session(&self, message: C::G1Affine) -> Session<'_, C> {
        Session {
            message,
            aggregator: self,
            partials: vec![None; self.public_shares.len()],
        }
    }
}

/// Aggregation of the partial signatures on a single message.
pub struct Session<'a, C: Pairing> {
    // the message on that signatures are being aggregated
    message: C::G1Affine,
    aggregator: &'a SignatureAggregator<'a, C>,
    /// `Vec` of length `n` accumulating the verified partial signatures stored at the signer's position.
    partials: Vec<Option<PartialSig<C>>>,
}

impl<'a, C: Pairing> Session<'a, C> {
    /// Partial signatures MUST
    /// 1. be valid on the message
    /// 2. come from a known player
    /// 3. come once per player
    pub fn append_verify_sig(&mut self, partial: PartialSig<C>) -> Result<(), Error> {
        let pk_j = *partial.signer.index(self.aggregator.public_shares)?;
        let slot = &mut self.partials[partial.signer.ordinal()];
        if slot.is_some() {
            return Err(Error::DuplicateDealer(partial.signer));
        }
        verify_partial(self.message, pk_j, &partial)?;
        *slot = Some(partial);
        Ok(())
    }

    pub fn signers(&self) -> impl Iterator<Item=PlayerIdx> + '_ {
        self.partials.iter()
            .flatten()
            .map(|p| p.signer)
    }

    pub fn count(&self) -> usize {
        self.signers().count()
    }

    /// Recovers the threshold signature and verifies it against the distributed public key.
    pub fn finalize(self) -> Result<C::G1Affine, Error> {
        let partials: Vec<PartialSig<C>> = self.partials.into_iter()
            .flatten()
            .collect();
        let sig = recover(&partials, self.aggregator.t)?;
        self.aggregator.vk.verify(self.message, sig)?;
        Ok(sig)
    }
}
