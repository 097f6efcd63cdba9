use std::collections::{BTreeMap, HashMap};

use ark_bls12_381::{Bls12_381, Fr, G1Affine, G2Affine, G2Projective};
use ark_ec::CurveGroup;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use bytes::BufMut;
use tracing::warn;

use crate::bls::vanilla::{self, BlsSigner};
use crate::codec::{finish, read_prefixed, read_u8, write_prefixed};
use crate::hash::{hash_to_g1, sha256, SHARE_RECORD_DST};
use crate::key::DistributedKeyData;
use crate::player_idx::{player_idxs, PlayerIdx};
use crate::plugin::ConfigDigest;
use crate::poly::PublicPoly;
use crate::pvss::encryption::EncryptionGroup;
use crate::pvss::{Ceremony, ShareSet};
use crate::utils::hex;
use crate::Error;

/// `SHA-256` of the marshalled share set, identifies the record.
pub type RecordHash = [u8; 32];

const MAX_SHARE_SET_LEN: usize = 1 << 20;
const SIGNATURE_LEN: usize = 48;

/// A share set signed by its dealer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareRecord {
    pub dealer: PlayerIdx,
    pub raw_share_set: Vec<u8>,
    /// The dealer's signature on `raw_share_set || config_digest`.
    pub signature: G1Affine,
    hash: RecordHash,
}

fn signing_message(raw_share_set: &[u8], config_digest: &ConfigDigest) -> Result<G1Affine, Error> {
    let mut message = Vec::with_capacity(raw_share_set.len() + 32);
    message.extend_from_slice(raw_share_set);
    message.extend_from_slice(&config_digest.0);
    hash_to_g1(SHARE_RECORD_DST, &message)
}

impl ShareRecord {
    pub fn new(share_set: &ShareSet, signer: &BlsSigner<Bls12_381>) -> Result<Self, Error> {
        let raw_share_set = share_set.marshal()?;
        let signature = signer.sign(signing_message(&raw_share_set, &share_set.config_digest)?);
        Ok(Self {
            dealer: share_set.dealer,
            hash: sha256(&[&raw_share_set[..]]),
            raw_share_set,
            signature,
        })
    }

    pub fn hash(&self) -> &RecordHash {
        &self.hash
    }

    pub fn verify_signature(&self, signing_pk: G2Affine, config_digest: &ConfigDigest) -> Result<(), Error> {
        let message = signing_message(&self.raw_share_set, config_digest)?;
        if !vanilla::verify::<Bls12_381>(signing_pk, message, self.signature) {
            return Err(Error::InvalidSignature(self.dealer));
        }
        Ok(())
    }

    /// Parses the share set, which must have been dealt by the signer of the record.
    pub fn share_set(&self, group: EncryptionGroup) -> Result<ShareSet, Error> {
        let share_set = ShareSet::unmarshal(&self.raw_share_set, group)?;
        if share_set.dealer != self.dealer {
            return Err(Error::DealerMismatch { claimed: self.dealer, actual: share_set.dealer });
        }
        Ok(share_set)
    }

    /// `[dealer][len][raw share set][len][signature]`
    pub fn marshal(&self) -> Result<Vec<u8>, Error> {
        let mut signature = Vec::with_capacity(SIGNATURE_LEN);
        self.signature.serialize_compressed(&mut signature)?;
        let mut buf = Vec::with_capacity(1 + 4 + self.raw_share_set.len() + 1 + SIGNATURE_LEN);
        buf.put_u8(self.dealer.to_byte());
        write_prefixed(&self.raw_share_set, &mut buf);
        write_prefixed(&signature, &mut buf);
        Ok(buf)
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self, Error> {
        let mut buf = bytes;
        let dealer = PlayerIdx::from_byte(read_u8(&mut buf, "dealer")?)?;
        let raw_share_set = read_prefixed(&mut buf, MAX_SHARE_SET_LEN, "share set")?;
        let signature = read_prefixed(&mut buf, SIGNATURE_LEN, "record signature")?;
        finish(&buf)?;
        Ok(Self {
            dealer,
            hash: sha256(&[&raw_share_set[..]]),
            raw_share_set,
            signature: G1Affine::deserialize_compressed(&signature[..])?,
        })
    }
}

/// The records known to a node in a round, by hash, at most one per dealer.
#[derive(Clone, Debug, Default)]
pub struct ShareRecords {
    records: HashMap<RecordHash, ShareRecord>,
}

impl ShareRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the record, superseding another record of the same dealer. Returns the superseded one.
    /// Adding a record again is a no-op.
    pub fn replace(&mut self, record: ShareRecord) -> Option<ShareRecord> {
        if self.records.contains_key(record.hash()) {
            return None;
        }
        let superseded = self.by_dealer(record.dealer)
            .map(|r| r.hash)
            .and_then(|hash| self.records.remove(&hash));
        self.records.insert(record.hash, record);
        superseded
    }

    pub fn get(&self, hash: &RecordHash) -> Option<&ShareRecord> {
        self.records.get(hash)
    }

    pub fn by_dealer(&self, dealer: PlayerIdx) -> Option<&ShareRecord> {
        self.records.values().find(|r| r.dealer == dealer)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// A record that passed the signature and the share set checks.
#[derive(Clone, Debug)]
pub struct ValidShareRecord {
    pub record: ShareRecord,
    pub share_set: ShareSet,
}

/// The valid records of a round, by dealer. Built from scratch in every report.
#[derive(Clone, Debug, Default)]
pub struct ValidShareRecords {
    records: BTreeMap<PlayerIdx, ValidShareRecord>,
}

impl ValidShareRecords {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_dealer(&self, record: &ShareRecord) -> Result<bool, Error> {
        match self.records.get(&record.dealer) {
            Some(existing) if existing.record.hash() == record.hash() => Ok(false),
            Some(_) => Err(Error::DuplicateDealer(record.dealer)),
            None => Ok(true),
        }
    }

    /// Verifies the record and its share set, a record that fails any of the checks isn't added.
    pub fn process_share_set(
        &mut self,
        record: ShareRecord,
        ceremony: &Ceremony,
        signing_pks: &[G2Affine],
        config_digest: &ConfigDigest,
    ) -> Result<(), Error> {
        if !self.check_dealer(&record)? {
            return Ok(());
        }
        let signing_pk = *record.dealer.index(signing_pks)?;
        record.verify_signature(signing_pk, config_digest)?;
        let share_set = record.share_set(ceremony.group)?;
        ceremony.verify(&share_set, config_digest)?;
        self.records.insert(record.dealer, ValidShareRecord { record, share_set });
        Ok(())
    }

    pub fn valid_share_count(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item=&ValidShareRecord> {
        self.records.values()
    }

    /// Hashes of the records, in the order of the dealers.
    pub fn hashes(&self) -> Vec<RecordHash> {
        self.iter()
            .map(|r| *r.record.hash())
            .collect()
    }

    pub fn find(&self, hash: &RecordHash) -> Option<&ValidShareRecord> {
        self.iter().find(|r| r.record.hash() == hash)
    }

    /// The records with the given hashes, failing if any of them is missing.
    ///
    /// A record not in the set is taken from the `known` ones, verified like a received one.
    pub fn restrict_to(
        &self,
        hashes: &[RecordHash],
        known: &ShareRecords,
        ceremony: &Ceremony,
        signing_pks: &[G2Affine],
        config_digest: &ConfigDigest,
    ) -> Result<Self, Error> {
        let mut restricted = Self::new();
        for hash in hashes {
            if let Some(r) = self.find(hash) {
                if restricted.check_dealer(&r.record)? {
                    restricted.records.insert(r.record.dealer, r.clone());
                }
                continue;
            }
            let record = known.get(hash)
                .ok_or_else(|| Error::MissingShareRecord(hex(hash)))?;
            restricted.process_share_set(record.clone(), ceremony, signing_pks, config_digest)?;
        }
        Ok(restricted)
    }

    /// Combines the share sets into the distributed key.
    ///
    /// The commitment to the shared polynomial is the sum of the dealers' commitments,
    /// the player's secret share is the sum of its shares from all the dealers.
    /// If a share addressed to the player doesn't decrypt to a point of the commitment,
    /// the public data is still returned, but without the secret share.
    pub fn aggregate(&self, n: usize, t: usize, recipient: PlayerIdx, encryption_sk: Fr) -> Result<DistributedKeyData, Error> {
        if self.valid_share_count() <= t {
            return Err(Error::InsufficientContributions { have: self.valid_share_count(), need: t + 1 });
        }
        let commitments: Vec<&PublicPoly<G2Projective>> = self.iter()
            .map(|r| &r.share_set.commitment)
            .collect();
        let commitment = PublicPoly::sum(&commitments);
        let public_shares: Vec<G2Projective> = player_idxs(n)?.into_iter()
            .map(|j| commitment.evaluate(j))
            .collect();

        let secret_share = self.iter()
            .map(|r| r.share_set.decrypt_share(recipient, encryption_sk).map_err(|e| (r.record.dealer, e)))
            .sum::<Result<Fr, _>>();
        let secret_share = match secret_share {
            Ok(s) => Some(s),
            Err((dealer, e)) => {
                warn!(dealer = %dealer, player = %recipient, error = %e, "unusable share, the key can't be used for signing");
                None
            }
        };

        Ok(DistributedKeyData {
            public_key: Some(commitment.constant().into_affine()),
            public_shares: G2Projective::normalize_batch(&public_shares),
            secret_share,
            threshold: t,
            present: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use ark_std::test_rng;

    use super::*;
    use crate::pvss::encryption::{Point, Translator};

    #[test]
    fn record_signature_and_wire_form() {
        let rng = &mut test_rng();

        let digest = ConfigDigest([4; 32]);
        let group = EncryptionGroup::Bls12381G2;
        let (_, pks): (Vec<Fr>, Vec<Point>) = (0..3).map(|_| group.keypair(rng)).unzip();
        let ceremony = Ceremony::setup(1, group, Translator::Identity, &pks).unwrap();
        let signers: Vec<BlsSigner<Bls12_381>> = (0..3).map(|_| BlsSigner::new(rng)).collect();
        let signing_pks: Vec<G2Affine> = signers.iter().map(|s| s.bls_pk_g2).collect();
        let dealer = PlayerIdx::from_ordinal(1, 3).unwrap();
        let share_set = ceremony.deal(digest, dealer, rng).unwrap();

        let record = ShareRecord::new(&share_set, &signers[1]).unwrap();
        let received = ShareRecord::unmarshal(&record.marshal().unwrap()).unwrap();
        assert_eq!(received, record);
        assert_eq!(received.hash(), &sha256(&[&share_set.marshal().unwrap()[..]]));
        received.verify_signature(signing_pks[1], &digest).unwrap();
        assert!(matches!(
            received.verify_signature(signing_pks[0], &digest),
            Err(Error::InvalidSignature(d)) if d == dealer
        ));
        assert!(received.verify_signature(signing_pks[1], &ConfigDigest([5; 32])).is_err());

        // a record re-signed by another player claiming the share set
        let mut stolen = ShareRecord::new(&share_set, &signers[2]).unwrap();
        stolen.dealer = PlayerIdx::from_ordinal(2, 3).unwrap();
        stolen.verify_signature(signing_pks[2], &digest).unwrap();
        assert!(matches!(stolen.share_set(group), Err(Error::DealerMismatch { .. })));
        let mut valid = ValidShareRecords::new();
        assert!(valid.process_share_set(stolen, &ceremony, &signing_pks, &digest).is_err());
        valid.process_share_set(received.clone(), &ceremony, &signing_pks, &digest).unwrap();
        // the same record twice is fine
        valid.process_share_set(received, &ceremony, &signing_pks, &digest).unwrap();
        assert_eq!(valid.valid_share_count(), 1);

        let mut records = ShareRecords::new();
        assert_eq!(records.replace(record.clone()), None);
        assert_eq!(records.replace(record.clone()), None);
        assert_eq!(records.len(), 1);
        assert!(records.get(record.hash()).is_some());

        // a newer record of the dealer supersedes the known one
        let newer = ShareRecord::new(&ceremony.deal(digest, dealer, rng).unwrap(), &signers[1]).unwrap();
        assert_eq!(records.replace(newer.clone()), Some(record.clone()));
        assert_eq!(records.replace(newer.clone()), None);
        assert_eq!(records.len(), 1);
        assert_eq!(records.by_dealer(dealer), Some(&newer));
    }

    #[test]
    fn restriction_falls_back_to_known_records() {
        let rng = &mut test_rng();

        let digest = ConfigDigest([4; 32]);
        let group = EncryptionGroup::Bls12381G2;
        let (_, pks): (Vec<Fr>, Vec<Point>) = (0..3).map(|_| group.keypair(rng)).unzip();
        let ceremony = Ceremony::setup(1, group, Translator::Identity, &pks).unwrap();
        let signers: Vec<BlsSigner<Bls12_381>> = (0..3).map(|_| BlsSigner::new(rng)).collect();
        let signing_pks: Vec<G2Affine> = signers.iter().map(|s| s.bls_pk_g2).collect();
        let records: Vec<ShareRecord> = player_idxs(3).unwrap().into_iter().zip(&signers)
            .map(|(j, signer)| ShareRecord::new(&ceremony.deal(digest, j, rng).unwrap(), signer).unwrap())
            .collect();

        let mut observed = ValidShareRecords::new();
        observed.process_share_set(records[0].clone(), &ceremony, &signing_pks, &digest).unwrap();
        let mut known = ShareRecords::new();
        known.replace(records[1].clone());
        let hashes = [*records[0].hash(), *records[1].hash()];

        let restricted = observed.restrict_to(&hashes, &known, &ceremony, &signing_pks, &digest).unwrap();
        assert_eq!(restricted.hashes(), hashes.to_vec());
        // missing everywhere
        let hashes = [*records[0].hash(), *records[2].hash()];
        assert!(matches!(
            observed.restrict_to(&hashes, &known, &ceremony, &signing_pks, &digest),
            Err(Error::MissingShareRecord(_))
        ));
        // known records are verified too
        let mut forged = records[2].clone();
        forged.signature = records[1].signature;
        let mut known = ShareRecords::new();
        known.replace(forged);
        assert!(matches!(
            observed.restrict_to(&hashes, &known, &ceremony, &signing_pks, &digest),
            Err(Error::InvalidSignature(_))
        ));
    }
}
