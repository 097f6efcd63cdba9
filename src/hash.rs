use ark_bls12_381::{g1, G1Affine, G1Projective};
use ark_ec::hashing::curve_maps::wb::WBMap;
use ark_ec::hashing::map_to_curve_hasher::MapToCurveBasedHasher;
use ark_ec::hashing::HashToCurve;
use ark_ff::field_hashers::DefaultFieldHasher;
use sha2::{Digest, Sha256};

use crate::Error;

/// Domain separation tag of the share record authentication signatures.
pub const SHARE_RECORD_DST: &[u8] = b"THRESHOLD-BEACON-V01-SHARE-RECORD_BLS12381G1_XMD:SHA-256_SSWU_RO_";
/// Domain separation tag of the messages signed by the committee.
pub const THRESHOLD_MESSAGE_DST: &[u8] = b"THRESHOLD-BEACON-V01-MESSAGE_BLS12381G1_XMD:SHA-256_SSWU_RO_";

type G1Hasher = MapToCurveBasedHasher<G1Projective, DefaultFieldHasher<Sha256, 128>, WBMap<g1::Config>>;

/// `SHA-256(part_1 || ... || part_k)`
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hashes the message to a point in G1 (RFC 9380, `hash_to_curve`).
pub fn hash_to_g1(dst: &[u8], message: &[u8]) -> Result<G1Affine, Error> {
    let hasher = G1Hasher::new(dst)
        .map_err(|e| Error::HashToCurve(format!("{:?}", e)))?;
    hasher.hash(message)
        .map_err(|e| Error::HashToCurve(format!("{:?}", e)))
}

#[cfg(test)]
mod tests {
    use ark_ec::AffineRepr;

    use super::*;

    #[test]
    fn deterministic_and_separated() {
        let p1 = hash_to_g1(THRESHOLD_MESSAGE_DST, b"block").unwrap();
        let p2 = hash_to_g1(THRESHOLD_MESSAGE_DST, b"block").unwrap();
        let p3 = hash_to_g1(SHARE_RECORD_DST, b"block").unwrap();
        let p4 = hash_to_g1(THRESHOLD_MESSAGE_DST, b"other block").unwrap();
        assert_eq!(p1, p2);
        assert_ne!(p1, p3);
        assert_ne!(p1, p4);
        assert!(!p1.is_zero());
        assert!(p1.is_in_correct_subgroup_assuming_on_curve());
    }

    #[test]
    fn sha256_concatenates() {
        assert_eq!(sha256(&[b"ab", b"c"]), sha256(&[b"abc"]));
    }
}
