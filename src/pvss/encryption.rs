//! Transport of the shares to their recipients and the named cryptographic backends.
//!
//! A share is encrypted with ChaCha20-Poly1305 under a key derived from the Diffie-Hellman secret
//! `r.pk_j` in the encryption group, where `r.g` is the dealer's ephemeral `pvss_key`, shared by all recipients.
//!
//! The encryption group and the translator are selected by name in the offchain config,
//! the names below are part of the wire format.

use core::fmt;

use ark_bls12_381::{Bls12_381, Fr, G1Affine, G2Affine};
use ark_ec::pairing::Pairing;
use ark_ec::{AffineRepr, CurveGroup};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use ark_std::UniformRand;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::hash::sha256;
use crate::player_idx::PlayerIdx;
use crate::Error;

const KEY_DST: &[u8] = b"THRESHOLD-BEACON-V01-SHARE-KEY";
const NONCE_DST: &[u8] = b"THRESHOLD-BEACON-V01-SHARE-NONCE";

/// Group the recipients' encryption keys and the dealer's ephemeral key live in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncryptionGroup {
    Bls12381G1,
    Bls12381G2,
}

/// A point of one of the encryption groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Point {
    G1(G1Affine),
    G2(G2Affine),
}

impl EncryptionGroup {
    pub const ALL: [EncryptionGroup; 2] = [EncryptionGroup::Bls12381G1, EncryptionGroup::Bls12381G2];

    pub const fn name(self) -> &'static str {
        match self {
            EncryptionGroup::Bls12381G1 => "bls12-381-g1",
            EncryptionGroup::Bls12381G2 => "bls12-381-g2",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, Error> {
        Self::ALL.into_iter()
            .find(|g| g.name() == name)
            .ok_or_else(|| Error::UnknownEncryptionGroup(name.to_string()))
    }

    /// Length of a compressed point.
    pub const fn point_len(self) -> usize {
        match self {
            EncryptionGroup::Bls12381G1 => 48,
            EncryptionGroup::Bls12381G2 => 96,
        }
    }

    /// `s.g`
    pub fn mul_generator(self, s: Fr) -> Point {
        match self {
            EncryptionGroup::Bls12381G1 => Point::G1((G1Affine::generator() * s).into_affine()),
            EncryptionGroup::Bls12381G2 => Point::G2((G2Affine::generator() * s).into_affine()),
        }
    }

    /// Samples an encryption keypair.
    pub fn keypair<R: Rng>(self, rng: &mut R) -> (Fr, Point) {
        let sk = Fr::rand(rng);
        (sk, self.mul_generator(sk))
    }

    /// Parses a compressed point, checking it is in the prime order subgroup.
    pub fn read_point(self, bytes: &[u8]) -> Result<Point, Error> {
        if bytes.len() != self.point_len() {
            return Err(Error::LengthMismatch { what: self.name(), expected: self.point_len(), got: bytes.len() });
        }
        Ok(match self {
            EncryptionGroup::Bls12381G1 => Point::G1(G1Affine::deserialize_compressed(bytes)?),
            EncryptionGroup::Bls12381G2 => Point::G2(G2Affine::deserialize_compressed(bytes)?),
        })
    }
}

impl fmt::Display for EncryptionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Point {
    pub fn group(&self) -> EncryptionGroup {
        match self {
            Point::G1(_) => EncryptionGroup::Bls12381G1,
            Point::G2(_) => EncryptionGroup::Bls12381G2,
        }
    }

    pub fn mul(&self, s: Fr) -> Point {
        match self {
            Point::G1(p) => Point::G1((*p * s).into_affine()),
            Point::G2(p) => Point::G2((*p * s).into_affine()),
        }
    }

    /// The compressed point.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::with_capacity(self.group().point_len());
        match self {
            Point::G1(p) => p.serialize_compressed(&mut bytes)?,
            Point::G2(p) => p.serialize_compressed(&mut bytes)?,
        }
        Ok(bytes)
    }
}

/// Maps a share's public image between the encryption group and the commitment group (G2).
///
/// The dealer publishes the image of every share in the encryption group, so that anyone can check it against
/// the commitment and a recipient can check its decrypted share with encryption group arithmetic only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Translator {
    /// The encryption group is the commitment group, the image is `C(x_j)` itself and isn't transmitted.
    Identity,
    /// The encryption group is G1, the image `s_j.g1` is checked with `e(s_j.g1, g2) = e(g1, C(x_j))`.
    PairingTranslation,
}

impl Translator {
    pub const ALL: [Translator; 2] = [Translator::Identity, Translator::PairingTranslation];

    pub const fn name(self) -> &'static str {
        match self {
            Translator::Identity => "identity",
            Translator::PairingTranslation => "pairing-translation",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, Error> {
        Self::ALL.into_iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| Error::UnknownTranslator(name.to_string()))
    }

    /// Whether the translator can map from `group` into the commitment group.
    pub fn check(self, group: EncryptionGroup) -> Result<(), Error> {
        match (self, group) {
            (Translator::Identity, EncryptionGroup::Bls12381G2)
            | (Translator::PairingTranslation, EncryptionGroup::Bls12381G1) => Ok(()),
            _ => Err(Error::TranslatorMismatch { translator: self.name(), group: group.name() }),
        }
    }

    /// The image of the share to publish, empty when the commitment already is the image.
    pub fn translate(self, share: Fr) -> Result<Vec<u8>, Error> {
        match self {
            Translator::Identity => Ok(Vec::new()),
            Translator::PairingTranslation => Point::G1((G1Affine::generator() * share).into_affine()).to_bytes(),
        }
    }

    /// Checks the published image of the share of `recipient` against the commitment `C(x_j)`.
    pub fn verify(self, image: &[u8], commitment_at_j: G2Affine, recipient: PlayerIdx) -> Result<(), Error> {
        match self {
            Translator::Identity if image.is_empty() => Ok(()),
            Translator::Identity => Err(Error::TranslationMismatch(recipient)),
            Translator::PairingTranslation => {
                let image = match EncryptionGroup::Bls12381G1.read_point(image) {
                    Ok(Point::G1(p)) => p,
                    _ => return Err(Error::TranslationMismatch(recipient)),
                };
                let lhs = Bls12_381::pairing(image, G2Affine::generator());
                let rhs = Bls12_381::pairing(G1Affine::generator(), commitment_at_j);
                if lhs != rhs {
                    return Err(Error::TranslationMismatch(recipient));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Translator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn cipher(shared: &Point, context: &[u8]) -> Result<(ChaCha20Poly1305, [u8; 12]), Error> {
    let key = sha256(&[KEY_DST, &shared.to_bytes()?, context]);
    let nonce = sha256(&[NONCE_DST, context]);
    let mut nonce_bytes = [0u8; 12];
    nonce_bytes.copy_from_slice(&nonce[..12]);
    Ok((ChaCha20Poly1305::new(Key::from_slice(&key)), nonce_bytes))
}

/// Encrypts to `recipient_pk` with the dealer's ephemeral secret `r`, binding the ciphertext to `context`.
pub fn seal(recipient_pk: &Point, r: Fr, context: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let (cipher, nonce) = cipher(&recipient_pk.mul(r), context)?;
    cipher.encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: context })
        .map_err(|_| Error::InvariantViolation("share encryption failed"))
}

/// Decrypts with the recipient's secret key and the dealer's `pvss_key = r.g`.
pub fn open(sk: Fr, pvss_key: &Point, context: &[u8], ciphertext: &[u8], recipient: PlayerIdx) -> Result<Vec<u8>, Error> {
    let (cipher, nonce) = cipher(&pvss_key.mul(sk), context)?;
    cipher.decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad: context })
        .map_err(|_| Error::DecryptionFailed(recipient))
}
