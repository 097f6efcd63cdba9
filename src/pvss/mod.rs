//! Publicly verifiable secret sharing of a dealer's contribution to the distributed key.
//!
//! A dealer samples a secret polynomial `f` of degree `t`, publishes the commitment `C(X) = f(X).g2`
//! and, for every recipient `j`, the share `f(x_j)` encrypted to the recipient's encryption key.
//! Anyone can check the commitment has the right degree and that the published images of the shares
//! lie on it. The recipient additionally checks its decrypted share, `f(x_j).g2 = C(x_j)`.
//!
//! Nothing proves that a ciphertext decrypts to the share whose image is published,
//! a recipient holding a bad ciphertext learns that only when decrypting.

use ark_bls12_381::{Fr, G2Affine, G2Projective};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::{BigInteger, BitIteratorBE, PrimeField};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use ark_std::{end_timer, start_timer};
use bytes::BufMut;

use crate::codec::{finish, read_array, read_bytes, read_prefixed, read_u8, write_prefixed};
use crate::player_idx::{player_idxs, PlayerIdx, MAX_PLAYERS};
use crate::plugin::ConfigDigest;
use crate::poly::{eval, random_secret, PublicPoly, SecretPoly};
use crate::pvss::encryption::{open, seal, EncryptionGroup, Point, Translator};
use crate::Error;

pub mod encryption;

/// Length of a marshalled share, a big-endian scalar.
pub const SHARE_LEN: usize = 32;
/// ChaCha20-Poly1305 tag.
const TAG_LEN: usize = 16;
const G2_LEN: usize = 96;

/// Parameters of a sharing among a fixed committee.
pub struct Ceremony<'a> {
    /// The number of recipients.
    pub n: usize,
    /// The threshold, `deg(f) = t`, so `t + 1` shares reconstruct the secret.
    pub t: usize,
    pub group: EncryptionGroup,
    pub translator: Translator,
    /// Encryption public keys of the recipients, in the order of the players.
    pub encryption_pks: &'a [Point],
}

/// A share encrypted to its recipient, together with its image for public verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedShare {
    pub ciphertext: Vec<u8>,
    /// `Translator::translate(f(x_j))`, empty for the identity translator.
    pub image: Vec<u8>,
}

/// A dealer's contribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareSet {
    pub dealer: PlayerIdx,
    pub config_digest: ConfigDigest,
    pub commitment: PublicPoly<G2Projective>,
    /// `r.g` in the encryption group, `r` being the dealer's ephemeral secret.
    pub pvss_key: Point,
    pub shares: Vec<EncryptedShare>,
    /// Only in the dealer's own copy, never marshalled.
    secret: Option<SecretPoly<Fr>>,
}

impl<'a> Ceremony<'a> {
    pub fn setup(
        t: usize,
        group: EncryptionGroup,
        translator: Translator,
        encryption_pks: &'a [Point],
    ) -> Result<Self, Error> {
        let n = encryption_pks.len();
        if n > MAX_PLAYERS {
            return Err(Error::TooManyPlayers { n, max: MAX_PLAYERS });
        }
        if t >= n {
            return Err(Error::InvalidThreshold { t, n });
        }
        translator.check(group)?;
        if let Some(pk) = encryption_pks.iter().find(|pk| pk.group() != group) {
            return Err(Error::LengthMismatch {
                what: "encryption public key",
                expected: group.point_len(),
                got: pk.group().point_len(),
            });
        }
        Ok(Self { n, t, group, translator, encryption_pks })
    }

    /// Deals a fresh random secret to the committee.
    pub fn deal<R: Rng>(&self, config_digest: ConfigDigest, dealer: PlayerIdx, rng: &mut R) -> Result<ShareSet, Error> {
        let _t = start_timer!(|| format!("Dealing, n = {}, t = {}", self.n, self.t));
        let idxs = player_idxs(self.n)?;
        dealer.index(&idxs)?;

        let secret = random_secret::<Fr, _>(self.t, rng);
        let commitment = PublicPoly::<G2Projective>::commit(&secret);
        let (r, pvss_key) = self.group.keypair(rng);

        let shares = idxs.iter().zip(self.encryption_pks).map(|(&j, pk_j)| -> Result<EncryptedShare, Error> {
            let s_j = eval(&secret, j);
            let bytes = marshal_share(&s_j);
            verify_marshal_output_big_endian(&bytes, &s_j)?;
            let ciphertext = seal(pk_j, r, &share_context(&config_digest, dealer, j), &bytes)?;
            Ok(EncryptedShare {
                ciphertext,
                image: self.translator.translate(s_j)?,
            })
        }).collect::<Result<Vec<_>, Error>>()?;

        let own_share = G2Affine::generator() * eval(&secret, dealer);
        if own_share != commitment.evaluate(dealer) {
            return Err(Error::InvariantViolation("dealer's own share is off the commitment"));
        }
        end_timer!(_t);

        Ok(ShareSet {
            dealer,
            config_digest,
            commitment,
            pvss_key,
            shares,
            secret: Some(secret),
        })
    }

    /// Checks the share set is well-formed without decrypting anything:
    /// it's bound to the config digest, commits to a polynomial of degree exactly `t`,
    /// has a share per player, and every published image lies on the commitment.
    pub fn verify(&self, share_set: &ShareSet, config_digest: &ConfigDigest) -> Result<(), Error> {
        let _t = start_timer!(|| format!("Share set verification, n = {}", self.n));
        if share_set.config_digest != *config_digest {
            return Err(Error::ConfigDigestMismatch);
        }
        let idxs = player_idxs(self.n)?;
        share_set.dealer.index(&idxs)?;
        if share_set.commitment.coeffs().len() != self.t + 1 || !share_set.commitment.is_exact_degree() {
            return Err(Error::CommitmentWrongDegree { expected: self.t, got: share_set.commitment.degree() });
        }
        if share_set.shares.len() != self.n {
            return Err(Error::ShareCountMismatch { expected: self.n, got: share_set.shares.len() });
        }
        if share_set.pvss_key.group() != self.group {
            return Err(Error::LengthMismatch {
                what: "pvss key",
                expected: self.group.point_len(),
                got: share_set.pvss_key.group().point_len(),
            });
        }
        for (&j, share) in idxs.iter().zip(&share_set.shares) {
            if share.ciphertext.len() != SHARE_LEN + TAG_LEN {
                return Err(Error::LengthMismatch {
                    what: "share ciphertext",
                    expected: SHARE_LEN + TAG_LEN,
                    got: share.ciphertext.len(),
                });
            }
            let c_j = share_set.commitment.evaluate(j).into_affine();
            self.translator.verify(&share.image, c_j, j)?;
        }
        end_timer!(_t);
        Ok(())
    }
}

impl ShareSet {
    /// The dealer's secret polynomial, `None` unless this is the dealer's own copy.
    pub fn secret(&self) -> Option<&SecretPoly<Fr>> {
        self.secret.as_ref()
    }

    /// `f(0).g2`, the dealer's contribution to the distributed public key.
    pub fn public_key_contribution(&self) -> G2Projective {
        self.commitment.constant()
    }

    /// Decrypts the recipient's share and checks it against the commitment.
    pub fn decrypt_share(&self, recipient: PlayerIdx, sk: Fr) -> Result<Fr, Error> {
        let share = recipient.index(&self.shares)?;
        let context = share_context(&self.config_digest, self.dealer, recipient);
        let bytes = open(sk, &self.pvss_key, &context, &share.ciphertext, recipient)?;
        let s_j = unmarshal_share(&bytes)?;
        verify_marshal_output_big_endian(&bytes, &s_j)?;
        if G2Affine::generator() * s_j != self.commitment.evaluate(recipient) {
            return Err(Error::ShareWrongCommitment(recipient));
        }
        Ok(s_j)
    }

    /// Wire form: the dealer, the config digest, the commitment coefficients, the pvss key
    /// and the encrypted shares with their images, collections prefixed with their lengths.
    pub fn marshal(&self) -> Result<Vec<u8>, Error> {
        let coeffs = self.commitment.coeffs();
        let mut buf = Vec::with_capacity(
            34 + coeffs.len() * G2_LEN + self.pvss_key.group().point_len() + self.shares.len() * 100,
        );
        buf.put_u8(self.dealer.to_byte());
        buf.put_slice(&self.config_digest.0);
        buf.put_u8(u8::try_from(coeffs.len()).map_err(|_| Error::CommitmentWrongDegree {
            expected: MAX_PLAYERS - 1,
            got: coeffs.len() - 1,
        })?);
        for a_k in coeffs {
            a_k.serialize_compressed(&mut buf)?;
        }
        write_prefixed(&self.pvss_key.to_bytes()?, &mut buf);
        buf.put_u8(u8::try_from(self.shares.len()).map_err(|_| Error::TooManyPlayers {
            n: self.shares.len(),
            max: MAX_PLAYERS,
        })?);
        for share in &self.shares {
            write_prefixed(&share.ciphertext, &mut buf);
            write_prefixed(&share.image, &mut buf);
        }
        Ok(buf)
    }

    /// Parses the wire form. The result has no secret and still has to be verified.
    pub fn unmarshal(bytes: &[u8], group: EncryptionGroup) -> Result<Self, Error> {
        let mut buf = bytes;
        let dealer = PlayerIdx::from_byte(read_u8(&mut buf, "dealer")?)?;
        let config_digest = ConfigDigest(read_array(&mut buf, "config digest")?);
        let len = read_u8(&mut buf, "commitment length")? as usize;
        let coeffs = (0..len)
            .map(|_| -> Result<G2Affine, Error> {
                let a_k = read_bytes(&mut buf, G2_LEN, "commitment coefficient")?;
                Ok(G2Affine::deserialize_compressed(&a_k[..])?)
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let pvss_key = group.read_point(&read_prefixed(&mut buf, group.point_len(), "pvss key")?)?;
        let n = read_u8(&mut buf, "share count")? as usize;
        let shares = (0..n)
            .map(|_| -> Result<EncryptedShare, Error> {
                let ciphertext = read_prefixed(&mut buf, SHARE_LEN + TAG_LEN, "share ciphertext")?;
                let image = read_prefixed(&mut buf, G2_LEN, "share image")?;
                Ok(EncryptedShare { ciphertext, image })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        finish(&buf)?;
        Ok(Self {
            dealer,
            config_digest,
            commitment: PublicPoly::from_coeffs(coeffs),
            pvss_key,
            shares,
            secret: None,
        })
    }
}

/// Binds a share's ciphertext to the round, the dealer and the recipient.
fn share_context(config_digest: &ConfigDigest, dealer: PlayerIdx, recipient: PlayerIdx) -> Vec<u8> {
    let mut context = Vec::with_capacity(34);
    context.extend_from_slice(&config_digest.0);
    context.push(dealer.to_byte());
    context.push(recipient.to_byte());
    context
}

/// The canonical representation of the share, its bits most significant first.
pub fn share_bits(share: &Fr) -> Vec<bool> {
    BitIteratorBE::new(share.into_bigint()).collect()
}

/// Big-endian bytes of the share.
pub fn marshal_share(share: &Fr) -> Vec<u8> {
    share.into_bigint().to_bytes_be()
}

pub fn unmarshal_share(bytes: &[u8]) -> Result<Fr, Error> {
    if bytes.len() != SHARE_LEN {
        return Err(Error::LengthMismatch { what: "share", expected: SHARE_LEN, got: bytes.len() });
    }
    let bits: Vec<bool> = bytes.iter()
        .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1 == 1))
        .collect();
    let bigint = <Fr as PrimeField>::BigInt::from_bits_be(&bits);
    Fr::from_bigint(bigint)
        .ok_or(Error::InvariantViolation("share is not a canonical scalar"))
}

/// Checks bit by bit that the marshalled share is the big-endian encoding of the scalar.
pub fn verify_marshal_output_big_endian(bytes: &[u8], share: &Fr) -> Result<(), Error> {
    let bits = share_bits(share);
    if bytes.len() * 8 != bits.len() {
        return Err(Error::InvariantViolation("marshalled share has a wrong length"));
    }
    let agree = bits.iter().enumerate()
        .all(|(i, &bit)| ((bytes[i / 8] >> (7 - i % 8)) & 1 == 1) == bit);
    if !agree {
        return Err(Error::InvariantViolation("marshalled share disagrees with its big-endian bits"));
    }
    Ok(())
}
