//! Binary encodings of the DKG plugin configuration.
//!
//! Offchain: `[version][n: varint][len][group name][encryption pk] x n [signing pk] x n [len][translator name]`,
//! onchain: the 32-byte key id.

use ark_bls12_381::G2Affine;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use bytes::BufMut;

use crate::codec::{finish, read_array, read_bytes, read_u8, read_varint, write_varint};
use crate::key::KeyId;
use crate::player_idx::{PlayerIdx, MAX_PLAYERS};
use crate::pvss::encryption::{EncryptionGroup, Point, Translator};
use crate::Error;

pub const OFFCHAIN_CONFIG_VERSION: u8 = 1;
const SIGNING_PK_LEN: usize = 96;

/// Public keys of the committee and the cryptographic backends of the sharing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OffchainConfig {
    pub group: EncryptionGroup,
    /// Share encryption keys, in the order of the oracles.
    pub encryption_pks: Vec<Point>,
    /// Share record authentication keys in G2, in the order of the oracles.
    pub signing_pks: Vec<G2Affine>,
    pub translator: Translator,
}

impl OffchainConfig {
    pub fn n(&self) -> usize {
        self.encryption_pks.len()
    }

    pub fn encryption_pk(&self, player: PlayerIdx) -> Result<&Point, Error> {
        player.index(&self.encryption_pks)
    }

    pub fn signing_pk(&self, player: PlayerIdx) -> Result<&G2Affine, Error> {
        player.index(&self.signing_pks)
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let n = self.n();
        if n > MAX_PLAYERS {
            return Err(Error::TooManyPlayers { n, max: MAX_PLAYERS });
        }
        if self.signing_pks.len() != n {
            return Err(Error::LengthMismatch { what: "signing keys", expected: n, got: self.signing_pks.len() });
        }
        self.translator.check(self.group)?;
        let mut buf = Vec::with_capacity(
            3 + self.group.name().len() + n * (self.group.point_len() + SIGNING_PK_LEN) + self.translator.name().len(),
        );
        buf.put_u8(OFFCHAIN_CONFIG_VERSION);
        write_varint(n as u64, &mut buf);
        put_name(self.group.name(), &mut buf);
        for pk in &self.encryption_pks {
            if pk.group() != self.group {
                return Err(Error::LengthMismatch {
                    what: "encryption public key",
                    expected: self.group.point_len(),
                    got: pk.group().point_len(),
                });
            }
            buf.put_slice(&pk.to_bytes()?);
        }
        for pk in &self.signing_pks {
            pk.serialize_compressed(&mut buf)?;
        }
        put_name(self.translator.name(), &mut buf);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut buf = bytes;
        let version = read_u8(&mut buf, "version")?;
        if version != OFFCHAIN_CONFIG_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let n = read_varint(&mut buf)?;
        if n > MAX_PLAYERS as u64 {
            return Err(Error::TooManyPlayers { n: n as usize, max: MAX_PLAYERS });
        }
        let n = n as usize;
        let group = EncryptionGroup::from_name(&get_name(&mut buf)?)?;
        let encryption_pks = (0..n)
            .map(|_| group.read_point(&read_bytes(&mut buf, group.point_len(), "encryption public key")?))
            .collect::<Result<Vec<_>, Error>>()?;
        let signing_pks = (0..n)
            .map(|_| -> Result<G2Affine, Error> {
                let pk = read_bytes(&mut buf, SIGNING_PK_LEN, "signing public key")?;
                Ok(G2Affine::deserialize_compressed(&pk[..])?)
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let translator = Translator::from_name(&get_name(&mut buf)?)?;
        finish(&buf)?;
        translator.check(group)?;
        Ok(Self { group, encryption_pks, signing_pks, translator })
    }
}

fn put_name(name: &str, buf: &mut Vec<u8>) {
    // registry names are short ASCII literals
    buf.put_u8(name.len() as u8);
    buf.put_slice(name.as_bytes());
}

fn get_name(buf: &mut &[u8]) -> Result<String, Error> {
    let len = read_u8(buf, "name length")? as usize;
    let name = read_bytes(buf, len, "name")?;
    // not a registered name unless it's valid ASCII
    Ok(String::from_utf8_lossy(&name).into_owned())
}

/// The key the plugin generates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OnchainConfig {
    pub key_id: KeyId,
}

impl OnchainConfig {
    pub fn encode(&self) -> Vec<u8> {
        self.key_id.0.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut buf = bytes;
        if buf.len() != 32 {
            return Err(Error::LengthMismatch { what: "onchain config", expected: 32, got: buf.len() });
        }
        let key_id = KeyId(read_array(&mut buf, "key id")?);
        Ok(Self { key_id })
    }
}

#[cfg(test)]
mod tests {
    use ark_std::test_rng;

    use super::*;
    use crate::bls::vanilla::BlsSigner;

    fn config(n: usize, group: EncryptionGroup, translator: Translator) -> OffchainConfig {
        let rng = &mut test_rng();
        OffchainConfig {
            group,
            encryption_pks: (0..n).map(|_| group.keypair(rng).1).collect(),
            signing_pks: (0..n).map(|_| BlsSigner::<ark_bls12_381::Bls12_381>::new(rng).bls_pk_g2).collect(),
            translator,
        }
    }

    #[test]
    fn offchain_config_round_trips() {
        for (group, translator) in [
            (EncryptionGroup::Bls12381G1, Translator::PairingTranslation),
            (EncryptionGroup::Bls12381G2, Translator::Identity),
        ] {
            let config = config(4, group, translator);
            let bytes = config.encode().unwrap();
            assert_eq!(bytes[0], OFFCHAIN_CONFIG_VERSION);
            assert_eq!(bytes[1], 4);
            assert_eq!(OffchainConfig::decode(&bytes).unwrap(), config);
        }
    }

    #[test]
    fn offchain_config_rejects_malformed_input() {
        let config = config(3, EncryptionGroup::Bls12381G1, Translator::PairingTranslation);
        let bytes = config.encode().unwrap();

        let mut overage = bytes.clone();
        overage.push(0);
        assert!(matches!(OffchainConfig::decode(&overage), Err(Error::Overage(1))));

        assert!(matches!(
            OffchainConfig::decode(&bytes[..bytes.len() - 1]),
            Err(Error::LengthMismatch { .. })
        ));

        let mut version = bytes.clone();
        version[0] = 2;
        assert!(matches!(OffchainConfig::decode(&version), Err(Error::UnsupportedVersion(2))));

        // "bls12-381-g1" -> "bls12-381-g3"
        let mut group = bytes.clone();
        group[3 + 11] = b'3';
        assert!(matches!(OffchainConfig::decode(&group), Err(Error::UnknownEncryptionGroup(name)) if name == "bls12-381-g3"));

        let mut translator = bytes.clone();
        let last = translator.len() - 1;
        translator[last] = b'x';
        assert!(matches!(OffchainConfig::decode(&translator), Err(Error::UnknownTranslator(_))));

        let mut too_many = vec![OFFCHAIN_CONFIG_VERSION];
        write_varint(256, &mut too_many);
        assert!(matches!(OffchainConfig::decode(&too_many), Err(Error::TooManyPlayers { n: 256, .. })));

        let mismatched = OffchainConfig { translator: Translator::Identity, ..config };
        assert!(matches!(mismatched.encode(), Err(Error::TranslatorMismatch { .. })));
    }

    #[test]
    fn onchain_config() {
        let config = OnchainConfig { key_id: KeyId([9; 32]) };
        assert_eq!(OnchainConfig::decode(&config.encode()).unwrap(), config);
        assert!(OnchainConfig::decode(&[9; 31]).is_err());
        assert!(OnchainConfig::decode(&[9; 33]).is_err());
    }
}
