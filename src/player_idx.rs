use core::fmt;

use ark_ff::PrimeField;

use crate::Error;

/// Hard limit on the committee size, player indices fit in a byte on the wire.
pub const MAX_PLAYERS: usize = u8::MAX as usize;

/// The x-coordinate assigned to a committee member.
///
/// The oracle with ordinal `i` in `0..n` gets the index `i + 1`, so the player with index `x`
/// holds `f(x)` for every shared polynomial `f` and `0` is never assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerIdx(u8);

/// The indices of a committee of `n` players, in the order of oracle ordinals.
pub fn player_idxs(n: usize) -> Result<Vec<PlayerIdx>, Error> {
    if n > MAX_PLAYERS {
        return Err(Error::TooManyPlayers { n, max: MAX_PLAYERS });
    }
    Ok((0..n)
        .map(|i| PlayerIdx(i as u8 + 1))
        .collect())
}

impl PlayerIdx {
    /// Index of the oracle with the given ordinal in a committee of `n`.
    pub fn from_ordinal(ordinal: usize, n: usize) -> Result<Self, Error> {
        if n > MAX_PLAYERS {
            return Err(Error::TooManyPlayers { n, max: MAX_PLAYERS });
        }
        if ordinal >= n {
            return Err(Error::UnknownOracle { ordinal, n });
        }
        Ok(PlayerIdx(ordinal as u8 + 1))
    }

    /// Parses the wire form, rejecting the reserved `0`.
    pub fn from_byte(b: u8) -> Result<Self, Error> {
        if b == 0 {
            return Err(Error::ZeroPlayerIndex);
        }
        Ok(PlayerIdx(b))
    }

    pub fn to_byte(self) -> u8 {
        self.0
    }

    /// Position of the player in per-player arrays.
    pub fn ordinal(self) -> usize {
        self.0 as usize - 1
    }

    /// The evaluation point of the player.
    pub fn scalar<F: PrimeField>(self) -> F {
        F::from(self.0 as u64)
    }

    /// Looks up the player's entry in a per-player collection.
    pub fn index<T>(self, collection: &[T]) -> Result<&T, Error> {
        collection.get(self.ordinal())
            .ok_or(Error::PlayerIndexOutOfRange { idx: self, len: collection.len() })
    }
}

impl fmt::Display for PlayerIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use ark_ff::Zero;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn too_many_players() {
        assert!(player_idxs(MAX_PLAYERS).is_ok());
        assert!(matches!(
            player_idxs(MAX_PLAYERS + 1),
            Err(Error::TooManyPlayers { n: 256, max: 255 })
        ));
    }

    #[test]
    fn index_lookup() {
        let idxs = player_idxs(3).unwrap();
        let values = ["a", "b", "c"];
        assert_eq!(idxs[2].index(&values).unwrap(), &"c");
        assert!(matches!(
            idxs[2].index(&values[..2]),
            Err(Error::PlayerIndexOutOfRange { len: 2, .. })
        ));
        assert!(PlayerIdx::from_byte(0).is_err());
        assert_eq!(PlayerIdx::from_byte(3).unwrap(), idxs[2]);
        assert!(PlayerIdx::from_ordinal(3, 3).is_err());
    }

    proptest! {
        #[test]
        fn distinct_nonzero_and_deterministic(n in 0usize..=MAX_PLAYERS) {
            let idxs = player_idxs(n).unwrap();
            prop_assert_eq!(idxs.len(), n);
            prop_assert_eq!(&idxs, &player_idxs(n).unwrap());
            let xs: Vec<ark_bls12_381::Fr> = idxs.iter().map(|i| i.scalar()).collect();
            for (j, x) in xs.iter().enumerate() {
                prop_assert!(!x.is_zero());
                prop_assert!(xs[..j].iter().all(|y| y != x));
                prop_assert_eq!(idxs[j].ordinal(), j);
            }
        }
    }
}
