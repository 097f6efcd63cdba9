//! Threshold key generation and signing for a committee of oracles.
//!
//! A committee of `n` oracles, up to `t = f` of which may be faulty, runs a distributed key generation
//! on top of publicly verifiable secret sharing, and then threshold-signs per-round items with the
//! distributed key: randomness beacon outputs and recovery attestations.
//! Each protocol is a reporting plugin driven by an external round protocol
//! (query, observation, report, accept and transmit).

// The committee shares a secret `s`, player `j` knows `s_j = f(x_j)` for a degree `t` polynomial `f`
// with `f(0) = s`, and `x_j = j + 1` for the oracle ordinal `j`.
// Public keys, shares and commitments are in G2, messages and signatures are in G1.

pub mod bls;
pub mod codec;
pub mod config;
pub mod contract;
pub mod dkg;
pub mod error;
pub mod hash;
pub mod key;
pub mod persistence;
pub mod player_idx;
pub mod plugin;
pub mod poly;
pub mod pvss;
pub mod signing;
pub mod utils;

#[cfg(test)]
mod mocks;

pub use error::Error;
