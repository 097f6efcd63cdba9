use ark_serialize::SerializationError;
use thiserror::Error;

use crate::player_idx::PlayerIdx;

/// Errors surfaced by the threshold protocols.
///
/// Protocol violations (bad signatures, malformed shares, duplicate dealers) are returned
/// by the low-level checks, but the reporting plugins log and drop the offending contribution
/// instead of failing the round.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors.
    #[error("too many players: {n} > {max}")]
    TooManyPlayers { n: usize, max: usize },
    #[error("threshold {t} is invalid for {n} players")]
    InvalidThreshold { t: usize, n: usize },
    #[error("player index {idx} out of range for a collection of {len}")]
    PlayerIndexOutOfRange { idx: PlayerIdx, len: usize },
    #[error("oracle {ordinal} is not a member of a committee of {n}")]
    UnknownOracle { ordinal: usize, n: usize },
    #[error("player index 0 is reserved")]
    ZeroPlayerIndex,
    #[error("unknown encryption group: {0}")]
    UnknownEncryptionGroup(String),
    #[error("unknown translator: {0}")]
    UnknownTranslator(String),
    #[error("translator {translator} cannot map into {group}")]
    TranslatorMismatch {
        translator: &'static str,
        group: &'static str,
    },
    #[error("unsupported config version: {0}")]
    UnsupportedVersion(u8),
    #[error("unexpected length for {what}: expected {expected}, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{0} trailing bytes")]
    Overage(usize),
    #[error("varint overflow")]
    VarintOverflow,
    #[error("local keys do not match the offchain config")]
    KeyMismatch,

    // Protocol violations.
    #[error("invalid signature from dealer {0}")]
    InvalidSignature(PlayerIdx),
    #[error("commitment has degree {got}, expected {expected}")]
    CommitmentWrongDegree { expected: usize, got: usize },
    #[error("share set has {got} shares, expected {expected}")]
    ShareCountMismatch { expected: usize, got: usize },
    #[error("share for player {0} does not lie on the commitment")]
    ShareWrongCommitment(PlayerIdx),
    #[error("translated share for player {0} is inconsistent with the commitment")]
    TranslationMismatch(PlayerIdx),
    #[error("share set is bound to a different config digest")]
    ConfigDigestMismatch,
    #[error("dealer mismatch: record claims {claimed}, share set says {actual}")]
    DealerMismatch { claimed: PlayerIdx, actual: PlayerIdx },
    #[error("duplicate contribution from {0}")]
    DuplicateDealer(PlayerIdx),
    #[error("unable to decrypt share for player {0}")]
    DecryptionFailed(PlayerIdx),
    #[error("partial signature from {0} failed the pairing check")]
    InvalidPartialSignature(PlayerIdx),
    #[error("insufficient contributions: have {have}, need {need}")]
    InsufficientContributions { have: usize, need: usize },
    #[error("recovered signature failed verification")]
    InvalidThresholdSignature,
    #[error("hash to curve failed: {0}")]
    HashToCurve(String),

    // Key availability.
    #[error("no distributed key for {0}")]
    KeyUnavailable(String),
    #[error("no local share record with hash {0}")]
    MissingShareRecord(String),
    #[error("on-chain key data is empty")]
    EmptyOnchainKey,

    // Invariant violations, fail-closed.
    #[error("invariant violated: {0}")]
    InvariantViolation(&'static str),

    // Concurrency guard.
    #[error("a DKG round is already in progress in this process")]
    DkgInProgress,

    // External collaborators.
    #[error("context cancelled")]
    Cancelled,
    #[error("contract: {0}")]
    Contract(String),
    #[error("coordinator: {0}")]
    Coordinator(String),
    #[error("persistence: {0}")]
    Persistence(String),
    #[error("serialization: {0}")]
    Serialization(#[from] SerializationError),
}
