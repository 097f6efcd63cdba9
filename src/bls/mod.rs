/// Threshold BLS: partial signatures, their recovery and verification.
pub mod threshold;

/// Collects verified partial signatures on a single message.
pub mod agg;

/// Vanilla BLS signature scheme.
pub mod vanilla;
