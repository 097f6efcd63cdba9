use core::marker::PhantomData;

use ark_bls12_381::G1Affine;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};

use crate::Error;

/// A beacon request to fulfill with the output of its block.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, CanonicalSerialize, CanonicalDeserialize)]
pub struct Callback {
    pub request_id: u64,
    pub beacon_height: u64,
    pub confirmation_delay: u32,
    pub requester: [u8; 20],
    pub num_words: u16,
    pub gas_allowance: u64,
    pub arguments: Vec<u8>,
}

/// The verified beacon output of a block.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct VrfOutput {
    pub beacon_height: u64,
    pub confirmation_delay: u32,
    /// The threshold signature on the block, verified against the distributed key.
    pub proof: G1Affine,
    /// The requests of the block observed by more than `t` oracles.
    pub callbacks: Vec<Callback>,
}

/// The beacon report, before it's encoded for the contract.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct AbstractReport {
    pub outputs: Vec<VrfOutput>,
    pub juels_per_fee_coin: u64,
    pub reasonable_gas_price: u64,
    pub recent_block_height: u64,
    pub recent_block_hash: [u8; 32],
}

/// Encodes reports for transmission.
pub trait ReportSerializer<R>: Send + Sync {
    fn serialize_report(&self, report: &R) -> Result<Vec<u8>, Error>;

    fn deserialize_report(&self, bytes: &[u8]) -> Result<R, Error>;

    fn max_report_length(&self) -> usize;
}

/// Compressed `ark-serialize` encoding.
#[derive(Debug)]
pub struct CanonicalReportSerializer<R> {
    max_report_length: usize,
    _report: PhantomData<fn() -> R>,
}

impl<R> CanonicalReportSerializer<R> {
    pub fn new(max_report_length: usize) -> Self {
        Self {
            max_report_length,
            _report: PhantomData,
        }
    }
}

impl<R: CanonicalSerialize + CanonicalDeserialize> ReportSerializer<R> for CanonicalReportSerializer<R> {
    fn serialize_report(&self, report: &R) -> Result<Vec<u8>, Error> {
        let len = report.compressed_size();
        if len > self.max_report_length {
            return Err(Error::LengthMismatch { what: "report", expected: self.max_report_length, got: len });
        }
        let mut bytes = Vec::with_capacity(len);
        report.serialize_compressed(&mut bytes)?;
        Ok(bytes)
    }

    fn deserialize_report(&self, bytes: &[u8]) -> Result<R, Error> {
        if bytes.len() > self.max_report_length {
            return Err(Error::LengthMismatch { what: "report", expected: self.max_report_length, got: bytes.len() });
        }
        Ok(R::deserialize_compressed(bytes)?)
    }

    fn max_report_length(&self) -> usize {
        self.max_report_length
    }
}
