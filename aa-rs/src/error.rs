use ethers::types::{Address, H256, U256};

/// Errors produced by the packing, hashing, signing and deployment layers.
///
/// Pure encoding/hashing/signing failures are deterministic and are never retried.
/// `HashMismatch` and `SignatureMismatch` are integrity failures: an operation that hit
/// either must not be submitted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{field} does not fit in 128 bits: {value}")]
    ValueOutOfRange { field: &'static str, value: U256 },

    #[error("userOpHash mismatch: local {local:?}, entryPoint {reference:?}")]
    HashMismatch { local: H256, reference: H256 },

    #[error("signature recovers to {recovered:?}, expected {expected:?}")]
    SignatureMismatch { expected: Address, recovered: Address },

    #[error("malformed hex in {what}: {reason}")]
    MalformedHex { what: &'static str, reason: String },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("deployment failed at {address:?}: {reason}")]
    DeploymentFailed { address: Address, reason: String },

    #[error("{context}: {message}")]
    Rpc {
        context: &'static str,
        message: String,
    },

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn rpc(context: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Rpc {
            context,
            message: err.to_string(),
        }
    }

    /// True for failures that indicate the operation must never be submitted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Error::HashMismatch { .. } | Error::SignatureMismatch { .. }
        )
    }
}

impl From<ethers::abi::Error> for Error {
    fn from(err: ethers::abi::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
