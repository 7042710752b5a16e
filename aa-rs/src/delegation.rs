//! EIP-7702 delegation status of an EOA.

use crate::error::{Error, Result};
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes};

/// Prefix of an EIP-7702 delegation designator (`0xef0100 ‖ address`).
pub const DELEGATION_PREFIX: [u8; 3] = [0xef, 0x01, 0x00];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DelegationStatus {
    NotDelegated,
    DelegatedTo(Address),
    /// Code that is not a delegation designator (a regular contract).
    HasForeignCode(Bytes),
}

impl DelegationStatus {
    pub fn from_code(code: &[u8]) -> Self {
        if code.is_empty() {
            return DelegationStatus::NotDelegated;
        }
        if code.len() == DELEGATION_PREFIX.len() + 20 && code.starts_with(&DELEGATION_PREFIX) {
            return DelegationStatus::DelegatedTo(Address::from_slice(&code[3..]));
        }
        DelegationStatus::HasForeignCode(Bytes::from(code.to_vec()))
    }

    pub fn delegate(&self) -> Option<Address> {
        match self {
            DelegationStatus::DelegatedTo(addr) => Some(*addr),
            _ => None,
        }
    }
}

pub async fn delegation_status<M: Middleware + 'static>(
    client: &M,
    account: Address,
) -> Result<DelegationStatus> {
    let code = client
        .get_code(account, None)
        .await
        .map_err(|e| Error::rpc("eth_getCode failed", e))?;

    let status = DelegationStatus::from_code(&code);
    match &status {
        DelegationStatus::NotDelegated => tracing::debug!(?account, "no delegation"),
        DelegationStatus::DelegatedTo(to) => tracing::debug!(?account, delegate = ?to, "delegated"),
        DelegationStatus::HasForeignCode(code) => tracing::warn!(
            ?account,
            code_len = code.len(),
            "account has code that is not an EIP-7702 delegation"
        ),
    }
    Ok(status)
}
