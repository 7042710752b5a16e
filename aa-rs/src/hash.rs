//! Canonical `userOpHash` computation.
//!
//! The hash is domain separated: the same operation hashes differently per EntryPoint
//! and per chain. It can be computed locally or by asking the EntryPoint itself; when
//! both are used they must agree byte for byte.

use crate::entry_point::EntryPoint;
use crate::error::{Error, Result};
use crate::types::PackedUserOperation;
use ethers::abi::{encode, Token};
use ethers::providers::Middleware;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

/// `keccak256(abi.encode(...))` over the packed fields, with every variable-length
/// field replaced by its digest. The signature is never part of the input.
pub fn struct_hash(op: &PackedUserOperation) -> H256 {
    let encoded = encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(&op.init_code).to_vec()),
        Token::FixedBytes(keccak256(&op.call_data).to_vec()),
        Token::FixedBytes(op.account_gas_limits.to_vec()),
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(op.gas_fees.to_vec()),
        Token::FixedBytes(keccak256(&op.paymaster_and_data).to_vec()),
    ]);
    keccak256(encoded).into()
}

pub fn user_op_hash_offchain(op: &PackedUserOperation, entry_point: Address, chain_id: U256) -> H256 {
    keccak256(encode(&[
        Token::FixedBytes(struct_hash(op).as_bytes().to_vec()),
        Token::Address(entry_point),
        Token::Uint(chain_id),
    ]))
    .into()
}

pub async fn user_op_hash_onchain<M: Middleware + 'static>(
    entry_point: &EntryPoint<M>,
    op: &PackedUserOperation,
) -> Result<H256> {
    entry_point.get_user_op_hash(op).await
}

/// Returns the agreed hash, or `HashMismatch` if the two computations differ.
pub fn ensure_hashes_agree(local: H256, reference: H256) -> Result<H256> {
    if local != reference {
        return Err(Error::HashMismatch { local, reference });
    }
    Ok(local)
}

/// How a [`UserOpHasher`] derives the hash it hands to the signer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HashStrategy {
    /// Local computation only. For offline use.
    LocalOnly,
    /// Local computation, confirmed against `EntryPoint.getUserOpHash`.
    #[default]
    CrossChecked,
}

pub struct UserOpHasher<M> {
    entry_point: EntryPoint<M>,
    chain_id: U256,
    strategy: HashStrategy,
}

impl<M: Middleware + 'static> UserOpHasher<M> {
    pub fn new(entry_point: EntryPoint<M>, chain_id: U256, strategy: HashStrategy) -> Self {
        Self {
            entry_point,
            chain_id,
            strategy,
        }
    }

    pub fn local(&self, op: &PackedUserOperation) -> H256 {
        user_op_hash_offchain(op, self.entry_point.address(), self.chain_id)
    }

    pub async fn hash(&self, op: &PackedUserOperation) -> Result<H256> {
        let local = self.local(op);
        match self.strategy {
            HashStrategy::LocalOnly => Ok(local),
            HashStrategy::CrossChecked => {
                let reference = user_op_hash_onchain(&self.entry_point, op).await?;
                let agreed = ensure_hashes_agree(local, reference)?;
                tracing::debug!(user_op_hash = ?agreed, "local and entryPoint userOpHash agree");
                Ok(agreed)
            }
        }
    }
}
