use crate::error::{Error, Result};
use crate::types::PackedUserOperation;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, RecoveryMessage, Signature, H256};
use ethers::utils::hash_message;

/// Signs `userOpHash` as an EIP-191 personal message and checks that the signature
/// recovers to the wallet's own address before returning it.
pub fn sign_user_op_hash(wallet: &LocalWallet, user_op_hash: H256) -> Result<Signature> {
    let digest = hash_message(user_op_hash.as_bytes());
    let signature = wallet
        .sign_hash(digest)
        .map_err(|e| Error::Signing(e.to_string()))?;

    verify_user_op_signature(user_op_hash, &signature.to_vec(), wallet.address())?;
    Ok(signature)
}

pub fn recover_signer(user_op_hash: H256, signature: &Signature) -> Result<Address> {
    signature
        .recover(RecoveryMessage::Data(user_op_hash.as_bytes().to_vec()))
        .map_err(|e| Error::Signing(format!("recovery failed: {e}")))
}

/// Checks 65-byte `r ‖ s ‖ v` signature bytes against the expected signer.
pub fn verify_user_op_signature(
    user_op_hash: H256,
    signature: &[u8],
    expected: Address,
) -> Result<()> {
    let signature = Signature::try_from(signature).map_err(|e| Error::MalformedHex {
        what: "signature",
        reason: e.to_string(),
    })?;
    let recovered = recover_signer(user_op_hash, &signature)?;
    if recovered != expected {
        return Err(Error::SignatureMismatch {
            expected,
            recovered,
        });
    }
    Ok(())
}

/// Signs `op` over the hash that was computed from it and attaches the signature.
///
/// Takes the packed operation by value: nothing can change between hashing and signing.
pub fn sign_packed_user_op(
    wallet: &LocalWallet,
    op: PackedUserOperation,
    user_op_hash: H256,
) -> Result<PackedUserOperation> {
    let signature = sign_user_op_hash(wallet, user_op_hash)?;
    Ok(op.with_signature(Bytes::from(signature.to_vec())))
}
