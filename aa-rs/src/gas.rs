//! Packing of two 128-bit gas values into one 32-byte word, as used by the
//! `accountGasLimits` and `gasFees` fields of a packed user operation.

use crate::error::{Error, Result};
use ethers::types::U256;

fn check_u128(field: &'static str, value: U256) -> Result<u128> {
    if value.bits() > 128 {
        return Err(Error::ValueOutOfRange { field, value });
    }
    Ok(value.as_u128())
}

fn pack_named(
    high_field: &'static str,
    high: U256,
    low_field: &'static str,
    low: U256,
) -> Result<[u8; 32]> {
    let high = check_u128(high_field, high)?;
    let low = check_u128(low_field, low)?;

    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&high.to_be_bytes());
    out[16..].copy_from_slice(&low.to_be_bytes());
    Ok(out)
}

/// Big-endian `high ‖ low`. Values wider than 128 bits are rejected, never truncated.
pub fn pack_u128_pair(high: U256, low: U256) -> Result<[u8; 32]> {
    pack_named("high", high, "low", low)
}

pub fn unpack_u128_pair(word: [u8; 32]) -> (U256, U256) {
    (
        U256::from_big_endian(&word[..16]),
        U256::from_big_endian(&word[16..]),
    )
}

/// `accountGasLimits = verificationGasLimit ‖ callGasLimit`
pub fn pack_account_gas_limits(verification_gas_limit: U256, call_gas_limit: U256) -> Result<[u8; 32]> {
    pack_named(
        "verificationGasLimit",
        verification_gas_limit,
        "callGasLimit",
        call_gas_limit,
    )
}

/// `gasFees = maxFeePerGas ‖ maxPriorityFeePerGas`
pub fn pack_gas_fees(max_fee_per_gas: U256, max_priority_fee_per_gas: U256) -> Result<[u8; 32]> {
    pack_named(
        "maxFeePerGas",
        max_fee_per_gas,
        "maxPriorityFeePerGas",
        max_priority_fee_per_gas,
    )
}
