use crate::error::{Error, Result};
use crate::types::{PackedUserOperation, UserOperation};
use ethers::types::{Address, Bytes, H256, U256};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &[u8]) -> String {
    format!("0x{}", hex::encode(b))
}

fn decode_hex(what: &'static str, s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| Error::MalformedHex {
        what,
        reason: e.to_string(),
    })
}

pub fn parse_u256_quantity(s: &str) -> Result<U256> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(s, 16).map_err(|e| Error::MalformedHex {
        what: "quantity",
        reason: e.to_string(),
    })
}

/// Accepts either a `0x`-prefixed hex quantity or a plain decimal string.
pub fn parse_u256(s: &str) -> Result<U256> {
    let s = s.trim();
    if s.starts_with("0x") {
        return parse_u256_quantity(s);
    }
    U256::from_dec_str(s).map_err(|e| Error::Encoding(format!("invalid integer {s:?}: {e}")))
}

pub fn parse_h256(s: &str) -> Result<H256> {
    let bytes = decode_hex("bytes32", s)?;
    if bytes.len() != 32 {
        return Err(Error::MalformedHex {
            what: "bytes32",
            reason: format!("expected 32 bytes, got {}", bytes.len()),
        });
    }
    Ok(H256::from_slice(&bytes))
}

pub fn parse_address(s: &str) -> Result<Address> {
    let bytes = decode_hex("address", s)?;
    if bytes.len() != 20 {
        return Err(Error::MalformedHex {
            what: "address",
            reason: format!("expected 20 bytes, got {}", bytes.len()),
        });
    }
    Ok(Address::from_slice(&bytes))
}

/// Variable-length hex. `"0x"` and `""` both decode to empty bytes.
pub fn parse_bytes(s: &str) -> Result<Bytes> {
    decode_hex("bytes", s).map(Bytes::from)
}

pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

/// Unpacked user operation as sent to `eth_sendUserOperation`.
pub fn user_op_to_json(op: &UserOperation) -> serde_json::Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    })
}

/// Packed (on-chain) layout, as printed by the CLI and accepted by `handleOps`.
pub fn packed_user_op_to_json(op: &PackedUserOperation) -> serde_json::Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "accountGasLimits": fmt_bytes(&op.account_gas_limits),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "gasFees": fmt_bytes(&op.gas_fees),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    })
}
