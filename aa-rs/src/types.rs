use crate::error::Result;
use crate::gas::{pack_account_gas_limits, pack_gas_fees};
use ethers::abi::{Token, Tokenizable};
use ethers::types::{Address, Bytes, U256};

/// ERC-4337 user operation in its logical (unpacked) form.
///
/// The gas limits and fee fields are carried as `U256` but must fit in 128 bits;
/// [`UserOperation::pack`] rejects anything wider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

/// EntryPoint v0.7 `PackedUserOperation`.
///
/// Only produced by [`UserOperation::pack`]; the signature is the one field that may be
/// attached afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub account_gas_limits: [u8; 32],
    pub pre_verification_gas: U256,
    pub gas_fees: [u8; 32],
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

/// Solidity tuple `(address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes)`.
pub type PackedUserOperationTuple = (
    Address,
    U256,
    Bytes,
    Bytes,
    [u8; 32],
    U256,
    [u8; 32],
    Bytes,
    Bytes,
);

impl UserOperation {
    pub fn pack(&self) -> Result<PackedUserOperation> {
        let account_gas_limits =
            pack_account_gas_limits(self.verification_gas_limit, self.call_gas_limit)?;
        let gas_fees = pack_gas_fees(self.max_fee_per_gas, self.max_priority_fee_per_gas)?;

        Ok(PackedUserOperation {
            sender: self.sender,
            nonce: self.nonce,
            init_code: self.init_code.clone(),
            call_data: self.call_data.clone(),
            account_gas_limits,
            pre_verification_gas: self.pre_verification_gas,
            gas_fees,
            paymaster_and_data: self.paymaster_and_data.clone(),
            signature: self.signature.clone(),
        })
    }
}

impl PackedUserOperation {
    pub fn with_signature(self, signature: Bytes) -> Self {
        Self { signature, ..self }
    }

    /// Returns a tuple matching the Solidity struct layout, suitable for
    /// calling `EntryPoint.getUserOpHash((...))` and `handleOps`.
    pub fn as_abi_tuple(&self) -> PackedUserOperationTuple {
        (
            self.sender,
            self.nonce,
            self.init_code.clone(),
            self.call_data.clone(),
            self.account_gas_limits,
            self.pre_verification_gas,
            self.gas_fees,
            self.paymaster_and_data.clone(),
            self.signature.clone(),
        )
    }

    pub fn into_token(self) -> Token {
        self.as_abi_tuple().into_token()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use crate::gas::{pack_u128_pair, unpack_u128_pair};

    pub(crate) fn fixture() -> UserOperation {
        UserOperation {
            sender: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap(),
            nonce: U256::zero(),
            init_code: Bytes::new(),
            call_data: Bytes::new(),
            call_gas_limit: U256::from(300_000u64),
            verification_gas_limit: U256::from(100_000u64),
            pre_verification_gas: U256::from(50_000u64),
            max_fee_per_gas: U256::exp10(9),
            max_priority_fee_per_gas: U256::zero(),
            paymaster_and_data: Bytes::new(),
            signature: Bytes::new(),
        }
    }

    #[test]
    fn pack_restructures_gas_fields() {
        let op = fixture();
        let packed = op.pack().unwrap();

        assert_eq!(
            packed.account_gas_limits,
            pack_u128_pair(op.verification_gas_limit, op.call_gas_limit).unwrap()
        );
        assert_eq!(
            packed.gas_fees,
            pack_u128_pair(op.max_fee_per_gas, op.max_priority_fee_per_gas).unwrap()
        );
        assert_eq!(
            unpack_u128_pair(packed.account_gas_limits),
            (op.verification_gas_limit, op.call_gas_limit)
        );
        assert_eq!(
            hex::encode(packed.gas_fees),
            "0000000000000000000000003b9aca0000000000000000000000000000000000"
        );
        assert_eq!(packed.sender, op.sender);
        assert_eq!(packed.pre_verification_gas, op.pre_verification_gas);
    }

    #[test]
    fn pack_is_referentially_transparent() {
        let op = fixture();
        assert_eq!(op.pack().unwrap(), op.pack().unwrap());
    }

    #[test]
    fn pack_carries_signature_through() {
        let mut op = fixture();
        op.signature = Bytes::from(vec![0xaa; 65]);
        let packed = op.pack().unwrap();
        assert_eq!(packed.signature, op.signature);

        let resigned = packed.with_signature(Bytes::from(vec![0xbb; 65]));
        assert_eq!(resigned.signature.as_ref(), &[0xbb; 65][..]);
    }

    #[test]
    fn pack_rejects_oversized_gas() {
        let mut op = fixture();
        op.call_gas_limit = U256::from(u128::MAX) + 1;
        assert!(matches!(
            op.pack(),
            Err(Error::ValueOutOfRange {
                field: "callGasLimit",
                ..
            })
        ));
    }

    #[test]
    fn abi_token_is_a_nine_field_tuple() {
        let packed = fixture().pack().unwrap();
        match packed.into_token() {
            Token::Tuple(fields) => {
                assert_eq!(fields.len(), 9);
                assert!(matches!(fields[4], Token::FixedBytes(ref b) if b.len() == 32));
            }
            other => panic!("unexpected token {other:?}"),
        }
    }
}
