//! ERC-7821 execution mode word and `(address,uint256,bytes)[]` batch encoding, as
//! consumed by the account's `execute(bytes32 mode, bytes executionData)`.

use crate::error::{Error, Result};
use ethers::abi::{decode, encode, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;

pub const EXECUTE_SIGNATURE: &str = "execute(bytes32,bytes)";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CallType {
    Single,
    #[default]
    Batch,
    DelegateCall,
}

impl CallType {
    pub fn as_byte(self) -> u8 {
        match self {
            CallType::Single => 0x00,
            CallType::Batch => 0x01,
            CallType::DelegateCall => 0xff,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(CallType::Single),
            0x01 => Some(CallType::Batch),
            0xff => Some(CallType::DelegateCall),
            _ => None,
        }
    }
}

/// `Default` reverts the whole batch on the first failing call; `Try` keeps going.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExecType {
    #[default]
    Default,
    Try,
}

impl ExecType {
    pub fn as_byte(self) -> u8 {
        match self {
            ExecType::Default => 0x00,
            ExecType::Try => 0x01,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(ExecType::Default),
            0x01 => Some(ExecType::Try),
            _ => None,
        }
    }
}

/// Layout: `callType(1) ‖ execType(1) ‖ modeSelector(4) ‖ modePayload(22) ‖ zero(4)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ExecutionMode {
    pub call_type: CallType,
    pub exec_type: ExecType,
}

impl ExecutionMode {
    pub fn new(call_type: CallType, exec_type: ExecType) -> Self {
        Self {
            call_type,
            exec_type,
        }
    }

    pub fn encode(&self) -> [u8; 32] {
        // selector, payload and padding are all zero for the modes we emit
        let mut word = [0u8; 32];
        word[0] = self.call_type.as_byte();
        word[1] = self.exec_type.as_byte();
        word
    }

    pub fn decode(word: [u8; 32]) -> Result<Self> {
        let call_type = CallType::from_byte(word[0])
            .ok_or_else(|| Error::Encoding(format!("unknown call type 0x{:02x}", word[0])))?;
        let exec_type = ExecType::from_byte(word[1])
            .ok_or_else(|| Error::Encoding(format!("unknown exec type 0x{:02x}", word[1])))?;
        if word[2..].iter().any(|b| *b != 0) {
            return Err(Error::Encoding(
                "mode selector/payload must be zero".to_string(),
            ));
        }
        Ok(Self::new(call_type, exec_type))
    }
}

pub fn encode_mode(call_type: CallType, exec_type: ExecType) -> [u8; 32] {
    ExecutionMode::new(call_type, exec_type).encode()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub target: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Call {
    pub fn new(target: Address) -> Self {
        Self {
            target,
            value: U256::zero(),
            data: Bytes::new(),
        }
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn data(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.target),
            Token::Uint(self.value),
            Token::Bytes(self.data.to_vec()),
        ])
    }
}

fn batch_param() -> ParamType {
    ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Bytes,
    ])))
}

/// `abi.encode(Call[])`. Order is preserved; no validation of the calls themselves.
pub fn encode_execute_batch(calls: &[Call]) -> Bytes {
    let tokens = calls.iter().map(Call::to_token).collect();
    Bytes::from(encode(&[Token::Array(tokens)]))
}

pub fn decode_execute_batch(data: &[u8]) -> Result<Vec<Call>> {
    let mut tokens = decode(&[batch_param()], data)?;
    let Some(Token::Array(items)) = tokens.pop() else {
        return Err(Error::Encoding("batch is not an array".to_string()));
    };

    items
        .into_iter()
        .map(|item| match item {
            Token::Tuple(fields) => match fields.as_slice() {
                [Token::Address(target), Token::Uint(value), Token::Bytes(data)] => Ok(Call {
                    target: *target,
                    value: *value,
                    data: Bytes::from(data.clone()),
                }),
                _ => Err(Error::Encoding(format!("malformed call tuple: {fields:?}"))),
            },
            other => Err(Error::Encoding(format!("malformed call: {other:?}"))),
        })
        .collect()
}

/// Calldata for `execute(bytes32 mode, bytes executionData)`.
pub fn encode_execute_calldata(mode: ExecutionMode, calls: &[Call]) -> Bytes {
    let args = encode(&[
        Token::FixedBytes(mode.encode().to_vec()),
        Token::Bytes(encode_execute_batch(calls).to_vec()),
    ]);

    let mut out = id(EXECUTE_SIGNATURE).to_vec();
    out.extend_from_slice(&args);
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_mode_is_batch_fail_fast() {
        let word = ExecutionMode::default().encode();
        assert_eq!(word, encode_mode(CallType::Batch, ExecType::Default));

        let mut expected = [0u8; 32];
        expected[0] = 0x01;
        assert_eq!(word, expected);
    }

    #[test]
    fn single_only_changes_the_first_byte() {
        let batch = encode_mode(CallType::Batch, ExecType::Default);
        let single = encode_mode(CallType::Single, ExecType::Default);
        assert_eq!(single[0], 0x00);
        assert_eq!(&single[1..], &batch[1..]);
    }

    #[test]
    fn mode_bytes_for_each_variant() {
        assert_eq!(encode_mode(CallType::DelegateCall, ExecType::Try)[..2], [0xff, 0x01]);
        assert_eq!(encode_mode(CallType::Single, ExecType::Try)[..2], [0x00, 0x01]);
        for call_type in [CallType::Single, CallType::Batch, CallType::DelegateCall] {
            for exec_type in [ExecType::Default, ExecType::Try] {
                let mode = ExecutionMode::new(call_type, exec_type);
                assert_eq!(ExecutionMode::decode(mode.encode()).unwrap(), mode);
            }
        }
    }

    #[test]
    fn decode_rejects_unknown_bytes() {
        let mut word = [0u8; 32];
        word[0] = 0x02;
        assert!(ExecutionMode::decode(word).is_err());
        let mut word = [0u8; 32];
        word[10] = 0x01;
        assert!(ExecutionMode::decode(word).is_err());
    }

    #[test]
    fn batch_encoding_matches_abi_layout() {
        let target: Address = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC".parse().unwrap();
        let encoded = encode_execute_batch(&[Call::new(target).value(U256::one())]);
        assert_eq!(
            hex::encode(&encoded),
            concat!(
                "0000000000000000000000000000000000000000000000000000000000000020",
                "0000000000000000000000000000000000000000000000000000000000000001",
                "0000000000000000000000000000000000000000000000000000000000000020",
                "0000000000000000000000003c44cdddb6a900fa2b585dd299e03d12fa4293bc",
                "0000000000000000000000000000000000000000000000000000000000000001",
                "0000000000000000000000000000000000000000000000000000000000000060",
                "0000000000000000000000000000000000000000000000000000000000000000",
            )
        );
    }

    #[test]
    fn call_defaults_to_zero_value_and_empty_data() {
        let call = Call::new(Address::repeat_byte(0x01));
        assert!(call.value.is_zero());
        assert!(call.data.is_empty());
    }

    #[test]
    fn batch_decodes_in_order() {
        let calls = vec![
            Call::new(Address::repeat_byte(0x01)).value(U256::from(5u64)),
            Call::new(Address::repeat_byte(0x02)).data(Bytes::from(vec![0xde, 0xad])),
            Call::new(Address::repeat_byte(0x03)),
        ];
        let decoded = decode_execute_batch(&encode_execute_batch(&calls)).unwrap();
        assert_eq!(decoded, calls);
        assert!(decode_execute_batch(&[]).unwrap_err().to_string().contains("encoding"));
    }

    #[test]
    fn execute_calldata_layout() {
        let calls = vec![Call::new(Address::repeat_byte(0x01)).value(U256::one())];
        let data = encode_execute_calldata(ExecutionMode::default(), &calls);
        assert_eq!(hex::encode(&data[..4]), "e9ae5c53");
        assert_eq!(data[4], 0x01);
        assert_eq!(&data[5..36], &[0u8; 31]);

        let args = decode(&[ParamType::FixedBytes(32), ParamType::Bytes], &data[4..]).unwrap();
        match &args[1] {
            Token::Bytes(batch) => assert_eq!(decode_execute_batch(batch).unwrap(), calls),
            other => panic!("unexpected token {other:?}"),
        }
    }

    /// Applies a decoded batch to a balance map the way an ERC-7821 account does:
    /// `Default` reverts everything on the first failure, `Try` skips failed calls.
    struct MockAccount {
        address: Address,
        balances: HashMap<Address, U256>,
    }

    impl MockAccount {
        fn transfer(&mut self, call: &Call) -> std::result::Result<(), String> {
            let from = self.balances.get(&self.address).copied().unwrap_or_default();
            if from < call.value {
                return Err(format!("insufficient balance for {:?}", call.target));
            }
            self.balances.insert(self.address, from - call.value);
            *self.balances.entry(call.target).or_default() += call.value;
            Ok(())
        }

        fn execute(&mut self, calldata: &[u8]) -> std::result::Result<(), String> {
            let args = decode(&[ParamType::FixedBytes(32), ParamType::Bytes], &calldata[4..])
                .map_err(|e| e.to_string())?;
            let (Token::FixedBytes(mode), Token::Bytes(batch)) = (&args[0], &args[1]) else {
                return Err("bad calldata".into());
            };
            let mut word = [0u8; 32];
            word.copy_from_slice(mode);
            let mode = ExecutionMode::decode(word).map_err(|e| e.to_string())?;
            let calls = decode_execute_batch(batch).map_err(|e| e.to_string())?;

            let snapshot = self.balances.clone();
            for call in &calls {
                if let Err(e) = self.transfer(call) {
                    if mode.exec_type == ExecType::Default {
                        self.balances = snapshot;
                        return Err(e);
                    }
                }
            }
            Ok(())
        }
    }

    fn scenario() -> (MockAccount, [Address; 3], Vec<Call>) {
        let account = Address::repeat_byte(0xaa);
        let recipients = [
            Address::repeat_byte(0x01),
            Address::repeat_byte(0x02),
            Address::repeat_byte(0x03),
        ];
        let mut balances = HashMap::new();
        balances.insert(account, U256::from(10u64));
        let calls = vec![
            Call::new(recipients[0]).value(U256::from(4u64)),
            // more than what is left after the first transfer
            Call::new(recipients[1]).value(U256::from(100u64)),
            Call::new(recipients[2]).value(U256::from(4u64)),
        ];
        (
            MockAccount {
                address: account,
                balances,
            },
            recipients,
            calls,
        )
    }

    #[test]
    fn fail_fast_batch_does_not_apply_later_calls() {
        let (mut account, recipients, calls) = scenario();
        let data = encode_execute_calldata(ExecutionMode::default(), &calls);

        assert!(account.execute(&data).is_err());
        assert_eq!(account.balances[&account.address], U256::from(10u64));
        for r in recipients {
            assert!(account.balances.get(&r).copied().unwrap_or_default().is_zero());
        }
    }

    #[test]
    fn try_batch_skips_the_failing_call() {
        let (mut account, recipients, calls) = scenario();
        let data =
            encode_execute_calldata(ExecutionMode::new(CallType::Batch, ExecType::Try), &calls);

        account.execute(&data).unwrap();
        assert_eq!(account.balances[&recipients[0]], U256::from(4u64));
        assert!(account.balances.get(&recipients[1]).is_none());
        assert_eq!(account.balances[&recipients[2]], U256::from(4u64));
        assert_eq!(account.balances[&account.address], U256::from(2u64));
    }
}
