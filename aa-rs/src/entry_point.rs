//! Minimal EntryPoint v0.7 binding.
//!
//! `getUserOpHash` is only ever used as a cross-check oracle for the locally computed
//! hash (see [`crate::hash`]).

use crate::error::{Error, Result};
use crate::types::PackedUserOperation;
use ethers::abi::{Abi, Detokenize, Tokenize};
use ethers::contract::BaseContract;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256, U64};
use std::sync::Arc;

/// Canonical EntryPoint v0.7 deployment.
pub const ENTRY_POINT_V07: &str = "0x0000000071727De22E5E9d8BAf0edAc6f37da032";

const PACKED_USER_OP_COMPONENTS: &str = r#"[
    {"internalType":"address","name":"sender","type":"address"},
    {"internalType":"uint256","name":"nonce","type":"uint256"},
    {"internalType":"bytes","name":"initCode","type":"bytes"},
    {"internalType":"bytes","name":"callData","type":"bytes"},
    {"internalType":"bytes32","name":"accountGasLimits","type":"bytes32"},
    {"internalType":"uint256","name":"preVerificationGas","type":"uint256"},
    {"internalType":"bytes32","name":"gasFees","type":"bytes32"},
    {"internalType":"bytes","name":"paymasterAndData","type":"bytes"},
    {"internalType":"bytes","name":"signature","type":"bytes"}
]"#;

fn entry_point_abi() -> Result<Abi> {
    let abi = format!(
        r#"[
        {{"inputs":[{{"components":{c},"internalType":"struct PackedUserOperation","name":"userOp","type":"tuple"}}],"name":"getUserOpHash","outputs":[{{"internalType":"bytes32","name":"","type":"bytes32"}}],"stateMutability":"view","type":"function"}},
        {{"inputs":[{{"components":{c},"internalType":"struct PackedUserOperation[]","name":"ops","type":"tuple[]"}},{{"internalType":"address payable","name":"beneficiary","type":"address"}}],"name":"handleOps","outputs":[],"stateMutability":"nonpayable","type":"function"}},
        {{"inputs":[{{"internalType":"address","name":"sender","type":"address"}},{{"internalType":"uint192","name":"key","type":"uint192"}}],"name":"getNonce","outputs":[{{"internalType":"uint256","name":"nonce","type":"uint256"}}],"stateMutability":"view","type":"function"}},
        {{"inputs":[{{"internalType":"address","name":"account","type":"address"}}],"name":"balanceOf","outputs":[{{"internalType":"uint256","name":"","type":"uint256"}}],"stateMutability":"view","type":"function"}},
        {{"inputs":[{{"internalType":"address","name":"account","type":"address"}}],"name":"depositTo","outputs":[],"stateMutability":"payable","type":"function"}}
    ]"#,
        c = PACKED_USER_OP_COMPONENTS
    );
    serde_json::from_str(&abi).map_err(|e| Error::Encoding(format!("EntryPoint ABI: {e}")))
}

#[derive(Debug, Clone)]
pub struct EntryPoint<M> {
    address: Address,
    contract: BaseContract,
    client: Arc<M>,
}

impl<M: Middleware + 'static> EntryPoint<M> {
    pub fn new(address: Address, client: Arc<M>) -> Result<Self> {
        Ok(Self {
            address,
            contract: BaseContract::from(entry_point_abi()?),
            client,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn encode<T: Tokenize>(&self, method: &str, args: T) -> Result<Bytes> {
        self.contract
            .encode(method, args)
            .map_err(|e| Error::Encoding(format!("{method}: {e}")))
    }

    async fn view<D: Detokenize>(&self, method: &'static str, data: Bytes) -> Result<D> {
        let tx = TransactionRequest::new().to(self.address).data(data);
        let out = self
            .client
            .call(&tx.into(), None)
            .await
            .map_err(|e| Error::rpc(method, e))?;
        self.contract
            .decode_output(method, out)
            .map_err(|e| Error::Encoding(format!("{method} output: {e}")))
    }

    async fn transact(&self, method: &'static str, data: Bytes, value: U256) -> Result<TransactionReceipt> {
        let tx = TransactionRequest::new()
            .to(self.address)
            .data(data)
            .value(value);
        let receipt = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| Error::rpc(method, e))?
            .await
            .map_err(|e| Error::rpc(method, e))?
            .ok_or_else(|| Error::rpc(method, "transaction dropped from mempool"))?;

        if receipt.status != Some(U64::one()) {
            return Err(Error::rpc(
                method,
                format!("transaction {:?} reverted", receipt.transaction_hash),
            ));
        }
        Ok(receipt)
    }

    pub fn get_user_op_hash_calldata(&self, op: &PackedUserOperation) -> Result<Bytes> {
        self.encode("getUserOpHash", (op.as_abi_tuple(),))
    }

    /// Reference `EntryPoint.getUserOpHash` computation.
    pub async fn get_user_op_hash(&self, op: &PackedUserOperation) -> Result<H256> {
        let data = self.get_user_op_hash_calldata(op)?;
        self.view("getUserOpHash", data).await
    }

    /// Nonce for key 0; other nonce keys are not used.
    pub async fn get_nonce(&self, sender: Address) -> Result<U256> {
        let data = self.encode("getNonce", (sender, U256::zero()))?;
        self.view("getNonce", data).await
    }

    pub async fn balance_of(&self, account: Address) -> Result<U256> {
        let data = self.encode("balanceOf", (account,))?;
        self.view("balanceOf", data).await
    }

    pub async fn deposit_to(&self, account: Address, amount: U256) -> Result<TransactionReceipt> {
        let data = self.encode("depositTo", (account,))?;
        self.transact("depositTo", data, amount).await
    }

    pub fn handle_ops_calldata(
        &self,
        ops: &[PackedUserOperation],
        beneficiary: Address,
    ) -> Result<Bytes> {
        let tuples: Vec<_> = ops.iter().map(PackedUserOperation::as_abi_tuple).collect();
        self.encode("handleOps", (tuples, beneficiary))
    }

    /// Submits signed operations straight to the EntryPoint, bypassing a bundler.
    pub async fn handle_ops(
        &self,
        ops: &[PackedUserOperation],
        beneficiary: Address,
    ) -> Result<TransactionReceipt> {
        let data = self.handle_ops_calldata(ops, beneficiary)?;
        let receipt = self.transact("handleOps", data, U256::zero()).await?;
        tracing::info!(
            tx = ?receipt.transaction_hash,
            ops = ops.len(),
            "handleOps included"
        );
        Ok(receipt)
    }
}
