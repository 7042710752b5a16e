//! Deterministic (CREATE2) deployment through a keyless factory.
//!
//! The factory lives at the same address on every chain because it is deployed by a
//! pre-signed transaction whose sender nobody holds a key for. Given the same
//! `(factory, salt, init_code)` a contract therefore lands at the same address
//! everywhere.
//!
//! Per target the resolver goes Unresolved → FactoryReady → AddressKnown → Deployed.
//! "Code already at the address" counts as deployed; nothing is broadcast twice.
//! Concurrent calls for the same address inside one process are serialised. Separate
//! processes can still race; the loser's CREATE2 reverts and surfaces as
//! `DeploymentFailed`.

use crate::encoding::concat;
use crate::error::{Error, Result};
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, TransactionRequest, H160, H256, U256, U64};
use ethers::utils::keccak256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Arachnid's deterministic deployment proxy.
const ARACHNID_FACTORY: [u8; 20] = [
    0x4e, 0x59, 0xb4, 0x48, 0x47, 0xb3, 0x79, 0x57, 0x85, 0x88, 0x92, 0x0c, 0xa7, 0x8f, 0xbf, 0x26,
    0xc0, 0xb4, 0x95, 0x6c,
];

/// Sender of the bootstrap transaction (recovered from its fixed signature).
const ARACHNID_FACTORY_DEPLOYER: [u8; 20] = [
    0x3f, 0xab, 0x18, 0x46, 0x22, 0xdc, 0x19, 0xb6, 0x10, 0x93, 0x49, 0xb9, 0x48, 0x11, 0x49, 0x3b,
    0xf2, 0xa4, 0x53, 0x62,
];

/// Pre-EIP-155 signed transaction creating the factory (r = s = 0x2222…22, v = 27).
const ARACHNID_FACTORY_DEPLOYMENT_TX: [u8; 167] = [
    0xf8, 0xa5, 0x80, 0x85, 0x17, 0x48, 0x76, 0xe8, 0x00, 0x83, 0x01, 0x86,
    0xa0, 0x80, 0x80, 0xb8, 0x53, 0x60, 0x45, 0x80, 0x60, 0x0e, 0x60, 0x00,
    0x39, 0x80, 0x60, 0x00, 0xf3, 0x50, 0xfe, 0x7f, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xe0, 0x36, 0x01, 0x60, 0x00, 0x81, 0x60, 0x20, 0x82,
    0x37, 0x80, 0x35, 0x82, 0x82, 0x34, 0xf5, 0x80, 0x15, 0x15, 0x60, 0x39,
    0x57, 0x81, 0x82, 0xfd, 0x5b, 0x80, 0x82, 0x52, 0x50, 0x50, 0x50, 0x60,
    0x14, 0x60, 0x0c, 0xf3, 0x1b, 0xa0, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
    0x22, 0x22, 0xa0, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
];

/// 0.01 ether: 100 gwei * 100k gas for the bootstrap transaction.
const ARACHNID_DEPLOYER_FUNDING_WEI: u64 = 10_000_000_000_000_000;

/// Well-known factory constants. Injected into the resolver so that test and
/// production factories can coexist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Create2Factory {
    pub address: Address,
    pub deployer: Address,
    pub deployment_tx: Bytes,
    pub deployer_funding: U256,
}

impl Default for Create2Factory {
    fn default() -> Self {
        Self {
            address: H160(ARACHNID_FACTORY),
            deployer: H160(ARACHNID_FACTORY_DEPLOYER),
            deployment_tx: Bytes::from_static(&ARACHNID_FACTORY_DEPLOYMENT_TX),
            deployer_funding: U256::from(ARACHNID_DEPLOYER_FUNDING_WEI),
        }
    }
}

/// `keccak256(0xff ‖ factory ‖ salt ‖ keccak256(init_code))[12..]`
pub fn create2_address(factory: Address, salt: H256, init_code: &[u8]) -> Address {
    let init_code_hash = keccak256(init_code);
    let digest = keccak256(concat(&[
        &[0xff],
        factory.as_bytes(),
        salt.as_bytes(),
        &init_code_hash,
    ]));
    Address::from_slice(&digest[12..])
}

/// Calldata understood by the factory: `salt ‖ init_code`.
pub fn factory_calldata(salt: H256, init_code: &[u8]) -> Bytes {
    Bytes::from(concat(&[salt.as_bytes(), init_code]))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Reverted,
    Dropped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: H256,
    pub status: TxStatus,
}

/// The chain operations the resolver needs. Each send waits for inclusion.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn code_at(&self, address: Address) -> Result<Bytes>;

    async fn send_and_confirm(&self, to: Address, value: U256, data: Bytes) -> Result<TxOutcome>;

    async fn broadcast_raw_and_confirm(&self, raw: Bytes) -> Result<TxOutcome>;
}

/// [`ChainClient`] over any ethers middleware (typically a `SignerMiddleware`).
#[derive(Debug, Clone)]
pub struct MiddlewareChain<M> {
    client: Arc<M>,
}

impl<M> MiddlewareChain<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

fn outcome_of(tx_hash: H256, receipt: Option<ethers::types::TransactionReceipt>) -> TxOutcome {
    let status = match receipt {
        None => TxStatus::Dropped,
        Some(r) if r.status == Some(U64::one()) => TxStatus::Success,
        Some(_) => TxStatus::Reverted,
    };
    TxOutcome { tx_hash, status }
}

#[async_trait]
impl<M: Middleware + 'static> ChainClient for MiddlewareChain<M> {
    async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.client
            .get_code(address, None)
            .await
            .map_err(|e| Error::rpc("eth_getCode failed", e))
    }

    async fn send_and_confirm(&self, to: Address, value: U256, data: Bytes) -> Result<TxOutcome> {
        let tx = TransactionRequest::new().to(to).value(value).data(data);
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| Error::rpc("failed to send transaction", e))?;
        let tx_hash = pending.tx_hash();
        let receipt = pending
            .await
            .map_err(|e| Error::rpc("failed waiting for receipt", e))?;
        Ok(outcome_of(tx_hash, receipt))
    }

    async fn broadcast_raw_and_confirm(&self, raw: Bytes) -> Result<TxOutcome> {
        let pending = self
            .client
            .send_raw_transaction(raw)
            .await
            .map_err(|e| Error::rpc("failed to broadcast raw transaction", e))?;
        let tx_hash = pending.tx_hash();
        let receipt = pending
            .await
            .map_err(|e| Error::rpc("failed waiting for receipt", e))?;
        Ok(outcome_of(tx_hash, receipt))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentOutcome {
    AlreadyDeployed,
    Deployed { tx_hash: H256 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    pub salt: H256,
    pub outcome: DeploymentOutcome,
}

fn ensure_success(outcome: TxOutcome, address: Address, what: &str) -> Result<H256> {
    match outcome.status {
        TxStatus::Success => Ok(outcome.tx_hash),
        TxStatus::Reverted => Err(Error::DeploymentFailed {
            address,
            reason: format!("{what} {:?} reverted", outcome.tx_hash),
        }),
        TxStatus::Dropped => Err(Error::DeploymentFailed {
            address,
            reason: format!("{what} {:?} was not included", outcome.tx_hash),
        }),
    }
}

pub struct DeterministicDeployer<C> {
    client: C,
    factory: Create2Factory,
    factory_ready: OnceCell<()>,
    in_flight: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
}

impl<C: ChainClient> DeterministicDeployer<C> {
    pub fn new(client: C, factory: Create2Factory) -> Self {
        Self {
            client,
            factory,
            factory_ready: OnceCell::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &Create2Factory {
        &self.factory
    }

    pub fn predict_address(&self, init_code: &[u8], salt: H256) -> Address {
        create2_address(self.factory.address, salt, init_code)
    }

    /// Makes sure the factory has code, broadcasting its bootstrap transaction if not.
    /// Runs at most once per resolver.
    pub async fn ensure_factory(&self) -> Result<()> {
        self.factory_ready
            .get_or_try_init(|| self.bootstrap_factory())
            .await
            .map(|_| ())
    }

    async fn bootstrap_factory(&self) -> Result<()> {
        let factory = self.factory.address;
        if !self.client.code_at(factory).await?.is_empty() {
            tracing::debug!(?factory, "create2 factory present");
            return Ok(());
        }

        tracing::info!(?factory, deployer = ?self.factory.deployer, "deploying create2 factory for the first time");
        let funding = self
            .client
            .send_and_confirm(
                self.factory.deployer,
                self.factory.deployer_funding,
                Bytes::new(),
            )
            .await?;
        ensure_success(funding, factory, "factory deployer funding")?;

        let bootstrap = self
            .client
            .broadcast_raw_and_confirm(self.factory.deployment_tx.clone())
            .await?;
        let tx_hash = ensure_success(bootstrap, factory, "factory bootstrap")?;

        if self.client.code_at(factory).await?.is_empty() {
            return Err(Error::DeploymentFailed {
                address: factory,
                reason: format!("no factory code after bootstrap {tx_hash:?}"),
            });
        }
        tracing::info!(?factory, tx = ?tx_hash, "create2 factory deployed");
        Ok(())
    }

    async fn address_lock(&self, address: Address) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        in_flight.entry(address).or_default().clone()
    }

    /// Drops the per-address lock once no other caller holds or awaits it.
    async fn release_address_lock(&self, address: Address, lock: &Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        // one reference in the map, one held by the caller
        if Arc::strong_count(lock) == 2 {
            in_flight.remove(&address);
        }
    }

    /// Deploys `init_code` at its CREATE2 address unless code is already there.
    ///
    /// Calling this again with the same inputs returns the same address without
    /// broadcasting anything. Empty init code is rejected before touching the chain.
    pub async fn deploy(&self, init_code: &[u8], salt: H256) -> Result<Deployment> {
        if init_code.is_empty() {
            return Err(Error::Encoding("init code is empty".to_string()));
        }
        self.ensure_factory().await?;

        let address = self.predict_address(init_code, salt);
        tracing::debug!(?address, ?salt, "create2 address resolved");

        let lock = self.address_lock(address).await;
        let result = {
            let _guard = lock.lock().await;
            self.deploy_at(address, init_code, salt).await
        };
        self.release_address_lock(address, &lock).await;
        result
    }

    async fn deploy_at(&self, address: Address, init_code: &[u8], salt: H256) -> Result<Deployment> {
        if !self.client.code_at(address).await?.is_empty() {
            tracing::debug!(?address, "already deployed; skipping");
            return Ok(Deployment {
                address,
                salt,
                outcome: DeploymentOutcome::AlreadyDeployed,
            });
        }

        tracing::info!(?address, init_code_len = init_code.len(), "deploying via create2 factory");
        let outcome = self
            .client
            .send_and_confirm(
                self.factory.address,
                U256::zero(),
                factory_calldata(salt, init_code),
            )
            .await?;
        let tx_hash = ensure_success(outcome, address, "create2 deployment")?;

        if self.client.code_at(address).await?.is_empty() {
            return Err(Error::DeploymentFailed {
                address,
                reason: format!("no code at predicted address after {tx_hash:?}"),
            });
        }

        tracing::info!(?address, tx = ?tx_hash, "deployed");
        Ok(Deployment {
            address,
            salt,
            outcome: DeploymentOutcome::Deployed { tx_hash },
        })
    }
}
