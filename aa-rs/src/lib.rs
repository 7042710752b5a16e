//! ERC-4337 v0.7 user operations for EIP-7702 delegated EOAs.
//!
//! Packs and hashes user operations, signs them, encodes ERC-7821 batch execution and
//! deploys contracts deterministically through a keyless CREATE2 factory.

pub mod bundler;
pub mod config;
pub mod delegation;
pub mod deploy;
pub mod encoding;
pub mod entry_point;
pub mod error;
pub mod execution;
pub mod gas;
pub mod hash;
pub mod signer;
pub mod types;

pub use error::{Error, Result};
