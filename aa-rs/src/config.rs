use crate::deploy::Create2Factory;
use crate::encoding::{parse_address, parse_bytes, parse_u256};
use crate::entry_point::ENTRY_POINT_V07;
use crate::error::{Error, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRaw {
    pub chain_id: u64,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub bundler_url: Option<String>,
    #[serde(default)]
    pub create2: Option<Create2Raw>,
}

/// Overrides for chains where the keyless factory cannot be used as is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Create2Raw {
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub deployer: Option<String>,
    #[serde(default)]
    pub deployment_tx: Option<String>,
    #[serde(default)]
    pub deployer_funding: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub entry_point: Address,
    pub bundler_url: Option<String>,
    pub create2: Create2Factory,
}

pub fn load_network(path: &Path, rpc_override: Option<String>) -> Result<NetworkConfig> {
    let raw = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read network json at {}: {e}", path.display()))
    })?;
    let raw: NetworkRaw = serde_json::from_str(&raw).map_err(|e| {
        Error::Config(format!("failed to parse network json at {}: {e}", path.display()))
    })?;
    NetworkConfig::from_raw(raw, rpc_override)
}

impl NetworkConfig {
    /// Resolution order for the RPC URL: explicit override, then `rpcEnvVar`, then `rpc`.
    pub fn from_raw(raw: NetworkRaw, rpc_override: Option<String>) -> Result<Self> {
        let rpc_url = if let Some(rpc) = rpc_override {
            rpc
        } else if let Some(env_var) = raw.rpc_env_var.as_deref() {
            env::var(env_var).unwrap_or_else(|_| raw.rpc.clone())
        } else {
            raw.rpc.clone()
        };

        let entry_point = raw
            .entry_point
            .as_deref()
            .unwrap_or(ENTRY_POINT_V07);
        let entry_point = parse_address(entry_point).map_err(config_err("entryPoint"))?;

        let create2 = match raw.create2 {
            Some(overrides) => overrides.apply(Create2Factory::default())?,
            None => Create2Factory::default(),
        };

        Ok(Self {
            chain_id: raw.chain_id,
            rpc_url,
            entry_point,
            bundler_url: raw.bundler_url.filter(|u| !u.is_empty()),
            create2,
        })
    }
}

impl Create2Raw {
    fn apply(self, mut factory: Create2Factory) -> Result<Create2Factory> {
        if let Some(s) = self.factory {
            factory.address = parse_address(&s).map_err(config_err("create2.factory"))?;
        }
        if let Some(s) = self.deployer {
            factory.deployer = parse_address(&s).map_err(config_err("create2.deployer"))?;
        }
        if let Some(s) = self.deployment_tx {
            factory.deployment_tx = parse_bytes(&s).map_err(config_err("create2.deploymentTx"))?;
        }
        if let Some(s) = self.deployer_funding {
            factory.deployer_funding =
                parse_u256(&s).map_err(config_err("create2.deployerFunding"))?;
        }
        Ok(factory)
    }
}

fn config_err(field: &'static str) -> impl Fn(Error) -> Error {
    move |e| Error::Config(format!("invalid {field}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    fn raw(json: &str) -> NetworkRaw {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let cfg = NetworkConfig::from_raw(
            raw(r#"{ "chainId": 31337, "rpc": "http://127.0.0.1:8545" }"#),
            None,
        )
        .unwrap();
        assert_eq!(cfg.chain_id, 31337);
        assert_eq!(cfg.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(cfg.entry_point, ENTRY_POINT_V07.parse::<Address>().unwrap());
        assert_eq!(cfg.bundler_url, None);
        assert_eq!(cfg.create2, Create2Factory::default());
    }

    #[test]
    fn rpc_resolution_order() {
        let json = r#"{ "chainId": 1, "rpc": "http://file", "rpcEnvVar": "SEOA_TEST_RPC_RESOLUTION" }"#;

        let cfg = NetworkConfig::from_raw(raw(json), None).unwrap();
        assert_eq!(cfg.rpc_url, "http://file");

        env::set_var("SEOA_TEST_RPC_RESOLUTION", "http://env");
        let cfg = NetworkConfig::from_raw(raw(json), None).unwrap();
        assert_eq!(cfg.rpc_url, "http://env");

        let cfg = NetworkConfig::from_raw(raw(json), Some("http://flag".into())).unwrap();
        assert_eq!(cfg.rpc_url, "http://flag");
        env::remove_var("SEOA_TEST_RPC_RESOLUTION");
    }

    #[test]
    fn create2_overrides() {
        let cfg = NetworkConfig::from_raw(
            raw(r#"{
                "chainId": 10,
                "rpc": "http://x",
                "bundlerUrl": "https://bundler.example",
                "create2": { "factory": "0x7777777777777777777777777777777777777777", "deployerFunding": "100" }
            }"#),
            None,
        )
        .unwrap();
        assert_eq!(cfg.bundler_url.as_deref(), Some("https://bundler.example"));
        assert_eq!(cfg.create2.address, Address::repeat_byte(0x77));
        assert_eq!(cfg.create2.deployer_funding, U256::from(100u64));
        assert_eq!(cfg.create2.deployer, Create2Factory::default().deployer);
    }

    #[test]
    fn invalid_addresses_are_config_errors() {
        let err = NetworkConfig::from_raw(
            raw(r#"{ "chainId": 1, "rpc": "http://x", "entryPoint": "0x1234" }"#),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("entryPoint")));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_network(Path::new("/nonexistent/seoa-network.json"), None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn loads_from_disk() {
        let path = env::temp_dir().join(format!("seoa-network-{}.json", std::process::id()));
        fs::write(&path, r#"{ "chainId": 11155111, "rpc": "https://sepolia.example" }"#).unwrap();
        let cfg = load_network(&path, None).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(cfg.chain_id, 11155111);
    }
}
