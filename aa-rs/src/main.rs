use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ethers::prelude::*;
use seoa_aa::bundler::{BundlerClient, SubmissionOutcome};
use seoa_aa::config::{load_network, NetworkConfig};
use seoa_aa::delegation::{delegation_status, DelegationStatus};
use seoa_aa::deploy::{
    create2_address, Create2Factory, DeploymentOutcome, DeterministicDeployer, MiddlewareChain,
};
use seoa_aa::encoding::{
    fmt_address, fmt_bytes, fmt_h256, packed_user_op_to_json, parse_address, parse_bytes,
    parse_h256, parse_u256,
};
use seoa_aa::entry_point::{EntryPoint, ENTRY_POINT_V07};
use seoa_aa::execution::{encode_execute_calldata, Call, CallType, ExecType, ExecutionMode};
use seoa_aa::hash::{user_op_hash_offchain, HashStrategy, UserOpHasher};
use seoa_aa::signer::sign_packed_user_op;
use seoa_aa::types::UserOperation;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

// In --json mode stdout carries a single JSON document; human output goes to stderr.
macro_rules! outln {
    ($machine_mode:expr, $($arg:tt)*) => {{
        if $machine_mode {
            eprintln!($($arg)*);
        } else {
            println!($($arg)*);
        }
    }};
}

#[derive(Parser, Debug)]
#[command(name = "seoa-aa", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the v0.7 userOpHash of an operation, optionally checked against the EntryPoint.
    Hash(HashArgs),

    /// Print an ERC-7821 execution mode word.
    Mode(ModeArgs),

    /// Predict a CREATE2 address without touching the chain.
    Create2(Create2Args),

    /// Deploy init code through the CREATE2 factory (bootstrapping the factory if needed).
    Deploy(DeployArgs),

    /// Show the EIP-7702 delegation of an account.
    Delegation(DelegationArgs),

    /// Build, hash, sign and submit a batched UserOperation from a delegated EOA.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct NetworkArgs {
    /// Network JSON (chainId, rpc, entryPoint, bundlerUrl, create2 overrides).
    #[arg(long, env = "SEOA_NETWORK", default_value = "networks/local.json")]
    network: PathBuf,

    /// Override the chain RPC URL (otherwise taken from the network JSON).
    #[arg(long, env = "SEOA_RPC_URL")]
    rpc: Option<String>,

    /// Print a single JSON document to stdout; logs go to stderr.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct KeyArgs {
    /// Private key of the EOA that signs (and pays for direct submissions).
    #[arg(long, env = "SEOA_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,
}

#[derive(Args, Debug)]
struct UserOpArgs {
    #[arg(long)]
    sender: String,

    #[arg(long, default_value = "0")]
    nonce: String,

    #[arg(long, default_value = "0x")]
    init_code: String,

    #[arg(long, default_value = "0x")]
    call_data: String,

    #[arg(long, default_value = "300000")]
    call_gas_limit: String,

    #[arg(long, default_value = "100000")]
    verification_gas_limit: String,

    #[arg(long, default_value = "50000")]
    pre_verification_gas: String,

    #[arg(long, default_value = "1000000000")]
    max_fee_per_gas: String,

    #[arg(long, default_value = "0")]
    max_priority_fee_per_gas: String,

    #[arg(long, default_value = "0x")]
    paymaster_and_data: String,
}

#[derive(Args, Debug)]
struct HashArgs {
    #[command(flatten)]
    op: UserOpArgs,

    #[arg(long, env = "SEOA_ENTRY_POINT", default_value = ENTRY_POINT_V07)]
    entry_point: String,

    #[arg(long, env = "SEOA_CHAIN_ID", default_value_t = 31337)]
    chain_id: u64,

    /// Also ask `EntryPoint.getUserOpHash` over this RPC and require agreement.
    #[arg(long, env = "SEOA_RPC_URL")]
    rpc: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CallTypeArg {
    Single,
    Batch,
    Delegatecall,
}

impl From<CallTypeArg> for CallType {
    fn from(v: CallTypeArg) -> Self {
        match v {
            CallTypeArg::Single => CallType::Single,
            CallTypeArg::Batch => CallType::Batch,
            CallTypeArg::Delegatecall => CallType::DelegateCall,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExecTypeArg {
    /// Revert the whole batch on the first failing call.
    Default,
    /// Skip failing calls and continue.
    Try,
}

impl From<ExecTypeArg> for ExecType {
    fn from(v: ExecTypeArg) -> Self {
        match v {
            ExecTypeArg::Default => ExecType::Default,
            ExecTypeArg::Try => ExecType::Try,
        }
    }
}

#[derive(Args, Debug)]
struct ModeArgs {
    #[arg(long, value_enum, default_value = "batch")]
    call_type: CallTypeArg,

    #[arg(long, value_enum, default_value = "default")]
    exec_type: ExecTypeArg,
}

#[derive(Args, Debug)]
struct InitCodeArgs {
    /// Hex init code.
    #[arg(long, conflicts_with = "init_code_file")]
    init_code: Option<String>,

    /// File containing hex init code (e.g. a forge artifact's bytecode, extracted).
    #[arg(long)]
    init_code_file: Option<PathBuf>,

    /// bytes32 salt.
    #[arg(long, default_value = "0x0000000000000000000000000000000000000000000000000000000000000000")]
    salt: String,
}

#[derive(Args, Debug)]
struct Create2Args {
    #[command(flatten)]
    init: InitCodeArgs,

    /// Factory address (defaults to the keyless deployment proxy).
    #[arg(long)]
    factory: Option<String>,
}

#[derive(Args, Debug)]
struct DeployArgs {
    #[command(flatten)]
    network: NetworkArgs,

    #[command(flatten)]
    key: KeyArgs,

    #[command(flatten)]
    init: InitCodeArgs,
}

#[derive(Args, Debug)]
struct DelegationArgs {
    #[command(flatten)]
    network: NetworkArgs,

    /// Account to inspect.
    #[arg(long)]
    account: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SubmitVia {
    /// `eth_sendUserOperation` to the configured bundler.
    Bundler,
    /// `EntryPoint.handleOps` from the signing EOA.
    EntryPoint,
    /// Print the signed operation only.
    None,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    network: NetworkArgs,

    #[command(flatten)]
    key: KeyArgs,

    /// Calls as `target[,value[,data]]`, executed in the given order.
    #[arg(long = "call", required = true)]
    calls: Vec<String>,

    #[arg(long, value_enum, default_value = "default")]
    exec_type: ExecTypeArg,

    #[arg(long, value_enum, default_value = "bundler")]
    submit: SubmitVia,

    /// Override the bundler URL from the network JSON.
    #[arg(long, env = "SEOA_BUNDLER_URL")]
    bundler_url: Option<String>,

    /// handleOps beneficiary (defaults to the signer).
    #[arg(long)]
    beneficiary: Option<String>,

    /// After the bundler accepts the operation, look up its receipt once.
    #[arg(long, default_value_t = false)]
    receipt: bool,

    /// Skip the EntryPoint cross-check of the userOpHash.
    #[arg(long, default_value_t = false)]
    local_hash_only: bool,

    /// Deposit this much ETH into the EntryPoint for the account before sending.
    #[arg(long)]
    deposit_eth: Option<String>,

    #[arg(long, default_value = "300000")]
    call_gas_limit: String,

    #[arg(long, default_value = "150000")]
    verification_gas_limit: String,

    #[arg(long, default_value = "60000")]
    pre_verification_gas: String,

    /// Defaults to the node's gas price.
    #[arg(long)]
    max_fee_per_gas: Option<String>,

    /// Defaults to maxFeePerGas.
    #[arg(long)]
    max_priority_fee_per_gas: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // stdout is reserved for command output
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Hash(args) => cmd_hash(args).await,
        Command::Mode(args) => cmd_mode(args),
        Command::Create2(args) => cmd_create2(args),
        Command::Deploy(args) => cmd_deploy(args).await,
        Command::Delegation(args) => cmd_delegation(args).await,
        Command::Send(args) => cmd_send(args).await,
    }
}

async fn cmd_hash(args: HashArgs) -> Result<()> {
    let op = user_op_from_args(&args.op)?;
    let packed = op.pack()?;
    let entry_point = parse_address(&args.entry_point).context("invalid --entry-point")?;
    let chain_id = U256::from(args.chain_id);

    let user_op_hash = match args.rpc {
        Some(rpc) => {
            let provider = connect(&rpc, args.chain_id).await?;
            let ep = EntryPoint::new(entry_point, Arc::new(provider))?;
            UserOpHasher::new(ep, chain_id, HashStrategy::CrossChecked)
                .hash(&packed)
                .await?
        }
        None => user_op_hash_offchain(&packed, entry_point, chain_id),
    };

    let out = serde_json::json!({
        "packed": packed_user_op_to_json(&packed),
        "entryPoint": fmt_address(entry_point),
        "chainId": args.chain_id,
        "userOpHash": fmt_h256(user_op_hash),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn cmd_mode(args: ModeArgs) -> Result<()> {
    let mode = ExecutionMode::new(args.call_type.into(), args.exec_type.into());
    println!("{}", fmt_bytes(&mode.encode()));
    Ok(())
}

fn cmd_create2(args: Create2Args) -> Result<()> {
    let (init_code, salt) = read_init_code(&args.init)?;
    let factory = match args.factory {
        Some(f) => parse_address(&f).context("invalid --factory")?,
        None => Create2Factory::default().address,
    };
    println!("{}", fmt_address(create2_address(factory, salt, &init_code)));
    Ok(())
}

async fn cmd_deploy(args: DeployArgs) -> Result<()> {
    let machine_mode = args.network.json;
    let net = load_network(&args.network.network, args.network.rpc.clone())?;
    let provider = connect(&net.rpc_url, net.chain_id).await?;
    let wallet = load_wallet(&args.key, net.chain_id)?;
    outln!(machine_mode, "deployer EOA: {}", wallet.address());

    let (init_code, salt) = read_init_code(&args.init)?;
    let client = Arc::new(SignerMiddleware::new(provider, wallet));
    let deployer = DeterministicDeployer::new(MiddlewareChain::new(client), net.create2.clone());

    let predicted = deployer.predict_address(&init_code, salt);
    outln!(machine_mode, "predicted address: {}", predicted);

    let deployment = deployer.deploy(&init_code, salt).await?;
    let tx_hash = match deployment.outcome {
        DeploymentOutcome::AlreadyDeployed => {
            outln!(machine_mode, "already deployed at {}", deployment.address);
            None
        }
        DeploymentOutcome::Deployed { tx_hash } => {
            outln!(machine_mode, "deployed at {} (tx {:?})", deployment.address, tx_hash);
            Some(fmt_h256(tx_hash))
        }
    };

    if machine_mode {
        let out = serde_json::json!({
            "address": fmt_address(deployment.address),
            "salt": fmt_h256(deployment.salt),
            "factory": fmt_address(deployer.factory().address),
            "txHash": tx_hash,
        });
        println!("{}", out);
    }
    Ok(())
}

async fn cmd_delegation(args: DelegationArgs) -> Result<()> {
    let net = load_network(&args.network.network, args.network.rpc.clone())?;
    let provider = connect(&net.rpc_url, net.chain_id).await?;
    let account = parse_address(&args.account).context("invalid --account")?;

    let status = delegation_status(&provider, account).await?;
    if args.network.json {
        let out = match &status {
            DelegationStatus::NotDelegated => serde_json::json!({ "status": "notDelegated" }),
            DelegationStatus::DelegatedTo(to) => {
                serde_json::json!({ "status": "delegated", "delegate": fmt_address(*to) })
            }
            DelegationStatus::HasForeignCode(code) => {
                serde_json::json!({ "status": "foreignCode", "codeSize": code.len() })
            }
        };
        println!("{}", out);
        return Ok(());
    }

    match status {
        DelegationStatus::NotDelegated => println!("{account}: not delegated"),
        DelegationStatus::DelegatedTo(to) => println!("{account}: delegated to {to}"),
        DelegationStatus::HasForeignCode(code) => {
            println!("{account}: has {} bytes of non-delegation code", code.len())
        }
    }
    Ok(())
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let machine_mode = args.network.json;
    let net = load_network(&args.network.network, args.network.rpc.clone())?;
    let provider = connect(&net.rpc_url, net.chain_id).await?;
    let wallet = load_wallet(&args.key, net.chain_id)?;
    let account = wallet.address();
    let client = Arc::new(SignerMiddleware::new(provider.clone(), wallet.clone()));

    // the delegated EOA is its own smart account
    match delegation_status(&provider, account).await? {
        DelegationStatus::DelegatedTo(to) => {
            outln!(machine_mode, "account {} delegated to {}", account, to)
        }
        other => bail!("account {account} is not an EIP-7702 delegated EOA: {other:?}"),
    }

    let calls = args
        .calls
        .iter()
        .map(|c| parse_call(c))
        .collect::<Result<Vec<_>>>()?;
    let mode = ExecutionMode::new(CallType::Batch, args.exec_type.into());
    let call_data = encode_execute_calldata(mode, &calls);

    let entry_point = EntryPoint::new(net.entry_point, client.clone())?;

    if let Some(eth) = args.deposit_eth.as_deref() {
        let amount = ethers::utils::parse_ether(eth)
            .with_context(|| format!("invalid --deposit-eth value: {eth}"))?;
        entry_point.deposit_to(account, amount).await?;
    }
    let deposit = entry_point.balance_of(account).await?;
    outln!(machine_mode, "entryPoint deposit: {} wei", deposit);

    let nonce = entry_point.get_nonce(account).await?;
    let (max_fee_per_gas, max_priority_fee_per_gas) = fees(&provider, &args).await?;

    let mut op = UserOperation {
        sender: account,
        nonce,
        init_code: Bytes::new(),
        call_data,
        call_gas_limit: parse_u256(&args.call_gas_limit).context("invalid --call-gas-limit")?,
        verification_gas_limit: parse_u256(&args.verification_gas_limit)
            .context("invalid --verification-gas-limit")?,
        pre_verification_gas: parse_u256(&args.pre_verification_gas)
            .context("invalid --pre-verification-gas")?,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        paymaster_and_data: Bytes::new(),
        signature: Bytes::new(),
    };

    let strategy = if args.local_hash_only {
        HashStrategy::LocalOnly
    } else {
        HashStrategy::CrossChecked
    };
    let hasher = UserOpHasher::new(entry_point.clone(), U256::from(net.chain_id), strategy);
    let packed = op.pack()?;
    let user_op_hash = hasher.hash(&packed).await?;
    let signed = sign_packed_user_op(&wallet, packed, user_op_hash)?;
    op.signature = signed.signature.clone();
    outln!(machine_mode, "userOpHash: {}", fmt_h256(user_op_hash));

    let mut out = serde_json::json!({
        "sender": fmt_address(account),
        "userOpHash": fmt_h256(user_op_hash),
        "packed": packed_user_op_to_json(&signed),
    });

    match args.submit {
        SubmitVia::None => {
            if !machine_mode {
                println!("{}", serde_json::to_string_pretty(&out["packed"])?);
            }
        }
        SubmitVia::EntryPoint => {
            let beneficiary = match args.beneficiary.as_deref() {
                Some(b) => parse_address(b).context("invalid --beneficiary")?,
                None => account,
            };
            let receipt = entry_point.handle_ops(&[signed], beneficiary).await?;
            outln!(machine_mode, "handleOps tx: {:?}", receipt.transaction_hash);
            out["txHash"] = serde_json::json!(fmt_h256(receipt.transaction_hash));
        }
        SubmitVia::Bundler => {
            let bundler = bundler_client(&net, args.bundler_url.clone())?;
            match bundler.send_user_operation(&op, net.entry_point).await? {
                SubmissionOutcome::Accepted(hash) => {
                    if hash != user_op_hash {
                        tracing::warn!(bundler = ?hash, local = ?user_op_hash, "bundler returned a different userOpHash");
                    }
                    outln!(machine_mode, "accepted by bundler: {}", fmt_h256(hash));
                    out["accepted"] = serde_json::json!(true);
                    if args.receipt {
                        let receipt = bundler.get_user_operation_receipt(hash).await?;
                        match &receipt {
                            Some(r) => outln!(machine_mode, "receipt: {}", r),
                            None => outln!(machine_mode, "receipt: not yet available"),
                        }
                        out["receipt"] = receipt.unwrap_or(serde_json::Value::Null);
                    }
                }
                SubmissionOutcome::Rejected {
                    code,
                    message,
                    data,
                } => {
                    outln!(machine_mode, "rejected by bundler ({code}): {message}");
                    out["accepted"] = serde_json::json!(false);
                    out["error"] = serde_json::json!({ "code": code, "message": message, "data": data });
                }
            }
        }
    }

    if machine_mode {
        println!("{}", out);
    }
    Ok(())
}

async fn connect(rpc_url: &str, expected_chain_id: u64) -> Result<Provider<Http>> {
    let provider =
        Provider::<Http>::try_from(rpc_url)?.interval(Duration::from_millis(350));
    let chain_id = provider
        .get_chainid()
        .await
        .context("eth_chainId failed")?
        .as_u64();
    if chain_id != expected_chain_id {
        return Err(anyhow!(
            "chainId mismatch: config has {}, RPC returned {}",
            expected_chain_id,
            chain_id
        ));
    }
    Ok(provider)
}

fn load_wallet(key: &KeyArgs, chain_id: u64) -> Result<LocalWallet> {
    let wallet = LocalWallet::from_str(key.private_key.trim()).context("invalid private key")?;
    Ok(wallet.with_chain_id(chain_id))
}

fn bundler_client(net: &NetworkConfig, url_override: Option<String>) -> Result<BundlerClient> {
    let url = url_override
        .or_else(|| net.bundler_url.clone())
        .ok_or_else(|| anyhow!("no bundler URL: set bundlerUrl in the network JSON or SEOA_BUNDLER_URL"))?;
    Ok(BundlerClient::new(url))
}

async fn fees(provider: &Provider<Http>, args: &SendArgs) -> Result<(U256, U256)> {
    let max_fee = match args.max_fee_per_gas.as_deref() {
        Some(v) => parse_u256(v).context("invalid --max-fee-per-gas")?,
        None => provider
            .get_gas_price()
            .await
            .context("failed to fetch gas price")?,
    };
    let priority = match args.max_priority_fee_per_gas.as_deref() {
        Some(v) => parse_u256(v).context("invalid --max-priority-fee-per-gas")?,
        None => max_fee,
    };
    Ok((max_fee, priority))
}

fn user_op_from_args(args: &UserOpArgs) -> Result<UserOperation> {
    Ok(UserOperation {
        sender: parse_address(&args.sender).context("invalid --sender")?,
        nonce: parse_u256(&args.nonce).context("invalid --nonce")?,
        init_code: parse_bytes(&args.init_code).context("invalid --init-code")?,
        call_data: parse_bytes(&args.call_data).context("invalid --call-data")?,
        call_gas_limit: parse_u256(&args.call_gas_limit).context("invalid --call-gas-limit")?,
        verification_gas_limit: parse_u256(&args.verification_gas_limit)
            .context("invalid --verification-gas-limit")?,
        pre_verification_gas: parse_u256(&args.pre_verification_gas)
            .context("invalid --pre-verification-gas")?,
        max_fee_per_gas: parse_u256(&args.max_fee_per_gas).context("invalid --max-fee-per-gas")?,
        max_priority_fee_per_gas: parse_u256(&args.max_priority_fee_per_gas)
            .context("invalid --max-priority-fee-per-gas")?,
        paymaster_and_data: parse_bytes(&args.paymaster_and_data)
            .context("invalid --paymaster-and-data")?,
        signature: Bytes::new(),
    })
}

fn read_init_code(args: &InitCodeArgs) -> Result<(Bytes, H256)> {
    let init_code = match (&args.init_code, &args.init_code_file) {
        (Some(hex), _) => parse_bytes(hex).context("invalid --init-code")?,
        (None, Some(path)) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            parse_bytes(&raw).with_context(|| format!("invalid hex in {}", path.display()))?
        }
        (None, None) => bail!("pass --init-code or --init-code-file"),
    };
    if init_code.is_empty() {
        bail!("init code is empty");
    }
    let salt = parse_h256(&args.salt).context("invalid --salt")?;
    Ok((init_code, salt))
}

/// `target[,value[,data]]`; value is decimal wei or a hex quantity.
fn parse_call(s: &str) -> Result<Call> {
    let mut parts = s.splitn(3, ',');
    let target = parts
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("empty --call"))?;
    let mut call = Call::new(parse_address(target).with_context(|| format!("invalid call target in {s:?}"))?);
    if let Some(value) = parts.next().filter(|v| !v.is_empty()) {
        call = call.value(parse_u256(value).with_context(|| format!("invalid call value in {s:?}"))?);
    }
    if let Some(data) = parts.next() {
        call = call.data(parse_bytes(data).with_context(|| format!("invalid call data in {s:?}"))?);
    }
    Ok(call)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call_forms() {
        let target = "0x1111111111111111111111111111111111111111";
        let call = parse_call(target).unwrap();
        assert_eq!(call, Call::new(Address::repeat_byte(0x11)));

        let call = parse_call(&format!("{target},1000")).unwrap();
        assert_eq!(call.value, U256::from(1000u64));
        assert!(call.data.is_empty());

        let call = parse_call(&format!("{target},,0xdeadbeef")).unwrap();
        assert!(call.value.is_zero());
        assert_eq!(call.data.to_vec(), vec![0xde, 0xad, 0xbe, 0xef]);

        assert!(parse_call("").is_err());
        assert!(parse_call("0x1234,1").is_err());
    }

    #[test]
    fn cli_parses_send() {
        let cli = Cli::try_parse_from([
            "seoa-aa",
            "send",
            "--private-key",
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            "--call",
            "0x1111111111111111111111111111111111111111,1",
            "--call",
            "0x2222222222222222222222222222222222222222",
            "--exec-type",
            "try",
            "--submit",
            "entry-point",
            "--receipt",
        ])
        .unwrap();
        match cli.cmd {
            Command::Send(args) => {
                assert_eq!(args.calls.len(), 2);
                assert!(matches!(args.exec_type, ExecTypeArg::Try));
                assert!(matches!(args.submit, SubmitVia::EntryPoint));
                assert!(args.receipt);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
