use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::OsRng;
use tracing::{info, Level};

use piastre_act::{
    config::TokenConfig,
    runtime::{Call, Executor, ExecutorState},
    units::{format_units, parse_units},
    Account, Address, Amount, Ownable, PiastreToken, DECIMALS,
};

#[derive(Parser)]
#[command(name = "piastre", version, about = "PiastreACT token ledger")]
struct Cli {
    /// Ledger state file.
    #[arg(long, global = true, default_value = "piastre-state.json")]
    state: PathBuf,

    /// Enable debug logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an Ed25519 keypair and print its address.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Create a new state file with a fresh token.
    Deploy {
        #[arg(long)]
        owner: Address,
        /// JSON file with token name and symbol.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Mint new tokens (owner only).
    Mint {
        #[command(flatten)]
        signer: Signer,
        #[arg(long)]
        to: Address,
        #[command(flatten)]
        amount: AmountArg,
    },
    /// Transfer tokens from the signer.
    Transfer {
        #[command(flatten)]
        signer: Signer,
        #[arg(long)]
        to: Address,
        #[command(flatten)]
        amount: AmountArg,
    },
    /// Hand the owner role to another address.
    TransferOwnership {
        #[command(flatten)]
        signer: Signer,
        #[arg(long)]
        new_owner: Address,
    },
    /// Give up the owner role; minting closes for good.
    RenounceOwnership {
        #[command(flatten)]
        signer: Signer,
    },
    /// Print the balance of an address.
    Balance { address: Address },
    /// Print token metadata and supply.
    Info,
    /// Re-check supply invariants of the state file.
    Verify,
}

#[derive(Args)]
struct Signer {
    /// 32-byte Ed25519 secret key as 64 hex characters.
    #[arg(long)]
    sk_hex: String,
}

#[derive(Args)]
struct AmountArg {
    /// Amount in tokens ("40", "0.5"), or base units with --raw.
    #[arg(long)]
    amount: String,
    #[arg(long)]
    raw: bool,
}

impl AmountArg {
    fn base_units(&self) -> Result<Amount> {
        if self.raw {
            return self
                .amount
                .trim()
                .parse()
                .with_context(|| format!("invalid raw amount {:?}", self.amount));
        }
        parse_units(&self.amount, DECIMALS)
            .with_context(|| format!("invalid amount {:?}", self.amount))
    }
}

//==================== state file ====================//

fn load_state(path: &Path) -> Result<Executor> {
    let bytes = fs::read(path).with_context(|| format!("read state {}", path.display()))?;
    let state: ExecutorState = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse state {}", path.display()))?;
    Executor::from_state(state).with_context(|| format!("load state {}", path.display()))
}

fn save_state(path: &Path, exec: &Executor) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_vec_pretty(&exec.state()).context("encode state")?;
    fs::write(path, json).with_context(|| format!("write state {}", path.display()))
}

fn tokens(amount: Amount) -> String {
    format_units(amount, DECIMALS)
}

//==================== commands ====================//

fn keygen_cmd(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;
    let account = Account::generate(&mut OsRng);
    fs::write(out_dir.join("sk.hex"), account.secret_hex()).context("write sk.hex")?;
    fs::write(
        out_dir.join("pk.hex"),
        hex::encode(account.verifying_key().as_bytes()),
    )
    .context("write pk.hex")?;
    println!("address {}", account.address());
    println!("keypair written → {}", out_dir.display());
    Ok(())
}

fn deploy_cmd(state: &Path, owner: Address, config: Option<&Path>) -> Result<()> {
    if state.exists() {
        bail!("state file {} already exists", state.display());
    }
    let metadata = match config {
        Some(path) => TokenConfig::load(path)?,
        None => TokenConfig::default(),
    };
    let exec = Executor::new(PiastreToken::with_metadata(owner, metadata)?);
    save_state(state, &exec)?;
    info!(%owner, state = %state.display(), "token deployed");
    println!("Deployed {} owned by {}", exec.token().metadata().symbol, owner);
    Ok(())
}

fn send_cmd(state: &Path, signer: &Signer, call: Call) -> Result<()> {
    let account = Account::from_secret_hex(&signer.sk_hex).context("invalid --sk-hex")?;
    let mut exec = load_state(state)?;
    let receipt = exec.send(&account, call)?;
    save_state(state, &exec)?;
    info!(index = receipt.index, sender = %receipt.sender, "transaction applied");
    println!(
        "ok: tx #{} nonce={} hash={}",
        receipt.index,
        receipt.nonce,
        hex::encode(receipt.tx_hash)
    );
    Ok(())
}

fn balance_cmd(state: &Path, address: &Address) -> Result<()> {
    let exec = load_state(state)?;
    let balance = exec.token().balance_of(address);
    println!("{} {}", tokens(balance), exec.token().metadata().symbol);
    Ok(())
}

fn info_cmd(state: &Path) -> Result<()> {
    let exec = load_state(state)?;
    let token = exec.token();
    let meta = token.metadata();
    println!("name         {}", meta.name);
    println!("symbol       {}", meta.symbol);
    println!("decimals     {}", token.decimals());
    println!("owner        {}", token.owner());
    println!("total supply {}", tokens(token.total_supply()));
    println!("max supply   {}", tokens(token.max_supply()));
    println!("holders      {}", token.holders().len());
    println!("transactions {}", exec.receipts().len());
    Ok(())
}

fn verify_cmd(state: &Path) -> Result<()> {
    // loading re-checks supply sum, cap and merkle root
    let exec = load_state(state)?;
    let snapshot = exec.token().snapshot();
    println!("state ok, merkle root {}", hex::encode(snapshot.merkle_root));
    Ok(())
}

//==================== main ====================//

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let state = cli.state.as_path();
    match cli.command {
        Command::Keygen { out_dir } => keygen_cmd(&out_dir),
        Command::Deploy { owner, config } => deploy_cmd(state, owner, config.as_deref()),
        Command::Mint { signer, to, amount } => {
            let amount = amount.base_units()?;
            send_cmd(state, &signer, Call::Mint { to, amount })
        }
        Command::Transfer { signer, to, amount } => {
            let amount = amount.base_units()?;
            send_cmd(state, &signer, Call::Transfer { to, amount })
        }
        Command::TransferOwnership { signer, new_owner } => {
            send_cmd(state, &signer, Call::TransferOwnership { new_owner })
        }
        Command::RenounceOwnership { signer } => {
            send_cmd(state, &signer, Call::RenounceOwnership)
        }
        Command::Balance { address } => balance_cmd(state, &address),
        Command::Info => info_cmd(state),
        Command::Verify => verify_cmd(state),
    }
}
