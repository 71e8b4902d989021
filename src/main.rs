use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{debug, info};

use gaspass::{
    authority::{CredentialSource, Keypair, SigningCredential},
    config::{FileConfig, SessionSettings},
    connection::{RpcTransport, Transport},
    error::{ConfigError, SessionError},
    interface::GasPassAccount,
    ledger::{SimulatedCluster, LAMPORTS_PER_SOL},
    logging::{self, LogFormat},
    orchestrator::{ConsoleSink, DescriptionSource, Session, SessionPlan},
    wire::Address,
};

/// Lamports given to the authority on a simulated cluster.
const SIMULATED_AIRDROP: u64 = 2 * LAMPORTS_PER_SOL;

#[derive(Parser)]
#[command(name = "gaspass")]
#[command(version, about = "Client for the GAS PASS prepaid gas program", long_about = None)]
struct Cli {
    /// JSON configuration file; flags and environment override it
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// devnet, testnet, mainnet-beta, localnet, simulated or an http(s) URL
    #[arg(long, env = "GASPASS_CLUSTER", global = true)]
    cluster: Option<String>,

    /// Deployed GAS PASS program address (base58)
    #[arg(long, env = "GASPASS_PROGRAM_ID", global = true)]
    program_id: Option<String>,

    /// Authority keypair file (JSON byte array or hex secret)
    #[arg(long, env = "GASPASS_KEYPAIR", value_name = "FILE", global = true)]
    keypair: Option<PathBuf>,

    /// Interface description; the bundled one when unset
    #[arg(long, env = "GASPASS_IDL", value_name = "FILE", global = true)]
    idl: Option<PathBuf>,

    /// Per-call timeout in seconds (0 = none)
    #[arg(long = "timeout", value_name = "SECS", global = true)]
    timeout_secs: Option<u64>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect, bind, load, initialize, top up, submit and print state (default)
    Run(RunArgs),
    /// Print the state of an existing gas pass account
    State {
        #[arg(long)]
        account: String,
    },
    /// Withdraw lamports from a gas pass account back to the authority
    Withdraw {
        #[arg(long)]
        account: String,
        #[arg(long)]
        amount: u64,
    },
    /// Write a new keypair file
    Keygen {
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    #[arg(long)]
    nonce: Option<u8>,
    /// Lamports moved into the gas pass account
    #[arg(long)]
    topup_amount: Option<u64>,
    /// Payload handed to submitTx, hex
    #[arg(long)]
    payload_hex: Option<String>,
    /// Account receiving the submission fee; the authority when unset
    #[arg(long)]
    executor: Option<String>,
    /// Keypair of the gas pass account; a fresh one when unset
    #[arg(long, value_name = "FILE")]
    gas_pass_keypair: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Already reported on the progress channel.
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => 2,
            CliError::Session(_) | CliError::Other(_) => 1,
        }
    }
}

impl Cli {
    /// Flags and environment as the top configuration layer.
    fn overrides(&self, run: Option<&RunArgs>) -> FileConfig {
        FileConfig {
            cluster: self.cluster.clone(),
            program_id: self.program_id.clone(),
            keypair: self.keypair.clone(),
            idl: self.idl.clone(),
            call_timeout_secs: self.timeout_secs,
            nonce: run.and_then(|r| r.nonce),
            topup_amount: run.and_then(|r| r.topup_amount),
            payload_hex: run.and_then(|r| r.payload_hex.clone()),
            executor: run.and_then(|r| r.executor.clone()),
            gas_pass_keypair: run.and_then(|r| r.gas_pass_keypair.clone()),
            ..FileConfig::default()
        }
    }

    fn settings(&self, run: Option<&RunArgs>) -> Result<SessionSettings, ConfigError> {
        let base = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        SessionSettings::resolve(base.merge(self.overrides(run)))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.log_format);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if !matches!(err, CliError::Session(_)) {
                eprintln!("error: {err:#}");
            }
            ExitCode::from(err.exit_code())
        }
    }
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match &cli.command {
        None => run_cmd(&cli, &RunArgs::default()).await,
        Some(Command::Run(args)) => run_cmd(&cli, args).await,
        Some(Command::State { account }) => {
            let account = parse_account("account", account)?;
            let settings = cli.settings(None)?;
            let report = session_for(&settings, GasPassAccount::Address(account))
                .await?
                .run(&SessionPlan::InspectState, &mut ConsoleSink::stdout())
                .await?;
            debug!(steps = report.steps_executed(), "state printed");
            Ok(())
        }
        Some(Command::Withdraw { account, amount }) => {
            let account = parse_account("account", account)?;
            let settings = cli.settings(None)?;
            session_for(&settings, GasPassAccount::Address(account))
                .await?
                .run(&SessionPlan::Withdraw { amount: *amount }, &mut ConsoleSink::stdout())
                .await?;
            Ok(())
        }
        Some(Command::Keygen { out, force }) => Ok(keygen_cmd(out, *force)?),
    }
}

async fn run_cmd(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let settings = cli.settings(Some(args))?;
    let gas_pass = match &settings.gas_pass_keypair {
        Some(path) => {
            let keypair = Keypair::read_file(path).map_err(|e| ConfigError::Invalid {
                field: "gas_pass_keypair",
                reason: e.to_string(),
            })?;
            GasPassAccount::Keypair(Arc::new(keypair))
        }
        None => GasPassAccount::Keypair(Arc::new(Keypair::generate())),
    };
    info!(gas_pass = %gas_pass.address(), "gas pass account");

    let report = session_for(&settings, gas_pass)
        .await?
        .run(&SessionPlan::FullSequence, &mut ConsoleSink::stdout())
        .await?;
    println!("GAS PASS account: {}", report.gas_pass_account);
    Ok(())
}

async fn session_for(settings: &SessionSettings, gas_pass: GasPassAccount) -> Result<Session, CliError> {
    let transport = transport_for(settings).await?;
    let credential = match &settings.keypair {
        Some(path) => CredentialSource::File(path.clone()),
        None => CredentialSource::None,
    };
    let description = match &settings.idl {
        Some(path) => DescriptionSource::Path(path.clone()),
        None => DescriptionSource::Bundled,
    };
    Ok(Session::new(settings.endpoint.clone(), transport)
        .with_credential(credential)
        .with_description(description)
        .with_gas_pass(gas_pass)
        .with_params(settings.params.clone())
        .with_call_timeout(settings.call_timeout))
}

/// RPC for real clusters. A simulated cluster gets the program deployed and, when the
/// keypair is readable, a funded authority.
async fn transport_for(settings: &SessionSettings) -> Result<Arc<dyn Transport>, CliError> {
    let endpoint = &settings.endpoint;
    if !endpoint.cluster().is_simulated() {
        let rpc = RpcTransport::new(endpoint)
            .with_context(|| format!("building RPC client for {}", endpoint.url()))?;
        return Ok(Arc::new(rpc));
    }

    let cluster = SimulatedCluster::new();
    cluster.deploy_program(&endpoint.program_id()).await;
    let authority = settings
        .keypair
        .as_deref()
        .and_then(|path| Keypair::read_file(path).ok());
    if let Some(authority) = authority {
        cluster.airdrop(&authority.address(), SIMULATED_AIRDROP).await;
    }
    Ok(Arc::new(cluster))
}

fn parse_account(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    value
        .parse::<Address>()
        .map_err(|source| ConfigError::InvalidAddress {
            field,
            value: value.to_string(),
            source,
        })
}

fn keygen_cmd(out: &Path, force: bool) -> anyhow::Result<()> {
    if out.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", out.display());
    }
    let keypair = Keypair::generate();
    keypair
        .write_file(out)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("keypair written → {}", out.display());
    println!("address: {}", keypair.address());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_runs_the_session() {
        let cli = Cli::try_parse_from(["gaspass", "--program-id", "x"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn flags_form_the_top_layer() {
        let cli = Cli::try_parse_from([
            "gaspass",
            "run",
            "--cluster",
            "simulated",
            "--timeout",
            "0",
            "--topup-amount",
            "500000",
        ])
        .unwrap();
        let Some(Command::Run(args)) = &cli.command else {
            panic!("expected run");
        };
        let overrides = cli.overrides(Some(args));
        assert_eq!(overrides.cluster.as_deref(), Some("simulated"));
        assert_eq!(overrides.call_timeout_secs, Some(0));
        assert_eq!(overrides.topup_amount, Some(500_000));
        assert_eq!(overrides.nonce, None);
    }

    #[test]
    fn config_errors_exit_with_two() {
        let config = CliError::Config(ConfigError::MissingProgramId);
        assert_eq!(config.exit_code(), 2);
        let other = CliError::Other(anyhow::anyhow!("boom"));
        assert_eq!(other.exit_code(), 1);
    }

    const PROGRAM: &str = "Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS";

    #[tokio::test]
    async fn simulated_run_exits_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.json");
        Keypair::generate().write_file(&path).unwrap();

        let cli = Cli::try_parse_from([
            "gaspass",
            "--cluster",
            "simulated",
            "--program-id",
            PROGRAM,
            "--keypair",
            path.to_str().unwrap(),
            "run",
            "--nonce",
            "3",
        ])
        .unwrap();
        dispatch(cli).await.unwrap();
    }

    #[tokio::test]
    async fn failed_session_exits_non_zero() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        let cli = Cli::try_parse_from([
            "gaspass",
            "--cluster",
            "simulated",
            "--program-id",
            PROGRAM,
            "--keypair",
            missing.to_str().unwrap(),
        ])
        .unwrap();

        let err = dispatch(cli).await.unwrap_err();
        let CliError::Session(session) = &err else {
            panic!("expected a session failure, got {err}");
        };
        assert_eq!(session.step, gaspass::orchestrator::Step::BindAuthority);
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn keygen_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("id.json");
        keygen_cmd(&out, false).unwrap();
        let written = Keypair::read_file(&out).unwrap().address();
        assert!(keygen_cmd(&out, false).is_err());
        keygen_cmd(&out, true).unwrap();
        assert_ne!(Keypair::read_file(&out).unwrap().address(), written);
    }

    #[tokio::test]
    async fn simulated_cluster_funds_the_authority() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.json");
        let authority = Keypair::generate();
        authority.write_file(&path).unwrap();

        let cli = Cli::try_parse_from([
            "gaspass",
            "--cluster",
            "simulated",
            "--program-id",
            "Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS",
            "--keypair",
            path.to_str().unwrap(),
        ])
        .unwrap();
        let settings = cli.settings(Some(&RunArgs::default())).unwrap();
        let gas_pass = GasPassAccount::Keypair(Arc::new(Keypair::generate()));
        let mut session = session_for(&settings, gas_pass).await.unwrap();
        let mut sink = ConsoleSink::new(Vec::new(), Vec::new());
        let report = session
            .run(&SessionPlan::FullSequence, &mut sink)
            .await
            .unwrap();
        assert_eq!(report.steps_executed(), 7);
    }
}
