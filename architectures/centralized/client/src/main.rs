use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use escrow_lending_cli::{
    app::{render_deals, render_position, App},
    config::LenderConfig,
    logging::{init_logging, LogOutput},
};
use escrow_lending_client::{DealOutcome, LenderSession, ReconcileError};
use escrow_lending_core::{format_wei, parse_quantity, UserId, WalletAddress};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(version, about = "Lend into the escrow and keep the deal ledger in step")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse the config file and exit
    ValidateConfig,
    /// Show the current escrow position
    Position,
    /// Deposit an amount of wei (decimal or 0x-hex)
    Deposit {
        #[clap(value_parser = parse_amount)]
        amount: u128,
    },
    /// Withdraw the whole balance, principal plus interest
    Withdraw,
    /// List past deals, most recent first
    Deals,
    /// Set the lender interest rate. Admin only.
    ChangeRate {
        /// New rate multiplied by 100, e.g. 525 for 5.25 %
        rate: u64,
    },
    /// Record transactions that settled without a deal entry
    Reconcile,
    /// Follow the position until interrupted
    Watch,
}

#[derive(Parser, Debug, Clone)]
struct CommonArgs {
    /// Path to the TOML config
    #[clap(long, env = "ESCROW_LENDING_CONFIG", default_value = "escrow-lending.toml")]
    config: PathBuf,

    /// Application user to act for
    #[clap(long, env = "ESCROW_LENDING_USER_ID")]
    user_id: Option<u64>,

    /// Node account to send from. Defaults to the node's first account.
    #[clap(long, env = "ESCROW_LENDING_FROM")]
    from: Option<WalletAddress>,

    #[clap(long, env = "ESCROW_LENDING_LOG_LEVEL", default_value_t = Level::INFO)]
    log_level: Level,

    #[clap(long, value_enum, default_value_t = LogOutput::Console)]
    logs: LogOutput,

    /// Also append detailed logs to this file
    #[clap(long)]
    write_log: Option<PathBuf>,
}

impl CommonArgs {
    fn user_id(&self) -> Result<UserId> {
        self.user_id
            .map(UserId::new)
            .context("--user-id (or ESCROW_LENDING_USER_ID) is required for this command")
    }
}

fn parse_amount(s: &str) -> Result<u128, String> {
    parse_quantity(s).map_err(|e| e.to_string())
}

fn print_outcome(outcome: &DealOutcome) {
    println!(
        "{} of {} settled in {} (deal {})",
        outcome.record.kind,
        format_wei(outcome.record.amount),
        outcome.receipt.tx_hash,
        outcome.record_id
    );
    if outcome.from_cached_position {
        println!("note: amount taken from the last known position, interest since then is not included");
    }
    println!("{}", render_position(outcome.position.as_ref()));
}

/// Logs what the failure means for the user's money before handing it back.
fn report_failure(err: ReconcileError) -> anyhow::Error {
    if err.money_may_have_moved() {
        error!(
            stage = ?err.stage(),
            "{err}. Funds may have moved; run `reconcile` once the transaction has a receipt."
        );
    } else {
        warn!(stage = ?err.stage(), "{err}. Nothing was changed.");
    }
    err.into()
}

async fn watch(session: &LenderSession) -> Result<()> {
    let mut positions = session.subscribe();
    let current = *positions.borrow_and_update();
    println!("{}", render_position(current.as_ref()));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            changed = positions.changed() => {
                changed.context("position cache closed")?;
                let current = *positions.borrow_and_update();
                println!("---");
                println!("{}", render_position(current.as_ref()));
            }
        }
    }
}

async fn run_in_session(session: &LenderSession, command: Commands) -> Result<()> {
    match command {
        Commands::Position => {
            println!("{}", render_position(session.position().as_ref()));
        }
        Commands::Deposit { amount } => {
            let outcome = session.deposit(amount).await.map_err(report_failure)?;
            print_outcome(&outcome);
        }
        Commands::Withdraw => {
            let outcome = session.withdraw().await.map_err(report_failure)?;
            print_outcome(&outcome);
        }
        Commands::Deals => {
            let deals = session.deals().await.context("failed to list deals")?;
            println!("{}", render_deals(&deals));
        }
        Commands::ChangeRate { rate } => {
            let receipt = session.change_rate(rate).await.map_err(report_failure)?;
            println!("interest rate changed in {}", receipt.tx_hash);
            println!("{}", render_position(session.position().as_ref()));
        }
        Commands::Watch => watch(session).await?,
        Commands::ValidateConfig | Commands::Reconcile => {
            bail!("{command:?} does not run in a session")
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let common = args.common;

    init_logging(common.logs, common.log_level, common.write_log.clone())?;

    let config = LenderConfig::load(&common.config);
    if let Commands::ValidateConfig = args.command {
        match config {
            Ok(_) => info!("Config is OK!"),
            Err(error) => error!("Error found in config: {error:#}"),
        }
        return Ok(());
    }
    let config = config?;
    info!("============ escrow-lending startup at {} ============", Utc::now());

    let app = App::from_config(&config).await?;
    match args.command {
        Commands::Reconcile => {
            let report = app.reconciler().reconcile_pending().await?;
            println!(
                "appended {}, already recorded {}, reverted {}, still pending {}, failed {}",
                report.appended,
                report.already_recorded,
                report.reverted,
                report.still_pending,
                report.failed
            );
            Ok(())
        }
        command => {
            if let Commands::Watch = command {
                let report = app.reconciler().reconcile_pending().await?;
                if !report.is_clean() {
                    warn!(?report, "some transactions could not be reconciled yet");
                }
            }
            let session = app.session(common.user_id()?, common.from.clone()).await?;
            let result = run_in_session(&session, command).await;
            session.end().await;
            result
        }
    }
}
