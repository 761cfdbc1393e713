use std::ffi::OsString;
use std::fs::File;
use std::io::{Write, stdout};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::accrual::{HttpAccrualClient, ReconciliationPoller};
use crate::application::{
    BalanceService, BalanceView, OrderService, SubmitOutcome, WithdrawOutcome,
};
use crate::config::{Config, DEFAULT_ACCRUAL_ADDRESS, DEFAULT_DATABASE_URL, PollerConfig};
use crate::domain::{UserId, format_points, parse_points};
use crate::io::Exporter;
use crate::storage::{LedgerStore, SqliteLedger};

/// Loyalty Ledger - points accrual and withdrawal ledger
#[derive(Parser)]
#[command(name = "loyalty-ledger")]
#[command(about = "A loyalty points ledger reconciled against an external accrual authority")]
#[command(version)]
pub struct Cli {
    /// Database URI or file path [default: sqlite:loyalty.db]
    #[arg(short, long, env = "DATABASE_URI", global = true)]
    pub database: Option<String>,

    /// Base address of the accrual authority [default: http://localhost:8081]
    #[arg(short = 'r', long, env = "ACCRUAL_SYSTEM_ADDRESS", global = true)]
    pub accrual_address: Option<String>,

    /// Pause between reconciliation ticks, in milliseconds
    #[arg(long, env = "ACCRUAL_POLL_INTERVAL_MS", default_value_t = 1000, global = true)]
    pub poll_interval_ms: u64,

    /// Timeout for one accrual request, in milliseconds
    #[arg(long, env = "ACCRUAL_REQUEST_TIMEOUT_MS", default_value_t = 5000, global = true)]
    pub request_timeout_ms: u64,

    /// Retries for a rate-limited or failing accrual request
    #[arg(long, env = "ACCRUAL_MAX_RETRIES", default_value_t = 3, global = true)]
    pub max_retries: u32,

    /// Pause between accrual request attempts, in milliseconds
    #[arg(long, env = "ACCRUAL_RETRY_WAIT_MS", default_value_t = 1000, global = true)]
    pub retry_wait_ms: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Submit an order number for accrual
    Submit {
        /// User submitting the order
        #[arg(long)]
        user: UserId,

        /// Order number (Luhn-valid digits)
        number: String,
    },

    /// Spend points against an order number
    Withdraw {
        /// User spending the points
        #[arg(long)]
        user: UserId,

        /// Order number the withdrawal is tagged with
        #[arg(long)]
        order: String,

        /// Points to spend (e.g., "200" or "751.50")
        #[arg(allow_negative_numbers = true)]
        sum: String,
    },

    /// Show current balance and total withdrawn
    Balance {
        #[arg(long)]
        user: UserId,
    },

    /// List submitted orders
    Orders {
        #[arg(long)]
        user: UserId,
    },

    /// List withdrawals
    Withdrawals {
        #[arg(long)]
        user: UserId,
    },

    /// Export a user's data to JSON or CSV
    Export {
        #[arg(long)]
        user: UserId,

        /// What to export: statement, orders, withdrawals
        export_type: String,

        /// Format: json, csv (default: json for statement, csv otherwise)
        #[arg(short, long)]
        format: Option<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Reconcile pending orders with the accrual authority
    Poll {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
}

impl Cli {
    /// Resolve and validate the runtime configuration.
    pub fn config(&self) -> Result<Config> {
        self.config_with_env(|name| std::env::var_os(name))
    }

    /// Like [`Cli::config`], reading environment variables through `env`.
    pub fn config_with_env(&self, env: impl Fn(&str) -> Option<OsString>) -> Result<Config> {
        let database = resolve_setting(
            self.database.as_deref(),
            "DATABASE_URI",
            DEFAULT_DATABASE_URL,
            &env,
        )?;
        let accrual_address = resolve_setting(
            self.accrual_address.as_deref(),
            "ACCRUAL_SYSTEM_ADDRESS",
            DEFAULT_ACCRUAL_ADDRESS,
            &env,
        )?;

        let poller = PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_retries: self.max_retries,
            retry_wait: Duration::from_millis(self.retry_wait_ms),
        };
        Ok(Config::new(database, accrual_address, poller)?)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config()?;
        let ledger = Arc::new(SqliteLedger::init(&config.database_url()).await?);
        let store: Arc<dyn LedgerStore> = ledger.clone();
        let orders = OrderService::new(store.clone());
        let balance = BalanceService::new(store.clone());

        match self.command {
            Commands::Init => {
                println!("Database initialized: {}", config.database_url());
            }

            Commands::Submit { user, number } => {
                match orders.submit(user, &number).await? {
                    SubmitOutcome::Accepted(operation) => println!(
                        "Order {} accepted ({})",
                        operation.order_number, operation.status
                    ),
                    SubmitOutcome::AlreadyMine => {
                        println!("Order {} was already uploaded by you", number.trim())
                    }
                    SubmitOutcome::ClaimedByOther => {
                        println!("Order {} belongs to another user", number.trim())
                    }
                    SubmitOutcome::Rejected(reason) => println!("Order rejected: {}", reason),
                }
            }

            Commands::Withdraw { user, order, sum } => {
                let sum = parse_points(&sum)
                    .context("Invalid sum format. Use '200' or '751.50'")?;

                match balance.withdraw(user, &order, sum).await? {
                    WithdrawOutcome::Committed(operation) => println!(
                        "Withdrew {} points for order {}",
                        format_points(operation.withdrawn_sum()),
                        operation.order_number
                    ),
                    WithdrawOutcome::InsufficientFunds {
                        available,
                        requested,
                    } => println!(
                        "Insufficient funds: {} available, {} requested",
                        format_points(available),
                        format_points(requested)
                    ),
                    WithdrawOutcome::Rejected(reason) => {
                        println!("Withdrawal rejected: {}", reason)
                    }
                }
            }

            Commands::Balance { user } => {
                let snapshot = balance.balance_snapshot(user).await?;
                print_json(&BalanceView::from(snapshot))?;
            }

            Commands::Orders { user } => {
                let views = orders.list_orders(user).await?;
                if views.is_empty() {
                    println!("No orders found.");
                } else {
                    print_json(&views)?;
                }
            }

            Commands::Withdrawals { user } => {
                let views = balance.list_withdrawals(user).await?;
                if views.is_empty() {
                    println!("No withdrawals found.");
                } else {
                    print_json(&views)?;
                }
            }

            Commands::Export {
                user,
                export_type,
                format,
                output,
            } => {
                let exporter = Exporter::new(&orders, &balance);
                run_export_command(
                    &exporter,
                    user,
                    &export_type,
                    format.as_deref(),
                    output.as_deref(),
                )
                .await?;
            }

            Commands::Poll { once } => {
                run_poll_command(store, &config, once).await?;
            }
        }

        ledger.close().await;
        Ok(())
    }
}

/// Log filter directives: `RUST_LOG` when set, otherwise the built-in level.
pub fn log_directives(verbose: bool, rust_log: Option<&str>) -> String {
    match rust_log.map(str::trim) {
        Some(directives) if !directives.is_empty() => directives.to_string(),
        _ if verbose => "loyalty_ledger=debug".to_string(),
        _ => "loyalty_ledger=info".to_string(),
    }
}

/// Value given by flag or clap-read variable, else `default`. A variable set
/// to an empty value is an error only when nothing else supplied the setting.
fn resolve_setting(
    value: Option<&str>,
    name: &str,
    default: &str,
    env: &impl Fn(&str) -> Option<OsString>,
) -> Result<String> {
    match value {
        Some(value) => Ok(value.to_string()),
        None => match env(name) {
            Some(raw) if raw.is_empty() => bail!("{} is set but empty", name),
            _ => Ok(default.to_string()),
        },
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_export_command(
    exporter: &Exporter<'_>,
    user: UserId,
    export_type: &str,
    format: Option<&str>,
    output: Option<&str>,
) -> Result<()> {
    let format = match (export_type, format) {
        (_, Some(format)) => format,
        ("statement", None) => "json",
        (_, None) => "csv",
    };

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    let count = match (export_type, format) {
        ("statement", "json") => {
            exporter.export_statement_json(user, writer).await?;
            None
        }
        ("orders", "csv") => Some(exporter.export_orders_csv(user, writer).await?),
        ("withdrawals", "csv") => Some(exporter.export_withdrawals_csv(user, writer).await?),
        ("orders", "json") => {
            let statement = exporter.statement(user).await?;
            write_json(writer, &statement.orders)?;
            Some(statement.orders.len())
        }
        ("withdrawals", "json") => {
            let statement = exporter.statement(user).await?;
            write_json(writer, &statement.withdrawals)?;
            Some(statement.withdrawals.len())
        }
        ("statement", other) => bail!("Statement export supports only json, not '{}'", other),
        ("orders" | "withdrawals", other) => {
            bail!("Unknown format '{}'. Valid formats: json, csv", other)
        }
        (other, _) => bail!(
            "Unknown export type '{}'. Valid types: statement, orders, withdrawals",
            other
        ),
    };

    if let Some(path) = output {
        match count {
            Some(count) => println!("Exported {} {} to {}", count, export_type, path),
            None => println!("Exported {} to {}", export_type, path),
        }
    }
    Ok(())
}

fn write_json<W: Write, T: serde::Serialize>(mut writer: W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    Ok(())
}

async fn run_poll_command(store: Arc<dyn LedgerStore>, config: &Config, once: bool) -> Result<()> {
    let authority = Arc::new(HttpAccrualClient::new(
        config.accrual_address.clone(),
        &config.poller,
    ));
    let poller = Arc::new(ReconciliationPoller::new(
        store,
        authority,
        config.poller.clone(),
    ));

    if once {
        let report = poller.tick().await?;
        println!(
            "Checked {} orders: {} updated, {} unchanged, {} not yet registered, {} failed",
            report.checked, report.applied, report.unchanged, report.deferred, report.failed
        );
        return Ok(());
    }

    info!(accrual_address = %config.accrual_address, "Starting reconciliation");
    let shutdown = poller.shutdown_token();
    let handle = poller.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, stopping");
    shutdown.cancel();

    handle.await.context("Reconciliation poller task failed")?;
    Ok(())
}
