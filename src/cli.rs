//! CLI definition and dispatch.

use chrono::{Days, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::adapters::build_resolver;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::sinks::{BroadcastSink, LogSink};
use crate::domain::account::AccountId;
use crate::domain::backfill::{BackfillOutcome, BackfillReport, HistoricalBackfill};
use crate::domain::error::StockbookError;
use crate::domain::instrument::MarketCategory;
use crate::domain::position::PositionId;
use crate::domain::price_sync::PriceSync;
use crate::domain::resolver::FallbackPriceResolver;
use crate::domain::settings::Settings;
use crate::domain::symbol;
use crate::domain::trading::{BuyOrder, PortfolioSummary, SellOrder, TradeReceipt, TradingEngine};
use crate::ports::store::Store;
use crate::telemetry::init_tracing;

#[cfg(feature = "sqlite")]
type CliStore = crate::adapters::sqlite_store::SqliteStore;
#[cfg(not(feature = "sqlite"))]
type CliStore = crate::adapters::memory_store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "stockbook", about = "Paper trading ledger with live price sync")]
pub struct Cli {
    /// INI configuration file; built-in defaults apply when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ScheduleChoice {
    Daily,
    Weekly,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database schema
    InitDb,
    /// Open a cash account
    OpenAccount {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "0")]
        balance: Decimal,
    },
    /// List accounts and their cash balances
    Accounts,
    /// Add cash to an account
    Deposit {
        #[arg(long)]
        account: AccountId,
        #[arg(long)]
        amount: Decimal,
    },
    /// Register an instrument at a starting price
    AddInstrument {
        symbol: String,
        #[arg(long)]
        price: Decimal,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "OTHER")]
        market: MarketCategory,
    },
    /// Create the sample instruments if none exist
    Seed,
    /// List instruments and their last prices
    Instruments,
    /// Invest a cash amount in a symbol
    Buy {
        symbol: String,
        #[arg(long)]
        account: AccountId,
        #[arg(long)]
        amount: Decimal,
        /// Execute at this price instead of the stored one
        #[arg(long)]
        price: Option<Decimal>,
    },
    /// Sell shares from a position
    Sell {
        #[arg(long)]
        account: AccountId,
        #[arg(long)]
        position: PositionId,
        #[arg(long)]
        quantity: Decimal,
    },
    /// Show balances and valued positions
    Portfolio {
        #[arg(long)]
        account: AccountId,
        #[arg(long)]
        json: bool,
    },
    /// List executed trades, newest first
    Trades {
        #[arg(long)]
        account: AccountId,
        /// Also write the trades to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Show the account activity trail
    Activity {
        #[arg(long)]
        account: AccountId,
    },
    /// Show stored price history for an instrument
    Prices {
        symbol: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Ask the configured sources for a live quote
    Quote { symbol: String },
    /// Refresh every instrument price once
    Refresh,
    /// Store daily bars for every instrument
    Backfill {
        #[arg(long, required_unless_present = "schedule")]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Use a configured schedule's lookback window instead of --from/--to
        #[arg(long, conflicts_with_all = ["from", "to"])]
        schedule: Option<ScheduleChoice>,
    },
    /// Run price sync and scheduled backfills until interrupted
    Serve,
}

pub fn run(cli: Cli) -> ExitCode {
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<FileConfigAdapter, StockbookError> {
    match path {
        Some(path) => FileConfigAdapter::from_file(path),
        None => Ok(FileConfigAdapter::empty()),
    }
}

pub fn execute(cli: Cli) -> Result<(), StockbookError> {
    let config = load_config(cli.config.as_deref())?;
    let settings = Settings::from_config(&config)?;
    init_tracing(&settings.log_filter);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(dispatch(cli.command, settings))
}

pub fn open_store(settings: &Settings) -> Result<Arc<CliStore>, StockbookError> {
    #[cfg(feature = "sqlite")]
    {
        let store = CliStore::open(&settings.sqlite_path, settings.sqlite_pool_size)?;
        store.initialize_schema()?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = settings;
        warn!("built without sqlite, records are kept in memory only");
        Ok(Arc::new(CliStore::new()))
    }
}

struct App {
    settings: Settings,
    store: Arc<CliStore>,
    resolver: FallbackPriceResolver,
}

impl App {
    fn engine(&self) -> TradingEngine<CliStore> {
        TradingEngine::new(self.store.clone(), self.resolver.clone())
            .with_min_fraction(self.settings.min_fraction)
    }
}

async fn dispatch(command: Command, settings: Settings) -> Result<(), StockbookError> {
    let app = App {
        store: open_store(&settings)?,
        resolver: build_resolver(&settings.sources)?,
        settings,
    };

    match command {
        Command::InitDb => {
            println!("Database ready at {}", app.settings.sqlite_path);
            Ok(())
        }
        Command::OpenAccount { owner, balance } => {
            let account = app.engine().open_account(&owner, balance)?;
            println!(
                "Opened account {} for {} with ${:.2}",
                account.id, account.owner, account.cash
            );
            Ok(())
        }
        Command::Accounts => {
            println!("{:>6} {:<24} {:>14}", "ID", "OWNER", "CASH");
            for account in app.engine().accounts()? {
                println!("{:>6} {:<24} {:>14.2}", account.id, account.owner, account.cash);
            }
            Ok(())
        }
        Command::Deposit { account, amount } => {
            let account = app.engine().deposit(account, amount).await?;
            println!("Account {} balance: ${:.2}", account.id, account.cash);
            Ok(())
        }
        Command::AddInstrument {
            symbol,
            price,
            name,
            market,
        } => {
            let instrument = app
                .engine()
                .add_instrument(&symbol, name.as_deref(), market, price)?;
            println!(
                "Added {} ({}) at ${:.2}",
                instrument.symbol, instrument.name, instrument.current_price
            );
            Ok(())
        }
        Command::Seed => {
            let created = app.engine().seed_instruments()?;
            println!("Seeded {created} instruments");
            Ok(())
        }
        Command::Instruments => print_instruments(&app.engine()),
        Command::Buy {
            symbol,
            account,
            amount,
            price,
        } => {
            let receipt = app
                .engine()
                .buy(
                    account,
                    BuyOrder {
                        symbol,
                        investment: amount,
                        price_override: price,
                    },
                )
                .await?;
            print_receipt(&receipt);
            Ok(())
        }
        Command::Sell {
            account,
            position,
            quantity,
        } => {
            let receipt = app
                .engine()
                .sell(
                    account,
                    SellOrder {
                        position_id: position,
                        quantity,
                    },
                )
                .await?;
            print_receipt(&receipt);
            Ok(())
        }
        Command::Portfolio { account, json } => {
            let summary = app.engine().portfolio_summary(account)?;
            if json {
                let out = serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?;
                println!("{out}");
            } else {
                print_portfolio(&summary);
            }
            Ok(())
        }
        Command::Trades { account, csv } => run_trades(&app.engine(), account, csv.as_deref()),
        Command::Activity { account } => {
            for entry in app.engine().activity(account)? {
                println!(
                    "{}  {}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.description
                );
            }
            Ok(())
        }
        Command::Prices { symbol, from, to } => run_prices(app.store.as_ref(), &symbol, from, to),
        Command::Quote { symbol } => {
            let symbol = symbol::normalize(&symbol);
            match app.resolver.get_price_with_source(&symbol).await {
                Some((price, source)) => {
                    println!("{symbol}: ${price:.2} ({source})");
                    Ok(())
                }
                None => Err(StockbookError::PriceUnavailable { symbol }),
            }
        }
        Command::Refresh => {
            let sync = PriceSync::new(app.store.clone(), app.resolver.clone(), Arc::new(LogSink))
                .with_concurrency(app.settings.sync_concurrency);
            let report = sync.tick().await;
            println!(
                "Refreshed {}/{} instruments ({} failed)",
                report.updated, report.total, report.failed
            );
            Ok(())
        }
        Command::Backfill { from, to, schedule } => {
            let backfill = HistoricalBackfill::new(app.store.clone(), app.resolver.clone());
            let report = match schedule {
                Some(ScheduleChoice::Daily) => backfill.run_window(&app.settings.daily_backfill).await?,
                Some(ScheduleChoice::Weekly) => backfill.run_window(&app.settings.weekly_backfill).await?,
                None => {
                    let to = to.unwrap_or_else(|| Utc::now().date_naive());
                    let from = from.ok_or_else(|| StockbookError::InvalidAmount {
                        reason: "--from is required without --schedule".into(),
                    })?;
                    backfill.run(from, to).await?
                }
            };
            print_backfill(&report);
            Ok(())
        }
        Command::Serve => run_serve(app).await,
    }
}

fn print_instruments<S: Store>(engine: &TradingEngine<S>) -> Result<(), StockbookError> {
    println!(
        "{:<10} {:<28} {:>12} {:>12} {:<8}",
        "SYMBOL", "NAME", "PRICE", "PREVIOUS", "MARKET"
    );
    for inst in engine.instruments()? {
        let previous = inst
            .previous_price
            .map(|p| format!("{p:.2}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<10} {:<28} {:>12.2} {:>12} {:<8}",
            inst.symbol, inst.name, inst.current_price, previous, inst.market.as_str()
        );
    }
    Ok(())
}

fn print_receipt(receipt: &TradeReceipt) {
    println!("{}", receipt.description);
    println!("Balance: ${:.2}", receipt.balance);
    match &receipt.position {
        Some(p) => println!(
            "Position {}: {:.4} shares @ avg ${:.4}",
            p.id, p.quantity, p.average_cost
        ),
        None => println!("Position closed"),
    }
    if let Some(pnl) = receipt.realized_pnl {
        println!("Realized P/L: ${pnl:.2}");
    }
}

fn print_portfolio(summary: &PortfolioSummary) {
    println!("Account {} ({})", summary.account_id, summary.owner);
    println!("Available balance: ${:.2}", summary.available_balance);
    println!("Total investment:  ${:.2}", summary.total_investment);
    println!("Current value:     ${:.2}", summary.current_value);
    println!("Unrealized P/L:    ${:.2}", summary.unrealized_pnl);
    if summary.positions.is_empty() {
        return;
    }
    println!();
    println!(
        "{:>6} {:<8} {:>12} {:>12} {:>10} {:>12} {:>10}",
        "ID", "SYMBOL", "QTY", "AVG COST", "PRICE", "VALUE", "P/L"
    );
    for p in &summary.positions {
        println!(
            "{:>6} {:<8} {:>12.4} {:>12.4} {:>10.2} {:>12.2} {:>10.2}",
            p.position_id,
            p.symbol,
            p.quantity,
            p.average_cost,
            p.current_price,
            p.market_value,
            p.unrealized_pnl
        );
    }
}

#[derive(Serialize)]
struct TradeRecord<'a> {
    id: i64,
    executed_at: String,
    side: &'a str,
    symbol: &'a str,
    quantity: Decimal,
    unit_price: Decimal,
    total_value: Decimal,
}

fn run_trades<S: Store>(
    engine: &TradingEngine<S>,
    account: AccountId,
    csv_path: Option<&Path>,
) -> Result<(), StockbookError> {
    let trades = engine.trades(account)?;
    let symbols: HashMap<i64, String> = engine
        .instruments()?
        .into_iter()
        .map(|i| (i.id, i.symbol))
        .collect();
    let records: Vec<TradeRecord<'_>> = trades
        .iter()
        .map(|t| TradeRecord {
            id: t.id,
            executed_at: t.executed_at.to_rfc3339(),
            side: t.side.as_str(),
            symbol: symbols.get(&t.instrument_id).map(String::as_str).unwrap_or("?"),
            quantity: t.quantity,
            unit_price: t.unit_price,
            total_value: t.total_value,
        })
        .collect();

    for r in &records {
        println!(
            "{:>6} {} {:<4} {:<8} {:>12.4} @ {:>10.2} = {:>12.2}",
            r.id, r.executed_at, r.side, r.symbol, r.quantity, r.unit_price, r.total_value
        );
    }

    if let Some(path) = csv_path {
        write_trades_csv(path, &records)?;
        println!("Wrote {} trades to {}", records.len(), path.display());
    }
    Ok(())
}

fn write_trades_csv(path: &Path, records: &[TradeRecord<'_>]) -> Result<(), StockbookError> {
    let mut writer = csv::Writer::from_path(path).map_err(std::io::Error::from)?;
    for record in records {
        writer.serialize(record).map_err(std::io::Error::from)?;
    }
    writer.flush()?;
    Ok(())
}

fn run_prices<S: Store>(
    store: &S,
    symbol: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<(), StockbookError> {
    let symbol = symbol::normalize(symbol);
    let to = to.unwrap_or_else(|| Utc::now().date_naive());
    let from = from.unwrap_or_else(|| to.checked_sub_days(Days::new(30)).unwrap_or(to));
    if from > to {
        return Err(StockbookError::InvalidRange { from, to });
    }

    let (instrument, samples, latest) = store.atomic(|tx| {
        let instrument = tx
            .instrument_by_symbol(&symbol)?
            .ok_or_else(|| StockbookError::InstrumentNotFound {
                symbol: symbol.clone(),
            })?;
        let samples = tx.price_samples(instrument.id, from, to)?;
        let latest = tx.latest_price_sample(instrument.id)?;
        Ok((instrument, samples, latest))
    })?;

    println!(
        "{} ({}) current ${:.2}",
        instrument.symbol, instrument.name, instrument.current_price
    );
    for s in &samples {
        println!(
            "{}  {:<8} {:>10.2}  {}",
            s.sample_date,
            s.kind.as_str(),
            s.price,
            s.volume.map(|v| v.to_string()).unwrap_or_default()
        );
    }
    match latest {
        Some(s) => println!("Latest sample: {} ${:.2} ({})", s.sample_date, s.price, s.kind.as_str()),
        None => println!("No price samples stored"),
    }
    Ok(())
}

fn print_backfill(report: &BackfillReport) {
    println!("Backfill {} to {}", report.from, report.to);
    for entry in &report.instruments {
        match &entry.outcome {
            BackfillOutcome::Stored { inserted, existing } => {
                println!("  {:<8} {inserted} inserted, {existing} already stored", entry.symbol)
            }
            BackfillOutcome::Failed { reason } => println!("  {:<8} failed: {reason}", entry.symbol),
        }
    }
    println!(
        "Inserted {} bars, {} instruments failed",
        report.inserted(),
        report.failed()
    );
}

fn stop_signal(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> {
    async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Stream committed price changes to stdout as JSON lines.
async fn print_events(mut rx: broadcast::Receiver<crate::domain::price_event::PriceChangeEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "could not encode price change"),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_serve(app: App) -> Result<(), StockbookError> {
    let seeded = app.engine().seed_instruments()?;
    if seeded > 0 {
        info!(seeded, "seeded sample instruments");
    }

    let sink = Arc::new(BroadcastSink::new(256));
    let printer = tokio::spawn(print_events(sink.subscribe()));

    let sync = PriceSync::new(app.store.clone(), app.resolver.clone(), sink)
        .with_concurrency(app.settings.sync_concurrency);
    let backfill = HistoricalBackfill::new(app.store.clone(), app.resolver.clone());
    let schedules = app.settings.backfill_schedules();
    let (stop_tx, stop_rx) = watch::channel(false);

    let signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "could not listen for ctrl-c");
        }
        info!("shutdown requested");
        let _ = stop_tx.send(true);
    };
    let sync_task = async {
        if app.settings.sync_enabled {
            sync.run(app.settings.sync_interval, stop_signal(stop_rx.clone()))
                .await;
        } else {
            info!("price sync disabled");
        }
    };
    let backfill_task = async {
        if app.settings.backfill_enabled {
            backfill
                .run_scheduled(&schedules, stop_signal(stop_rx.clone()))
                .await;
        } else {
            info!("scheduled backfill disabled");
        }
    };

    tokio::join!(signal, sync_task, backfill_task);
    drop(sync);
    if let Err(e) = printer.await {
        warn!(error = %e, "event printer ended abnormally");
    }
    Ok(())
}
