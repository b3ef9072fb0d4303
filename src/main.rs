use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use portfolio_frontier::commands::optimize::{self, OptimizationReport};
use portfolio_frontier::commands::portfolio;
use portfolio_frontier::config::AppConfig;
use portfolio_frontier::db::{PortfolioOrder, SqliteRepository};
use portfolio_frontier::models::{HoldingEdit, NewHolding, Portfolio};
use portfolio_frontier::quotes::{CachedFeed, ManualFeed, PriceFeed, ProviderType, YahooFeed};
use portfolio_frontier::valuation::ValuationEngine;

/// Track stock portfolios and rebalance them onto the efficient frontier
#[derive(Parser)]
#[command(name = "portfolio-frontier", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Quote provider: yahoo, yahoo-adjusted or manual
    #[arg(long, global = true)]
    provider: Option<String>,

    /// JSON quote file for the manual provider
    #[arg(long, global = true)]
    quotes: Option<PathBuf>,

    /// Valuation date (defaults to today)
    #[arg(long, global = true)]
    as_of: Option<NaiveDate>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty portfolio
    Create {
        name: String,
        #[arg(long, default_value_t = 0.0)]
        cash: f64,
    },
    /// Buy a holding and value it
    Add {
        portfolio: String,
        symbol: String,
        shares: i64,
        /// Purchase price per share
        #[arg(long)]
        price: f64,
        /// Purchase date (defaults to the valuation date)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Change shares, purchase price or purchase date of a holding
    Edit {
        portfolio: String,
        holding_id: i64,
        #[arg(long)]
        shares: Option<i64>,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Sell a holding completely
    Remove { portfolio: String, holding_id: i64 },
    /// Set the cash balance
    Cash { portfolio: String, amount: f64 },
    /// Delete a portfolio and its holdings
    Delete { portfolio: String },
    /// Revalue one portfolio, or all when no name is given
    Refresh { portfolio: Option<String> },
    /// Show a portfolio with its holdings
    Show { portfolio: String },
    /// List portfolios
    List {
        /// Order by market value instead of name
        #[arg(long)]
        by_value: bool,
    },
    /// Optimize a portfolio and store the result as <name>_opt
    Optimize {
        portfolio: String,
        #[arg(long)]
        risk_free_rate: Option<f64>,
        #[arg(long)]
        history_days: Option<i64>,
        #[arg(long)]
        samples: Option<usize>,
        #[arg(long)]
        points: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn init_tracing() {
    let log_format = std::env::var("PF_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.database_path = db.clone();
    }
    if let Some(name) = &cli.provider {
        config.provider =
            ProviderType::from_str(name).with_context(|| format!("unknown provider '{}'", name))?;
    }
    if let Some(quotes) = &cli.quotes {
        config.quotes_file = Some(quotes.clone());
    }
    config.validate()?;
    Ok(config)
}

fn build_feed(config: &AppConfig) -> Result<Box<dyn PriceFeed>> {
    let feed: Box<dyn PriceFeed> = match config.provider {
        ProviderType::Yahoo => Box::new(YahooFeed::new(false)?),
        ProviderType::YahooAdjusted => Box::new(YahooFeed::new(true)?),
        ProviderType::Manual => {
            let path = config
                .quotes_file
                .as_deref()
                .context("the manual provider needs a quote file")?;
            Box::new(ManualFeed::from_json_file(path)?)
        }
    };

    if !config.cache_history {
        return Ok(feed);
    }
    let conn = rusqlite::Connection::open(&config.database_path)
        .with_context(|| format!("opening history cache {}", config.database_path.display()))?;
    Ok(Box::new(CachedFeed::new(feed, conn, config.provider.as_str())?))
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let repo = SqliteRepository::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    tracing::debug!("Using database {}", config.database_path.display());

    let as_of = cli.as_of.unwrap_or_else(|| Local::now().date_naive());
    let output = cli.output;

    // Commands that never price anything skip building the feed
    match &cli.command {
        Commands::Create { name, cash } => {
            let created = portfolio::create_portfolio(&repo, name, *cash)?;
            return print_portfolio(output, &created);
        }
        Commands::Delete { portfolio: name } => {
            portfolio::delete_portfolio(&repo, name)?;
            println!("Deleted '{}'", name);
            return Ok(());
        }
        Commands::Show { portfolio: name } => {
            return print_portfolio(output, &portfolio::get_portfolio(&repo, name)?);
        }
        Commands::List { by_value } => {
            let order = if *by_value {
                PortfolioOrder::MarketValueDesc
            } else {
                PortfolioOrder::Name
            };
            return print_list(output, &portfolio::get_portfolios(&repo, order)?);
        }
        _ => {}
    }

    let feed = build_feed(&config)?;
    let engine = ValuationEngine::new(feed.as_ref());

    match cli.command {
        Commands::Add {
            portfolio: name,
            symbol,
            shares,
            price,
            date,
        } => {
            let new = NewHolding {
                symbol,
                shares,
                purchase_date: date.unwrap_or(as_of),
                purchase_price: price,
            };
            print_portfolio(output, &portfolio::add_holding(&engine, &repo, &name, &new, as_of)?)
        }
        Commands::Edit {
            portfolio: name,
            holding_id,
            shares,
            price,
            date,
        } => {
            let edit = HoldingEdit {
                shares,
                purchase_price: price,
                purchase_date: date,
            };
            let updated = portfolio::edit_holding(&engine, &repo, &name, holding_id, &edit, as_of)?;
            print_portfolio(output, &updated)
        }
        Commands::Remove {
            portfolio: name,
            holding_id,
        } => print_portfolio(output, &portfolio::remove_holding(&engine, &repo, &name, holding_id, as_of)?),
        Commands::Cash {
            portfolio: name,
            amount,
        } => print_portfolio(output, &portfolio::set_cash(&engine, &repo, &name, amount, as_of)?),
        Commands::Refresh { portfolio: Some(name) } => {
            print_portfolio(output, &portfolio::refresh_portfolio(&engine, &repo, &name, as_of)?)
        }
        Commands::Refresh { portfolio: None } => print_list(output, &portfolio::refresh_all(&engine, &repo, as_of)?),
        Commands::Optimize {
            portfolio: name,
            risk_free_rate,
            history_days,
            samples,
            points,
            seed,
        } => {
            let mut params = config.optimize_params();
            if let Some(rf) = risk_free_rate {
                params.risk_free_rate = rf;
            }
            if let Some(days) = history_days {
                params.history_days = days;
            }
            if let Some(samples) = samples {
                params.samples = samples;
            }
            if let Some(points) = points {
                params.frontier_points = points;
            }
            if seed.is_some() {
                params.seed = seed;
            }
            let report = optimize::optimize_portfolio(feed.as_ref(), &repo, &name, &params, as_of)?;
            print_report(output, &report)
        }
        Commands::Create { .. } | Commands::Delete { .. } | Commands::Show { .. } | Commands::List { .. } => Ok(()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_portfolio(output: OutputFormat, portfolio: &Portfolio) -> Result<()> {
    if let OutputFormat::Json = output {
        return print_json(portfolio);
    }

    println!(
        "{}  market value {:.2}  cash {:.2}  invested {:.2}  profit {:.2} ({:+.2}%)",
        portfolio.name(),
        portfolio.market_value(),
        portfolio.cash(),
        portfolio.invested(),
        portfolio.total_profit(),
        portfolio.profit_pct() * 100.0
    );
    if portfolio.holdings().is_empty() {
        return Ok(());
    }
    println!(
        "{:>6}  {:<10} {:>8} {:>12} {:>12} {:>14} {:>9} {:>8}",
        "id", "symbol", "shares", "cost", "last", "value", "profit%", "weight%"
    );
    for h in portfolio.holdings() {
        println!(
            "{:>6}  {:<10} {:>8} {:>12.4} {:>12.4} {:>14.2} {:>+9.2} {:>8.2}",
            h.id().map(|id| id.to_string()).unwrap_or_default(),
            h.symbol(),
            h.shares(),
            h.purchase_price(),
            h.last_price(),
            h.market_value(),
            h.profit_pct() * 100.0,
            h.weight_pct() * 100.0
        );
    }
    Ok(())
}

fn print_list(output: OutputFormat, portfolios: &[Portfolio]) -> Result<()> {
    if let OutputFormat::Json = output {
        return print_json(&portfolios);
    }

    println!("{:<24} {:>14} {:>12} {:>9} {:>8}", "name", "market value", "cash", "profit%", "holdings");
    for p in portfolios {
        println!(
            "{:<24} {:>14.2} {:>12.2} {:>+9.2} {:>8}",
            p.name(),
            p.market_value(),
            p.cash(),
            p.profit_pct() * 100.0,
            p.holding_count()
        );
    }
    Ok(())
}

fn print_report(output: OutputFormat, report: &OptimizationReport) -> Result<()> {
    if let OutputFormat::Json = output {
        return print_json(report);
    }

    println!(
        "{}: {} daily returns from {} to {}, risk-free rate {:.4}",
        report.source, report.observations, report.window_start, report.as_of, report.risk_free_rate
    );
    println!(
        "Frontier: {} of {} points kept, {} simulated portfolios",
        report.frontier.len(),
        report.raw_frontier.len(),
        report.cloud.len()
    );
    match &report.tangency {
        Some(t) => println!(
            "Tangency: volatility {:.4}, return {:.4}, Sharpe {:.4}",
            t.volatility, t.expected_return, t.sharpe_ratio
        ),
        None => println!(
            "No tangency portfolio; using minimum volatility {:.4} at return {:.4}",
            report.chosen.volatility, report.chosen.expected_return
        ),
    }
    println!();
    println!("{:<10} {:>8} {:>10} {:>10}", "symbol", "weight%", "shares", "change");
    for action in &report.actions {
        println!(
            "{:<10} {:>8.2} {:>10} {:>+10}",
            action.symbol,
            action.target_weight * 100.0,
            action.shares_after,
            action.share_change()
        );
    }
    println!();
    print_portfolio(output, &report.optimized)
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}
