use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};

use tradechat_analyzer::config::Config;
use tradechat_analyzer::currency::{self, format_price};
use tradechat_analyzer::loader::{self, IngestJob, IngestOptions};
use tradechat_analyzer::model::{PriceIntelligence, ReferencePriceTable, TradeRecord};
use tradechat_analyzer::pricing;
use tradechat_analyzer::query;
use tradechat_analyzer::search::SearchEngine;
use tradechat_analyzer::{insight, sellers};

#[derive(Parser)]
#[command(name = "tradechat-analyzer")]
#[command(about = "Search and price-check trade chat logs")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Print a default configuration file and exit
    #[arg(long)]
    generate_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Free text plus field clauses, e.g. "stone ql>90 price<50 seller=jota"
    Search {
        log: PathBuf,
        #[arg(long, short, default_value = "")]
        query: String,
        /// Reference price table (name;quantity;total_price)
        #[arg(long)]
        refs: Option<PathBuf>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Print matching records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fair value, buy/sell zones and bulk pricing for one item
    Stats {
        log: PathBuf,
        #[arg(long)]
        item: String,
        #[arg(long)]
        material: Option<String>,
        /// Forecast horizon in days (defaults to the configured value)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Price intelligence for every item in the log
    Overview {
        log: PathBuf,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Rate a price such as "1g50s" against the reference table
    Evaluate {
        #[arg(long)]
        refs: PathBuf,
        #[arg(long)]
        item: String,
        #[arg(long)]
        price: String,
    },
    /// Who sells an item and how concentrated the market is
    Sellers {
        log: PathBuf,
        #[arg(long)]
        item: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        print!("{}", Config::default_template());
        return Ok(());
    }

    let config = Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str()))
        .init();

    let Some(command) = args.command else {
        bail!("No command given. Use --help to list commands.");
    };

    match command {
        Command::Search {
            log,
            query,
            refs,
            limit,
            json,
        } => run_search(&config, &log, &query, refs.as_deref(), limit, json),
        Command::Stats {
            log,
            item,
            material,
            days,
        } => run_stats(&config, &log, &item, material.as_deref(), days),
        Command::Overview { log, limit } => run_overview(&config, &log, limit),
        Command::Evaluate { refs, item, price } => run_evaluate(&config, &refs, &item, &price),
        Command::Sellers { log, item, limit } => run_sellers(&config, &log, &item, limit),
    }
}

// Background ingest with a progress line on stderr.
fn ingest(config: &Config, path: &Path) -> Result<Vec<TradeRecord>> {
    let job = IngestJob::spawn(path, IngestOptions::from(&config.ingest));
    let loaded = job.wait(|percent| {
        eprint!("\rLoading {}... {:>3}%", path.display(), percent);
        let _ = std::io::stderr().flush();
    });
    eprintln!();

    let loaded = loaded.with_context(|| format!("Failed to load {}", path.display()))?;
    let Some((records, summary)) = loaded else {
        bail!("Loading {} was cancelled", path.display());
    };
    eprintln!(
        "{} offers from {} lines ({} skipped)",
        summary.records_kept,
        summary.lines_read,
        summary.dropped()
    );
    Ok(records)
}

fn load_refs(path: &Path) -> Result<ReferencePriceTable> {
    loader::load_reference_csv(path).with_context(|| format!("Failed to load reference table {}", path.display()))
}

fn run_search(
    config: &Config,
    log: &Path,
    input: &str,
    refs: Option<&Path>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let refs = refs.map(load_refs).transpose()?;
    let mut engine = SearchEngine::with_min_token_len(config.search.min_token_len);
    engine.load(ingest(config, log)?);

    let results = query::run_query(&engine, input);
    let shown: Vec<&TradeRecord> = results.iter().take(limit).copied().collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }

    println!("{} matches", results.len());
    for r in shown {
        let rating = match &refs {
            Some(table) => {
                let e = pricing::evaluate_with_band(&r.name, r.unit_price, table, config.pricing.rating_band_percent);
                format!("  {} ({:+.0}%)", e.rating, e.delta_percent)
            }
            None => String::new(),
        };
        println!(
            "{:<4} {:>6} x {:<30} {:>14} ea  {:<16} {}{}",
            r.order_type.as_str(),
            r.quantity,
            r.name,
            format_price(r.unit_price),
            r.seller,
            r.timestamp,
            rating
        );
    }
    Ok(())
}

fn print_intelligence(intel: &PriceIntelligence) {
    println!(
        "{} ({} offers, {} outliers removed)",
        intel.name, intel.sample_size, intel.outliers_removed
    );
    println!("  fair value   {}", format_price(intel.fair_value));
    println!(
        "  buy / sell   {} / {}",
        format_price(intel.buy_zone),
        format_price(intel.sell_zone)
    );
    println!("  range        {} - {}", format_price(intel.min), format_price(intel.max));
    println!(
        "  volatility   {:.1}% ({:?}), trend {:+.2}/offer",
        intel.volatility_pct, intel.volatility, intel.price_trend
    );
    println!("  confidence   {:.0}%", intel.confidence);
    let v = &intel.market_volatility;
    println!(
        "  market       score {:.0} ({:?}), supply {:.0}, demand {:.0}, {:?}",
        v.score, v.level, v.supply_consistency, v.demand_stability, v.direction
    );
}

fn run_stats(config: &Config, log: &Path, item: &str, material: Option<&str>, days: Option<u32>) -> Result<()> {
    let records = ingest(config, log)?;
    let selected = insight::select_records(&records, item, material);
    let Some(intel) = insight::intelligence_for(item.trim(), material, &selected, &config.stats) else {
        println!("Not enough priced offers for '{item}'");
        return Ok(());
    };

    print_intelligence(&intel);

    let days = days.unwrap_or(config.stats.forecast_days);
    match insight::forecast(&selected, days, config.stats.forecast_window_days) {
        Some(f) => println!(
            "  forecast     {} in {} days ({:+.1}%, {:?}, R² {:.2}, confidence {:.0}%)",
            format_price(f.predicted_price),
            f.forecast_days,
            f.predicted_change_percent,
            f.trend,
            f.r_squared,
            f.confidence
        ),
        None => println!("  forecast     not enough dated offers"),
    }

    let flagged: Vec<_> = insight::anomalies(&selected, config.stats.anomaly_threshold)
        .into_iter()
        .filter(|a| a.is_anomaly)
        .collect();
    if !flagged.is_empty() {
        println!("  anomalies:");
        for a in &flagged {
            println!(
                "    {:<16} {:>14} ea  z {:+.2}",
                a.seller,
                format_price(a.unit_price),
                a.z_score
            );
        }
    }

    if intel.bulk.len() > 1 {
        println!("  bulk:");
        for group in &intel.bulk {
            let multiplier = group
                .multiplier
                .map(|m| format!("x{m:.2}"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "    {:>6}  {:>3} offers  {:>14} ea  {:>6}{}",
                group.quantity,
                group.count,
                format_price(group.mean_unit_price),
                multiplier,
                if group.best_value { "  best value" } else { "" }
            );
        }
    }
    Ok(())
}

fn run_overview(config: &Config, log: &Path, limit: usize) -> Result<()> {
    let records = ingest(config, log)?;
    for intel in insight::market_overview(&records, &config.stats).iter().take(limit) {
        println!(
            "{:<30} {:>5} offers  fair {:>14}  {:?}",
            intel.name,
            intel.sample_size,
            format_price(intel.fair_value),
            intel.volatility
        );
    }
    Ok(())
}

fn run_evaluate(config: &Config, refs: &Path, item: &str, price_text: &str) -> Result<()> {
    let table = load_refs(refs)?;
    let price = currency::normalize(price_text);
    let evaluation = pricing::evaluate_with_band(item, price, &table, config.pricing.rating_band_percent);

    println!("{} at {}: {}", item, format_price(price), evaluation.rating);
    if evaluation.reference_price > 0.0 {
        println!(
            "  reference {} ({:+.1}%)",
            format_price(evaluation.reference_price),
            evaluation.delta_percent
        );
    } else if let Some((name, reference)) = pricing::find_closest_reference(item, &table) {
        println!("  closest reference: {} at {}", name, format_price(reference));
    }
    Ok(())
}

fn run_sellers(config: &Config, log: &Path, item: &str, limit: usize) -> Result<()> {
    let records = ingest(config, log)?;
    let top = sellers::top_sellers(&records, item, limit);
    if top.is_empty() {
        println!("No offers for '{item}'");
        return Ok(());
    }

    for s in &top {
        println!(
            "{:<20} {:>4} listings  {:>5.1}%  avg {:>14}  {:?}",
            s.seller,
            s.listings,
            s.market_share,
            format_price(s.avg_price),
            s.strategy
        );
    }
    let hhi = sellers::market_concentration(&records, item);
    println!("HHI {} ({:?})", hhi, sellers::concentration_level(hhi));
    Ok(())
}
