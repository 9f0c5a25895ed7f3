//! Vibe Trader - Main Entry Point
//!
//! Runs one trading cycle per invocation (cron friendly), or back-to-back
//! cycles with `watch`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use vibe_trader::config::{Config, PathsConfig};
use vibe_trader::exchange::AlpacaClient;
use vibe_trader::logging::init_logging;
use vibe_trader::news::{LlmClient, NewsScorer, OpenAiClient};
use vibe_trader::persistence::{StateStore, TradeHistory};
use vibe_trader::shutdown::Shutdown;
use vibe_trader::strategy::{is_lock_contention, CycleOrchestrator, CycleOutcome, MarketRegime};

/// Vibe Trader CLI
#[derive(Parser)]
#[command(name = "vibe-trader")]
#[command(version, about = "Regime-aware crypto trading on Alpaca with news sentiment")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Write the log file as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single trading cycle (default)
    Run,

    /// Run cycles back-to-back until Ctrl-C or SIGTERM
    Watch {
        /// Pause between cycles
        #[arg(short, long, default_value = "900")]
        interval_secs: u64,
    },

    /// Show persisted positions, cooldowns and trade history
    Status {
        /// Include cached news verdicts
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Config is loaded first so logging can honour the configured paths
    let loaded = Config::load();
    let paths = loaded
        .as_ref()
        .map(|c| c.paths.clone())
        .unwrap_or_else(|_| PathsConfig::default());

    let _guard = match init_logging(&paths.log_dir, &paths.log_file, cli.json_logs) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("❌ [CONFIG] {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_once(config).await,
        Commands::Watch { interval_secs } => watch(config, interval_secs).await,
        Commands::Status { verbose } => show_status(&config, verbose),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ [FATAL] {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Everything one cycle needs, built once per process.
struct Bot {
    client: AlpacaClient,
    orchestrator: CycleOrchestrator,
    store: StateStore,
    history: TradeHistory,
}

impl Bot {
    fn build(config: Config) -> Result<Self> {
        config.validate_credentials()?;
        config.validate()?;

        info!("╔════════════════════════════════════════════════════════════╗");
        info!(
            "║              Vibe Trader v{}                            ║",
            env!("CARGO_PKG_VERSION")
        );
        info!("╚════════════════════════════════════════════════════════════╝");
        if config.alpaca.paper {
            info!("📝 Paper trading endpoint");
        } else {
            warn!("⚠️  LIVE TRADING - Real money at risk!");
        }
        log_config(&config);

        let client = AlpacaClient::new(&config.alpaca).context("Failed to create Alpaca client")?;
        let llm: Arc<dyn LlmClient> =
            Arc::new(OpenAiClient::new(&config.llm).context("Failed to create LLM client")?);
        let news = NewsScorer::from_config(&config, llm)?;
        let store = StateStore::new(&config.paths.state_file);
        let history = TradeHistory::new(&config.paths.trade_history);

        Ok(Self {
            client,
            orchestrator: CycleOrchestrator::new(config, news),
            store,
            history,
        })
    }

    async fn cycle(&mut self) -> Result<CycleOutcome> {
        self.orchestrator
            .run_locked(&self.client, &self.client, &self.store, &self.history, Utc::now())
            .await
    }
}

async fn run_once(config: Config) -> Result<()> {
    let mut bot = Bot::build(config)?;
    match bot.cycle().await {
        Ok(_) => Ok(()),
        Err(e) if is_lock_contention(&e) => {
            info!("🔒 [LOCK] Another cycle is still running, exiting");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn watch(config: Config, interval_secs: u64) -> Result<()> {
    let mut bot = Bot::build(config)?;
    let interval = Duration::from_secs(interval_secs.max(1));
    let shutdown = Shutdown::new();
    shutdown.listen();
    info!(interval_secs, "👀 [WATCH] Running cycles until Ctrl-C or SIGTERM");

    while !shutdown.is_requested() {
        match bot.cycle().await {
            Ok(_) => {}
            Err(e) if is_lock_contention(&e) => {
                info!("🔒 [LOCK] Another cycle is still running, skipping");
            }
            Err(e) => error!("❌ [CYCLE] {:#}", e),
        }

        if shutdown.pause(interval).await {
            break;
        }
    }
    info!("👋 [WATCH] Stopped");
    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let regimes = [MarketRegime::Bull, MarketRegime::Neutral, MarketRegime::Bear];

    info!("📋 Configuration:");
    info!(
        "   Benchmark: {} (SMA {})",
        config.market.benchmark_symbol, config.market.regime_sma_period
    );
    info!(
        "   Score Weights: AI {:.0}% / Tech {:.0}%",
        config.scoring.weight_ai * dec!(100),
        config.scoring.weight_tech * dec!(100)
    );
    info!("   Min Volume: ${}", config.scoring.min_volume_usd);
    for regime in regimes {
        info!(
            "   {}: entry ≥ {} | size {:.0}% | hard stop {:.1}% | lock at +{}% | trail {}×ATR | cooldown {}h",
            regime,
            config.scoring.entry_threshold.get(regime),
            config.capital.position_size_fraction.get(regime) * dec!(100),
            config.risk.hard_stop_fraction.get(regime) * dec!(100),
            config.risk.breakeven_activation_pct.get(regime),
            config.risk.trail_atr_multiplier.get(regime),
            config.risk.cooldown_hours.get(regime),
        );
    }
    if config.capital.halt_entries_in_bear {
        info!("   New entries halted in BEAR markets");
    }
    info!("   LLM: {} (max {} evaluations/cycle)", config.llm.model, config.llm.max_evaluations_per_cycle);
}

/// Print persisted state and trade history.
fn show_status(config: &Config, verbose: bool) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              VIBE TRADER STATUS                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let store = StateStore::new(&config.paths.state_file);
    if !store.path().exists() {
        println!("\n❌ State file not found: {}", store.path().display());
        println!("   No cycle has run yet, or the state path is incorrect.");
    }
    let state = store.load().context("Failed to read state file")?;
    let summary = TradeHistory::new(&config.paths.trade_history).summary()?;
    let now = Utc::now();

    println!("\n📈 Trade History");
    println!("   ├─ Closed Trades:    {}", summary.trades);
    println!("   ├─ Win Rate:         {:.1}%", summary.win_rate());
    println!("   └─ Realized PnL:     ${:.2}", summary.total_pnl);

    if !state.positions.is_empty() {
        println!("\n🔓 Tracked Positions");
        for (symbol, meta) in &state.positions {
            println!("   ┌─ {}", symbol);
            println!("   ├─ High Watermark: ${}", meta.highest_price());
            println!("   ├─ ATR at Entry:   {}", meta.atr_at_entry());
            if let Some(regime) = meta.entry_regime() {
                println!("   ├─ Entry Regime:   {}", regime);
            }
            println!(
                "   └─ Stop Mode:      {}",
                if meta.is_risk_free() { "PROFIT_LOCK" } else { "HARD_STOP" }
            );
        }
    }

    if !state.cool_down.is_empty() {
        println!("\n🧊 Cooldowns");
        for (symbol, ts) in &state.cool_down {
            println!("   ├─ {}: closed {}", symbol, describe_age(*ts, now));
        }
    }

    if verbose && !state.ai_memory.is_empty() {
        println!("\n🧠 Cached News Verdicts");
        for (symbol, memory) in &state.ai_memory {
            println!(
                "   ├─ {}: {} ({}, fp {})",
                symbol,
                memory.score,
                describe_age(memory.timestamp, now),
                memory.fingerprint.get(..12).unwrap_or(&memory.fingerprint)
            );
        }
    }

    Ok(())
}

fn describe_age(ts: i64, now: DateTime<Utc>) -> String {
    match DateTime::<Utc>::from_timestamp(ts, 0) {
        Some(at) => {
            let age = now - at;
            format!(
                "{} ({}h{:02}m ago)",
                at.format("%Y-%m-%d %H:%M UTC"),
                age.num_hours(),
                age.num_minutes() % 60
            )
        }
        None => format!("at invalid timestamp {}", ts),
    }
}
