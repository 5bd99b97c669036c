//! SENTINEL — Multi-Strategy Intraday Scanner with Layered Risk Controls
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores cooldown state from disk (or starts fresh), wires the event
//! bus and risk guards, and runs the scan pipeline once per polling
//! cycle with graceful shutdown.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use sentinel::config::{self, SettingsProvider, StaticSettings};
use sentinel::data::quotes::QuotesClient;
use sentinel::data::MarketDataProvider;
use sentinel::engine::stages::{
    ConfidenceStage, DedupStage, DiagnosticsStage, ExitMonitorStage, GateStage, RankingStage,
    RegimeStage, ScoringStage, SizingStage, StrategyStage,
};
use sentinel::engine::{ConfidenceDetector, ScanContext, ScanPipeline};
use sentinel::events::{EventBus, EventKind};
use sentinel::notify::{AlertDispatcher, TelegramNotifier};
use sentinel::rate_limit::TokenBucketRateLimiter;
use sentinel::risk::adaptive::{AdaptiveManager, AdaptiveThresholds};
use sentinel::risk::circuit_breaker::CircuitBreaker;
use sentinel::risk::RiskEventHandler;
use sentinel::scoring::{
    DailyDuplicateChecker, ScoreRanker, SessionRegimeClassifier, StarWeightedScorer,
};
use sentinel::storage::sqlite::SqliteStore;
use sentinel::storage::state;
use sentinel::strategy::momentum::MomentumSurge;
use sentinel::strategy::orb::OpeningRangeBreakout;
use sentinel::strategy::vwap::{CooldownTracker, VwapBreakout, VwapParams};
use sentinel::strategy::Strategy;
use sentinel::types::trading_day;

const BANNER: &str = r#"
 ____  _____ _   _ _____ ___ _   _ _____ _
/ ___||  ___| \ | |_   _|_ _| \ | | ____| |
\___ \| |_  |  \| | | |  | ||  \| |  _| | |
 ___) |  _| | |\  | | |  | || |\  | |___| |___
|____/|_____|_| \_| |_| |___|_| \_|_____|_____|

  Multi-Strategy Intraday Scanner with Layered Risk Controls
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        poll_interval_secs = cfg.agent.poll_interval_secs,
        universe = cfg.agent.universe.len(),
        breaker_limit = cfg.risk.breaker_limit,
        "SENTINEL starting up"
    );

    let clock = cfg.session.clock()?;

    // -- Shared infrastructure -------------------------------------------

    let limiter = Arc::new(TokenBucketRateLimiter::new(
        cfg.rate_limit.requests_per_sec,
        cfg.rate_limit.per_minute_cap,
    ));
    let bus = Arc::new(EventBus::new());
    let store = Arc::new(SqliteStore::connect(&cfg.storage.db_path).await?);
    let settings: Arc<dyn SettingsProvider> = Arc::new(StaticSettings::from_config(&cfg));

    // -- Risk components --------------------------------------------------

    let breaker = Arc::new(Mutex::new(CircuitBreaker::new(
        cfg.risk.breaker_limit,
        store.clone(),
        bus.clone(),
    )));
    let adaptive = Arc::new(Mutex::new(AdaptiveManager::new(
        AdaptiveThresholds {
            reduce_after: cfg.risk.reduce_after_losses,
            pause_after: cfg.risk.pause_after_losses,
            reduced_min_stars: cfg.risk.reduced_min_stars,
        },
        store.clone(),
    )));

    // Risk guards subscribe first so they observe exits before any
    // alert handler reacts to them.
    let risk_handler = Arc::new(RiskEventHandler::new(breaker.clone(), adaptive.clone()));
    bus.subscribe(EventKind::StopLossHit, risk_handler.clone());
    bus.subscribe(EventKind::TradeExited, risk_handler);

    // -- Notification ------------------------------------------------------

    if let Some(notifier) = build_notifier(&cfg, limiter.clone())? {
        let dispatcher = Arc::new(AlertDispatcher::new(notifier));
        bus.subscribe(EventKind::AlertMessage, dispatcher.clone());
        bus.subscribe(EventKind::ExitAlert, dispatcher);
        info!("Telegram alerting enabled");
    } else {
        warn!("No Telegram credentials configured — alerts go to the log only");
    }

    // -- Strategies --------------------------------------------------------

    let today = trading_day(Utc::now());
    let vwap_cfg = &cfg.strategies.vwap_breakout;
    let cooldown = match state::load_cooldowns(&cfg.storage.cooldown_state_file)? {
        Some(saved) => CooldownTracker::restore(
            saved,
            vwap_cfg.max_signals_per_day,
            vwap_cfg.min_gap_minutes,
        ),
        None => CooldownTracker::new(
            vwap_cfg.max_signals_per_day,
            vwap_cfg.min_gap_minutes,
            today,
        ),
    };
    let vwap = Arc::new(VwapBreakout::new(
        VwapParams {
            min_volume_ratio: vwap_cfg.min_volume_ratio,
            breakout_pct: vwap_cfg.breakout_pct,
            stop_buffer_pct: vwap_cfg.stop_buffer_pct,
        },
        cooldown,
    ));
    let momentum_cfg = &cfg.strategies.momentum_surge;
    let strategies: Vec<Arc<dyn Strategy>> = vec![
        vwap.clone(),
        Arc::new(OpeningRangeBreakout::new(cfg.strategies.opening_range.buffer_pct)),
        Arc::new(MomentumSurge::new(
            momentum_cfg.min_change_pct,
            momentum_cfg.min_volume_ratio,
            momentum_cfg.stop_pct,
        )),
    ];

    // -- Market data -------------------------------------------------------

    let api_key = cfg
        .data
        .api_key_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());
    let data: Arc<dyn MarketDataProvider> =
        Arc::new(QuotesClient::new(cfg.data.base_url.clone(), api_key, limiter.clone())?);

    // -- Pipeline ----------------------------------------------------------

    let pipeline = ScanPipeline::new()
        .register(Box::new(GateStage::new(breaker.clone())))
        .register(Box::new(RegimeStage::new(Some(Arc::new(
            SessionRegimeClassifier::new(clock.clone()),
        )))))
        .register(Box::new(StrategyStage::new(
            strategies,
            data,
            adaptive.clone(),
            settings.clone(),
        )))
        .register(Box::new(ConfidenceStage::new(Some(ConfidenceDetector::new(
            store.clone(),
            cfg.confirmation.window_minutes,
        )))))
        .register(Box::new(ScoringStage::new(Some(Arc::new(
            StarWeightedScorer::default(),
        )))))
        .register(Box::new(DedupStage::new(Some(Arc::new(
            DailyDuplicateChecker::new(store.clone()),
        )))))
        .register(Box::new(RankingStage::new(Some(Arc::new(ScoreRanker)))))
        .register(Box::new(SizingStage::new(settings.clone())))
        // No execution integration yet, so no position book to monitor.
        .register(Box::new(ExitMonitorStage::new(None, bus.clone())))
        .register(Box::new(DiagnosticsStage::new(Some(store.clone()))));

    info!(stages = ?pipeline.stage_names(), "Pipeline assembled");

    // -- Main loop ---------------------------------------------------------

    let poll_interval = Duration::from_secs(cfg.agent.poll_interval_secs);
    let mut interval = tokio::time::interval(poll_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut session_day = today;
    let mut cycle: u64 = 0;

    info!(
        interval_secs = cfg.agent.poll_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                session_day = roll_session_day(
                    session_day, now.date_naive(), &breaker, &adaptive, &store,
                ).await;

                cycle += 1;
                let phase = clock.phase_at(now);
                if !phase.is_session() {
                    info!(cycle, phase = %phase, "Outside session — skipping cycle");
                    continue;
                }

                let mut ctx = ScanContext::new(
                    now,
                    phase,
                    settings.current().enabled_strategies,
                );
                match pipeline.process(&mut ctx).await {
                    Ok(()) => {
                        for signal in &ctx.ranked {
                            info!(
                                signal = %signal.candidate,
                                stars = signal.effective_stars,
                                qty = signal.quantity,
                                capital = %signal.capital_required,
                                "Signal emitted"
                            );
                        }
                    }
                    Err(e) => {
                        // Failed cycles are logged and abandoned; the next
                        // tick starts from a fresh context.
                        error!(cycle, error = %e, "Cycle failed — continuing to next");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Persist cooldown state for crash recovery
    state::save_cooldowns(&vwap.cooldown_state(), &cfg.storage.cooldown_state_file)?;
    info!(cycles = cycle, "SENTINEL shut down cleanly.");

    Ok(())
}

/// Handle trading-day rollover: reset the breaker and adaptive manager
/// exactly once per day, recording a resume row when the breaker ends the
/// day tripped or overridden.
async fn roll_session_day(
    current: NaiveDate,
    today: NaiveDate,
    breaker: &Arc<Mutex<CircuitBreaker>>,
    adaptive: &Arc<Mutex<AdaptiveManager>>,
    store: &Arc<SqliteStore>,
) -> NaiveDate {
    use sentinel::storage::BreakerLog;

    if today == current {
        return current;
    }

    info!(from = %current, to = %today, "Trading day rollover");

    let mut breaker = breaker.lock().await;
    if breaker.is_active() || breaker.is_overridden() {
        if let Err(e) = store.record_resume(current).await {
            warn!(error = %e, "Failed to record breaker resume");
        }
    }
    breaker.reset_daily();
    adaptive.lock().await.reset_daily();

    today
}

/// Build the Telegram notifier when both credentials resolve.
fn build_notifier(
    cfg: &config::AppConfig,
    limiter: Arc<TokenBucketRateLimiter>,
) -> Result<Option<Arc<TelegramNotifier>>> {
    let token = cfg
        .alerts
        .telegram_bot_token_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());
    let chat_id = cfg
        .alerts
        .telegram_chat_id_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());

    match (token, chat_id) {
        (Some(token), Some(chat_id)) => Ok(Some(Arc::new(TelegramNotifier::new(
            token, chat_id, limiter,
        )?))),
        _ => Ok(None),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sentinel=info"));

    let json_logging = std::env::var("SENTINEL_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
