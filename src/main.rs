// ███████╗██╗  ██╗██╗██████╗ ███╗   ███╗███████╗███╗   ██╗████████╗
// ██╔════╝██║  ██║██║██╔══██╗████╗ ████║██╔════╝████╗  ██║╚══██╔══╝
// ███████╗███████║██║██████╔╝██╔████╔██║█████╗  ██╔██╗ ██║   ██║
// ╚════██║██╔══██║██║██╔═══╝ ██║╚██╔╝██║██╔══╝  ██║╚██╗██║   ██║
// ███████║██║  ██║██║██║     ██║ ╚═╝ ██║███████╗██║ ╚████║   ██║
// ╚══════╝╚═╝  ╚═╝╚═╝╚═╝     ╚═╝     ╚═╝╚══════╝╚═╝  ╚═══╝   ╚═╝
//
// S T A T U S   E N G I N E
//
// Watches one shipment on behalf of one party. Loads it, says what can be
// done next, optionally does it, then keeps refetching until Ctrl+C.

use anyhow::{bail, Context};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use shipment_status_engine::auth::{resolve_role, SessionUser};
use shipment_status_engine::circuit_breaker::CircuitBreaker;
use shipment_status_engine::config::Config;
use shipment_status_engine::metrics::MetricsCollector;
use shipment_status_engine::rating_cache::RatingCache;
use shipment_status_engine::{
    poller, Action, HttpTransportationApi, ShipmentController, TransitionPayload,
};

fn print_banner() {
    let banner = r#"

    ╔══════════════════════════════════════════════════════════════╗
    ║                                                              ║
    ║              S H I P M E N T   S T A T U S                   ║
    ║                     E N G I N E                              ║
    ║                                                              ║
    ║   request pickup -> confirm pickup -> request delivery       ║
    ║        -> confirm delivery -> rate the other side            ║
    ║                                                              ║
    ║   "The backend has the last word. We just press buttons."    ║
    ║                                                              ║
    ╚══════════════════════════════════════════════════════════════╝

    "#;
    println!("{}", banner);
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
            .init();
    }
}

/// Perform the configured one-shot action. Failures are logged, never fatal.
async fn run_one_shot(controller: &mut ShipmentController, config: &Config, action: Action) {
    if !controller.plan().allows(action) {
        warn!(
            action = %action,
            status = %controller.record().status,
            "Configured action is not available right now, skipping"
        );
        return;
    }

    let result = match action {
        Action::RateCounterparty => match config.rating {
            Some(rating) => {
                controller
                    .rate_counterparty(rating, config.rating_comment.clone())
                    .await
            }
            None => {
                warn!("SHIPMENT_ENGINE_RATING is required to rate, skipping");
                return;
            }
        },
        Action::Cancel => {
            let payload = TransitionPayload {
                reason: config.cancel_reason.clone(),
            };
            controller.apply_transition(action, payload).await
        }
        other => controller.apply_transition(other, TransitionPayload::none()).await,
    };

    match result {
        Ok(record) => info!(action = %action, status = %record.status, "Action completed"),
        Err(err) => error!(
            action = %action,
            error = %err,
            "Action failed: {}",
            err.user_message()
        ),
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(config.log_json);

    print_banner();
    info!("Shipment status engine initializing...");

    let user = SessionUser::from_user_type(config.user_type.clone());
    let Some(role) = resolve_role(&user) else {
        bail!("SHIPMENT_ENGINE_USER_TYPE must be 'cargo_owner' or 'transporter'");
    };
    let Some(shipment_id) = config.shipment_id.clone() else {
        bail!("SHIPMENT_ENGINE_SHIPMENT_ID is not set");
    };
    if config.action.is_none() {
        if let Some(raw) = Config::raw_action() {
            warn!(action = %raw, "Unknown SHIPMENT_ENGINE_ACTION ignored");
        }
    }
    info!(
        api_base_url = %config.api_base_url,
        role = %role,
        shipment_id = %shipment_id,
        "Configuration loaded"
    );

    let api = Arc::new(HttpTransportationApi::new(&config).context("building backend client")?);
    let rating_cache = Arc::new(RatingCache::open(&config.rating_cache_path));
    let metrics = Arc::new(MetricsCollector::new());

    let mut controller = ShipmentController::load(api, role, &shipment_id)
        .await
        .with_context(|| format!("loading shipment {shipment_id}"))?
        .with_rating_cache(rating_cache)
        .with_metrics(metrics.clone());

    let plan = controller.plan();
    info!(
        status = %controller.record().status,
        actions = ?plan.actions,
        notice = %plan.notice.as_ref().map(|n| n.message()).unwrap_or_default(),
        fully_rated = controller.record().is_fully_rated(),
        "Current shipment state"
    );
    for entry in controller.timeline() {
        info!(stage = ?entry.stage, at = ?entry.at, "{}", entry.details);
    }

    if let Some(action) = config.action {
        run_one_shot(&mut controller, &config, action).await;
    }

    let breaker = CircuitBreaker::new(
        "refetch",
        config.circuit_breaker_failure_threshold,
        config.circuit_breaker_reset_timeout,
        config.circuit_breaker_success_threshold,
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => warn!("Shutdown signal received"),
            Err(err) => error!("Signal listener error: {}", err),
        }
        let _ = shutdown_tx.send(true);
    });

    info!("Press Ctrl+C to stop");
    poller::run(&mut controller, &breaker, config.poll_interval, &mut shutdown_rx).await;

    match serde_json::to_string(&metrics.snapshot()) {
        Ok(json) => info!(metrics = %json, "Final metrics"),
        Err(err) => warn!(error = %err, "Could not serialize metrics"),
    }
    info!(breaker = ?breaker.snapshot(), "Shipment status engine offline");
    Ok(())
}
