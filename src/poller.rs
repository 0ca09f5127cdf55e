// =============================================================================
// poller.rs — KEEP LOOKING UNTIL SOMEONE SAYS STOP
// =============================================================================
//
// The daemon's background loop: every poll interval, refetch the shipment,
// adopt whatever the server says, and log when the other party moved or the
// available actions changed. A circuit breaker keeps a dead backend from
// being asked every tick. Once the shipment is terminal and this party has
// nothing left to do, the loop ends on its own.
// =============================================================================

use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::controller::ShipmentController;

/// Refetch until `shutdown` flips or the shipment is finished for this party.
/// The controller is left holding the last adopted record.
pub async fn run(
    controller: &mut ShipmentController,
    breaker: &CircuitBreaker,
    poll_interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
) {
    info!(
        shipment_id = %controller.record().id,
        role = %controller.role(),
        poll_interval_secs = poll_interval.as_secs(),
        "Refetch loop online"
    );

    let mut last_plan = controller.plan();

    while !is_finished(controller) {
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {
                if !breaker.allow_request() {
                    debug!("Refetch skipped, circuit open");
                    continue;
                }

                match controller.refresh().await {
                    Ok(_) => {
                        breaker.record_success();
                        let plan = controller.plan();
                        if plan != last_plan {
                            let notice = plan.notice.as_ref().map(|n| n.message());
                            info!(
                                status = %controller.record().status,
                                actions = ?plan.actions,
                                notice = %notice.unwrap_or_default(),
                                "Available actions changed"
                            );
                            last_plan = plan;
                        }
                    }
                    Err(err) => {
                        if breaker.record_failure() {
                            controller.metrics().increment_circuit_breaker_trips();
                        }
                        warn!(error = %err, "Refetch failed, keeping last known record");
                    }
                }
            }

            _ = shutdown.changed() => {
                info!("Refetch loop received shutdown signal");
                break;
            }
        }
    }

    if is_finished(controller) {
        info!(
            status = %controller.record().status,
            "Shipment reached a terminal state, nothing left to do"
        );
    }
    info!(shipment_id = %controller.record().id, "Refetch loop offline");
}

fn is_finished(controller: &ShipmentController) -> bool {
    controller.record().status.is_terminal() && controller.plan().actions.is_empty()
}
