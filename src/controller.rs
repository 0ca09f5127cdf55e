// =============================================================================
// controller.rs — THE SHIPMENT STATUS CONTROLLER
// =============================================================================
//
// Owns one shipment record on behalf of one party and runs the transition
// cycle:
//
//   validate -> claim the in-flight slot -> optimistic patch -> API call
//            -> merge the server answer       (success)
//            -> restore the pre-call record   (any failure)
//
// The in-flight slot is an RAII guard, so "busy" is cleared on every exit
// path. The record is published on a `watch` channel at every step
// (optimistic, committed, rolled back) and the parent callback fires whenever
// a new record is committed.
//
// Nothing here retries. Failures come back as `ControllerError`, each with a
// message fit for the user, and the controller stays usable.
// =============================================================================

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::actions::{optimistic_patch, plan_actions, validate_transition, ActionPlan, ActionSet};
use crate::api::TransportationApi;
use crate::error::ControllerError;
use crate::in_flight::{InFlightGuard, InFlightRegistry};
use crate::metrics::MetricsCollector;
use crate::models::{
    Action, RatingEntry, Role, ShipmentId, ShipmentRecord, TransitionPayload,
};
use crate::rating_cache::RatingCache;
use crate::reconcile::{merge, reconcile_refetch, StaleNotice};
use crate::timeline::{build_timeline, TimelineEntry};

/// Called with the new record after every commit.
pub type UpdateCallback = Box<dyn Fn(&ShipmentRecord) + Send + Sync>;

pub struct ShipmentController {
    api: Arc<dyn TransportationApi>,
    role: Role,
    record: ShipmentRecord,
    rating_cache: Arc<RatingCache>,
    in_flight: InFlightRegistry,
    state_tx: watch::Sender<ShipmentRecord>,
    on_update: Option<UpdateCallback>,
    metrics: Arc<MetricsCollector>,
}

impl ShipmentController {
    pub fn new(api: Arc<dyn TransportationApi>, role: Role, record: ShipmentRecord) -> Self {
        let (state_tx, _) = watch::channel(record.clone());
        let rating_cache = Arc::new(RatingCache::in_memory());
        rating_cache.observe(&record, role);
        Self {
            api,
            role,
            record,
            rating_cache,
            in_flight: InFlightRegistry::new(),
            state_tx,
            on_update: None,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Fetch the shipment and build a controller around it.
    pub async fn load(
        api: Arc<dyn TransportationApi>,
        role: Role,
        id: &ShipmentId,
    ) -> Result<Self, ControllerError> {
        let record = api.get_details(id).await?;
        info!(
            shipment_id = %record.id,
            role = %role,
            status = %record.status,
            "Shipment loaded"
        );
        Ok(Self::new(api, role, record))
    }

    /// Share a rating cache (file-backed, or across controllers).
    pub fn with_rating_cache(mut self, cache: Arc<RatingCache>) -> Self {
        cache.observe(&self.record, self.role);
        self.rating_cache = cache;
        self
    }

    /// Share the in-flight registry with other controllers.
    pub fn with_in_flight(mut self, registry: InFlightRegistry) -> Self {
        self.in_flight = registry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn on_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ShipmentRecord) + Send + Sync + 'static,
    {
        self.on_update = Some(Box::new(callback));
        self
    }

    pub fn record(&self) -> &ShipmentRecord {
        &self.record
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Every published record: optimistic, committed and rolled back.
    pub fn subscribe(&self) -> watch::Receiver<ShipmentRecord> {
        self.state_tx.subscribe()
    }

    /// A request for this shipment is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_in_flight(&self.record.id)
    }

    /// The record's own ratings OR the session cache. Once true for this
    /// shipment and role, stays true for the session.
    pub fn is_already_rated(&self) -> bool {
        self.rating_cache.is_already_rated(&self.record, self.role)
    }

    pub fn plan(&self) -> ActionPlan {
        plan_actions(&self.record, self.role, self.is_already_rated())
    }

    pub fn available_actions(&self) -> ActionSet {
        self.plan().actions
    }

    pub fn timeline(&self) -> Vec<TimelineEntry> {
        build_timeline(&self.record)
    }

    /// Send a status transition and fold the answer into the record.
    ///
    /// On failure the record is restored to exactly what it was before the
    /// call. Returns the committed record on success.
    pub async fn apply_transition(
        &mut self,
        action: Action,
        payload: TransitionPayload,
    ) -> Result<ShipmentRecord, ControllerError> {
        let request = validate_transition(
            &self.record,
            self.role,
            action,
            &payload,
            self.is_already_rated(),
        )
        .map_err(|err| self.reject(err))?;

        let _guard = self.claim()?;
        self.metrics.increment_attempted();

        let span = info_span!(
            "transition",
            request_id = %Uuid::new_v4(),
            shipment_id = %self.record.id,
            role = %self.role,
            action = %action,
        );

        async move {
            let prior = self.record.clone();
            let patch = optimistic_patch(&prior, self.role, &request, Utc::now());
            let optimistic = merge(&prior, &patch);
            self.publish(optimistic);
            debug!(status = %self.record.status, "Optimistic patch applied");

            match self.api.transition(&prior.id, &request).await {
                Ok(patch) => {
                    let committed = merge(&self.record, &patch);
                    self.commit(committed);
                    self.metrics.increment_committed();
                    info!(
                        status = %self.record.status,
                        detail = patch.detail.as_deref().unwrap_or(""),
                        "Transition committed"
                    );
                    Ok(self.record.clone())
                }
                Err(err) => Err(self.roll_back(prior, err.into())),
            }
        }
        .instrument(span)
        .await
    }

    /// Rate the other party. `rating` must be 1..=5.
    pub async fn rate_counterparty(
        &mut self,
        rating: u8,
        comment: Option<String>,
    ) -> Result<ShipmentRecord, ControllerError> {
        let action = Action::RateCounterparty;
        if !self.plan().allows(action) {
            return Err(self.reject(ControllerError::Validation {
                action,
                reason: format!(
                    "Rating is not available to the {} while the shipment is {}",
                    self.role, self.record.status
                ),
            }));
        }
        if !(1..=5).contains(&rating) {
            return Err(self.reject(ControllerError::Validation {
                action,
                reason: "Please choose a rating between 1 and 5.".to_string(),
            }));
        }
        let comment = comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());

        let _guard = self.claim()?;
        self.metrics.increment_attempted();

        let span = info_span!(
            "rating",
            request_id = %Uuid::new_v4(),
            shipment_id = %self.record.id,
            role = %self.role,
            rating,
        );

        async move {
            let prior = self.record.clone();
            let local_entry = RatingEntry {
                from_cargo_owner: self.role.rating_direction(),
                rating,
                comment: comment.clone(),
                created_at: Utc::now(),
            };
            let mut optimistic = prior.clone();
            optimistic.ratings.push(local_entry.clone());
            self.publish(optimistic);

            match self.api.rate(&prior.id, rating, comment.as_deref()).await {
                Ok(receipt) => {
                    let mut committed = prior.clone();
                    committed.ratings.push(receipt.rating.unwrap_or(local_entry));
                    self.rating_cache.mark_rated(&committed.id, self.role);
                    self.commit(committed);
                    self.metrics.increment_committed();
                    self.metrics.increment_ratings();
                    info!(both_rated = receipt.both_rated, "Rating submitted");
                    Ok(self.record.clone())
                }
                Err(err) => Err(self.roll_back(prior, err.into())),
            }
        }
        .instrument(span)
        .await
    }

    /// Refetch the shipment and adopt the server copy wholesale.
    pub async fn refresh(&mut self) -> Result<Option<StaleNotice>, ControllerError> {
        self.metrics.increment_refetches();
        match self.api.get_details(&self.record.id).await {
            Ok(server) => Ok(self.adopt(server)),
            Err(err) => {
                self.metrics.increment_refetch_failures();
                let err = ControllerError::from(err);
                warn!(shipment_id = %self.record.id, error = %err, "Refetch failed");
                Err(err)
            }
        }
    }

    /// Replace the local record with `server`, reporting any divergence.
    pub fn adopt(&mut self, server: ShipmentRecord) -> Option<StaleNotice> {
        let outcome = reconcile_refetch(&self.record, server);
        if let Some(notice) = &outcome.stale {
            self.metrics.increment_stale_notices();
            info!(
                shipment_id = %outcome.record.id,
                divergence = ?notice.divergence,
                local_status = %notice.local_status,
                server_status = %notice.server_status,
                "{}",
                notice.message()
            );
        }
        self.rating_cache.observe(&outcome.record, self.role);
        if outcome.record != self.record {
            self.commit(outcome.record);
        }
        outcome.stale
    }

    fn claim(&self) -> Result<InFlightGuard, ControllerError> {
        self.in_flight.try_begin(&self.record.id).ok_or_else(|| {
            self.reject(ControllerError::ActionInFlight {
                shipment_id: self.record.id.clone(),
            })
        })
    }

    /// Count and log an error raised before anything was sent.
    fn reject(&self, err: ControllerError) -> ControllerError {
        self.metrics.record_error(&err);
        warn!(
            shipment_id = %self.record.id,
            role = %self.role,
            error = %err,
            "Action refused locally"
        );
        err
    }

    fn roll_back(&mut self, prior: ShipmentRecord, err: ControllerError) -> ControllerError {
        self.publish(prior);
        self.metrics.record_error(&err);
        self.metrics.increment_rollbacks();
        warn!(error = %err, "Request failed, local state rolled back");
        err
    }

    fn publish(&mut self, record: ShipmentRecord) {
        self.record = record;
        self.state_tx.send_replace(self.record.clone());
    }

    fn commit(&mut self, record: ShipmentRecord) {
        self.publish(record);
        if let Some(callback) = &self.on_update {
            callback(&self.record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Notice;
    use crate::error::ApiError;
    use crate::memory_backend::ShipmentLedger;
    use crate::models::{RatingReceipt, ShipmentPatch, ShipmentStatus};
    use crate::reconcile::Divergence;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Answers every call with the same error, optionally after a gate opens.
    struct ScriptedApi {
        fail_with: Option<(u16, &'static str)>,
        gate: Option<Arc<Semaphore>>,
        calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn failing(status: u16, message: &'static str) -> Self {
            Self {
                fail_with: Some((status, message)),
                gate: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                fail_with: None,
                gate: Some(gate),
                calls: AtomicUsize::new(0),
            }
        }

        async fn answer(&self) -> Result<ShipmentPatch, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            match self.fail_with {
                Some((status, message)) if status >= 500 => Err(ApiError::Server {
                    status,
                    message: message.into(),
                }),
                Some((status, message)) => Err(ApiError::Rejected {
                    status,
                    message: message.into(),
                }),
                None => Ok(ShipmentPatch {
                    detail: Some("ok".into()),
                    ..ShipmentPatch::default()
                }),
            }
        }
    }

    #[async_trait]
    impl TransportationApi for ScriptedApi {
        async fn request_pickup(&self, _: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
            self.answer().await
        }
        async fn confirm_pickup(&self, _: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
            self.answer().await
        }
        async fn request_delivery(&self, _: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
            self.answer().await
        }
        async fn confirm_delivery(&self, _: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
            self.answer().await
        }
        async fn cancel(&self, _: &ShipmentId, _: &str) -> Result<ShipmentPatch, ApiError> {
            self.answer().await
        }
        async fn get_details(&self, id: &ShipmentId) -> Result<ShipmentRecord, ApiError> {
            self.answer().await?;
            Ok(ShipmentRecord::new(id.clone()))
        }
        async fn rate(
            &self,
            _: &ShipmentId,
            _: u8,
            _: Option<&str>,
        ) -> Result<RatingReceipt, ApiError> {
            self.answer().await?;
            Ok(RatingReceipt::default())
        }
    }

    fn completed(id: u64) -> ShipmentRecord {
        let mut r = ShipmentRecord::new(id);
        r.status = ShipmentStatus::Completed;
        r.pickup_requested = true;
        r.pickup_confirmed = true;
        r.delivery_requested = true;
        r.delivery_confirmed = true;
        r
    }

    #[tokio::test]
    async fn test_rejected_cancel_rolls_back_to_input() {
        let mut input = ShipmentRecord::new(10);
        input.pickup_requested = true;
        let api = Arc::new(ScriptedApi::failing(403, "You cannot cancel this shipment."));
        let mut controller = ShipmentController::new(api, Role::CargoOwner, input.clone());
        let rx = controller.subscribe();

        let err = controller
            .apply_transition(Action::Cancel, TransitionPayload::cancel("changed mind"))
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::TransitionRejected { status: 403, .. }));
        assert_eq!(err.user_message(), "You cannot cancel this shipment.");
        assert_eq!(controller.record(), &input);
        assert_eq!(*rx.borrow(), input);
        assert!(!controller.is_busy());
        assert_eq!(controller.metrics().snapshot().rollbacks, 1);
    }

    #[tokio::test]
    async fn test_server_error_is_network_error_with_rollback() {
        let input = ShipmentRecord::new(11);
        let api = Arc::new(ScriptedApi::failing(503, "maintenance"));
        let mut controller = ShipmentController::new(api, Role::Transporter, input.clone());

        let err = controller
            .apply_transition(Action::RequestPickup, TransitionPayload::none())
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Network { status: Some(503), .. }));
        assert_eq!(controller.record(), &input);
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_unavailable_action_never_reaches_the_api() {
        let api = Arc::new(ScriptedApi::failing(500, "should not be called"));
        let mut controller =
            ShipmentController::new(api.clone(), Role::CargoOwner, ShipmentRecord::new(12));

        let err = controller
            .apply_transition(Action::RequestPickup, TransitionPayload::none())
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Validation { .. }));

        let err = controller
            .apply_transition(Action::Cancel, TransitionPayload::cancel("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Validation { .. }));

        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(controller.metrics().snapshot().validation_failures, 2);
    }

    #[tokio::test]
    async fn test_second_action_while_in_flight_is_refused() {
        let registry = InFlightRegistry::new();
        let api = Arc::new(ScriptedApi::failing(500, "unused"));
        let mut controller =
            ShipmentController::new(api.clone(), Role::Transporter, ShipmentRecord::new(13))
                .with_in_flight(registry.clone());

        let held = registry.try_begin(&ShipmentId::from(13)).unwrap();
        assert!(controller.is_busy());
        let err = controller
            .apply_transition(Action::RequestPickup, TransitionPayload::none())
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::ActionInFlight { .. }));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);

        drop(held);
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_optimistic_state_is_visible_while_in_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let api = Arc::new(ScriptedApi::gated(gate.clone()));
        let registry = InFlightRegistry::new();
        let mut controller =
            ShipmentController::new(api, Role::Transporter, ShipmentRecord::new(14))
                .with_in_flight(registry.clone());
        let mut rx = controller.subscribe();

        let task = tokio::spawn(async move {
            let result = controller
                .apply_transition(Action::RequestPickup, TransitionPayload::none())
                .await;
            (controller, result)
        });

        rx.changed().await.unwrap();
        {
            let optimistic = rx.borrow_and_update();
            assert!(optimistic.pickup_requested);
            assert!(optimistic.pickup_requested_at.is_some());
        }
        assert!(registry.is_in_flight(&ShipmentId::from(14)));

        gate.add_permits(1);
        let (controller, result) = task.await.unwrap();
        let committed = result.unwrap();
        // detail-only answer: the optimistic values stand
        assert!(committed.pickup_requested);
        assert!(!controller.is_busy());
        assert_eq!(
            controller.plan().notice,
            Some(Notice::AwaitingPickupConfirmation)
        );
    }

    #[tokio::test]
    async fn test_full_handshake_against_ledger() {
        let ledger = ShipmentLedger::new();
        ledger.insert(ShipmentRecord::new(20));
        let id = ShipmentId::from(20);
        let registry = InFlightRegistry::new();

        let updates = Arc::new(AtomicUsize::new(0));
        let seen = updates.clone();
        let mut carrier = ShipmentController::load(
            Arc::new(ledger.as_party(Role::Transporter)),
            Role::Transporter,
            &id,
        )
        .await
        .unwrap()
        .with_in_flight(registry.clone())
        .on_update(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let mut owner = ShipmentController::load(
            Arc::new(ledger.as_party(Role::CargoOwner)),
            Role::CargoOwner,
            &id,
        )
        .await
        .unwrap()
        .with_in_flight(registry);

        carrier
            .apply_transition(Action::RequestPickup, TransitionPayload::none())
            .await
            .unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        // the owner has not seen the request yet
        assert!(!owner.available_actions().contains(&Action::ConfirmPickup));
        let notice = owner.refresh().await.unwrap().unwrap();
        assert_eq!(notice.divergence, Divergence::Advanced);
        assert!(owner.available_actions().contains(&Action::ConfirmPickup));

        owner
            .apply_transition(Action::ConfirmPickup, TransitionPayload::none())
            .await
            .unwrap();
        assert_eq!(owner.record().status, ShipmentStatus::InTransit);

        carrier.refresh().await.unwrap();
        carrier
            .apply_transition(Action::RequestDelivery, TransitionPayload::none())
            .await
            .unwrap();
        owner.refresh().await.unwrap();
        let done = owner
            .apply_transition(Action::ConfirmDelivery, TransitionPayload::none())
            .await
            .unwrap();
        assert_eq!(done.status, ShipmentStatus::Completed);
        assert_eq!(owner.available_actions(), ActionSet::from([Action::RateCounterparty]));

        owner.rate_counterparty(5, Some("careful driver".into())).await.unwrap();
        assert!(owner.is_already_rated());
        assert!(owner.available_actions().is_empty());
        assert_eq!(owner.plan().notice, Some(Notice::AlreadyRated));

        carrier.refresh().await.unwrap();
        assert_eq!(carrier.available_actions(), ActionSet::from([Action::RateCounterparty]));
        carrier.rate_counterparty(4, None).await.unwrap();
        assert!(ledger.snapshot(&id).unwrap().is_fully_rated());
    }

    #[tokio::test]
    async fn test_rating_stays_blocked_when_refetch_lags() {
        let ledger = ShipmentLedger::new();
        ledger.insert(completed(30));
        let id = ShipmentId::from(30);
        let mut owner = ShipmentController::new(
            Arc::new(ledger.as_party(Role::CargoOwner)),
            Role::CargoOwner,
            completed(30),
        );

        owner.rate_counterparty(5, None).await.unwrap();
        assert!(owner.is_already_rated());

        // the read replica has not caught up with the rating yet
        ledger.set_hide_ratings_on_read(true);
        owner.refresh().await.unwrap();
        assert!(owner.record().ratings.is_empty());
        assert!(owner.is_already_rated());
        assert!(owner.available_actions().is_empty());

        let err = owner.rate_counterparty(5, None).await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation { .. }));
        assert_eq!(ledger.snapshot(&id).unwrap().ratings.len(), 1);
    }

    #[tokio::test]
    async fn test_rating_out_of_range_is_validation() {
        let api = Arc::new(ScriptedApi::failing(500, "unused"));
        let mut controller = ShipmentController::new(api.clone(), Role::Transporter, completed(31));
        for bad in [0, 6] {
            let err = controller.rate_counterparty(bad, None).await.unwrap_err();
            assert!(matches!(err, ControllerError::Validation { .. }));
        }
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_rating_rolls_back_and_leaves_cache_clear() {
        let input = completed(32);
        let api = Arc::new(ScriptedApi::failing(
            400,
            "Only completed transportations can be rated.",
        ));
        let mut controller = ShipmentController::new(api, Role::CargoOwner, input.clone());

        let err = controller.rate_counterparty(3, None).await.unwrap_err();
        assert!(matches!(err, ControllerError::TransitionRejected { status: 400, .. }));
        assert_eq!(controller.record(), &input);
        assert!(!controller.is_already_rated());
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_remote_cancel_is_adopted_on_refresh() {
        let ledger = ShipmentLedger::new();
        ledger.insert(ShipmentRecord::new(40));
        let id = ShipmentId::from(40);
        let mut owner = ShipmentController::new(
            Arc::new(ledger.as_party(Role::CargoOwner)),
            Role::CargoOwner,
            ShipmentRecord::new(40),
        );

        ledger
            .as_party(Role::Transporter)
            .cancel(&id, "truck broke down")
            .await
            .unwrap();

        let notice = owner.refresh().await.unwrap().unwrap();
        assert_eq!(notice.divergence, Divergence::CancelledRemotely);
        assert_eq!(owner.record().status, ShipmentStatus::Cancelled);
        assert!(owner.available_actions().is_empty());
        assert_eq!(owner.metrics().snapshot().stale_notices, 1);
    }

    #[tokio::test]
    async fn test_refetch_failure_keeps_record() {
        let ledger = ShipmentLedger::new();
        ledger.insert(ShipmentRecord::new(41));
        let mut owner = ShipmentController::new(
            Arc::new(ledger.as_party(Role::CargoOwner)),
            Role::CargoOwner,
            ShipmentRecord::new(41),
        );
        ledger.set_outage(true);

        let err = owner.refresh().await.unwrap_err();
        assert!(matches!(err, ControllerError::Network { status: Some(503), .. }));
        assert_eq!(owner.record(), &ShipmentRecord::new(41));
        assert_eq!(owner.metrics().snapshot().refetch_failures, 1);
    }
}
