use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dorma_domain::payment::{IntentStatus, MockPaymentProvider, PaymentProvider};
use dorma_domain::repository::{BookingStore, Transition, UnitStore};
use dorma_domain::{
    Booking, BookingError, BookingStatus, BookingTerms, Claims, Gender, GenderPolicy,
    PaymentStatus, Role, StoreError, Unit,
};
use dorma_engine::{
    BookingOrchestrator, BookingRules, ChangeFeed, HoldManager, PaymentOutcome,
    PaymentReconciler, Resolution,
};
use dorma_ledger::AvailabilityLedger;
use dorma_store::InMemoryStore;
use uuid::Uuid;

const PRICE_PER_BED: i64 = 2000;

struct Harness {
    store: Arc<InMemoryStore>,
    ledger: Arc<AvailabilityLedger>,
    holds: Arc<HoldManager>,
    orchestrator: Arc<BookingOrchestrator>,
    reconciler: PaymentReconciler,
    payments: Arc<MockPaymentProvider>,
    unit_id: Uuid,
}

async fn harness(capacity: i32, policy: GenderPolicy, hold_ttl: Duration) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let bookings: Arc<dyn BookingStore> = store.clone();
    let units: Arc<dyn UnitStore> = store.clone();

    let unit = Unit {
        id: Uuid::new_v4(),
        room_id: Uuid::new_v4(),
        capacity,
        gender_policy: policy,
        price_per_bed: PRICE_PER_BED,
    };
    units.upsert_unit(&unit).await.unwrap();

    let ledger = Arc::new(AvailabilityLedger::new());
    let feed = ChangeFeed::new(64);
    let payments = Arc::new(MockPaymentProvider::new());
    let provider: Arc<dyn PaymentProvider> = payments.clone();

    let holds = Arc::new(HoldManager::new(
        ledger.clone(),
        bookings.clone(),
        units.clone(),
        feed.clone(),
    ));
    holds.recover().await.unwrap();

    let orchestrator = Arc::new(BookingOrchestrator::new(
        bookings.clone(),
        units,
        holds.clone(),
        provider.clone(),
        feed.clone(),
        BookingRules {
            hold_ttl,
            currency: "EUR".to_string(),
        },
    ));

    let reconciler = PaymentReconciler::new(bookings, holds.clone(), provider, feed);

    Harness {
        store,
        ledger,
        holds,
        orchestrator,
        reconciler,
        payments,
        unit_id: unit.id,
    }
}

fn student(sub: &str) -> Claims {
    Claims {
        sub: sub.to_string(),
        role: Role::Student,
        gender: Some(Gender::Female),
        exp: 0,
    }
}

fn admin() -> Claims {
    Claims {
        sub: "ops".to_string(),
        role: Role::Admin,
        gender: None,
        exp: 0,
    }
}

fn terms() -> BookingTerms {
    BookingTerms {
        semester: "2026-WS".to_string(),
        duration_months: 6,
    }
}

fn total() -> i64 {
    PRICE_PER_BED * 6
}

fn after_deadline() -> DateTime<Utc> {
    Utc::now() + Duration::seconds(1)
}

async fn occupied(h: &Harness) -> i32 {
    h.ledger.snapshot(h.unit_id).unwrap().occupied
}

async fn booking(h: &Harness, id: Uuid) -> Booking {
    h.store.get_booking(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_last_slot_yields_one_success_one_conflict() {
    let h = harness(1, GenderPolicy::Mixed, Duration::hours(24)).await;

    let a = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();
    assert_eq!(a.booking.status, BookingStatus::OnHold);
    assert_eq!(a.booking.total_amount, total());
    assert!(a.booking.hold_expires_at.is_some());
    assert!(a.payment_reference.is_some());
    assert_eq!(occupied(&h).await, 1);

    let b = h
        .orchestrator
        .request_booking(&student("bob"), h.unit_id, &terms())
        .await;
    assert!(matches!(b, Err(BookingError::RoomUnavailable)));
    assert_eq!(occupied(&h).await, 1);
}

#[tokio::test]
async fn test_concurrent_requests_never_overbook() {
    let h = harness(2, GenderPolicy::Mixed, Duration::hours(24)).await;

    let mut handles = Vec::new();
    for i in 0..6 {
        let orchestrator = h.orchestrator.clone();
        let unit_id = h.unit_id;
        handles.push(tokio::spawn(async move {
            orchestrator
                .request_booking(&student(&format!("tenant-{i}")), unit_id, &terms())
                .await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(BookingError::RoomUnavailable) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(wins, 2);
    assert_eq!(conflicts, 4);
    assert_eq!(occupied(&h).await, 2);
}

#[tokio::test]
async fn test_hold_expiry_releases_slot_exactly_once() {
    let h = harness(1, GenderPolicy::Mixed, Duration::zero()).await;

    let receipt = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();
    assert_eq!(occupied(&h).await, 1);

    let expired = h.holds.run_sweep_once(after_deadline()).await.unwrap();
    assert_eq!(expired, 1);
    assert_eq!(occupied(&h).await, 0);
    assert_eq!(
        booking(&h, receipt.booking.id).await.status,
        BookingStatus::Expired
    );

    // Repeated sweeps are no-ops.
    let again = h.holds.run_sweep_once(after_deadline()).await.unwrap();
    assert_eq!(again, 0);
    assert_eq!(occupied(&h).await, 0);
}

#[tokio::test]
async fn test_confirmation_beats_later_expiry() {
    let h = harness(1, GenderPolicy::Mixed, Duration::zero()).await;

    let receipt = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();
    let reference = receipt.payment_reference.unwrap();

    let confirmed = h
        .reconciler
        .on_payment_callback(
            receipt.booking.id,
            &reference,
            PaymentOutcome::Succeeded { amount: total() },
        )
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.payment_status, PaymentStatus::Paid);
    // Confirmation consumes the hold; the slot stays occupied.
    assert_eq!(occupied(&h).await, 1);

    // The sweeper fires anyway (deadline already passed) but loses the
    // race: exactly one of {expire, confirm} applied.
    let expired = h.holds.run_sweep_once(after_deadline()).await.unwrap();
    assert_eq!(expired, 0);
    assert_eq!(
        booking(&h, receipt.booking.id).await.status,
        BookingStatus::Confirmed
    );
    assert_eq!(occupied(&h).await, 1);
}

#[tokio::test]
async fn test_late_payment_requires_refund_and_leaves_occupancy() {
    let h = harness(1, GenderPolicy::Mixed, Duration::zero()).await;

    let receipt = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();
    let reference = receipt.payment_reference.unwrap();

    h.holds.run_sweep_once(after_deadline()).await.unwrap();
    assert_eq!(occupied(&h).await, 0);

    // The money arrives after the slot is gone: flagged, never silently
    // dropped, never re-occupying the slot.
    let flagged = h
        .reconciler
        .on_payment_callback(
            receipt.booking.id,
            &reference,
            PaymentOutcome::Succeeded { amount: total() },
        )
        .await
        .unwrap();
    assert_eq!(flagged.status, BookingStatus::Expired);
    assert_eq!(flagged.payment_status, PaymentStatus::RefundRequired);
    assert_eq!(occupied(&h).await, 0);

    let queue = h.store.list_flagged().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, receipt.booking.id);
}

#[tokio::test]
async fn test_payment_failure_keeps_hold_for_retry() {
    let h = harness(1, GenderPolicy::Mixed, Duration::hours(24)).await;

    let receipt = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();
    let reference = receipt.payment_reference.unwrap();

    let failed = h
        .reconciler
        .on_payment_callback(receipt.booking.id, &reference, PaymentOutcome::Failed)
        .await
        .unwrap();
    assert_eq!(failed.status, BookingStatus::OnHold);
    assert_eq!(failed.payment_status, PaymentStatus::Failed);
    assert_eq!(occupied(&h).await, 1);

    // Retry succeeds while the hold is still live.
    let confirmed = h
        .reconciler
        .on_payment_callback(
            receipt.booking.id,
            &reference,
            PaymentOutcome::Succeeded { amount: total() },
        )
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_amount_mismatch_is_disputed_without_releasing_slot() {
    let h = harness(1, GenderPolicy::Mixed, Duration::hours(24)).await;

    let receipt = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();
    let reference = receipt.payment_reference.unwrap();

    let disputed = h
        .reconciler
        .on_payment_callback(
            receipt.booking.id,
            &reference,
            PaymentOutcome::Succeeded {
                amount: total() - 500,
            },
        )
        .await
        .unwrap();
    assert_eq!(disputed.status, BookingStatus::OnHold);
    assert_eq!(disputed.payment_status, PaymentStatus::Disputed);
    assert_eq!(occupied(&h).await, 1);

    // Accepting the payment after review is an explicit admin action.
    let resolved = h
        .reconciler
        .resolve_flag(receipt.booking.id, Resolution::ConfirmPayment, &admin())
        .await
        .unwrap();
    assert_eq!(resolved.status, BookingStatus::Confirmed);
    assert_eq!(resolved.payment_status, PaymentStatus::Paid);
    assert_eq!(occupied(&h).await, 1);
}

#[tokio::test]
async fn test_refund_resolution_releases_disputed_slot() {
    let h = harness(1, GenderPolicy::Mixed, Duration::hours(24)).await;

    let receipt = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();
    let reference = receipt.payment_reference.unwrap();

    h.reconciler
        .on_payment_callback(
            receipt.booking.id,
            &reference,
            PaymentOutcome::Succeeded {
                amount: total() + 1,
            },
        )
        .await
        .unwrap();

    let resolved = h
        .reconciler
        .resolve_flag(receipt.booking.id, Resolution::Refund, &admin())
        .await
        .unwrap();
    assert_eq!(resolved.status, BookingStatus::Cancelled);
    assert_eq!(resolved.payment_status, PaymentStatus::Refunded);
    assert_eq!(occupied(&h).await, 0);
}

#[tokio::test]
async fn test_resolution_requires_admin_and_flag() {
    let h = harness(1, GenderPolicy::Mixed, Duration::hours(24)).await;

    let receipt = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();

    let not_admin = h
        .reconciler
        .resolve_flag(receipt.booking.id, Resolution::Refund, &student("alice"))
        .await;
    assert!(matches!(not_admin, Err(BookingError::NotPermitted)));

    let not_flagged = h
        .reconciler
        .resolve_flag(receipt.booking.id, Resolution::Refund, &admin())
        .await;
    assert!(matches!(not_flagged, Err(BookingError::NotFlagged)));
}

#[tokio::test]
async fn test_cancellation_is_idempotent() {
    let h = harness(1, GenderPolicy::Mixed, Duration::hours(24)).await;
    let alice = student("alice");

    let receipt = h
        .orchestrator
        .request_booking(&alice, h.unit_id, &terms())
        .await
        .unwrap();
    assert_eq!(occupied(&h).await, 1);

    let cancelled = h
        .orchestrator
        .cancel_booking(receipt.booking.id, &alice)
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(occupied(&h).await, 0);

    // Cancelling again neither errors nor decrements occupancy further.
    let again = h
        .orchestrator
        .cancel_booking(receipt.booking.id, &alice)
        .await
        .unwrap();
    assert_eq!(again.status, BookingStatus::Cancelled);
    assert_eq!(occupied(&h).await, 0);
}

#[tokio::test]
async fn test_cancel_requires_owner_or_admin() {
    let h = harness(1, GenderPolicy::Mixed, Duration::hours(24)).await;

    let receipt = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();

    let stranger = h
        .orchestrator
        .cancel_booking(receipt.booking.id, &student("mallory"))
        .await;
    assert!(matches!(stranger, Err(BookingError::NotPermitted)));

    let by_admin = h
        .orchestrator
        .cancel_booking(receipt.booking.id, &admin())
        .await
        .unwrap();
    assert_eq!(by_admin.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn test_duplicate_request_returns_existing_booking() {
    let h = harness(2, GenderPolicy::Mixed, Duration::hours(24)).await;
    let alice = student("alice");

    let first = h
        .orchestrator
        .request_booking(&alice, h.unit_id, &terms())
        .await
        .unwrap();
    let second = h
        .orchestrator
        .request_booking(&alice, h.unit_id, &terms())
        .await
        .unwrap();

    assert_eq!(first.booking.id, second.booking.id);
    assert_eq!(first.payment_reference, second.payment_reference);
    // No second hold was taken.
    assert_eq!(occupied(&h).await, 1);
}

#[tokio::test]
async fn test_policy_and_role_checks() {
    let h = harness(1, GenderPolicy::Male, Duration::hours(24)).await;

    // Female tenant against a male-only unit.
    let violation = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await;
    assert!(matches!(
        violation,
        Err(BookingError::PolicyViolation { .. })
    ));
    assert_eq!(occupied(&h).await, 0);

    // Only students may book.
    let landlord = Claims {
        sub: "landlord-1".to_string(),
        role: Role::Landlord,
        gender: Some(Gender::Male),
        exp: 0,
    };
    let not_permitted = h
        .orchestrator
        .request_booking(&landlord, h.unit_id, &terms())
        .await;
    assert!(matches!(not_permitted, Err(BookingError::NotPermitted)));

    let bad_terms = BookingTerms {
        semester: "2026-WS".to_string(),
        duration_months: 0,
    };
    let male_student = Claims {
        sub: "bob".to_string(),
        role: Role::Student,
        gender: Some(Gender::Male),
        exp: 0,
    };
    let invalid = h
        .orchestrator
        .request_booking(&male_student, h.unit_id, &bad_terms)
        .await;
    assert!(matches!(invalid, Err(BookingError::InvalidTerms(_))));
}

#[tokio::test]
async fn test_capacity_two_admits_two_then_conflicts() {
    let h = harness(2, GenderPolicy::Mixed, Duration::hours(24)).await;

    h.orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();
    h.orchestrator
        .request_booking(&student("bob"), h.unit_id, &terms())
        .await
        .unwrap();
    assert_eq!(occupied(&h).await, 2);

    let third = h
        .orchestrator
        .request_booking(&student("carol"), h.unit_id, &terms())
        .await;
    assert!(matches!(third, Err(BookingError::RoomUnavailable)));
}

#[tokio::test]
async fn test_rebooking_after_cancellation() {
    let h = harness(1, GenderPolicy::Mixed, Duration::hours(24)).await;
    let alice = student("alice");

    let first = h
        .orchestrator
        .request_booking(&alice, h.unit_id, &terms())
        .await
        .unwrap();

    let blocked = h
        .orchestrator
        .request_booking(&student("bob"), h.unit_id, &terms())
        .await;
    assert!(matches!(blocked, Err(BookingError::RoomUnavailable)));

    h.orchestrator
        .cancel_booking(first.booking.id, &alice)
        .await
        .unwrap();

    let retry = h
        .orchestrator
        .request_booking(&student("bob"), h.unit_id, &terms())
        .await
        .unwrap();
    assert_eq!(retry.booking.status, BookingStatus::OnHold);
    assert_eq!(occupied(&h).await, 1);
}

#[tokio::test]
async fn test_verify_payment_poll_path() {
    let h = harness(1, GenderPolicy::Mixed, Duration::hours(24)).await;

    let receipt = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();
    let reference = receipt.payment_reference.unwrap();

    // Still pending at the provider: nothing changes.
    let pending = h
        .reconciler
        .verify_payment(receipt.booking.id, &reference)
        .await
        .unwrap();
    assert_eq!(pending.status, BookingStatus::OnHold);
    assert_eq!(pending.payment_status, PaymentStatus::Pending);

    // Processor settled but the webhook never arrived.
    h.payments.complete(&reference, IntentStatus::Succeeded);
    let confirmed = h
        .reconciler
        .verify_payment(receipt.booking.id, &reference)
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_ledger_recovery_after_restart() {
    let h = harness(2, GenderPolicy::Mixed, Duration::zero()).await;

    let receipt = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();
    assert_eq!(occupied(&h).await, 1);

    // Simulated restart: fresh ledger and hold manager over the same
    // persisted store.
    let bookings: Arc<dyn BookingStore> = h.store.clone();
    let units: Arc<dyn UnitStore> = h.store.clone();
    let ledger = Arc::new(AvailabilityLedger::new());
    let holds = HoldManager::new(ledger.clone(), bookings, units, ChangeFeed::new(8));

    holds.recover().await.unwrap();
    assert_eq!(ledger.snapshot(h.unit_id).unwrap().occupied, 1);

    // The persisted deadline is due; the first sweep enforces it.
    let expired = holds.run_sweep_once(after_deadline()).await.unwrap();
    assert_eq!(expired, 1);
    assert_eq!(ledger.snapshot(h.unit_id).unwrap().occupied, 0);
    assert_eq!(
        booking(&h, receipt.booking.id).await.status,
        BookingStatus::Expired
    );
}

/// Booking store that refuses row creation, for exercising the
/// slot-rollback path. Everything else delegates to the real store.
struct CreateFailsStore {
    inner: Arc<InMemoryStore>,
}

#[async_trait::async_trait]
impl BookingStore for CreateFailsStore {
    async fn create_booking(&self, _booking: &Booking) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("injected outage".to_string()))
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.inner.get_booking(id).await
    }

    async fn find_active_for_tenant(
        &self,
        tenant_id: &str,
        unit_id: Uuid,
    ) -> Result<Option<Booking>, StoreError> {
        self.inner.find_active_for_tenant(tenant_id, unit_id).await
    }

    async fn count_active_for_unit(&self, unit_id: Uuid) -> Result<i64, StoreError> {
        self.inner.count_active_for_unit(unit_id).await
    }

    async fn list_holds_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        self.inner.list_holds_expiring_before(cutoff).await
    }

    async fn list_flagged(&self) -> Result<Vec<Booking>, StoreError> {
        self.inner.list_flagged().await
    }

    async fn transition_booking(
        &self,
        id: Uuid,
        expected: &[BookingStatus],
        to: BookingStatus,
        hold_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Transition, StoreError> {
        self.inner
            .transition_booking(id, expected, to, hold_expires_at)
            .await
    }

    async fn set_payment_status(&self, id: Uuid, status: PaymentStatus) -> Result<(), StoreError> {
        self.inner.set_payment_status(id, status).await
    }

    async fn set_payment_reference(&self, id: Uuid, reference: &str) -> Result<(), StoreError> {
        self.inner.set_payment_reference(id, reference).await
    }
}

#[tokio::test]
async fn test_store_outage_never_leaves_phantom_occupancy() {
    let store = Arc::new(InMemoryStore::new());
    let unit = Unit {
        id: Uuid::new_v4(),
        room_id: Uuid::new_v4(),
        capacity: 1,
        gender_policy: GenderPolicy::Mixed,
        price_per_bed: PRICE_PER_BED,
    };
    store.upsert_unit(&unit).await.unwrap();

    let bookings: Arc<dyn BookingStore> = Arc::new(CreateFailsStore {
        inner: store.clone(),
    });
    let units: Arc<dyn UnitStore> = store.clone();
    let ledger = Arc::new(AvailabilityLedger::new());
    let feed = ChangeFeed::new(8);
    let provider: Arc<dyn PaymentProvider> = Arc::new(MockPaymentProvider::new());

    let holds = Arc::new(HoldManager::new(
        ledger.clone(),
        bookings.clone(),
        units.clone(),
        feed.clone(),
    ));
    holds.recover().await.unwrap();

    let orchestrator = BookingOrchestrator::new(
        bookings,
        units,
        holds,
        provider,
        feed,
        BookingRules::default(),
    );

    let result = orchestrator
        .request_booking(&student("alice"), unit.id, &terms())
        .await;
    assert!(matches!(
        result,
        Err(BookingError::Store(StoreError::Unavailable(_)))
    ));

    // The reserved slot was rolled back.
    assert_eq!(ledger.snapshot(unit.id).unwrap().occupied, 0);
}

#[tokio::test]
async fn test_recovery_derives_occupancy_from_live_bookings() {
    let h = harness(2, GenderPolicy::Mixed, Duration::hours(24)).await;

    // Alice pays and is confirmed; Bob holds then cancels. Only Alice's
    // booking is live when the process goes down.
    let alice_receipt = h
        .orchestrator
        .request_booking(&student("alice"), h.unit_id, &terms())
        .await
        .unwrap();
    let reference = alice_receipt.payment_reference.unwrap();
    h.reconciler
        .on_payment_callback(
            alice_receipt.booking.id,
            &reference,
            PaymentOutcome::Succeeded { amount: total() },
        )
        .await
        .unwrap();

    let bob_receipt = h
        .orchestrator
        .request_booking(&student("bob"), h.unit_id, &terms())
        .await
        .unwrap();
    h.orchestrator
        .cancel_booking(bob_receipt.booking.id, &student("bob"))
        .await
        .unwrap();

    // Restart: occupancy is counted from the booking rows, so nothing a
    // crash left behind can skew the counter.
    let bookings: Arc<dyn BookingStore> = h.store.clone();
    let units: Arc<dyn UnitStore> = h.store.clone();
    let ledger = Arc::new(AvailabilityLedger::new());
    let feed = ChangeFeed::new(8);
    let provider: Arc<dyn PaymentProvider> = Arc::new(MockPaymentProvider::new());
    let holds = Arc::new(HoldManager::new(
        ledger.clone(),
        bookings.clone(),
        units.clone(),
        feed.clone(),
    ));
    holds.recover().await.unwrap();
    assert_eq!(ledger.snapshot(h.unit_id).unwrap().occupied, 1);

    let orchestrator = BookingOrchestrator::new(
        bookings,
        units,
        holds,
        provider,
        feed,
        BookingRules::default(),
    );

    // One slot is genuinely free; the one under Alice's confirmed
    // booking is not.
    let carol = orchestrator
        .request_booking(&student("carol"), h.unit_id, &terms())
        .await
        .unwrap();
    assert_eq!(carol.booking.status, BookingStatus::OnHold);

    let dave = orchestrator
        .request_booking(&student("dave"), h.unit_id, &terms())
        .await;
    assert!(matches!(dave, Err(BookingError::RoomUnavailable)));
}

#[tokio::test]
async fn test_unit_added_after_startup_is_bookable() {
    let h = harness(1, GenderPolicy::Mixed, Duration::hours(24)).await;

    // Stored after recover() already ran; no restart in between.
    let late = Unit {
        id: Uuid::new_v4(),
        room_id: Uuid::new_v4(),
        capacity: 1,
        gender_policy: GenderPolicy::Mixed,
        price_per_bed: PRICE_PER_BED,
    };
    h.store.upsert_unit(&late).await.unwrap();

    let receipt = h
        .orchestrator
        .request_booking(&student("alice"), late.id, &terms())
        .await
        .unwrap();
    assert_eq!(receipt.booking.status, BookingStatus::OnHold);
    assert_eq!(h.ledger.snapshot(late.id).unwrap().occupied, 1);

    // Capacity is honored from first contact on.
    let bob = h
        .orchestrator
        .request_booking(&student("bob"), late.id, &terms())
        .await;
    assert!(matches!(bob, Err(BookingError::RoomUnavailable)));
}

/// Booking store whose tenant-duplicate lookup misses a set number of
/// times, standing in for two requests that both pass the pre-check
/// before the first row lands. Everything else delegates.
struct StaleLookupStore {
    inner: Arc<InMemoryStore>,
    misses: AtomicUsize,
}

#[async_trait::async_trait]
impl BookingStore for StaleLookupStore {
    async fn create_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        self.inner.create_booking(booking).await
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.inner.get_booking(id).await
    }

    async fn find_active_for_tenant(
        &self,
        tenant_id: &str,
        unit_id: Uuid,
    ) -> Result<Option<Booking>, StoreError> {
        let missed = self
            .misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |m| m.checked_sub(1))
            .is_ok();
        if missed {
            return Ok(None);
        }
        self.inner.find_active_for_tenant(tenant_id, unit_id).await
    }

    async fn count_active_for_unit(&self, unit_id: Uuid) -> Result<i64, StoreError> {
        self.inner.count_active_for_unit(unit_id).await
    }

    async fn list_holds_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        self.inner.list_holds_expiring_before(cutoff).await
    }

    async fn list_flagged(&self) -> Result<Vec<Booking>, StoreError> {
        self.inner.list_flagged().await
    }

    async fn transition_booking(
        &self,
        id: Uuid,
        expected: &[BookingStatus],
        to: BookingStatus,
        hold_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Transition, StoreError> {
        self.inner
            .transition_booking(id, expected, to, hold_expires_at)
            .await
    }

    async fn set_payment_status(&self, id: Uuid, status: PaymentStatus) -> Result<(), StoreError> {
        self.inner.set_payment_status(id, status).await
    }

    async fn set_payment_reference(&self, id: Uuid, reference: &str) -> Result<(), StoreError> {
        self.inner.set_payment_reference(id, reference).await
    }
}

#[tokio::test]
async fn test_simultaneous_duplicate_requests_take_one_hold() {
    let store = Arc::new(InMemoryStore::new());
    let unit = Unit {
        id: Uuid::new_v4(),
        room_id: Uuid::new_v4(),
        capacity: 2,
        gender_policy: GenderPolicy::Mixed,
        price_per_bed: PRICE_PER_BED,
    };
    store.upsert_unit(&unit).await.unwrap();

    // Both requests' lookups miss, as when two clicks land in the same
    // instant; the store's one-active-per-tenant constraint decides.
    let bookings: Arc<dyn BookingStore> = Arc::new(StaleLookupStore {
        inner: store.clone(),
        misses: AtomicUsize::new(2),
    });
    let units: Arc<dyn UnitStore> = store.clone();
    let ledger = Arc::new(AvailabilityLedger::new());
    let feed = ChangeFeed::new(8);
    let provider: Arc<dyn PaymentProvider> = Arc::new(MockPaymentProvider::new());

    let holds = Arc::new(HoldManager::new(
        ledger.clone(),
        bookings.clone(),
        units.clone(),
        feed.clone(),
    ));
    holds.recover().await.unwrap();

    let orchestrator = BookingOrchestrator::new(
        bookings,
        units,
        holds,
        provider,
        feed,
        BookingRules::default(),
    );

    let alice = student("alice");
    let first = orchestrator
        .request_booking(&alice, unit.id, &terms())
        .await
        .unwrap();
    let second = orchestrator
        .request_booking(&alice, unit.id, &terms())
        .await
        .unwrap();

    // The loser's hold was rolled back and the winner's booking returned.
    assert_eq!(second.booking.id, first.booking.id);
    assert_eq!(second.payment_reference, first.payment_reference);
    assert_eq!(ledger.snapshot(unit.id).unwrap().occupied, 1);
}
