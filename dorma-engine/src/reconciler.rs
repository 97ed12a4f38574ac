use std::sync::Arc;

use dorma_domain::payment::{IntentStatus, PaymentProvider};
use dorma_domain::repository::{BookingStore, Transition};
use dorma_domain::{Booking, BookingError, BookingStatus, Claims, PaymentStatus, Role};
use serde::Deserialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::feed::ChangeFeed;
use crate::holds::HoldManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded { amount: i64 },
    Failed,
}

/// Admin decision for a flagged booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Accept the payment after review (DISPUTED only).
    ConfirmPayment,
    /// Refund the tenant and close the claim.
    Refund,
}

/// Correlates external payment outcomes back to bookings and settles every
/// partial-failure case: success, failure, amount mismatch, and payment
/// landing after the hold already expired.
pub struct PaymentReconciler {
    bookings: Arc<dyn BookingStore>,
    holds: Arc<HoldManager>,
    payments: Arc<dyn PaymentProvider>,
    feed: ChangeFeed,
}

impl PaymentReconciler {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        holds: Arc<HoldManager>,
        payments: Arc<dyn PaymentProvider>,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            bookings,
            holds,
            payments,
            feed,
        }
    }

    /// Apply a provider callback. Always resolves to a booking state; the
    /// flagged outcomes (DISPUTED, REFUND_REQUIRED) are reported through
    /// the returned row, not as errors, so webhook handlers can ack.
    pub async fn on_payment_callback(
        &self,
        booking_id: Uuid,
        provider_reference: &str,
        outcome: PaymentOutcome,
    ) -> Result<Booking, BookingError> {
        let booking = self
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::NotFound)?;

        match outcome {
            PaymentOutcome::Failed => {
                // The hold stands; the tenant may retry payment until the
                // deadline.
                if booking.status == BookingStatus::OnHold {
                    self.bookings
                        .set_payment_status(booking_id, PaymentStatus::Failed)
                        .await?;
                    info!(%booking_id, %provider_reference, "payment failed, hold kept for retry");
                }
                self.reload(booking_id).await
            }
            PaymentOutcome::Succeeded { amount } => {
                self.apply_success(booking, provider_reference, amount).await
            }
        }
    }

    /// Pull-based fallback when the callback path is unavailable: query
    /// the processor directly and apply the same transitions.
    pub async fn verify_payment(
        &self,
        booking_id: Uuid,
        provider_reference: &str,
    ) -> Result<Booking, BookingError> {
        let intent = self
            .payments
            .get_intent(provider_reference)
            .await
            .map_err(|e| BookingError::Provider(e.to_string()))?;

        if intent.booking_id != booking_id {
            return Err(BookingError::NotFound);
        }

        match intent.status {
            IntentStatus::Pending => {
                debug!(%booking_id, "payment still pending at provider");
                self.reload(booking_id).await
            }
            IntentStatus::Succeeded => {
                self.on_payment_callback(
                    booking_id,
                    provider_reference,
                    PaymentOutcome::Succeeded {
                        amount: intent.amount,
                    },
                )
                .await
            }
            IntentStatus::Failed => {
                self.on_payment_callback(booking_id, provider_reference, PaymentOutcome::Failed)
                    .await
            }
        }
    }

    /// Explicit admin transition out of a flagged payment state. Flags are
    /// never cleared implicitly.
    pub async fn resolve_flag(
        &self,
        booking_id: Uuid,
        resolution: Resolution,
        claims: &Claims,
    ) -> Result<Booking, BookingError> {
        if claims.role != Role::Admin {
            return Err(BookingError::NotPermitted);
        }

        let booking = self
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::NotFound)?;

        if !booking.payment_status.is_flagged() {
            return Err(BookingError::NotFlagged);
        }

        match resolution {
            Resolution::ConfirmPayment => {
                match self
                    .bookings
                    .transition_booking(
                        booking_id,
                        &[BookingStatus::OnHold],
                        BookingStatus::Confirmed,
                        None,
                    )
                    .await?
                {
                    Transition::Applied(confirmed) => {
                        self.bookings
                            .set_payment_status(booking_id, PaymentStatus::Paid)
                            .await?;
                        self.holds.cancel_hold(&confirmed, false);
                        self.feed.publish_booking(&confirmed);
                        info!(%booking_id, "dispute resolved, payment accepted");
                        self.reload(booking_id).await
                    }
                    Transition::NotApplied(current) => Err(BookingError::InvalidTransition {
                        from: current.status,
                        to: BookingStatus::Confirmed,
                    }),
                }
            }
            Resolution::Refund => {
                // A disputed booking still holds its slot; give it back.
                if booking.status == BookingStatus::OnHold {
                    if let Transition::Applied(cancelled) = self
                        .bookings
                        .transition_booking(
                            booking_id,
                            &[BookingStatus::OnHold],
                            BookingStatus::Cancelled,
                            None,
                        )
                        .await?
                    {
                        self.holds.cancel_hold(&cancelled, true);
                        self.feed.publish_booking(&cancelled);
                    }
                }
                self.bookings
                    .set_payment_status(booking_id, PaymentStatus::Refunded)
                    .await?;
                info!(%booking_id, "flag resolved by refund");
                self.reload(booking_id).await
            }
        }
    }

    async fn apply_success(
        &self,
        booking: Booking,
        provider_reference: &str,
        amount: i64,
    ) -> Result<Booking, BookingError> {
        let booking_id = booking.id;

        match booking.status {
            BookingStatus::Confirmed => {
                debug!(%booking_id, "duplicate success callback ignored");
                return Ok(booking);
            }
            BookingStatus::Expired | BookingStatus::Cancelled => {
                return self.flag_post_expiry(booking_id, provider_reference).await;
            }
            BookingStatus::OnHold => {}
        }

        if amount != booking.total_amount {
            self.bookings
                .set_payment_status(booking_id, PaymentStatus::Disputed)
                .await?;
            error!(
                %booking_id,
                expected = booking.total_amount,
                reported = amount,
                %provider_reference,
                "payment amount mismatch, flagged for manual review"
            );
            return self.reload(booking_id).await;
        }

        match self
            .bookings
            .transition_booking(
                booking_id,
                &[BookingStatus::OnHold],
                BookingStatus::Confirmed,
                None,
            )
            .await?
        {
            Transition::Applied(confirmed) => {
                self.bookings
                    .set_payment_status(booking_id, PaymentStatus::Paid)
                    .await?;
                self.holds.cancel_hold(&confirmed, false);
                self.feed.publish_booking(&confirmed);
                info!(%booking_id, %provider_reference, "booking confirmed by payment");
                self.reload(booking_id).await
            }
            // The sweeper won the race between the snapshot above and the
            // conditional update: treat exactly like a late payment.
            Transition::NotApplied(_) => {
                self.flag_post_expiry(booking_id, provider_reference).await
            }
        }
    }

    /// The one case that is never auto-resolved: the money arrived but the
    /// slot is gone. Flag it for a human and leave occupancy untouched.
    async fn flag_post_expiry(
        &self,
        booking_id: Uuid,
        provider_reference: &str,
    ) -> Result<Booking, BookingError> {
        self.bookings
            .set_payment_status(booking_id, PaymentStatus::RefundRequired)
            .await?;
        error!(
            %booking_id,
            %provider_reference,
            "payment succeeded after hold was released, manual refund required"
        );
        self.reload(booking_id).await
    }

    async fn reload(&self, booking_id: Uuid) -> Result<Booking, BookingError> {
        self.bookings
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::NotFound)
    }
}
