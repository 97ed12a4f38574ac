use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    OnHold,
    Confirmed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::OnHold => "ON_HOLD",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Expired => "EXPIRED",
        }
    }

    /// Active bookings are the ones accounting for an occupied slot in the
    /// availability ledger.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::OnHold | BookingStatus::Confirmed)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON_HOLD" => Ok(BookingStatus::OnHold),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            "EXPIRED" => Ok(BookingStatus::Expired),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// Payment sub-state, independent of the booking lifecycle. `Disputed` and
/// `RefundRequired` are manual-review flags: they are never cleared
/// automatically, only by an explicit admin resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Disputed,
    RefundRequired,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Disputed => "DISPUTED",
            PaymentStatus::RefundRequired => "REFUND_REQUIRED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn is_flagged(&self) -> bool {
        matches!(self, PaymentStatus::Disputed | PaymentStatus::RefundRequired)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            "DISPUTED" => Ok(PaymentStatus::Disputed),
            "REFUND_REQUIRED" => Ok(PaymentStatus::RefundRequired),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingTerms {
    pub semester: String,
    pub duration_months: i32,
}

/// One tenant's claim on a bed. Never deleted, only transitioned, so the
/// row doubles as the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub tenant_id: String,
    pub unit_id: Uuid,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    /// Total amount in minor currency units.
    pub total_amount: i64,
    pub semester: String,
    pub duration_months: i32,
    pub payment_reference: Option<String>,
    /// Present only while status is ON_HOLD.
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl Booking {
    pub fn new_hold(
        tenant_id: String,
        unit_id: Uuid,
        total_amount: i64,
        terms: &BookingTerms,
        hold_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            unit_id,
            status: BookingStatus::OnHold,
            payment_status: PaymentStatus::Pending,
            total_amount,
            semester: terms.semester.clone(),
            duration_months: terms.duration_months,
            payment_reference: None,
            hold_expires_at: Some(hold_expires_at),
            created_at: Utc::now(),
            notes: None,
        }
    }
}
