use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dorma_domain::repository::{BookingStore, Transition, UnitStore};
use dorma_domain::{
    Booking, BookingStatus, GenderPolicy, PaymentStatus, StoreError, Unit,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, Pool, Postgres};
use tracing::info;
use uuid::Uuid;

const BOOKING_COLUMNS: &str = "id, tenant_id, unit_id, status, payment_status, total_amount, \
     semester, duration_months, payment_reference, hold_expires_at, created_at, notes";

#[derive(Debug, FromRow)]
struct BookingRow {
    id: Uuid,
    tenant_id: String,
    unit_id: Uuid,
    status: String,
    payment_status: String,
    total_amount: i64,
    semester: String,
    duration_months: i32,
    payment_reference: Option<String>,
    hold_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    notes: Option<String>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            tenant_id: row.tenant_id,
            unit_id: row.unit_id,
            status: BookingStatus::from_str(&row.status).map_err(StoreError::Unavailable)?,
            payment_status: PaymentStatus::from_str(&row.payment_status)
                .map_err(StoreError::Unavailable)?,
            total_amount: row.total_amount,
            semester: row.semester,
            duration_months: row.duration_months,
            payment_reference: row.payment_reference,
            hold_expires_at: row.hold_expires_at,
            created_at: row.created_at,
            notes: row.notes,
        })
    }
}

#[derive(Debug, FromRow)]
struct UnitRow {
    id: Uuid,
    room_id: Uuid,
    capacity: i32,
    gender_policy: String,
    price_per_bed: i64,
}

impl TryFrom<UnitRow> for Unit {
    type Error = StoreError;

    fn try_from(row: UnitRow) -> Result<Self, Self::Error> {
        Ok(Unit {
            id: row.id,
            room_id: row.room_id,
            capacity: row.capacity,
            gender_policy: GenderPolicy::from_str(&row.gender_policy)
                .map_err(StoreError::Unavailable)?,
            price_per_bed: row.price_per_bed,
        })
    }
}

fn store_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn statuses(expected: &[BookingStatus]) -> Vec<String> {
    expected.iter().map(|s| s.as_str().to_string()).collect()
}

/// Postgres-backed store. The conditional transition is a single
/// `UPDATE ... WHERE status = ANY(...)`, so the expire-vs-confirm guard
/// holds across processes, not just within one.
#[derive(Clone)]
pub struct PgStore {
    pub pool: Pool<Postgres>,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn create_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bookings (id, tenant_id, unit_id, status, payment_status, total_amount, \
             semester, duration_months, payment_reference, hold_expires_at, created_at, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(booking.id)
        .bind(&booking.tenant_id)
        .bind(booking.unit_id)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.total_amount)
        .bind(&booking.semester)
        .bind(booking.duration_months)
        .bind(&booking.payment_reference)
        .bind(booking.hold_expires_at)
        .bind(booking.created_at)
        .bind(&booking.notes)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(Booking::try_from).transpose()
    }

    async fn count_active_for_unit(&self, unit_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings WHERE unit_id = $1 AND status = ANY($2)",
        )
        .bind(unit_id)
        .bind(statuses(&[BookingStatus::OnHold, BookingStatus::Confirmed]))
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(count)
    }

    async fn find_active_for_tenant(
        &self,
        tenant_id: &str,
        unit_id: Uuid,
    ) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE tenant_id = $1 AND unit_id = $2 AND status = ANY($3) LIMIT 1"
        ))
        .bind(tenant_id)
        .bind(unit_id)
        .bind(statuses(&[BookingStatus::OnHold, BookingStatus::Confirmed]))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_holds_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE status = $1 AND hold_expires_at <= $2"
        ))
        .bind(BookingStatus::OnHold.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn list_flagged(&self) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE payment_status = ANY($1) ORDER BY created_at"
        ))
        .bind(vec![
            PaymentStatus::Disputed.as_str().to_string(),
            PaymentStatus::RefundRequired.as_str().to_string(),
        ])
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn transition_booking(
        &self,
        id: Uuid,
        expected: &[BookingStatus],
        to: BookingStatus,
        hold_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Transition, StoreError> {
        let updated: Option<BookingRow> = sqlx::query_as(&format!(
            "UPDATE bookings SET status = $2, hold_expires_at = $3 \
             WHERE id = $1 AND status = ANY($4) RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(hold_expires_at)
        .bind(statuses(expected))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match updated {
            Some(row) => Ok(Transition::Applied(Booking::try_from(row)?)),
            None => {
                let current = self.get_booking(id).await?.ok_or(StoreError::NotFound)?;
                Ok(Transition::NotApplied(current))
            }
        }
    }

    async fn set_payment_status(&self, id: Uuid, status: PaymentStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE bookings SET payment_status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_payment_reference(&self, id: Uuid, reference: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE bookings SET payment_reference = $2 WHERE id = $1")
            .bind(id)
            .bind(reference)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl UnitStore for PgStore {
    async fn upsert_unit(&self, unit: &Unit) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO units (id, room_id, capacity, gender_policy, price_per_bed) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET room_id = $2, capacity = $3, \
             gender_policy = $4, price_per_bed = $5",
        )
        .bind(unit.id)
        .bind(unit.room_id)
        .bind(unit.capacity)
        .bind(unit.gender_policy.as_str())
        .bind(unit.price_per_bed)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get_unit(&self, id: Uuid) -> Result<Option<Unit>, StoreError> {
        let row: Option<UnitRow> = sqlx::query_as(
            "SELECT id, room_id, capacity, gender_policy, price_per_bed \
             FROM units WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(Unit::try_from).transpose()
    }

    async fn list_units(&self) -> Result<Vec<Unit>, StoreError> {
        let rows: Vec<UnitRow> = sqlx::query_as(
            "SELECT id, room_id, capacity, gender_policy, price_per_bed FROM units",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(Unit::try_from).collect()
    }
}
