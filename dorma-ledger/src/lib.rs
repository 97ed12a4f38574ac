use dashmap::DashMap;
use dorma_domain::AvailabilitySnapshot;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct SlotCounters {
    occupied: i32,
    capacity: i32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    /// No free slot at reservation time.
    #[error("unit is fully occupied")]
    Conflict,

    #[error("unit not registered: {0}")]
    UnknownUnit(Uuid),
}

/// Proof of a successful slot increment. Consumed either by payment
/// confirmation (the slot stays occupied) or by an explicit release.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct ReservationToken {
    pub unit_id: Uuid,
}

/// Authoritative occupied/capacity counters, one entry per unit.
///
/// All mutations on the same unit go through the map's per-key guard, so
/// they are linearized: two concurrent `try_reserve` calls for the last
/// free slot never both succeed. Different units proceed in parallel.
/// Nothing but counter math happens under the guard.
pub struct AvailabilityLedger {
    units: DashMap<Uuid, SlotCounters>,
}

impl AvailabilityLedger {
    pub fn new() -> Self {
        Self {
            units: DashMap::new(),
        }
    }

    /// Seed or refresh a unit's counters, e.g. on startup recovery.
    pub fn register(&self, unit_id: Uuid, capacity: i32, occupied: i32) {
        self.units.insert(
            unit_id,
            SlotCounters {
                occupied: occupied.clamp(0, capacity),
                capacity,
            },
        );
    }

    /// Seed a unit only if it has no ledger entry yet. A live counter is
    /// never overwritten; units stored after startup get registered
    /// through this on their first booking attempt.
    pub fn register_if_absent(&self, unit_id: Uuid, capacity: i32, occupied: i32) {
        self.units.entry(unit_id).or_insert(SlotCounters {
            occupied: occupied.clamp(0, capacity),
            capacity,
        });
    }

    /// Atomically claim one slot if `occupied < capacity`.
    pub fn try_reserve(&self, unit_id: Uuid) -> Result<ReservationToken, LedgerError> {
        let mut entry = self
            .units
            .get_mut(&unit_id)
            .ok_or(LedgerError::UnknownUnit(unit_id))?;

        if entry.occupied < entry.capacity {
            entry.occupied += 1;
            Ok(ReservationToken { unit_id })
        } else {
            Err(LedgerError::Conflict)
        }
    }

    /// Atomically free one slot, never dropping below zero. Returns
    /// `Ok(false)` when the unit was already empty: double releases can
    /// race between expiry and cancellation and are benign.
    pub fn release(&self, unit_id: Uuid) -> Result<bool, LedgerError> {
        let mut entry = self
            .units
            .get_mut(&unit_id)
            .ok_or(LedgerError::UnknownUnit(unit_id))?;

        if entry.occupied == 0 {
            tracing::warn!(%unit_id, "release on empty unit ignored");
            return Ok(false);
        }
        entry.occupied -= 1;
        Ok(true)
    }

    pub fn snapshot(&self, unit_id: Uuid) -> Option<AvailabilitySnapshot> {
        self.units.get(&unit_id).map(|c| AvailabilitySnapshot {
            unit_id,
            occupied: c.occupied,
            capacity: c.capacity,
            available: c.occupied < c.capacity,
        })
    }
}

impl Default for AvailabilityLedger {
    fn default() -> Self {
        Self::new()
    }
}
