//! Beneficiary capacity arithmetic.
//!
//! Everything here is pure and works on counts only, so the same checks can drive
//! live UI feedback and the pre-mutation guard in the relationship mutator.
//! A `None` capacity means the plan does not enforce a limit.

use crate::domain::model::{ContractId, PatientId, PlanId};
use crate::utils::error::{EnrollmentError, Result};

/// Rejects negative capacities instead of clamping them.
pub fn validate_capacity(capacity: Option<i64>) -> Result<Option<usize>> {
    match capacity {
        None => Ok(None),
        Some(c) if c < 0 => Err(EnrollmentError::InvalidConfiguration {
            message: format!("beneficiary capacity must be non-negative, got {}", c),
        }),
        Some(c) => usize::try_from(c)
            .map(Some)
            .map_err(|_| EnrollmentError::InvalidConfiguration {
                message: format!("beneficiary capacity {} is out of range", c),
            }),
    }
}

pub fn remaining_slots(capacity: Option<i64>, current_count: usize) -> Result<Option<usize>> {
    Ok(validate_capacity(capacity)?.map(|c| c.saturating_sub(current_count)))
}

pub fn can_add(capacity: Option<i64>, current_count: usize, add_count: i64) -> Result<bool> {
    let capacity = validate_capacity(capacity)?;
    // 移除或零筆新增一律允許
    if add_count <= 0 {
        return Ok(true);
    }
    Ok(match capacity {
        None => true,
        Some(c) => usize::try_from(add_count)
            .ok()
            .and_then(|add| current_count.checked_add(add))
            .is_some_and(|total| total <= c),
    })
}

pub fn capacity_reached(capacity: Option<i64>, current_count: usize) -> Result<bool> {
    Ok(validate_capacity(capacity)?.is_some_and(|c| current_count >= c))
}

/// `can_add` that fails with `CapacityExceeded` carrying the numbers for the message.
pub fn ensure_can_add(capacity: Option<i64>, current_count: usize, add_count: usize) -> Result<()> {
    let requested = i64::try_from(add_count).unwrap_or(i64::MAX);
    if can_add(capacity, current_count, requested)? {
        return Ok(());
    }
    Err(EnrollmentError::CapacityExceeded {
        capacity: validate_capacity(capacity)?.unwrap_or_default(),
        current: current_count,
        requested: add_count,
    })
}

/// Capacity state of one titular, read from the authoritative source for a single operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacitySnapshot {
    pub titular_patient_id: PatientId,
    pub contract_id: ContractId,
    pub plan_id: PlanId,
    pub capacity: Option<i64>,
    pub current_count: usize,
}

impl CapacitySnapshot {
    pub fn remaining(&self) -> Result<Option<usize>> {
        remaining_slots(self.capacity, self.current_count)
    }

    pub fn reached(&self) -> Result<bool> {
        capacity_reached(self.capacity, self.current_count)
    }

    pub fn ensure_room_for(&self, add_count: usize) -> Result<()> {
        ensure_can_add(self.capacity, self.current_count, add_count)
    }
}
