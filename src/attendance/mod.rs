//! Attendance event processing.
//!
//! Turns validated device events into attendance records through a
//! per-(employee, day) state machine:
//!
//! ```text
//! NoRecord -> CheckedIn -> CheckedOut   (terminal for that day)
//! ```
//!
//! State is derived from the records already committed for the day, so the
//! machine survives restarts for free. Transitions for one key are
//! serialized through a lock table; different keys process fully in
//! parallel. Within one key events apply in arrival order — an event that
//! would require resequencing is rejected, never silently reordered.
//!
//! Delivery is assumed at-least-once: redelivery of an event whose device
//! record id matches the already-committed record is acknowledged without
//! writing a second row.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{DeviceEvent, DiscardReason, ParsedEvent, RawDeviceEvent};
use crate::storage::Store;
use crate::types::{
    AttendanceRecord, AttendanceStatus, Employee, EmployeeId, RecordKind, Shift,
};

/// Outcome of processing one event.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A new attendance record was committed.
    Recorded(AttendanceRecord),
    /// Redelivery of an already-applied event; nothing written.
    AlreadyApplied { record_id: Uuid },
    /// Well-formed event that produces no record (failed verification,
    /// stranger, unverified).
    Discarded(DiscardReason),
}

/// Processes webhook events into attendance records.
pub struct EventProcessor<S>
where
    S: Store,
{
    store: Arc<S>,
    day_locks: DashMap<(EmployeeId, NaiveDate), Arc<Mutex<()>>>,
}

impl<S> EventProcessor<S>
where
    S: Store,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            day_locks: DashMap::new(),
        }
    }

    /// Parse a raw webhook payload and process it.
    pub async fn process_raw(&self, raw: RawDeviceEvent) -> Result<Outcome> {
        match DeviceEvent::parse(raw)? {
            ParsedEvent::Event(event) => self.process(event).await,
            ParsedEvent::Discard(reason) => {
                tracing::debug!(?reason, "Event discarded at the boundary");
                Ok(Outcome::Discarded(reason))
            }
        }
    }

    /// Apply one validated event to the day state machine.
    ///
    /// # Errors
    /// `UnknownDeviceIdentifier` when the person uid resolves to no
    /// employee; `DuplicateEvent` / `OutOfOrderEvent` for transitions the
    /// machine forbids. Failures are scoped to this event and leave
    /// existing records untouched.
    #[tracing::instrument(skip(self, event), fields(person_uid = %event.person_uid, kind = %event.kind))]
    pub async fn process(&self, event: DeviceEvent) -> Result<Outcome> {
        let employee = match self
            .store
            .employee_by_person_uid(&event.person_uid)
            .await?
        {
            Some(employee) => employee,
            None => {
                tracing::warn!(
                    person_uid = %event.person_uid,
                    device_key = %event.device_key,
                    "Attendance event for unknown device identifier"
                );
                return Err(Error::UnknownDeviceIdentifier(event.person_uid));
            }
        };

        let shift = self
            .store
            .shift(employee.shift_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource: "shift",
                id: employee.shift_id.to_string(),
            })?;

        let date = event.occurred_at.date_naive();
        let lock = self.lock_for(employee.id, date);
        let _guard = lock.lock_owned().await;

        let check_in = self
            .store
            .attendance_record(employee.id, date, RecordKind::CheckIn)
            .await?;
        let check_out = self
            .store
            .attendance_record(employee.id, date, RecordKind::CheckOut)
            .await?;

        match event.kind {
            RecordKind::CheckIn => match check_in {
                None if check_out.is_none() => self.apply_check_in(&employee, &shift, event, date).await,
                None => {
                    // A lone check-out can only come from backfill; a fresh
                    // check-in behind it would resequence the day.
                    Err(Error::OutOfOrderEvent {
                        employee_id: employee.id,
                        date,
                        kind: RecordKind::CheckIn,
                    })
                }
                Some(existing) => {
                    if redelivery(&existing, &event) {
                        tracing::debug!(record_id = %existing.id, "Check-in redelivery acknowledged");
                        Ok(Outcome::AlreadyApplied {
                            record_id: existing.id,
                        })
                    } else {
                        Err(Error::DuplicateEvent {
                            employee_id: employee.id,
                            date,
                            kind: RecordKind::CheckIn,
                        })
                    }
                }
            },
            RecordKind::CheckOut => match (check_in, check_out) {
                (Some(opening), None) => {
                    self.apply_check_out(&employee, &shift, &opening, event, date)
                        .await
                }
                (_, Some(existing)) => {
                    if redelivery(&existing, &event) {
                        tracing::debug!(record_id = %existing.id, "Check-out redelivery acknowledged");
                        Ok(Outcome::AlreadyApplied {
                            record_id: existing.id,
                        })
                    } else {
                        Err(Error::OutOfOrderEvent {
                            employee_id: employee.id,
                            date,
                            kind: RecordKind::CheckOut,
                        })
                    }
                }
                (None, None) => {
                    // No implicit check-in is synthesized; the event is
                    // rejected and logged for follow-up.
                    tracing::warn!(
                        staff_id = %employee.staff_id,
                        %date,
                        "Check-out without a prior check-in rejected"
                    );
                    Err(Error::OutOfOrderEvent {
                        employee_id: employee.id,
                        date,
                        kind: RecordKind::CheckOut,
                    })
                }
            },
        }
    }

    async fn apply_check_in(
        &self,
        employee: &Employee,
        shift: &Shift,
        event: DeviceEvent,
        date: NaiveDate,
    ) -> Result<Outcome> {
        let deadline =
            date.and_time(shift.scheduled_check_in).and_utc() + Duration::minutes(shift.grace_minutes);
        let late_minutes = minutes_past(deadline, event.occurred_at);
        let status = if late_minutes > 0 {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::Present
        };

        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            employee_id: employee.id,
            date,
            kind: RecordKind::CheckIn,
            timestamp: event.occurred_at,
            status,
            late_minutes,
            work_hours: 0.0,
            overtime_hours: 0.0,
            source_record_id: event.record_id,
        };
        self.store.insert_attendance(record.clone()).await?;

        match status {
            AttendanceStatus::Late => tracing::info!(
                staff_id = %employee.staff_id,
                late_minutes,
                "Late check-in recorded"
            ),
            _ => tracing::info!(staff_id = %employee.staff_id, "Check-in recorded"),
        }

        Ok(Outcome::Recorded(record))
    }

    async fn apply_check_out(
        &self,
        employee: &Employee,
        shift: &Shift,
        opening: &AttendanceRecord,
        event: DeviceEvent,
        date: NaiveDate,
    ) -> Result<Outcome> {
        let worked_seconds = (event.occurred_at - opening.timestamp).num_seconds().max(0);
        let work_hours = round2(worked_seconds as f64 / 3600.0);
        let overtime_hours = round2((work_hours - shift.standard_hours).max(0.0));

        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            employee_id: employee.id,
            date,
            kind: RecordKind::CheckOut,
            timestamp: event.occurred_at,
            status: AttendanceStatus::Present,
            late_minutes: 0,
            work_hours,
            overtime_hours,
            source_record_id: event.record_id,
        };
        self.store.insert_attendance(record.clone()).await?;

        tracing::info!(
            staff_id = %employee.staff_id,
            work_hours,
            overtime_hours,
            "Check-out recorded"
        );

        Ok(Outcome::Recorded(record))
    }

    fn lock_for(&self, employee_id: EmployeeId, date: NaiveDate) -> Arc<Mutex<()>> {
        self.day_locks
            .entry((employee_id, date))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Whether an incoming event is a redelivery of the one that produced
/// `existing`. Only decidable when both carry a device record id.
fn redelivery(existing: &AttendanceRecord, event: &DeviceEvent) -> bool {
    match (&existing.source_record_id, &event.record_id) {
        (Some(stored), Some(incoming)) => stored == incoming,
        _ => false,
    }
}

/// Whole minutes past `deadline`, rounding partial minutes up so that any
/// arrival strictly after the deadline counts as at least one minute late.
fn minutes_past(deadline: chrono::DateTime<chrono::Utc>, at: chrono::DateTime<chrono::Utc>) -> i64 {
    let seconds = (at - deadline).num_seconds();
    if seconds <= 0 {
        0
    } else {
        (seconds + 59) / 60
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
