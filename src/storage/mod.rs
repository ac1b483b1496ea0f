//! Storage abstraction for the attendance core.
//!
//! The trait assumes an ordered document/table store with unique-key upsert
//! semantics; engine internals are out of scope. Uniqueness (staff id,
//! person uid, one attendance record per employee/date/kind) is enforced at
//! insert so callers can rely on `Conflict` instead of re-checking.

use std::future::Future;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    AttendanceRecord, Employee, EmployeeId, Facility, FacilityId, RecordKind, Shift, ShiftId,
    SyncFailure,
};

pub mod in_memory;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Keyed reads and writes used by the core components.
pub trait Store: Send + Sync {
    // --- Employees -------------------------------------------------------

    /// Insert a new employee.
    ///
    /// # Errors
    /// `Conflict` if the staff id or person uid is already taken.
    fn insert_employee(&self, employee: Employee) -> impl Future<Output = Result<()>> + Send;

    /// Replace an existing employee row.
    ///
    /// # Errors
    /// `NotFound` if no row with that id exists.
    fn update_employee(&self, employee: Employee) -> impl Future<Output = Result<()>> + Send;

    fn employee_by_id(
        &self,
        id: EmployeeId,
    ) -> impl Future<Output = Result<Option<Employee>>> + Send;

    fn employee_by_staff_id(
        &self,
        staff_id: &str,
    ) -> impl Future<Output = Result<Option<Employee>>> + Send;

    /// Resolve an employee from a device identifier; the event-attribution
    /// lookup.
    fn employee_by_person_uid(
        &self,
        person_uid: &str,
    ) -> impl Future<Output = Result<Option<Employee>>> + Send;

    fn employee_count(&self) -> impl Future<Output = Result<usize>> + Send;

    // --- Facilities and shifts ------------------------------------------

    fn insert_facility(&self, facility: Facility) -> impl Future<Output = Result<()>> + Send;

    fn facility(&self, id: FacilityId) -> impl Future<Output = Result<Option<Facility>>> + Send;

    fn insert_shift(&self, shift: Shift) -> impl Future<Output = Result<()>> + Send;

    fn shift(&self, id: ShiftId) -> impl Future<Output = Result<Option<Shift>>> + Send;

    // --- Attendance records ---------------------------------------------

    /// Insert an attendance record.
    ///
    /// # Errors
    /// `Conflict` if a record for the same (employee, date, kind) exists.
    fn insert_attendance(
        &self,
        record: AttendanceRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// A specific day's record of one kind, if present.
    fn attendance_record(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
        kind: RecordKind,
    ) -> impl Future<Output = Result<Option<AttendanceRecord>>> + Send;

    /// All records for an employee in an inclusive date range.
    fn attendance_in_range(
        &self,
        employee_id: EmployeeId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = Result<Vec<AttendanceRecord>>> + Send;

    // --- Sync failure log ------------------------------------------------

    fn insert_sync_failure(
        &self,
        failure: SyncFailure,
    ) -> impl Future<Output = Result<()>> + Send;

    fn unresolved_sync_failures(&self) -> impl Future<Output = Result<Vec<SyncFailure>>> + Send;

    fn sync_failures_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> impl Future<Output = Result<Vec<SyncFailure>>> + Send;

    /// Replace an existing sync-failure row (resolution, retry counting).
    ///
    /// # Errors
    /// `NotFound` if no row with that id exists.
    fn update_sync_failure(
        &self,
        failure: SyncFailure,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Fetch a single sync-failure row.
    fn sync_failure(&self, id: Uuid)
        -> impl Future<Output = Result<Option<SyncFailure>>> + Send;
}
