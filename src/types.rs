//! Core domain types for the attendance system.
//!
//! Employees, facilities, shifts, attendance records, and sync-failure log
//! entries. These are plain data carriers; behavior lives in the component
//! modules.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an employee row.
pub type EmployeeId = Uuid;

/// Unique identifier for a facility.
pub type FacilityId = Uuid;

/// Unique identifier for a shift definition.
pub type ShiftId = Uuid;

/// Stable key correlating an employee with its biometric enrollment on the
/// physical terminal. Unique within a facility.
///
/// The terminal only accepts alphanumeric identifiers, so generated values
/// are the staff id plus a random uppercase suffix (e.g. `PHC00001A7X2M`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonUid(String);

impl PersonUid {
    /// Wrap a caller-supplied identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate an identifier from a staff id. The staff id is already
    /// unique; the random suffix guards against edge-case collisions when
    /// an employee is re-enrolled.
    pub fn generate(staff_id: &str) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(|b| (b as char).to_ascii_uppercase())
            .collect();
        Self(format!("{staff_id}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PersonUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection details for a facility's biometric terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    /// Base URL of the device gateway (e.g. "http://localhost:8081").
    pub base_url: String,
    /// Device key identifying the terminal at the gateway.
    pub device_key: String,
    /// Shared secret for the gateway.
    pub secret: String,
}

/// A physical facility with (optionally) a configured terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Facility {
    pub id: FacilityId,
    pub name: String,
    /// `None` means the facility has no biometric integration; strict
    /// registration against it is a validation error.
    pub device: Option<DeviceEndpoint>,
}

/// A work schedule. Read-only input to attendance processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shift {
    pub id: ShiftId,
    pub name: String,
    /// Scheduled start of the working day, local wall-clock.
    pub scheduled_check_in: NaiveTime,
    /// Scheduled end of the working day, local wall-clock.
    pub scheduled_check_out: NaiveTime,
    /// Tolerance after `scheduled_check_in` before an arrival is late.
    pub grace_minutes: i64,
    /// Expected hours of work per day; the overtime baseline.
    pub standard_hours: f64,
}

/// An employee enrolled (or being enrolled) in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    /// Human-facing unique id (e.g. "PHC00001").
    pub staff_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub department: String,
    pub birth_date: Option<NaiveDate>,
    pub nationality: Option<String>,
    pub national_id: Option<String>,
    pub facility_id: FacilityId,
    pub shift_id: ShiftId,
    /// Identifier of this employee on the facility's terminal.
    pub person_uid: PersonUid,
    /// Whether the terminal has acknowledged the enrollment. `false` only
    /// ever coexists with a sync-failure log entry (or an in-flight
    /// decoupled sync attempt).
    pub device_synced: bool,
    /// Argon2 hash of the self-service PIN. The raw PIN is never stored.
    pub credential_hash: String,
    /// Template captured at enrollment, kept so background re-sync can
    /// re-enroll without a fresh capture.
    pub biometric_template: BiometricTemplate,
    pub created_at: DateTime<Utc>,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Input to a registration attempt; everything an Employee has except the
/// fields the coordinator derives (uid, credential, sync state).
#[derive(Debug, Clone)]
pub struct EmployeeDraft {
    pub staff_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub department: String,
    pub birth_date: Option<NaiveDate>,
    pub nationality: Option<String>,
    pub national_id: Option<String>,
    pub facility_id: FacilityId,
    pub shift_id: ShiftId,
    /// Caller-supplied device identifier. Generated when absent.
    pub person_uid: Option<PersonUid>,
}

/// An opaque biometric template captured by the enrollment UI, already
/// encoded for the terminal (base64). Recognition quality is the device's
/// problem, not ours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BiometricTemplate(pub String);

impl BiometricTemplate {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Whether an attendance record marks the start or end of a working day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    CheckIn,
    CheckOut,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::CheckIn => f.write_str("check-in"),
            RecordKind::CheckOut => f.write_str("check-out"),
        }
    }
}

/// Attendance classification for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    /// Only ever written by administrative backfill, never by the event
    /// processor.
    Absent,
}

/// One attendance record: exactly one exists per (employee, date, kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub kind: RecordKind,
    pub timestamp: DateTime<Utc>,
    pub status: AttendanceStatus,
    /// Minutes past the grace deadline. Non-zero exactly when `status` is
    /// `Late`.
    pub late_minutes: i64,
    /// Hours between check-in and check-out, 2 decimals. Zero on check-in
    /// records.
    pub work_hours: f64,
    /// Hours worked beyond the shift's standard hours, 2 decimals.
    pub overtime_hours: f64,
    /// The device's own record id, when it sent one. Used to recognize
    /// at-least-once redelivery.
    pub source_record_id: Option<String>,
}

/// What went wrong in a background device sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFailureKind {
    /// The terminal could not be reached.
    DeviceUnreachable,
    /// The terminal refused the enrollment.
    DeviceRejected,
}

/// Durable record of a device sync attempt that did not succeed, pending
/// resolution. Written only by the decoupled registration path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFailure {
    pub id: Uuid,
    pub employee_id: EmployeeId,
    pub staff_id: String,
    pub kind: SyncFailureKind,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl SyncFailure {
    /// New unresolved entry for an employee whose device sync failed.
    pub fn new(employee: &Employee, kind: SyncFailureKind, error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            employee_id: employee.id,
            staff_id: employee.staff_id.clone(),
            kind,
            error: error.into(),
            timestamp: Utc::now(),
            resolved: false,
            resolved_at: None,
            retry_count: 0,
        }
    }
}
