//! PostgreSQL store implementation.
//!
//! Production backend over a connection pool. Uniqueness is enforced by the
//! schema (unique staff id, person uid, and one record per
//! employee/date/kind); constraint violations surface as `Conflict` so
//! callers see the same semantics as the in-memory store.
//!
//! Queries are runtime-checked (`sqlx::query` + manual row mapping) so the
//! crate builds without a live database.

use chrono::NaiveDate;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    AttendanceRecord, AttendanceStatus, BiometricTemplate, DeviceEndpoint, Employee, EmployeeId,
    Facility, FacilityId, PersonUid, RecordKind, Shift, ShiftId, SyncFailure, SyncFailureKind,
};

use super::Store;

/// PostgreSQL implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("migration failed: {e}")))
    }
}

/// Map a unique-constraint violation to `Conflict`, everything else to
/// `Database`.
fn insert_error(e: sqlx::Error, resource: &'static str, id: String) -> Error {
    if let Some(db_error) = e.as_database_error() {
        if db_error.code().as_deref() == Some("23505") {
            return Error::Conflict { resource, id };
        }
    }
    Error::Database(e)
}

fn kind_to_str(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::CheckIn => "check-in",
        RecordKind::CheckOut => "check-out",
    }
}

fn kind_from_str(value: &str) -> Result<RecordKind> {
    match value {
        "check-in" => Ok(RecordKind::CheckIn),
        "check-out" => Ok(RecordKind::CheckOut),
        other => Err(Error::Other(anyhow::anyhow!("unknown record kind {other}"))),
    }
}

fn status_to_str(status: AttendanceStatus) -> &'static str {
    match status {
        AttendanceStatus::Present => "present",
        AttendanceStatus::Late => "late",
        AttendanceStatus::Absent => "absent",
    }
}

fn status_from_str(value: &str) -> Result<AttendanceStatus> {
    match value {
        "present" => Ok(AttendanceStatus::Present),
        "late" => Ok(AttendanceStatus::Late),
        "absent" => Ok(AttendanceStatus::Absent),
        other => Err(Error::Other(anyhow::anyhow!("unknown status {other}"))),
    }
}

fn sync_kind_to_str(kind: SyncFailureKind) -> &'static str {
    match kind {
        SyncFailureKind::DeviceUnreachable => "device_unreachable",
        SyncFailureKind::DeviceRejected => "device_rejected",
    }
}

fn sync_kind_from_str(value: &str) -> Result<SyncFailureKind> {
    match value {
        "device_unreachable" => Ok(SyncFailureKind::DeviceUnreachable),
        "device_rejected" => Ok(SyncFailureKind::DeviceRejected),
        other => Err(Error::Other(anyhow::anyhow!(
            "unknown sync failure kind {other}"
        ))),
    }
}

fn employee_from_row(row: &sqlx::postgres::PgRow) -> Result<Employee> {
    Ok(Employee {
        id: row.try_get("id")?,
        staff_id: row.try_get("staff_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        department: row.try_get("department")?,
        birth_date: row.try_get("birth_date")?,
        nationality: row.try_get("nationality")?,
        national_id: row.try_get("national_id")?,
        facility_id: row.try_get("facility_id")?,
        shift_id: row.try_get("shift_id")?,
        person_uid: PersonUid::new(row.try_get::<String, _>("person_uid")?),
        device_synced: row.try_get("device_synced")?,
        credential_hash: row.try_get("credential_hash")?,
        biometric_template: BiometricTemplate(row.try_get::<String, _>("biometric_template")?),
        created_at: row.try_get("created_at")?,
    })
}

fn attendance_from_row(row: &sqlx::postgres::PgRow) -> Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.try_get("id")?,
        employee_id: row.try_get("employee_id")?,
        date: row.try_get("date")?,
        kind: kind_from_str(&row.try_get::<String, _>("kind")?)?,
        timestamp: row.try_get("timestamp")?,
        status: status_from_str(&row.try_get::<String, _>("status")?)?,
        late_minutes: row.try_get("late_minutes")?,
        work_hours: row.try_get("work_hours")?,
        overtime_hours: row.try_get("overtime_hours")?,
        source_record_id: row.try_get("source_record_id")?,
    })
}

fn sync_failure_from_row(row: &sqlx::postgres::PgRow) -> Result<SyncFailure> {
    Ok(SyncFailure {
        id: row.try_get("id")?,
        employee_id: row.try_get("employee_id")?,
        staff_id: row.try_get("staff_id")?,
        kind: sync_kind_from_str(&row.try_get::<String, _>("kind")?)?,
        error: row.try_get("error")?,
        timestamp: row.try_get("timestamp")?,
        resolved: row.try_get("resolved")?,
        resolved_at: row.try_get("resolved_at")?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
    })
}

const EMPLOYEE_COLUMNS: &str = "id, staff_id, first_name, last_name, email, department, \
     birth_date, nationality, national_id, facility_id, shift_id, person_uid, device_synced, \
     credential_hash, biometric_template, created_at";

impl Store for PostgresStore {
    async fn insert_employee(&self, employee: Employee) -> Result<()> {
        let staff_id = employee.staff_id.clone();
        sqlx::query(
            "INSERT INTO employees (id, staff_id, first_name, last_name, email, department, \
             birth_date, nationality, national_id, facility_id, shift_id, person_uid, \
             device_synced, credential_hash, biometric_template, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(employee.id)
        .bind(&employee.staff_id)
        .bind(&employee.first_name)
        .bind(&employee.last_name)
        .bind(&employee.email)
        .bind(&employee.department)
        .bind(employee.birth_date)
        .bind(&employee.nationality)
        .bind(&employee.national_id)
        .bind(employee.facility_id)
        .bind(employee.shift_id)
        .bind(employee.person_uid.as_str())
        .bind(employee.device_synced)
        .bind(&employee.credential_hash)
        .bind(&employee.biometric_template.0)
        .bind(employee.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "employee", staff_id))?;
        Ok(())
    }

    async fn update_employee(&self, employee: Employee) -> Result<()> {
        let result = sqlx::query(
            "UPDATE employees SET staff_id = $2, first_name = $3, last_name = $4, email = $5, \
             department = $6, birth_date = $7, nationality = $8, national_id = $9, \
             facility_id = $10, shift_id = $11, person_uid = $12, device_synced = $13, \
             credential_hash = $14, biometric_template = $15 WHERE id = $1",
        )
        .bind(employee.id)
        .bind(&employee.staff_id)
        .bind(&employee.first_name)
        .bind(&employee.last_name)
        .bind(&employee.email)
        .bind(&employee.department)
        .bind(employee.birth_date)
        .bind(&employee.nationality)
        .bind(&employee.national_id)
        .bind(employee.facility_id)
        .bind(employee.shift_id)
        .bind(employee.person_uid.as_str())
        .bind(employee.device_synced)
        .bind(&employee.credential_hash)
        .bind(&employee.biometric_template.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                resource: "employee",
                id: employee.id.to_string(),
            });
        }
        Ok(())
    }

    async fn employee_by_id(&self, id: EmployeeId) -> Result<Option<Employee>> {
        let row = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(employee_from_row).transpose()
    }

    async fn employee_by_staff_id(&self, staff_id: &str) -> Result<Option<Employee>> {
        let row = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE staff_id = $1"
        ))
        .bind(staff_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(employee_from_row).transpose()
    }

    async fn employee_by_person_uid(&self, person_uid: &str) -> Result<Option<Employee>> {
        let row = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE person_uid = $1"
        ))
        .bind(person_uid)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(employee_from_row).transpose()
    }

    async fn employee_count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM employees")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("count")? as usize)
    }

    async fn insert_facility(&self, facility: Facility) -> Result<()> {
        let id = facility.id.to_string();
        let (base_url, device_key, secret) = match &facility.device {
            Some(device) => (
                Some(device.base_url.clone()),
                Some(device.device_key.clone()),
                Some(device.secret.clone()),
            ),
            None => (None, None, None),
        };
        sqlx::query(
            "INSERT INTO facilities (id, name, device_base_url, device_key, device_secret) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(facility.id)
        .bind(&facility.name)
        .bind(base_url)
        .bind(device_key)
        .bind(secret)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "facility", id))?;
        Ok(())
    }

    async fn facility(&self, id: FacilityId) -> Result<Option<Facility>> {
        let row = sqlx::query(
            "SELECT id, name, device_base_url, device_key, device_secret \
             FROM facilities WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let base_url: Option<String> = row.try_get("device_base_url")?;
            let device_key: Option<String> = row.try_get("device_key")?;
            let secret: Option<String> = row.try_get("device_secret")?;
            let device = match (base_url, device_key, secret) {
                (Some(base_url), Some(device_key), Some(secret)) => Some(DeviceEndpoint {
                    base_url,
                    device_key,
                    secret,
                }),
                _ => None,
            };
            Ok(Facility {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                device,
            })
        })
        .transpose()
    }

    async fn insert_shift(&self, shift: Shift) -> Result<()> {
        let id = shift.id.to_string();
        sqlx::query(
            "INSERT INTO shifts (id, name, scheduled_check_in, scheduled_check_out, \
             grace_minutes, standard_hours) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(shift.id)
        .bind(&shift.name)
        .bind(shift.scheduled_check_in)
        .bind(shift.scheduled_check_out)
        .bind(shift.grace_minutes)
        .bind(shift.standard_hours)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "shift", id))?;
        Ok(())
    }

    async fn shift(&self, id: ShiftId) -> Result<Option<Shift>> {
        let row = sqlx::query(
            "SELECT id, name, scheduled_check_in, scheduled_check_out, grace_minutes, \
             standard_hours FROM shifts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Shift {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                scheduled_check_in: row.try_get("scheduled_check_in")?,
                scheduled_check_out: row.try_get("scheduled_check_out")?,
                grace_minutes: row.try_get("grace_minutes")?,
                standard_hours: row.try_get("standard_hours")?,
            })
        })
        .transpose()
    }

    async fn insert_attendance(&self, record: AttendanceRecord) -> Result<()> {
        let conflict_id = format!("{}/{}/{}", record.employee_id, record.date, record.kind);
        sqlx::query(
            "INSERT INTO attendance_records (id, employee_id, date, kind, timestamp, status, \
             late_minutes, work_hours, overtime_hours, source_record_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(record.id)
        .bind(record.employee_id)
        .bind(record.date)
        .bind(kind_to_str(record.kind))
        .bind(record.timestamp)
        .bind(status_to_str(record.status))
        .bind(record.late_minutes)
        .bind(record.work_hours)
        .bind(record.overtime_hours)
        .bind(&record.source_record_id)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "attendance record", conflict_id))?;
        Ok(())
    }

    async fn attendance_record(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
        kind: RecordKind,
    ) -> Result<Option<AttendanceRecord>> {
        let row = sqlx::query(
            "SELECT id, employee_id, date, kind, timestamp, status, late_minutes, work_hours, \
             overtime_hours, source_record_id FROM attendance_records \
             WHERE employee_id = $1 AND date = $2 AND kind = $3",
        )
        .bind(employee_id)
        .bind(date)
        .bind(kind_to_str(kind))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(attendance_from_row).transpose()
    }

    async fn attendance_in_range(
        &self,
        employee_id: EmployeeId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>> {
        let rows = sqlx::query(
            "SELECT id, employee_id, date, kind, timestamp, status, late_minutes, work_hours, \
             overtime_hours, source_record_id FROM attendance_records \
             WHERE employee_id = $1 AND date >= $2 AND date <= $3 \
             ORDER BY date, timestamp",
        )
        .bind(employee_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attendance_from_row).collect()
    }

    async fn insert_sync_failure(&self, failure: SyncFailure) -> Result<()> {
        let id = failure.id.to_string();
        sqlx::query(
            "INSERT INTO sync_failures (id, employee_id, staff_id, kind, error, timestamp, \
             resolved, resolved_at, retry_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(failure.id)
        .bind(failure.employee_id)
        .bind(&failure.staff_id)
        .bind(sync_kind_to_str(failure.kind))
        .bind(&failure.error)
        .bind(failure.timestamp)
        .bind(failure.resolved)
        .bind(failure.resolved_at)
        .bind(failure.retry_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "sync failure", id))?;
        Ok(())
    }

    async fn unresolved_sync_failures(&self) -> Result<Vec<SyncFailure>> {
        let rows = sqlx::query(
            "SELECT id, employee_id, staff_id, kind, error, timestamp, resolved, resolved_at, \
             retry_count FROM sync_failures WHERE resolved = FALSE ORDER BY timestamp",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sync_failure_from_row).collect()
    }

    async fn sync_failures_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Vec<SyncFailure>> {
        let rows = sqlx::query(
            "SELECT id, employee_id, staff_id, kind, error, timestamp, resolved, resolved_at, \
             retry_count FROM sync_failures WHERE employee_id = $1 ORDER BY timestamp",
        )
        .bind(employee_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sync_failure_from_row).collect()
    }

    async fn update_sync_failure(&self, failure: SyncFailure) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sync_failures SET error = $2, resolved = $3, resolved_at = $4, \
             retry_count = $5 WHERE id = $1",
        )
        .bind(failure.id)
        .bind(&failure.error)
        .bind(failure.resolved)
        .bind(failure.resolved_at)
        .bind(failure.retry_count as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                resource: "sync failure",
                id: failure.id.to_string(),
            });
        }
        Ok(())
    }

    async fn sync_failure(&self, id: Uuid) -> Result<Option<SyncFailure>> {
        let row = sqlx::query(
            "SELECT id, employee_id, staff_id, kind, error, timestamp, resolved, resolved_at, \
             retry_count FROM sync_failures WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(sync_failure_from_row).transpose()
    }
}
