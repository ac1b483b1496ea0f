//! In-memory store implementation.
//!
//! All rows live in concurrent maps guarded by a read-write lock. Suitable
//! for tests and single-process deployments; rows are lost on restart.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    AttendanceRecord, Employee, EmployeeId, Facility, FacilityId, RecordKind, Shift, ShiftId,
    SyncFailure,
};

use super::Store;

#[derive(Default)]
struct Tables {
    employees: HashMap<EmployeeId, Employee>,
    employees_by_staff_id: HashMap<String, EmployeeId>,
    employees_by_person_uid: HashMap<String, EmployeeId>,
    facilities: HashMap<FacilityId, Facility>,
    shifts: HashMap<ShiftId, Shift>,
    attendance: HashMap<Uuid, AttendanceRecord>,
    attendance_by_day: HashMap<(EmployeeId, NaiveDate, RecordKind), Uuid>,
    sync_failures: HashMap<Uuid, SyncFailure>,
}

/// In-memory implementation of the [`Store`] trait.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    async fn insert_employee(&self, employee: Employee) -> Result<()> {
        let mut tables = self.tables.write();

        if tables.employees.contains_key(&employee.id) {
            return Err(Error::Conflict {
                resource: "employee",
                id: employee.id.to_string(),
            });
        }
        if tables.employees_by_staff_id.contains_key(&employee.staff_id) {
            return Err(Error::Conflict {
                resource: "employee",
                id: employee.staff_id.clone(),
            });
        }
        let uid = employee.person_uid.as_str().to_string();
        if tables.employees_by_person_uid.contains_key(&uid) {
            return Err(Error::Conflict {
                resource: "employee",
                id: uid,
            });
        }

        tables
            .employees_by_staff_id
            .insert(employee.staff_id.clone(), employee.id);
        tables.employees_by_person_uid.insert(uid, employee.id);
        tables.employees.insert(employee.id, employee);
        Ok(())
    }

    async fn update_employee(&self, employee: Employee) -> Result<()> {
        let mut tables = self.tables.write();

        let previous = match tables.employees.get(&employee.id) {
            Some(existing) => existing.clone(),
            None => {
                return Err(Error::NotFound {
                    resource: "employee",
                    id: employee.id.to_string(),
                })
            }
        };

        // Keep the unique indexes in step with the row.
        if previous.staff_id != employee.staff_id {
            tables.employees_by_staff_id.remove(&previous.staff_id);
            tables
                .employees_by_staff_id
                .insert(employee.staff_id.clone(), employee.id);
        }
        if previous.person_uid != employee.person_uid {
            tables
                .employees_by_person_uid
                .remove(previous.person_uid.as_str());
            tables
                .employees_by_person_uid
                .insert(employee.person_uid.as_str().to_string(), employee.id);
        }

        tables.employees.insert(employee.id, employee);
        Ok(())
    }

    async fn employee_by_id(&self, id: EmployeeId) -> Result<Option<Employee>> {
        Ok(self.tables.read().employees.get(&id).cloned())
    }

    async fn employee_by_staff_id(&self, staff_id: &str) -> Result<Option<Employee>> {
        let tables = self.tables.read();
        Ok(tables
            .employees_by_staff_id
            .get(staff_id)
            .and_then(|id| tables.employees.get(id))
            .cloned())
    }

    async fn employee_by_person_uid(&self, person_uid: &str) -> Result<Option<Employee>> {
        let tables = self.tables.read();
        Ok(tables
            .employees_by_person_uid
            .get(person_uid)
            .and_then(|id| tables.employees.get(id))
            .cloned())
    }

    async fn employee_count(&self) -> Result<usize> {
        Ok(self.tables.read().employees.len())
    }

    async fn insert_facility(&self, facility: Facility) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.facilities.contains_key(&facility.id) {
            return Err(Error::Conflict {
                resource: "facility",
                id: facility.id.to_string(),
            });
        }
        tables.facilities.insert(facility.id, facility);
        Ok(())
    }

    async fn facility(&self, id: FacilityId) -> Result<Option<Facility>> {
        Ok(self.tables.read().facilities.get(&id).cloned())
    }

    async fn insert_shift(&self, shift: Shift) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.shifts.contains_key(&shift.id) {
            return Err(Error::Conflict {
                resource: "shift",
                id: shift.id.to_string(),
            });
        }
        tables.shifts.insert(shift.id, shift);
        Ok(())
    }

    async fn shift(&self, id: ShiftId) -> Result<Option<Shift>> {
        Ok(self.tables.read().shifts.get(&id).cloned())
    }

    async fn insert_attendance(&self, record: AttendanceRecord) -> Result<()> {
        let mut tables = self.tables.write();

        let day_key = (record.employee_id, record.date, record.kind);
        if tables.attendance_by_day.contains_key(&day_key) {
            return Err(Error::Conflict {
                resource: "attendance record",
                id: format!("{}/{}/{}", record.employee_id, record.date, record.kind),
            });
        }

        tables.attendance_by_day.insert(day_key, record.id);
        tables.attendance.insert(record.id, record);
        Ok(())
    }

    async fn attendance_record(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
        kind: RecordKind,
    ) -> Result<Option<AttendanceRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .attendance_by_day
            .get(&(employee_id, date, kind))
            .and_then(|id| tables.attendance.get(id))
            .cloned())
    }

    async fn attendance_in_range(
        &self,
        employee_id: EmployeeId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>> {
        let tables = self.tables.read();
        let mut records: Vec<AttendanceRecord> = tables
            .attendance
            .values()
            .filter(|r| r.employee_id == employee_id && r.date >= start && r.date <= end)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.date, r.timestamp));
        Ok(records)
    }

    async fn insert_sync_failure(&self, failure: SyncFailure) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.sync_failures.contains_key(&failure.id) {
            return Err(Error::Conflict {
                resource: "sync failure",
                id: failure.id.to_string(),
            });
        }
        tables.sync_failures.insert(failure.id, failure);
        Ok(())
    }

    async fn unresolved_sync_failures(&self) -> Result<Vec<SyncFailure>> {
        let tables = self.tables.read();
        let mut failures: Vec<SyncFailure> = tables
            .sync_failures
            .values()
            .filter(|f| !f.resolved)
            .cloned()
            .collect();
        failures.sort_by_key(|f| f.timestamp);
        Ok(failures)
    }

    async fn sync_failures_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Vec<SyncFailure>> {
        let tables = self.tables.read();
        let mut failures: Vec<SyncFailure> = tables
            .sync_failures
            .values()
            .filter(|f| f.employee_id == employee_id)
            .cloned()
            .collect();
        failures.sort_by_key(|f| f.timestamp);
        Ok(failures)
    }

    async fn update_sync_failure(&self, failure: SyncFailure) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.sync_failures.contains_key(&failure.id) {
            return Err(Error::NotFound {
                resource: "sync failure",
                id: failure.id.to_string(),
            });
        }
        tables.sync_failures.insert(failure.id, failure);
        Ok(())
    }

    async fn sync_failure(&self, id: Uuid) -> Result<Option<SyncFailure>> {
        Ok(self.tables.read().sync_failures.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttendanceStatus, PersonUid};
    use chrono::Utc;

    fn sample_employee(staff_id: &str) -> Employee {
        Employee {
            id: Uuid::new_v4(),
            staff_id: staff_id.to_string(),
            first_name: "Amina".to_string(),
            last_name: "Bello".to_string(),
            email: None,
            department: "Nursing".to_string(),
            birth_date: None,
            nationality: None,
            national_id: None,
            facility_id: Uuid::new_v4(),
            shift_id: Uuid::new_v4(),
            person_uid: PersonUid::generate(staff_id),
            device_synced: true,
            credential_hash: "$argon2id$stub".to_string(),
            biometric_template: crate::types::BiometricTemplate("dGVtcGxhdGU=".to_string()),
            created_at: Utc::now(),
        }
    }

    fn sample_record(employee_id: EmployeeId, date: NaiveDate) -> AttendanceRecord {
        AttendanceRecord {
            id: Uuid::new_v4(),
            employee_id,
            date,
            kind: RecordKind::CheckIn,
            timestamp: Utc::now(),
            status: AttendanceStatus::Present,
            late_minutes: 0,
            work_hours: 0.0,
            overtime_hours: 0.0,
            source_record_id: None,
        }
    }

    #[tokio::test]
    async fn staff_id_is_unique() {
        let store = InMemoryStore::new();
        store.insert_employee(sample_employee("PHC00001")).await.unwrap();

        let err = store
            .insert_employee(sample_employee("PHC00001"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(store.employee_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn person_uid_lookup_roundtrips() {
        let store = InMemoryStore::new();
        let employee = sample_employee("PHC00002");
        let uid = employee.person_uid.clone();
        store.insert_employee(employee.clone()).await.unwrap();

        let found = store
            .employee_by_person_uid(uid.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, employee.id);
        assert!(store
            .employee_by_person_uid("UNKNOWN")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_reindexes_person_uid() {
        let store = InMemoryStore::new();
        let mut employee = sample_employee("PHC00003");
        let old_uid = employee.person_uid.clone();
        store.insert_employee(employee.clone()).await.unwrap();

        employee.person_uid = PersonUid::new("PHC00003FRESH1");
        store.update_employee(employee.clone()).await.unwrap();

        assert!(store
            .employee_by_person_uid(old_uid.as_str())
            .await
            .unwrap()
            .is_none());
        assert!(store
            .employee_by_person_uid("PHC00003FRESH1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn one_record_per_employee_date_kind() {
        let store = InMemoryStore::new();
        let employee_id = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();

        store
            .insert_attendance(sample_record(employee_id, date))
            .await
            .unwrap();
        let err = store
            .insert_attendance(sample_record(employee_id, date))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        // A different kind on the same day is fine.
        let mut out = sample_record(employee_id, date);
        out.kind = RecordKind::CheckOut;
        store.insert_attendance(out).await.unwrap();
    }

    #[tokio::test]
    async fn range_query_is_inclusive_and_sorted() {
        let store = InMemoryStore::new();
        let employee_id = Uuid::new_v4();

        for day in [10, 12, 11] {
            let date = NaiveDate::from_ymd_opt(2025, 3, day).unwrap();
            store
                .insert_attendance(sample_record(employee_id, date))
                .await
                .unwrap();
        }
        // Outside the range.
        store
            .insert_attendance(sample_record(
                employee_id,
                NaiveDate::from_ymd_opt(2025, 3, 20).unwrap(),
            ))
            .await
            .unwrap();

        let records = store
            .attendance_in_range(
                employee_id,
                NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                NaiveDate::from_ymd_opt(2025, 3, 12).unwrap(),
            )
            .await
            .unwrap();
        let days: Vec<u32> = records.iter().map(|r| chrono::Datelike::day(&r.date)).collect();
        assert_eq!(days, vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn sync_failure_resolution_lifecycle() {
        let store = InMemoryStore::new();
        let employee = sample_employee("PHC00004");
        let mut failure = SyncFailure::new(
            &employee,
            crate::types::SyncFailureKind::DeviceUnreachable,
            "timed out",
        );
        store.insert_sync_failure(failure.clone()).await.unwrap();

        assert_eq!(store.unresolved_sync_failures().await.unwrap().len(), 1);

        failure.resolved = true;
        failure.resolved_at = Some(Utc::now());
        store.update_sync_failure(failure).await.unwrap();

        assert!(store.unresolved_sync_failures().await.unwrap().is_empty());
        assert_eq!(
            store
                .sync_failures_for_employee(employee.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
