//! Registration of employees against the biometric terminal.
//!
//! Two explicitly distinct paths exist, never folded into one operation
//! behind a flag:
//!
//! - [`RegistrationCoordinator::register`] — the strict two-step saga:
//!   enroll on the device first, persist only after the acknowledgment.
//!   Any device failure aborts the saga on its "do not commit" branch, so
//!   no orphan employee row is ever written.
//! - [`RegistrationCoordinator::create_and_sync_later`] — the decoupled
//!   path: persist immediately, sync in the background, and log a
//!   [`SyncFailure`] instead of failing the call. Availability over
//!   atomicity.
//!
//! Attempts for the same staff id are serialized through a per-identifier
//! lock table; distinct employees register concurrently.

use std::sync::Arc;
use std::time::Instant;

use argon2::password_hash::{rand_core::OsRng, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, PasswordHash};
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::admission::{AdmissionController, EnrollmentKind};
use crate::device::{DeviceClient, DeviceHealth, EnrollPersonRequest};
use crate::error::{Error, Result};
use crate::storage::Store;
use crate::types::{
    BiometricTemplate, DeviceEndpoint, Employee, EmployeeDraft, FacilityId, PersonUid,
    SyncFailure, SyncFailureKind,
};

/// Configuration for the registration coordinator.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Per-attempt ceiling on the device call. An attempt that exceeds it
    /// fails with `DeviceUnreachable` instead of hanging.
    pub device_timeout_ms: u64,

    /// Digits in the generated self-service PIN.
    pub pin_length: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            // Terminal-side template processing is slow; a minute matches
            // what the gateway needs for large templates.
            device_timeout_ms: 60_000,
            pin_length: 6,
        }
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct Registered {
    pub employee: Employee,
    pub person_uid: PersonUid,
    /// The plaintext self-service PIN, surfaced exactly once at creation so
    /// it can be handed to the employee. `None` on idempotent no-ops.
    pub initial_pin: Option<String>,
}

/// Summary of one reconciliation pass over unresolved sync failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub resolved: usize,
    pub still_failing: usize,
}

/// Coordinates device enrollment and persistence for new employees.
pub struct RegistrationCoordinator<S, D>
where
    S: Store,
    D: DeviceClient,
{
    store: Arc<S>,
    device: Arc<D>,
    admission: Arc<AdmissionController>,
    config: RegistrationConfig,
    identifier_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S, D> RegistrationCoordinator<S, D>
where
    S: Store + 'static,
    D: DeviceClient + 'static,
{
    pub fn new(
        store: Arc<S>,
        device: Arc<D>,
        admission: Arc<AdmissionController>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            store,
            device,
            admission,
            config,
            identifier_locks: DashMap::new(),
        }
    }

    /// The admission controller this coordinator reports to.
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Queued front door: pass through admission control, run the strict
    /// saga, then release the queue slot and feed the observed duration
    /// back into the wait estimator.
    pub async fn enroll(
        &self,
        kind: EnrollmentKind,
        draft: EmployeeDraft,
        template: BiometricTemplate,
    ) -> Result<Registered> {
        let request_id = Uuid::new_v4();
        let admission = self.admission.submit(request_id, kind)?;
        tracing::info!(
            request_id = %request_id,
            staff_id = %draft.staff_id,
            position = admission.position,
            "Enrollment admitted"
        );

        let started = Instant::now();
        let result = self.register(draft, template).await;
        self.admission.complete(request_id);
        if result.is_ok() {
            self.admission
                .record_duration(started.elapsed().as_millis() as u64);
        }
        result
    }

    /// Strict registration: device first, then persist.
    ///
    /// Re-invoking for an employee that is already enrolled is a no-op
    /// returning the existing identifier; the device is not called again.
    /// An employee left unsynced by the decoupled path is re-enrolled under
    /// its existing identifier and its failure log entries resolved.
    ///
    /// # Errors
    /// `Validation` (bad input, nothing touched), `DeviceUnreachable` /
    /// `DeviceRejected` (saga aborted, no employee row written).
    #[tracing::instrument(skip(self, draft, template), fields(staff_id = %draft.staff_id))]
    pub async fn register(
        &self,
        draft: EmployeeDraft,
        template: BiometricTemplate,
    ) -> Result<Registered> {
        let lock = self.lock_for(&draft.staff_id);
        let _guard = lock.lock_owned().await;

        validate_draft(&draft, &template)?;

        if let Some(existing) = self.store.employee_by_staff_id(&draft.staff_id).await? {
            if existing.device_synced {
                tracing::debug!(
                    staff_id = %existing.staff_id,
                    person_uid = %existing.person_uid,
                    "Already registered, returning existing identifier"
                );
                return Ok(Registered {
                    person_uid: existing.person_uid.clone(),
                    employee: existing,
                    initial_pin: None,
                });
            }
            return self.resync_existing(existing).await;
        }

        let endpoint = self.device_endpoint(draft.facility_id).await?;
        if self.store.shift(draft.shift_id).await?.is_none() {
            return Err(Error::Validation(format!(
                "shift {} is not configured",
                draft.shift_id
            )));
        }

        let person_uid = match draft.person_uid.clone() {
            Some(uid) => uid,
            None => PersonUid::generate(&draft.staff_id),
        };
        if self
            .store
            .employee_by_person_uid(person_uid.as_str())
            .await?
            .is_some()
        {
            return Err(Error::Validation(format!(
                "device identifier {person_uid} is already in use"
            )));
        }

        // Device first. Failure of any kind aborts here: the compensating
        // branch of the saga is simply not committing.
        let payload = enroll_request(&draft, &person_uid, &endpoint, &template);
        self.device
            .register(&endpoint, &payload, self.config.device_timeout_ms)
            .await?;

        let pin = generate_pin(self.config.pin_length);
        let employee = Employee {
            id: Uuid::new_v4(),
            staff_id: draft.staff_id,
            first_name: draft.first_name,
            last_name: draft.last_name,
            email: draft.email,
            department: draft.department,
            birth_date: draft.birth_date,
            nationality: draft.nationality,
            national_id: draft.national_id,
            facility_id: draft.facility_id,
            shift_id: draft.shift_id,
            person_uid: person_uid.clone(),
            device_synced: true,
            credential_hash: hash_pin(&pin)?,
            biometric_template: template,
            created_at: Utc::now(),
        };
        self.store.insert_employee(employee.clone()).await?;

        tracing::info!(
            staff_id = %employee.staff_id,
            person_uid = %person_uid,
            "Employee registered (device acknowledged, row persisted)"
        );

        Ok(Registered {
            employee,
            person_uid,
            initial_pin: Some(pin),
        })
    }

    /// Decoupled registration: persist the employee immediately, then
    /// attempt the device sync in the background. A sync failure is
    /// recorded in the sync-failure log and never fails this call.
    #[tracing::instrument(skip(self, draft, template), fields(staff_id = %draft.staff_id))]
    pub async fn create_and_sync_later(
        &self,
        draft: EmployeeDraft,
        template: BiometricTemplate,
    ) -> Result<Registered> {
        let lock = self.lock_for(&draft.staff_id);
        let _guard = lock.lock_owned().await;

        validate_draft(&draft, &template)?;

        // The endpoint must exist up front even though the call is
        // deferred; otherwise the background sync could never succeed.
        let endpoint = self.device_endpoint(draft.facility_id).await?;
        if self.store.shift(draft.shift_id).await?.is_none() {
            return Err(Error::Validation(format!(
                "shift {} is not configured",
                draft.shift_id
            )));
        }
        if self
            .store
            .employee_by_staff_id(&draft.staff_id)
            .await?
            .is_some()
        {
            return Err(Error::Conflict {
                resource: "employee",
                id: draft.staff_id.clone(),
            });
        }

        let person_uid = match draft.person_uid.clone() {
            Some(uid) => uid,
            None => PersonUid::generate(&draft.staff_id),
        };
        let pin = generate_pin(self.config.pin_length);
        let employee = Employee {
            id: Uuid::new_v4(),
            staff_id: draft.staff_id,
            first_name: draft.first_name,
            last_name: draft.last_name,
            email: draft.email,
            department: draft.department,
            birth_date: draft.birth_date,
            nationality: draft.nationality,
            national_id: draft.national_id,
            facility_id: draft.facility_id,
            shift_id: draft.shift_id,
            person_uid: person_uid.clone(),
            device_synced: false,
            credential_hash: hash_pin(&pin)?,
            biometric_template: template,
            created_at: Utc::now(),
        };
        self.store.insert_employee(employee.clone()).await?;

        tracing::info!(
            staff_id = %employee.staff_id,
            "Employee persisted, device sync deferred"
        );

        let store = self.store.clone();
        let device = self.device.clone();
        let timeout_ms = self.config.device_timeout_ms;
        let task_employee = employee.clone();
        tokio::spawn(async move {
            sync_in_background(store, device, task_employee, endpoint, timeout_ms).await;
        });

        Ok(Registered {
            employee,
            person_uid,
            initial_pin: Some(pin),
        })
    }

    /// Re-attempt every unresolved sync failure. Entries whose employee now
    /// syncs are resolved; the rest get their retry count bumped.
    pub async fn retry_failed_syncs(&self) -> Result<RetryReport> {
        let mut report = RetryReport::default();

        for mut failure in self.store.unresolved_sync_failures().await? {
            report.attempted += 1;

            let employee = match self.store.employee_by_id(failure.employee_id).await? {
                Some(employee) => employee,
                None => {
                    // The employee was purged; nothing left to reconcile.
                    tracing::warn!(
                        employee_id = %failure.employee_id,
                        "Sync failure references a missing employee, resolving"
                    );
                    resolve(&mut failure);
                    self.store.update_sync_failure(failure).await?;
                    report.resolved += 1;
                    continue;
                }
            };

            if employee.device_synced {
                resolve(&mut failure);
                self.store.update_sync_failure(failure).await?;
                report.resolved += 1;
                continue;
            }

            match self.sync_employee(&employee).await {
                Ok(()) => {
                    resolve(&mut failure);
                    self.store.update_sync_failure(failure).await?;
                    report.resolved += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        staff_id = %employee.staff_id,
                        retry_count = failure.retry_count + 1,
                        error = %e,
                        "Device sync retry failed"
                    );
                    failure.retry_count += 1;
                    failure.error = e.to_string();
                    self.store.update_sync_failure(failure).await?;
                    report.still_failing += 1;
                }
            }
        }

        Ok(report)
    }

    /// Spawn a background worker that periodically re-attempts unresolved
    /// sync failures until the token is cancelled.
    pub fn spawn_retry_worker(
        self: &Arc<Self>,
        interval: std::time::Duration,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Sync retry worker shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match coordinator.retry_failed_syncs().await {
                            Ok(report) if report.attempted > 0 => {
                                tracing::info!(
                                    attempted = report.attempted,
                                    resolved = report.resolved,
                                    still_failing = report.still_failing,
                                    "Sync reconciliation pass complete"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::error!(error = %e, "Sync reconciliation pass failed");
                            }
                        }
                    }
                }
            }
        })
    }

    /// Verify a self-service PIN against an employee's stored hash.
    pub async fn verify_credential(&self, staff_id: &str, pin: &str) -> Result<bool> {
        match self.store.employee_by_staff_id(staff_id).await? {
            Some(employee) => verify_pin(pin, &employee.credential_hash),
            None => Ok(false),
        }
    }

    /// Probe the terminal gateway of a facility.
    pub async fn device_health(&self, facility_id: FacilityId) -> Result<DeviceHealth> {
        let endpoint = self.device_endpoint(facility_id).await?;
        Ok(self
            .device
            .health(&endpoint, self.config.device_timeout_ms)
            .await)
    }

    // --- internals -------------------------------------------------------

    fn lock_for(&self, staff_id: &str) -> Arc<Mutex<()>> {
        self.identifier_locks
            .entry(staff_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn device_endpoint(&self, facility_id: FacilityId) -> Result<DeviceEndpoint> {
        let facility = self
            .store
            .facility(facility_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("facility {facility_id} does not exist")))?;
        facility.device.ok_or_else(|| {
            Error::Validation(format!(
                "facility {} has no biometric device configured",
                facility.name
            ))
        })
    }

    /// Device call for an employee that is already persisted (decoupled
    /// leftovers). Marks the row synced on acknowledgment.
    async fn sync_employee(&self, employee: &Employee) -> Result<()> {
        let endpoint = self.device_endpoint(employee.facility_id).await?;
        let payload = enroll_request_for(employee, &endpoint);
        self.device
            .register(&endpoint, &payload, self.config.device_timeout_ms)
            .await?;

        let mut updated = employee.clone();
        updated.device_synced = true;
        self.store.update_employee(updated).await?;
        Ok(())
    }

    async fn resync_existing(&self, existing: Employee) -> Result<Registered> {
        tracing::info!(
            staff_id = %existing.staff_id,
            person_uid = %existing.person_uid,
            "Re-enrolling persisted employee under its existing identifier"
        );
        self.sync_employee(&existing).await?;

        // The employee is now acknowledged; close out any open failures.
        for mut failure in self.store.sync_failures_for_employee(existing.id).await? {
            if !failure.resolved {
                resolve(&mut failure);
                self.store.update_sync_failure(failure).await?;
            }
        }

        let employee = self
            .store
            .employee_by_id(existing.id)
            .await?
            .unwrap_or(existing);
        Ok(Registered {
            person_uid: employee.person_uid.clone(),
            employee,
            initial_pin: None,
        })
    }
}

/// Background half of the decoupled path. Never propagates: success updates
/// the employee row, failure lands in the sync-failure log.
async fn sync_in_background<S, D>(
    store: Arc<S>,
    device: Arc<D>,
    employee: Employee,
    endpoint: DeviceEndpoint,
    timeout_ms: u64,
) where
    S: Store,
    D: DeviceClient,
{
    let payload = enroll_request_for(&employee, &endpoint);
    match device.register(&endpoint, &payload, timeout_ms).await {
        Ok(_ack) => {
            let mut updated = employee.clone();
            updated.device_synced = true;
            if let Err(e) = store.update_employee(updated).await {
                tracing::error!(
                    staff_id = %employee.staff_id,
                    error = %e,
                    "Failed to mark employee synced after device ack"
                );
            } else {
                tracing::info!(
                    staff_id = %employee.staff_id,
                    "Deferred device sync succeeded"
                );
            }
        }
        Err(e) => {
            let kind = match &e {
                Error::DeviceRejected { .. } => SyncFailureKind::DeviceRejected,
                _ => SyncFailureKind::DeviceUnreachable,
            };
            tracing::warn!(
                staff_id = %employee.staff_id,
                error = %e,
                "Deferred device sync failed, logging for reconciliation"
            );
            let failure = SyncFailure::new(&employee, kind, e.to_string());
            if let Err(log_err) = store.insert_sync_failure(failure).await {
                tracing::error!(
                    staff_id = %employee.staff_id,
                    error = %log_err,
                    "Failed to write sync-failure log entry"
                );
            }
        }
    }
}

fn resolve(failure: &mut SyncFailure) {
    failure.resolved = true;
    failure.resolved_at = Some(Utc::now());
}

fn validate_draft(draft: &EmployeeDraft, template: &BiometricTemplate) -> Result<()> {
    if draft.staff_id.trim().is_empty() {
        return Err(Error::Validation("staff id is required".to_string()));
    }
    if draft.first_name.trim().is_empty() || draft.last_name.trim().is_empty() {
        return Err(Error::Validation("employee name is required".to_string()));
    }
    if draft.department.trim().is_empty() {
        return Err(Error::Validation("department is required".to_string()));
    }
    if template.is_empty() {
        return Err(Error::Validation(
            "a biometric template is required".to_string(),
        ));
    }
    Ok(())
}

fn enroll_request(
    draft: &EmployeeDraft,
    person_uid: &PersonUid,
    endpoint: &DeviceEndpoint,
    template: &BiometricTemplate,
) -> EnrollPersonRequest {
    EnrollPersonRequest {
        person_uid: person_uid.as_str().to_string(),
        full_name: format!("{} {}", draft.first_name, draft.last_name),
        facility: endpoint.device_key.clone(),
        department: draft.department.clone(),
        birth_date: draft.birth_date.map(|d| d.to_string()),
        nationality: draft.nationality.clone(),
        national_id: draft.national_id.clone(),
        template: template.0.clone(),
    }
}

fn enroll_request_for(employee: &Employee, endpoint: &DeviceEndpoint) -> EnrollPersonRequest {
    EnrollPersonRequest {
        person_uid: employee.person_uid.as_str().to_string(),
        full_name: employee.full_name(),
        facility: endpoint.device_key.clone(),
        department: employee.department.clone(),
        birth_date: employee.birth_date.map(|d| d.to_string()),
        nationality: employee.nationality.clone(),
        national_id: employee.national_id.clone(),
        template: employee.biometric_template.0.clone(),
    }
}

fn generate_pin(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn hash_pin(pin: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Credential(e.to_string()))
}

/// Verify a PIN against a stored hash. Parameters come from the hash
/// itself.
pub fn verify_pin(pin: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| Error::Credential(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(pin.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionConfig;
    use crate::device::MockDeviceClient;
    use crate::storage::in_memory::InMemoryStore;
    use crate::types::{Facility, Shift};
    use chrono::NaiveTime;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryStore>,
        device: Arc<MockDeviceClient>,
        coordinator: Arc<RegistrationCoordinator<InMemoryStore, MockDeviceClient>>,
        facility_id: FacilityId,
        shift_id: Uuid,
    }

    async fn fixture() -> Fixture {
        fixture_with(AdmissionConfig::default()).await
    }

    async fn fixture_with(admission: AdmissionConfig) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let device = Arc::new(MockDeviceClient::new());

        let facility_id = Uuid::new_v4();
        store
            .insert_facility(Facility {
                id: facility_id,
                name: "Garki Clinic".to_string(),
                device: Some(DeviceEndpoint {
                    base_url: "http://gateway".to_string(),
                    device_key: "gate-a".to_string(),
                    secret: "shh".to_string(),
                }),
            })
            .await
            .unwrap();

        let shift_id = Uuid::new_v4();
        store
            .insert_shift(Shift {
                id: shift_id,
                name: "Day".to_string(),
                scheduled_check_in: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                scheduled_check_out: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                grace_minutes: 10,
                standard_hours: 8.0,
            })
            .await
            .unwrap();

        let coordinator = Arc::new(RegistrationCoordinator::new(
            store.clone(),
            device.clone(),
            Arc::new(AdmissionController::new(admission)),
            RegistrationConfig::default(),
        ));

        Fixture {
            store,
            device,
            coordinator,
            facility_id,
            shift_id,
        }
    }

    fn draft(fx: &Fixture, staff_id: &str) -> EmployeeDraft {
        EmployeeDraft {
            staff_id: staff_id.to_string(),
            first_name: "Amina".to_string(),
            last_name: "Bello".to_string(),
            email: Some("amina@example.org".to_string()),
            department: "Nursing".to_string(),
            birth_date: None,
            nationality: Some("NG".to_string()),
            national_id: None,
            facility_id: fx.facility_id,
            shift_id: fx.shift_id,
            person_uid: None,
        }
    }

    fn template() -> BiometricTemplate {
        BiometricTemplate("dGVtcGxhdGU=".to_string())
    }

    async fn wait_for_unresolved_failure(store: &InMemoryStore) {
        for _ in 0..100 {
            if !store.unresolved_sync_failures().await.unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sync failure not recorded in time");
    }

    async fn wait_for_synced(store: &InMemoryStore, staff_id: &str) {
        for _ in 0..100 {
            let synced = store
                .employee_by_staff_id(staff_id)
                .await
                .unwrap()
                .map(|e| e.device_synced)
                .unwrap_or(false);
            if synced {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("employee never marked synced");
    }

    #[tokio::test]
    async fn strict_register_persists_after_ack() {
        let fx = fixture().await;

        let registered = fx
            .coordinator
            .register(draft(&fx, "PHC00001"), template())
            .await
            .unwrap();

        assert!(registered.employee.device_synced);
        assert!(registered
            .person_uid
            .as_str()
            .starts_with("PHC00001"));
        assert_eq!(fx.device.call_count(), 1);
        assert_eq!(fx.store.employee_count().await.unwrap(), 1);

        // The PIN verifies against the stored hash and is never stored raw.
        let pin = registered.initial_pin.unwrap();
        assert_eq!(pin.len(), 6);
        assert!(fx
            .coordinator
            .verify_credential("PHC00001", &pin)
            .await
            .unwrap());
        assert!(!fx
            .coordinator
            .verify_credential("PHC00001", "not-the-pin")
            .await
            .unwrap());
        assert_ne!(registered.employee.credential_hash, pin);
    }

    #[tokio::test]
    async fn device_failure_leaves_no_orphan_row() {
        let fx = fixture().await;
        fx.device.push_unreachable("cable pulled");

        let err = fx
            .coordinator
            .register(draft(&fx, "PHC00002"), template())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceUnreachable(_)));
        assert!(err.is_device_failure());
        assert_eq!(fx.store.employee_count().await.unwrap(), 0);

        fx.device.push_rejection("102", "bad template");
        let err = fx
            .coordinator
            .register(draft(&fx, "PHC00002"), template())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceRejected { .. }));
        assert!(err.is_device_failure());
        assert_eq!(fx.store.employee_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let fx = fixture().await;

        let first = fx
            .coordinator
            .register(draft(&fx, "PHC00003"), template())
            .await
            .unwrap();
        let second = fx
            .coordinator
            .register(draft(&fx, "PHC00003"), template())
            .await
            .unwrap();

        assert_eq!(first.person_uid, second.person_uid);
        assert!(second.initial_pin.is_none());
        // The device was only ever called once.
        assert_eq!(fx.device.call_count(), 1);
        assert_eq!(fx.store.employee_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn validation_fails_fast_without_device_call() {
        let fx = fixture().await;

        let err = fx
            .coordinator
            .register(draft(&fx, "PHC00004"), BiometricTemplate(String::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let mut no_name = draft(&fx, "PHC00004");
        no_name.first_name = String::new();
        let err = fx
            .coordinator
            .register(no_name, template())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let mut bad_facility = draft(&fx, "PHC00004");
        bad_facility.facility_id = Uuid::new_v4();
        let err = fx
            .coordinator
            .register(bad_facility, template())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert_eq!(fx.device.call_count(), 0);
        assert_eq!(fx.store.employee_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn payload_never_contains_the_pin() {
        let fx = fixture().await;
        let registered = fx
            .coordinator
            .register(draft(&fx, "PHC00005"), template())
            .await
            .unwrap();
        let pin = registered.initial_pin.unwrap();

        let calls = fx.device.calls();
        assert_eq!(calls.len(), 1);
        let serialized = serde_json::to_string(&calls[0].payload).unwrap();
        assert!(!serialized.contains(&pin));
        assert!(!serialized.to_ascii_lowercase().contains("pin"));
    }

    #[tokio::test]
    async fn decoupled_path_persists_before_sync_and_logs_failure() {
        let fx = fixture().await;
        fx.device.push_unreachable("gateway down");

        let registered = fx
            .coordinator
            .create_and_sync_later(draft(&fx, "PHC00006"), template())
            .await
            .unwrap();

        // The call itself succeeded even though the sync will fail.
        assert!(!registered.employee.device_synced);
        assert_eq!(fx.store.employee_count().await.unwrap(), 1);

        wait_for_unresolved_failure(&fx.store).await;

        let failures = fx.store.unresolved_sync_failures().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, SyncFailureKind::DeviceUnreachable);
        assert_eq!(failures[0].staff_id, "PHC00006");
    }

    #[tokio::test]
    async fn decoupled_path_marks_synced_on_ack() {
        let fx = fixture().await;

        fx.coordinator
            .create_and_sync_later(draft(&fx, "PHC00007"), template())
            .await
            .unwrap();

        wait_for_synced(&fx.store, "PHC00007").await;

        assert!(fx.store.unresolved_sync_failures().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_resolves_once_device_recovers() {
        let fx = fixture().await;
        fx.device.push_unreachable("gateway down");

        fx.coordinator
            .create_and_sync_later(draft(&fx, "PHC00008"), template())
            .await
            .unwrap();

        wait_for_unresolved_failure(&fx.store).await;

        // Device still down: retry bumps the counter.
        fx.device.push_unreachable("still down");
        let report = fx.coordinator.retry_failed_syncs().await.unwrap();
        assert_eq!(
            report,
            RetryReport {
                attempted: 1,
                resolved: 0,
                still_failing: 1
            }
        );
        let failures = fx.store.unresolved_sync_failures().await.unwrap();
        assert_eq!(failures[0].retry_count, 1);

        // Device recovered (mock acks unscripted calls): retry resolves.
        let report = fx.coordinator.retry_failed_syncs().await.unwrap();
        assert_eq!(report.resolved, 1);
        assert!(fx.store.unresolved_sync_failures().await.unwrap().is_empty());
        let employee = fx
            .store
            .employee_by_staff_id("PHC00008")
            .await
            .unwrap()
            .unwrap();
        assert!(employee.device_synced);
    }

    #[tokio::test]
    async fn strict_register_reconciles_decoupled_leftovers() {
        let fx = fixture().await;
        fx.device.push_unreachable("gateway down");

        let first = fx
            .coordinator
            .create_and_sync_later(draft(&fx, "PHC00009"), template())
            .await
            .unwrap();

        wait_for_unresolved_failure(&fx.store).await;

        // A strict register for the same staff id re-enrolls under the
        // existing identifier and closes the failure log.
        let second = fx
            .coordinator
            .register(draft(&fx, "PHC00009"), template())
            .await
            .unwrap();
        assert_eq!(second.person_uid, first.person_uid);
        assert!(second.employee.device_synced);
        assert!(fx.store.unresolved_sync_failures().await.unwrap().is_empty());
        assert_eq!(fx.store.employee_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_same_identifier_attempts_serialize() {
        let fx = fixture().await;

        let a = {
            let coordinator = fx.coordinator.clone();
            let draft = draft(&fx, "PHC00010");
            tokio::spawn(async move { coordinator.register(draft, template()).await })
        };
        let b = {
            let coordinator = fx.coordinator.clone();
            let draft = draft(&fx, "PHC00010");
            tokio::spawn(async move { coordinator.register(draft, template()).await })
        };

        let first = a.await.unwrap().unwrap();
        let second = b.await.unwrap().unwrap();

        // One created, the other observed the existing enrollment.
        assert_eq!(first.person_uid, second.person_uid);
        assert_eq!(fx.store.employee_count().await.unwrap(), 1);
        assert_eq!(fx.device.call_count(), 1);
    }

    #[tokio::test]
    async fn enroll_feeds_the_admission_controller() {
        let fx = fixture().await;

        fx.coordinator
            .enroll(EnrollmentKind::Single, draft(&fx, "PHC00011"), template())
            .await
            .unwrap();

        let stats = fx.coordinator.admission().stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.total_processed, 1);
        // A real duration sample replaced the 45s default.
        assert!(stats.average_processing_seconds < 45);
    }

    #[tokio::test]
    async fn retry_worker_reconciles_until_cancelled() {
        let fx = fixture().await;
        fx.device.push_unreachable("gateway down");

        fx.coordinator
            .create_and_sync_later(draft(&fx, "PHC00013"), template())
            .await
            .unwrap();
        wait_for_unresolved_failure(&fx.store).await;

        let shutdown = tokio_util::sync::CancellationToken::new();
        let worker = fx
            .coordinator
            .spawn_retry_worker(Duration::from_millis(20), shutdown.clone());

        // Device recovered; the worker resolves the failure on its own.
        for _ in 0..100 {
            if fx.store.unresolved_sync_failures().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(fx.store.unresolved_sync_failures().await.unwrap().is_empty());

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn enroll_propagates_queue_full() {
        let fx = fixture_with(AdmissionConfig {
            max_queue_size: 0,
            ..AdmissionConfig::default()
        })
        .await;

        let err = fx
            .coordinator
            .enroll(EnrollmentKind::Public, draft(&fx, "PHC00012"), template())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueFull { .. }));
        assert_eq!(fx.device.call_count(), 0);
        assert_eq!(fx.store.employee_count().await.unwrap(), 0);
    }
}
