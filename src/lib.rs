//! Core of a biometric-device-backed attendance system.
//!
//! This crate reconciles a physical biometric terminal with the system of
//! record under load and partial failure:
//! - Bounds and estimates concurrent enrollment work (admission control)
//! - Registers employees with a device-first saga or a decoupled
//!   persist-then-sync path with a durable failure log
//! - Turns raw terminal webhooks into attendance records through a
//!   per-employee-per-day state machine with lateness/overtime computation
//! - Derives deterministic attendance and punctuality metrics
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use rollcall::{
//!     AdmissionController, EventProcessor, HttpDeviceClient, InMemoryStore,
//!     MetricsEngine, RegistrationCoordinator, RegistrationConfig,
//! };
//!
//! let store = Arc::new(InMemoryStore::new());
//! let device = Arc::new(HttpDeviceClient::new());
//! let admission = Arc::new(AdmissionController::default());
//!
//! let coordinator = RegistrationCoordinator::new(
//!     store.clone(),
//!     device,
//!     admission,
//!     RegistrationConfig::default(),
//! );
//! let processor = EventProcessor::new(store.clone());
//! let metrics = MetricsEngine::new(store);
//! ```
//!
//! HTTP routing, auth, and process bootstrapping live outside this crate;
//! the composition root constructs and wires these components explicitly.

pub mod admission;
pub mod attendance;
pub mod device;
pub mod error;
pub mod events;
pub mod metrics;
pub mod registration;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use admission::{
    Admission, AdmissionConfig, AdmissionController, EnrollmentKind, QueueStats, QueueStatus,
    RecommendedAction,
};
pub use attendance::{EventProcessor, Outcome};
pub use device::{
    DeviceAck, DeviceClient, DeviceHealth, EnrollPersonRequest, HttpDeviceClient,
    MockDeviceClient,
};
pub use error::{Error, Result};
pub use events::{DeviceEvent, DiscardReason, ParsedEvent, RawDeviceEvent, Verification};
pub use metrics::{AttendanceSummary, MetricsEngine};
pub use registration::{
    verify_pin, Registered, RegistrationConfig, RegistrationCoordinator, RetryReport,
};
pub use storage::in_memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use storage::postgres::PostgresStore;
pub use storage::Store;
pub use types::*;
