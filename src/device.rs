//! Client abstraction for the biometric terminal gateway.
//!
//! This module defines the `DeviceClient` trait to abstract the terminal
//! protocol, enabling testability with mock implementations. The production
//! implementation talks HTTP to the facility's device gateway.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::DeviceEndpoint;

/// Gateway result code meaning the terminal accepted the enrollment.
const ACK_OK: &str = "000";

/// Enrollment payload sent to the terminal gateway.
///
/// Deliberately contains only what the terminal needs to recognize a
/// person. There is no credential field: the self-service PIN never crosses
/// this boundary, by construction.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollPersonRequest {
    /// Person identifier on the terminal (unique within the facility).
    pub person_uid: String,
    pub full_name: String,
    pub facility: String,
    pub department: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub national_id: Option<String>,
    /// Base64-encoded biometric template captured at enrollment.
    pub template: String,
}

/// Acknowledgment from the terminal gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAck {
    pub code: String,
    pub message: String,
}

/// Outcome of a health probe. Probing never fails hard; an unreachable
/// gateway reports as offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHealth {
    pub online: bool,
    pub detail: Option<String>,
}

/// Trait for talking to a facility's biometric terminal.
///
/// # Errors
/// `register` distinguishes the two failure classes the coordinator cares
/// about: `DeviceUnreachable` (network error or timeout — nothing is known
/// about device state) and `DeviceRejected` (the gateway answered with a
/// NAK code).
#[async_trait]
pub trait DeviceClient: Send + Sync + Clone {
    /// Enroll a person on the terminal. Once dispatched the attempt runs to
    /// completion, failure, or timeout; it cannot be canceled mid-flight.
    async fn register(
        &self,
        endpoint: &DeviceEndpoint,
        person: &EnrollPersonRequest,
        timeout_ms: u64,
    ) -> Result<DeviceAck>;

    /// Probe the terminal gateway.
    async fn health(&self, endpoint: &DeviceEndpoint, timeout_ms: u64) -> DeviceHealth;
}

// ============================================================================
// Production implementation using reqwest
// ============================================================================

/// Wire shape of gateway responses.
#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    success: Option<bool>,
}

/// Production device client over HTTP.
#[derive(Clone)]
pub struct HttpDeviceClient {
    client: reqwest::Client,
}

impl HttpDeviceClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpDeviceClient {
    fn default() -> Self {
        Self::new()
    }
}

fn unreachable_from(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::DeviceUnreachable("request timed out".to_string())
    } else {
        Error::DeviceUnreachable(e.to_string())
    }
}

#[async_trait]
impl DeviceClient for HttpDeviceClient {
    #[tracing::instrument(skip(self, endpoint, person), fields(person_uid = %person.person_uid, device_key = %endpoint.device_key))]
    async fn register(
        &self,
        endpoint: &DeviceEndpoint,
        person: &EnrollPersonRequest,
        timeout_ms: u64,
    ) -> Result<DeviceAck> {
        let url = format!("{}/api/employee/register", endpoint.base_url);

        tracing::debug!(url = %url, timeout_ms, "Sending enrollment to device gateway");

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_millis(timeout_ms))
            .header("X-Service-Auth", &endpoint.secret)
            .json(person)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(url = %url, error = %e, "Device gateway request failed");
                unreachable_from(e)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(unreachable_from)?;

        let gateway: GatewayResponse = serde_json::from_str(&body).unwrap_or(GatewayResponse {
            code: None,
            msg: None,
            success: None,
        });

        let code = gateway.code.unwrap_or_else(|| status.as_u16().to_string());
        let message = gateway.msg.unwrap_or_else(|| body.clone());

        let accepted = status.is_success() && (code == ACK_OK || gateway.success == Some(true));
        if accepted {
            tracing::info!(person_uid = %person.person_uid, "Device acknowledged enrollment");
            Ok(DeviceAck { code, message })
        } else {
            tracing::warn!(
                person_uid = %person.person_uid,
                code = %code,
                "Device rejected enrollment"
            );
            Err(Error::DeviceRejected { code, message })
        }
    }

    async fn health(&self, endpoint: &DeviceEndpoint, timeout_ms: u64) -> DeviceHealth {
        let url = format!("{}/api/integration/status", endpoint.base_url);

        let result = self
            .client
            .get(&url)
            .timeout(Duration::from_millis(timeout_ms))
            .header("X-Service-Auth", &endpoint.secret)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => DeviceHealth {
                online: true,
                detail: None,
            },
            Ok(response) => DeviceHealth {
                online: false,
                detail: Some(format!("gateway returned {}", response.status())),
            },
            Err(e) => DeviceHealth {
                online: false,
                detail: Some(e.to_string()),
            },
        }
    }
}

// ============================================================================
// Test/mock implementation
// ============================================================================

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Record of a call made to the mock device client.
#[derive(Debug, Clone)]
pub struct MockEnrollment {
    pub base_url: String,
    pub device_key: String,
    pub payload: EnrollPersonRequest,
    pub timeout_ms: u64,
}

/// Mock device client for testing.
///
/// Register outcomes are scripted FIFO; with nothing scripted, every
/// enrollment is acknowledged. All calls are recorded for inspection.
#[derive(Clone)]
pub struct MockDeviceClient {
    outcomes: Arc<Mutex<VecDeque<Result<DeviceAck>>>>,
    calls: Arc<Mutex<Vec<MockEnrollment>>>,
    online: Arc<Mutex<bool>>,
}

impl Default for MockDeviceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeviceClient {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            online: Arc::new(Mutex::new(true)),
        }
    }

    /// Script the next register outcome. Multiple outcomes are consumed in
    /// FIFO order.
    pub fn push_outcome(&self, outcome: Result<DeviceAck>) {
        self.outcomes.lock().push_back(outcome);
    }

    /// Convenience: script a rejection with the given gateway code.
    pub fn push_rejection(&self, code: &str, message: &str) {
        self.push_outcome(Err(Error::DeviceRejected {
            code: code.to_string(),
            message: message.to_string(),
        }));
    }

    /// Convenience: script an unreachable-device failure.
    pub fn push_unreachable(&self, detail: &str) {
        self.push_outcome(Err(Error::DeviceUnreachable(detail.to_string())));
    }

    pub fn set_online(&self, online: bool) {
        *self.online.lock() = online;
    }

    pub fn calls(&self) -> Vec<MockEnrollment> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl DeviceClient for MockDeviceClient {
    async fn register(
        &self,
        endpoint: &DeviceEndpoint,
        person: &EnrollPersonRequest,
        timeout_ms: u64,
    ) -> Result<DeviceAck> {
        self.calls.lock().push(MockEnrollment {
            base_url: endpoint.base_url.clone(),
            device_key: endpoint.device_key.clone(),
            payload: person.clone(),
            timeout_ms,
        });

        match self.outcomes.lock().pop_front() {
            Some(outcome) => outcome,
            None => Ok(DeviceAck {
                code: ACK_OK.to_string(),
                message: "ok".to_string(),
            }),
        }
    }

    async fn health(&self, _endpoint: &DeviceEndpoint, _timeout_ms: u64) -> DeviceHealth {
        let online = *self.online.lock();
        DeviceHealth {
            online,
            detail: (!online).then(|| "mock offline".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(base_url: &str) -> DeviceEndpoint {
        DeviceEndpoint {
            base_url: base_url.to_string(),
            device_key: "gate-a".to_string(),
            secret: "shh".to_string(),
        }
    }

    fn person() -> EnrollPersonRequest {
        EnrollPersonRequest {
            person_uid: "PHC00001A7X2M".to_string(),
            full_name: "Amina Bello".to_string(),
            facility: "gate-a".to_string(),
            department: "Nursing".to_string(),
            birth_date: None,
            nationality: Some("NG".to_string()),
            national_id: None,
            template: "dGVtcGxhdGU=".to_string(),
        }
    }

    #[tokio::test]
    async fn register_accepts_ack_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/employee/register"))
            .and(header("X-Service-Auth", "shh"))
            .and(body_partial_json(
                serde_json::json!({"personUid": "PHC00001A7X2M"}),
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": "000", "msg": "enrolled"})),
            )
            .mount(&server)
            .await;

        let client = HttpDeviceClient::new();
        let ack = client
            .register(&endpoint(&server.uri()), &person(), 5_000)
            .await
            .unwrap();
        assert_eq!(ack.code, "000");
    }

    #[tokio::test]
    async fn register_maps_nak_to_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/employee/register"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": "102", "msg": "bad template"})),
            )
            .mount(&server)
            .await;

        let client = HttpDeviceClient::new();
        let err = client
            .register(&endpoint(&server.uri()), &person(), 5_000)
            .await
            .unwrap_err();
        match err {
            Error::DeviceRejected { code, message } => {
                assert_eq!(code, "102");
                assert_eq!(message, "bad template");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_maps_timeout_to_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/employee/register"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": "000"}))
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;

        let client = HttpDeviceClient::new();
        let err = client
            .register(&endpoint(&server.uri()), &person(), 50)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceUnreachable(_)));
    }

    #[tokio::test]
    async fn enroll_payload_never_carries_a_credential() {
        let serialized = serde_json::to_value(person()).unwrap();
        let keys: Vec<&str> = serialized
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        for key in keys {
            let lowered = key.to_ascii_lowercase();
            assert!(!lowered.contains("pin"), "payload leaked field {key}");
            assert!(!lowered.contains("credential"), "payload leaked field {key}");
            assert!(!lowered.contains("password"), "payload leaked field {key}");
        }
    }

    #[tokio::test]
    async fn health_reports_offline_on_unreachable_gateway() {
        let client = HttpDeviceClient::new();
        // Nothing listens here.
        let health = client
            .health(&endpoint("http://127.0.0.1:9"), 200)
            .await;
        assert!(!health.online);
        assert!(health.detail.is_some());
    }

    #[tokio::test]
    async fn mock_scripts_outcomes_fifo() {
        let mock = MockDeviceClient::new();
        mock.push_unreachable("cable pulled");

        let err = mock
            .register(&endpoint("http://device"), &person(), 1_000)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceUnreachable(_)));

        // Unscripted calls succeed.
        let ack = mock
            .register(&endpoint("http://device"), &person(), 1_000)
            .await
            .unwrap();
        assert_eq!(ack.code, "000");
        assert_eq!(mock.call_count(), 2);
    }
}
