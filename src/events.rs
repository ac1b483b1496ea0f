//! Boundary parsing of raw terminal webhook payloads.
//!
//! The terminal posts duck-typed JSON: boolean flags as the strings "0"/"1",
//! direction as a numeric-string code, and the record time as epoch
//! milliseconds (number or string, depending on firmware). Everything is
//! parsed into a validated [`DeviceEvent`] here, at the edge; malformed
//! flags are rejected outright rather than coerced deeper in the pipeline.
//!
//! Two distinct negative outcomes exist and must not be conflated:
//! - malformed payloads are a hard [`Error::Validation`];
//! - well-formed events that should produce no record (failed verification,
//!   strangers, no verification method) are [`Discard`]ed with a reason.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::RecordKind;

/// Raw webhook payload exactly as the terminal sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDeviceEvent {
    #[serde(rename = "deviceKey")]
    pub device_key: String,

    /// Person serial number: the enrolled identifier, empty for strangers.
    #[serde(rename = "personSn", default)]
    pub person_sn: Option<String>,

    /// The terminal's own id for this record, when firmware provides one.
    #[serde(rename = "recordId", default)]
    pub record_id: Option<String>,

    /// Epoch milliseconds. Some firmware versions send it as a number,
    /// others as a string.
    #[serde(rename = "recordTime")]
    pub record_time: serde_json::Value,

    /// "1" success, "2" failed access.
    #[serde(rename = "resultFlag", default)]
    pub result_flag: Option<String>,

    /// "1" registered person, "2" stranger.
    #[serde(rename = "personType", default)]
    pub person_type: Option<String>,

    /// "1" check-in, "2" break-out, "3" break-in, "4" check-out.
    #[serde(default)]
    pub direction: Option<String>,

    #[serde(rename = "faceFlag", default)]
    pub face_flag: Option<String>,
    #[serde(rename = "fingerFlag", default)]
    pub finger_flag: Option<String>,
    #[serde(rename = "cardFlag", default)]
    pub card_flag: Option<String>,
    #[serde(rename = "pwdFlag", default)]
    pub pwd_flag: Option<String>,
}

/// How the person was verified at the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Face,
    Fingerprint,
    Card,
    Password,
}

/// A validated attendance event, ready for the processor.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    pub device_key: String,
    /// The enrolled person identifier this event belongs to.
    pub person_uid: String,
    pub record_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub kind: RecordKind,
    pub verification: Vec<Verification>,
}

/// Why a well-formed event produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// resultFlag says the access attempt failed.
    FailedVerification,
    /// personType says the terminal saw an unregistered person.
    Stranger,
    /// No person serial number on a supposedly registered person.
    MissingPersonId,
    /// None of the verification-method flags were set.
    NoVerificationMethod,
}

/// Outcome of boundary parsing.
#[derive(Debug, Clone)]
pub enum ParsedEvent {
    Event(DeviceEvent),
    Discard(DiscardReason),
}

impl DeviceEvent {
    /// Parse and validate a raw payload.
    ///
    /// # Errors
    /// `Validation` when a flag, direction code, or timestamp is malformed.
    pub fn parse(raw: RawDeviceEvent) -> Result<ParsedEvent> {
        if raw.device_key.is_empty() {
            return Err(Error::Validation("missing deviceKey".to_string()));
        }

        let occurred_at = parse_record_time(&raw.record_time)?;

        // resultFlag and personType are mandatory tri-state strings; reject
        // anything outside the documented codes rather than guessing.
        let success = match raw.result_flag.as_deref() {
            Some("1") => true,
            Some("2") => false,
            other => {
                return Err(Error::Validation(format!(
                    "malformed resultFlag: {other:?}"
                )))
            }
        };
        let registered = match raw.person_type.as_deref() {
            Some("1") => true,
            Some("2") => false,
            other => {
                return Err(Error::Validation(format!(
                    "malformed personType: {other:?}"
                )))
            }
        };

        // Direction codes: 1=check-in, 3=break-in (counts as check-in),
        // 2=break-out, 4=check-out (both count as check-out).
        let kind = match raw.direction.as_deref() {
            Some("1") | Some("3") => RecordKind::CheckIn,
            Some("2") | Some("4") => RecordKind::CheckOut,
            other => {
                return Err(Error::Validation(format!(
                    "malformed direction: {other:?}"
                )))
            }
        };

        let mut verification = Vec::new();
        for (flag, method) in [
            (&raw.face_flag, Verification::Face),
            (&raw.finger_flag, Verification::Fingerprint),
            (&raw.card_flag, Verification::Card),
            (&raw.pwd_flag, Verification::Password),
        ] {
            if parse_bool_flag(flag)? {
                verification.push(method);
            }
        }

        if !success {
            return Ok(ParsedEvent::Discard(DiscardReason::FailedVerification));
        }
        if !registered {
            return Ok(ParsedEvent::Discard(DiscardReason::Stranger));
        }
        let person_uid = match raw.person_sn.as_deref() {
            Some(sn) if !sn.is_empty() => sn.to_string(),
            _ => return Ok(ParsedEvent::Discard(DiscardReason::MissingPersonId)),
        };
        if verification.is_empty() {
            return Ok(ParsedEvent::Discard(DiscardReason::NoVerificationMethod));
        }

        Ok(ParsedEvent::Event(DeviceEvent {
            device_key: raw.device_key,
            person_uid,
            record_id: raw.record_id,
            occurred_at,
            kind,
            verification,
        }))
    }
}

/// Verification-method flags: "1" set, "0"/absent unset, anything else
/// malformed.
fn parse_bool_flag(flag: &Option<String>) -> Result<bool> {
    match flag.as_deref() {
        Some("1") => Ok(true),
        Some("0") | None => Ok(false),
        Some(other) => Err(Error::Validation(format!(
            "malformed boolean flag: {other:?}"
        ))),
    }
}

fn parse_record_time(value: &serde_json::Value) -> Result<DateTime<Utc>> {
    let millis = match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::Validation(format!("malformed recordTime: {n}")))?,
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| Error::Validation(format!("malformed recordTime: {s:?}")))?,
        other => {
            return Err(Error::Validation(format!(
                "malformed recordTime: {other}"
            )))
        }
    };

    match Utc.timestamp_millis_opt(millis) {
        chrono::LocalResult::Single(ts) => Ok(ts),
        _ => Err(Error::Validation(format!(
            "recordTime out of range: {millis}"
        ))),
    }
}
