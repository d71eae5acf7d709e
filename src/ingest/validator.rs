//! Event Validator
//!
//! Schema and range checks on inbound events. Accepting is pure; a rejection
//! is logged with its reason code and the event never reaches the store.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::ingest::registry::{FieldKind, PayloadRegistry};
use crate::models::event::{RawEvent, TelemetryEvent, payload_hash};
use crate::models::session::{Session, SessionStatus};

/// Why an inbound event was refused
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RejectReason {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session {session_id} is already {}", status.as_str())]
    SessionTerminal {
        session_id: String,
        status: SessionStatus,
    },

    #[error("Malformed event: {message}")]
    MalformedEvent { message: String },

    #[error("Unknown event type: {event_type}")]
    UnknownEventType { event_type: String },

    #[error("Event payload must be a JSON object")]
    PayloadNotObject,

    #[error("Required field '{field}' is missing")]
    MissingField { field: String },

    #[error("Field '{field}' must be {expected}")]
    FieldTypeMismatch { field: String, expected: FieldKind },

    #[error("Field '{field}' is out of range: {value}")]
    FieldOutOfRange { field: String, value: f64 },

    #[error("Timestamp {timestamp} is not a valid millisecond timestamp")]
    InvalidTimestamp { timestamp: i64 },

    #[error("Timestamp is {ahead_ms}ms in the future (tolerance: {tolerance_ms}ms)")]
    FutureTimestamp { ahead_ms: i64, tolerance_ms: i64 },

    #[error("Event store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Session {session_id} is saturated, retry after {retry_after_ms}ms")]
    Backpressure {
        session_id: String,
        retry_after_ms: u64,
    },
}

impl RejectReason {
    /// Stable machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound { .. } => "session_not_found",
            Self::SessionTerminal { .. } => "session_terminal",
            Self::MalformedEvent { .. } => "malformed_event",
            Self::UnknownEventType { .. } => "unknown_event_type",
            Self::PayloadNotObject => "payload_not_object",
            Self::MissingField { .. } => "missing_field",
            Self::FieldTypeMismatch { .. } => "field_type_mismatch",
            Self::FieldOutOfRange { .. } => "field_out_of_range",
            Self::InvalidTimestamp { .. } => "invalid_timestamp",
            Self::FutureTimestamp { .. } => "future_timestamp",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::Backpressure { .. } => "backpressure",
        }
    }

    /// Error taxonomy bucket the reason belongs to
    pub fn category(&self) -> &'static str {
        match self {
            Self::SessionNotFound { .. } => "SessionNotFound",
            Self::SessionTerminal { .. } => "SessionTerminal",
            Self::StoreUnavailable { .. } => "StoreUnavailable",
            Self::Backpressure { .. } => "Backpressure",
            _ => "ValidationError",
        }
    }

    /// Whether resending the same event later can succeed
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::Backpressure { .. }
        )
    }
}

/// Event validator bound to one configuration snapshot
#[derive(Debug, Clone)]
pub struct EventValidator {
    registry: Arc<PayloadRegistry>,
    future_tolerance: Duration,
}

impl EventValidator {
    pub fn new(registry: Arc<PayloadRegistry>, future_tolerance_ms: i64) -> Self {
        Self {
            registry,
            future_tolerance: Duration::milliseconds(future_tolerance_ms),
        }
    }

    /// Decode one event envelope from untyped JSON
    ///
    /// Batches carry their events as raw JSON so a single broken envelope
    /// is reported at its own index instead of failing the whole request.
    pub fn decode(value: Value) -> Result<RawEvent, RejectReason> {
        serde_json::from_value(value).map_err(|e| {
            let reason = RejectReason::MalformedEvent {
                message: e.to_string(),
            };
            warn!(code = reason.code(), "Rejected telemetry event: {}", reason);
            reason
        })
    }

    /// Validate and normalize an inbound event
    ///
    /// The returned event has sequence 0; the ingestion service assigns the
    /// real sequence number when the event is stored.
    pub fn validate(
        &self,
        session_id: &str,
        session: Option<&Session>,
        raw: &RawEvent,
        now: DateTime<Utc>,
    ) -> Result<TelemetryEvent, RejectReason> {
        let result = self.check(session_id, session, raw, now);
        if let Err(reason) = &result {
            warn!(
                session_id = %session_id,
                event_type = %raw.event_type,
                code = reason.code(),
                "Rejected telemetry event: {}",
                reason
            );
        }
        result
    }

    fn check(
        &self,
        session_id: &str,
        session: Option<&Session>,
        raw: &RawEvent,
        now: DateTime<Utc>,
    ) -> Result<TelemetryEvent, RejectReason> {
        let session = session.ok_or_else(|| RejectReason::SessionNotFound {
            session_id: session_id.to_string(),
        })?;

        if session.status.is_terminal() {
            return Err(RejectReason::SessionTerminal {
                session_id: session_id.to_string(),
                status: session.status,
            });
        }

        let (event_type, payload) = self.registry.parse(&raw.event_type, &raw.payload)?;

        let timestamp = DateTime::from_timestamp_millis(raw.timestamp).ok_or(
            RejectReason::InvalidTimestamp {
                timestamp: raw.timestamp,
            },
        )?;

        let ahead = timestamp - now;
        if ahead > self.future_tolerance {
            return Err(RejectReason::FutureTimestamp {
                ahead_ms: ahead.num_milliseconds(),
                tolerance_ms: self.future_tolerance.num_milliseconds(),
            });
        }

        Ok(TelemetryEvent {
            session_id: session_id.to_string(),
            event_type,
            timestamp,
            payload,
            payload_hash: payload_hash(&raw.payload),
            sequence: 0,
            received_at: now,
            late: false,
        })
    }
}
