// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Log Record
//!
//! The structured log event exchanged between services. On the wire it is a
//! UTF-8 JSON object:
//!
//! ```json
//! {"id":"…uuid…","serviceName":"ProducerService","message":"Task #1 created",
//!  "type":"Info","stackTrace":null,"timestamp":"2025-01-01T00:00:00Z"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Closed set of severities. Serialized by name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Stable name used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Critical => "Critical",
        }
    }

    /// Lowercase form used as the first word of a routing key.
    pub fn as_routing_word(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// Whether records of this severity belong on the alert path.
    pub fn is_alerting(&self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_routing_word())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    #[serde(default, alias = "Id")]
    pub id: Uuid,
    #[serde(default, alias = "ServiceName")]
    pub service_name: String,
    #[serde(default, alias = "Message")]
    pub message: String,
    #[serde(rename = "type", default, alias = "Type")]
    pub severity: Severity,
    #[serde(default, alias = "StackTrace")]
    pub stack_trace: Option<String>,
    #[serde(alias = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Creates a record stamped with a fresh identifier and the current time.
    pub fn new(service_name: &str, message: &str, severity: Severity) -> Self {
        LogRecord {
            id: Uuid::new_v4(),
            service_name: service_name.to_owned(),
            message: message.to_owned(),
            severity,
            stack_trace: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_stack_trace(mut self, detail: impl Into<String>) -> Self {
        self.stack_trace = Some(detail.into());
        self
    }

    pub fn routing_key(&self) -> String {
        crate::routing::routing_key(self.severity, &self.service_name)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
