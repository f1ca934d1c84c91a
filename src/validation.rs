// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Log Record Validation
//!
//! Gate in front of durable storage and the alert path. A record that breaks
//! any rule is never persisted and never alerted on.

use crate::log_record::LogRecord;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

pub const MAX_SERVICE_NAME_LEN: usize = 100;

/// One broken rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: &'static str,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Joins violations into one diagnostic line.
pub fn describe(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy)]
pub struct LogRecordValidator {
    max_service_name_len: usize,
    future_tolerance: Duration,
}

impl Default for LogRecordValidator {
    fn default() -> Self {
        Self {
            max_service_name_len: MAX_SERVICE_NAME_LEN,
            future_tolerance: Duration::minutes(5),
        }
    }
}

impl LogRecordValidator {
    pub fn validate(&self, record: &LogRecord) -> Result<(), Vec<FieldViolation>> {
        self.validate_at(record, Utc::now())
    }

    /// Validates against the receiver clock reading `now`.
    pub fn validate_at(
        &self,
        record: &LogRecord,
        now: DateTime<Utc>,
    ) -> Result<(), Vec<FieldViolation>> {
        let mut violations = Vec::new();

        if record.id.is_nil() {
            violations.push(FieldViolation {
                field: "id",
                message: "log id is required",
            });
        }

        if record.service_name.trim().is_empty() {
            violations.push(FieldViolation {
                field: "serviceName",
                message: "service name cannot be empty",
            });
        } else if record.service_name.chars().count() > self.max_service_name_len {
            violations.push(FieldViolation {
                field: "serviceName",
                message: "service name is too long",
            });
        }

        if record.message.trim().is_empty() {
            violations.push(FieldViolation {
                field: "message",
                message: "log message is missing",
            });
        }

        if record.timestamp > now + self.future_tolerance {
            violations.push(FieldViolation {
                field: "timestamp",
                message: "timestamp cannot be in the future",
            });
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
