// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed human-readable duration parsing for scheduling commands.

use std::time::Duration;

use thiserror::Error;

/// Errors from [`parse_signed_duration`].
#[derive(Debug, Error, PartialEq)]
pub enum DurationError {
    #[error("invalid duration {input:?}: {message}")]
    Invalid { input: String, message: String },

    #[error("duration must be positive, got {0:?}")]
    NotPositive(String),
}

/// Parse a human-readable duration such as `5m`, `200ms`, or `1h30m`.
///
/// A leading sign is accepted so callers get a precise error for negative
/// input; zero and negative durations are rejected.
pub fn parse_signed_duration(input: &str) -> Result<Duration, DurationError> {
    let trimmed = input.trim();

    if let Some(rest) = trimmed.strip_prefix('-') {
        // Validate the magnitude so `-bogus` reports the parse error instead.
        humantime::parse_duration(rest).map_err(|e| DurationError::Invalid {
            input: input.to_string(),
            message: e.to_string(),
        })?;
        return Err(DurationError::NotPositive(input.to_string()));
    }

    let parsed = humantime::parse_duration(trimmed.strip_prefix('+').unwrap_or(trimmed)).map_err(
        |e| DurationError::Invalid {
            input: input.to_string(),
            message: e.to_string(),
        },
    )?;

    if parsed.is_zero() {
        return Err(DurationError::NotPositive(input.to_string()));
    }

    Ok(parsed)
}

#[cfg(test)]
#[path = "duration_tests.rs"]
mod tests;
