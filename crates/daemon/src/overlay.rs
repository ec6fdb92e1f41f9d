// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort message delivery to a session's overlay endpoint.
//!
//! The endpoint is an opaque local socket path supplied by the session at
//! registration. Delivery writes the message bytes followed by a newline
//! and closes; failures are reported to the caller but never retried.

use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

/// Per-delivery timeout covering connect and write.
pub const DELIVER_TIMEOUT: Duration = Duration::from_secs(2);

/// Delivery errors.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("failed to connect to overlay endpoint {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write to overlay endpoint {endpoint}: {source}")]
    Write {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("overlay delivery to {0} timed out")]
    Timeout(String),
}

/// Deliver one message to an overlay endpoint.
pub async fn deliver(endpoint: &str, message: &str) -> Result<(), OverlayError> {
    tokio::time::timeout(DELIVER_TIMEOUT, async {
        let mut stream =
            UnixStream::connect(endpoint)
                .await
                .map_err(|e| OverlayError::Connect {
                    endpoint: endpoint.to_string(),
                    source: e,
                })?;
        stream
            .write_all(message.as_bytes())
            .await
            .map_err(|e| OverlayError::Write {
                endpoint: endpoint.to_string(),
                source: e,
            })?;
        stream
            .write_all(b"\n")
            .await
            .map_err(|e| OverlayError::Write {
                endpoint: endpoint.to_string(),
                source: e,
            })?;
        stream.shutdown().await.ok();
        Ok(())
    })
    .await
    .map_err(|_| OverlayError::Timeout(endpoint.to_string()))?
}

#[cfg(test)]
#[path = "overlay_tests.rs"]
mod tests;
