// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resilient client: heartbeats, backoff reconnection, re-registration.
//!
//! Wraps [`DaemonClient`] for long-lived callers (PTY overlays, watchers).
//! A heartbeat loop pings the daemon; three consecutive failures tear the
//! connection down and enter an exponential-backoff reconnect loop. On
//! success the `on_reconnect` hook runs so the caller can re-register its
//! sessions and overlays with the fresh daemon.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ClientConfig, ClientError, DaemonClient};

/// Heartbeat failures in a row before reconnecting.
const HEARTBEAT_STRIKES: u32 = 3;

/// Async hook invoked with the freshly connected client.
pub type ConnectHook =
    Arc<dyn Fn(Arc<DaemonClient>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Hook invoked when reconnection gives up for good.
pub type FailureHook = Arc<dyn Fn() + Send + Sync>;

/// Hook invoked on a version mismatch with `(daemon_version, client_version)`.
/// Returning normally means the caller accepted the mismatch.
pub type VersionHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Resilient client configuration.
#[derive(Clone)]
pub struct ResilientConfig {
    pub client: ClientConfig,
    pub heartbeat_interval: Duration,
    /// Per-attempt deadline for one heartbeat PING.
    pub heartbeat_timeout: Duration,
    pub reconnect_backoff_min: Duration,
    pub reconnect_backoff_max: Duration,
    /// Consecutive failed reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl ResilientConfig {
    pub fn new(client: ClientConfig) -> Self {
        Self {
            client,
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(2),
            reconnect_backoff_min: Duration::from_millis(500),
            reconnect_backoff_max: Duration::from_secs(30),
            max_reconnect_attempts: 10,
        }
    }
}

/// Optional lifecycle hooks.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Runs after every successful reconnect so the caller can re-register
    /// overlays and sessions; the initial connect does not fire it.
    pub on_reconnect: Option<ConnectHook>,
    pub on_reconnect_failed: Option<FailureHook>,
    /// When absent, a version mismatch sends SHUTDOWN and fails so the next
    /// connect auto-starts the new binary.
    pub on_version_mismatch: Option<VersionHook>,
}

struct Inner {
    config: ResilientConfig,
    hooks: Hooks,
    client: RwLock<Option<Arc<DaemonClient>>>,
    shutdown: CancellationToken,
}

/// A client that keeps itself connected.
pub struct ResilientClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient").finish_non_exhaustive()
    }
}

impl ResilientClient {
    /// Connect (auto-starting the daemon if needed), verify the version,
    /// and start the heartbeat loop.
    pub async fn connect(config: ResilientConfig, hooks: Hooks) -> Result<Self, ClientError> {
        let client = Self::establish(&config, &hooks).await?;

        let inner = Arc::new(Inner {
            config,
            hooks,
            client: RwLock::new(Some(client)),
            shutdown: CancellationToken::new(),
        });

        let this = Self {
            inner: Arc::clone(&inner),
        };
        tokio::spawn(heartbeat_loop(inner));
        Ok(this)
    }

    /// Connect once and apply the version-mismatch policy.
    async fn establish(
        config: &ResilientConfig,
        hooks: &Hooks,
    ) -> Result<Arc<DaemonClient>, ClientError> {
        // Version checking is handled here so the mismatch policy can run.
        let mut client_config = config.client.clone();
        let expected = client_config.expected_version.take();
        let client = DaemonClient::connect_or_start(client_config).await?;

        if let Some(expected) = expected {
            let info = client.info().await?;
            if info.version != expected {
                match &hooks.on_version_mismatch {
                    Some(hook) => {
                        // The caller decides; we stay connected.
                        hook(&info.version, &expected);
                    }
                    None => {
                        warn!(
                            daemon = %info.version,
                            client = %expected,
                            "version mismatch, asking daemon to shut down"
                        );
                        client.shutdown().await.ok();
                        return Err(ClientError::VersionMismatch {
                            daemon: info.version,
                            client: expected,
                        });
                    }
                }
            }
        }
        Ok(Arc::new(client))
    }

    /// The current client, absent while a reconnect is in progress or after
    /// reconnection gave up.
    pub async fn client(&self) -> Option<Arc<DaemonClient>> {
        self.inner.client.read().await.clone()
    }

    /// Stop the heartbeat and reconnect machinery.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Drop for ResilientClient {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

async fn heartbeat_loop(inner: Arc<Inner>) {
    let mut strikes = 0u32;
    let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so a fresh connection is
    // not pinged the moment it is established.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let client = inner.client.read().await.clone();
        let Some(client) = client else {
            return;
        };

        let beat = tokio::time::timeout(inner.config.heartbeat_timeout, client.ping()).await;
        match beat {
            Ok(Ok(())) => {
                strikes = 0;
            }
            Ok(Err(e)) => {
                strikes += 1;
                debug!(strikes, error = %e, "heartbeat failed");
            }
            Err(_) => {
                strikes += 1;
                debug!(strikes, "heartbeat timed out");
            }
        }

        if strikes >= HEARTBEAT_STRIKES {
            warn!("daemon unresponsive, reconnecting");
            if !reconnect(&inner).await {
                return;
            }
            strikes = 0;
        }
    }
}

/// Reconnect with exponential backoff. Returns false when giving up.
async fn reconnect(inner: &Arc<Inner>) -> bool {
    // Drop the dead connection so concurrent callers fail fast.
    if let Some(old) = inner.client.write().await.take() {
        drop(old);
    }

    let mut backoff = inner.config.reconnect_backoff_min;
    for attempt in 1..=inner.config.max_reconnect_attempts {
        tokio::select! {
            _ = inner.shutdown.cancelled() => return false,
            _ = tokio::time::sleep(backoff) => {}
        }

        match ResilientClient::establish(&inner.config, &inner.hooks).await {
            Ok(client) => {
                info!(attempt, "reconnected to daemon");
                *inner.client.write().await = Some(Arc::clone(&client));
                if let Some(hook) = &inner.hooks.on_reconnect {
                    hook(client).await;
                }
                return true;
            }
            Err(e) => {
                debug!(attempt, error = %e, "reconnect attempt failed");
                backoff = (backoff * 2).min(inner.config.reconnect_backoff_max);
            }
        }
    }

    warn!("reconnection gave up");
    if let Some(hook) = &inner.hooks.on_reconnect_failed {
        hook();
    }
    false
}

#[cfg(test)]
#[path = "resilient_tests.rs"]
mod tests;
