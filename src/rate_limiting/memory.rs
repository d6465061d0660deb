// ABOUTME: In-memory scored-set window store for the sliding-window rate limiter
// ABOUTME: Emulates sorted-set pruning and key TTLs, with a background sweep of idle windows
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::WindowStore;
use crate::errors::AppResult;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct Window {
    // (score, member), appended in arrival order
    members: Vec<(i64, String)>,
    expires_at: Option<Instant>,
}

impl Window {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory window store; clones share state
#[derive(Clone, Default)]
pub struct InMemoryWindowStore {
    windows: Arc<DashMap<String, Window>>,
    shutdown_tx: Option<Arc<mpsc::Sender<()>>>,
}

impl InMemoryWindowStore {
    /// Store without background cleanup; expired windows are dropped on access
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that also sweeps expired windows every `interval`
    #[must_use]
    pub fn with_cleanup(interval: Duration) -> Self {
        let windows: Arc<DashMap<String, Window>> = Arc::new(DashMap::new());
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let sweep_windows = Arc::clone(&windows);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let before = sweep_windows.len();
                        sweep_windows.retain(|_, window| !window.is_expired(now));
                        let removed = before.saturating_sub(sweep_windows.len());
                        if removed > 0 {
                            tracing::debug!("Swept {} idle rate limit windows", removed);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Rate limit window sweep received shutdown signal");
                        break;
                    }
                }
            }
        });

        Self {
            windows,
            shutdown_tx: Some(Arc::new(shutdown_tx)),
        }
    }

    /// Number of tracked windows
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no window is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Stop the background sweep, if any
    pub fn shutdown(&self) {
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.try_send(());
        }
    }
}

#[async_trait::async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn prune_and_count(&self, key: &str, window_start_nanos: i64) -> AppResult<u64> {
        let now = Instant::now();
        let Some(mut window) = self.windows.get_mut(key) else {
            return Ok(0);
        };

        if window.is_expired(now) {
            drop(window);
            self.windows.remove(key);
            return Ok(0);
        }

        window
            .members
            .retain(|(score, _)| *score > window_start_nanos);
        Ok(window.members.len() as u64)
    }

    async fn record(
        &self,
        key: &str,
        member: &str,
        score_nanos: i64,
        ttl: Duration,
    ) -> AppResult<()> {
        let mut window = self.windows.entry(key.to_owned()).or_default();
        window.members.push((score_nanos, member.to_owned()));
        window.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
