// ABOUTME: Periodic key rotation scheduler driving the key update publisher
// ABOUTME: Interval ticker with a cooperative, idempotent and non-blocking stop
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

use super::publisher::KeyUpdatePublisher;
use super::{shutdown_channel, BackgroundTask};
use crate::errors::{AppError, AppResult};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next tick
    Idle,
    /// A rotation is in flight
    Running,
    /// The loop has exited
    Stopped,
}

impl SchedulerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Rotation timer; the first rotation happens one full interval after start
#[derive(Debug)]
pub struct KeyRotationScheduler {
    state: Arc<AtomicU8>,
    task: BackgroundTask,
    interval: Duration,
}

impl KeyRotationScheduler {
    /// Spawn the rotation loop
    ///
    /// A rotation that has started always runs to completion; stop requests
    /// are only observed between ticks.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero interval
    pub fn start(publisher: Arc<KeyUpdatePublisher>, interval: Duration) -> AppResult<Self> {
        if interval.is_zero() {
            return Err(AppError::invalid_input(
                "Key rotation interval must be greater than zero",
            ));
        }

        let state = Arc::new(AtomicU8::new(SchedulerState::Idle as u8));
        let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
        let loop_state = Arc::clone(&state);

        info!("Starting key rotation scheduler with interval {:?}", interval);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        debug!("Key rotation scheduler received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                loop_state.store(SchedulerState::Running as u8, Ordering::SeqCst);
                info!("Scheduled key rotation triggered");
                match publisher.rotate().await {
                    Ok(outcome) => info!(
                        key_version = outcome.key_version,
                        "Scheduled key rotation completed"
                    ),
                    Err(e) => error!("Scheduled key rotation failed: {}", e),
                }
                loop_state.store(SchedulerState::Idle as u8, Ordering::SeqCst);
            }

            loop_state.store(SchedulerState::Stopped as u8, Ordering::SeqCst);
            info!("Key rotation scheduler stopped");
        });

        Ok(Self {
            state,
            task: BackgroundTask::new("key-rotation-scheduler", shutdown_tx, handle),
            interval,
        })
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Rotation period
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Request stop; returns immediately and may be called repeatedly
    pub fn stop(&self) {
        self.task.stop();
    }

    /// Stop and wait for an in-flight rotation to finish
    pub async fn shutdown(self) {
        self.task.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_decoding() {
        assert_eq!(SchedulerState::from_u8(0), SchedulerState::Idle);
        assert_eq!(SchedulerState::from_u8(1), SchedulerState::Running);
        assert_eq!(SchedulerState::from_u8(2), SchedulerState::Stopped);
    }
}
