// ABOUTME: Resource container wiring key rotation, key distribution, sessions and limiters per server role
// ABOUTME: Owns the background tasks and builds the axum router for issuer, gateway and standalone roles
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! # Server Resources
//!
//! Centralized resource container for dependency injection. Every role runs
//! exactly one key update consumer feeding its registry; the issuer roles
//! additionally own the private key store, the publisher and the rotation
//! scheduler.

use crate::auth::{AuthService, CredentialsProvider, TokenIssuer, TokenVerifier};
use crate::broker::{create_key_broker, KeyBroker};
use crate::config::ServerConfig;
use crate::constants::keys::{RETENTION_SWEEP_INTERVAL_SECS, VERSION_FILE};
use crate::errors::{AppError, AppResult};
use crate::keys::{
    shutdown_channel, BackgroundTask, KeyRotationScheduler, KeyUpdateConsumer, KeyUpdatePublisher,
    KeyVersionRecord, KeyVersionStore, PublicKeyRegistry,
};
use crate::middleware::AuthGate;
use crate::models::KeyUpdateMessage;
use crate::rate_limiting::{create_window_store, RateLimitPolicy, SlidingWindowRateLimiter};
use crate::routes::{AuthRoutes, AuthRoutesContext, HealthRoutes, KeyRoutes, KeyRoutesContext};
use crate::session::{create_session_store, SessionStore};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Which half of the system this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    /// Owns the private key, signs tokens, rotates keys
    Issuer,
    /// Verifies tokens only
    Gateway,
    /// Issuer and gateway in one process
    Standalone,
}

impl ServerRole {
    /// Role name for logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issuer => "issuer",
            Self::Gateway => "gateway",
            Self::Standalone => "standalone",
        }
    }

    /// Whether this role owns the private key
    #[must_use]
    pub const fn issues_tokens(self) -> bool {
        matches!(self, Self::Issuer | Self::Standalone)
    }
}

/// Issuer-only resources
#[derive(Clone)]
pub struct IssuerResources {
    /// Active private key and version counter
    pub store: Arc<KeyVersionStore>,
    /// Rotation entry point
    pub publisher: Arc<KeyUpdatePublisher>,
    /// Login and logout flows
    pub auth_service: Arc<AuthService>,
}

/// Shared resources of one server process
pub struct ServerResources {
    /// Loaded configuration
    pub config: Arc<ServerConfig>,
    /// Role of this process
    pub role: ServerRole,
    /// Key distribution broker
    pub broker: Arc<dyn KeyBroker>,
    /// Verifier-side public keys
    pub registry: Arc<PublicKeyRegistry>,
    /// Session store
    pub sessions: Arc<dyn SessionStore>,
    /// Verification gate
    pub gate: AuthGate,
    /// General API limiter
    pub api_limiter: SlidingWindowRateLimiter,
    /// Strict limiter for sensitive endpoints
    pub strict_limiter: SlidingWindowRateLimiter,
    /// Present for issuer roles
    pub issuer: Option<IssuerResources>,
    tasks: BackgroundTasks,
}

#[derive(Default)]
struct BackgroundTasks {
    consumer: Option<BackgroundTask>,
    scheduler: Option<KeyRotationScheduler>,
    retention: Option<BackgroundTask>,
}

impl ServerResources {
    /// Connect backends, load keys and start background tasks for `role`
    ///
    /// # Errors
    ///
    /// - `ConfigInvalid` for invalid configuration
    /// - `KeyMaterialError` if keys cannot be loaded or generated
    /// - `ConfigError` if a gateway finds no bootstrap key
    /// - `StoreUnavailable` if Redis is configured but unreachable for the
    ///   broker or session store
    pub async fn build(
        config: ServerConfig,
        role: ServerRole,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> AppResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let redis_url = config.redis_url.as_deref();

        let broker = create_key_broker(redis_url, &config.redis_connection).await?;
        let sessions = create_session_store(redis_url, &config.redis_connection).await?;

        let (api_limiter, strict_limiter) = Self::build_limiters(&config).await;

        let issuer = if role.issues_tokens() {
            Some(Self::build_issuer(&config, &broker, &sessions, credentials).await?)
        } else {
            None
        };

        let bootstrap = match &issuer {
            Some(issuer) => issuer.store.current_record().await,
            None => Self::gateway_bootstrap(&config, broker.as_ref()).await?,
        };
        let registry = Arc::new(PublicKeyRegistry::with_bootstrap(bootstrap)?);

        let gate = AuthGate::new(
            TokenVerifier::new(Arc::clone(&registry)),
            Arc::clone(&sessions),
            config.session.store_timeout(),
        );

        let mut tasks = BackgroundTasks {
            consumer: Some(
                KeyUpdateConsumer::new(
                    Arc::clone(&broker),
                    Arc::clone(&registry),
                    config.broker.topic.clone(),
                    config.broker.consumer_backoff(),
                )
                .start()
                .await,
            ),
            ..BackgroundTasks::default()
        };

        if let Some(issuer) = &issuer {
            if let Err(e) = issuer.publisher.announce_current().await {
                warn!("Could not announce current key at startup: {}", e);
            }
            if config.key_issuer.rotation_enabled {
                tasks.scheduler = Some(KeyRotationScheduler::start(
                    Arc::clone(&issuer.publisher),
                    config.key_issuer.rotation_interval(),
                )?);
            }
        }

        if config.token.key_retention_enabled {
            tasks.retention = Some(spawn_retention_sweep(
                Arc::clone(&registry),
                config.token.ttl(),
                Duration::from_secs(RETENTION_SWEEP_INTERVAL_SECS),
            ));
        }

        info!(
            role = role.as_str(),
            broker = broker.backend_name(),
            sessions = sessions.backend_name(),
            "Server resources ready"
        );

        Ok(Self {
            config,
            role,
            broker,
            registry,
            sessions,
            gate,
            api_limiter,
            strict_limiter,
            issuer,
            tasks,
        })
    }

    async fn build_limiters(
        config: &ServerConfig,
    ) -> (SlidingWindowRateLimiter, SlidingWindowRateLimiter) {
        let settings = &config.rate_limit;
        let store = create_window_store(
            config.redis_url.as_deref(),
            &config.redis_connection,
            settings.window(),
        )
        .await;

        let api = SlidingWindowRateLimiter::new(
            store,
            RateLimitPolicy::api(settings),
            settings.store_timeout(),
        );
        let strict = api.with_policy(RateLimitPolicy::strict(settings));
        (api, strict)
    }

    async fn build_issuer(
        config: &ServerConfig,
        broker: &Arc<dyn KeyBroker>,
        sessions: &Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> AppResult<IssuerResources> {
        let issuer_config = &config.key_issuer;
        let store = Arc::new(
            KeyVersionStore::load_or_bootstrap(
                &issuer_config.key_dir,
                issuer_config.rsa_key_bits,
                &issuer_config.service_name,
            )
            .await?,
        );

        let publisher = Arc::new(KeyUpdatePublisher::new(
            Arc::clone(&store),
            Arc::clone(broker),
            config.broker.topic.clone(),
            issuer_config.rsa_key_bits,
        ));

        let auth_service = Arc::new(AuthService::new(
            credentials,
            TokenIssuer::new(Arc::clone(&store), config.token.ttl()),
            Arc::clone(sessions),
        ));

        Ok(IssuerResources {
            store,
            publisher,
            auth_service,
        })
    }

    /// Initial verification key for a process without the private key
    async fn gateway_bootstrap(
        config: &ServerConfig,
        broker: &dyn KeyBroker,
    ) -> AppResult<KeyVersionRecord> {
        if let Some(path) = &config.token.bootstrap_public_key_path {
            return load_bootstrap_file(path).await;
        }

        let newest = broker
            .retained(&config.broker.topic)
            .await?
            .iter()
            .filter_map(|payload| match KeyUpdateMessage::from_payload(payload) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("Skipping unusable retained key update: {}", e);
                    None
                }
            })
            .max_by_key(|message| message.key_version);

        newest.map(KeyVersionRecord::from).ok_or_else(|| {
            AppError::config(
                "No bootstrap public key: set BOOTSTRAP_PUBLIC_KEY_PATH or start the issuer first",
            )
        })
    }

    /// Router for this role
    pub fn router(&self) -> Router {
        let health = HealthRoutes::routes(Arc::clone(&self.registry), self.role.as_str());

        match &self.issuer {
            Some(issuer) => health
                .merge(AuthRoutes::routes(AuthRoutesContext {
                    service: Arc::clone(&issuer.auth_service),
                    gate: self.gate.clone(),
                    api_limiter: self.api_limiter.clone(),
                    strict_limiter: self.strict_limiter.clone(),
                }))
                .merge(KeyRoutes::routes(KeyRoutesContext {
                    publisher: Arc::clone(&issuer.publisher),
                    gate: self.gate.clone(),
                    strict_limiter: self.strict_limiter.clone(),
                })),
            None => health.merge(AuthRoutes::gateway_routes(
                self.gate.clone(),
                self.api_limiter.clone(),
            )),
        }
    }

    /// Stop the scheduler, the consumer and the retention sweep
    ///
    /// An in-flight rotation completes before the scheduler exits.
    pub async fn shutdown(self) {
        let BackgroundTasks {
            consumer,
            scheduler,
            retention,
        } = self.tasks;

        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
        if let Some(consumer) = consumer {
            consumer.shutdown().await;
        }
        if let Some(retention) = retention {
            retention.shutdown().await;
        }
        info!(role = self.role.as_str(), "Background tasks stopped");
    }
}

#[derive(Deserialize)]
struct BootstrapVersion {
    version: u64,
}

/// Read a bootstrap public key; the version comes from a sibling version file, else 0
async fn load_bootstrap_file(path: &Path) -> AppResult<KeyVersionRecord> {
    let public_key_pem = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::config(format!(
            "Failed to read bootstrap public key {}: {e}",
            path.display()
        ))
    })?;

    let version_path = path
        .parent()
        .map_or_else(|| Path::new(VERSION_FILE).to_path_buf(), |dir| dir.join(VERSION_FILE));
    let version = match tokio::fs::read(&version_path).await {
        Ok(bytes) => serde_json::from_slice::<BootstrapVersion>(&bytes)
            .map(|v| v.version)
            .map_err(|e| {
                AppError::config_invalid(format!(
                    "Corrupt key version file {}: {e}",
                    version_path.display()
                ))
            })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Key version file {} missing, assuming version 0",
                version_path.display()
            );
            0
        }
        Err(e) => {
            return Err(AppError::config(format!(
                "Failed to read key version file {}: {e}",
                version_path.display()
            )))
        }
    };

    info!(key_version = version, path = %path.display(), "Loaded bootstrap public key");
    Ok(KeyVersionRecord {
        version,
        public_key_pem,
        issued_at: Utc::now(),
        issuer: String::new(),
    })
}

fn spawn_retention_sweep(
    registry: Arc<PublicKeyRegistry>,
    max_token_lifetime: chrono::Duration,
    every: Duration,
) -> BackgroundTask {
    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    let removed = registry.retire_superseded(max_token_lifetime).await;
                    if removed > 0 {
                        info!(removed, "Retired superseded public keys");
                    }
                }
            }
        }
    });
    BackgroundTask::new("key-retention", shutdown_tx, handle)
}
