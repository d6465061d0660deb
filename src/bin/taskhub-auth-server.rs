// ABOUTME: TaskHub auth server binary running the issuer, gateway or both roles
// ABOUTME: Loads env configuration, wires resources, serves HTTP and shuts down background tasks on Ctrl-C
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

//! # TaskHub Auth Server Binary
//!
//! `issuer` signs tokens and rotates keys, `gateway` only verifies,
//! `standalone` runs both in one process.

use anyhow::{Context, Result};
use axum::extract::Request;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use taskhub_auth::{
    auth::InMemoryCredentialsProvider,
    config::environment::ServerConfig,
    logging,
    middleware::create_request_span,
    resources::{ServerResources, ServerRole},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "taskhub-auth-server",
    about = "TaskHub distributed authentication server"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Override HTTP port
    #[arg(long, global = true)]
    http_port: Option<u16>,

    /// Seed a login user as `email:password:perm1,perm2` (repeatable)
    #[arg(long = "user", global = true)]
    users: Vec<String>,
}

#[non_exhaustive]
#[derive(Subcommand)]
enum Command {
    /// Own the signing key, serve login and rotate keys
    Issuer,
    /// Verify tokens with keys received from the issuer
    Gateway,
    /// Run issuer and gateway in one process
    Standalone,
}

impl Command {
    const fn role(&self) -> ServerRole {
        match self {
            Self::Issuer => ServerRole::Issuer,
            Self::Gateway => ServerRole::Gateway,
            Self::Standalone => ServerRole::Standalone,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = cli.http_port {
        config.http_port = http_port;
    }

    logging::init_from_env()?;

    let role = cli.command.role();
    info!(role = role.as_str(), "Starting TaskHub auth server");
    info!("{}", config.summary());

    let credentials = Arc::new(InMemoryCredentialsProvider::new());
    for spec in &cli.users {
        let (email, password, permissions) = parse_user_spec(spec)?;
        let user = credentials.add_user(email, password, permissions)?;
        info!(user_id = %user.user_id, email = %user.email, "Seeded login user");
    }

    let port = config.http_port;
    let resources = ServerResources::build(config, role, credentials).await?;

    let app = resources
        .router()
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| create_request_span(req)));

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind HTTP port {port}"))?;
    info!(port, "HTTP server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    resources.shutdown().await;

    if let Err(e) = served {
        error!("HTTP server error: {}", e);
        return Err(e.into());
    }
    info!("Server stopped");
    Ok(())
}

fn parse_user_spec(spec: &str) -> Result<(&str, &str, Vec<String>)> {
    let mut parts = spec.splitn(3, ':');
    let (Some(email), Some(password)) = (parts.next(), parts.next()) else {
        anyhow::bail!("Invalid --user value, expected email:password[:perm1,perm2]");
    };
    let permissions = parts
        .next()
        .map(|perms| {
            perms
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();
    Ok((email, password, permissions))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
