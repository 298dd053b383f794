//! The kestrel server: configuration, logging and the HTTP application
//! around the `kestrel-op` provider core.
//!
//! [`build_app`] turns an [`AppConfig`] into a ready axum [`Router`];
//! [`KestrelServer`] binds it and serves until ctrl-c.

pub mod backend;
pub mod config;
pub mod observability;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use kestrel_op::http::{ProviderState, resume_path, router};
use kestrel_op::types::ClientValidationError;
use kestrel_op::{Endpoint, OpError, Provider};
use tower_http::trace::TraceLayer;

use crate::backend::TrustedHeaderBackend;
use crate::config::AppConfig;

/// Failures while assembling the application from configuration.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid client registration '{client_id}': {source}")]
    InvalidClient {
        client_id: String,
        #[source]
        source: ClientValidationError,
    },

    #[error(transparent)]
    Provider(#[from] OpError),
}

/// Builds the provider from configuration and registers the configured clients.
pub async fn build_provider(cfg: &AppConfig) -> Result<Provider, BuildError> {
    let authorization_path = &cfg.provider.endpoints.authorization;
    let resume_url = format!(
        "{}{}",
        cfg.provider.issuer.trim_end_matches('/'),
        resume_path(authorization_path)
    );
    let backend = TrustedHeaderBackend::new(&cfg.backend, cfg.users.clone(), resume_url);

    let provider = Provider::builder(cfg.provider.clone())
        .backend(Arc::new(backend))
        .build()?;

    for registration in &cfg.clients {
        let client = registration
            .to_client()
            .map_err(|source| BuildError::InvalidClient {
                client_id: registration.client_id.clone(),
                source,
            })?;
        provider.registry().register(client).await?;
        tracing::info!(client_id = %registration.client_id, "Client registered");
    }

    tracing::info!(
        issuer = %cfg.provider.issuer,
        clients = cfg.clients.len(),
        users = cfg.users.len(),
        "Provider ready"
    );
    Ok(provider)
}

/// Builds the provider and wraps its router in request tracing.
///
/// Each request gets an `http.request` span naming the endpoint it hit.
pub async fn build_app(cfg: &AppConfig) -> Result<Router, BuildError> {
    let provider = build_provider(cfg).await?;
    let endpoints = cfg.provider.endpoints.clone();
    let app = router(ProviderState::new(Arc::new(provider))).layer(
        TraceLayer::new_for_http().make_span_with(move |req: &axum::http::Request<_>| {
            let route = Endpoint::from_path(&endpoints, req.uri().path())
                .map_or("other", |e| e.as_str());
            tracing::info_span!(
                "http.request",
                http.method = %req.method(),
                http.target = %req.uri().path(),
                endpoint = route,
            )
        }),
    );
    Ok(app)
}

/// A configured server, ready to bind.
pub struct KestrelServer {
    addr: SocketAddr,
    app: Router,
}

impl KestrelServer {
    /// Assembles the application for `cfg`. The listen address comes from
    /// `server.host` and `server.port`.
    pub async fn new(cfg: &AppConfig) -> Result<Self, BuildError> {
        Ok(Self {
            addr: cfg.addr(),
            app: build_app(cfg).await?,
        })
    }

    /// Serves until ctrl-c, then drains in-flight requests.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
