//! Application Startup
//!
//! Builds the enabled components, serves HTTP until SIGINT/SIGTERM, then
//! stops everything in reverse dependency order: HTTP server, hub, outbox
//! relays, ingest pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::application::ingest::{IngestConfig, IngestPipeline, PipelineHandle};
use crate::application::outbox::{OutboxProcessor, OutboxRelay, RelayConfig, RelayHandle};
use crate::application::services::MessageServiceImpl;
use crate::config::Settings;
use crate::infrastructure::database::{self, PgUnitOfWork};
use crate::infrastructure::repositories::{PgMessageRepository, PgOutboxRepository};
use crate::infrastructure::streams::{self, RedisMessageStream, RedisStreamBroker};
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::middleware::create_cors_layer;
use crate::presentation::websocket::{
    ConnectionHub, HubConfig, OperationKind, OperationRouter, SendMessageHandler, WsState,
};

/// How much slower the failed-row relay polls than the pending-row relay.
const FAILED_RELAY_SLOWDOWN: u32 = 10;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: ConnectionManager,
    pub hub: Option<ConnectionHub>,
    pub settings: Arc<Settings>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    hub: Option<ConnectionHub>,
    relays: Vec<(RelayHandle, RelayConfig)>,
    ingest: Option<PipelineHandle>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        health::init_server_start();

        let db = database::create_pool(&settings.database).await?;
        tracing::info!("Database connection pool created");
        database::run_migrations(&db).await?;

        let redis = streams::create_redis_client(&settings.redis).await?;

        let unit_of_work = Arc::new(PgUnitOfWork::new(db.clone()));
        let outbox = Arc::new(PgOutboxRepository::new());

        let hub = if settings.components.ws_server {
            let hub = ConnectionHub::new(HubConfig::from(&settings.hub));
            let service = Arc::new(MessageServiceImpl::new(
                unit_of_work.clone(),
                outbox.clone(),
                Arc::new(hub.broadcaster()),
                settings.outbox.entity_name.clone(),
            ));
            let router = OperationRouter::new()
                .register(OperationKind::SendMessage, SendMessageHandler::new(service));
            hub.start(router)?;
            Some(hub)
        } else {
            None
        };

        let mut relays = Vec::new();
        if settings.components.outbox_processor {
            let broker = Arc::new(RedisStreamBroker::new(
                redis.clone(),
                settings.ingest.stream_name.clone(),
                settings.ingest.stream_max_len,
            ));
            let pending = RelayConfig::from(&settings.outbox);
            let mut configs = vec![pending.clone()];
            if settings.outbox.reprocess_failed {
                configs.push(pending.reprocessing_failed(FAILED_RELAY_SLOWDOWN));
            }
            for config in configs {
                let processor = Arc::new(OutboxProcessor::new(
                    unit_of_work.clone(),
                    outbox.clone(),
                    broker.clone(),
                    config.claim_filter(),
                ));
                relays.push((OutboxRelay::spawn(processor, &config), config));
            }
        }

        let ingest = if settings.components.ingest_worker {
            let pipeline = IngestPipeline::new(
                Arc::new(RedisMessageStream::new(redis.clone())),
                Arc::new(PgMessageRepository::new(db.clone())),
                IngestConfig::from(&settings.ingest),
            );
            Some(pipeline.start().await?)
        } else {
            None
        };

        let ws = hub.as_ref().map(|hub| WsState {
            hub: hub.clone(),
            jwt_secret: Arc::from(settings.jwt.secret.as_str()),
            max_message_size: settings.hub.max_message_size,
        });

        let state = AppState {
            db,
            redis,
            hub: hub.clone(),
            settings: Arc::new(settings.clone()),
        };

        let router = routes::create_router(state, ws).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(create_cors_layer(&settings.cors)),
        );

        let listener =
            TcpListener::bind((settings.server.host.as_str(), settings.server.port)).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            ws_server = settings.components.ws_server,
            outbox_relays = relays.len(),
            ingest_worker = settings.components.ingest_worker,
            "Listening"
        );

        Ok(Self {
            listener,
            router,
            hub,
            relays,
            ingest,
        })
    }

    /// Run the server until a termination signal, then stop every component.
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        tracing::info!("HTTP server stopped");

        if let Some(hub) = self.hub {
            if let Err(e) = hub.shutdown().await {
                tracing::warn!(error = %e, "Hub shutdown incomplete");
            }
        }

        for (relay, config) in self.relays {
            relay.stop(config.tick_timeout).await;
        }

        if let Some(ingest) = self.ingest {
            ingest.shutdown().await?;
        }

        tracing::info!("Shutdown complete");
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
