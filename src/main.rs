//! # Chat Core
//!
//! Entry point. Depending on `components.*`, one process runs any of:
//! - the WebSocket connection hub and its HTTP surface
//! - the outbox relay publishing recorded messages to the stream
//! - the ingest worker persisting stream entries in batches

use anyhow::Result;
use tracing::info;

use chat_core::config::Settings;
use chat_core::startup::Application;
use chat_core::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Settings first: the log format is part of them
    let settings = Settings::load()?;
    telemetry::init_tracing(telemetry::wants_json(&settings.log_format));

    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        ws_server = settings.components.ws_server,
        outbox_processor = settings.components.outbox_processor,
        ingest_worker = settings.components.ingest_worker,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Chat core ready");
    application.run_until_stopped().await?;

    Ok(())
}
