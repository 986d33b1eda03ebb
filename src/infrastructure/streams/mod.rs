//! Redis Streams adapters.
//!
//! ```text
//! OutboxProcessor --publish--> RedisStreamBroker --XADD--> [stream]
//!                                                            |
//!                    RedisMessageStream <--XREADGROUP/XACK---+
//! ```

mod consumer_group;
mod publisher;

pub use consumer_group::RedisMessageStream;
pub use publisher::RedisStreamBroker;

use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{info, instrument};

use crate::config::RedisSettings;

/// Creates a Redis connection manager with automatic reconnection.
#[instrument(skip(settings))]
pub async fn create_redis_client(
    settings: &RedisSettings,
) -> Result<ConnectionManager, redis::RedisError> {
    info!("Connecting to Redis...");
    let client = Client::open(settings.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    info!("Redis connection established");
    Ok(manager)
}
