//! Broker implementation appending outbox payloads to a Redis stream.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::StreamMaxlen;
use redis::AsyncCommands;
use tracing::{debug, instrument};

use crate::domain::entities::{event_fields, MessageEvent};
use crate::domain::ports::{Broker, BrokerMessage};
use crate::shared::error::AppError;

/// Field holding the broker key (the outbox record id) next to the event fields.
pub const FIELD_KEY: &str = "key";

#[derive(Clone)]
pub struct RedisStreamBroker {
    conn: ConnectionManager,
    stream_name: String,
    max_len: usize,
}

impl RedisStreamBroker {
    pub fn new(conn: ConnectionManager, stream_name: impl Into<String>, max_len: usize) -> Self {
        Self {
            conn,
            stream_name: stream_name.into(),
            max_len,
        }
    }
}

#[async_trait]
impl Broker for RedisStreamBroker {
    #[instrument(skip_all, fields(stream = %self.stream_name))]
    async fn publish(&self, message: BrokerMessage) -> Result<(), AppError> {
        let event = MessageEvent::from_bytes(&message.value)?;
        let key = String::from_utf8_lossy(&message.key).into_owned();

        let mut items = Vec::with_capacity(6);
        items.push((FIELD_KEY, key));
        items.extend(event_fields(&event));

        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd_maxlen(
                &self.stream_name,
                StreamMaxlen::Approx(self.max_len),
                "*",
                &items,
            )
            .await?;

        debug!(entry_id = %id, chat_id = %event.chat_id, "Event appended to stream");
        Ok(())
    }
}
