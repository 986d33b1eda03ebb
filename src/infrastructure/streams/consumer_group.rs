//! Consumer-group reads over a Redis stream.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::domain::entities::{
    ConsumerGroup, MessageStream, StreamRecord, FIELD_CHAT_ID, FIELD_CONTENT, FIELD_EVENT,
    FIELD_TIMESTAMP, FIELD_USER_ID,
};
use crate::shared::error::AppError;

/// Read position that asks the group for entries never delivered to anyone.
const UNDELIVERED: &str = ">";

/// Interval between non-blocking reads while waiting out a `block` window.
///
/// The wait happens client-side so a long block never collides with the
/// multiplexed connection's response timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const KNOWN_FIELDS: [&str; 5] = [
    FIELD_EVENT,
    FIELD_USER_ID,
    FIELD_CHAT_ID,
    FIELD_CONTENT,
    FIELD_TIMESTAMP,
];

#[derive(Clone)]
pub struct RedisMessageStream {
    conn: ConnectionManager,
}

impl RedisMessageStream {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// One XREADGROUP at `position`: `>` claims new entries, any other id
    /// returns this consumer's pending entries after it.
    async fn read_once(
        &self,
        group: &ConsumerGroup,
        position: &str,
        count: usize,
    ) -> Result<Vec<StreamRecord>, AppError> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(&group.group, &group.consumer)
            .count(count);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[group.stream.as_str()], &[position], &options)
            .await?;

        Ok(reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .map(to_record)
            .collect())
    }
}

fn to_record(entry: StreamId) -> StreamRecord {
    let fields: HashMap<String, String> = KNOWN_FIELDS
        .iter()
        .filter_map(|name| {
            entry
                .get::<String>(name)
                .map(|value| (name.to_string(), value))
        })
        .collect();

    StreamRecord {
        id: entry.id,
        fields,
    }
}

#[async_trait]
impl MessageStream for RedisMessageStream {
    #[instrument(skip(self), fields(stream = %group.stream, group = %group.group))]
    async fn ensure_group(&self, group: &ConsumerGroup) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&group.stream, &group.group, "0")
            .await;

        match created {
            Ok(()) => {
                info!("Consumer group created");
                Ok(())
            }
            Err(err) if err.code() == Some("BUSYGROUP") => {
                debug!("Consumer group already exists");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn read_group(
        &self,
        group: &ConsumerGroup,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, AppError> {
        let deadline = Instant::now() + block;

        loop {
            let records = self.read_once(group, UNDELIVERED, count).await?;
            let now = Instant::now();
            if !records.is_empty() || now >= deadline {
                return Ok(records);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn read_pending(
        &self,
        group: &ConsumerGroup,
        after: &str,
        count: usize,
    ) -> Result<Vec<StreamRecord>, AppError> {
        self.read_once(group, after, count).await
    }

    async fn ack(&self, group: &ConsumerGroup, id: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(&group.stream, &group.group, &[id]).await?;
        Ok(())
    }
}
