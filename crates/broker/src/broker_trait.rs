use std::time::Duration;

use async_trait::async_trait;
use fleet_core::Result;

use crate::types::{ConsumerSpec, DeliveredMessage, KvEntry, StreamInfo, StreamMessage, StreamSpec};

/// The capability set every coordination component programs against.
/// Implemented by [`crate::nats::NatsBroker`] for production and by
/// [`crate::fake::FakeBroker`] for tests.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create the stream if absent; idempotent if it already matches.
    async fn ensure_stream(&self, spec: StreamSpec) -> Result<()>;

    /// Publish one message, returning the broker-assigned sequence.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<u64>;

    /// Stream metadata without consuming anything. Returns
    /// `Err(Error::StreamNotFound)` — distinct from other failures — when
    /// the stream has never been created.
    async fn stream_info(&self, stream_name: &str) -> Result<StreamInfo>;

    /// Non-destructive windowed read, newest-first. `before_seq` excludes
    /// messages at or after that sequence (pagination walks backward from
    /// the newest message).
    async fn stream_messages_reverse(
        &self,
        stream_name: &str,
        count: usize,
        before_seq: Option<u64>,
    ) -> Result<Vec<StreamMessage>>;

    /// Delete one message by sequence (used by DLQ retry/discard to remove
    /// an entry once it has been looked up by key).
    async fn delete_message(&self, stream_name: &str, seq: u64) -> Result<()>;

    async fn ensure_kv_bucket(&self, bucket: &str) -> Result<()>;
    async fn kv_get(&self, bucket: &str, key: &str) -> Result<Option<KvEntry>>;
    async fn kv_put(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<u64>;
    /// Compare-and-set: succeeds only if the current revision matches
    /// `expected_revision` (`None` means "key must not exist yet").
    async fn kv_put_if_revision(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        expected_revision: Option<u64>,
    ) -> Result<u64>;
    async fn kv_delete(&self, bucket: &str, key: &str) -> Result<()>;
    async fn kv_keys(&self, bucket: &str) -> Result<Vec<String>>;

    /// Create the durable pull consumer if absent; reused across calls for
    /// shared queues.
    async fn ensure_consumer(&self, stream_name: &str, spec: ConsumerSpec) -> Result<()>;

    /// Fetch up to `batch` messages, waiting at most `timeout`.
    async fn fetch(
        &self,
        stream_name: &str,
        consumer_name: &str,
        batch: usize,
        timeout: Duration,
    ) -> Result<Vec<DeliveredMessage>>;

    async fn ack(&self, stream_name: &str, consumer_name: &str, seq: u64) -> Result<()>;

    /// Release a transient (preview) consumer after use.
    async fn delete_consumer(&self, stream_name: &str, consumer_name: &str) -> Result<()>;
}
