//! Production [`Broker`] backed by NATS JetStream via `async-nats`.
//!
//! Grounded on the wasmCloud control-interface client's shape: a thin
//! builder around `async_nats::Client` plus a `jetstream::Context`, with
//! the KV bucket and stream handles resolved lazily and cached.

use std::collections::HashMap;
use std::time::Duration;

use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy as NatsDeliverPolicy};
use async_nats::jetstream::kv;
use async_nats::jetstream::stream::{Config as NatsStreamConfig, RetentionPolicy as NatsRetention};
use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use fleet_core::{Error, Result};
use futures::StreamExt;
use parking_lot::Mutex;

use crate::broker_trait::Broker;
use crate::types::{
    ConsumerSpec, DeliverPolicy, DeliveredMessage, KvEntry, RetentionPolicy, StreamInfo,
    StreamMessage, StreamSpec,
};

/// Connection to the broker, opened once and shared by every component.
pub struct NatsBroker {
    js: Context,
    kv_buckets: Mutex<HashMap<String, kv::Store>>,
    /// Messages handed out by `fetch` but not yet acked, keyed so `ack`
    /// (which this trait addresses by sequence, not by message handle) can
    /// find the underlying `async_nats` message to ack.
    pending_acks: Mutex<HashMap<(String, String, u64), async_nats::jetstream::Message>>,
}

impl NatsBroker {
    /// Open a connection. `url` selects TCP (`nats://`, `tls://`) vs
    /// WebSocket (`ws://`, `wss://`) the way `async-nats` already does by
    /// inspecting the scheme; this is a thin validation/logging layer on
    /// top.
    pub async fn connect(url: &str, user: Option<&str>, pass: Option<&str>) -> Result<Self> {
        let scheme_ok = ["nats://", "tls://", "ws://", "wss://"]
            .iter()
            .any(|s| url.starts_with(s));
        if !scheme_ok {
            return Err(Error::InvalidArgument(format!(
                "broker url {url:?} must use nats://, tls://, ws://, or wss://"
            )));
        }

        let mut options = async_nats::ConnectOptions::new();
        if let (Some(u), Some(p)) = (user, pass) {
            options = options.user_and_password(u.to_string(), p.to_string());
        }

        tracing::info!(url, "connecting to broker");
        let client = options
            .connect(url)
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        let js = jetstream::new(client);

        Ok(Self {
            js,
            kv_buckets: Mutex::new(HashMap::new()),
            pending_acks: Mutex::new(HashMap::new()),
        })
    }

    async fn bucket(&self, name: &str) -> Result<kv::Store> {
        if let Some(store) = self.kv_buckets.lock().get(name).cloned() {
            return Ok(store);
        }
        let store = self
            .js
            .create_key_value(kv::Config {
                bucket: name.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        self.kv_buckets.lock().insert(name.to_string(), store.clone());
        Ok(store)
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn ensure_stream(&self, spec: StreamSpec) -> Result<()> {
        let retention = match spec.retention {
            RetentionPolicy::Limits => NatsRetention::Limits,
            RetentionPolicy::WorkQueue => NatsRetention::WorkQueue,
        };
        self.js
            .get_or_create_stream(NatsStreamConfig {
                name: spec.name,
                subjects: spec.subjects,
                retention,
                max_messages: spec.max_messages.map(|v| v as i64).unwrap_or(-1),
                max_age: spec.max_age.unwrap_or_default(),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<u64> {
        let ack = self
            .js
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        Ok(ack.sequence)
    }

    async fn stream_info(&self, stream_name: &str) -> Result<StreamInfo> {
        let mut stream = self
            .js
            .get_stream(stream_name)
            .await
            .map_err(|_| Error::StreamNotFound(stream_name.to_string()))?;
        let info = stream
            .info()
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        Ok(StreamInfo {
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_seq: info.state.first_sequence,
            last_seq: info.state.last_sequence,
        })
    }

    async fn stream_messages_reverse(
        &self,
        stream_name: &str,
        count: usize,
        before_seq: Option<u64>,
    ) -> Result<Vec<StreamMessage>> {
        let mut stream = match self.js.get_stream(stream_name).await {
            Ok(s) => s,
            Err(_) => return Ok(Vec::new()),
        };
        let info = stream
            .info()
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        if info.state.messages == 0 {
            return Ok(Vec::new());
        }
        let ceiling = before_seq.unwrap_or(info.state.last_sequence + 1);
        let mut out = Vec::new();
        let mut seq = ceiling.saturating_sub(1);
        while out.len() < count && seq >= info.state.first_sequence && seq > 0 {
            if let Ok(raw) = stream.get_raw_message(seq).await {
                out.push(StreamMessage {
                    seq,
                    payload: raw.payload.to_vec(),
                });
            }
            seq -= 1;
        }
        Ok(out)
    }

    async fn delete_message(&self, stream_name: &str, seq: u64) -> Result<()> {
        let mut stream = self
            .js
            .get_stream(stream_name)
            .await
            .map_err(|_| Error::StreamNotFound(stream_name.to_string()))?;
        stream
            .delete_message(seq)
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn ensure_kv_bucket(&self, bucket: &str) -> Result<()> {
        self.bucket(bucket).await?;
        Ok(())
    }

    async fn kv_get(&self, bucket: &str, key: &str) -> Result<Option<KvEntry>> {
        let store = self.bucket(bucket).await?;
        match store
            .entry(key)
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?
        {
            Some(entry) => Ok(Some(KvEntry {
                value: entry.value.to_vec(),
                revision: entry.revision,
            })),
            None => Ok(None),
        }
    }

    async fn kv_put(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<u64> {
        let store = self.bucket(bucket).await?;
        store
            .put(key, value.into())
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))
    }

    async fn kv_put_if_revision(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        expected_revision: Option<u64>,
    ) -> Result<u64> {
        let store = self.bucket(bucket).await?;
        let result = match expected_revision {
            Some(rev) => store.update(key, value.into(), rev).await,
            None => store.create(key, value.into()).await,
        };
        result.map_err(|e| Error::Conflict(e.to_string()))
    }

    async fn kv_delete(&self, bucket: &str, key: &str) -> Result<()> {
        let store = self.bucket(bucket).await?;
        store
            .delete(key)
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))
    }

    async fn kv_keys(&self, bucket: &str) -> Result<Vec<String>> {
        let store = self.bucket(bucket).await?;
        let mut keys = store
            .keys()
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(key) = keys.next().await {
            if let Ok(k) = key {
                out.push(k);
            }
        }
        Ok(out)
    }

    async fn ensure_consumer(&self, stream_name: &str, spec: ConsumerSpec) -> Result<()> {
        let stream = self
            .js
            .get_stream(stream_name)
            .await
            .map_err(|_| Error::StreamNotFound(stream_name.to_string()))?;
        let deliver_policy = match spec.deliver_policy {
            DeliverPolicy::New => NatsDeliverPolicy::New,
            DeliverPolicy::All => NatsDeliverPolicy::All,
        };
        stream
            .get_or_create_consumer(
                &spec.durable_name.clone(),
                PullConfig {
                    durable_name: Some(spec.durable_name),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: spec.ack_wait,
                    max_deliver: spec.max_deliver as i64,
                    deliver_policy,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn fetch(
        &self,
        stream_name: &str,
        consumer_name: &str,
        batch: usize,
        timeout: Duration,
    ) -> Result<Vec<DeliveredMessage>> {
        let stream = self
            .js
            .get_stream(stream_name)
            .await
            .map_err(|_| Error::StreamNotFound(stream_name.to_string()))?;
        let consumer: async_nats::jetstream::consumer::PullConsumer = stream
            .get_consumer(consumer_name)
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        let mut batch_stream = consumer
            .batch()
            .max_messages(batch)
            .expires(timeout)
            .messages()
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(msg) = batch_stream.next().await {
            let msg = msg.map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
            let info = msg
                .info()
                .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
            let seq = info.stream_sequence;
            out.push(DeliveredMessage {
                seq,
                payload: msg.payload.to_vec(),
                delivered_count: info.delivered as u32,
            });
            self.pending_acks.lock().insert(
                (stream_name.to_string(), consumer_name.to_string(), seq),
                msg,
            );
        }
        Ok(out)
    }

    async fn ack(&self, stream_name: &str, consumer_name: &str, seq: u64) -> Result<()> {
        let msg = self
            .pending_acks
            .lock()
            .remove(&(stream_name.to_string(), consumer_name.to_string(), seq));
        if let Some(msg) = msg {
            msg.ack()
                .await
                .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    async fn delete_consumer(&self, stream_name: &str, consumer_name: &str) -> Result<()> {
        let stream = self
            .js
            .get_stream(stream_name)
            .await
            .map_err(|_| Error::StreamNotFound(stream_name.to_string()))?;
        stream
            .delete_consumer(consumer_name)
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        Ok(())
    }
}
