//! In-memory [`Broker`] implementation used by every other crate's test
//! suite, so unit tests never require a live NATS server.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fleet_core::{Error, Result};
use parking_lot::Mutex;

use crate::broker_trait::Broker;
use crate::types::{
    ConsumerSpec, DeliverPolicy, DeliveredMessage, KvEntry, RetentionPolicy, StreamInfo,
    StreamMessage, StreamSpec,
};

struct StoredMessage {
    seq: u64,
    payload: Vec<u8>,
}

struct StreamState {
    spec: StreamSpec,
    messages: VecDeque<StoredMessage>,
    next_seq: u64,
}

struct PendingDelivery {
    seq: u64,
    payload: Vec<u8>,
    delivered_count: u32,
    delivered_at: Instant,
}

struct ConsumerState {
    spec: ConsumerSpec,
    /// Next un-delivered sequence for this consumer's forward cursor.
    cursor: u64,
    /// Messages delivered but not yet acked.
    pending: Vec<PendingDelivery>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, StreamState>,
    kv: HashMap<String, HashMap<String, KvEntry>>,
    consumers: HashMap<(String, String), ConsumerState>,
}

/// In-memory broker. Fully synchronous under the hood (a `parking_lot::Mutex`)
/// but exposed through the same `async` trait as the real adapter.
#[derive(Default)]
pub struct FakeBroker {
    inner: Mutex<Inner>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn ensure_stream(&self, spec: StreamSpec) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.streams.entry(spec.name.clone()).or_insert_with(|| StreamState {
            spec,
            messages: VecDeque::new(),
            next_seq: 1,
        });
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<u64> {
        let mut inner = self.inner.lock();
        let stream_name = inner
            .streams
            .values()
            .find(|s| s.spec.subjects.iter().any(|p| subject_matches(p, subject)))
            .map(|s| s.spec.name.clone())
            .ok_or_else(|| Error::StreamNotFound(format!("no stream bound to subject {subject}")))?;
        let stream = inner.streams.get_mut(&stream_name).unwrap();
        let seq = stream.next_seq;
        stream.next_seq += 1;
        stream.messages.push_back(StoredMessage {
            seq,
            payload,
        });
        if let Some(max) = stream.spec.max_messages {
            while stream.messages.len() as u64 > max {
                stream.messages.pop_front();
            }
        }
        Ok(seq)
    }

    async fn stream_info(&self, stream_name: &str) -> Result<StreamInfo> {
        let inner = self.inner.lock();
        let stream = inner
            .streams
            .get(stream_name)
            .ok_or_else(|| Error::StreamNotFound(stream_name.to_string()))?;
        if stream.messages.is_empty() {
            return Ok(StreamInfo::default());
        }
        let bytes = stream.messages.iter().map(|m| m.payload.len() as u64).sum();
        Ok(StreamInfo {
            messages: stream.messages.len() as u64,
            bytes,
            first_seq: stream.messages.front().unwrap().seq,
            last_seq: stream.messages.back().unwrap().seq,
        })
    }

    async fn stream_messages_reverse(
        &self,
        stream_name: &str,
        count: usize,
        before_seq: Option<u64>,
    ) -> Result<Vec<StreamMessage>> {
        let inner = self.inner.lock();
        let stream = match inner.streams.get(stream_name) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        let ceiling = before_seq.unwrap_or(u64::MAX);
        let out: Vec<StreamMessage> = stream
            .messages
            .iter()
            .rev()
            .filter(|m| m.seq < ceiling)
            .take(count)
            .map(|m| StreamMessage {
                seq: m.seq,
                payload: m.payload.clone(),
            })
            .collect();
        Ok(out)
    }

    async fn delete_message(&self, stream_name: &str, seq: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(stream) = inner.streams.get_mut(stream_name) {
            stream.messages.retain(|m| m.seq != seq);
        }
        Ok(())
    }

    async fn ensure_kv_bucket(&self, bucket: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.kv.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn kv_get(&self, bucket: &str, key: &str) -> Result<Option<KvEntry>> {
        let inner = self.inner.lock();
        Ok(inner
            .kv
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|e| KvEntry {
                value: e.value.clone(),
                revision: e.revision,
            }))
    }

    async fn kv_put(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<u64> {
        let mut inner = self.inner.lock();
        let b = inner.kv.entry(bucket.to_string()).or_default();
        let revision = b.get(key).map(|e| e.revision + 1).unwrap_or(1);
        b.insert(key.to_string(), KvEntry { value, revision });
        Ok(revision)
    }

    async fn kv_put_if_revision(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        expected_revision: Option<u64>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock();
        let b = inner.kv.entry(bucket.to_string()).or_default();
        let current = b.get(key).map(|e| e.revision);
        match (current, expected_revision) {
            (None, None) => {}
            (Some(cur), Some(exp)) if cur == exp => {}
            _ => return Err(Error::Conflict(format!("revision mismatch for key {key}"))),
        }
        let revision = current.map(|r| r + 1).unwrap_or(1);
        b.insert(key.to_string(), KvEntry { value, revision });
        Ok(revision)
    }

    async fn kv_delete(&self, bucket: &str, key: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(b) = inner.kv.get_mut(bucket) {
            b.remove(key);
        }
        Ok(())
    }

    async fn kv_keys(&self, bucket: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .kv
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn ensure_consumer(&self, stream_name: &str, spec: ConsumerSpec) -> Result<()> {
        let mut inner = self.inner.lock();
        let start_cursor = match spec.deliver_policy {
            DeliverPolicy::New => inner
                .streams
                .get(stream_name)
                .map(|s| s.next_seq)
                .unwrap_or(1),
            DeliverPolicy::All => 0,
        };
        let key = (stream_name.to_string(), spec.durable_name.clone());
        inner.consumers.entry(key).or_insert_with(|| ConsumerState {
            spec,
            cursor: start_cursor,
            pending: Vec::new(),
        });
        Ok(())
    }

    async fn fetch(
        &self,
        stream_name: &str,
        consumer_name: &str,
        batch: usize,
        timeout: Duration,
    ) -> Result<Vec<DeliveredMessage>> {
        // No real waiting: the fake broker either has data now or it doesn't.
        // `timeout` is accepted for interface parity with the real adapter.
        let _ = timeout;
        let mut inner = self.inner.lock();
        let key = (stream_name.to_string(), consumer_name.to_string());

        // Redeliver anything whose ack_wait has elapsed, first.
        let ack_wait = inner
            .consumers
            .get(&key)
            .map(|c| c.spec.ack_wait)
            .unwrap_or_default();
        let mut redelivered = Vec::new();
        if let Some(consumer) = inner.consumers.get_mut(&key) {
            let now = Instant::now();
            for p in consumer.pending.iter_mut() {
                if now.duration_since(p.delivered_at) >= ack_wait {
                    p.delivered_count += 1;
                    p.delivered_at = now;
                    redelivered.push(DeliveredMessage {
                        seq: p.seq,
                        payload: p.payload.clone(),
                        delivered_count: p.delivered_count,
                    });
                    if redelivered.len() >= batch {
                        break;
                    }
                }
            }
        }
        if !redelivered.is_empty() {
            return Ok(redelivered);
        }

        let stream = match inner.streams.get(stream_name) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        let messages: Vec<StoredMessage> = stream
            .messages
            .iter()
            .filter(|m| {
                let consumer = inner_cursor(&inner.consumers, &key);
                m.seq >= consumer
            })
            .take(batch)
            .map(|m| StoredMessage {
                seq: m.seq,
                payload: m.payload.clone(),
            })
            .collect();

        let consumer = inner.consumers.get_mut(&key).unwrap();
        let mut out = Vec::with_capacity(messages.len());
        for m in messages {
            consumer.cursor = m.seq + 1;
            consumer.pending.push(PendingDelivery {
                seq: m.seq,
                payload: m.payload.clone(),
                delivered_count: 1,
                delivered_at: Instant::now(),
            });
            out.push(DeliveredMessage {
                seq: m.seq,
                payload: m.payload,
                delivered_count: 1,
            });
        }
        Ok(out)
    }

    async fn ack(&self, stream_name: &str, consumer_name: &str, seq: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let key = (stream_name.to_string(), consumer_name.to_string());
        if let Some(consumer) = inner.consumers.get_mut(&key) {
            consumer.pending.retain(|p| p.seq != seq);
        }
        let is_workqueue = inner
            .streams
            .get(stream_name)
            .map(|s| s.spec.retention == RetentionPolicy::WorkQueue)
            .unwrap_or(false);
        if is_workqueue {
            if let Some(stream) = inner.streams.get_mut(stream_name) {
                stream.messages.retain(|m| m.seq != seq);
            }
        }
        Ok(())
    }

    async fn delete_consumer(&self, stream_name: &str, consumer_name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .consumers
            .remove(&(stream_name.to_string(), consumer_name.to_string()));
        Ok(())
    }
}

fn inner_cursor(
    consumers: &HashMap<(String, String), ConsumerState>,
    key: &(String, String),
) -> u64 {
    consumers.get(key).map(|c| c.cursor).unwrap_or(1)
}

/// Exact-match or trailing-wildcard (`prefix.>`) subject matching, enough
/// for the fixed subject shapes this system publishes to.
fn subject_matches(pattern: &str, subject: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(".>") {
        subject == prefix || subject.starts_with(&format!("{prefix}."))
    } else {
        pattern == subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeliverPolicy;

    fn spec(name: &str, subject: &str, retention: RetentionPolicy) -> StreamSpec {
        StreamSpec {
            name: name.into(),
            subjects: vec![subject.into()],
            retention,
            max_messages: None,
            max_age: None,
        }
    }

    #[tokio::test]
    async fn publish_and_read_window() {
        let broker = FakeBroker::new();
        broker
            .ensure_stream(spec("CH_ROADMAP", "proj.channel.roadmap", RetentionPolicy::Limits))
            .await
            .unwrap();
        for i in 0..3 {
            broker
                .publish("proj.channel.roadmap", format!("msg{i}").into_bytes())
                .await
                .unwrap();
        }
        let info = broker.stream_info("CH_ROADMAP").await.unwrap();
        assert_eq!(info.messages, 3);
        assert_eq!(info.last_seq, 3);

        let page = broker
            .stream_messages_reverse("CH_ROADMAP", 2, None)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].seq, 3);
        assert_eq!(page[1].seq, 2);
    }

    #[tokio::test]
    async fn stream_not_found_is_distinct() {
        let broker = FakeBroker::new();
        let err = broker.stream_info("MISSING").await.unwrap_err();
        assert!(matches!(err, Error::StreamNotFound(_)));
    }

    #[tokio::test]
    async fn kv_cas_rejects_stale_revision() {
        let broker = FakeBroker::new();
        broker.ensure_kv_bucket("registry").await.unwrap();
        let r1 = broker
            .kv_put_if_revision("registry", "agent1", b"v1".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(r1, 1);
        let err = broker
            .kv_put_if_revision("registry", "agent1", b"v2".to_vec(), Some(999))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let r2 = broker
            .kv_put_if_revision("registry", "agent1", b"v2".to_vec(), Some(r1))
            .await
            .unwrap();
        assert_eq!(r2, 2);
    }

    #[tokio::test]
    async fn workqueue_retention_removes_on_ack() {
        let broker = FakeBroker::new();
        broker
            .ensure_stream(spec("WQ_T", "global.workqueue.t", RetentionPolicy::WorkQueue))
            .await
            .unwrap();
        broker.publish("global.workqueue.t", b"item".to_vec()).await.unwrap();
        broker
            .ensure_consumer(
                "WQ_T",
                ConsumerSpec {
                    durable_name: "shared".into(),
                    deliver_policy: DeliverPolicy::New,
                    ack_wait: Duration::from_secs(5),
                    max_deliver: 3,
                },
            )
            .await
            .unwrap();
        let msgs = broker.fetch("WQ_T", "shared", 1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(msgs.len(), 1);
        broker.ack("WQ_T", "shared", msgs[0].seq).await.unwrap();
        let info = broker.stream_info("WQ_T").await.unwrap();
        assert_eq!(info.messages, 0);
    }

    #[tokio::test]
    async fn unacked_message_redelivers_after_ack_wait() {
        let broker = FakeBroker::new();
        broker
            .ensure_stream(spec("WQ_T", "global.workqueue.t", RetentionPolicy::WorkQueue))
            .await
            .unwrap();
        broker.publish("global.workqueue.t", b"item".to_vec()).await.unwrap();
        broker
            .ensure_consumer(
                "WQ_T",
                ConsumerSpec {
                    durable_name: "shared".into(),
                    deliver_policy: DeliverPolicy::New,
                    ack_wait: Duration::from_millis(20),
                    max_deliver: 5,
                },
            )
            .await
            .unwrap();
        let first = broker.fetch("WQ_T", "shared", 1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(first[0].delivered_count, 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = broker.fetch("WQ_T", "shared", 1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(second[0].delivered_count, 2);
        assert_eq!(second[0].seq, first[0].seq);
    }

    #[tokio::test]
    async fn deliver_policy_new_skips_history() {
        let broker = FakeBroker::new();
        broker
            .ensure_stream(spec("WQ_T", "global.workqueue.t", RetentionPolicy::WorkQueue))
            .await
            .unwrap();
        broker.publish("global.workqueue.t", b"old".to_vec()).await.unwrap();
        broker
            .ensure_consumer(
                "WQ_T",
                ConsumerSpec {
                    durable_name: "shared".into(),
                    deliver_policy: DeliverPolicy::New,
                    ack_wait: Duration::from_secs(5),
                    max_deliver: 3,
                },
            )
            .await
            .unwrap();
        // Consumer created after the publish: with deliver_policy=new it
        // must NOT see the pre-existing message.
        let msgs = broker.fetch("WQ_T", "shared", 1, Duration::from_millis(10)).await.unwrap();
        assert!(msgs.is_empty());
    }
}
