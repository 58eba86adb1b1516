//! Per-capability work queues: broadcast, non-destructive preview, at-most-once
//! claim, status, and a shared dead-letter queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fleet_broker::types::{ConsumerSpec, DeliverPolicy, RetentionPolicy, StreamSpec};
use fleet_broker::Broker;
use fleet_core::trace::TraceEvent;
use fleet_core::{AgentId, Error, Result};
use fleet_pagination::{build_page_info, resolve_page_start, PageInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const CAPABILITIES_BUCKET: &str = "workqueue_capabilities";
const CAPABILITIES_KEY: &str = "all";
const DLQ_STREAM: &str = "DLQ";
const DLQ_SUBJECT: &str = "global.dlq";
const CLAIMANT_CONSUMER: &str = "claimants";
const DEFAULT_LIST_LIMIT: usize = 50;
const DLQ_SCAN_LIMIT: usize = 10_000;
/// `work_claim`'s `timeout_ms` bounds, per spec: "no default shorter than
/// 1 s, no longer than 60 s."
const MIN_CLAIM_TIMEOUT_MS: u64 = 1_000;
const MAX_CLAIM_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkScope {
    Team,
    Public,
}

impl Default for WorkScope {
    fn default() -> Self {
        WorkScope::Team
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub task_id: String,
    pub capability: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_data: Option<Value>,
    pub offered_by: String,
    pub offered_at: DateTime<Utc>,
    pub scope: WorkScope,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct WorkBroadcastRequest {
    pub id: Option<String>,
    pub task_id: String,
    pub capability: String,
    pub description: String,
    pub priority: Option<u8>,
    pub deadline: Option<DateTime<Utc>>,
    pub context_data: Option<Value>,
    pub scope: WorkScope,
}

#[derive(Debug, Clone, Default)]
pub struct WorkListFilter {
    pub min_priority: Option<u8>,
    pub max_priority: Option<u8>,
    pub deadline_before: Option<DateTime<Utc>>,
    pub deadline_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub capability: String,
    pub pending_items: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub dlq_id: String,
    pub work_item: WorkItem,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

fn sanitize_capability(capability: &str) -> String {
    capability
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn work_stream_name(capability: &str) -> String {
    format!("WORKQUEUE_{}", sanitize_capability(capability))
}

fn work_subject(capability: &str) -> String {
    format!("global.workqueue.{capability}")
}

fn derive_dlq_id(work_item_id: &str, failed_at: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(work_item_id.as_bytes());
    hasher.update(failed_at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Configures the shared claim consumer's ack_wait/max_deliver and the
/// DLQ stream's TTL — supplied by the caller from `WorkqueueConfig` so
/// this crate carries no config-parsing concerns of its own.
#[derive(Debug, Clone, Copy)]
pub struct WorkQueueSettings {
    pub ack_wait: Duration,
    pub max_deliver: u32,
    pub dlq_ttl: Duration,
}

pub struct WorkQueue<B: Broker> {
    broker: Arc<B>,
    settings: WorkQueueSettings,
}

impl<B: Broker> WorkQueue<B> {
    pub fn new(broker: Arc<B>, settings: WorkQueueSettings) -> Self {
        Self { broker, settings }
    }

    async fn ensure_capability_stream(&self, capability: &str) -> Result<String> {
        let stream = work_stream_name(capability);
        self.broker
            .ensure_stream(StreamSpec {
                name: stream.clone(),
                subjects: vec![work_subject(capability)],
                retention: RetentionPolicy::WorkQueue,
                max_messages: None,
                max_age: None,
            })
            .await?;
        // The shared claimant consumer is created here, before any item is
        // ever published to this capability — `deliver_policy = New`'s
        // cursor is fixed at creation time, so creating it lazily inside
        // `work_claim` (after a broadcast has already happened) would skip
        // every item already sitting in the queue.
        self.broker
            .ensure_consumer(
                &stream,
                ConsumerSpec {
                    durable_name: CLAIMANT_CONSUMER.into(),
                    deliver_policy: DeliverPolicy::New,
                    ack_wait: self.settings.ack_wait,
                    max_deliver: self.settings.max_deliver,
                },
            )
            .await?;
        self.remember_capability(capability).await?;
        Ok(stream)
    }

    async fn remember_capability(&self, capability: &str) -> Result<()> {
        self.broker.ensure_kv_bucket(CAPABILITIES_BUCKET).await?;
        for _ in 0..8 {
            let entry = self.broker.kv_get(CAPABILITIES_BUCKET, CAPABILITIES_KEY).await?;
            let (mut set, revision): (Vec<String>, Option<u64>) = match entry {
                Some(e) => (serde_json::from_slice(&e.value).unwrap_or_default(), Some(e.revision)),
                None => (Vec::new(), None),
            };
            if set.iter().any(|c| c == capability) {
                return Ok(());
            }
            set.push(capability.to_string());
            let payload = serde_json::to_vec(&set)?;
            match self
                .broker
                .kv_put_if_revision(CAPABILITIES_BUCKET, CAPABILITIES_KEY, payload, revision)
                .await
            {
                Ok(_) => return Ok(()),
                Err(Error::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict("remember_capability: too much contention".into()))
    }

    async fn known_capabilities(&self) -> Result<Vec<String>> {
        self.broker.ensure_kv_bucket(CAPABILITIES_BUCKET).await?;
        match self.broker.kv_get(CAPABILITIES_BUCKET, CAPABILITIES_KEY).await? {
            Some(e) => Ok(serde_json::from_slice(&e.value).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    pub async fn work_broadcast(&self, offered_by: &AgentId, req: WorkBroadcastRequest) -> Result<WorkItem> {
        if let Some(p) = req.priority {
            if !(1..=10).contains(&p) {
                return Err(Error::InvalidArgument(format!("priority {p} must be in [1,10]")));
            }
        }
        let id = match req.id {
            Some(raw) => {
                let parsed = Uuid::parse_str(&raw)
                    .map_err(|_| Error::InvalidArgument(format!("{raw:?} is not a valid UUID")))?;
                if parsed.get_version_num() != 4 {
                    return Err(Error::InvalidArgument(format!("{raw:?} is not a UUID v4")));
                }
                raw
            }
            None => Uuid::new_v4().to_string(),
        };
        self.ensure_capability_stream(&req.capability).await?;
        let item = WorkItem {
            id,
            task_id: req.task_id,
            capability: req.capability.clone(),
            description: req.description,
            priority: req.priority,
            deadline: req.deadline,
            context_data: req.context_data,
            offered_by: offered_by.to_string(),
            offered_at: Utc::now(),
            scope: req.scope,
            attempts: 0,
        };
        let payload = serde_json::to_vec(&item)?;
        self.broker.publish(&work_subject(&req.capability), payload).await?;
        TraceEvent::WorkBroadcast {
            capability: req.capability,
            work_item_id: item.id.clone(),
            priority: item.priority,
        }
        .emit();
        Ok(item)
    }

    /// Non-destructive preview: reads the stream's current backlog
    /// without creating a consumer or acknowledging anything, so repeated
    /// calls see the same set while no claims or broadcasts occur.
    pub async fn work_list(
        &self,
        capability: &str,
        filter: &WorkListFilter,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<(Vec<WorkItem>, PageInfo)> {
        let stream = work_stream_name(capability);
        let raw = match self.broker.stream_info(&stream).await {
            Ok(info) if info.messages > 0 => {
                self.broker
                    .stream_messages_reverse(&stream, info.messages as usize, None)
                    .await?
            }
            Ok(_) | Err(Error::StreamNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let mut items: Vec<WorkItem> = raw
            .into_iter()
            .filter_map(|m| serde_json::from_slice::<WorkItem>(&m.payload).ok())
            .filter(|item| passes_list_filter(item, filter))
            .collect();
        // Oldest-offered-first makes a stable, tool-defined order across pages.
        items.sort_by(|a, b| a.offered_at.cmp(&b.offered_at));

        let filters = serde_json::json!({
            "capability": capability,
            "min_priority": filter.min_priority,
            "max_priority": filter.max_priority,
            "deadline_before": filter.deadline_before,
            "deadline_after": filter.deadline_after,
        });
        let (offset, page_limit) = resolve_page_start(cursor, &filters, DEFAULT_LIST_LIMIT, limit, 1000)?;
        let total = items.len();
        let page: Vec<WorkItem> = items.into_iter().skip(offset).take(page_limit).collect();
        let info = build_page_info(offset, page_limit, page.len(), Some(total), &filters);
        Ok((page, info))
    }

    /// Claims exactly one item within `timeout_ms`, or "no work available".
    /// Acknowledgement happens immediately on successful parse — claiming
    /// is the commit; there is no recovery path if the claimant later
    /// fails to act on it. `timeout_ms` is clamped to `[1_000, 60_000]`
    /// regardless of what the caller passes.
    pub async fn work_claim(&self, capability: &str, timeout_ms: u64) -> Result<WorkItem> {
        let timeout_ms = timeout_ms.clamp(MIN_CLAIM_TIMEOUT_MS, MAX_CLAIM_TIMEOUT_MS);
        let stream = self.ensure_capability_stream(capability).await?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let delivered = self
                .broker
                .fetch(&stream, CLAIMANT_CONSUMER, 1, remaining)
                .await?;
            let Some(msg) = delivered.into_iter().next() else {
                return Err(Error::NoWorkAvailable);
            };

            let parsed = serde_json::from_slice::<WorkItem>(&msg.payload);
            let over_limit = msg.delivered_count > self.settings.max_deliver;
            match parsed {
                Ok(mut item) if !over_limit => {
                    item.attempts = msg.delivered_count;
                    self.broker.ack(&stream, CLAIMANT_CONSUMER, msg.seq).await?;
                    TraceEvent::WorkClaimed {
                        capability: capability.to_string(),
                        work_item_id: item.id.clone(),
                        attempts: item.attempts,
                    }
                    .emit();
                    return Ok(item);
                }
                Ok(mut item) => {
                    item.attempts = msg.delivered_count;
                    let error = format!("exceeded max_deliver ({})", self.settings.max_deliver);
                    self.dead_letter(capability, item, &error).await?;
                    self.broker.ack(&stream, CLAIMANT_CONSUMER, msg.seq).await?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "work item failed to parse, dead-lettering");
                    self.broker.ack(&stream, CLAIMANT_CONSUMER, msg.seq).await?;
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::NoWorkAvailable);
            }
        }
    }

    async fn dead_letter(&self, capability: &str, item: WorkItem, error: &str) -> Result<()> {
        self.broker
            .ensure_stream(StreamSpec {
                name: DLQ_STREAM.into(),
                subjects: vec![DLQ_SUBJECT.into()],
                retention: RetentionPolicy::Limits,
                max_messages: None,
                max_age: Some(self.settings.dlq_ttl),
            })
            .await?;
        let failed_at = Utc::now();
        let entry = DlqEntry {
            dlq_id: derive_dlq_id(&item.id, &failed_at),
            work_item: item.clone(),
            last_error: error.to_string(),
            failed_at,
        };
        let payload = serde_json::to_vec(&entry)?;
        self.broker.publish(DLQ_SUBJECT, payload).await?;
        TraceEvent::WorkDeadLettered {
            capability: capability.to_string(),
            work_item_id: item.id,
            dlq_id: entry.dlq_id,
            last_error: error.to_string(),
        }
        .emit();
        Ok(())
    }

    pub async fn work_queue_status(&self, capability: Option<&str>) -> Result<Vec<QueueStatus>> {
        let capabilities = match capability {
            Some(c) => vec![c.to_string()],
            None => self.known_capabilities().await?,
        };
        let mut out = Vec::new();
        for cap in capabilities {
            let stream = work_stream_name(&cap);
            let info = match self.broker.stream_info(&stream).await {
                Ok(info) => info,
                Err(Error::StreamNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if info.messages == 0 {
                continue;
            }
            out.push(QueueStatus {
                capability: cap,
                pending_items: info.messages,
                bytes: info.bytes,
            });
        }
        out.sort_by(|a, b| b.pending_items.cmp(&a.pending_items));
        Ok(out)
    }

    async fn ensure_dlq_stream(&self) -> Result<()> {
        self.broker
            .ensure_stream(StreamSpec {
                name: DLQ_STREAM.into(),
                subjects: vec![DLQ_SUBJECT.into()],
                retention: RetentionPolicy::Limits,
                max_messages: None,
                max_age: Some(self.settings.dlq_ttl),
            })
            .await
    }

    pub async fn dlq_list(
        &self,
        capability: Option<&str>,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<(Vec<DlqEntry>, PageInfo)> {
        self.ensure_dlq_stream().await?;
        let raw = self
            .broker
            .stream_messages_reverse(DLQ_STREAM, DLQ_SCAN_LIMIT, None)
            .await?;
        let mut entries: Vec<DlqEntry> = raw
            .into_iter()
            .filter_map(|m| serde_json::from_slice::<DlqEntry>(&m.payload).ok())
            .filter(|e| capability.map_or(true, |c| e.work_item.capability == c))
            .collect();
        entries.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));

        let filters = serde_json::json!({ "capability": capability });
        let (offset, page_limit) = resolve_page_start(cursor, &filters, DEFAULT_LIST_LIMIT, limit, 1000)?;
        let total = entries.len();
        let page: Vec<DlqEntry> = entries.into_iter().skip(offset).take(page_limit).collect();
        let info = build_page_info(offset, page_limit, page.len(), Some(total), &filters);
        Ok((page, info))
    }

    async fn find_dlq_entry(&self, dlq_id: &str) -> Result<Option<(u64, DlqEntry)>> {
        self.ensure_dlq_stream().await?;
        let raw = self
            .broker
            .stream_messages_reverse(DLQ_STREAM, DLQ_SCAN_LIMIT, None)
            .await?;
        for m in raw {
            if let Ok(entry) = serde_json::from_slice::<DlqEntry>(&m.payload) {
                if entry.dlq_id == dlq_id {
                    return Ok(Some((m.seq, entry)));
                }
            }
        }
        Ok(None)
    }

    pub async fn dlq_retry(&self, dlq_id: &str, reset_attempts: bool) -> Result<WorkItem> {
        let (seq, entry) = self
            .find_dlq_entry(dlq_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("dlq entry {dlq_id}")))?;
        let mut item = entry.work_item;
        if reset_attempts {
            item.attempts = 0;
        }
        self.ensure_capability_stream(&item.capability).await?;
        let payload = serde_json::to_vec(&item)?;
        self.broker.publish(&work_subject(&item.capability), payload).await?;
        self.broker.delete_message(DLQ_STREAM, seq).await?;
        TraceEvent::WorkRetriedFromDlq {
            dlq_id: dlq_id.to_string(),
            work_item_id: item.id.clone(),
            reset_attempts,
        }
        .emit();
        Ok(item)
    }

    pub async fn dlq_discard(&self, dlq_id: &str) -> Result<()> {
        let (seq, _) = self
            .find_dlq_entry(dlq_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("dlq entry {dlq_id}")))?;
        self.broker.delete_message(DLQ_STREAM, seq).await
    }
}

fn passes_list_filter(item: &WorkItem, filter: &WorkListFilter) -> bool {
    if let Some(min) = filter.min_priority {
        if item.priority.map_or(true, |p| p < min) {
            return false;
        }
    }
    if let Some(max) = filter.max_priority {
        if item.priority.map_or(true, |p| p > max) {
            return false;
        }
    }
    if let Some(before) = filter.deadline_before {
        if item.deadline.map_or(true, |d| d >= before) {
            return false;
        }
    }
    if let Some(after) = filter.deadline_after {
        if item.deadline.map_or(true, |d| d <= after) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_broker::test_support::FakeBroker;

    fn agent(n: u8) -> AgentId {
        AgentId::parse(&n.to_string().repeat(32)).unwrap()
    }

    fn settings() -> WorkQueueSettings {
        WorkQueueSettings {
            ack_wait: Duration::from_millis(20),
            max_deliver: 3,
            dlq_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    fn broadcast_req(capability: &str) -> WorkBroadcastRequest {
        WorkBroadcastRequest {
            id: None,
            task_id: "task-1".into(),
            capability: capability.into(),
            description: "do the thing".into(),
            priority: Some(5),
            deadline: None,
            context_data: None,
            scope: WorkScope::Team,
        }
    }

    #[tokio::test]
    async fn broadcast_rejects_out_of_range_priority() {
        let wq = WorkQueue::new(Arc::new(FakeBroker::new()), settings());
        let mut req = broadcast_req("rust");
        req.priority = Some(11);
        let err = wq.work_broadcast(&agent(1), req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn claim_then_queue_is_empty() {
        let wq = WorkQueue::new(Arc::new(FakeBroker::new()), settings());
        wq.work_broadcast(&agent(1), broadcast_req("rust")).await.unwrap();
        let claimed = wq.work_claim("rust", 50).await.unwrap();
        assert_eq!(claimed.attempts, 1);
        let err = wq.work_claim("rust", 10).await.unwrap_err();
        assert!(matches!(err, Error::NoWorkAvailable));
    }

    #[tokio::test]
    async fn work_list_is_non_destructive() {
        let wq = WorkQueue::new(Arc::new(FakeBroker::new()), settings());
        wq.work_broadcast(&agent(1), broadcast_req("rust")).await.unwrap();
        let (first, _) = wq.work_list("rust", &WorkListFilter::default(), Some(10), None).await.unwrap();
        let (second, _) = wq.work_list("rust", &WorkListFilter::default(), Some(10), None).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        // the item is still claimable after being previewed twice
        let claimed = wq.work_claim("rust", 50).await.unwrap();
        assert_eq!(claimed.task_id, "task-1");
    }

    #[tokio::test]
    async fn exceeding_max_deliver_dead_letters_instead_of_returning() {
        let broker = Arc::new(FakeBroker::new());
        let wq = WorkQueue::new(
            broker.clone(),
            WorkQueueSettings {
                ack_wait: Duration::from_millis(5),
                max_deliver: 2,
                dlq_ttl: Duration::from_secs(60),
            },
        );
        let item = wq.work_broadcast(&agent(1), broadcast_req("rust")).await.unwrap();
        let stream = work_stream_name("rust");

        // Drive two redeliveries directly against the broker to exhaust
        // max_deliver before work_claim ever sees the message again.
        broker
            .ensure_consumer(
                &stream,
                ConsumerSpec {
                    durable_name: CLAIMANT_CONSUMER.into(),
                    deliver_policy: DeliverPolicy::New,
                    ack_wait: Duration::from_millis(5),
                    max_deliver: 2,
                },
            )
            .await
            .unwrap();
        let d1 = broker.fetch(&stream, CLAIMANT_CONSUMER, 1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(d1[0].delivered_count, 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let d2 = broker.fetch(&stream, CLAIMANT_CONSUMER, 1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(d2[0].delivered_count, 2);
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The third delivery work_claim observes (count=3) exceeds max_deliver=2.
        let result = wq.work_claim("rust", 50).await;
        assert!(matches!(result, Err(Error::NoWorkAvailable)));

        let (entries, _) = wq.dlq_list(None, Some(10), None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].work_item.id, item.id);
        assert_eq!(entries[0].work_item.attempts, 3);
    }

    #[tokio::test]
    async fn dlq_retry_republishes_and_removes_entry() {
        let wq = WorkQueue::new(Arc::new(FakeBroker::new()), settings());
        let item = WorkItem {
            id: Uuid::new_v4().to_string(),
            task_id: "t1".into(),
            capability: "rust".into(),
            description: "desc".into(),
            priority: Some(5),
            deadline: None,
            context_data: None,
            offered_by: agent(1).to_string(),
            offered_at: Utc::now(),
            scope: WorkScope::Team,
            attempts: 3,
        };
        wq.dead_letter("rust", item.clone(), "boom").await.unwrap();
        let (entries, _) = wq.dlq_list(None, Some(10), None).await.unwrap();
        assert_eq!(entries.len(), 1);
        let dlq_id = entries[0].dlq_id.clone();

        let retried = wq.dlq_retry(&dlq_id, true).await.unwrap();
        assert_eq!(retried.attempts, 0);
        let (after, _) = wq.dlq_list(None, Some(10), None).await.unwrap();
        assert!(after.is_empty());

        let claimed = wq.work_claim("rust", 50).await.unwrap();
        assert_eq!(claimed.id, item.id);
    }

    #[tokio::test]
    async fn dlq_discard_removes_without_republishing() {
        let wq = WorkQueue::new(Arc::new(FakeBroker::new()), settings());
        let item = WorkItem {
            id: Uuid::new_v4().to_string(),
            task_id: "t1".into(),
            capability: "rust".into(),
            description: "desc".into(),
            priority: None,
            deadline: None,
            context_data: None,
            offered_by: agent(1).to_string(),
            offered_at: Utc::now(),
            scope: WorkScope::Team,
            attempts: 3,
        };
        wq.dead_letter("rust", item, "boom").await.unwrap();
        let (entries, _) = wq.dlq_list(None, Some(10), None).await.unwrap();
        wq.dlq_discard(&entries[0].dlq_id).await.unwrap();
        let (after, _) = wq.dlq_list(None, Some(10), None).await.unwrap();
        assert!(after.is_empty());
        let err = wq.work_claim("rust", 10).await.unwrap_err();
        assert!(matches!(err, Error::NoWorkAvailable));
    }

    #[tokio::test]
    async fn queue_status_reports_pending_counts() {
        let wq = WorkQueue::new(Arc::new(FakeBroker::new()), settings());
        wq.work_broadcast(&agent(1), broadcast_req("rust")).await.unwrap();
        wq.work_broadcast(&agent(1), broadcast_req("rust")).await.unwrap();
        wq.work_broadcast(&agent(1), broadcast_req("go")).await.unwrap();
        let status = wq.work_queue_status(None).await.unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].capability, "rust");
        assert_eq!(status[0].pending_items, 2);
    }
}
