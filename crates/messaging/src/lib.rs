//! Per-agent durable inboxes: direct send, consume-once read.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleet_broker::types::{ConsumerSpec, DeliverPolicy, RetentionPolicy, StreamSpec};
use fleet_broker::Broker;
use fleet_core::trace::TraceEvent;
use fleet_core::{AgentId, Result};
use fleet_pagination::{build_page_info, PageInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbox reader never redelivers so persistently that a dead agent's
/// inbox jams up the durable consumer; a generous ceiling still caps it.
const INBOX_MAX_DELIVER: u32 = 1000;
const INBOX_ACK_WAIT: Duration = Duration::from_secs(300);
const DEFAULT_READ_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessage {
    pub seq: u64,
    pub sender_agent_id: String,
    pub recipient_agent_id: String,
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectSendResult {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ReadDirectFilter {
    pub message_type: Option<String>,
    pub sender_agent_id: Option<String>,
}

pub fn inbox_stream_name(project_id: &str, agent_id: &AgentId) -> String {
    format!("INBOX_{project_id}_{}", agent_id.as_str())
}

fn inbox_subject(project_id: &str, agent_id: &AgentId) -> String {
    format!("{project_id}.inbox.{}", agent_id.as_str())
}

fn reader_consumer_name(agent_id: &AgentId) -> String {
    format!("inbox-reader-{}", agent_id.as_str())
}

pub struct MessagingLayer<B: Broker> {
    broker: Arc<B>,
    project_id: String,
}

impl<B: Broker> MessagingLayer<B> {
    pub fn new(broker: Arc<B>, project_id: String) -> Self {
        Self { broker, project_id }
    }

    /// Idempotent; safe to call on every `register` and on every send.
    pub async fn ensure_inbox(&self, agent_id: &AgentId) -> Result<()> {
        self.broker
            .ensure_stream(StreamSpec {
                name: inbox_stream_name(&self.project_id, agent_id),
                subjects: vec![inbox_subject(&self.project_id, agent_id)],
                retention: RetentionPolicy::Limits,
                max_messages: None,
                max_age: None,
            })
            .await
    }

    /// Publishes to the recipient's inbox. Durable: if the recipient is
    /// offline the message simply waits in the stream.
    pub async fn send_direct(
        &self,
        sender: &AgentId,
        recipient: &AgentId,
        message_type: &str,
        body: &str,
        metadata: Option<Value>,
    ) -> Result<DirectSendResult> {
        self.ensure_inbox(recipient).await?;
        let timestamp = Utc::now();
        let msg = DirectMessage {
            seq: 0,
            sender_agent_id: sender.to_string(),
            recipient_agent_id: recipient.to_string(),
            message_type: message_type.to_string(),
            timestamp,
            body: body.to_string(),
            metadata,
        };
        let payload = serde_json::to_vec(&msg)?;
        let seq = self
            .broker
            .publish(&inbox_subject(&self.project_id, recipient), payload)
            .await?;
        TraceEvent::DirectMessageDelivered {
            recipient_agent_id: recipient.to_string(),
            message_type: message_type.to_string(),
        }
        .emit();
        Ok(DirectSendResult { seq, timestamp })
    }

    /// Fetches up to `limit` messages from the caller's own inbox,
    /// acknowledges every one fetched, then applies post-filters to decide
    /// what is handed back. Acknowledging before filtering is what makes
    /// consumption once-only: a message this call pulled off the stream is
    /// gone whether or not it matched, so callers narrowing by
    /// `message_type`/`sender_agent_id` should read with a limit wide
    /// enough to cover the backlog they care about.
    pub async fn read_direct(
        &self,
        caller: &AgentId,
        limit: Option<usize>,
        filter: &ReadDirectFilter,
        cursor: Option<&str>,
    ) -> Result<(Vec<DirectMessage>, PageInfo)> {
        let stream = inbox_stream_name(&self.project_id, caller);
        let subject = inbox_subject(&self.project_id, caller);
        self.broker
            .ensure_stream(StreamSpec {
                name: stream.clone(),
                subjects: vec![subject],
                retention: RetentionPolicy::Limits,
                max_messages: None,
                max_age: None,
            })
            .await?;
        let consumer_name = reader_consumer_name(caller);
        self.broker
            .ensure_consumer(
                &stream,
                ConsumerSpec {
                    durable_name: consumer_name.clone(),
                    deliver_policy: DeliverPolicy::All,
                    ack_wait: INBOX_ACK_WAIT,
                    max_deliver: INBOX_MAX_DELIVER,
                },
            )
            .await?;

        let requested = cursor
            .and_then(|c| fleet_pagination::decode_cursor(c).ok())
            .map(|p| p.limit)
            .or(limit)
            .unwrap_or(DEFAULT_READ_LIMIT)
            .clamp(1, 1000);

        let fetched = self
            .broker
            .fetch(&stream, &consumer_name, requested, Duration::from_millis(200))
            .await?;

        let mut out = Vec::new();
        for delivered in &fetched {
            self.broker.ack(&stream, &consumer_name, delivered.seq).await?;
            let Ok(mut msg) = serde_json::from_slice::<DirectMessage>(&delivered.payload) else {
                continue;
            };
            msg.seq = delivered.seq;
            let matches = filter
                .message_type
                .as_ref()
                .map_or(true, |want| *want == msg.message_type)
                && filter
                    .sender_agent_id
                    .as_ref()
                    .map_or(true, |want| *want == msg.sender_agent_id);
            if matches {
                out.push(msg);
            }
        }

        let filters = serde_json::json!({
            "message_type": filter.message_type,
            "sender_agent_id": filter.sender_agent_id,
        });
        let page = build_page_info(0, requested, fetched.len(), None, &filters);
        Ok((out, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_broker::test_support::FakeBroker;

    fn agent(n: u8) -> AgentId {
        AgentId::parse(&n.to_string().repeat(32)).unwrap()
    }

    #[tokio::test]
    async fn delivers_to_offline_recipient() {
        let layer = MessagingLayer::new(Arc::new(FakeBroker::new()), "proj1".into());
        layer
            .send_direct(&agent(1), &agent(2), "text", "hi", None)
            .await
            .unwrap();
        let (msgs, _) = layer
            .read_direct(&agent(2), Some(10), &ReadDirectFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].body, "hi");
        assert_eq!(msgs[0].sender_agent_id, agent(1).to_string());
    }

    #[tokio::test]
    async fn read_is_consume_once() {
        let layer = MessagingLayer::new(Arc::new(FakeBroker::new()), "proj1".into());
        layer
            .send_direct(&agent(1), &agent(2), "text", "hi", None)
            .await
            .unwrap();
        let (first, _) = layer
            .read_direct(&agent(2), Some(10), &ReadDirectFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        let (second, _) = layer
            .read_direct(&agent(2), Some(10), &ReadDirectFilter::default(), None)
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn message_type_filter_narrows_a_mixed_fetch() {
        let layer = MessagingLayer::new(Arc::new(FakeBroker::new()), "proj1".into());
        layer.send_direct(&agent(1), &agent(2), "work-offer", "offer", None).await.unwrap();
        layer.send_direct(&agent(1), &agent(2), "text", "hello", None).await.unwrap();
        let filter = ReadDirectFilter {
            message_type: Some("text".into()),
            ..Default::default()
        };
        let (matched, _) = layer.read_direct(&agent(2), Some(10), &filter, None).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].body, "hello");

        // Both messages were consumed by the fetch above even though only
        // one matched the filter; nothing is left for a second read.
        let (second, _) = layer
            .read_direct(&agent(2), Some(10), &ReadDirectFilter::default(), None)
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn sender_filter_selects_one_of_two() {
        let layer = MessagingLayer::new(Arc::new(FakeBroker::new()), "proj1".into());
        layer.send_direct(&agent(1), &agent(3), "text", "a", None).await.unwrap();
        layer.send_direct(&agent(2), &agent(3), "text", "b", None).await.unwrap();
        let filter = ReadDirectFilter {
            sender_agent_id: Some(agent(2).to_string()),
            ..Default::default()
        };
        let (matched, _) = layer.read_direct(&agent(3), Some(10), &filter, None).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].body, "b");
    }
}
