//! Channel layer: one append-only stream per channel, publish, non-destructive
//! windowed read, and status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleet_broker::Broker;
use fleet_broker::types::{RetentionPolicy, StreamSpec};
use fleet_core::config::{is_valid_channel_name, ChannelRetention};
use fleet_core::trace::TraceEvent;
use fleet_core::{AgentId, Error, Result};
use fleet_pagination::{build_page_info, encode_cursor, resolve_page_start, CursorPayload, PageInfo};
use serde::{Deserialize, Serialize};

const DEFAULT_READ_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub seq: u64,
    pub sender_agent_id: String,
    pub sender_handle: String,
    pub timestamp: DateTime<Utc>,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub channel: String,
    pub messages: u64,
    pub bytes: u64,
    pub first_seq: Option<u64>,
    pub last_seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSendResult {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct ChannelLayer<B: Broker> {
    broker: Arc<B>,
    project_id: String,
}

fn stream_name(project_id: &str, channel: &str) -> String {
    let sanitized: String = channel
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("CHANNEL_{project_id}_{sanitized}")
}

fn subject(project_id: &str, channel: &str) -> String {
    format!("{project_id}.channel.{channel}")
}

impl<B: Broker> ChannelLayer<B> {
    pub fn new(broker: Arc<B>, project_id: String) -> Self {
        Self { broker, project_id }
    }

    /// Ensures the channel's stream exists without publishing anything;
    /// used by the `doctor` CLI check and by every write path below.
    pub async fn ensure(&self, channel: &str, retention: &ChannelRetention) -> Result<String> {
        self.ensure_stream(channel, retention).await
    }

    async fn ensure_stream(&self, channel: &str, retention: &ChannelRetention) -> Result<String> {
        if !is_valid_channel_name(channel) {
            return Err(Error::InvalidArgument(format!(
                "channel name {channel:?} must match [a-z0-9-]+"
            )));
        }
        let name = stream_name(&self.project_id, channel);
        self.broker
            .ensure_stream(StreamSpec {
                name: name.clone(),
                subjects: vec![subject(&self.project_id, channel)],
                retention: RetentionPolicy::Limits,
                max_messages: retention.max_messages,
                max_age: retention.max_age_secs.map(std::time::Duration::from_secs),
            })
            .await?;
        Ok(name)
    }

    pub async fn send(
        &self,
        channel: &str,
        sender: &AgentId,
        sender_handle: &str,
        body: &str,
        retention: &ChannelRetention,
    ) -> Result<ChannelSendResult> {
        self.ensure_stream(channel, retention).await?;
        let timestamp = Utc::now();
        let msg = ChannelMessage {
            seq: 0, // overwritten by the broker-assigned sequence below
            sender_agent_id: sender.to_string(),
            sender_handle: sender_handle.to_string(),
            timestamp,
            body: body.to_string(),
        };
        let payload = serde_json::to_vec(&msg)?;
        let seq = self
            .broker
            .publish(&subject(&self.project_id, channel), payload)
            .await?;
        TraceEvent::ChannelPublished {
            channel: channel.to_string(),
            seq,
            sender_agent_id: sender.to_string(),
        }
        .emit();
        Ok(ChannelSendResult { seq, timestamp })
    }

    /// Non-destructive windowed read, newest-first. Pagination walks
    /// backward from the newest message: `offset=0` returns the newest K;
    /// `offset=K` returns the next K older.
    pub async fn read(
        &self,
        channel: &str,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<(Vec<ChannelMessage>, PageInfo)> {
        if !is_valid_channel_name(channel) {
            return Err(Error::InvalidArgument(format!(
                "channel name {channel:?} must match [a-z0-9-]+"
            )));
        }
        let stream = stream_name(&self.project_id, channel);
        let filters = serde_json::json!({ "channel": channel });
        let (offset, page_limit) =
            resolve_page_start(cursor, &filters, DEFAULT_READ_LIMIT, limit, 1000)?;

        let info = match self.broker.stream_info(&stream).await {
            Ok(info) => info,
            Err(Error::StreamNotFound(_)) => {
                return Ok((
                    Vec::new(),
                    build_page_info(0, page_limit, 0, Some(0), &filters),
                ));
            }
            Err(e) => return Err(e),
        };
        if info.messages == 0 {
            return Ok((Vec::new(), build_page_info(0, page_limit, 0, Some(0), &filters)));
        }

        // `offset` messages from the newest end have already been
        // returned; the next page ends strictly before that point.
        let before_seq = info.last_seq.saturating_sub(offset as u64) + 1;
        let raw = self
            .broker
            .stream_messages_reverse(&stream, page_limit, Some(before_seq))
            .await?;
        let items: Vec<ChannelMessage> = raw
            .into_iter()
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect();

        let page = build_page_info(offset, page_limit, items.len(), Some(info.messages as usize), &filters);
        Ok((items, page))
    }

    pub async fn status(&self, channel: &str) -> Result<ChannelStatus> {
        let stream = stream_name(&self.project_id, channel);
        match self.broker.stream_info(&stream).await {
            Ok(info) if info.messages > 0 => Ok(ChannelStatus {
                channel: channel.to_string(),
                messages: info.messages,
                bytes: info.bytes,
                first_seq: Some(info.first_seq),
                last_seq: Some(info.last_seq),
            }),
            Ok(_) | Err(Error::StreamNotFound(_)) => Ok(ChannelStatus {
                channel: channel.to_string(),
                messages: 0,
                bytes: 0,
                first_seq: None,
                last_seq: None,
            }),
            Err(e) => Err(e),
        }
    }
}

/// Build the "same filter set" cursor for a channel read page — exposed so
/// `fleet-tools` can hand back the exact cursor a caller would construct.
pub fn encode_channel_cursor(channel: &str, offset: usize, limit: usize) -> String {
    let filters = serde_json::json!({ "channel": channel });
    encode_cursor(&CursorPayload {
        offset,
        limit,
        filter_hash: Some(fleet_pagination::filter_hash(&filters)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_broker::test_support::FakeBroker;

    fn agent(n: u8) -> AgentId {
        AgentId::parse(&n.to_string().repeat(32)).unwrap()
    }

    #[tokio::test]
    async fn uninitialized_channel_reports_no_messages() {
        let layer = ChannelLayer::new(Arc::new(FakeBroker::new()), "proj1".into());
        let status = layer.status("roadmap").await.unwrap();
        assert_eq!(status.messages, 0);
        assert!(status.first_seq.is_none());
        let (items, page) = layer.read("roadmap", Some(50), None).await.unwrap();
        assert!(items.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.total, Some(0));
    }

    #[tokio::test]
    async fn channel_round_trip_scenario_1() {
        let layer = ChannelLayer::new(Arc::new(FakeBroker::new()), "proj1".into());
        layer
            .send("roadmap", &agent(1), "dev", "hello", &ChannelRetention::default())
            .await
            .unwrap();
        let (items, page) = layer.read("roadmap", Some(50), None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].body, "hello");
        assert_eq!(items[0].sender_handle, "dev");
        assert_eq!(items[0].seq, 1);
        assert_eq!(page.total, Some(1));
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn pagination_consistency_scenario_4() {
        let layer = ChannelLayer::new(Arc::new(FakeBroker::new()), "proj1".into());
        for i in 1..=12 {
            layer
                .send(
                    "parallel-work",
                    &agent(1),
                    "dev",
                    &format!("m{i}"),
                    &ChannelRetention::default(),
                )
                .await
                .unwrap();
        }
        let (page1, info1) = layer.read("parallel-work", Some(5), None).await.unwrap();
        assert_eq!(page1.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![12, 11, 10, 9, 8]);
        assert_eq!(info1.total, Some(12));
        assert!(info1.has_more);

        let (page2, info2) = layer
            .read("parallel-work", None, info1.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(page2.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![7, 6, 5, 4, 3]);
        assert!(info2.has_more);

        let (page3, info3) = layer
            .read("parallel-work", None, info2.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(page3.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![2, 1]);
        assert!(!info3.has_more);

        let mut all_seqs: Vec<u64> = page1.iter().chain(&page2).chain(&page3).map(|m| m.seq).collect();
        all_seqs.sort_unstable();
        assert_eq!(all_seqs, (1..=12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn invalid_channel_name_is_rejected() {
        let layer = ChannelLayer::new(Arc::new(FakeBroker::new()), "proj1".into());
        let err = layer
            .send("Not Valid", &agent(1), "dev", "x", &ChannelRetention::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn last_seq_is_monotonically_non_decreasing() {
        let layer = ChannelLayer::new(Arc::new(FakeBroker::new()), "proj1".into());
        let s1 = layer.status("roadmap").await.unwrap().last_seq.unwrap_or(0);
        layer
            .send("roadmap", &agent(1), "dev", "a", &ChannelRetention::default())
            .await
            .unwrap();
        layer
            .send("roadmap", &agent(1), "dev", "b", &ChannelRetention::default())
            .await
            .unwrap();
        let s2 = layer.status("roadmap").await.unwrap().last_seq.unwrap();
        assert_eq!(s2 - s1, 2);
    }
}
