use serde::Serialize;

/// Structured trace events emitted across all fleet-mesh crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    AgentRegistered {
        agent_id: String,
        agent_type: String,
        handle: String,
    },
    AgentDeregistered {
        agent_id: String,
    },
    HeartbeatRefreshed {
        agent_id: String,
    },
    ChannelPublished {
        channel: String,
        seq: u64,
        sender_agent_id: String,
    },
    DirectMessageDelivered {
        recipient_agent_id: String,
        message_type: String,
    },
    WorkBroadcast {
        capability: String,
        work_item_id: String,
        priority: Option<u8>,
    },
    WorkClaimed {
        capability: String,
        work_item_id: String,
        attempts: u32,
    },
    WorkRedelivered {
        capability: String,
        work_item_id: String,
        attempts: u32,
    },
    WorkDeadLettered {
        capability: String,
        work_item_id: String,
        dlq_id: String,
        last_error: String,
    },
    WorkRetriedFromDlq {
        dlq_id: String,
        work_item_id: String,
        reset_attempts: bool,
    },
    PaginationCursorIssued {
        tool: String,
        offset: usize,
        limit: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "fleet_event");
    }
}
