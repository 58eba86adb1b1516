//! Tool dispatch: one entry point mapping tool name + JSON args onto the
//! component crates, with a uniform result/error envelope.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleet_broker::Broker;
use fleet_channels::ChannelLayer;
use fleet_core::config::Config;
use fleet_core::{AgentId, Error, ErrorEnvelope, Result};
use fleet_messaging::{MessagingLayer, ReadDirectFilter};
use fleet_pagination::clamp_limit;
use fleet_registry::{AgentStatus, DiscoverFilter, PresenceUpdate, RegisterRequest, Registry, Visibility};
use fleet_workqueue::{WorkBroadcastRequest, WorkListFilter, WorkQueue, WorkQueueSettings};
use serde_json::{json, Value};

pub type ToolResult = std::result::Result<Value, ErrorEnvelope>;

/// The 19 tools from the external interface table plus the supplemented
/// `registry_heartbeat` liveness call.
pub struct ToolRouter<B: Broker> {
    channels: ChannelLayer<B>,
    registry: Registry<B>,
    messaging: MessagingLayer<B>,
    workqueue: WorkQueue<B>,
    config: Config,
}

impl<B: Broker> ToolRouter<B> {
    pub fn new(broker: Arc<B>, project_id: String, config: Config) -> Self {
        let settings = WorkQueueSettings {
            ack_wait: std::time::Duration::from_millis(config.workqueue.workqueue_ack_timeout_ms),
            max_deliver: config.workqueue.workqueue_max_attempts,
            dlq_ttl: std::time::Duration::from_millis(config.workqueue.workqueue_dlq_ttl_ms),
        };
        Self {
            channels: ChannelLayer::new(broker.clone(), project_id.clone()),
            registry: Registry::new(broker.clone(), project_id.clone()),
            messaging: MessagingLayer::new(broker.clone(), project_id),
            workqueue: WorkQueue::new(broker, settings),
            config,
        }
    }

    /// Dispatch one tool call. Never panics on malformed input — every
    /// failure comes back as an `ErrorEnvelope`, except `work_claim`'s
    /// empty-queue outcome, which is success-shaped by design.
    pub async fn dispatch(&self, tool_name: &str, args: Value, caller: &AgentId) -> ToolResult {
        self.dispatch_inner(tool_name, args, caller)
            .await
            .map_err(|e| ErrorEnvelope::from(&e))
    }

    async fn dispatch_inner(&self, tool_name: &str, args: Value, caller: &AgentId) -> Result<Value> {
        match tool_name {
            "handle_set" => self.handle_set(&args, caller).await,
            "handle_get" => self.handle_get(caller).await,
            "channels_list" => self.channels_list(),
            "channels_send" => self.channels_send(&args, caller).await,
            "channels_read" => self.channels_read(&args).await,
            "channels_status" => self.channels_status(&args).await,
            "registry_register" => self.registry_register(&args, caller).await,
            "registry_discover" => self.registry_discover(&args, caller).await,
            "registry_get_info" => self.registry_get_info(&args, caller).await,
            "registry_update_presence" => self.registry_update_presence(&args, caller).await,
            "registry_deregister" => self.registry_deregister(caller).await,
            "registry_heartbeat" => self.registry_heartbeat(caller).await,
            "messages_send_direct" => self.messages_send_direct(&args, caller).await,
            "messages_read_direct" => self.messages_read_direct(&args, caller).await,
            "work_broadcast" => self.work_broadcast(&args, caller).await,
            "work_list" => self.work_list(&args).await,
            "work_claim" => self.work_claim(&args).await,
            "work_queue_status" => self.work_queue_status(&args).await,
            "dlq_list" => self.dlq_list(&args).await,
            "dlq_retry" => self.dlq_retry(&args).await,
            "dlq_discard" => self.dlq_discard(&args).await,
            other => Err(Error::InvalidArgument(format!("unknown tool {other:?}"))),
        }
    }

    async fn caller_record(&self, caller: &AgentId) -> Result<fleet_registry::AgentRecord> {
        self.registry
            .get_info(caller, "", caller)
            .await?
            .ok_or_else(|| Error::NotRegistered(caller.to_string()))
    }

    // ── C5: registry & presence ────────────────────────────────────

    async fn handle_set(&self, args: &Value, caller: &AgentId) -> Result<Value> {
        let handle = req_str(args, "handle")?;
        let record = self.registry.set_handle(caller, &handle).await?;
        Ok(json!({ "handle": record.handle }))
    }

    async fn handle_get(&self, caller: &AgentId) -> Result<Value> {
        let record = self.caller_record(caller).await?;
        Ok(json!({ "handle": record.handle }))
    }

    async fn registry_register(&self, args: &Value, caller: &AgentId) -> Result<Value> {
        let visibility = match opt_str(args, "visibility")? {
            Some(raw) => parse_enum::<Visibility>("visibility", &raw)?,
            None => Visibility::default(),
        };
        let req = RegisterRequest {
            handle: opt_str(args, "handle")?,
            username: opt_str(args, "username")?.unwrap_or_default(),
            hostname: opt_str(args, "hostname")?.unwrap_or_default(),
            agent_type: req_str(args, "agent_type")?,
            capabilities: opt_str_vec(args, "capabilities")?,
            visibility,
            max_concurrent_tasks: opt_u32(args, "max_concurrent_tasks")?.unwrap_or(1),
            metadata: args.get("metadata").cloned().unwrap_or(Value::Null),
        };
        let record = self.registry.register(caller, req).await?;
        Ok(serde_json::to_value(record)?)
    }

    async fn registry_discover(&self, args: &Value, caller: &AgentId) -> Result<Value> {
        let caller_username = self.caller_record(caller).await?.username;
        let filter = DiscoverFilter {
            agent_type: opt_str(args, "agent_type")?,
            capability: opt_str(args, "capability")?,
            status: match opt_str(args, "status")? {
                Some(raw) => Some(parse_enum::<AgentStatus>("status", &raw)?),
                None => None,
            },
            hostname: opt_str(args, "hostname")?,
        };
        let limit = clamp_limit(opt_usize(args, "limit")?, self.config.pagination.registry_discover_max);
        let cursor = opt_str(args, "cursor")?;
        let (records, page) = self
            .registry
            .discover(caller, &caller_username, &filter, Some(limit), cursor.as_deref())
            .await?;
        Ok(json!({ "items": records, "page": page }))
    }

    async fn registry_get_info(&self, args: &Value, caller: &AgentId) -> Result<Value> {
        let target = AgentId::parse(&req_str(args, "agent_id")?)?;
        let caller_username = self.caller_record(caller).await?.username;
        let record = self
            .registry
            .get_info(caller, &caller_username, &target)
            .await?
            .ok_or_else(|| Error::NotFound(format!("agent {target}")))?;
        Ok(serde_json::to_value(record)?)
    }

    async fn registry_update_presence(&self, args: &Value, caller: &AgentId) -> Result<Value> {
        let update = PresenceUpdate {
            status: match opt_str(args, "status")? {
                Some(raw) => Some(parse_enum::<AgentStatus>("status", &raw)?),
                None => None,
            },
            current_task_count: opt_u32(args, "current_task_count")?,
        };
        let record = self.registry.update_presence(caller, update).await?;
        Ok(serde_json::to_value(record)?)
    }

    async fn registry_deregister(&self, caller: &AgentId) -> Result<Value> {
        self.registry.deregister(caller).await?;
        Ok(json!({ "deregistered": true }))
    }

    async fn registry_heartbeat(&self, caller: &AgentId) -> Result<Value> {
        let record = self.registry.heartbeat(caller).await?;
        Ok(json!({ "last_heartbeat": record.last_heartbeat }))
    }

    // ── C4: channels ────────────────────────────────────────────────

    fn channels_list(&self) -> Result<Value> {
        let items: Vec<Value> = self
            .config
            .channels
            .channels
            .iter()
            .map(|c| json!({ "name": c.name, "description": c.description }))
            .collect();
        Ok(json!({ "channels": items }))
    }

    fn retention_for(&self, channel: &str) -> fleet_core::config::ChannelRetention {
        self.config
            .channels
            .channels
            .iter()
            .find(|c| c.name == channel)
            .map(|c| c.retention.clone())
            .unwrap_or_default()
    }

    async fn channels_send(&self, args: &Value, caller: &AgentId) -> Result<Value> {
        let channel = req_str(args, "channel")?;
        let message = req_str(args, "message")?;
        let handle = self.caller_record(caller).await?.handle;
        let retention = self.retention_for(&channel);
        let result = self.channels.send(&channel, caller, &handle, &message, &retention).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn channels_read(&self, args: &Value) -> Result<Value> {
        let channel = req_str(args, "channel")?;
        let limit = clamp_limit(opt_usize(args, "limit")?, self.config.pagination.channels_read_max);
        let cursor = opt_str(args, "cursor")?;
        let (items, page) = self.channels.read(&channel, Some(limit), cursor.as_deref()).await?;
        Ok(json!({ "items": items, "page": page }))
    }

    async fn channels_status(&self, args: &Value) -> Result<Value> {
        match opt_str(args, "channel")? {
            Some(channel) => {
                let status = self.channels.status(&channel).await?;
                Ok(serde_json::to_value(status)?)
            }
            None => {
                let names: Vec<String> = self.config.channels.channels.iter().map(|c| c.name.clone()).collect();
                let mut statuses = Vec::with_capacity(names.len());
                for name in names {
                    statuses.push(self.channels.status(&name).await?);
                }
                Ok(json!({ "channels": statuses }))
            }
        }
    }

    // ── C6: direct messaging ───────────────────────────────────────

    async fn messages_send_direct(&self, args: &Value, caller: &AgentId) -> Result<Value> {
        let recipient = AgentId::parse(&req_str(args, "recipient_agent_id")?)?;
        let message = req_str(args, "message")?;
        let message_type = opt_str(args, "message_type")?.unwrap_or_else(|| "text".into());
        let metadata = args.get("metadata").cloned();
        let result = self
            .messaging
            .send_direct(caller, &recipient, &message_type, &message, metadata)
            .await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn messages_read_direct(&self, args: &Value, caller: &AgentId) -> Result<Value> {
        let limit = clamp_limit(opt_usize(args, "limit")?, self.config.pagination.messages_read_max);
        let filter = ReadDirectFilter {
            message_type: opt_str(args, "message_type")?,
            sender_agent_id: opt_str(args, "sender_agent_id")?,
        };
        let cursor = opt_str(args, "cursor")?;
        let (items, page) = self
            .messaging
            .read_direct(caller, Some(limit), &filter, cursor.as_deref())
            .await?;
        Ok(json!({ "items": items, "page": page }))
    }

    // ── C7: work queue + DLQ ────────────────────────────────────────

    async fn work_broadcast(&self, args: &Value, caller: &AgentId) -> Result<Value> {
        let req = WorkBroadcastRequest {
            id: opt_str(args, "id")?,
            task_id: req_str(args, "task_id")?,
            capability: req_str(args, "required_capability")?,
            description: req_str(args, "description")?,
            priority: opt_u8(args, "priority")?,
            deadline: opt_datetime(args, "deadline")?,
            context_data: args.get("context_data").cloned(),
            scope: match opt_str(args, "scope")? {
                Some(raw) => parse_enum(
                    "scope",
                    &raw,
                )?,
                None => fleet_workqueue::WorkScope::default(),
            },
        };
        let item = self.workqueue.work_broadcast(caller, req).await?;
        Ok(json!({ "work_item_id": item.id }))
    }

    async fn work_list(&self, args: &Value) -> Result<Value> {
        let capability = req_str(args, "capability")?;
        let filter = WorkListFilter {
            min_priority: opt_u8(args, "min_priority")?,
            max_priority: opt_u8(args, "max_priority")?,
            deadline_before: opt_datetime(args, "deadline_before")?,
            deadline_after: opt_datetime(args, "deadline_after")?,
        };
        let limit = clamp_limit(opt_usize(args, "limit")?, self.config.pagination.work_list_max);
        let cursor = opt_str(args, "cursor")?;
        let (items, page) = self.workqueue.work_list(&capability, &filter, Some(limit), cursor.as_deref()).await?;
        Ok(json!({ "items": items, "page": page }))
    }

    /// `NoWorkAvailable` is the common, benign outcome of polling an empty
    /// queue and is returned success-shaped with a sentinel rather than as
    /// an error envelope.
    async fn work_claim(&self, args: &Value) -> Result<Value> {
        let capability = req_str(args, "capability")?;
        let timeout_ms = opt_u32(args, "timeout_ms")?.unwrap_or(1000) as u64;
        match self.workqueue.work_claim(&capability, timeout_ms).await {
            Ok(item) => Ok(json!({ "status": "claimed", "item": item })),
            Err(Error::NoWorkAvailable) => Ok(json!({ "status": "no-work" })),
            Err(e) => Err(e),
        }
    }

    async fn work_queue_status(&self, args: &Value) -> Result<Value> {
        let capability = opt_str(args, "capability")?;
        let statuses = self.workqueue.work_queue_status(capability.as_deref()).await?;
        Ok(json!({ "queues": statuses }))
    }

    async fn dlq_list(&self, args: &Value) -> Result<Value> {
        let capability = opt_str(args, "capability")?;
        let limit = clamp_limit(opt_usize(args, "limit")?, self.config.pagination.dlq_list_max);
        let cursor = opt_str(args, "cursor")?;
        let (items, page) = self.workqueue.dlq_list(capability.as_deref(), Some(limit), cursor.as_deref()).await?;
        Ok(json!({ "items": items, "page": page }))
    }

    async fn dlq_retry(&self, args: &Value) -> Result<Value> {
        let item_id = req_str(args, "item_id")?;
        let reset_attempts = opt_bool(args, "reset_attempts")?.unwrap_or(false);
        let item = self.workqueue.dlq_retry(&item_id, reset_attempts).await?;
        Ok(json!({ "retried": true, "item": item }))
    }

    async fn dlq_discard(&self, args: &Value) -> Result<Value> {
        let item_id = req_str(args, "item_id")?;
        self.workqueue.dlq_discard(&item_id).await?;
        Ok(json!({ "discarded": true }))
    }
}

// ── Argument extraction helpers ──────────────────────────────────────

fn req_str(args: &Value, field: &str) -> Result<String> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidArgument(format!("missing required field {field:?}")))
}

fn opt_str(args: &Value, field: &str) -> Result<Option<String>> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::InvalidArgument(format!("{field:?} must be a string"))),
    }
}

fn opt_str_vec(args: &Value, field: &str) -> Result<Vec<String>> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::InvalidArgument(format!("{field:?} must be an array of strings")))
            })
            .collect(),
        Some(_) => Err(Error::InvalidArgument(format!("{field:?} must be an array"))),
    }
}

fn opt_u32(args: &Value, field: &str) -> Result<Option<u32>> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| Error::InvalidArgument(format!("{field:?} must be a non-negative integer"))),
    }
}

fn opt_u8(args: &Value, field: &str) -> Result<Option<u8>> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| Error::InvalidArgument(format!("{field:?} must be an integer in [0,255]"))),
    }
}

fn opt_usize(args: &Value, field: &str) -> Result<Option<usize>> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| Error::InvalidArgument(format!("{field:?} must be a non-negative integer"))),
    }
}

fn opt_bool(args: &Value, field: &str) -> Result<Option<bool>> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(Error::InvalidArgument(format!("{field:?} must be a boolean"))),
    }
}

fn opt_datetime(args: &Value, field: &str) -> Result<Option<DateTime<Utc>>> {
    match opt_str(args, field)? {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| Error::InvalidArgument(format!("{field:?}: {e}"))),
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(field: &str, raw: &str) -> Result<T> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| Error::InvalidArgument(format!("{field:?}: unrecognized value {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_broker::test_support::FakeBroker;

    fn agent(n: u8) -> AgentId {
        AgentId::parse(&n.to_string().repeat(32)).unwrap()
    }

    fn router() -> ToolRouter<FakeBroker> {
        ToolRouter::new(Arc::new(FakeBroker::new()), "proj1".into(), Config::default())
    }

    async fn register(router: &ToolRouter<FakeBroker>, caller: &AgentId) {
        router
            .dispatch(
                "registry_register",
                json!({ "agent_type": "reviewer", "username": "alice", "hostname": "hostA" }),
                caller,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_argument() {
        let router = router();
        let err = router.dispatch("not_a_tool", json!({}), &agent(1)).await.unwrap_err();
        assert_eq!(err.kind, fleet_core::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn register_then_handle_get_round_trips() {
        let router = router();
        let caller = agent(1);
        register(&router, &caller).await;
        let out = router.dispatch("handle_get", json!({}), &caller).await.unwrap();
        assert!(out["handle"].as_str().unwrap().starts_with("reviewer-"));
    }

    #[tokio::test]
    async fn channels_send_then_read_round_trips() {
        let router = router();
        let caller = agent(1);
        register(&router, &caller).await;
        router
            .dispatch("channels_send", json!({ "channel": "roadmap", "message": "hi" }), &caller)
            .await
            .unwrap();
        let out = router.dispatch("channels_read", json!({ "channel": "roadmap" }), &caller).await.unwrap();
        assert_eq!(out["items"][0]["body"], "hi");
    }

    #[tokio::test]
    async fn work_claim_on_empty_queue_is_success_shaped() {
        let router = router();
        let caller = agent(1);
        register(&router, &caller).await;
        let out = router
            .dispatch("work_claim", json!({ "capability": "rust", "timeout_ms": 5 }), &caller)
            .await
            .unwrap();
        assert_eq!(out["status"], "no-work");
    }

    #[tokio::test]
    async fn work_broadcast_then_claim_round_trips() {
        let router = router();
        let caller = agent(1);
        register(&router, &caller).await;
        router
            .dispatch(
                "work_broadcast",
                json!({ "task_id": "t1", "description": "d", "required_capability": "rust" }),
                &caller,
            )
            .await
            .unwrap();
        let out = router
            .dispatch("work_claim", json!({ "capability": "rust", "timeout_ms": 50 }), &caller)
            .await
            .unwrap();
        assert_eq!(out["status"], "claimed");
    }

    #[tokio::test]
    async fn registry_get_info_unknown_agent_is_not_found() {
        let router = router();
        let caller = agent(1);
        register(&router, &caller).await;
        let err = router
            .dispatch("registry_get_info", json!({ "agent_id": agent(9).to_string() }), &caller)
            .await
            .unwrap_err();
        assert_eq!(err.kind, fleet_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn calling_a_tool_before_registration_is_not_registered() {
        let router = router();
        let err = router.dispatch("handle_get", json!({}), &agent(1)).await.unwrap_err();
        assert_eq!(err.kind, fleet_core::ErrorKind::NotRegistered);
    }
}
