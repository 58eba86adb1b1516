//! Agent registry and presence: register, discover, heartbeat, deregister.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleet_broker::Broker;
use fleet_core::trace::TraceEvent;
use fleet_core::{AgentId, Error, Result};
use fleet_messaging::MessagingLayer;
use fleet_pagination::{build_page_info, resolve_page_start, PageInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const REGISTRY_BUCKET: &str = "registry";
const DEFAULT_DISCOVER_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Private,
    ProjectOnly,
    UserOnly,
    Public,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::ProjectOnly
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub handle: String,
    pub hostname: String,
    pub username: String,
    pub project_id: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub visibility: Visibility,
    pub status: AgentStatus,
    pub current_task_count: u32,
    pub max_concurrent_tasks: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterRequest {
    pub handle: Option<String>,
    pub username: String,
    pub hostname: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub visibility: Visibility,
    pub max_concurrent_tasks: u32,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoverFilter {
    pub agent_type: Option<String>,
    pub capability: Option<String>,
    pub status: Option<AgentStatus>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceUpdate {
    pub status: Option<AgentStatus>,
    pub current_task_count: Option<u32>,
}

pub struct Registry<B: Broker> {
    broker: Arc<B>,
    messaging: MessagingLayer<B>,
    project_id: String,
}

impl<B: Broker> Registry<B> {
    pub fn new(broker: Arc<B>, project_id: String) -> Self {
        let messaging = MessagingLayer::new(broker.clone(), project_id.clone());
        Self {
            broker,
            messaging,
            project_id,
        }
    }

    async fn load(&self, agent_id: &AgentId) -> Result<Option<(AgentRecord, u64)>> {
        let entry = self.broker.kv_get(REGISTRY_BUCKET, agent_id.as_str()).await?;
        match entry {
            None => Ok(None),
            Some(e) => {
                let record: AgentRecord = serde_json::from_slice(&e.value)?;
                Ok(Some((record, e.revision)))
            }
        }
    }

    async fn store(&self, agent_id: &AgentId, record: &AgentRecord, expected_revision: Option<u64>) -> Result<u64> {
        let payload = serde_json::to_vec(record)?;
        self.broker
            .kv_put_if_revision(REGISTRY_BUCKET, agent_id.as_str(), payload, expected_revision)
            .await
    }

    /// Idempotent on `agent_id`: first call creates the record, later calls
    /// refresh it without losing caller-managed fields like `status`.
    pub async fn register(&self, agent_id: &AgentId, req: RegisterRequest) -> Result<AgentRecord> {
        self.broker.ensure_kv_bucket(REGISTRY_BUCKET).await?;
        self.messaging.ensure_inbox(agent_id).await?;
        let now = Utc::now();

        // CAS retry loop: another process registering/updating the same
        // agent concurrently must not be lost.
        for _ in 0..8 {
            match self.load(agent_id).await? {
                Some((mut existing, revision)) => {
                    existing.last_heartbeat = now;
                    existing.last_activity = now;
                    if let Some(h) = &req.handle {
                        existing.handle = h.clone();
                    }
                    match self.store(agent_id, &existing, Some(revision)).await {
                        Ok(_) => return Ok(existing),
                        Err(Error::Conflict(_)) => continue,
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    let handle = req
                        .handle
                        .clone()
                        .unwrap_or_else(|| auto_handle(&req.agent_type, agent_id));
                    let record = AgentRecord {
                        agent_id: agent_id.to_string(),
                        handle,
                        hostname: req.hostname.clone(),
                        username: req.username.clone(),
                        project_id: self.project_id.clone(),
                        agent_type: req.agent_type.clone(),
                        capabilities: dedup(req.capabilities.clone()),
                        visibility: req.visibility,
                        status: AgentStatus::Online,
                        current_task_count: 0,
                        max_concurrent_tasks: req.max_concurrent_tasks,
                        last_heartbeat: now,
                        last_activity: now,
                        registered_at: now,
                        metadata: req.metadata.clone(),
                    };
                    match self.store(agent_id, &record, None).await {
                        Ok(_) => {
                            TraceEvent::AgentRegistered {
                                agent_id: agent_id.to_string(),
                                agent_type: record.agent_type.clone(),
                                handle: record.handle.clone(),
                            }
                            .emit();
                            return Ok(record);
                        }
                        Err(Error::Conflict(_)) => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Err(Error::Conflict(format!(
            "register: too much contention on {agent_id}"
        )))
    }

    pub async fn get_info(
        &self,
        caller: &AgentId,
        caller_username: &str,
        target: &AgentId,
    ) -> Result<Option<AgentRecord>> {
        let Some((record, _)) = self.load(target).await? else {
            return Ok(None);
        };
        if visible_to(&record, caller, &self.project_id, caller_username) {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    pub async fn update_presence(&self, agent_id: &AgentId, update: PresenceUpdate) -> Result<AgentRecord> {
        for _ in 0..8 {
            let (mut record, revision) = self
                .load(agent_id)
                .await?
                .ok_or_else(|| Error::NotRegistered(agent_id.to_string()))?;
            if let Some(status) = update.status {
                record.status = status;
            }
            if let Some(count) = update.current_task_count {
                record.current_task_count = count;
            }
            record.last_activity = Utc::now();
            record.last_heartbeat = Utc::now();
            match self.store(agent_id, &record, Some(revision)).await {
                Ok(_) => {
                    TraceEvent::HeartbeatRefreshed {
                        agent_id: agent_id.to_string(),
                    }
                    .emit();
                    return Ok(record);
                }
                Err(Error::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict(format!(
            "update_presence: too much contention on {agent_id}"
        )))
    }

    pub async fn set_handle(&self, agent_id: &AgentId, handle: &str) -> Result<AgentRecord> {
        for _ in 0..8 {
            let (mut record, revision) = self
                .load(agent_id)
                .await?
                .ok_or_else(|| Error::NotRegistered(agent_id.to_string()))?;
            record.handle = handle.to_string();
            record.last_activity = Utc::now();
            match self.store(agent_id, &record, Some(revision)).await {
                Ok(_) => return Ok(record),
                Err(Error::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict(format!("set_handle: too much contention on {agent_id}")))
    }

    /// Heartbeat-only refresh: no fields change besides the timestamps.
    pub async fn heartbeat(&self, agent_id: &AgentId) -> Result<AgentRecord> {
        self.update_presence(agent_id, PresenceUpdate::default()).await
    }

    pub async fn deregister(&self, agent_id: &AgentId) -> Result<()> {
        self.broker.kv_delete(REGISTRY_BUCKET, agent_id.as_str()).await?;
        TraceEvent::AgentDeregistered {
            agent_id: agent_id.to_string(),
        }
        .emit();
        Ok(())
    }

    pub async fn discover(
        &self,
        caller: &AgentId,
        caller_username: &str,
        filter: &DiscoverFilter,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<(Vec<AgentRecord>, PageInfo)> {
        self.broker.ensure_kv_bucket(REGISTRY_BUCKET).await?;
        let keys = self.broker.kv_keys(REGISTRY_BUCKET).await?;
        let mut matches = Vec::new();
        for key in keys {
            let Some(entry) = self.broker.kv_get(REGISTRY_BUCKET, &key).await? else {
                continue;
            };
            let Ok(record) = serde_json::from_slice::<AgentRecord>(&entry.value) else {
                continue;
            };
            if !visible_to(&record, caller, &self.project_id, caller_username) {
                continue;
            }
            if !passes_filter(&record, filter) {
                continue;
            }
            matches.push(record);
        }
        matches.sort_by(|a, b| b.last_heartbeat.cmp(&a.last_heartbeat));

        let filters = serde_json::json!({
            "agent_type": filter.agent_type,
            "capability": filter.capability,
            "status": filter.status,
            "hostname": filter.hostname,
        });
        let (offset, page_limit) =
            resolve_page_start(cursor, &filters, DEFAULT_DISCOVER_LIMIT, limit, 1000)?;
        let total = matches.len();
        let page: Vec<AgentRecord> = matches.into_iter().skip(offset).take(page_limit).collect();
        let info = build_page_info(offset, page_limit, page.len(), Some(total), &filters);
        Ok((page, info))
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

fn auto_handle(agent_type: &str, agent_id: &AgentId) -> String {
    let suffix = &agent_id.as_str()[..6];
    if agent_type.is_empty() {
        format!("agent-{suffix}")
    } else {
        format!("{agent_type}-{suffix}")
    }
}

fn visible_to(record: &AgentRecord, caller: &AgentId, caller_project_id: &str, caller_username: &str) -> bool {
    match record.visibility {
        Visibility::Private => record.agent_id == caller.to_string(),
        Visibility::ProjectOnly => record.project_id == caller_project_id,
        Visibility::UserOnly => record.username == caller_username,
        Visibility::Public => true,
    }
}

fn passes_filter(record: &AgentRecord, filter: &DiscoverFilter) -> bool {
    if let Some(t) = &filter.agent_type {
        if &record.agent_type != t {
            return false;
        }
    }
    if let Some(cap) = &filter.capability {
        if !record.capabilities.iter().any(|c| c == cap) {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if record.status != status {
            return false;
        }
    }
    if let Some(host) = &filter.hostname {
        if &record.hostname != host {
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

    fn request(agent_type: &str, caps: &[&str]) -> RegisterRequest {
        RegisterRequest {
            handle: None,
            username: "alice".into(),
            hostname: "hostA".into(),
            agent_type: agent_type.into(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            visibility: Visibility::ProjectOnly,
            max_concurrent_tasks: 4,
            metadata: Value::Null,
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_and_auto_handles() {
        let registry = Registry::new(Arc::new(FakeBroker::new()), "proj1".into());
        let a = agent(1);
        let r1 = registry.register(&a, request("reviewer", &["rust"])).await.unwrap();
        assert!(r1.handle.starts_with("reviewer-"));
        let r2 = registry.register(&a, request("reviewer", &["rust"])).await.unwrap();
        assert_eq!(r1.handle, r2.handle);
        assert_eq!(r1.agent_id, r2.agent_id);
    }

    #[tokio::test]
    async fn discover_filters_by_capability_and_status() {
        let registry = Registry::new(Arc::new(FakeBroker::new()), "proj1".into());
        registry.register(&agent(1), request("reviewer", &["rust", "go"])).await.unwrap();
        registry.register(&agent(2), request("planner", &["rust"])).await.unwrap();
        registry
            .update_presence(&agent(2), PresenceUpdate { status: Some(AgentStatus::Busy), current_task_count: None })
            .await
            .unwrap();

        let filter = DiscoverFilter {
            capability: Some("go".into()),
            ..Default::default()
        };
        let (found, info) = registry
            .discover(&agent(1), "alice", &filter, Some(10), None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].agent_id, agent(1).to_string());
        assert_eq!(info.total, Some(1));

        let status_filter = DiscoverFilter {
            status: Some(AgentStatus::Busy),
            ..Default::default()
        };
        let (busy, _) = registry
            .discover(&agent(1), "alice", &status_filter, Some(10), None)
            .await
            .unwrap();
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].agent_id, agent(2).to_string());
    }

    #[tokio::test]
    async fn private_records_hidden_from_others() {
        let registry = Registry::new(Arc::new(FakeBroker::new()), "proj1".into());
        let mut req = request("reviewer", &[]);
        req.visibility = Visibility::Private;
        registry.register(&agent(1), req).await.unwrap();
        let (found, _) = registry
            .discover(&agent(2), "bob", &DiscoverFilter::default(), Some(10), None)
            .await
            .unwrap();
        assert!(found.is_empty());
        let (own, _) = registry
            .discover(&agent(1), "alice", &DiscoverFilter::default(), Some(10), None)
            .await
            .unwrap();
        assert_eq!(own.len(), 1);
    }

    #[tokio::test]
    async fn deregister_removes_record() {
        let registry = Registry::new(Arc::new(FakeBroker::new()), "proj1".into());
        registry.register(&agent(1), request("reviewer", &[])).await.unwrap();
        registry.deregister(&agent(1)).await.unwrap();
        let info = registry.get_info(&agent(1), "alice", &agent(1)).await.unwrap();
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn heartbeat_updates_timestamp_only() {
        let registry = Registry::new(Arc::new(FakeBroker::new()), "proj1".into());
        let initial = registry.register(&agent(1), request("reviewer", &[])).await.unwrap();
        let refreshed = registry.heartbeat(&agent(1)).await.unwrap();
        assert_eq!(initial.status, refreshed.status);
        assert!(refreshed.last_heartbeat >= initial.last_heartbeat);
    }
}
